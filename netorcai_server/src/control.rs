// The control surface: a line-oriented command interpreter mutating
// pre-game configuration, triggering an explicit start, and requesting
// termination.
//
// Commands are regex-matched against whitespace-trimmed lines, mirroring
// the shell grammar:
//
//   start
//   set VARIABLE=VALUE   (alt: set VARIABLE VALUE)
//   print VARIABLE       (or: print all)
//   call URL
//   quit
//
// `execute_command` returns the user-visible output lines instead of
// printing them, so the interpreter stays testable in-process; the binary
// prints them to stdout.

use crossbeam_channel::Sender;
use regex::Regex;
use tracing::{info, warn};

use crate::server::ProcessEvent;
use crate::state::{lock, GamePhase, SharedState};

const SET_VARIABLES: [&str; 6] = [
    "nb-turns-max",
    "nb-players-max",
    "nb-splayers-max",
    "nb-visus-max",
    "delay-first-turn",
    "delay-turns",
];

/// Execute one control command against the global state. All mutations
/// acquire the global mutex; configuration is only mutable before the game
/// starts.
pub fn execute_command(
    line: &str,
    gs: &SharedState,
    exit: &Sender<ProcessEvent>,
) -> Vec<String> {
    let line = line.trim();
    let mut out = Vec::new();

    let r_start = Regex::new(r"\Astart\z").unwrap();
    let r_quit = Regex::new(r"\Aquit\z").unwrap();
    let r_print = Regex::new(r"\Aprint\s+(?P<variable>\S+)\z").unwrap();
    let r_set = Regex::new(r"\Aset\s+(?P<variable>\S+)(\s|=)(?P<value>\S+)\z").unwrap();
    let r_call = Regex::new(r"\Acall\s+(?P<url>\S+)\z").unwrap();

    if r_start.is_match(line) {
        let mut state = lock(gs);
        if state.phase == GamePhase::NotRunning {
            if state.game_logic.is_some() {
                state.begin_game();
            } else {
                out.push("Cannot start: Game logic not connected".into());
            }
        } else {
            out.push("Game has already been started".into());
        }
    } else if r_quit.is_match(line) {
        let _ = exit.send(ProcessEvent::Quit);
    } else if let Some(caps) = r_print.captures(line) {
        print_variable(&caps["variable"], gs, &mut out);
    } else if let Some(caps) = r_set.captures(line) {
        set_variable(&caps["variable"], &caps["value"], gs, &mut out);
    } else if let Some(caps) = r_call.captures(line) {
        call_agent(&caps["url"]);
    } else {
        syntax_help(line, &mut out);
    }

    out
}

fn print_variable(variable: &str, gs: &SharedState, out: &mut Vec<String>) {
    let state = lock(gs);
    let conf = &state.conf;
    match variable {
        "nb-turns-max" => out.push(format!("nb-turns-max={}", conf.nb_turns_max)),
        "nb-players-max" => out.push(format!("nb-players-max={}", conf.nb_players_max)),
        "nb-splayers-max" => {
            out.push(format!("nb-splayers-max={}", conf.nb_special_players_max))
        }
        "nb-visus-max" => out.push(format!("nb-visus-max={}", conf.nb_visus_max)),
        "delay-first-turn" => {
            out.push(format!("delay-first-turn={}", conf.ms_before_first_turn))
        }
        "delay-turns" => out.push(format!("delay-turns={}", conf.ms_between_turns)),
        "all" => {
            out.push(format!("nb-turns-max={}", conf.nb_turns_max));
            out.push(format!("nb-players-max={}", conf.nb_players_max));
            out.push(format!("nb-splayers-max={}", conf.nb_special_players_max));
            out.push(format!("nb-visus-max={}", conf.nb_visus_max));
            out.push(format!("delay-first-turn={}", conf.ms_before_first_turn));
            out.push(format!("delay-turns={}", conf.ms_between_turns));
        }
        other => out.push(format!(
            "Bad VARIABLE={other}. Accepted values: {} all",
            SET_VARIABLES.join(" ")
        )),
    }
}

fn set_variable(variable: &str, value: &str, gs: &SharedState, out: &mut Vec<String>) {
    if !SET_VARIABLES.contains(&variable) {
        out.push(format!(
            "Bad VARIABLE={variable}. Accepted values: {}",
            SET_VARIABLES.join(" ")
        ));
        return;
    }

    let mut state = lock(gs);
    if state.phase != GamePhase::NotRunning {
        out.push("Cannot set variable: Game has been started".into());
        return;
    }

    let result = match variable {
        "nb-turns-max" | "nb-players-max" | "nb-splayers-max" | "nb-visus-max" => {
            match value.parse::<i64>() {
                Err(e) => Err(format!("Bad VALUE={value}. {e}")),
                Ok(int_value) => match variable {
                    "nb-turns-max" => state.conf.set_nb_turns_max(int_value),
                    "nb-players-max" => state.conf.set_nb_players_max(int_value),
                    "nb-splayers-max" => state.conf.set_nb_special_players_max(int_value),
                    _ => state.conf.set_nb_visus_max(int_value),
                },
            }
        }
        _ => match value.parse::<f64>() {
            Err(e) => Err(format!("Bad VALUE={value}. {e}")),
            Ok(float_value) => match variable {
                "delay-first-turn" => state.conf.set_ms_before_first_turn(float_value),
                _ => state.conf.set_ms_between_turns(float_value),
            },
        },
    };
    if let Err(message) = result {
        out.push(message);
    }
}

/// Fire-and-forget call to an external agent launcher. The launcher itself
/// is outside the coordinator core; only this boundary is ours.
fn call_agent(url: &str) {
    let url = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    };
    std::thread::spawn(move || match reqwest::blocking::get(&url) {
        Ok(response) => info!(%url, status = %response.status(), "Agent launcher called"),
        Err(e) => warn!(%url, error = %e, "Agent launcher call failed"),
    });
}

fn syntax_help(line: &str, out: &mut Vec<String>) {
    if line.starts_with("start") {
        out.push("expected syntax: start".into());
    } else if line.starts_with("quit") {
        out.push("expected syntax: quit".into());
    } else if line.starts_with("print") {
        out.push("expected syntax: print VARIABLE".into());
    } else if line.starts_with("set") {
        out.push("expected syntax: set VARIABLE=VALUE".into());
        out.push("   (alt syntax): set VARIABLE VALUE".into());
    } else if line.starts_with("call") {
        out.push("expected syntax: call URL".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Config, GlobalState};
    use crossbeam_channel::unbounded;

    fn setup() -> (
        SharedState,
        Sender<ProcessEvent>,
        crossbeam_channel::Receiver<ProcessEvent>,
    ) {
        let gs = GlobalState::new(Config::default());
        let (exit_tx, exit_rx) = unbounded();
        (gs, exit_tx, exit_rx)
    }

    fn run(gs: &SharedState, exit: &Sender<ProcessEvent>, line: &str) -> Vec<String> {
        execute_command(line, gs, exit)
    }

    #[test]
    fn set_then_print_round_trips() {
        let (gs, exit, _rx) = setup();
        assert!(run(&gs, &exit, "set nb-turns-max 42").is_empty());
        assert_eq!(run(&gs, &exit, "print nb-turns-max"), vec!["nb-turns-max=42"]);

        // Both separators are accepted.
        assert!(run(&gs, &exit, "set nb-players-max=7").is_empty());
        assert_eq!(
            run(&gs, &exit, "print nb-players-max"),
            vec!["nb-players-max=7"]
        );

        assert!(run(&gs, &exit, "set delay-turns 500").is_empty());
        assert_eq!(run(&gs, &exit, "print delay-turns"), vec!["delay-turns=500"]);
    }

    #[test]
    fn set_out_of_range_is_rejected_and_keeps_old_value() {
        let (gs, exit, _rx) = setup();
        run(&gs, &exit, "set nb-turns-max 42");
        assert_eq!(
            run(&gs, &exit, "set nb-turns-max 0"),
            vec!["Bad VALUE=0: Not in [1,65535]"]
        );
        assert_eq!(
            run(&gs, &exit, "set delay-turns 49"),
            vec!["Bad VALUE=49: Not in [50,10000]"]
        );
        assert_eq!(run(&gs, &exit, "print nb-turns-max"), vec!["nb-turns-max=42"]);
    }

    #[test]
    fn set_non_numeric_reports_parse_error() {
        let (gs, exit, _rx) = setup();
        let out = run(&gs, &exit, "set nb-turns-max abc");
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("Bad VALUE=abc."), "{}", out[0]);
    }

    #[test]
    fn set_unknown_variable_lists_accepted_values() {
        let (gs, exit, _rx) = setup();
        let out = run(&gs, &exit, "set no-such-var 1");
        assert_eq!(
            out,
            vec![
                "Bad VARIABLE=no-such-var. Accepted values: nb-turns-max nb-players-max \
                 nb-splayers-max nb-visus-max delay-first-turn delay-turns"
            ]
        );
    }

    #[test]
    fn print_all_lists_every_variable() {
        let (gs, exit, _rx) = setup();
        let out = run(&gs, &exit, "print all");
        assert_eq!(out.len(), 6);
        assert!(out[0].starts_with("nb-turns-max="));
        assert!(out[5].starts_with("delay-turns="));
    }

    #[test]
    fn set_rejected_once_game_started() {
        let (gs, exit, _rx) = setup();
        lock(&gs).phase = GamePhase::Running;
        assert_eq!(
            run(&gs, &exit, "set nb-turns-max 5"),
            vec!["Cannot set variable: Game has been started"]
        );
    }

    #[test]
    fn start_without_game_logic_fails() {
        let (gs, exit, _rx) = setup();
        assert_eq!(
            run(&gs, &exit, "start"),
            vec!["Cannot start: Game logic not connected"]
        );
        assert_eq!(lock(&gs).phase, GamePhase::NotRunning);
    }

    #[test]
    fn start_twice_is_a_visible_no_op() {
        let (gs, exit, _rx) = setup();
        lock(&gs).phase = GamePhase::Running;
        assert_eq!(run(&gs, &exit, "start"), vec!["Game has already been started"]);
    }

    #[test]
    fn quit_signals_the_process() {
        let (gs, exit, rx) = setup();
        assert!(run(&gs, &exit, "quit").is_empty());
        assert_eq!(rx.try_recv().unwrap(), ProcessEvent::Quit);
    }

    #[test]
    fn malformed_commands_get_syntax_help() {
        let (gs, exit, _rx) = setup();
        assert_eq!(run(&gs, &exit, "start now"), vec!["expected syntax: start"]);
        assert_eq!(run(&gs, &exit, "print"), vec!["expected syntax: print VARIABLE"]);
        assert_eq!(
            run(&gs, &exit, "set nb-turns-max"),
            vec![
                "expected syntax: set VARIABLE=VALUE",
                "   (alt syntax): set VARIABLE VALUE"
            ]
        );
        assert!(run(&gs, &exit, "").is_empty());
        assert!(run(&gs, &exit, "bogus").is_empty());
    }

    #[test]
    fn whitespace_is_trimmed() {
        let (gs, exit, _rx) = setup();
        assert!(run(&gs, &exit, "  set nb-visus-max 3  ").is_empty());
        assert_eq!(run(&gs, &exit, " print nb-visus-max "), vec!["nb-visus-max=3"]);
    }
}
