// netorcai binary entry point: CLI flags, logging setup, server start,
// and the stdin-fed control surface.

use std::io::BufRead;
use std::process;

use clap::Parser;
use tracing::error;

use netorcai_server::{start_server, Config, ServerConfig};

/// netorcai: a network orchestrator for artificial intelligence games.
#[derive(Parser, Debug)]
#[command(
    name = "netorcai",
    version,
    about = "Turn-based game coordinator speaking a JSON metaprotocol over TCP"
)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port to listen on
    #[arg(long, default_value_t = 4242)]
    port: u16,

    /// Maximum number of turns
    #[arg(long, default_value_t = 100)]
    nb_turns_max: i64,

    /// Maximum number of players
    #[arg(long, default_value_t = 4)]
    nb_players_max: i64,

    /// Maximum number of special players
    #[arg(long, default_value_t = 0)]
    nb_splayers_max: i64,

    /// Maximum number of visualizations
    #[arg(long, default_value_t = 1)]
    nb_visus_max: i64,

    /// Time (ms) before the first turn
    #[arg(long, default_value_t = 1000.0)]
    delay_first_turn: f64,

    /// Time (ms) between two turns
    #[arg(long, default_value_t = 1000.0)]
    delay_turns: f64,

    /// Start the game automatically once every capacity is filled
    #[arg(long)]
    autostart: bool,

    /// Skip the turn pacing delays
    #[arg(long)]
    fast: bool,

    /// Enable debug logs
    #[arg(long)]
    debug: bool,

    /// Print logs in JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}

fn build_config(args: &Args) -> Result<Config, String> {
    let mut conf = Config::default();
    conf.set_nb_turns_max(args.nb_turns_max)?;
    conf.set_nb_players_max(args.nb_players_max)?;
    conf.set_nb_special_players_max(args.nb_splayers_max)?;
    conf.set_nb_visus_max(args.nb_visus_max)?;
    conf.set_ms_before_first_turn(args.delay_first_turn)?;
    conf.set_ms_between_turns(args.delay_turns)?;
    conf.autostart = args.autostart;
    conf.fast = args.fast;
    Ok(conf)
}

fn main() {
    let args = Args::parse();
    init_tracing(args.debug, args.json_logs);

    let conf = match build_config(&args) {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let handle = match start_server(ServerConfig {
        host: args.host.clone(),
        port: args.port,
        conf,
    }) {
        Ok(handle) => handle,
        Err(e) => {
            error!(host = %args.host, port = args.port, error = %e, "Cannot listen");
            process::exit(1);
        }
    };

    // Control surface: one trimmed line at a time from stdin.
    let controller = handle.controller();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            for output in controller.command(&line) {
                println!("{output}");
            }
        }
    });

    process::exit(handle.wait());
}
