// The game coordinator, run on the game-logic session's thread.
//
// Blocks until the start signal fires (explicit `start` command or
// autostart), or drains if the game logic dies first — the server keeps
// running and a new game logic may log in. Once started it owns the game
// lifecycle: DO_INIT handshake, GAME_STARTS broadcast, then the turn loop —
// fan in player actions (latest per player wins), relay DO_TURN to the game
// logic at the configured pace, fan DO_TURN_ACK state out to every client,
// and close with GAME_ENDS.
//
// The loop multiplexes three sources: coordinator events (actions, start,
// termination), game-logic frames, and the pacing timer. The timer is a
// `crossbeam::channel::at` receiver rebuilt from the pending deadline on
// each iteration, so pacing never blocks action fan-in; `never()` stands in
// while no DO_TURN is scheduled. Fan-out uses `try_send` on each client's
// bounded queue — the coordinator never blocks on a client, and a full
// queue gets that client kicked.

use std::time::{Duration, Instant};

use crossbeam_channel::{at, never, select, Receiver, Sender, TrySendError};
use rand::seq::SliceRandom;
use tracing::{info, warn};

use netorcai_protocol::message::{self, JsonObject, PlayerAction, ServerMessage};
use netorcai_protocol::types::PlayerInfo;

use crate::server::ProcessEvent;
use crate::session::{FrameResult, Session};
use crate::state::{
    lock, CoordEvent, FanoutEvent, GamePhase, GlobalState, PlayerHandle, SharedState,
};

/// The game-logic session plus the channels its coordinator loop
/// multiplexes.
pub struct GameLogicSession {
    pub session: Session,
    pub frames: Receiver<FrameResult>,
    pub events: Receiver<CoordEvent>,
    pub exit: Sender<ProcessEvent>,
    pub gs: SharedState,
}

impl GameLogicSession {
    /// Fatal game-logic failure once the game is underway: kick it and
    /// signal abnormal process shutdown. The shutdown path then drains
    /// every remaining session with "netorcai abort".
    fn abort(&mut self, reason: &str) {
        lock(&self.gs).game_logic = None;
        self.session.kick(reason);
        let _ = self.exit.send(ProcessEvent::GameAborted);
    }

    /// Non-fatal termination: kick the game logic and deregister it.
    fn terminate(&mut self, reason: &str) {
        lock(&self.gs).game_logic = None;
        self.session.kick(reason);
    }
}

/// Assign randomized player identifiers — one shuffled value from
/// `[0, nb_players + nb_special_players)` per participant, players first
/// then special players in bucket-append order — and build the
/// `players_info` snapshot. Visus keep -1.
fn assign_player_ids(gs: &mut GlobalState) -> Vec<PlayerInfo> {
    let nb = gs.players.len() + gs.special_players.len();
    let mut ids: Vec<i64> = (0..nb as i64).collect();
    ids.shuffle(&mut rand::rng());

    for (slot, handle) in gs
        .players
        .iter_mut()
        .chain(gs.special_players.iter_mut())
        .enumerate()
    {
        handle.player_id = ids[slot];
    }

    let players_info: Vec<PlayerInfo> = gs
        .players
        .iter()
        .chain(gs.special_players.iter())
        .map(|handle| PlayerInfo {
            player_id: handle.player_id,
            nickname: handle.nickname.clone(),
            remote_address: handle.remote_address.to_string(),
            is_connected: true,
            is_special_player: handle.is_special_player,
        })
        .collect();
    gs.players_info = players_info.clone();
    players_info
}

/// Insert one player's actions into the pending batch, replacing any prior
/// entry for the same player. A late client that catches up sends two acks
/// within one real turn; only its latest actions reach the game logic.
fn upsert_action(batch: &mut Vec<PlayerAction>, action: PlayerAction) {
    match batch
        .iter_mut()
        .find(|entry| entry.player_id == action.player_id)
    {
        Some(existing) => *existing = action,
        None => batch.push(action),
    }
}

/// Coordinator entry point.
pub fn run_game_logic(mut gl: GameLogicSession) {
    let events = gl.events.clone();
    let frames = gl.frames.clone();

    // Wait for the game to start, or for the game logic to die first.
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(CoordEvent::Start) => break,
                Ok(CoordEvent::Terminate(reason)) => {
                    gl.terminate(&reason);
                    return;
                }
                Ok(CoordEvent::PlayerAction(_)) => {}
                Err(_) => return,
            },
            recv(frames) -> msg => {
                match msg {
                    Ok(Ok(_)) => gl.terminate(
                        "Received a game logic message but the game has not started",
                    ),
                    Ok(Err(e)) => gl.terminate(&format!("Game logic error. {e}")),
                    Err(_) => lock(&gl.gs).game_logic = None,
                }
                return;
            },
        }
    }

    run_game(gl);
}

fn run_game(mut gl: GameLogicSession) {
    let events = gl.events.clone();
    let frames = gl.frames.clone();

    let (conf, initial_nb_players, nb_special_players, players_info) = {
        let mut gs = lock(&gl.gs);
        let gs = &mut *gs;
        let players_info = assign_player_ids(gs);
        (
            gs.conf.clone(),
            (gs.players.len() + gs.special_players.len()) as i64,
            gs.special_players.len() as i64,
            players_info,
        )
    };
    let nb_turns_max = i64::from(conf.nb_turns_max);

    if let Err(e) = gl.session.send(&ServerMessage::DoInit {
        nb_players: initial_nb_players,
        nb_special_players,
        nb_turns_max,
        players_info: players_info.clone(),
    }) {
        gl.abort(&format!("Cannot send DO_INIT. {e}"));
        return;
    }

    let initial_game_state = loop {
        select! {
            recv(frames) -> msg => {
                let obj = match msg {
                    Ok(Ok(obj)) => obj,
                    Ok(Err(e)) => {
                        gl.abort(&format!("Cannot read DO_INIT_ACK. {e}"));
                        return;
                    }
                    Err(_) => {
                        gl.abort("Cannot read DO_INIT_ACK. Remote endpoint closed");
                        return;
                    }
                };
                match message::read_do_init_ack(&obj) {
                    Ok(ack) => break ack.initial_game_state,
                    Err(e) => {
                        gl.abort(&format!("Invalid DO_INIT_ACK message. {e}"));
                        return;
                    }
                }
            },
            recv(events) -> event => match event {
                Ok(CoordEvent::Terminate(reason)) => {
                    gl.terminate(&reason);
                    return;
                }
                Ok(_) => {}
                Err(_) => return,
            },
        }
    };

    // First-turn broadcast: every player, special player and visu gets
    // GAME_STARTS (visus carry player_id -1).
    let targets = lock(&gl.gs).fanout_targets();
    for target in &targets {
        let msg = ServerMessage::GameStarts {
            player_id: target.player_id,
            nb_players: initial_nb_players,
            nb_special_players,
            nb_turns_max,
            milliseconds_before_first_turn: conf.ms_before_first_turn,
            milliseconds_between_turns: conf.ms_between_turns,
            initial_game_state: initial_game_state.clone(),
            players_info: players_info.clone(),
        };
        let _ = target
            .fanout
            .try_send(FanoutEvent::GameStarts(Box::new(msg)));
    }
    info!(nb_players = initial_nb_players, "Game starts");

    let delay = |ms: f64| {
        if conf.fast {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(ms / 1000.0)
        }
    };

    let mut turn_number: i64 = 0;
    let mut batch: Vec<PlayerAction> = Vec::new();
    let mut next_do_turn_at = Some(Instant::now() + delay(conf.ms_before_first_turn));

    loop {
        let timer = match next_do_turn_at {
            Some(deadline) => at(deadline),
            None => never(),
        };
        select! {
            recv(events) -> event => match event {
                Ok(CoordEvent::PlayerAction(action)) => upsert_action(&mut batch, action),
                Ok(CoordEvent::Start) => {}
                Ok(CoordEvent::Terminate(reason)) => {
                    gl.terminate(&reason);
                    return;
                }
                Err(_) => return,
            },
            recv(timer) -> _ => {
                // The batch dispatched is the snapshot at schedule time
                // plus everything that arrived during the delay.
                next_do_turn_at = None;
                let player_actions = std::mem::take(&mut batch);
                if let Err(e) = gl.session.send(&ServerMessage::DoTurn { player_actions }) {
                    gl.abort(&format!("Cannot send DO_TURN. {e}"));
                    return;
                }
            },
            recv(frames) -> msg => {
                let obj = match msg {
                    Ok(Ok(obj)) => obj,
                    Ok(Err(e)) => {
                        gl.abort(&format!("Cannot read DO_TURN_ACK. {e}"));
                        return;
                    }
                    Err(_) => {
                        gl.abort("Cannot read DO_TURN_ACK. Remote endpoint closed");
                        return;
                    }
                };
                let ack = match message::read_do_turn_ack(&obj, initial_nb_players) {
                    Ok(ack) => ack,
                    Err(e) => {
                        gl.abort(&format!("Invalid DO_TURN_ACK message. {e}"));
                        return;
                    }
                };

                fan_out_turn(&mut gl, turn_number, &ack.game_state);

                turn_number += 1;
                if turn_number < nb_turns_max {
                    next_do_turn_at = Some(Instant::now() + delay(conf.ms_between_turns));
                } else {
                    finish_game(&mut gl, ack.winner_player_id, ack.game_state);
                    return;
                }
            },
        }
    }
}

/// Fan one TURN out to every client. A client whose bounded queue is full
/// is terminally behind: it is removed from its bucket and its termination
/// signal fires.
fn fan_out_turn(gl: &mut GameLogicSession, turn_number: i64, game_state: &JsonObject) {
    let (targets, players_info) = {
        let gs = lock(&gl.gs);
        (gs.fanout_targets(), gs.players_info.clone())
    };

    let mut overflowed: Vec<PlayerHandle> = Vec::new();
    for target in targets {
        let msg = ServerMessage::Turn {
            turn_number,
            game_state: game_state.clone(),
            players_info: players_info.clone(),
        };
        match target.fanout.try_send(FanoutEvent::Turn(Box::new(msg))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => overflowed.push(target),
            // A disconnected receiver means the session already ended.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    if !overflowed.is_empty() {
        {
            let mut gs = lock(&gl.gs);
            for target in &overflowed {
                gs.remove_session(target.token);
            }
        }
        for target in overflowed {
            warn!(nickname = %target.nickname, "Client too slow, kicking");
            let _ = target
                .termination
                .try_send("Client too slow: turn fan-out queue overflowed".into());
        }
    }
}

fn finish_game(gl: &mut GameLogicSession, winner_player_id: i64, game_state: JsonObject) {
    let targets = {
        let mut gs = lock(&gl.gs);
        gs.phase = GamePhase::Finished;
        gs.game_logic = None;
        gs.fanout_targets()
    };
    for target in targets {
        let msg = ServerMessage::GameEnds {
            winner_player_id,
            game_state: game_state.clone(),
        };
        let _ = target.fanout.try_send(FanoutEvent::GameEnds(Box::new(msg)));
    }
    info!(winner_player_id, "Game is finished");
    gl.session.finish();
    let _ = gl.exit.send(ProcessEvent::GameFinished);
}
