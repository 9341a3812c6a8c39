// Per-connection client sessions.
//
// Each accepted TCP connection is serviced by two threads: a dedicated
// reader (spawned here) that decodes frames into a channel, and the session
// thread running the role loop — `PlayerVisuSession::run` for players,
// special players and visualizations, `coordinator::run_game_logic` for the
// game logic. The session thread is the only writer to the socket.
//
// The player/visu loop is a state machine over LOGGED → READY → THINKING.
// While THINKING (one TURN outstanding, no TURN_ACK accepted yet) the loop
// deliberately does not consume the fan-out queue: turns pile up there and
// the newest one wins once the ack arrives, so lagging clients skip
// intermediate turns instead of backlogging them. The queue's bound is the
// safety valve — the coordinator kicks a client whose queue fills.

use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, RecvError};
use tracing::{debug, warn};

use netorcai_protocol::framing::{read_frame, write_frame};
use netorcai_protocol::message::{self, JsonObject, PlayerAction, ServerMessage};

use crate::state::{lock, CoordEvent, FanoutEvent, SharedState};

/// Client session states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    Unlogged,
    Logged,
    Ready,
    Thinking,
    Kicked,
}

/// One decoded inbound frame, or the reason reading it failed.
pub type FrameResult = Result<JsonObject, String>;

/// How long the kick path lingers after the write-side shutdown, giving a
/// cooperative peer a chance to read the final KICK frame.
const KICK_LINGER: Duration = Duration::from_millis(100);

/// Socket side of one client session. Owned exclusively by the session
/// thread; the coordinator only ever touches the session's channels.
pub struct Session {
    writer: BufWriter<TcpStream>,
    pub nickname: String,
    pub remote_address: SocketAddr,
    pub state: ClientState,
}

impl Session {
    pub fn new(stream: TcpStream, remote_address: SocketAddr) -> Session {
        Session {
            writer: BufWriter::new(stream),
            nickname: String::new(),
            remote_address,
            state: ClientState::Unlogged,
        }
    }

    /// Serialize one message and send it as a frame.
    pub fn send(&mut self, msg: &ServerMessage) -> Result<(), String> {
        let json = serde_json::to_vec(msg).map_err(|e| e.to_string())?;
        write_frame(&mut self.writer, &json).map_err(|e| e.to_string())
    }

    /// Kick the client: best-effort KICK frame, write-side shutdown, brief
    /// linger, then full shutdown (which also unblocks the reader thread).
    /// Idempotent.
    pub fn kick(&mut self, reason: &str) {
        if self.state == ClientState::Kicked {
            return;
        }
        self.state = ClientState::Kicked;
        warn!(
            nickname = %self.nickname,
            remote_address = %self.remote_address,
            reason,
            "Kicking client"
        );
        let _ = self.send(&ServerMessage::Kick {
            kick_reason: reason.into(),
        });
        let stream = self.writer.get_ref();
        let _ = stream.shutdown(Shutdown::Write);
        thread::sleep(KICK_LINGER);
        let _ = stream.shutdown(Shutdown::Both);
    }

    /// Graceful close after a completed game.
    pub(crate) fn finish(&mut self) {
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
    }
}

/// Spawn the dedicated reader for a connection. Frames are read and decoded
/// to JSON objects on the reader thread; the session loop only sees the
/// result. The thread exits after the first failure or once the session
/// drops the receiver.
pub fn spawn_reader(mut reader: BufReader<TcpStream>) -> Receiver<FrameResult> {
    let (tx, rx) = unbounded();
    thread::spawn(move || loop {
        let result = match read_frame(&mut reader) {
            Ok(payload) => message::decode_object(&payload),
            Err(e) => Err(e.to_string()),
        };
        let failed = result.is_err();
        if tx.send(result).is_err() || failed {
            break;
        }
    });
    rx
}

/// A logged-in player, special player, or visualization session.
pub struct PlayerVisuSession {
    pub session: Session,
    pub token: u64,
    pub is_player: bool,
    pub player_id: i64,
    pub last_turn_sent: i64,
    pub frames: Receiver<FrameResult>,
    pub fanout: Receiver<FanoutEvent>,
    pub termination: Receiver<String>,
    pub gs: SharedState,
}

impl PlayerVisuSession {
    /// Role loop. Returns once the session is finished or kicked.
    pub fn run(mut self) {
        let frames = self.frames.clone();
        let fanout = self.fanout.clone();
        let termination = self.termination.clone();
        loop {
            let proceed = if self.session.state == ClientState::Thinking {
                // One TURN is outstanding: wait for the ack (or a
                // termination signal) only, letting fan-out accumulate.
                select! {
                    recv(frames) -> msg => self.on_frame(msg),
                    recv(termination) -> reason => self.on_termination(reason),
                }
            } else {
                select! {
                    recv(fanout) -> event => self.on_fanout(event),
                    recv(frames) -> msg => self.on_frame(msg),
                    recv(termination) -> reason => self.on_termination(reason),
                }
            };
            if !proceed {
                return;
            }
        }
    }

    fn on_termination(&mut self, reason: Result<String, RecvError>) -> bool {
        let reason = reason.unwrap_or_else(|_| "netorcai abort".into());
        self.kick_registered(&reason);
        false
    }

    fn on_fanout(&mut self, event: Result<FanoutEvent, RecvError>) -> bool {
        let Ok(event) = event else {
            // The coordinator dropped the handle without signaling.
            self.kick_registered("netorcai abort");
            return false;
        };
        match event {
            FanoutEvent::GameStarts(msg) => {
                if self.session.state != ClientState::Logged {
                    return true;
                }
                if let ServerMessage::GameStarts { player_id, .. } = msg.as_ref() {
                    self.player_id = *player_id;
                }
                if let Err(e) = self.session.send(&msg) {
                    self.kick_registered(&format!("Cannot send GAME_STARTS. {e}"));
                    return false;
                }
                self.session.state = ClientState::Ready;
                true
            }
            FanoutEvent::Turn(msg) => {
                if self.session.state != ClientState::Ready {
                    // A visu admitted mid-game never saw GAME_STARTS;
                    // turns are dropped until it would.
                    return true;
                }
                self.send_turn(&msg)
            }
            FanoutEvent::GameEnds(msg) => {
                let _ = self.session.send(&msg);
                self.finish_session();
                false
            }
        }
    }

    fn on_frame(&mut self, msg: Result<FrameResult, RecvError>) -> bool {
        let Ok(result) = msg else {
            self.kick_registered("netorcai abort");
            return false;
        };
        let obj = match result {
            Ok(obj) => obj,
            Err(e) => {
                if e == "Remote endpoint closed" {
                    debug!(nickname = %self.session.nickname, "Remote endpoint closed");
                }
                self.kick_registered(&format!("Cannot read TURN_ACK. {e}"));
                return false;
            }
        };

        let ack = match message::read_turn_ack(&obj, self.last_turn_sent) {
            Ok(ack) => ack,
            Err(e) => {
                self.kick_registered(&format!("Invalid TURN_ACK received. {e}"));
                return false;
            }
        };

        if self.session.state != ClientState::Thinking {
            self.kick_registered("Received a TURN_ACK but the client state is not THINKING");
            return false;
        }

        if self.is_player {
            let gs = lock(&self.gs);
            if let Some(gl) = &gs.game_logic {
                let _ = gl.events.send(CoordEvent::PlayerAction(PlayerAction {
                    player_id: self.player_id,
                    turn_number: ack.turn_number,
                    actions: ack.actions,
                }));
            }
        }

        // Flush the newest buffered turn; superseded ones are skipped and
        // a buffered GAME_ENDS supersedes any stale turn.
        let mut latest_turn = None;
        let mut game_ends = None;
        while let Ok(event) = self.fanout.try_recv() {
            match event {
                FanoutEvent::Turn(msg) => latest_turn = Some(msg),
                FanoutEvent::GameEnds(msg) => game_ends = Some(msg),
                FanoutEvent::GameStarts(_) => {}
            }
        }
        if let Some(msg) = game_ends {
            let _ = self.session.send(&msg);
            self.finish_session();
            return false;
        }
        if let Some(msg) = latest_turn {
            return self.send_turn(&msg);
        }
        self.session.state = ClientState::Ready;
        true
    }

    fn send_turn(&mut self, msg: &ServerMessage) -> bool {
        let ServerMessage::Turn { turn_number, .. } = msg else {
            return true;
        };
        if let Err(e) = self.session.send(msg) {
            self.kick_registered(&format!("Cannot send TURN. {e}"));
            return false;
        }
        self.last_turn_sent = *turn_number;
        self.session.state = ClientState::Thinking;
        true
    }

    fn kick_registered(&mut self, reason: &str) {
        lock(&self.gs).remove_session(self.token);
        self.session.kick(reason);
    }

    fn finish_session(&mut self) {
        lock(&self.gs).remove_session(self.token);
        self.session.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Config, GlobalState, FANOUT_QUEUE_CAPACITY};
    use crossbeam_channel::{bounded, Sender};
    use netorcai_protocol::message::ClientMessage;
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn spawn_session(
        server: TcpStream,
        is_player: bool,
    ) -> (Sender<FanoutEvent>, Sender<String>, JoinHandle<()>) {
        let remote = server.peer_addr().unwrap();
        let reader = BufReader::new(server.try_clone().unwrap());
        let frames = spawn_reader(reader);
        let (fanout_tx, fanout_rx) = bounded(FANOUT_QUEUE_CAPACITY);
        let (termination_tx, termination_rx) = bounded(1);
        let mut session = Session::new(server, remote);
        session.nickname = "test".into();
        session.state = ClientState::Logged;
        let pv = PlayerVisuSession {
            session,
            token: 1,
            is_player,
            player_id: -1,
            last_turn_sent: -1,
            frames,
            fanout: fanout_rx,
            termination: termination_rx,
            gs: GlobalState::new(Config::default()),
        };
        let handle = thread::spawn(move || pv.run());
        (fanout_tx, termination_tx, handle)
    }

    fn recv_msg(reader: &mut BufReader<TcpStream>) -> ServerMessage {
        let payload = read_frame(reader).unwrap();
        serde_json::from_slice(&payload).unwrap()
    }

    fn send_msg(stream: &mut TcpStream, msg: &ClientMessage) {
        let json = serde_json::to_vec(msg).unwrap();
        write_frame(stream, &json).unwrap();
    }

    fn game_starts(player_id: i64) -> FanoutEvent {
        FanoutEvent::GameStarts(Box::new(ServerMessage::GameStarts {
            player_id,
            nb_players: 1,
            nb_special_players: 0,
            nb_turns_max: 10,
            milliseconds_before_first_turn: 50.0,
            milliseconds_between_turns: 50.0,
            initial_game_state: serde_json::json!({"all_clients": {}})
                .as_object()
                .unwrap()
                .clone(),
            players_info: vec![],
        }))
    }

    fn turn(turn_number: i64) -> FanoutEvent {
        FanoutEvent::Turn(Box::new(ServerMessage::Turn {
            turn_number,
            game_state: serde_json::json!({"all_clients": {}})
                .as_object()
                .unwrap()
                .clone(),
            players_info: vec![],
        }))
    }

    #[test]
    fn turns_are_coalesced_to_the_newest() {
        let (client, server) = tcp_pair();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut client_writer = client.try_clone().unwrap();
        let mut client_reader = BufReader::new(client);

        let (fanout, _termination, _handle) = spawn_session(server, false);

        fanout.send(game_starts(-1)).unwrap();
        assert!(matches!(
            recv_msg(&mut client_reader),
            ServerMessage::GameStarts { player_id: -1, .. }
        ));

        // First turn is delivered immediately (client was READY).
        fanout.send(turn(0)).unwrap();
        assert!(matches!(
            recv_msg(&mut client_reader),
            ServerMessage::Turn { turn_number: 0, .. }
        ));

        // Two more turns arrive while the client is still THINKING.
        fanout.send(turn(1)).unwrap();
        fanout.send(turn(2)).unwrap();

        // The ack flushes only the newest buffered turn.
        send_msg(
            &mut client_writer,
            &ClientMessage::TurnAck {
                turn_number: 0,
                actions: vec![],
            },
        );
        assert!(matches!(
            recv_msg(&mut client_reader),
            ServerMessage::Turn { turn_number: 2, .. }
        ));
    }

    #[test]
    fn wrong_turn_number_is_kicked() {
        let (client, server) = tcp_pair();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut client_writer = client.try_clone().unwrap();
        let mut client_reader = BufReader::new(client);

        let (fanout, _termination, handle) = spawn_session(server, false);

        fanout.send(game_starts(-1)).unwrap();
        fanout.send(turn(0)).unwrap();
        let _ = recv_msg(&mut client_reader); // GAME_STARTS
        let _ = recv_msg(&mut client_reader); // TURN 0

        send_msg(
            &mut client_writer,
            &ClientMessage::TurnAck {
                turn_number: 5,
                actions: vec![],
            },
        );

        match recv_msg(&mut client_reader) {
            ServerMessage::Kick { kick_reason } => assert_eq!(
                kick_reason,
                "Invalid TURN_ACK received. Invalid value (turn_number=5): expecting 0"
            ),
            other => panic!("expected KICK, got {other:?}"),
        }
        handle.join().unwrap();
    }

    #[test]
    fn ack_outside_thinking_is_kicked() {
        let (client, server) = tcp_pair();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut client_writer = client.try_clone().unwrap();
        let mut client_reader = BufReader::new(client);

        let (_fanout, _termination, handle) = spawn_session(server, false);

        // The session is LOGGED: no turn has been sent, so last_turn_sent
        // is -1 and an ack for -1 passes the codec but fails the state
        // check.
        send_msg(
            &mut client_writer,
            &ClientMessage::TurnAck {
                turn_number: -1,
                actions: vec![],
            },
        );

        match recv_msg(&mut client_reader) {
            ServerMessage::Kick { kick_reason } => assert_eq!(
                kick_reason,
                "Received a TURN_ACK but the client state is not THINKING"
            ),
            other => panic!("expected KICK, got {other:?}"),
        }
        handle.join().unwrap();
    }

    #[test]
    fn termination_signal_kicks_with_reason() {
        let (client, server) = tcp_pair();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut client_reader = BufReader::new(client);

        let (_fanout, termination, handle) = spawn_session(server, false);
        termination.send("netorcai abort".into()).unwrap();

        match recv_msg(&mut client_reader) {
            ServerMessage::Kick { kick_reason } => assert_eq!(kick_reason, "netorcai abort"),
            other => panic!("expected KICK, got {other:?}"),
        }
        handle.join().unwrap();
    }
}
