// TCP server: listener, login admission, and process lifecycle.
//
// Architecture: a non-blocking accept loop on a background thread (gated on
// a `keep_running` flag) spawns one thread per connection. That thread
// performs the LOGIN handshake and role admission itself — an unresponsive
// peer blocks only its own thread — then becomes the session's role loop
// (`session::PlayerVisuSession::run` or `coordinator::run_game_logic`).
//
// `ServerHandle` is what the binary (and the tests) hold: it exposes the
// control surface, and `wait()` blocks until the process should exit —
// `quit`, game completion, or a game-logic failure — then drains every
// session by firing its termination signal with "netorcai abort" and
// waiting on the session wait-group with a bounded grace period.

use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info};

use netorcai_protocol::framing::read_frame;
use netorcai_protocol::message::{self, ServerMessage};
use netorcai_protocol::types::{Role, METAPROTOCOL_VERSION};

use crate::control;
use crate::coordinator::{run_game_logic, GameLogicSession};
use crate::session::{spawn_reader, ClientState, PlayerVisuSession, Session};
use crate::state::{
    lock, Config, CoordEvent, GameLogicHandle, GlobalState, PlayerHandle, SharedState,
    FANOUT_QUEUE_CAPACITY,
};

/// Why the process should exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The `quit` command was issued.
    Quit,
    /// The game ran to completion.
    GameFinished,
    /// The game logic died or misbehaved; the exit code is non-zero.
    GameAborted,
}

/// Counts live session threads for orderly teardown.
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<WaitGroupInner>,
}

#[derive(Default)]
struct WaitGroupInner {
    count: Mutex<usize>,
    zero: Condvar,
}

impl WaitGroup {
    pub fn new() -> WaitGroup {
        WaitGroup::default()
    }

    /// Register one worker; the returned guard deregisters on drop.
    pub fn register(&self) -> WaitGroupGuard {
        let mut count = self
            .inner
            .count
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *count += 1;
        WaitGroupGuard {
            inner: self.inner.clone(),
        }
    }

    /// Wait until every worker is done, at most `timeout`. Returns false
    /// if workers were still live when the timeout expired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self
            .inner
            .count
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .zero
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            count = guard;
        }
        true
    }
}

pub struct WaitGroupGuard {
    inner: Arc<WaitGroupInner>,
}

impl Drop for WaitGroupGuard {
    fn drop(&mut self) {
        let mut count = self
            .inner
            .count
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *count -= 1;
        if *count == 0 {
            self.inner.zero.notify_all();
        }
    }
}

/// Configuration for starting a server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub conf: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4242,
            conf: Config::default(),
        }
    }
}

/// Handle for issuing control-surface commands (`start`, `set`, ...).
#[derive(Clone)]
pub struct Controller {
    gs: SharedState,
    exit: Sender<ProcessEvent>,
}

impl Controller {
    /// Execute one command line, returning its user-visible output.
    pub fn command(&self, line: &str) -> Vec<String> {
        control::execute_command(line, &self.gs, &self.exit)
    }
}

/// Handle returned by `start_server`.
pub struct ServerHandle {
    gs: SharedState,
    addr: SocketAddr,
    exit_tx: Sender<ProcessEvent>,
    exit_rx: Receiver<ProcessEvent>,
    keep_running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    wait_group: WaitGroup,
}

impl ServerHandle {
    /// The actually bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn controller(&self) -> Controller {
        Controller {
            gs: self.gs.clone(),
            exit: self.exit_tx.clone(),
        }
    }

    /// Block until the game completes, the game logic dies, or `quit` is
    /// issued; drain every session and return the process exit code.
    pub fn wait(mut self) -> i32 {
        let code = match self.exit_rx.recv() {
            Ok(ProcessEvent::Quit) | Ok(ProcessEvent::GameFinished) => 0,
            Ok(ProcessEvent::GameAborted) | Err(_) => 1,
        };
        self.shutdown();
        code
    }

    fn shutdown(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);

        // Drain the sessions that are still registered.
        let (targets, game_logic) = {
            let gs = lock(&self.gs);
            (gs.fanout_targets(), gs.game_logic.clone())
        };
        for target in targets {
            let _ = target.termination.try_send("netorcai abort".into());
        }
        if let Some(gl) = game_logic {
            let _ = gl.events.send(CoordEvent::Terminate("netorcai abort".into()));
        }

        if let Some(accept) = self.accept_thread.take() {
            let _ = accept.join();
        }
        self.wait_group.wait_timeout(Duration::from_secs(1));
    }
}

/// Bind the listener and start accepting connections on a background
/// thread. Returns the handle the binary waits on.
pub fn start_server(config: ServerConfig) -> io::Result<ServerHandle> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    // Non-blocking so the accept loop can observe keep_running.
    listener.set_nonblocking(true)?;

    let gs = GlobalState::new(config.conf);
    let (exit_tx, exit_rx) = unbounded();
    let keep_running = Arc::new(AtomicBool::new(true));
    let wait_group = WaitGroup::new();

    let accept_gs = gs.clone();
    let accept_exit = exit_tx.clone();
    let accept_flag = keep_running.clone();
    let accept_wg = wait_group.clone();
    let accept_thread = thread::spawn(move || {
        accept_loop(listener, accept_gs, accept_exit, accept_flag, accept_wg);
    });

    info!(address = %addr, "Listening to incoming connections");

    Ok(ServerHandle {
        gs,
        addr,
        exit_tx,
        exit_rx,
        keep_running,
        accept_thread: Some(accept_thread),
        wait_group,
    })
}

fn accept_loop(
    listener: TcpListener,
    gs: SharedState,
    exit: Sender<ProcessEvent>,
    keep_running: Arc<AtomicBool>,
    wait_group: WaitGroup,
) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, remote_address)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let gs = gs.clone();
                let exit = exit.clone();
                let guard = wait_group.register();
                thread::spawn(move || {
                    let _guard = guard;
                    handle_connection(stream, remote_address, gs, exit);
                });
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => break,
        }
    }
}

/// Login handshake and role admission, then the role loop — all on this
/// connection's own thread.
fn handle_connection(
    stream: TcpStream,
    remote_address: SocketAddr,
    gs: SharedState,
    exit: Sender<ProcessEvent>,
) {
    debug!(remote_address = %remote_address, "New connection");

    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    };
    let mut reader = BufReader::new(reader_stream);
    let mut session = Session::new(stream, remote_address);

    // The first frame must be a valid LOGIN.
    let login = read_frame(&mut reader)
        .map_err(|e| e.to_string())
        .and_then(|payload| message::decode_object(&payload))
        .and_then(|obj| message::read_login(&obj));
    let login = match login {
        Ok(login) => login,
        Err(e) => {
            session.kick(&format!("Invalid first message: {e}"));
            return;
        }
    };
    session.nickname = login.nickname;

    match login.role {
        Role::Player => run_player_session(session, reader, gs, false, false),
        Role::SpecialPlayer => run_player_session(session, reader, gs, true, false),
        Role::Visualization => run_player_session(session, reader, gs, false, true),
        Role::GameLogic => run_game_logic_session(session, reader, gs, exit),
    }
}

fn send_login_ack(session: &mut Session) -> Result<(), String> {
    session.send(&ServerMessage::LoginAck {
        metaprotocol_version: METAPROTOCOL_VERSION.into(),
    })
}

fn run_player_session(
    mut session: Session,
    reader: BufReader<TcpStream>,
    gs: SharedState,
    is_special_player: bool,
    is_visu: bool,
) {
    let (fanout_tx, fanout_rx) = bounded(FANOUT_QUEUE_CAPACITY);
    let (termination_tx, termination_rx) = bounded(1);

    let (token, denial) = {
        let mut state = lock(&gs);
        let token = state.next_token();
        let handle = PlayerHandle {
            token,
            nickname: session.nickname.clone(),
            remote_address: session.remote_address,
            is_player: !is_visu,
            is_special_player,
            player_id: -1,
            fanout: fanout_tx,
            termination: termination_tx,
        };
        let result = if is_visu {
            state.admit_visu(handle)
        } else {
            state.admit_player(handle)
        };
        (token, result.err())
    };
    if let Some(reason) = denial {
        session.kick(&reason);
        return;
    }

    // Admission holds; acknowledge. The registration is rolled back if the
    // ack cannot be delivered.
    if send_login_ack(&mut session).is_err() {
        lock(&gs).remove_session(token);
        session.kick("LOGIN denied: Could not send LOGIN_ACK");
        return;
    }
    session.state = ClientState::Logged;

    {
        let mut state = lock(&gs);
        if is_visu {
            info!(
                nickname = %session.nickname,
                remote_address = %session.remote_address,
                visu_count = state.visus.len(),
                "New visualization accepted"
            );
        } else if is_special_player {
            info!(
                nickname = %session.nickname,
                remote_address = %session.remote_address,
                special_player_count = state.special_players.len(),
                "New special player accepted"
            );
        } else {
            info!(
                nickname = %session.nickname,
                remote_address = %session.remote_address,
                player_count = state.players.len(),
                "New player accepted"
            );
        }
        state.try_autostart();
    }

    let frames = spawn_reader(reader);
    PlayerVisuSession {
        session,
        token,
        is_player: !is_visu,
        player_id: -1,
        last_turn_sent: -1,
        frames,
        fanout: fanout_rx,
        termination: termination_rx,
        gs,
    }
    .run();
}

fn run_game_logic_session(
    mut session: Session,
    reader: BufReader<TcpStream>,
    gs: SharedState,
    exit: Sender<ProcessEvent>,
) {
    let (events_tx, events_rx) = unbounded();

    let denial = {
        let mut state = lock(&gs);
        state
            .admit_game_logic(GameLogicHandle {
                nickname: session.nickname.clone(),
                remote_address: session.remote_address,
                events: events_tx,
            })
            .err()
    };
    if let Some(reason) = denial {
        session.kick(&reason);
        return;
    }

    if send_login_ack(&mut session).is_err() {
        lock(&gs).game_logic = None;
        session.kick("LOGIN denied: Could not send LOGIN_ACK");
        return;
    }
    session.state = ClientState::Logged;

    {
        let mut state = lock(&gs);
        info!(
            nickname = %session.nickname,
            remote_address = %session.remote_address,
            "Game logic accepted"
        );
        state.try_autostart();
    }

    let frames = spawn_reader(reader);
    run_game_logic(GameLogicSession {
        session,
        frames,
        events: events_rx,
        exit,
        gs,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_group_reaches_zero() {
        let wg = WaitGroup::new();
        let guard = wg.register();
        let wg_clone = wg.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(guard);
            drop(wg_clone);
        });
        assert!(wg.wait_timeout(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn wait_group_times_out_with_live_workers() {
        let wg = WaitGroup::new();
        let _guard = wg.register();
        assert!(!wg.wait_timeout(Duration::from_millis(50)));
    }

    #[test]
    fn wait_group_with_no_workers_returns_immediately() {
        let wg = WaitGroup::new();
        assert!(wg.wait_timeout(Duration::from_millis(1)));
    }
}
