// Process-wide coordinator state.
//
// `GlobalState` is the single shared structure, guarded by one mutex
// (`SharedState`). Critical sections stay short and never block: admission,
// bucket removal, configuration access, the action fan-in forward, and the
// fan-out snapshot. The only channel operations performed while holding the
// lock are unbounded sends (action fan-in) and non-blocking `try_send`
// (fan-out, termination signals).
//
// Buckets hold opaque `PlayerHandle` capabilities over each session's
// channels, never the session's socket — sockets are owned exclusively by
// their session threads. Removal is swap-remove; order inside a bucket only
// matters until the game starts (player ids are assigned in bucket order
// from a shuffled range).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;

use netorcai_protocol::message::{PlayerAction, ServerMessage};
use netorcai_protocol::types::PlayerInfo;

/// Capacity of each client's fan-out queue. A client whose queue fills is
/// deemed terminally behind and gets kicked, which bounds memory growth
/// from stalled visualizations.
pub const FANOUT_QUEUE_CAPACITY: usize = 100;

/// Game lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GamePhase {
    NotRunning,
    Running,
    Finished,
}

/// Pre-game configuration. Mutable only while the phase is `NotRunning`;
/// each setter validates its range and reports violations with the exact
/// text the control surface prints.
#[derive(Clone, Debug)]
pub struct Config {
    pub nb_players_max: u32,
    pub nb_special_players_max: u32,
    pub nb_visus_max: u32,
    pub nb_turns_max: u32,
    pub ms_before_first_turn: f64,
    pub ms_between_turns: f64,
    pub autostart: bool,
    pub fast: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nb_players_max: 4,
            nb_special_players_max: 0,
            nb_visus_max: 1,
            nb_turns_max: 100,
            ms_before_first_turn: 1000.0,
            ms_between_turns: 1000.0,
            autostart: false,
            fast: false,
        }
    }
}

impl Config {
    pub fn set_nb_turns_max(&mut self, value: i64) -> Result<(), String> {
        if (1..=65535).contains(&value) {
            self.nb_turns_max = value as u32;
            Ok(())
        } else {
            Err(format!("Bad VALUE={value}: Not in [1,65535]"))
        }
    }

    pub fn set_nb_players_max(&mut self, value: i64) -> Result<(), String> {
        if (1..=1024).contains(&value) {
            self.nb_players_max = value as u32;
            Ok(())
        } else {
            Err(format!("Bad VALUE={value}: Not in [1,1024]"))
        }
    }

    pub fn set_nb_special_players_max(&mut self, value: i64) -> Result<(), String> {
        if (0..=1024).contains(&value) {
            self.nb_special_players_max = value as u32;
            Ok(())
        } else {
            Err(format!("Bad VALUE={value}: Not in [0,1024]"))
        }
    }

    pub fn set_nb_visus_max(&mut self, value: i64) -> Result<(), String> {
        if (0..=1024).contains(&value) {
            self.nb_visus_max = value as u32;
            Ok(())
        } else {
            Err(format!("Bad VALUE={value}: Not in [0,1024]"))
        }
    }

    pub fn set_ms_before_first_turn(&mut self, value: f64) -> Result<(), String> {
        if (50.0..=10000.0).contains(&value) {
            self.ms_before_first_turn = value;
            Ok(())
        } else {
            Err(format!("Bad VALUE={value}: Not in [50,10000]"))
        }
    }

    pub fn set_ms_between_turns(&mut self, value: f64) -> Result<(), String> {
        if (50.0..=10000.0).contains(&value) {
            self.ms_between_turns = value;
            Ok(())
        } else {
            Err(format!("Bad VALUE={value}: Not in [50,10000]"))
        }
    }
}

/// Coordinator-to-session fan-out messages. FIFO delivery through the
/// bounded queue preserves the ordering contract: GAME_STARTS precedes the
/// first TURN, GAME_ENDS follows the last one.
#[derive(Clone, Debug)]
pub enum FanoutEvent {
    GameStarts(Box<ServerMessage>),
    Turn(Box<ServerMessage>),
    GameEnds(Box<ServerMessage>),
}

/// Events multiplexed by the coordinator loop.
#[derive(Clone, Debug)]
pub enum CoordEvent {
    /// Authorization to begin the game (explicit `start` or autostart).
    Start,
    /// A player's accepted TURN_ACK, forwarded by its session.
    PlayerAction(PlayerAction),
    /// The process is shutting down; the reason becomes the kick reason.
    Terminate(String),
}

/// Bucket entry for a player, special player, or visualization: an opaque
/// capability over the session's channels.
#[derive(Clone)]
pub struct PlayerHandle {
    pub token: u64,
    pub nickname: String,
    pub remote_address: SocketAddr,
    pub is_player: bool,
    pub is_special_player: bool,
    /// -1 until the game starts.
    pub player_id: i64,
    /// Bounded at `FANOUT_QUEUE_CAPACITY`; the coordinator only `try_send`s.
    pub fanout: Sender<FanoutEvent>,
    /// Single-shot termination signal (capacity 1).
    pub termination: Sender<String>,
}

/// Bucket entry for the game-logic session. Its event channel is unbounded
/// so player sessions can forward actions while holding the global mutex
/// without ever blocking.
#[derive(Clone)]
pub struct GameLogicHandle {
    pub nickname: String,
    pub remote_address: SocketAddr,
    pub events: Sender<CoordEvent>,
}

pub struct GlobalState {
    pub phase: GamePhase,
    pub conf: Config,
    pub players: Vec<PlayerHandle>,
    pub special_players: Vec<PlayerHandle>,
    pub visus: Vec<PlayerHandle>,
    pub game_logic: Option<GameLogicHandle>,
    /// Snapshot built when the game starts. Mid-game disconnects flip
    /// `is_connected` instead of removing the entry.
    pub players_info: Vec<PlayerInfo>,
    next_token: u64,
}

pub type SharedState = Arc<Mutex<GlobalState>>;

/// Acquire the global mutex. A poisoned lock (a panicked session thread)
/// still yields the data — sessions are independent and the buckets stay
/// consistent, so the state remains usable.
pub fn lock(gs: &SharedState) -> std::sync::MutexGuard<'_, GlobalState> {
    gs.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl GlobalState {
    pub fn new(conf: Config) -> SharedState {
        Arc::new(Mutex::new(GlobalState {
            phase: GamePhase::NotRunning,
            conf,
            players: Vec::new(),
            special_players: Vec::new(),
            visus: Vec::new(),
            game_logic: None,
            players_info: Vec::new(),
            next_token: 0,
        }))
    }

    /// Unique token identifying one session for bucket removal.
    pub fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Admit a player into its bucket. Must be called with the lock held;
    /// the caller sends LOGIN_ACK after releasing it.
    pub fn admit_player(&mut self, handle: PlayerHandle) -> Result<(), String> {
        if self.phase != GamePhase::NotRunning {
            return Err("LOGIN denied: Game has been started".into());
        }
        if handle.is_special_player {
            if self.special_players.len() >= self.conf.nb_special_players_max as usize {
                return Err("LOGIN denied: Maximum number of special players reached".into());
            }
            self.special_players.push(handle);
        } else {
            if self.players.len() >= self.conf.nb_players_max as usize {
                return Err("LOGIN denied: Maximum number of players reached".into());
            }
            self.players.push(handle);
        }
        Ok(())
    }

    /// Admit a visualization. Visus are accepted in any phase.
    pub fn admit_visu(&mut self, handle: PlayerHandle) -> Result<(), String> {
        if self.visus.len() >= self.conf.nb_visus_max as usize {
            return Err("LOGIN denied: Maximum number of visus reached".into());
        }
        self.visus.push(handle);
        Ok(())
    }

    /// Register the game logic. At most one per game.
    pub fn admit_game_logic(&mut self, handle: GameLogicHandle) -> Result<(), String> {
        if self.phase != GamePhase::NotRunning {
            return Err("LOGIN denied: Game has been started".into());
        }
        if self.game_logic.is_some() {
            return Err("LOGIN denied: A game logic is already logged in".into());
        }
        self.game_logic = Some(handle);
        Ok(())
    }

    /// Remove a player/special-player/visu session from its bucket
    /// (swap-remove). While a game runs, the session's `players_info` entry
    /// is marked disconnected rather than deleted.
    pub fn remove_session(&mut self, token: u64) {
        let mut removed_player_id = None;
        for bucket in [
            &mut self.players,
            &mut self.special_players,
            &mut self.visus,
        ] {
            if let Some(index) = bucket.iter().position(|h| h.token == token) {
                let handle = bucket.swap_remove(index);
                removed_player_id = Some(handle.player_id);
                break;
            }
        }

        if self.phase == GamePhase::Running {
            if let Some(player_id) = removed_player_id.filter(|id| *id >= 0) {
                if let Some(info) = self
                    .players_info
                    .iter_mut()
                    .find(|info| info.player_id == player_id)
                {
                    info.is_connected = false;
                }
            }
        }
    }

    /// True when every configured capacity is filled and a game logic is
    /// registered — the autostart condition.
    pub fn all_capacities_filled(&self) -> bool {
        self.players.len() == self.conf.nb_players_max as usize
            && self.special_players.len() == self.conf.nb_special_players_max as usize
            && self.visus.len() == self.conf.nb_visus_max as usize
            && self.game_logic.is_some()
    }

    /// Transition to `Running` and signal the game logic. Call only after
    /// checking the phase and the game-logic presence.
    pub fn begin_game(&mut self) {
        self.phase = GamePhase::Running;
        if let Some(gl) = &self.game_logic {
            let _ = gl.events.send(CoordEvent::Start);
        }
    }

    /// If autostart is enabled and every capacity just filled, start the
    /// game. Called after each accepted admission.
    pub fn try_autostart(&mut self) {
        if self.conf.autostart
            && self.phase == GamePhase::NotRunning
            && self.all_capacities_filled()
        {
            self.begin_game();
        }
    }

    /// Handles of every player, special player, and visu, in fan-out order.
    pub fn fanout_targets(&self) -> Vec<PlayerHandle> {
        self.players
            .iter()
            .chain(self.special_players.iter())
            .chain(self.visus.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};

    fn handle(gs: &mut GlobalState, nickname: &str, special: bool) -> PlayerHandle {
        // Receivers are dropped: these tests exercise bucket bookkeeping,
        // never channel delivery.
        let (fanout, _) = bounded(FANOUT_QUEUE_CAPACITY);
        let (termination, _) = bounded(1);
        PlayerHandle {
            token: gs.next_token(),
            nickname: nickname.into(),
            remote_address: "127.0.0.1:4242".parse().unwrap(),
            is_player: !special,
            is_special_player: special,
            player_id: -1,
            fanout,
            termination,
        }
    }

    fn gl_handle() -> (GameLogicHandle, crossbeam_channel::Receiver<CoordEvent>) {
        let (events, rx) = unbounded();
        (
            GameLogicHandle {
                nickname: "gl".into(),
                remote_address: "127.0.0.1:4242".parse().unwrap(),
                events,
            },
            rx,
        )
    }

    fn test_state() -> GlobalState {
        let conf = Config {
            nb_players_max: 2,
            nb_special_players_max: 0,
            nb_visus_max: 1,
            ..Config::default()
        };
        GlobalState {
            phase: GamePhase::NotRunning,
            conf,
            players: Vec::new(),
            special_players: Vec::new(),
            visus: Vec::new(),
            game_logic: None,
            players_info: Vec::new(),
            next_token: 0,
        }
    }

    #[test]
    fn config_ranges() {
        let mut conf = Config::default();
        assert!(conf.set_nb_turns_max(1).is_ok());
        assert!(conf.set_nb_turns_max(65535).is_ok());
        assert_eq!(
            conf.set_nb_turns_max(0).unwrap_err(),
            "Bad VALUE=0: Not in [1,65535]"
        );
        assert_eq!(
            conf.set_nb_players_max(1025).unwrap_err(),
            "Bad VALUE=1025: Not in [1,1024]"
        );
        assert!(conf.set_nb_special_players_max(0).is_ok());
        assert!(conf.set_nb_visus_max(0).is_ok());
        assert_eq!(
            conf.set_ms_between_turns(49.0).unwrap_err(),
            "Bad VALUE=49: Not in [50,10000]"
        );
        assert!(conf.set_ms_before_first_turn(50.0).is_ok());
        assert!(conf.set_ms_before_first_turn(10000.0).is_ok());
    }

    #[test]
    fn player_admission_respects_capacity() {
        let mut gs = test_state();
        let h1 = handle(&mut gs, "p1", false);
        let h2 = handle(&mut gs, "p2", false);
        let h3 = handle(&mut gs, "p3", false);
        assert!(gs.admit_player(h1).is_ok());
        assert!(gs.admit_player(h2).is_ok());
        assert_eq!(
            gs.admit_player(h3).unwrap_err(),
            "LOGIN denied: Maximum number of players reached"
        );
        assert_eq!(gs.players.len(), 2);
    }

    #[test]
    fn player_admission_denied_after_start() {
        let mut gs = test_state();
        gs.phase = GamePhase::Running;
        let h = handle(&mut gs, "late", false);
        assert_eq!(
            gs.admit_player(h).unwrap_err(),
            "LOGIN denied: Game has been started"
        );
    }

    #[test]
    fn visu_admission_ignores_phase() {
        let mut gs = test_state();
        gs.phase = GamePhase::Running;
        let h = handle(&mut gs, "visu", false);
        assert!(gs.admit_visu(h).is_ok());

        let h2 = handle(&mut gs, "visu2", false);
        assert_eq!(
            gs.admit_visu(h2).unwrap_err(),
            "LOGIN denied: Maximum number of visus reached"
        );
    }

    #[test]
    fn single_game_logic() {
        let mut gs = test_state();
        let (gl1, _rx1) = gl_handle();
        let (gl2, _rx2) = gl_handle();
        assert!(gs.admit_game_logic(gl1).is_ok());
        assert_eq!(
            gs.admit_game_logic(gl2).unwrap_err(),
            "LOGIN denied: A game logic is already logged in"
        );
    }

    #[test]
    fn remove_session_swap_removes() {
        let mut gs = test_state();
        let h1 = handle(&mut gs, "p1", false);
        let h2 = handle(&mut gs, "p2", false);
        let token1 = h1.token;
        gs.admit_player(h1).unwrap();
        gs.admit_player(h2).unwrap();

        gs.remove_session(token1);
        assert_eq!(gs.players.len(), 1);
        assert_eq!(gs.players[0].nickname, "p2");

        // Removing an unknown token is a no-op.
        gs.remove_session(9999);
        assert_eq!(gs.players.len(), 1);
    }

    #[test]
    fn remove_session_marks_disconnected_while_running() {
        let mut gs = test_state();
        let mut h = handle(&mut gs, "p1", false);
        h.player_id = 0;
        let token = h.token;
        gs.players_info.push(PlayerInfo {
            player_id: 0,
            nickname: "p1".into(),
            remote_address: "127.0.0.1:4242".into(),
            is_connected: true,
            is_special_player: false,
        });
        gs.admit_player(h).unwrap();
        gs.phase = GamePhase::Running;

        gs.remove_session(token);
        assert!(!gs.players_info[0].is_connected);
    }

    #[test]
    fn autostart_fires_when_last_capacity_fills() {
        let mut gs = test_state();
        gs.conf.autostart = true;
        gs.conf.nb_players_max = 1;
        gs.conf.nb_visus_max = 0;

        let (gl, rx) = gl_handle();
        gs.admit_game_logic(gl).unwrap();
        gs.try_autostart();
        assert_eq!(gs.phase, GamePhase::NotRunning);

        let h = handle(&mut gs, "p1", false);
        gs.admit_player(h).unwrap();
        gs.try_autostart();
        assert_eq!(gs.phase, GamePhase::Running);
        assert!(matches!(rx.try_recv().unwrap(), CoordEvent::Start));
    }

    #[test]
    fn fanout_targets_cover_all_buckets() {
        let mut gs = test_state();
        let p = handle(&mut gs, "p", false);
        let v = handle(&mut gs, "v", false);
        gs.admit_player(p).unwrap();
        gs.admit_visu(v).unwrap();
        let targets = gs.fanout_targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].nickname, "p");
        assert_eq!(targets[1].nickname, "v");
    }
}
