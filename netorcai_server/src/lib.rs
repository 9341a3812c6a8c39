// netorcai_server — the netorcai game coordinator.
//
// netorcai mediates a JSON-framed TCP metaprotocol between one
// authoritative game-logic process, a bounded population of player and
// special-player clients, and observer visualizations. It owns the game
// lifecycle: admission, start, per-turn synchronization, and termination.
//
// Module overview:
// - `state.rs`:       The process-wide `GlobalState` behind one mutex —
//                     phase, configuration, and the role buckets holding
//                     opaque session handles (channel capabilities).
// - `session.rs`:     Per-connection player/visu sessions — the
//                     LOGGED/READY/THINKING state machine, turn coalescing
//                     for lagging clients, and the kick path.
// - `coordinator.rs`: The game lifecycle, run on the game-logic session's
//                     thread — DO_INIT handshake, GAME_STARTS broadcast,
//                     the paced turn loop with per-turn action fan-in and
//                     bounded fan-out, GAME_ENDS, and the abort path.
// - `server.rs`:      TCP listener, login admission, per-connection
//                     threads, and the `ServerHandle` the binary waits on.
// - `control.rs`:     The start/set/print/call/quit command interpreter.
// - `client.rs`:      A small synchronous client used by integration tests
//                     and usable as a reference client implementation.
//
// Architecture: thread-per-connection plus a reader thread per connection.
// Each session multiplexes its reader's frames, the coordinator's fan-out
// queue, and a termination signal with `crossbeam_channel::select!`. The
// coordinator never blocks on a client: fan-out queues are bounded and a
// full queue gets the client kicked.

pub mod client;
pub mod control;
pub mod coordinator;
pub mod server;
pub mod session;
pub mod state;

pub use server::{start_server, ServerConfig, ServerHandle};
pub use state::Config;
