// netorcai_protocol — wire format and message codec for the netorcai
// metaprotocol.
//
// netorcai is a turn-based game coordinator: one authoritative game-logic
// process, up to 1024 players and special players, and observer
// visualizations all talk to the coordinator over TCP. This crate owns the
// wire contract those endpoints share:
//
// - `framing.rs`:  Length-prefixed frames — a 16-bit little-endian content
//                  size followed by a UTF-8 JSON payload.
// - `message.rs`:  The protocol vocabulary. Outbound messages are serde
//                  enums tagged by `message_type`; inbound messages are
//                  parsed through hand-written field readers so every
//                  rejection names the offending field (kick reasons are
//                  part of the wire contract and tests match them verbatim).
// - `types.rs`:    Roles, per-participant public info, and the advertised
//                  metaprotocol version.
//
// No dependency on the server crate — client libraries and tests use this
// crate alone to speak the protocol.

pub mod framing;
pub mod message;
pub mod types;

pub use message::{ClientMessage, JsonObject, PlayerAction, ServerMessage};
pub use types::{PlayerInfo, Role, METAPROTOCOL_VERSION};
