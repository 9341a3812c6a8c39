// Shared wire-level types for the netorcai metaprotocol.
//
// These are used by both `message.rs` (protocol messages) and the server's
// session management. `PlayerInfo` is the public identity the game logic
// receives in DO_INIT and that is echoed in every TURN.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Version string advertised in `LOGIN_ACK.metaprotocol_version`. Clients
/// may compare it against the version they were written for.
pub const METAPROTOCOL_VERSION: &str = "2.0.0";

/// Role a client requests in its LOGIN message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Player,
    SpecialPlayer,
    Visualization,
    GameLogic,
}

impl Role {
    /// Parse the wire representation of a role.
    pub fn parse(s: &str) -> Result<Role, String> {
        match s {
            "player" => Ok(Role::Player),
            "special player" => Ok(Role::SpecialPlayer),
            "visualization" => Ok(Role::Visualization),
            "game logic" => Ok(Role::GameLogic),
            other => Err(format!("Invalid role '{other}'")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Player => "player",
            Role::SpecialPlayer => "special player",
            Role::Visualization => "visualization",
            Role::GameLogic => "game logic",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public identity of one participant.
///
/// `player_id` is -1 until the game starts (and stays -1 for
/// visualizations). Once the game runs, a disconnecting participant keeps
/// its entry with `is_connected` flipped to false — the game logic always
/// sees the full initial roster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: i64,
    pub nickname: String,
    pub remote_address: String,
    pub is_connected: bool,
    pub is_special_player: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_accepts_all_wire_values() {
        assert_eq!(Role::parse("player").unwrap(), Role::Player);
        assert_eq!(Role::parse("special player").unwrap(), Role::SpecialPlayer);
        assert_eq!(Role::parse("visualization").unwrap(), Role::Visualization);
        assert_eq!(Role::parse("game logic").unwrap(), Role::GameLogic);
    }

    #[test]
    fn role_parse_rejects_unknown() {
        let err = Role::parse("referee").unwrap_err();
        assert_eq!(err, "Invalid role 'referee'");
    }

    #[test]
    fn role_roundtrips_through_as_str() {
        for role in [
            Role::Player,
            Role::SpecialPlayer,
            Role::Visualization,
            Role::GameLogic,
        ] {
            assert_eq!(Role::parse(role.as_str()).unwrap(), role);
        }
    }
}
