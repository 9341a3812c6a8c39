// Protocol messages for the netorcai metaprotocol.
//
// Two enums define the outbound vocabulary:
// - `ServerMessage`: sent by the coordinator to clients and the game logic.
// - `ClientMessage`: sent by clients. The server never parses through this
//   enum — it exists for client libraries and tests to build frames.
//
// Inbound frames are parsed through the `read_*` functions over
// `serde_json` values instead of serde derive: every structural rejection
// must name the missing or malformed field verbatim, because the message
// becomes the client's kick reason and the test suite matches it.
//
// All payloads are JSON objects carrying a string `message_type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{PlayerInfo, Role};

/// A decoded JSON frame payload.
pub type JsonObject = Map<String, Value>;

/// Messages sent by the coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum ServerMessage {
    #[serde(rename = "LOGIN_ACK")]
    LoginAck { metaprotocol_version: String },
    #[serde(rename = "KICK")]
    Kick { kick_reason: String },
    #[serde(rename = "GAME_STARTS")]
    GameStarts {
        player_id: i64,
        nb_players: i64,
        nb_special_players: i64,
        nb_turns_max: i64,
        milliseconds_before_first_turn: f64,
        milliseconds_between_turns: f64,
        initial_game_state: JsonObject,
        players_info: Vec<PlayerInfo>,
    },
    #[serde(rename = "TURN")]
    Turn {
        turn_number: i64,
        game_state: JsonObject,
        players_info: Vec<PlayerInfo>,
    },
    #[serde(rename = "GAME_ENDS")]
    GameEnds {
        winner_player_id: i64,
        game_state: JsonObject,
    },
    #[serde(rename = "DO_INIT")]
    DoInit {
        nb_players: i64,
        nb_special_players: i64,
        nb_turns_max: i64,
        players_info: Vec<PlayerInfo>,
    },
    #[serde(rename = "DO_TURN")]
    DoTurn { player_actions: Vec<PlayerAction> },
}

/// Messages sent by clients. Builders only — see module comment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum ClientMessage {
    #[serde(rename = "LOGIN")]
    Login { nickname: String, role: String },
    #[serde(rename = "TURN_ACK")]
    TurnAck {
        turn_number: i64,
        actions: Vec<Value>,
    },
    #[serde(rename = "DO_INIT_ACK")]
    DoInitAck { initial_game_state: JsonObject },
    #[serde(rename = "DO_TURN_ACK")]
    DoTurnAck {
        winner_player_id: i64,
        game_state: JsonObject,
    },
}

/// One player's most recent actions for the current turn, as relayed to
/// the game logic inside DO_TURN.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerAction {
    pub player_id: i64,
    pub turn_number: i64,
    pub actions: Vec<Value>,
}

// Parsed inbound records.

#[derive(Clone, Debug, PartialEq)]
pub struct LoginMessage {
    pub nickname: String,
    pub role: Role,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnAckMessage {
    pub turn_number: i64,
    pub actions: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DoInitAckMessage {
    pub initial_game_state: JsonObject,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DoTurnAckMessage {
    pub winner_player_id: i64,
    pub game_state: JsonObject,
}

/// Decode a raw frame payload into a JSON object.
pub fn decode_object(payload: &[u8]) -> Result<JsonObject, String> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| format!("Invalid JSON: {e}"))?;
    match value {
        Value::Object(obj) => Ok(obj),
        _ => Err("Message is not a JSON object".into()),
    }
}

fn read_string_field(obj: &JsonObject, field: &str) -> Result<String, String> {
    match obj.get(field) {
        None => Err(format!("Field '{field}' is missing")),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(format!("Non-string value for field '{field}'")),
    }
}

fn read_int_field(obj: &JsonObject, field: &str) -> Result<i64, String> {
    match obj.get(field) {
        None => Err(format!("Field '{field}' is missing")),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| format!("Non-integral value for field '{field}'")),
        Some(_) => Err(format!("Non-integral value for field '{field}'")),
    }
}

fn read_object_field(obj: &JsonObject, field: &str) -> Result<JsonObject, String> {
    match obj.get(field) {
        None => Err(format!("Field '{field}' is missing")),
        Some(Value::Object(o)) => Ok(o.clone()),
        Some(_) => Err(format!("Non-object value for field '{field}'")),
    }
}

fn read_array_field(obj: &JsonObject, field: &str) -> Result<Vec<Value>, String> {
    match obj.get(field) {
        None => Err(format!("Field '{field}' is missing")),
        Some(Value::Array(a)) => Ok(a.clone()),
        Some(_) => Err(format!("Non-array value for field '{field}'")),
    }
}

fn check_message_type(obj: &JsonObject, expected: &str) -> Result<(), String> {
    let message_type = read_string_field(obj, "message_type")?;
    if message_type != expected {
        return Err(format!(
            "Received '{message_type}' message type, while {expected} was expected"
        ));
    }
    Ok(())
}

/// A game state object must itself be an object and contain an
/// `all_clients` object.
fn read_game_state_field(obj: &JsonObject, field: &str) -> Result<JsonObject, String> {
    let game_state = read_object_field(obj, field)?;
    read_object_field(&game_state, "all_clients")?;
    Ok(game_state)
}

/// Nicknames must match `^\S{1,10}$`: 1 to 10 non-whitespace characters.
fn is_valid_nickname(nickname: &str) -> bool {
    let length = nickname.chars().count();
    (1..=10).contains(&length) && !nickname.chars().any(char::is_whitespace)
}

/// Validate a LOGIN message.
pub fn read_login(obj: &JsonObject) -> Result<LoginMessage, String> {
    check_message_type(obj, "LOGIN")?;

    let nickname = read_string_field(obj, "nickname")?;
    if !is_valid_nickname(&nickname) {
        return Err("Invalid nickname".into());
    }

    let role = Role::parse(&read_string_field(obj, "role")?)?;
    Ok(LoginMessage { nickname, role })
}

/// Validate a TURN_ACK message against the turn number last sent to that
/// client.
pub fn read_turn_ack(obj: &JsonObject, expected_turn: i64) -> Result<TurnAckMessage, String> {
    check_message_type(obj, "TURN_ACK")?;

    let turn_number = read_int_field(obj, "turn_number")?;
    if turn_number != expected_turn {
        return Err(format!(
            "Invalid value (turn_number={turn_number}): expecting {expected_turn}"
        ));
    }

    let actions = read_array_field(obj, "actions")?;
    Ok(TurnAckMessage {
        turn_number,
        actions,
    })
}

/// Validate a DO_INIT_ACK message.
pub fn read_do_init_ack(obj: &JsonObject) -> Result<DoInitAckMessage, String> {
    check_message_type(obj, "DO_INIT_ACK")?;
    let initial_game_state = read_game_state_field(obj, "initial_game_state")?;
    Ok(DoInitAckMessage { initial_game_state })
}

/// Validate a DO_TURN_ACK message. `nb_players` bounds the winner id:
/// winner_player_id must lie in [-1, nb_players).
pub fn read_do_turn_ack(obj: &JsonObject, nb_players: i64) -> Result<DoTurnAckMessage, String> {
    check_message_type(obj, "DO_TURN_ACK")?;

    let winner_player_id = read_int_field(obj, "winner_player_id")?;
    if winner_player_id < -1 || winner_player_id >= nb_players {
        return Err(format!(
            "Invalid winner_player_id: Not in [-1, {nb_players}["
        ));
    }

    let game_state = read_game_state_field(obj, "game_state")?;
    Ok(DoTurnAckMessage {
        winner_player_id,
        game_state,
    })
}
