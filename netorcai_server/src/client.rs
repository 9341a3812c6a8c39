// Synchronous reference client for the netorcai metaprotocol.
//
// Exercises the same wire code paths a real client library would: framed
// send of `ClientMessage` builders, framed receive of `ServerMessage`.
// The integration tests drive the server exclusively through this client;
// it is deliberately blocking (with a read timeout) so test scenarios read
// as straight-line scripts.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use serde_json::Value;

use netorcai_protocol::framing::{read_frame, write_frame};
use netorcai_protocol::message::{ClientMessage, JsonObject, ServerMessage};

/// Default read timeout: long enough for paced games, short enough for
/// tests to fail promptly.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct GameClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

/// A minimal valid game state: an object containing `all_clients`.
pub fn empty_game_state() -> JsonObject {
    let mut game_state = JsonObject::new();
    game_state.insert("all_clients".into(), Value::Object(JsonObject::new()));
    game_state
}

impl GameClient {
    pub fn connect(addr: SocketAddr) -> Result<GameClient, String> {
        let stream = TcpStream::connect(addr).map_err(|e| format!("connect failed: {e}"))?;
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| e.to_string())?;
        let reader_stream = stream.try_clone().map_err(|e| e.to_string())?;
        Ok(GameClient {
            reader: BufReader::new(reader_stream),
            writer: BufWriter::new(stream),
        })
    }

    /// Send LOGIN and return the server's response — LOGIN_ACK on
    /// success, KICK on denial.
    pub fn login(&mut self, nickname: &str, role: &str) -> Result<ServerMessage, String> {
        self.send(&ClientMessage::Login {
            nickname: nickname.into(),
            role: role.into(),
        })?;
        self.recv()
    }

    pub fn send(&mut self, msg: &ClientMessage) -> Result<(), String> {
        let json = serde_json::to_vec(msg).map_err(|e| e.to_string())?;
        write_frame(&mut self.writer, &json).map_err(|e| e.to_string())
    }

    /// Send arbitrary bytes as one frame, for malformed-message scenarios.
    pub fn send_raw(&mut self, payload: &[u8]) -> Result<(), String> {
        write_frame(&mut self.writer, payload).map_err(|e| e.to_string())
    }

    pub fn recv(&mut self) -> Result<ServerMessage, String> {
        let payload = read_frame(&mut self.reader).map_err(|e| e.to_string())?;
        serde_json::from_slice(&payload).map_err(|e| e.to_string())
    }

    pub fn send_turn_ack(&mut self, turn_number: i64, actions: Vec<Value>) -> Result<(), String> {
        self.send(&ClientMessage::TurnAck {
            turn_number,
            actions,
        })
    }

    pub fn send_do_init_ack(&mut self) -> Result<(), String> {
        self.send(&ClientMessage::DoInitAck {
            initial_game_state: empty_game_state(),
        })
    }

    pub fn send_do_turn_ack(&mut self, winner_player_id: i64) -> Result<(), String> {
        self.send(&ClientMessage::DoTurnAck {
            winner_player_id,
            game_state: empty_game_state(),
        })
    }
}
