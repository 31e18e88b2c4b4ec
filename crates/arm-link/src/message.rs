use serde::{Deserialize, Serialize};

/// Overall game outcome as reported over the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    InProgress,
    PlayerWin,
    RobotWin,
    Draw,
    Aborted,
}

/// Messages exchanged with the relay server. Transient: they live only for
/// the duration of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkMessage {
    /// The server declares the opponent's move.
    MoveRequest { row: u8, col: u8 },
    /// Transport-level acknowledgement of the envelope numbered `ack`.
    MoveAck { ack: u64 },
    /// Robot-side board snapshot: 0 = empty, 1 = player, 2 = robot.
    GameState {
        cells: [[u8; 3]; 3],
        status: GameStatus,
    },
    /// Protocol-level error report.
    Error { message: String },
}

impl LinkMessage {
    pub fn is_ack(&self) -> bool {
        matches!(self, LinkMessage::MoveAck { .. })
    }
}

/// Wire envelope: every frame is one JSON line with a session-monotonic
/// sequence number. Ack frames mirror the sequence number they confirm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    #[serde(flatten)]
    pub msg: LinkMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_fields() {
        let env = Envelope {
            seq: 7,
            msg: LinkMessage::MoveRequest { row: 1, col: 2 },
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["seq"], 7);
        assert_eq!(value["type"], "move_request");
        assert_eq!(value["row"], 1);
        assert_eq!(value["col"], 2);
    }

    #[test]
    fn test_round_trip_all_variants() {
        let messages = [
            LinkMessage::MoveRequest { row: 0, col: 2 },
            LinkMessage::MoveAck { ack: 3 },
            LinkMessage::GameState {
                cells: [[0, 1, 0], [0, 2, 0], [1, 0, 0]],
                status: GameStatus::InProgress,
            },
            LinkMessage::Error {
                message: "bad move".into(),
            },
        ];
        for msg in messages {
            let env = Envelope { seq: 1, msg: msg.clone() };
            let json = serde_json::to_string(&env).unwrap();
            let back: Envelope = serde_json::from_str(&json).unwrap();
            assert_eq!(back.msg, msg);
        }
    }
}
