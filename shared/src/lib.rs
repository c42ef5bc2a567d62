use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Side length of the square room grid. Valid coordinates are `0..GRID_SIZE`.
pub const GRID_SIZE: u32 = 8;
/// Largest grid whose coordinates all fit in a [`Position`].
pub const MAX_GRID_SIZE: u32 = i32::MAX as u32;
/// Room used when a join message carries no (or an empty) `spaceId`.
pub const DEFAULT_SPACE_ID: &str = "default-space";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn in_bounds(&self, grid_size: u32) -> bool {
        let n = i64::from(grid_size);
        (0..n).contains(&i64::from(self.x)) && (0..n).contains(&i64::from(self.y))
    }
}

/// A room occupant as seen by other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occupant {
    pub user_id: String,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl JoinPayload {
    /// The requested room, with empty ids treated as absent.
    pub fn space_id(&self) -> Option<&str> {
        self.space_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Client-proposed destination cell. Nothing in here is trusted by the server
/// except the target coordinates, and those only after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveIntent {
    pub x: i64,
    pub y: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub sequence: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or(0))
}

/// Messages sent from clients to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    Join(JoinPayload),
    Move(MoveIntent),
}

/// Messages sent from the server to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    SpaceJoined {
        spawn: Position,
        user_id: String,
        users: Vec<Occupant>,
    },
    UserJoined {
        user_id: String,
        x: i32,
        y: i32,
    },
    Movement {
        user_id: String,
        x: i32,
        y: i32,
        sequence: i64,
    },
    MoveAck {
        sequence: i64,
        x: i32,
        y: i32,
        success: bool,
        timestamp: u64,
    },
    MovementRejected {
        x: i32,
        y: i32,
    },
    UserLeft {
        user_id: String,
    },
    JoinRejected {
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl ClientMessage {
    /// Parses an inbound text frame.
    ///
    /// Returns `Ok(None)` for a well-formed envelope whose `type` is not one
    /// the server understands; those frames are ignored rather than treated
    /// as errors.
    pub fn parse(text: &str) -> Result<Option<Self>, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let payload = match envelope.payload {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            payload => payload,
        };

        let message = match envelope.kind.as_str() {
            "join" => ClientMessage::Join(serde_json::from_value(payload)?),
            "move" => ClientMessage::Move(serde_json::from_value(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decides whether `(target_x, target_y)` is a legal single step from `current`.
///
/// A move is legal iff it is exactly one cardinal cell away and lands inside
/// the `grid_size` x `grid_size` grid. Returns the committed position on
/// success.
pub fn validate_move(
    current: Position,
    target_x: i64,
    target_y: i64,
    grid_size: u32,
) -> Option<Position> {
    let dx = (i128::from(current.x) - i128::from(target_x)).unsigned_abs();
    let dy = (i128::from(current.y) - i128::from(target_y)).unsigned_abs();
    if dx + dy != 1 {
        return None;
    }

    let n = i64::from(grid_size.min(MAX_GRID_SIZE));
    if !(0..n).contains(&target_x) || !(0..n).contains(&target_y) {
        return None;
    }

    Some(Position::new(
        i32::try_from(target_x).ok()?,
        i32::try_from(target_y).ok()?,
    ))
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}
