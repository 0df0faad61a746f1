//! Protocol Messages
//!
//! Wire format shared by the admin and the clients. Every message is a JSON
//! object tagged by `action`:
//!
//! | action      | direction        | payload                         |
//! |-------------|------------------|---------------------------------|
//! | `join`      | client → admin   |                                 |
//! | `startTime` | admin → client   | `startTime`, `serverTime`       |
//! | `wait`      | admin → client   |                                 |
//! | `start`     | admin → client   | `endTime`, `peerIds`, `seed`    |
//! | `score`     | client → admin   | `score`                         |
//! | `animal`    | client ↔ peer    | `animalId`                      |
//! | `platform`  | client ↔ peer    | `platformIndex`                 |
//! | `end`       | admin → client   | `ranks`                         |
//!
//! Delivery is assumed in-order and reliable per connection; nothing here
//! retries. Unknown actions are ignored by [`decode`], so newer peers can
//! add message kinds without breaking older ones.

use serde::{Serialize, Deserialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::clock::EpochMillis;
use crate::network::peer::PeerId;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not an object with a string `action`.
    #[error("frame has no action tag")]
    MissingAction,

    /// Known action with a payload of the wrong shape.
    #[error("malformed {action} message: {reason}")]
    Malformed {
        /// The action tag.
        action: String,
        /// Deserializer message.
        reason: String,
    },
}

/// Peer-to-peer message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Message {
    /// Ask to enter the matchmaking queue.
    Join,

    /// Countdown started.
    StartTime {
        /// When the session will start (admin clock).
        #[serde(rename = "startTime")]
        start_time: EpochMillis,
        /// Admin clock at send time, for skew correction.
        #[serde(rename = "serverTime", alias = "globalTime")]
        server_time: EpochMillis,
    },

    /// Not enough players; back to waiting.
    Wait,

    /// Session begins now.
    Start {
        /// When the session ends (admin clock).
        #[serde(rename = "endTime")]
        end_time: EpochMillis,
        /// Authoritative, ordered roster. Missing decodes as empty.
        #[serde(rename = "peerIds", default)]
        peer_ids: Vec<PeerId>,
        /// Platform sequence seed.
        #[serde(default)]
        seed: String,
    },

    /// Score report.
    Score {
        /// Current score.
        score: u64,
    },

    /// Avatar announcement.
    Animal {
        /// Avatar id.
        #[serde(rename = "animalId")]
        animal_id: String,
    },

    /// Current platform of the sender.
    Platform {
        /// Platform index.
        #[serde(rename = "platformIndex")]
        platform_index: u64,
    },

    /// Session over.
    End {
        /// Peer ids by descending score.
        ranks: Vec<PeerId>,
    },
}

impl Message {
    /// Every action tag this version understands.
    pub const ACTIONS: [&'static str; 8] = [
        "join", "startTime", "wait", "start", "score", "animal", "platform", "end",
    ];

    /// Action tag of this message.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::StartTime { .. } => "startTime",
            Self::Wait => "wait",
            Self::Start { .. } => "start",
            Self::Score { .. } => "score",
            Self::Animal { .. } => "animal",
            Self::Platform { .. } => "platform",
            Self::End { .. } => "end",
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON. Strict: unknown actions are errors.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Decode a JSON frame. Unknown actions yield `Ok(None)`.
pub fn decode(s: &str) -> Result<Option<Message>, ProtocolError> {
    let value: Value = serde_json::from_str(s)?;
    decode_value(value)
}

/// Decode an already-parsed JSON value. Unknown actions yield `Ok(None)`.
pub fn decode_value(value: Value) -> Result<Option<Message>, ProtocolError> {
    let action = match value.get("action").and_then(Value::as_str) {
        Some(action) => action.to_string(),
        None => return Err(ProtocolError::MissingAction),
    };

    if !Message::ACTIONS.contains(&action.as_str()) {
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ProtocolError::Malformed {
            action,
            reason: e.to_string(),
        })
}
