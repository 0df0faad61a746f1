//! Transport Seam
//!
//! The coordinator and the client controller never touch sockets. They
//! consume [`TransportEvent`]s and queue [`Command`]s, which the host (the
//! WebSocket server, the in-memory network, or a test) drains and executes.

use serde::{Serialize, Deserialize};

use crate::network::peer::PeerId;
use crate::network::protocol::Message;

/// Something the transport observed on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// Connection to `peer` is open (either direction).
    Open {
        /// Remote end.
        peer: PeerId,
    },
    /// A message arrived from `peer`.
    Data {
        /// Sender.
        peer: PeerId,
        /// Decoded message.
        message: Message,
    },
    /// Connection to `peer` closed.
    Close {
        /// Remote end.
        peer: PeerId,
    },
    /// Connecting to, or talking with, `peer` failed.
    Error {
        /// Remote end.
        peer: PeerId,
        /// Human-readable reason.
        reason: String,
    },
}

impl TransportEvent {
    /// Remote end of the event.
    pub fn peer(&self) -> &PeerId {
        match self {
            Self::Open { peer }
            | Self::Data { peer, .. }
            | Self::Close { peer }
            | Self::Error { peer, .. } => peer,
        }
    }
}

/// Something a state machine wants the transport to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Dial `peer`.
    Connect {
        /// Target.
        peer: PeerId,
    },
    /// Send a message over the open connection to `peer`. Fire-and-forget.
    Send {
        /// Target.
        peer: PeerId,
        /// Message.
        message: Message,
    },
    /// Close the connection to `peer`.
    Close {
        /// Target.
        peer: PeerId,
    },
}

impl Command {
    /// Shorthand for [`Command::Send`].
    pub fn send(peer: &PeerId, message: Message) -> Self {
        Self::Send {
            peer: peer.clone(),
            message,
        }
    }

    /// Target of the command.
    pub fn peer(&self) -> &PeerId {
        match self {
            Self::Connect { peer } | Self::Send { peer, .. } | Self::Close { peer } => peer,
        }
    }
}
