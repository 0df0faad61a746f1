//! Network Layer
//!
//! Matchmaking and peer-to-peer session plumbing. The coordinator and the
//! client controller are sans-IO state machines: they consume
//! [`TransportEvent`]s and queue [`Command`]s. [`Broker`] routes those
//! commands, either in memory ([`LocalNetwork`]) or behind WebSockets
//! ([`GameServer`]).

pub mod admin;
pub mod broker;
pub mod client;
pub mod local;
pub mod peer;
pub mod protocol;
pub mod server;
pub mod transport;

pub use admin::{
    rank_roster, CoordinatorError, LobbySnapshot, MatchmakingCoordinator, Membership, Session,
    SessionId,
};
pub use broker::{Broker, BrokerError, Delivery};
pub use client::{
    partition_roster, ClientConfig, ClientError, ClientEvent, ClientSessionController,
    ClientState, QueueState, RosterPartition,
};
pub use local::LocalNetwork;
pub use peer::{Peer, PeerId, PeerStatus, ADMIN_PEER_ID, ANIMALS, DEFAULT_ANIMAL};
pub use protocol::{Message, ProtocolError};
pub use server::{ClientFrame, GameServer, GameServerError, ServerFrame};
pub use transport::{Command, TransportEvent};
