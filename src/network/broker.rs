//! Peer Broker
//!
//! Minimal point-to-point transport: a registry of endpoints plus a table of
//! open links. Hosts hand it the [`Command`]s a state machine queued and get
//! back the [`TransportEvent`]s each endpoint should observe.
//!
//! Links are unordered pairs; two endpoints share at most one.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::debug;
#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::network::peer::PeerId;
use crate::network::transport::{Command, TransportEvent};

/// Broker errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Command from an endpoint that is not registered.
    #[error("Unknown endpoint {0}")]
    UnknownEndpoint(PeerId),

    /// Registering an id that is already in use.
    #[error("Peer id {0} is taken")]
    IdTaken(PeerId),

    /// Endpoint limit reached.
    #[error("Endpoint limit reached ({0})")]
    Full(usize),
}

/// An event addressed to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Recipient.
    pub to: PeerId,
    /// What it observes.
    pub event: TransportEvent,
}

impl Delivery {
    fn new(to: &PeerId, event: TransportEvent) -> Self {
        Self { to: to.clone(), event }
    }
}

/// Unordered endpoint pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Link(PeerId, PeerId);

impl Link {
    fn new(a: &PeerId, b: &PeerId) -> Self {
        if a <= b {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }

    fn other(&self, id: &PeerId) -> Option<&PeerId> {
        if &self.0 == id {
            Some(&self.1)
        } else if &self.1 == id {
            Some(&self.0)
        } else {
            None
        }
    }
}

/// Endpoint registry and link table.
#[derive(Debug, Default)]
pub struct Broker {
    endpoints: BTreeSet<PeerId>,
    links: BTreeSet<Link>,
    max_endpoints: Option<usize>,
}

impl Broker {
    /// Unbounded broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker refusing registrations beyond `max` endpoints.
    pub fn with_capacity(max: usize) -> Self {
        Self {
            max_endpoints: Some(max),
            ..Self::default()
        }
    }

    /// Register an endpoint under a fresh random id.
    pub fn register(&mut self) -> Result<PeerId, BrokerError> {
        let mut id = PeerId::random();
        while self.endpoints.contains(&id) {
            id = PeerId::random();
        }
        self.register_as(id.clone())?;
        Ok(id)
    }

    /// Register an endpoint under a chosen id (e.g. the admin's).
    pub fn register_as(&mut self, id: PeerId) -> Result<(), BrokerError> {
        if let Some(max) = self.max_endpoints {
            if self.endpoints.len() >= max {
                return Err(BrokerError::Full(max));
            }
        }
        if self.endpoints.contains(&id) {
            return Err(BrokerError::IdTaken(id));
        }
        debug!("Endpoint {} registered", id.short());
        self.endpoints.insert(id);
        Ok(())
    }

    /// Remove an endpoint, closing all its links.
    pub fn unregister(&mut self, id: &PeerId) -> Vec<Delivery> {
        if !self.endpoints.remove(id) {
            return Vec::new();
        }
        let (dropped, kept): (BTreeSet<Link>, BTreeSet<Link>) = std::mem::take(&mut self.links)
            .into_iter()
            .partition(|link| link.other(id).is_some());
        self.links = kept;

        debug!("Endpoint {} unregistered, {} links closed", id.short(), dropped.len());
        dropped
            .iter()
            .filter_map(|link| link.other(id))
            .map(|other| Delivery::new(other, TransportEvent::Close { peer: id.clone() }))
            .collect()
    }

    /// Execute one command on behalf of `from`.
    pub fn execute(&mut self, from: &PeerId, command: Command) -> Result<Vec<Delivery>, BrokerError> {
        if !self.endpoints.contains(from) {
            return Err(BrokerError::UnknownEndpoint(from.clone()));
        }

        #[cfg(feature = "debug-tracing")]
        trace!("{} -> {:?}", from.short(), command);

        let deliveries = match command {
            Command::Connect { peer } => {
                if &peer == from || !self.endpoints.contains(&peer) {
                    vec![Delivery::new(from, TransportEvent::Error {
                        reason: format!("could not connect to peer {}", peer),
                        peer,
                    })]
                } else if !self.links.insert(Link::new(from, &peer)) {
                    debug!("{} already linked with {}", from.short(), peer.short());
                    Vec::new()
                } else {
                    vec![
                        Delivery::new(&peer, TransportEvent::Open { peer: from.clone() }),
                        Delivery::new(from, TransportEvent::Open { peer }),
                    ]
                }
            }
            Command::Send { peer, message } => {
                if self.is_linked(from, &peer) {
                    vec![Delivery::new(&peer, TransportEvent::Data { peer: from.clone(), message })]
                } else {
                    vec![Delivery::new(from, TransportEvent::Error {
                        reason: format!("no open connection to {}", peer),
                        peer,
                    })]
                }
            }
            Command::Close { peer } => {
                if self.links.remove(&Link::new(from, &peer)) {
                    vec![
                        Delivery::new(&peer, TransportEvent::Close { peer: from.clone() }),
                        Delivery::new(from, TransportEvent::Close { peer }),
                    ]
                } else {
                    Vec::new()
                }
            }
        };
        Ok(deliveries)
    }

    /// True if `a` and `b` share an open link.
    pub fn is_linked(&self, a: &PeerId, b: &PeerId) -> bool {
        self.links.contains(&Link::new(a, b))
    }

    /// True if `id` is registered.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.endpoints.contains(id)
    }

    /// Registered endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Open links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}
