//! Matchmaking Coordinator
//!
//! The admin role: owns the waiting queue, the shared countdown, every live
//! session, and end-of-session ranking.
//!
//! ## Lifecycle
//!
//! ```text
//! open ──► Idle ──join──► Joining ──(≥ min players)──► Starting
//!                            ▲                             │
//!                            └──────(a peer left) ◄────────┤
//!                                                          ▼
//!                          (countdown elapsed) ──────► Playing ──(end time)──► removed
//! ```
//!
//! Each connected peer is owned by exactly one collection: the queue or one
//! session roster. Moving a peer between them is a move of its [`Peer`]
//! record, so the two can never both hold it.
//!
//! Nothing here reads the clock or touches the network. The host feeds
//! [`TransportEvent`]s and periodic [`MatchmakingCoordinator::tick`] calls,
//! then executes whatever [`Command`]s were queued.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AdminConfig;
use crate::core::clock::EpochMillis;
use crate::core::hash::seed_fingerprint;
use crate::network::peer::{Peer, PeerId, PeerStatus};
use crate::network::protocol::Message;
use crate::network::transport::{Command, TransportEvent};

/// Coordinator errors. Each one is confined to the offending peer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Event for a peer that never opened.
    #[error("Unknown peer {0}")]
    UnknownPeer(PeerId),

    /// Second open for a connected peer.
    #[error("Peer {0} is already connected")]
    DuplicatePeer(PeerId),

    /// Message kind a client must not send, or not in its current state.
    #[error("Peer {peer} sent unexpected {action}")]
    UnexpectedMessage {
        /// Sender.
        peer: PeerId,
        /// Action tag.
        action: &'static str,
    },

    /// Session-only message from a queued peer.
    #[error("Peer {0} is not in a session")]
    NotInSession(PeerId),
}

/// Session identifier, derived from the creation timestamp.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a connected peer currently lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Membership {
    /// In the waiting queue (Idle, Joining or Starting).
    Queue,
    /// In the roster of this session.
    Session(SessionId),
}

/// A running game instance.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique id.
    pub id: SessionId,
    /// Platform sequence seed.
    pub seed: String,
    /// Roster in start order. Shrinks on disconnect, never grows.
    pub roster: Vec<Peer>,
    /// When the session started.
    pub start_time: EpochMillis,
    /// When the session ends.
    pub end_time: EpochMillis,
}

impl Session {
    /// Peer ids in roster order.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.roster.iter().map(|p| p.id.clone()).collect()
    }

    fn peer_mut(&mut self, id: &PeerId) -> Option<&mut Peer> {
        self.roster.iter_mut().find(|p| &p.id == id)
    }
}

/// Rank a roster by descending score. Equal scores keep roster order.
pub fn rank_roster(roster: &[Peer]) -> Vec<PeerId> {
    let mut ranked: Vec<&Peer> = roster.iter().collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked.into_iter().map(|p| p.id.clone()).collect()
}

/// Point-in-time view of the lobby, for status pages and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySnapshot {
    /// Connected peers.
    pub connected: usize,
    /// Queued peers that have not joined.
    pub idle: usize,
    /// Joined, waiting for another player.
    pub joining: usize,
    /// In the running countdown.
    pub starting: usize,
    /// In a session.
    pub playing: usize,
    /// Live sessions.
    pub sessions: usize,
    /// Whole seconds left on the countdown, if one is running.
    pub countdown_remaining: Option<i64>,
}

/// Admin-side matchmaking state machine.
#[derive(Debug)]
pub struct MatchmakingCoordinator {
    config: AdminConfig,
    /// Connected peers not in a session, in connection order.
    queue: Vec<Peer>,
    /// Live sessions.
    sessions: BTreeMap<SessionId, Session>,
    /// Countdown start, `None` when not running.
    countdown_start: Option<EpochMillis>,
    /// Outbound commands, drained by the host.
    commands: Vec<Command>,
}

impl MatchmakingCoordinator {
    /// Create an empty coordinator.
    pub fn new(config: AdminConfig) -> Self {
        Self {
            config,
            queue: Vec::new(),
            sessions: BTreeMap::new(),
            countdown_start: None,
            commands: Vec::new(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    /// Admin id clients dial.
    pub fn admin_id(&self) -> &PeerId {
        &self.config.admin_id
    }

    /// Take every queued command.
    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Feed one transport event.
    pub fn handle(&mut self, event: TransportEvent, now: EpochMillis) -> Result<(), CoordinatorError> {
        match event {
            TransportEvent::Open { peer } => self.on_open(peer, now),
            TransportEvent::Data { peer, message } => self.on_data(&peer, message, now),
            TransportEvent::Close { peer } => self.on_close(&peer, now),
            TransportEvent::Error { peer, reason } => self.on_error(&peer, &reason, now),
        }
    }

    /// A peer connected to the admin.
    pub fn on_open(&mut self, peer: PeerId, now: EpochMillis) -> Result<(), CoordinatorError> {
        if self.membership(&peer).is_some() {
            return Err(CoordinatorError::DuplicatePeer(peer));
        }
        info!("Peer {} connected", peer.short());
        self.queue.push(Peer::new(peer, now));
        Ok(())
    }

    /// A message arrived from a peer.
    pub fn on_data(
        &mut self,
        peer: &PeerId,
        message: Message,
        now: EpochMillis,
    ) -> Result<(), CoordinatorError> {
        let membership = self
            .membership(peer)
            .ok_or_else(|| CoordinatorError::UnknownPeer(peer.clone()))?;

        match (message, membership) {
            (Message::Join, Membership::Queue) => {
                let joined = match self.queue.iter_mut().find(|p| &p.id == peer) {
                    Some(entry) if entry.status == PeerStatus::Idle => {
                        entry.status = PeerStatus::Joining;
                        true
                    }
                    _ => false,
                };
                if joined {
                    info!("Peer {} joined", peer.short());
                    self.evaluate_queue(now);
                } else {
                    debug!("Peer {} already joined", peer.short());
                }
                Ok(())
            }
            (Message::Join, Membership::Session(_)) => Err(CoordinatorError::UnexpectedMessage {
                peer: peer.clone(),
                action: "join",
            }),
            (Message::Score { score }, Membership::Session(id)) => {
                if let Some(entry) = self.sessions.get_mut(&id).and_then(|s| s.peer_mut(peer)) {
                    entry.report_score(score);
                }
                Ok(())
            }
            (Message::Score { .. }, Membership::Queue) => {
                Err(CoordinatorError::NotInSession(peer.clone()))
            }
            (Message::Animal { animal_id }, membership) => {
                if let Some(entry) = self.peer_mut(peer, &membership) {
                    debug!("Peer {} is {}", peer.short(), animal_id);
                    entry.animal = animal_id;
                }
                Ok(())
            }
            (Message::Platform { platform_index }, membership) => {
                if let Some(entry) = self.peer_mut(peer, &membership) {
                    entry.platform_index = entry.platform_index.max(platform_index);
                }
                Ok(())
            }
            (other, _) => Err(CoordinatorError::UnexpectedMessage {
                peer: peer.clone(),
                action: other.action(),
            }),
        }
    }

    /// A peer's connection closed. The peer leaves whatever owns it.
    pub fn on_close(&mut self, peer: &PeerId, now: EpochMillis) -> Result<(), CoordinatorError> {
        match self.membership(peer) {
            Some(Membership::Queue) => {
                self.queue.retain(|p| &p.id != peer);
                info!("Peer {} left the queue", peer.short());
                self.evaluate_queue(now);
            }
            Some(Membership::Session(id)) => {
                let emptied = match self.sessions.get_mut(&id) {
                    Some(session) => {
                        session.roster.retain(|p| &p.id != peer);
                        info!(
                            "Peer {} left session {} ({} remaining)",
                            peer.short(),
                            id,
                            session.roster.len()
                        );
                        session.roster.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    self.sessions.remove(&id);
                    info!("Session {} discarded: roster empty", id);
                }
            }
            // Already dropped, e.g. after session teardown.
            None => debug!("Close for unknown peer {}", peer.short()),
        }
        Ok(())
    }

    /// A peer's connection failed. Handled as a close.
    pub fn on_error(
        &mut self,
        peer: &PeerId,
        reason: &str,
        now: EpochMillis,
    ) -> Result<(), CoordinatorError> {
        warn!("Connection error with {}: {}", peer.short(), reason);
        self.on_close(peer, now)
    }

    /// Advance time: start sessions whose countdown elapsed and end sessions
    /// whose end time passed.
    pub fn tick(&mut self, now: EpochMillis) {
        if let Some(start) = self.countdown_start {
            if now >= start + self.config.countdown_ms() {
                self.countdown_start = None;
                self.start_session(now);
                self.evaluate_queue(now);
            }
        }

        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| now >= s.end_time)
            .map(|s| s.id.clone())
            .collect();
        for id in expired {
            if let Some(session) = self.sessions.remove(&id) {
                self.end_session(session);
            }
        }
    }

    /// Where `peer` currently lives, if connected.
    pub fn membership(&self, peer: &PeerId) -> Option<Membership> {
        if self.queue.iter().any(|p| &p.id == peer) {
            return Some(Membership::Queue);
        }
        self.sessions
            .values()
            .find(|s| s.roster.iter().any(|p| &p.id == peer))
            .map(|s| Membership::Session(s.id.clone()))
    }

    /// Queued peers, in connection order.
    pub fn queue(&self) -> &[Peer] {
        &self.queue
    }

    /// Live session by id.
    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// All live sessions.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Countdown start, if a countdown is running.
    pub fn countdown_start(&self) -> Option<EpochMillis> {
        self.countdown_start
    }

    /// Whole seconds left on the countdown: `COUNTDOWN - floor(elapsed / 1s)`.
    pub fn countdown_remaining(&self, now: EpochMillis) -> Option<i64> {
        self.countdown_start.map(|start| {
            let total = self.config.countdown.as_secs() as i64;
            let elapsed = (now - start).max(0).div_euclid(1000);
            (total - elapsed).max(0)
        })
    }

    /// Counts for status display.
    pub fn lobby_snapshot(&self, now: EpochMillis) -> LobbySnapshot {
        let count = |status: PeerStatus| self.queue.iter().filter(|p| p.status == status).count();
        let playing: usize = self.sessions.values().map(|s| s.roster.len()).sum();
        LobbySnapshot {
            connected: self.queue.len() + playing,
            idle: count(PeerStatus::Idle),
            joining: count(PeerStatus::Joining),
            starting: count(PeerStatus::Starting),
            playing,
            sessions: self.sessions.len(),
            countdown_remaining: self.countdown_remaining(now),
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn peer_mut(&mut self, id: &PeerId, membership: &Membership) -> Option<&mut Peer> {
        match membership {
            Membership::Queue => self.queue.iter_mut().find(|p| &p.id == id),
            Membership::Session(session) => {
                self.sessions.get_mut(session).and_then(|s| s.peer_mut(id))
            }
        }
    }

    fn send(&mut self, peer: &PeerId, message: Message) {
        self.commands.push(Command::send(peer, message));
    }

    /// Start or cancel the countdown to match the number of active joiners.
    fn evaluate_queue(&mut self, now: EpochMillis) {
        let active = self
            .queue
            .iter()
            .filter(|p| matches!(p.status, PeerStatus::Joining | PeerStatus::Starting))
            .count();

        if active >= self.config.min_players {
            let countdown_start = *self.countdown_start.get_or_insert_with(|| {
                info!("Countdown started with {} players", active);
                now
            });
            let start_time = countdown_start + self.config.countdown_ms();

            let promoted: Vec<PeerId> = self
                .queue
                .iter_mut()
                .filter(|p| p.status == PeerStatus::Joining)
                .map(|p| {
                    p.status = PeerStatus::Starting;
                    p.id.clone()
                })
                .collect();
            for peer in promoted {
                self.send(&peer, Message::StartTime { start_time, server_time: now });
            }
        } else {
            let demoted: Vec<PeerId> = self
                .queue
                .iter_mut()
                .filter(|p| p.status == PeerStatus::Starting)
                .map(|p| {
                    p.status = PeerStatus::Joining;
                    p.id.clone()
                })
                .collect();
            for peer in demoted {
                self.send(&peer, Message::Wait);
            }
            if self.countdown_start.take().is_some() {
                info!("Countdown cancelled: {} players left", active);
            }
        }
    }

    /// Move every Starting peer into a new session.
    fn start_session(&mut self, now: EpochMillis) {
        let (starters, rest): (Vec<Peer>, Vec<Peer>) = std::mem::take(&mut self.queue)
            .into_iter()
            .partition(|p| p.status == PeerStatus::Starting);
        self.queue = rest;

        if starters.len() < self.config.min_players {
            // Only reachable if the countdown outlived its players.
            warn!("Countdown elapsed with {} players; not starting", starters.len());
            self.queue.extend(starters);
            return;
        }

        let id = self.next_session_id(now);
        let seed = id.as_str().to_string();
        let end_time = now + self.config.game_duration_ms();

        let roster: Vec<Peer> = starters
            .into_iter()
            .map(|mut p| {
                p.status = PeerStatus::Playing;
                p.score = 0;
                p.platform_index = 0;
                p
            })
            .collect();
        let peer_ids: Vec<PeerId> = roster.iter().map(|p| p.id.clone()).collect();

        info!(
            "Session {} started: {} players, seed {}",
            id,
            roster.len(),
            seed_fingerprint(&seed)
        );

        for peer in &peer_ids {
            self.send(
                peer,
                Message::Start {
                    end_time,
                    peer_ids: peer_ids.clone(),
                    seed: seed.clone(),
                },
            );
        }

        self.sessions.insert(
            id.clone(),
            Session {
                id,
                seed,
                roster,
                start_time: now,
                end_time,
            },
        );
    }

    /// Rank, notify and release a finished session.
    fn end_session(&mut self, session: Session) {
        if session.roster.is_empty() {
            info!("Session {} ended with no players", session.id);
            return;
        }

        let ranks = rank_roster(&session.roster);
        info!(
            "Session {} ended: winner {}",
            session.id,
            ranks.first().map(PeerId::short).unwrap_or("-")
        );

        for peer in &session.roster {
            self.send(&peer.id, Message::End { ranks: ranks.clone() });
        }
        for peer in &session.roster {
            self.commands.push(Command::Close { peer: peer.id.clone() });
        }
    }

    /// Creation timestamp, suffixed if a live session already has it.
    fn next_session_id(&self, now: EpochMillis) -> SessionId {
        let base = now.to_string();
        let mut candidate = SessionId(base.clone());
        let mut suffix = 1;
        while self.sessions.contains_key(&candidate) {
            candidate = SessionId(format!("{}-{}", base, suffix));
            suffix += 1;
        }
        candidate
    }
}
