//! Client Session Controller
//!
//! The player role. Connects to the admin, joins the queue, follows the
//! countdown, then builds a direct mesh with the rest of the roster and
//! plays locally against the shared platform sequence.
//!
//! ## States
//!
//! ```text
//! Disconnected ─connect─► Connecting ─open─► InQueue(Idle)
//!     ▲                                        │ join
//!     │                                        ▼
//!     │                  InQueue(Joining) ◄─wait─ InQueue(Starting)
//!     │                        └──startTime──────────►┘
//!     │                                               │ start
//!     └──────────────── end / connection error ◄─ InSession
//! ```
//!
//! ## Mesh
//!
//! For a roster of N peers with this client at `my_index`, peers below
//! `my_index` dial in and peers above it are dialed. Every pair therefore
//! ends with exactly one link, whichever side's `start` arrives first.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::clock::{seconds_until, EpochMillis};
use crate::core::hash::seed_fingerprint;
use crate::game::events::{EventBus, ListenerId};
use crate::game::jump::{Direction, JumpController, JumpOutcome};
use crate::game::platform::{Platform, PlatformSequence, PlatformType};
use crate::network::peer::{is_known_animal, PeerId, ADMIN_PEER_ID, DEFAULT_ANIMAL};
use crate::network::protocol::Message;
use crate::network::transport::{Command, TransportEvent};

/// Client errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// `connect` while not disconnected.
    #[error("Already connected")]
    AlreadyConnected,

    /// Operation needs an admin connection.
    #[error("Not connected to the admin")]
    NotConnected,

    /// Operation needs a running session.
    #[error("Not in a session")]
    NotInSession,

    /// `start` with an empty roster or one that lacks this client.
    #[error("Invalid roster: {0}")]
    InvalidRoster(String),

    /// Message that peer must not send.
    #[error("Peer {peer} sent unexpected {action}")]
    UnexpectedMessage {
        /// Sender.
        peer: PeerId,
        /// Action tag.
        action: &'static str,
    },

    /// Avatar not in the catalogue.
    #[error("Unknown animal {0:?}")]
    UnknownAnimal(String),

    /// Avatar changes are closed while playing.
    #[error("Animal is fixed during a session")]
    AnimalLocked,
}

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Id of the admin to dial.
    pub admin_id: PeerId,
    /// How often the score is re-sent while playing.
    pub score_report_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            admin_id: PeerId::new(ADMIN_PEER_ID),
            score_report_interval: Duration::from_secs(1),
        }
    }
}

/// Matchmaking sub-state while connected and not playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Connected, not joined.
    Idle,
    /// Joined, waiting for another player.
    Joining,
    /// Countdown running.
    Starting {
        /// Session start (admin clock).
        start_time: EpochMillis,
        /// Local clock minus admin clock.
        time_diff: i64,
    },
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No admin connection.
    Disconnected,
    /// Dialing the admin.
    Connecting,
    /// Connected to the admin.
    InQueue(QueueState),
    /// Playing.
    InSession,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Admin connection open.
    ConnectionSuccess,
    /// Admin connection failed, closed, or the roster was unusable.
    ConnectionError,
    /// Countdown started.
    GameStartTimeReceived {
        /// Session start (admin clock).
        start_time: EpochMillis,
        /// Local clock minus admin clock.
        time_diff: i64,
    },
    /// Countdown cancelled.
    WaitForOthers,
    /// Session started.
    GameStart {
        /// Platform sequence seed.
        seed: String,
        /// Ordered roster.
        roster: Vec<PeerId>,
    },
    /// Session end time known.
    GameEndTimeReceived {
        /// Session end (admin clock).
        end_time: EpochMillis,
    },
    /// A remote player is ready to draw.
    PeerAdd {
        /// Remote peer.
        peer: PeerId,
        /// Its avatar.
        animal: String,
    },
    /// A remote player left.
    PeerRemove {
        /// Remote peer.
        peer: PeerId,
    },
    /// A remote player moved.
    PeerPlatform {
        /// Remote peer.
        peer: PeerId,
        /// Its platform index.
        platform_index: u64,
    },
    /// Local jump resolved.
    Jumped {
        /// Result.
        outcome: JumpOutcome,
    },
    /// Three misses in a row; show the way.
    Hint {
        /// Platform to highlight.
        platform_index: u64,
        /// Its lane.
        platform_type: PlatformType,
    },
    /// Session over.
    GameEnd {
        /// Peer ids by descending score.
        ranks: Vec<PeerId>,
        /// Avatar of every roster member seen.
        animals: BTreeMap<PeerId, String>,
        /// 1-based rank of this client, if present in `ranks`.
        my_rank: Option<usize>,
    },
}

/// Who dials whom, from one client's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterPartition {
    /// This client's position in the roster.
    pub my_index: usize,
    /// Lower-index peers; they dial this client.
    pub incoming: Vec<PeerId>,
    /// Higher-index peers; this client dials them.
    pub outgoing: Vec<PeerId>,
}

/// Split `roster` around `me`. `None` if `me` is not in it.
pub fn partition_roster(roster: &[PeerId], me: &PeerId) -> Option<RosterPartition> {
    let my_index = roster.iter().position(|p| p == me)?;
    Some(RosterPartition {
        my_index,
        incoming: roster[..my_index].to_vec(),
        outgoing: roster[my_index + 1..].to_vec(),
    })
}

/// Per-session client state.
#[derive(Debug)]
struct ClientSession {
    roster: Vec<PeerId>,
    partition: RosterPartition,
    end_time: EpochMillis,
    time_diff: i64,
    /// Open peer links.
    links: BTreeSet<PeerId>,
    animals: BTreeMap<PeerId, String>,
    platforms: BTreeMap<PeerId, u64>,
    jump: JumpController,
    last_score_report: EpochMillis,
}

impl ClientSession {
    fn expects(&self, peer: &PeerId) -> bool {
        self.partition.incoming.contains(peer) || self.partition.outgoing.contains(peer)
    }
}

/// Client-side state machine.
#[derive(Debug)]
pub struct ClientSessionController {
    config: ClientConfig,
    local_id: Option<PeerId>,
    state: ClientState,
    animal: String,
    /// Clock offset from the last `startTime`.
    time_diff: i64,
    session: Option<ClientSession>,
    /// Peer links opened before `start` arrived.
    pending: BTreeSet<PeerId>,
    commands: Vec<Command>,
    events: EventBus<ClientEvent>,
}

impl ClientSessionController {
    /// Create a disconnected controller.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            local_id: None,
            state: ClientState::Disconnected,
            animal: DEFAULT_ANIMAL.to_string(),
            time_diff: 0,
            session: None,
            pending: BTreeSet::new(),
            commands: Vec::new(),
            events: EventBus::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Transport id of this client, once connected.
    pub fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    /// Chosen avatar.
    pub fn animal(&self) -> &str {
        &self.animal
    }

    /// Register an event handler.
    pub fn on_event<F>(&mut self, handler: F) -> ListenerId
    where
        F: FnMut(&ClientEvent) + Send + 'static,
    {
        self.events.on(handler)
    }

    /// Unregister an event handler.
    pub fn off_event(&mut self, id: ListenerId) -> bool {
        self.events.off(id)
    }

    /// Take every queued command.
    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    // =========================================================================
    // USER ACTIONS
    // =========================================================================

    /// Dial the admin. `local_id` is the id the transport assigned us.
    pub fn connect(&mut self, local_id: PeerId) -> Result<(), ClientError> {
        if self.state != ClientState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }
        info!("Client {} connecting to {}", local_id.short(), self.config.admin_id);
        self.local_id = Some(local_id);
        self.state = ClientState::Connecting;
        self.commands.push(Command::Connect { peer: self.config.admin_id.clone() });
        Ok(())
    }

    /// Ask the admin for a place in the next session.
    pub fn join(&mut self) -> Result<(), ClientError> {
        match self.state {
            ClientState::InQueue(QueueState::Idle) => {
                self.send_admin(Message::Join);
                self.state = ClientState::InQueue(QueueState::Joining);
                Ok(())
            }
            // Already queued or playing.
            ClientState::InQueue(_) | ClientState::InSession => Ok(()),
            ClientState::Disconnected | ClientState::Connecting => Err(ClientError::NotConnected),
        }
    }

    /// Pick an avatar. Fixed once a session starts.
    pub fn select_animal(&mut self, animal: &str) -> Result<(), ClientError> {
        if !is_known_animal(animal) {
            return Err(ClientError::UnknownAnimal(animal.to_string()));
        }
        if self.state == ClientState::InSession {
            return Err(ClientError::AnimalLocked);
        }
        self.animal = animal.to_string();
        Ok(())
    }

    /// Jump in `direction`.
    pub fn jump(&mut self, direction: Direction, now: EpochMillis) -> Result<JumpOutcome, ClientError> {
        let session = self.session.as_mut().ok_or(ClientError::NotInSession)?;
        let outcome = session.jump.jump(direction, now);

        match outcome {
            JumpOutcome::Landed { platform_index, score } => {
                session.last_score_report = now;
                let links: Vec<PeerId> = session.links.iter().cloned().collect();
                for peer in links {
                    self.commands.push(Command::send(&peer, Message::Platform { platform_index }));
                }
                self.send_admin(Message::Score { score });
            }
            JumpOutcome::Missed { hint: Some(hint) } => {
                self.events.dispatch(&ClientEvent::Jumped { outcome });
                self.events.dispatch(&ClientEvent::Hint {
                    platform_index: hint.platform_index,
                    platform_type: hint.platform_type,
                });
                return Ok(outcome);
            }
            JumpOutcome::Missed { hint: None } | JumpOutcome::Ignored => {}
        }

        if outcome != JumpOutcome::Ignored {
            self.events.dispatch(&ClientEvent::Jumped { outcome });
        }
        Ok(outcome)
    }

    /// Raw key input. Keys other than the arrows are ignored.
    pub fn key_down(&mut self, key_code: u32, now: EpochMillis) -> Result<JumpOutcome, ClientError> {
        match Direction::from_key_code(key_code) {
            Some(direction) => self.jump(direction, now),
            None => Ok(JumpOutcome::Ignored),
        }
    }

    /// Periodic work: re-send the score while playing.
    pub fn tick(&mut self, now: EpochMillis) {
        let interval = self.config.score_report_interval.as_millis() as i64;
        let score = match self.session.as_mut() {
            Some(session) if now - session.last_score_report >= interval => {
                session.last_score_report = now;
                session.jump.score()
            }
            _ => return,
        };
        self.send_admin(Message::Score { score });
    }

    // =========================================================================
    // TRANSPORT EVENTS
    // =========================================================================

    /// Feed one transport event.
    pub fn handle(&mut self, event: TransportEvent, now: EpochMillis) -> Result<(), ClientError> {
        let is_admin = event.peer() == &self.config.admin_id;
        match event {
            TransportEvent::Open { peer } if is_admin => {
                if self.state == ClientState::Connecting {
                    info!("Connected to admin");
                    self.state = ClientState::InQueue(QueueState::Idle);
                    self.events.dispatch(&ClientEvent::ConnectionSuccess);
                } else {
                    debug!("Ignoring open from {} in {:?}", peer, self.state);
                }
                Ok(())
            }
            TransportEvent::Open { peer } => {
                self.on_peer_open(peer);
                Ok(())
            }
            TransportEvent::Data { peer, message } if is_admin => {
                self.on_admin_message(&peer, message, now)
            }
            TransportEvent::Data { peer, message } => self.on_peer_message(peer, message),
            TransportEvent::Close { .. } if is_admin => {
                if self.state != ClientState::Disconnected {
                    info!("Admin connection closed");
                    self.fail();
                }
                Ok(())
            }
            TransportEvent::Error { reason, .. } if is_admin => {
                if self.state != ClientState::Disconnected {
                    warn!("Admin connection error: {}", reason);
                    self.fail();
                }
                Ok(())
            }
            TransportEvent::Close { peer } | TransportEvent::Error { peer, .. } => {
                self.on_peer_close(peer);
                Ok(())
            }
        }
    }

    fn on_admin_message(
        &mut self,
        admin: &PeerId,
        message: Message,
        now: EpochMillis,
    ) -> Result<(), ClientError> {
        match message {
            Message::StartTime { start_time, server_time } => {
                if self.state == ClientState::InSession {
                    return Ok(());
                }
                let time_diff = now - server_time;
                self.time_diff = time_diff;
                self.state = ClientState::InQueue(QueueState::Starting { start_time, time_diff });
                self.events.dispatch(&ClientEvent::GameStartTimeReceived { start_time, time_diff });
                Ok(())
            }
            Message::Wait => {
                if let ClientState::InQueue(_) = self.state {
                    self.state = ClientState::InQueue(QueueState::Joining);
                    self.events.dispatch(&ClientEvent::WaitForOthers);
                }
                Ok(())
            }
            Message::Start { .. } if self.state == ClientState::InSession => {
                debug!("Ignoring start: already in a session");
                Ok(())
            }
            Message::Start { end_time, peer_ids, seed } => self.start(end_time, peer_ids, seed, now),
            Message::End { ranks } => {
                self.end(ranks);
                Ok(())
            }
            other => Err(ClientError::UnexpectedMessage {
                peer: admin.clone(),
                action: other.action(),
            }),
        }
    }

    fn start(
        &mut self,
        end_time: EpochMillis,
        roster: Vec<PeerId>,
        seed: String,
        now: EpochMillis,
    ) -> Result<(), ClientError> {
        let partition = match self.local_id.as_ref() {
            Some(me) if !roster.is_empty() => partition_roster(&roster, me),
            _ => None,
        };
        let partition = match partition {
            Some(partition) => partition,
            None => {
                let reason = if roster.is_empty() {
                    "empty roster".to_string()
                } else {
                    "roster does not include this client".to_string()
                };
                warn!("Cannot start session: {}", reason);
                self.fail();
                return Err(ClientError::InvalidRoster(reason));
            }
        };

        info!(
            "Session started: {} players, index {}, seed {}",
            roster.len(),
            partition.my_index,
            seed_fingerprint(&seed)
        );

        let mut session = ClientSession {
            roster: roster.clone(),
            partition,
            end_time,
            time_diff: self.time_diff,
            links: BTreeSet::new(),
            animals: BTreeMap::new(),
            platforms: BTreeMap::new(),
            jump: JumpController::new(PlatformSequence::new(seed.clone())),
            last_score_report: now,
        };

        // Links that opened early: keep the expected ones, drop the rest.
        for peer in std::mem::take(&mut self.pending) {
            if session.partition.incoming.contains(&peer) {
                session.links.insert(peer.clone());
                self.commands.push(Command::send(&peer, Message::Animal { animal_id: self.animal.clone() }));
            } else {
                debug!("Rejecting early link from {}", peer.short());
                self.commands.push(Command::Close { peer });
            }
        }
        for peer in &session.partition.outgoing {
            self.commands.push(Command::Connect { peer: peer.clone() });
        }

        self.session = Some(session);
        self.state = ClientState::InSession;
        self.send_admin(Message::Animal { animal_id: self.animal.clone() });

        self.events.dispatch(&ClientEvent::GameStart { seed, roster });
        self.events.dispatch(&ClientEvent::GameEndTimeReceived { end_time });
        Ok(())
    }

    fn end(&mut self, ranks: Vec<PeerId>) {
        let mut animals = BTreeMap::new();
        if let Some(session) = self.session.take() {
            animals = session.animals;
            for peer in session.links {
                self.commands.push(Command::Close { peer });
            }
        }
        self.commands.push(Command::Close { peer: self.config.admin_id.clone() });
        let my_rank = self
            .local_id
            .as_ref()
            .and_then(|me| ranks.iter().position(|p| p == me))
            .map(|i| i + 1);
        if let Some(me) = self.local_id.clone() {
            animals.insert(me, self.animal.clone());
        }

        info!("Session ended: rank {:?} of {}", my_rank, ranks.len());
        self.reset();
        self.events.dispatch(&ClientEvent::GameEnd { ranks, animals, my_rank });
    }

    fn on_peer_open(&mut self, peer: PeerId) {
        match self.session.as_mut() {
            Some(session) if session.expects(&peer) => {
                if session.links.insert(peer.clone()) {
                    debug!("Linked with {}", peer.short());
                    self.commands.push(Command::send(&peer, Message::Animal { animal_id: self.animal.clone() }));
                }
            }
            Some(_) => {
                debug!("Rejecting link from {}: not expected", peer.short());
                self.commands.push(Command::Close { peer });
            }
            None if matches!(self.state, ClientState::InQueue(_)) => {
                debug!("Holding early link from {}", peer.short());
                self.pending.insert(peer);
            }
            None => self.commands.push(Command::Close { peer }),
        }
    }

    fn on_peer_message(&mut self, peer: PeerId, message: Message) -> Result<(), ClientError> {
        let session = match self.session.as_mut() {
            Some(session) if session.links.contains(&peer) => session,
            _ => {
                debug!("Dropping {} from unlinked {}", message.action(), peer.short());
                return Ok(());
            }
        };
        match message {
            Message::Animal { animal_id } => {
                session.animals.insert(peer.clone(), animal_id.clone());
                self.events.dispatch(&ClientEvent::PeerAdd { peer, animal: animal_id });
                Ok(())
            }
            Message::Platform { platform_index } => {
                session.platforms.insert(peer.clone(), platform_index);
                self.events.dispatch(&ClientEvent::PeerPlatform { peer, platform_index });
                Ok(())
            }
            other => Err(ClientError::UnexpectedMessage {
                peer,
                action: other.action(),
            }),
        }
    }

    fn on_peer_close(&mut self, peer: PeerId) {
        self.pending.remove(&peer);
        if let Some(session) = self.session.as_mut() {
            if session.links.remove(&peer) {
                session.platforms.remove(&peer);
                info!("Peer {} left", peer.short());
                self.events.dispatch(&ClientEvent::PeerRemove { peer });
            }
        }
    }

    fn send_admin(&mut self, message: Message) {
        let admin = self.config.admin_id.clone();
        self.commands.push(Command::send(&admin, message));
    }

    /// Tear everything down and surface a connection error.
    fn fail(&mut self) {
        if let Some(session) = self.session.take() {
            for peer in session.links {
                self.commands.push(Command::Close { peer });
            }
        }
        for peer in std::mem::take(&mut self.pending) {
            self.commands.push(Command::Close { peer });
        }
        self.commands.push(Command::Close { peer: self.config.admin_id.clone() });
        self.reset();
        self.events.dispatch(&ClientEvent::ConnectionError);
    }

    fn reset(&mut self) {
        self.state = ClientState::Disconnected;
        self.session = None;
        self.pending.clear();
        self.time_diff = 0;
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Ordered roster of the running session.
    pub fn roster(&self) -> Option<&[PeerId]> {
        self.session.as_ref().map(|s| s.roster.as_slice())
    }

    /// Dial plan of the running session.
    pub fn partition(&self) -> Option<&RosterPartition> {
        self.session.as_ref().map(|s| &s.partition)
    }

    /// Peers with an open link.
    pub fn links(&self) -> Vec<PeerId> {
        self.session
            .as_ref()
            .map(|s| s.links.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Known avatars of linked peers.
    pub fn peer_animals(&self) -> BTreeMap<PeerId, String> {
        self.session
            .as_ref()
            .map(|s| s.animals.clone())
            .unwrap_or_default()
    }

    /// Last platform index reported by `peer`.
    pub fn peer_platform(&self, peer: &PeerId) -> Option<u64> {
        self.session.as_ref().and_then(|s| s.platforms.get(peer).copied())
    }

    /// Local score.
    pub fn score(&self) -> u64 {
        self.session.as_ref().map(|s| s.jump.score()).unwrap_or(0)
    }

    /// Local platform index.
    pub fn platform_index(&self) -> u64 {
        self.session.as_ref().map(|s| s.jump.platform_index()).unwrap_or(0)
    }

    /// Platforms to draw, starting at `start`.
    pub fn platforms(&self, start: u64, count: usize) -> Vec<Platform> {
        self.session
            .as_ref()
            .map(|s| s.jump.sequence().window(start, count))
            .unwrap_or_default()
    }

    /// Whether the character is mid-jump.
    pub fn is_jumping(&self, now: EpochMillis) -> bool {
        self.session.as_ref().map(|s| s.jump.is_jumping(now)).unwrap_or(false)
    }

    /// Provisional 1-based rank from reported platform indices.
    pub fn live_rank(&self) -> Option<usize> {
        let session = self.session.as_ref()?;
        let mine = session.jump.platform_index();
        let ahead = session.platforms.values().filter(|&&index| index > mine).count();
        Some(ahead + 1)
    }

    /// Seconds until the countdown ends, corrected for clock skew.
    pub fn countdown_remaining(&self, now: EpochMillis) -> Option<i64> {
        match self.state {
            ClientState::InQueue(QueueState::Starting { start_time, time_diff }) => {
                Some(seconds_until(start_time, now - time_diff))
            }
            _ => None,
        }
    }

    /// Seconds until the session ends, corrected for clock skew.
    pub fn session_remaining(&self, now: EpochMillis) -> Option<i64> {
        self.session
            .as_ref()
            .map(|s| seconds_until(s.end_time, now - s.time_diff))
    }
}
