//! Peers
//!
//! A peer is one transport endpoint: a player or the admin. Ids are assigned
//! by the transport and are globally unique for the lifetime of a connection.

use std::fmt;

use serde::{Serialize, Deserialize};

use crate::core::clock::EpochMillis;

/// Well-known id every client dials first.
pub const ADMIN_PEER_ID: &str = "jumpyadmin";

/// Avatar catalogue. The first entry is the default.
pub const ANIMALS: [&str; 28] = [
    "Bat",
    "Brown Bear",
    "Cat",
    "Crocodile",
    "Duck",
    "Elephant",
    "Fox",
    "Frog",
    "Hamster",
    "Hippo",
    "Horse",
    "Koala",
    "Lion",
    "Monkey",
    "Moose",
    "Panda",
    "Parrot",
    "Penguin",
    "Pig",
    "Polar Bear",
    "Rabbit",
    "Rhino",
    "Shark",
    "Sheep",
    "Snow Owl",
    "Tiger",
    "Walrus",
    "Wolf",
];

/// Avatar used until the player picks one.
pub const DEFAULT_ANIMAL: &str = ANIMALS[0];

/// Transport-assigned peer identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap an id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The admin's well-known id.
    pub fn admin() -> Self {
        Self::new(ADMIN_PEER_ID)
    }

    /// Fresh random id (uuid v4).
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Matchmaking status of a peer, as seen by the admin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    /// Connected, has not asked to play.
    Idle,
    /// Asked to play, waiting for a second player.
    Joining,
    /// Part of a running countdown.
    Starting,
    /// In a session.
    Playing,
}

/// Admin-side record of one connected peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Transport id.
    pub id: PeerId,
    /// Matchmaking status.
    pub status: PeerStatus,
    /// Highest score reported in the current session.
    pub score: u64,
    /// Chosen avatar.
    pub animal: String,
    /// Last known platform index.
    pub platform_index: u64,
    /// When the connection opened.
    pub connected_at: EpochMillis,
}

impl Peer {
    /// Freshly connected peer.
    pub fn new(id: PeerId, connected_at: EpochMillis) -> Self {
        Self {
            id,
            status: PeerStatus::Idle,
            score: 0,
            animal: DEFAULT_ANIMAL.to_string(),
            platform_index: 0,
            connected_at,
        }
    }

    /// Record a reported score. Scores never decrease within a session.
    pub fn report_score(&mut self, score: u64) {
        self.score = self.score.max(score);
    }
}

/// True if `animal` is in the catalogue.
pub fn is_known_animal(animal: &str) -> bool {
    ANIMALS.contains(&animal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_animal_catalogue() {
        assert_eq!(ANIMALS.len(), 28);
        assert_eq!(DEFAULT_ANIMAL, "Bat");
        assert!(is_known_animal("Snow Owl"));
        assert!(!is_known_animal("Dragon"));
    }

    #[test]
    fn test_peer_id_serializes_as_string() {
        let id = PeerId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert_eq!(PeerId::admin().as_str(), ADMIN_PEER_ID);
    }

    #[test]
    fn test_random_ids_are_unique() {
        let a = PeerId::random();
        let b = PeerId::random();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_short_id_of_short_string() {
        assert_eq!(PeerId::new("bob").short(), "bob");
    }

    #[test]
    fn test_score_is_monotonic() {
        let mut peer = Peer::new(PeerId::new("a"), 0);
        assert_eq!(peer.status, PeerStatus::Idle);
        peer.report_score(320);
        peer.report_score(160);
        assert_eq!(peer.score, 320);
    }
}
