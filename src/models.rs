// Core data structures for seqharvest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique batch identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BatchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A contiguous, half-open range of sequence numbers assigned to one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,

    /// First sequence number in the batch (inclusive)
    pub start: u64,

    /// First sequence number past the batch (exclusive)
    pub end: u64,

    pub created: DateTime<Utc>,

    #[serde(default)]
    pub completed: Option<DateTime<Utc>>,

    /// Number of delivery attempts reported by workers
    #[serde(default)]
    pub attempts: u64,

    /// Identity of the worker that last picked the batch up
    #[serde(default)]
    pub worker: Option<String>,

    #[serde(default, rename = "useragent")]
    pub user_agent: Option<String>,
}

impl Batch {
    /// Create a new, uncompleted batch covering `[start, end)`
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            id: BatchId::new(),
            start,
            end,
            created: Utc::now(),
            completed: None,
            attempts: 0,
            worker: None,
            user_agent: None,
        }
    }

    /// Number of sequence numbers covered
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a sequence number falls inside the batch
    pub fn contains(&self, seq: u64) -> bool {
        seq >= self.start && seq < self.end
    }

    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Worker identity with the SHA-256 digest of its shared secret
#[derive(Clone, PartialEq, Eq)]
pub struct WorkerCredential {
    pub identity: String,
    pub secret_digest: [u8; 32],
}

impl WorkerCredential {
    /// Build a credential from a plaintext secret
    pub fn from_secret(identity: impl Into<String>, secret: &str) -> Self {
        Self {
            identity: identity.into(),
            secret_digest: digest_secret(secret),
        }
    }
}

impl fmt::Debug for WorkerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerCredential")
            .field("identity", &self.identity)
            .field("secret_digest", &"<redacted>")
            .finish()
    }
}

/// SHA-256 digest of a worker secret
pub fn digest_secret(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

// ============================================================================
// Harvested records
// ============================================================================

/// Ability upgrade taken by a player
#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
#[serde(default)]
pub struct AbilityUpgrade {
    #[prost(uint32, tag = "1")]
    pub ability: u32,
    #[prost(uint32, tag = "2")]
    pub level: u32,
    #[prost(uint32, tag = "3")]
    pub time: u32,
}

/// Per-player match statistics
#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
#[serde(default)]
pub struct Player {
    #[prost(message, repeated, tag = "1")]
    pub ability_upgrades: Vec<AbilityUpgrade>,
    #[prost(uint32, tag = "2")]
    pub account_id: u32,
    #[prost(uint32, tag = "3")]
    pub assists: u32,
    #[prost(uint32, tag = "4")]
    pub deaths: u32,
    #[prost(uint32, tag = "5")]
    pub denies: u32,
    #[prost(uint32, tag = "6")]
    pub gold: u32,
    #[prost(uint32, tag = "7")]
    pub gold_per_min: u32,
    #[prost(uint32, tag = "8")]
    pub gold_spent: u32,
    #[prost(uint32, tag = "9")]
    pub hero_damage: u32,
    #[prost(uint32, tag = "10")]
    pub hero_healing: u32,
    #[prost(uint32, tag = "11")]
    pub hero_id: u32,
    #[prost(uint32, tag = "12")]
    pub item_0: u32,
    #[prost(uint32, tag = "13")]
    pub item_1: u32,
    #[prost(uint32, tag = "14")]
    pub item_2: u32,
    #[prost(uint32, tag = "15")]
    pub item_3: u32,
    #[prost(uint32, tag = "16")]
    pub item_4: u32,
    #[prost(uint32, tag = "17")]
    pub item_5: u32,
    #[prost(uint32, tag = "18")]
    pub kills: u32,
    #[prost(uint32, tag = "19")]
    pub last_hits: u32,
    #[prost(uint32, tag = "20")]
    pub leaver_status: u32,
    #[prost(uint32, tag = "21")]
    pub level: u32,
    #[prost(uint32, tag = "22")]
    pub player_slot: u32,
    #[prost(uint32, tag = "23")]
    pub tower_damage: u32,
    #[prost(uint32, tag = "24")]
    pub xp_per_min: u32,
}

/// A harvested match record
///
/// `match_seq_num` is the pagination cursor, `match_id` the storage key.
#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
#[serde(default)]
pub struct Match {
    #[prost(uint32, tag = "1")]
    pub barracks_status_dire: u32,
    #[prost(uint32, tag = "2")]
    pub barracks_status_radiant: u32,
    #[prost(uint32, tag = "3")]
    pub cluster: u32,
    #[prost(uint32, tag = "4")]
    pub duration: u32,
    #[prost(uint32, tag = "5")]
    pub first_blood_time: u32,
    #[prost(uint32, tag = "6")]
    pub game_mode: u32,
    #[prost(uint32, tag = "7")]
    pub human_players: u32,
    #[prost(uint32, tag = "8")]
    pub leagueid: u32,
    #[prost(uint32, tag = "9")]
    pub lobby_type: u32,
    #[prost(uint64, tag = "10")]
    pub match_id: u64,
    #[prost(uint64, tag = "11")]
    pub match_seq_num: u64,
    #[prost(message, repeated, tag = "12")]
    pub players: Vec<Player>,
    #[prost(uint32, tag = "13")]
    pub negative_votes: u32,
    #[prost(uint32, tag = "14")]
    pub positive_votes: u32,
    #[prost(bool, tag = "15")]
    pub radiant_win: bool,
    #[prost(uint64, tag = "16")]
    pub start_time: u64,
    #[prost(uint32, tag = "17")]
    pub tower_status_dire: u32,
    #[prost(uint32, tag = "18")]
    pub tower_status_radiant: u32,
}

impl Match {
    /// Storage key: the match id as 8 big-endian bytes
    pub fn storage_key(&self) -> [u8; 8] {
        self.match_id.to_be_bytes()
    }
}

/// One page of match history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchHistoryResult {
    pub matches: Vec<Match>,
    pub num_results: u32,
    pub results_remaining: u32,
    pub status: u32,
    pub total_results: u32,
}

/// Envelope returned by the match history endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchHistoryResponse {
    pub result: Option<MatchHistoryResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[test]
    fn test_batch_bounds() {
        let batch = Batch::new(100, 200);
        assert_eq!(batch.len(), 100);
        assert!(batch.contains(100));
        assert!(batch.contains(199));
        assert!(!batch.contains(200));
        assert!(!batch.contains(99));
        assert!(!batch.is_completed());
        assert_eq!(batch.to_string(), "[100, 200)");
    }

    #[test]
    fn test_batch_json_defaults() {
        let json = r#"{
            "id": "6f1c3a4e-2b7d-4c1e-9f3a-0d2b5e8c7a11",
            "start": 0,
            "end": 100000,
            "created": "2024-01-15T10:00:00Z"
        }"#;
        let batch: Batch = serde_json::from_str(json).unwrap();
        assert_eq!(batch.end, 100_000);
        assert_eq!(batch.attempts, 0);
        assert!(batch.completed.is_none());
        assert!(batch.worker.is_none());
    }

    #[test]
    fn test_batch_user_agent_field_name() {
        let mut batch = Batch::new(0, 10);
        batch.user_agent = Some("worker/1".to_string());
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["useragent"], "worker/1");
    }

    #[test]
    fn test_credential_debug_redacts_digest() {
        let cred = WorkerCredential::from_secret("w1", "hunter2");
        let debug = format!("{cred:?}");
        assert!(debug.contains("w1"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_match_decodes_from_steam_json() {
        let json = r#"{
            "match_id": 27110133,
            "match_seq_num": 27106798,
            "radiant_win": true,
            "duration": 2158,
            "players": [{"account_id": 4294967295, "hero_id": 5, "kills": 3}],
            "some_new_field": "ignored"
        }"#;
        let m: Match = serde_json::from_str(json).unwrap();
        assert_eq!(m.match_id, 27_110_133);
        assert_eq!(m.players.len(), 1);
        assert_eq!(m.players[0].account_id, u32::MAX);
        assert!(m.radiant_win);
    }

    #[test]
    fn test_match_binary_encoding_is_compact() {
        let m = Match {
            match_id: 42,
            match_seq_num: 7,
            duration: 1800,
            ..Default::default()
        };
        let bytes = m.encode_to_vec();
        assert!(bytes.len() < serde_json::to_vec(&m).unwrap().len());
        assert_eq!(Match::decode(bytes.as_slice()).unwrap(), m);
    }

    #[test]
    fn test_storage_key_is_big_endian() {
        let m = Match {
            match_id: 0x0102,
            ..Default::default()
        };
        assert_eq!(m.storage_key(), [0, 0, 0, 0, 0, 0, 1, 2]);
    }
}
