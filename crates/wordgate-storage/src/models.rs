use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Single-row user preferences that must survive restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Countdown length before the first enforcement of an episode
    pub delay_minutes: u32,
    pub updated_at: DateTime<Utc>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            delay_minutes: 15,
            updated_at: Utc::now(),
        }
    }
}

/// Durable record of the background monitor.
///
/// `state` holds the textual enforcement state (`INACTIVE`, `COUNTING_DOWN`,
/// `BLOCKING`); the engine owns its interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorRecord {
    pub state: String,
    pub deadline: Option<DateTime<Utc>>,
    pub episode: u64,
    pub updated_at: DateTime<Utc>,
}

/// Vocabulary entry used to gate a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub id: i64,
    pub word: String,
    pub definition: String,
    pub learned: bool,
    pub created_at: DateTime<Utc>,
}

/// One completed learning-gate session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSession {
    pub id: Uuid,
    pub word_id: Option<i64>,
    pub dwell_seconds: u64,
    pub completed_at: DateTime<Utc>,
}

impl LearningSession {
    #[must_use]
    pub fn new(word_id: Option<i64>, dwell_seconds: u64, completed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            word_id,
            dwell_seconds,
            completed_at,
        }
    }
}

/// Aggregated learning statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningStats {
    pub learned_words_count: u64,
    pub time_spent_seconds: u64,
    pub last_learned_at: Option<DateTime<Utc>>,
}
