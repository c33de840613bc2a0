//! Persistence seams of the engine and their SQLite implementations.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use wordgate_storage::models::{LearningSession, MonitorRecord};
use wordgate_storage::Database;

use crate::gate::{ContentItem, ContentStore};
use crate::machine::{EnforcementState, PersistedMonitorState};

/// Where the monitor keeps its state across restarts
pub trait StateStore: Send {
    /// # Errors
    ///
    /// Returns an error if the store cannot be read
    fn load(&self) -> Result<Option<PersistedMonitorState>>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be written
    fn save(&self, state: &PersistedMonitorState) -> Result<()>;
}

/// Volatile store; clones share the same slot
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    slot: Arc<Mutex<Option<PersistedMonitorState>>>,
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<PersistedMonitorState>> {
        Ok(*self.slot.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn save(&self, state: &PersistedMonitorState) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(*state);
        Ok(())
    }
}

impl StateStore for Database {
    fn load(&self) -> Result<Option<PersistedMonitorState>> {
        let Some(record) = self.load_monitor_state()? else {
            return Ok(None);
        };
        let Some(state) = EnforcementState::parse(&record.state) else {
            log::warn!("Unknown saved monitor state '{}', ignoring", record.state);
            return Ok(None);
        };
        Ok(Some(PersistedMonitorState {
            state,
            deadline: record.deadline,
            episode: record.episode,
        }))
    }

    fn save(&self, state: &PersistedMonitorState) -> Result<()> {
        self.save_monitor_state(&MonitorRecord {
            state: state.state.as_str().to_string(),
            deadline: state.deadline,
            episode: state.episode,
            updated_at: Utc::now(),
        })
    }
}

impl ContentStore for Database {
    fn fetch_random_unlearned_item(&self) -> Result<Option<ContentItem>> {
        Ok(self.random_unlearned_word()?.map(|word| ContentItem {
            id: word.id,
            word: word.word,
            definition: word.definition,
        }))
    }

    fn mark_learned(&self, id: i64) -> Result<()> {
        if !self.mark_word_learned(id)? {
            log::warn!("Word {id} no longer exists, nothing marked learned");
        }
        Ok(())
    }

    fn record_session(
        &self,
        item_id: Option<i64>,
        dwell_seconds: u64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.record_learning_session(&LearningSession::new(item_id, dwell_seconds, at))
    }
}
