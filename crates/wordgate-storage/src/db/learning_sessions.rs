use anyhow::Result;
use rusqlite::params;

use super::{helpers, Database};
use crate::models::{LearningSession, LearningStats};

impl Database {
    // ==================== Learning Session Methods ====================

    /// Record a completed learning-gate session
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails
    pub fn record_learning_session(&self, session: &LearningSession) -> Result<()> {
        self.conn.execute(
            "INSERT INTO learning_sessions (id, word_id, dwell_seconds, completed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session.id.to_string(),
                session.word_id,
                i64::try_from(session.dwell_seconds).unwrap_or(i64::MAX),
                session.completed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent sessions first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn recent_learning_sessions(&self, limit: usize) -> Result<Vec<LearningSession>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, word_id, dwell_seconds, completed_at
             FROM learning_sessions ORDER BY completed_at DESC LIMIT ?1",
        )?;
        let sessions = stmt
            .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok(LearningSession {
                    id: helpers::parse_uuid(&row.get::<_, String>(0)?)?,
                    word_id: row.get(1)?,
                    dwell_seconds: row.get::<_, i64>(2)?.try_into().unwrap_or_default(),
                    completed_at: helpers::parse_datetime(&row.get::<_, String>(3)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Aggregate statistics over all recorded sessions
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_learning_stats(&self) -> Result<LearningStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(dwell_seconds), 0), MAX(completed_at)
             FROM learning_sessions",
            [],
            |row| {
                Ok(LearningStats {
                    learned_words_count: row.get::<_, i64>(0)?.try_into().unwrap_or_default(),
                    time_spent_seconds: row.get::<_, i64>(1)?.try_into().unwrap_or_default(),
                    last_learned_at: helpers::parse_optional_datetime(row.get(2)?)?,
                })
            },
        )?;
        Ok(stats)
    }
}
