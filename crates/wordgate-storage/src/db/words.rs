use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{helpers, Database};
use crate::models::Word;

fn word_from_row(row: &Row<'_>) -> rusqlite::Result<Word> {
    Ok(Word {
        id: row.get(0)?,
        word: row.get(1)?,
        definition: row.get(2)?,
        learned: row.get::<_, i32>(3)? != 0,
        created_at: helpers::parse_datetime(&row.get::<_, String>(4)?)?,
    })
}

impl Database {
    // ==================== Word Methods ====================

    /// Add a word, returning its id
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (e.g. the word already exists)
    pub fn add_word(&self, word: &str, definition: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO words (word, definition, learned, created_at) VALUES (?1, ?2, 0, ?3)",
            params![word, definition, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List words, optionally only the unlearned ones
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn list_words(&self, unlearned_only: bool) -> Result<Vec<Word>> {
        let sql = if unlearned_only {
            "SELECT id, word, definition, learned, created_at FROM words WHERE learned = 0 ORDER BY id"
        } else {
            "SELECT id, word, definition, learned, created_at FROM words ORDER BY id"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let words = stmt
            .query_map([], word_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(words)
    }

    /// Pick a random word that has not been learned yet
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn random_unlearned_word(&self) -> Result<Option<Word>> {
        let word = self
            .conn
            .query_row(
                "SELECT id, word, definition, learned, created_at
                 FROM words WHERE learned = 0 ORDER BY RANDOM() LIMIT 1",
                [],
                word_from_row,
            )
            .optional()?;
        Ok(word)
    }

    /// Mark a word as learned. Returns false when no such word exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails
    pub fn mark_word_learned(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("UPDATE words SET learned = 1 WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}
