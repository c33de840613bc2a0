//! Database operations split into domain-specific modules.
//!
//! This module re-exports the main Database struct and all its operations.

mod helpers;
mod learning_sessions;
mod words;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

use crate::migrations;
use crate::models::{MonitorRecord, Settings};

/// Database connection wrapper
pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    /// Create a new database connection
    ///
    /// # Errors
    ///
    /// Returns an error if database directory creation, connection opening, or schema initialization fails
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = db_path.unwrap_or_else(Self::default_db_path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path).context("Failed to open database connection")?;
        migrations::init_schema(&conn)?;

        log::info!("Database initialized at: {}", path.display());

        Ok(Self { conn })
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        migrations::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get default database path
    fn default_db_path() -> PathBuf {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("wordgate");
        path.push("wordgate.db");
        path
    }

    // ==================== Settings Methods ====================

    /// Get the settings row, creating it with defaults on first access
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_settings(&self) -> Result<Settings> {
        let result = self
            .conn
            .query_row(
                "SELECT delay_minutes, updated_at FROM settings WHERE id = 1",
                [],
                |row| {
                    Ok(Settings {
                        delay_minutes: row.get(0)?,
                        updated_at: helpers::parse_datetime(&row.get::<_, String>(1)?)?,
                    })
                },
            )
            .optional()?;

        if let Some(settings) = result {
            Ok(settings)
        } else {
            let settings = Settings::default();
            self.update_settings(&settings)?;
            Ok(settings)
        }
    }

    /// Update settings
    ///
    /// # Errors
    ///
    /// Returns an error if the database update operation fails
    pub fn update_settings(&self, settings: &Settings) -> Result<()> {
        self.conn.execute(
            "INSERT INTO settings (id, delay_minutes, updated_at)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                delay_minutes = ?1,
                updated_at = ?2",
            params![settings.delay_minutes, settings.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Persist a new delay preference
    ///
    /// # Errors
    ///
    /// Returns an error if the database update operation fails
    pub fn set_delay_minutes(&self, delay_minutes: u32) -> Result<()> {
        self.update_settings(&Settings {
            delay_minutes,
            updated_at: Utc::now(),
        })
    }

    // ==================== Monitor State Methods ====================

    /// Load the durable monitor record, if one was ever saved
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or a stored timestamp is malformed
    pub fn load_monitor_state(&self) -> Result<Option<MonitorRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT state, deadline, episode, updated_at FROM monitor_state WHERE id = 1",
                [],
                |row| {
                    Ok(MonitorRecord {
                        state: row.get(0)?,
                        deadline: helpers::parse_optional_datetime(row.get(1)?)?,
                        episode: row.get::<_, i64>(2)?.try_into().unwrap_or_default(),
                        updated_at: helpers::parse_datetime(&row.get::<_, String>(3)?)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Replace the durable monitor record
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails
    pub fn save_monitor_state(&self, record: &MonitorRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO monitor_state (id, state, deadline, episode, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                state = ?1,
                deadline = ?2,
                episode = ?3,
                updated_at = ?4",
            params![
                record.state,
                record.deadline.map(|d| d.to_rfc3339()),
                i64::try_from(record.episode).unwrap_or(i64::MAX),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
