use anyhow::Result;
use rusqlite::Connection;

/// Initialize database schema
///
/// # Errors
///
/// Returns an error if table or index creation fails
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Settings table - a single row holding the delay preference
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            delay_minutes INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // Monitor state table - survives restarts of both daemon and clients
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            state TEXT NOT NULL,
            deadline TEXT,
            episode INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // Words table - content used by the learning gate
    conn.execute(
        "CREATE TABLE IF NOT EXISTS words (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            word TEXT NOT NULL UNIQUE,
            definition TEXT NOT NULL,
            learned INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_words_learned ON words(learned)",
        [],
    )?;

    // Learning sessions table - one row per completed gate
    conn.execute(
        "CREATE TABLE IF NOT EXISTS learning_sessions (
            id TEXT PRIMARY KEY,
            word_id INTEGER,
            dwell_seconds INTEGER NOT NULL,
            completed_at TEXT NOT NULL,
            FOREIGN KEY (word_id) REFERENCES words(id)
        )",
        [],
    )?;

    Ok(())
}
