/// Word list and learning statistics
use anyhow::Result;
use clap::Subcommand;
use tabled::{Table, Tabled};
use wordgate_storage::Database;

use super::helpers::{format_remaining, truncate_str};

#[derive(Subcommand, Debug)]
pub enum WordAction {
    /// Add a word to learn
    Add { word: String, definition: String },
    /// List stored words
    List {
        /// Only words not learned yet
        #[arg(long)]
        unlearned: bool,
    },
}

#[derive(Tabled)]
struct WordRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Word")]
    word: String,
    #[tabled(rename = "Definition")]
    definition: String,
    #[tabled(rename = "Learned")]
    learned: &'static str,
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "Completed")]
    completed_at: String,
    #[tabled(rename = "Word")]
    word: String,
    #[tabled(rename = "Dwell")]
    dwell: String,
}

pub fn handle_word_command(action: WordAction) -> Result<()> {
    let db = Database::new(None)?;
    match action {
        WordAction::Add { word, definition } => {
            let word = word.trim();
            let definition = definition.trim();
            if word.is_empty() || definition.is_empty() {
                anyhow::bail!("Both a word and a definition are required");
            }
            let id = db.add_word(word, definition)?;
            println!("Added '{word}' (ID: {id})");
        }
        WordAction::List { unlearned } => {
            let words = db.list_words(unlearned)?;
            if words.is_empty() {
                println!("No words yet. Add one with `wordgate word add <word> <definition>`.");
                return Ok(());
            }
            let rows: Vec<WordRow> = words
                .into_iter()
                .map(|w| WordRow {
                    id: w.id,
                    word: w.word,
                    definition: truncate_str(&w.definition, 50),
                    learned: if w.learned { "yes" } else { "no" },
                })
                .collect();
            println!("{}", Table::new(rows));
        }
    }
    Ok(())
}

pub fn show_stats() -> Result<()> {
    let db = Database::new(None)?;
    let stats = db.get_learning_stats()?;

    println!("Words learned: {}", stats.learned_words_count);
    println!(
        "Time spent learning: {}",
        format_remaining(stats.time_spent_seconds)
    );
    if let Some(last) = stats.last_learned_at {
        println!(
            "Last learned: {}",
            last.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
        );
    }

    let sessions = db.recent_learning_sessions(10)?;
    if sessions.is_empty() {
        return Ok(());
    }

    let words = db.list_words(false)?;
    let rows: Vec<SessionRow> = sessions
        .into_iter()
        .map(|s| SessionRow {
            completed_at: s
                .completed_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            word: s
                .word_id
                .and_then(|id| words.iter().find(|w| w.id == id))
                .map_or_else(|| "-".to_string(), |w| w.word.clone()),
            dwell: format!("{}s", s.dwell_seconds),
        })
        .collect();
    println!("\nRecent sessions:");
    println!("{}", Table::new(rows));
    Ok(())
}
