//! JSON-lines journal: one serialized event per line, append-only.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use crate::engine::Ledger;
use crate::error::{Error, Result};
use crate::port::{Journal, JournalEvent};

/// Append-only journal backed by a JSONL file.
pub struct JsonlJournal {
    file: Mutex<File>,
    path: PathBuf,
}

impl JsonlJournal {
    /// Open (creating if needed) the journal at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// The journal file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every event back, skipping lines that no longer parse
    /// (a partial final line after a crash is expected, not fatal).
    pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<JournalEvent>> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "Skipping unreadable journal line"),
            }
        }
        Ok(events)
    }

    /// The most recent ledger checkpoint, for restart recovery. `None`
    /// when the journal is missing or holds no checkpoint yet.
    pub fn last_checkpoint(path: impl AsRef<Path>) -> Result<Option<Ledger>> {
        if !path.as_ref().exists() {
            return Ok(None);
        }
        let events = Self::read_events(path)?;
        Ok(events.into_iter().rev().find_map(|event| match event {
            JournalEvent::LedgerCheckpoint {
                balance,
                realized_pnl_today,
                reference_balance,
                ..
            } => Some(Ledger {
                balance,
                realized_pnl_today,
                reference_balance,
            }),
            _ => None,
        }))
    }
}

impl Journal for JsonlJournal {
    fn record(&self, event: &JournalEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut file = self.file.lock();
        writeln!(file, "{line}").map_err(|e| Error::Journal(e.to_string()))?;
        Ok(())
    }
}
