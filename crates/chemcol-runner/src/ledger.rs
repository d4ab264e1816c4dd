//! Append-only run ledger.
//!
//! The ledger is a plain text file an operator can `tail`. Three line shapes
//! carry structure and are written verbatim:
//!
//! ```text
//! Run 2-212
//! CfgFilePath: /out/runtime/HD189-run-2-212-cfgFile.txt
//! OutputFilePath: /out/runtime/HD189-run-2-212-output.json
//! ```
//!
//! Everything else is timestamped narration that parsers skip. The file is
//! read once when opened; afterwards the in-memory event list is extended by
//! this process's own appends, so queries within a pass never re-read it.

use crate::error::ControllerError;
use crate::fsutil::{atomic_write_bytes, ensure_dir};
use crate::run::{run_id_from_artifact, RunId};
use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    RunMarker(RunId),
    ConfigRecorded(PathBuf),
    ResultRecorded(PathBuf),
    Note(String),
}

impl LedgerEvent {
    fn render(&self) -> String {
        match self {
            LedgerEvent::RunMarker(id) => format!("Run {}", id),
            LedgerEvent::ConfigRecorded(p) => format!("CfgFilePath: {}", p.display()),
            LedgerEvent::ResultRecorded(p) => format!("OutputFilePath: {}", p.display()),
            LedgerEvent::Note(text) => text.clone(),
        }
    }

    fn parse(line: &str, patterns: &Patterns) -> Self {
        if let Some(caps) = patterns.run.captures(line) {
            if let Ok(id) = format!("{}-{}", &caps[1], &caps[2]).parse() {
                return LedgerEvent::RunMarker(id);
            }
        }
        if let Some(caps) = patterns.config.captures(line) {
            return LedgerEvent::ConfigRecorded(PathBuf::from(caps[1].trim()));
        }
        if let Some(caps) = patterns.result.captures(line) {
            return LedgerEvent::ResultRecorded(PathBuf::from(caps[1].trim()));
        }
        LedgerEvent::Note(line.to_string())
    }
}

#[derive(Debug)]
struct Patterns {
    run: Regex,
    config: Regex,
    result: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        Ok(Self {
            run: Regex::new(r"^Run (\d+)-(\S+)\s*$")?,
            config: Regex::new(r"^CfgFilePath:\s*(.+)$")?,
            result: Regex::new(r"^OutputFile\w*Path:\s*(.+)$")?,
        })
    }
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    events: Vec<LedgerEvent>,
}

impl Ledger {
    /// Start an empty ledger, replacing whatever history was at `path`.
    pub fn create(path: &Path, header: &[String]) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let mut text = String::new();
        let mut events = Vec::new();
        for line in header {
            let note = LedgerEvent::Note(stamp(line));
            text.push_str(&note.render());
            text.push('\n');
            events.push(note);
        }
        atomic_write_bytes(path, text.as_bytes())?;
        Ok(Self {
            path: path.to_path_buf(),
            events,
        })
    }

    /// Open existing history. A missing file means the prior state is
    /// inconsistent, not that this is a first run.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ControllerError::MissingLedger {
                path: path.to_path_buf(),
            }
            .into());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("read ledger {}", path.display()))?;
        let patterns = Patterns::new()?;
        let events = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| LedgerEvent::parse(l, &patterns))
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            events,
        })
    }

    pub fn append(&mut self, event: LedgerEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("append to ledger {}", self.path.display()))?;
        writeln!(file, "{}", event.render())?;
        file.sync_data()?;
        self.events.push(event);
        Ok(())
    }

    pub fn note(&mut self, message: impl AsRef<str>) -> Result<()> {
        self.append(LedgerEvent::Note(stamp(message.as_ref())))
    }

    pub fn read_all(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn config_paths(&self) -> Vec<&Path> {
        self.events
            .iter()
            .filter_map(|e| match e {
                LedgerEvent::ConfigRecorded(p) => Some(p.as_path()),
                _ => None,
            })
            .collect()
    }

    pub fn result_paths(&self) -> Vec<&Path> {
        self.events
            .iter()
            .filter_map(|e| match e {
                LedgerEvent::ResultRecorded(p) => Some(p.as_path()),
                _ => None,
            })
            .collect()
    }

    pub fn last_generation(&self) -> Option<u64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                LedgerEvent::RunMarker(id) => Some(id.generation),
                _ => None,
            })
            .max()
    }

    pub fn next_generation(&self) -> u64 {
        self.last_generation().map_or(1, |g| g + 1)
    }

    /// Result artifacts of the most recent generation that recorded any,
    /// oldest first, one per column (a later record for a column wins).
    pub fn latest_results(&self) -> Vec<(RunId, PathBuf)> {
        let recorded: Vec<(RunId, &Path)> = self
            .result_paths()
            .into_iter()
            .filter_map(|p| run_id_from_artifact(p).map(|id| (id, p)))
            .collect();
        let Some(latest) = recorded.last().map(|(id, _)| id.generation) else {
            return Vec::new();
        };
        let mut out: Vec<(RunId, PathBuf)> = Vec::new();
        for (id, path) in recorded {
            if id.generation != latest {
                continue;
            }
            out.retain(|(existing, _)| existing.column != id.column);
            out.push((id, path.to_path_buf()));
        }
        out
    }
}

fn stamp(message: &str) -> String {
    format!("[{}] {}", Utc::now().to_rfc3339(), message)
}
