use crate::fsutil::ensure_dir;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Executed,
    Reused,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Executed => "executed",
            RunStatus::Reused => "reused",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub generation: u64,
    pub column: String,
    pub config_path: PathBuf,
    pub result_path: Option<PathBuf>,
    pub status: RunStatus,
    #[serde(default)]
    pub reused_from: Option<String>,
    pub config_digest: String,
    pub recorded_at: String,
}

#[derive(Debug, Clone)]
pub struct RunIndex {
    path: PathBuf,
}

impl RunIndex {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn append(&self, record: &RunRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open run index {}", self.path.display()))?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        file.sync_data()?;
        Ok(())
    }

    pub fn records(&self) -> Result<Vec<RunRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("read run index {}", self.path.display()))?;
        let mut out = Vec::new();
        for (lineno, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: RunRecord = serde_json::from_str(line).with_context(|| {
                format!("run index parse error at {}:{}", self.path.display(), lineno + 1)
            })?;
            out.push(record);
        }
        Ok(out)
    }
}
