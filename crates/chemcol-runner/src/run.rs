use anyhow::{anyhow, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_SUFFIX: &str = "cfgFile.txt";
pub const OVERRIDE_SUFFIX: &str = "column-override.json";

/// `{generation}-{column}`. The generation counts controller lifetimes; the
/// column is the internal digit string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId {
    pub generation: u64,
    pub column: String,
}

impl RunId {
    pub fn new(generation: u64, column: impl Into<String>) -> Self {
        Self {
            generation,
            column: column.into(),
        }
    }

    pub fn previous(&self) -> Option<RunId> {
        self.generation
            .checked_sub(1)
            .filter(|g| *g > 0)
            .map(|g| RunId::new(g, self.column.clone()))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.column)
    }
}

impl FromStr for RunId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (generation, column) = s
            .split_once('-')
            .ok_or_else(|| anyhow!("run id {:?} lacks a generation", s))?;
        let generation = generation
            .parse()
            .map_err(|_| anyhow!("run id {:?} has a non-numeric generation", s))?;
        if column.is_empty() {
            return Err(anyhow!("run id {:?} lacks a column", s));
        }
        Ok(Self::new(generation, column))
    }
}

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub runtime_dir: PathBuf,
    pub out_name: String,
    pub result_extension: String,
}

impl RunPaths {
    pub fn file(&self, run: &RunId, suffix: &str) -> PathBuf {
        self.runtime_dir
            .join(format!("{}-run-{}-{}", self.out_name, run, suffix))
    }

    pub fn config(&self, run: &RunId) -> PathBuf {
        self.file(run, CONFIG_SUFFIX)
    }

    pub fn result(&self, run: &RunId) -> PathBuf {
        self.file(run, &format!("output.{}", self.result_extension))
    }

    pub fn column_override(&self, run: &RunId) -> PathBuf {
        self.file(run, OVERRIDE_SUFFIX)
    }
}

pub fn run_token(run: &RunId) -> String {
    format!("-run-{}-", run)
}

/// Recover the run id from an artifact path such as
/// `HD189-run-3-212-output.json`.
pub fn run_id_from_artifact(path: &Path) -> Option<RunId> {
    let name = path.file_name()?.to_str()?;
    let start = name.rfind("-run-")? + "-run-".len();
    let rest = &name[start..];
    // generation-column-suffix: the id ends at the second dash.
    let first = rest.find('-')?;
    let second = rest[first + 1..].find('-')? + first + 1;
    rest[..second].parse().ok()
}
