//! The simulation backend seam.
//!
//! The controller treats the solver as opaque: it hands over one config
//! artifact path and expects a result artifact at the path derived from the
//! run id. Invocation is blocking.

use crate::error::ControllerError;
use crate::run::RunId;
use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BackendJob {
    pub run_id: RunId,
    pub config_path: PathBuf,
    pub result_path: PathBuf,
    pub runtime_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendStatus {
    pub code: Option<i32>,
}

impl BackendStatus {
    pub fn ok() -> Self {
        Self { code: Some(0) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => f.write_str("terminated by signal"),
        }
    }
}

pub trait Backend {
    /// Run one job to completion. An `Err` means the backend could not be
    /// started at all; a started run that fails is reported in the status.
    fn execute(&mut self, job: &BackendJob) -> Result<BackendStatus>;
}

/// Runs the configured argv with the artifact path appended, from the
/// framework directory.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    command: Vec<String>,
    working_dir: PathBuf,
}

impl ProcessBackend {
    pub fn new(command: Vec<String>, working_dir: &Path) -> Result<Self> {
        if command.first().map_or(true, |c| c.trim().is_empty()) {
            return Err(ControllerError::InvalidParameter {
                name: "backend.command".to_string(),
                reason: "command must name a program".to_string(),
            }
            .into());
        }
        Ok(Self {
            command,
            working_dir: working_dir.to_path_buf(),
        })
    }
}

impl Backend for ProcessBackend {
    fn execute(&mut self, job: &BackendJob) -> Result<BackendStatus> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        cmd.arg(&job.config_path);
        cmd.current_dir(&self.working_dir);
        cmd.env("CHEMCOL_CONFIG_PATH", &job.config_path);
        cmd.env("CHEMCOL_RUN_ID", job.run_id.to_string());
        cmd.env("CHEMCOL_RESULT_PATH", &job.result_path);
        cmd.env("CHEMCOL_RUNTIME_DIR", &job.runtime_dir);
        cmd.stdin(Stdio::null());
        debug!(run_id = %job.run_id, program = %self.command[0], "spawning backend");
        let status = cmd
            .status()
            .with_context(|| format!("spawn backend {} for run {}", self.command[0], job.run_id))?;
        Ok(BackendStatus {
            code: status.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_rejected() {
        assert!(ProcessBackend::new(vec![], Path::new(".")).is_err());
        assert!(ProcessBackend::new(vec![" ".to_string()], Path::new(".")).is_err());
    }

    #[test]
    fn status_reports_exit_code() {
        assert!(BackendStatus::ok().success());
        let failed = BackendStatus { code: Some(3) };
        assert!(!failed.success());
        assert_eq!(failed.to_string(), "exit code 3");
        assert_eq!(BackendStatus { code: None }.to_string(), "terminated by signal");
    }

    #[cfg(unix)]
    #[test]
    fn process_backend_passes_job_through_environment() {
        let dir = tempfile::tempdir().unwrap();
        let job = BackendJob {
            run_id: RunId::new(1, "200"),
            config_path: dir.path().join("cfg.txt"),
            result_path: dir.path().join("out.json"),
            runtime_dir: dir.path().to_path_buf(),
        };
        let script = "test \"$1\" = \"$CHEMCOL_CONFIG_PATH\" && echo \"$CHEMCOL_RUN_ID\" > \"$CHEMCOL_RESULT_PATH\"";
        let mut backend = ProcessBackend::new(
            vec!["sh".into(), "-c".into(), script.into(), "backend".into()],
            dir.path(),
        )
        .unwrap();
        assert!(backend.execute(&job).unwrap().success());
        assert_eq!(std::fs::read_to_string(&job.result_path).unwrap().trim(), "1-200");

        let mut failing =
            ProcessBackend::new(vec!["sh".into(), "-c".into(), "exit 7".into()], dir.path())
                .unwrap();
        assert_eq!(failing.execute(&job).unwrap().code, Some(7));
    }
}
