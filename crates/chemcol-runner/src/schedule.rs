//! One scheduling pass over the grid.
//!
//! Per column: configure, classify, then either execute the backend or copy
//! a matching earlier run forward, and record. Columns run strictly in
//! sequence; a failed column stops the pass and everything recorded before it
//! stays in place.

use crate::assemble::{Assembled, Assembler};
use crate::backend::{Backend, BackendJob};
use crate::config::{ControllerConfig, Inputs, RunType};
use crate::dedup::{DedupEngine, IgnoreList, Verdict};
use crate::error::ControllerError;
use crate::fsutil::{atomic_write_bytes, ensure_dir, sha256_bytes};
use crate::index::{RunIndex, RunRecord, RunStatus};
use crate::ledger::{Ledger, LedgerEvent};
use crate::literal::Literal;
use crate::run::{run_id_from_artifact, run_token, RunId, CONFIG_SUFFIX};
use crate::translate::{ExternalColumn, ImportMap};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct PassRequest {
    pub overrides: BTreeMap<String, Literal>,
    pub imports: ImportMap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnOutcome {
    Planned { artifact: String },
    Executed { result_path: PathBuf },
    Reused { reused_from: String, result_path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnReport {
    pub run_id: String,
    pub column: ExternalColumn,
    pub config_path: PathBuf,
    pub outcome: ColumnOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub generation: u64,
    pub run_type: RunType,
    pub columns: Vec<ColumnReport>,
}

impl PassReport {
    pub fn executed(&self) -> usize {
        self.columns
            .iter()
            .filter(|c| matches!(c.outcome, ColumnOutcome::Executed { .. }))
            .count()
    }

    pub fn reused(&self) -> usize {
        self.columns
            .iter()
            .filter(|c| matches!(c.outcome, ColumnOutcome::Reused { .. }))
            .count()
    }
}

pub struct Scheduler<B: Backend> {
    cfg: ControllerConfig,
    inputs: Inputs,
    backend: B,
    dedup: DedupEngine,
}

impl<B: Backend> Scheduler<B> {
    pub fn new(cfg: ControllerConfig, inputs: Inputs, backend: B) -> Self {
        let dedup = DedupEngine::new(IgnoreList::new(inputs.ignore_list.iter().cloned()));
        Self {
            cfg,
            inputs,
            backend,
            dedup,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn run(&mut self, run_type: RunType, request: PassRequest) -> Result<PassReport> {
        let grid = self.inputs.grid(&self.cfg.grid)?;
        let assembler = Assembler::new(
            self.cfg.clone(),
            self.inputs.clone(),
            run_type,
            request.overrides,
            request.imports,
        );

        if run_type == RunType::Plan {
            let ledger_path = self.cfg.ledger_path();
            let generation = if ledger_path.exists() {
                Ledger::open(&ledger_path)?.next_generation()
            } else {
                1
            };
            let mut columns = Vec::new();
            for (index, column) in grid.columns().into_iter().enumerate() {
                let run = RunId::new(generation, column.encode());
                let assembled = assembler.assemble(&run, &column, index)?;
                debug!(run_id = %run, "planned column");
                columns.push(ColumnReport {
                    run_id: run.to_string(),
                    column: ExternalColumn::from(column),
                    config_path: assembled.config_path(),
                    outcome: ColumnOutcome::Planned {
                        artifact: assembled.artifact.render(),
                    },
                });
            }
            return Ok(PassReport {
                generation,
                run_type,
                columns,
            });
        }

        let mut ledger = match run_type {
            RunType::Initial => self.start_fresh(grid.nx, grid.ny)?,
            RunType::Reuse => Ledger::open(&self.cfg.ledger_path())?,
            RunType::Plan | RunType::ExportOnly => {
                return Err(ControllerError::InvalidParameter {
                    name: "run_type".to_string(),
                    reason: format!("{} does not schedule columns", run_type.as_str()),
                }
                .into())
            }
        };
        let generation = ledger.next_generation();
        let index = RunIndex::new(&self.cfg.index_path());
        info!(
            generation,
            run_type = run_type.as_str(),
            nx = grid.nx,
            ny = grid.ny,
            "starting scheduling pass"
        );
        ledger.note(format!(
            "generation {} started ({} run, {}x{} columns)",
            generation,
            run_type.as_str(),
            grid.nx,
            grid.ny
        ))?;

        let mut columns = Vec::new();
        for (position, column) in grid.columns().into_iter().enumerate() {
            let run = RunId::new(generation, column.encode());
            info!(run_id = %run, "configuring column");
            let assembled = assembler.assemble(&run, &column, position)?;
            ledger.append(LedgerEvent::RunMarker(run.clone()))?;
            let config_path = assembler.persist(&assembled)?;
            if let Some(slot) = &self.cfg.working_slot {
                atomic_write_bytes(slot, assembled.artifact.render().as_bytes())?;
            }
            ledger.append(LedgerEvent::ConfigRecorded(config_path.clone()))?;
            debug!(run_id = %run, path = %config_path.display(), "configuration recorded");

            let prior: Vec<&Path> = ledger
                .config_paths()
                .into_iter()
                .filter(|p| *p != config_path.as_path())
                .collect();
            let verdict = self.dedup.classify(
                &assembled.artifact,
                assembled.column_override.is_some(),
                &prior,
            );
            let source = match verdict {
                Verdict::Reuse(prior_config) => {
                    let source = reusable_source(&ledger, &prior_config);
                    if source.is_none() {
                        warn!(
                            run_id = %run,
                            path = %prior_config.display(),
                            "matching run has no recorded result, executing"
                        );
                    }
                    source
                }
                Verdict::Fresh(reason) => {
                    info!(run_id = %run, reason = ?reason, "fresh configuration");
                    None
                }
            };

            let (outcome, status, reused_from, result_path) = match source {
                Some(source) => {
                    info!(run_id = %run, reused_from = %source, "copying forward");
                    let result_path = match self.copy_forward(&source, &assembled) {
                        Ok(path) => path,
                        Err(err) => {
                            record_failure(&assembled, &mut ledger, &index, &err)?;
                            return Err(err);
                        }
                    };
                    let outcome = ColumnOutcome::Reused {
                        reused_from: source.to_string(),
                        result_path: result_path.clone(),
                    };
                    (outcome, RunStatus::Reused, Some(source.to_string()), result_path)
                }
                None => {
                    let result_path = self.execute(&assembled, &mut ledger, &index)?;
                    let outcome = ColumnOutcome::Executed {
                        result_path: result_path.clone(),
                    };
                    (outcome, RunStatus::Executed, None, result_path)
                }
            };
            let note = match &reused_from {
                Some(source) => format!("Run {} complete (reused from {})", run, source),
                None => format!("Run {} complete ({})", run, status.as_str()),
            };
            ledger.append(LedgerEvent::ResultRecorded(result_path.clone()))?;
            index.append(&record(&assembled, &config_path, Some(result_path), status, reused_from))?;
            ledger.note(note)?;
            info!(run_id = %run, status = status.as_str(), "column complete");

            columns.push(ColumnReport {
                run_id: run.to_string(),
                column: ExternalColumn::from(column),
                config_path,
                outcome,
            });
        }

        ledger.note(format!("generation {} finished", generation))?;
        Ok(PassReport {
            generation,
            run_type,
            columns,
        })
    }

    /// Clear the runtime directory (ledger, index and every run artifact)
    /// and start a new ledger.
    fn start_fresh(&self, nx: u32, ny: u32) -> Result<Ledger> {
        let runtime = self.cfg.runtime_dir();
        if runtime.exists() {
            fs::remove_dir_all(&runtime)
                .with_context(|| format!("clear runtime directory {}", runtime.display()))?;
        }
        ensure_dir(&runtime)?;
        let header = vec![
            "controller created".to_string(),
            format!("master directory {}", self.cfg.master_dir.display()),
            format!("grid {}x{} in layer {}", nx, ny, self.cfg.grid.layer),
        ];
        Ledger::create(&self.cfg.ledger_path(), &header)
    }

    fn execute(
        &mut self,
        assembled: &Assembled,
        ledger: &mut Ledger,
        index: &RunIndex,
    ) -> Result<PathBuf> {
        let run = &assembled.run_id;
        let job = BackendJob {
            run_id: run.clone(),
            config_path: assembled.config_path(),
            result_path: assembled.result_path(),
            runtime_dir: self.cfg.runtime_dir(),
        };
        info!(run_id = %run, "executing backend");
        let status = self.backend.execute(&job)?;
        let failure = if !status.success() {
            Some(ControllerError::BackendFailed {
                run_id: run.to_string(),
                status: status.to_string(),
            })
        } else if !job.result_path.exists() {
            Some(ControllerError::MissingResult {
                run_id: run.to_string(),
                path: job.result_path.clone(),
            })
        } else {
            None
        };
        if let Some(err) = failure {
            let err = anyhow::Error::from(err);
            record_failure(assembled, ledger, index, &err)?;
            return Err(err);
        }
        Ok(job.result_path)
    }

    /// Copy every artifact of `source` except its configuration to the same
    /// name under the current run id. Returns the new result path.
    fn copy_forward(&self, source: &RunId, assembled: &Assembled) -> Result<PathBuf> {
        let runtime = self.cfg.runtime_dir();
        let from = run_token(source);
        let to = run_token(&assembled.run_id);
        for entry in WalkDir::new(&runtime).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.contains(&from) || name.ends_with(CONFIG_SUFFIX) {
                continue;
            }
            let target = runtime.join(name.replace(&from, &to));
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} to {}", entry.path().display(), target.display())
            })?;
            debug!(from = %entry.path().display(), to = %target.display(), "copied artifact");
        }
        let result_path = assembled.result_path();
        if !result_path.exists() {
            return Err(ControllerError::MissingResult {
                run_id: assembled.run_id.to_string(),
                path: result_path,
            }
            .into());
        }
        Ok(result_path)
    }
}

fn reusable_source(ledger: &Ledger, prior_config: &Path) -> Option<RunId> {
    let source = run_id_from_artifact(prior_config)?;
    ledger
        .result_paths()
        .into_iter()
        .any(|p| run_id_from_artifact(p).as_ref() == Some(&source) && p.exists())
        .then_some(source)
}

fn record_failure(
    assembled: &Assembled,
    ledger: &mut Ledger,
    index: &RunIndex,
    err: &anyhow::Error,
) -> Result<()> {
    let run = &assembled.run_id;
    warn!(run_id = %run, error = %err, "column failed, stopping pass");
    index.append(&record(
        assembled,
        &assembled.config_path(),
        None,
        RunStatus::Failed,
        None,
    ))?;
    ledger.note(format!("Run {} failed: {:#}", run, err))
}

fn record(
    assembled: &Assembled,
    config_path: &Path,
    result_path: Option<PathBuf>,
    status: RunStatus,
    reused_from: Option<String>,
) -> RunRecord {
    RunRecord {
        run_id: assembled.run_id.to_string(),
        generation: assembled.run_id.generation,
        column: assembled.run_id.column.clone(),
        config_path: config_path.to_path_buf(),
        result_path,
        status,
        reused_from,
        config_digest: sha256_bytes(assembled.artifact.render().as_bytes()),
        recorded_at: Utc::now().to_rfc3339(),
    }
}
