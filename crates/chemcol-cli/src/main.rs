use anyhow::{anyhow, Context, Result};
use chemcol_runner::fsutil::atomic_write_json_pretty;
use chemcol_runner::{
    Backend, BackendJob, BackendStatus, ColumnOutcome, ControllerConfig, ControllerError,
    ExportPackage, ExportRequest, ExternalColumn, ImportMap, Inputs, Ledger, Literal, PassReport,
    PassRequest, ProcessBackend, RunIndex, RunType, Scheduler,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chemcol", version = "0.3.0", about = "Column-run controller for a photochemistry backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    #[value(name = "initial")]
    Initial,
    #[value(name = "reuse")]
    Reuse,
    #[value(name = "plan")]
    Plan,
}

impl From<ModeArg> for RunType {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Initial => RunType::Initial,
            ModeArg::Reuse => RunType::Reuse,
            ModeArg::Plan => RunType::Plan,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule every column of the grid.
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, value_enum, default_value = "initial")]
        mode: ModeArg,
        /// YAML mapping of configuration variables to force on every column.
        #[arg(long)]
        overrides: Option<PathBuf>,
        /// JSON mapping from `(layer, x, y)` to per-column overrides.
        #[arg(long)]
        import: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Package the latest generation's results for another module.
    Export {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        neighbourhood: bool,
        /// External column as `L,X,Y`; repeatable.
        #[arg(long = "column")]
        columns: Vec<String>,
        /// Height in external units, used with --column.
        #[arg(long)]
        height: Option<f64>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// List recorded runs from the run index.
    History {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error(error_code(&err), format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chemcol_runner=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            config,
            mode,
            overrides,
            import,
            json,
        } => {
            let cfg = ControllerConfig::load(&config)?;
            let inputs = Inputs::load(&cfg)?;
            let request = PassRequest {
                overrides: match &overrides {
                    Some(path) => load_overrides(path)?,
                    None => BTreeMap::new(),
                },
                imports: match &import {
                    Some(path) => load_imports(path)?,
                    None => ImportMap::new(),
                },
            };
            let run_type = RunType::from(mode);
            debug!(config = %config.display(), run_type = run_type.as_str(), "loaded controller config");
            let report = if run_type == RunType::Plan {
                Scheduler::new(cfg, inputs, PlanOnly).run(run_type, request)?
            } else {
                let backend = ProcessBackend::new(cfg.backend.command.clone(), &cfg.framework_dir())?;
                Scheduler::new(cfg, inputs, backend).run(run_type, request)?
            };
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "executed": report.executed(),
                    "reused": report.reused(),
                    "report": serde_json::to_value(&report)?
                })));
            }
            print_report(&report);
        }
        Commands::Export {
            config,
            neighbourhood,
            columns,
            height,
            out,
            json,
        } => {
            let request = export_request(neighbourhood, &columns, height)?;
            let cfg = ControllerConfig::load(&config)?;
            let ledger = Ledger::open(&cfg.ledger_path())?;
            let package = chemcol_runner::export(&ledger, &request)?;
            if let Some(path) = &out {
                atomic_write_json_pretty(path, &package)?;
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "export",
                    "out": out.as_ref().map(|p| p.display().to_string()),
                    "package": serde_json::to_value(&package)?
                })));
            }
            print_package(&package);
            if let Some(path) = &out {
                println!("written: {}", path.display());
            }
        }
        Commands::History { config, json } => {
            let cfg = ControllerConfig::load(&config)?;
            let records = RunIndex::new(&cfg.index_path()).records()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "history",
                    "records": serde_json::to_value(&records)?
                })));
            }
            if records.is_empty() {
                println!("no runs recorded");
            }
            for r in &records {
                println!(
                    "{}\t{}\t{}\t{}",
                    r.run_id,
                    r.status.as_str(),
                    r.reused_from.as_deref().unwrap_or("-"),
                    r.result_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
    }
    Ok(None)
}

struct PlanOnly;

impl Backend for PlanOnly {
    fn execute(&mut self, job: &BackendJob) -> Result<BackendStatus> {
        Err(anyhow!("plan pass attempted to execute run {}", job.run_id))
    }
}

fn load_overrides(path: &Path) -> Result<BTreeMap<String, Literal>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read overrides {}", path.display()))?;
    let values: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(&raw)
        .with_context(|| format!("parse overrides {}", path.display()))?;
    let mut out = BTreeMap::new();
    for (name, value) in values {
        let as_json = serde_json::to_value(&value)?;
        let literal =
            Literal::try_from(&as_json).map_err(|reason| ControllerError::InvalidParameter {
                name: name.clone(),
                reason,
            })?;
        out.insert(name, literal);
    }
    Ok(out)
}

fn load_imports(path: &Path) -> Result<ImportMap> {
    let raw = fs::read_to_string(path).with_context(|| format!("read import {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse import {}", path.display()))
}

fn export_request(
    neighbourhood: bool,
    columns: &[String],
    height: Option<f64>,
) -> Result<ExportRequest> {
    match (neighbourhood, columns.is_empty(), height) {
        (true, true, None) => Ok(ExportRequest::Neighbourhood),
        (false, false, Some(height)) => {
            let columns = columns
                .iter()
                .map(|c| c.parse::<ExternalColumn>())
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ExportRequest::Levels { columns, height })
        }
        _ => Err(anyhow!(
            "choose either --neighbourhood or --column with --height"
        )),
    }
}

fn print_report(report: &PassReport) {
    println!("generation: {}", report.generation);
    println!("run_type: {}", report.run_type.as_str());
    for column in &report.columns {
        match &column.outcome {
            ColumnOutcome::Planned { .. } => {
                println!("{}\tplanned\t{}", column.run_id, column.config_path.display())
            }
            ColumnOutcome::Executed { result_path } => {
                println!("{}\texecuted\t{}", column.run_id, result_path.display())
            }
            ColumnOutcome::Reused {
                reused_from,
                result_path,
            } => println!(
                "{}\treused {}\t{}",
                column.run_id,
                reused_from,
                result_path.display()
            ),
        }
    }
    println!("executed: {}", report.executed());
    println!("reused: {}", report.reused());
}

fn print_package(package: &ExportPackage) {
    for (column, layer) in package {
        println!(
            "{}\tlevel {}\theight {}..{}\tpressure {}..{}\tT {}",
            column,
            layer.index,
            layer.lower_height,
            layer.upper_height,
            layer.lower_pressure,
            layer.upper_pressure,
            layer.level_temperature
        );
        for (species, density) in &layer.number_density {
            println!("  {}\t{:e}", species, density);
        }
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_code(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<ControllerError>() {
        Some(ControllerError::MissingInput { .. }) => "missing_input",
        Some(ControllerError::MissingLedger { .. }) => "missing_ledger",
        Some(ControllerError::BackendFailed { .. } | ControllerError::MissingResult { .. }) => {
            "backend_failed"
        }
        Some(ControllerError::NoCompletedRuns) => "no_completed_runs",
        Some(_) => "controller_error",
        None => "command_failed",
    }
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Export { json, .. }
        | Commands::History { json, .. } => *json,
    }
}
