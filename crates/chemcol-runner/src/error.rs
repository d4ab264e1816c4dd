use std::path::PathBuf;
use thiserror::Error;

/// Failures the controller raises itself. They travel inside `anyhow::Error`
/// so callers can `downcast_ref` to tell a fatal startup problem from a
/// per-column one.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("required input file missing: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("run ledger missing at {} (only an initial run may start without one)", path.display())]
    MissingLedger { path: PathBuf },

    #[error("variable `{name}` not found in {}", path.display())]
    MissingVariable { name: String, path: PathBuf },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("grid {nx}x{ny} cannot be encoded (layer {layer} must be a single digit)")]
    GridTooLarge { layer: u32, nx: u32, ny: u32 },

    #[error("backend failed for run {run_id}: {status}")]
    BackendFailed { run_id: String, status: String },

    #[error("backend finished run {run_id} without writing {}", path.display())]
    MissingResult { run_id: String, path: PathBuf },

    #[error("column {column} has no completed neighbours to average")]
    EmptyNeighbourhood { column: String },

    #[error("height {height} is outside the levels of column {column}")]
    HeightOutOfRange { column: String, height: f64 },

    #[error("ledger records no completed runs to export")]
    NoCompletedRuns,

    #[error("column {column} did not complete in the latest pass")]
    UnknownColumn { column: String },

    #[error("invalid column identifier: {raw:?}")]
    InvalidColumn { raw: String },
}
