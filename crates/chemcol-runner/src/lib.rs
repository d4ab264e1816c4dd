//! Column-run controller for an external photochemistry backend.
//!
//! Builds one configuration artifact per grid column, reuses earlier results
//! whose configuration is structurally identical, and translates results to
//! and from the schema shared with sibling modules.

pub mod artifact;
pub mod assemble;
pub mod backend;
pub mod config;
pub mod dedup;
pub mod error;
pub mod export;
pub mod fsutil;
pub mod grid;
pub mod index;
pub mod ledger;
pub mod literal;
pub mod run;
pub mod schedule;
pub mod translate;

pub use artifact::ConfigArtifact;
pub use assemble::{Assembled, Assembler};
pub use backend::{Backend, BackendJob, BackendStatus, ProcessBackend};
pub use config::{ControllerConfig, Inputs, RunType};
pub use dedup::{DedupEngine, IgnoreList, Verdict};
pub use error::ControllerError;
pub use export::{export, ColumnExport, ColumnResult, ExportPackage, ExportRequest};
pub use index::{RunIndex, RunRecord, RunStatus};
pub use ledger::{Ledger, LedgerEvent};
pub use literal::{parse_literal, Literal};
pub use run::RunId;
pub use schedule::{ColumnOutcome, ColumnReport, PassReport, PassRequest, Scheduler};
pub use translate::{ExternalColumn, ImportMap};
