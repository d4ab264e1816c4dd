//! Decide whether a column's configuration is equivalent to one already run.
//!
//! Equivalence is structural: both artifacts parse into the same set of
//! `(name, value)` pairs once the ignore-list names are removed. The scan is
//! linear over history, oldest first, and the first match wins.

use crate::artifact::{ArtifactError, ConfigArtifact};
use crate::literal::Literal;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    names: BTreeSet<String>,
}

impl IgnoreList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FreshReason {
    OverridePending,
    NoHistory,
    Unparsable(String),
    NoMatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Reuse(PathBuf),
    Fresh(FreshReason),
}

#[derive(Debug, Clone)]
pub struct DedupEngine {
    ignore: IgnoreList,
}

impl DedupEngine {
    pub fn new(ignore: IgnoreList) -> Self {
        Self { ignore }
    }

    pub fn comparable(
        &self,
        artifact: &ConfigArtifact,
    ) -> Result<BTreeMap<String, Literal>, ArtifactError> {
        let mut vars = artifact.typed_variables()?;
        vars.retain(|name, _| !self.ignore.contains(name));
        Ok(vars)
    }

    /// Classify `candidate` against `prior` config artifacts in ledger order.
    /// `prior` must not include the candidate's own recorded copy.
    pub fn classify(
        &self,
        candidate: &ConfigArtifact,
        override_pending: bool,
        prior: &[&Path],
    ) -> Verdict {
        if override_pending {
            return Verdict::Fresh(FreshReason::OverridePending);
        }
        let wanted = match self.comparable(candidate) {
            Ok(vars) => vars,
            Err(e) => {
                warn!(error = %e, "candidate configuration not comparable, running fresh");
                return Verdict::Fresh(FreshReason::Unparsable(e.to_string()));
            }
        };
        if prior.is_empty() {
            return Verdict::Fresh(FreshReason::NoHistory);
        }
        for path in prior {
            let artifact = match ConfigArtifact::read(path) {
                Ok(a) => a,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable prior configuration");
                    continue;
                }
            };
            match self.comparable(&artifact) {
                Ok(vars) if vars == wanted => {
                    debug!(path = %path.display(), "matched prior configuration");
                    return Verdict::Reuse(path.to_path_buf());
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "prior configuration not comparable");
                }
            }
        }
        Verdict::Fresh(FreshReason::NoMatch)
    }
}
