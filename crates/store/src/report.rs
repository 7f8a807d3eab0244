use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// A submission that will not be published this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedSubmission {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub kind: ErrorKind,
    pub reasons: Vec<String>,
}

/// A batch level problem that needs a human to resolve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub identifier: String,
    pub kind: ErrorKind,
    /// Every submission involved, the retained one first.
    pub sources: Vec<String>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildOutcome {
    Published { sequence: u64, fingerprint: String },
    Unchanged { sequence: u64, fingerprint: String },
    /// `kind` is always [`ErrorKind::BuildAborted`], so consumers can classify it alongside
    /// rejected submissions.
    Aborted { kind: ErrorKind, reason: String },
}

impl BuildOutcome {
    pub fn aborted(reason: impl Into<String>) -> Self {
        BuildOutcome::Aborted {
            kind: ErrorKind::BuildAborted,
            reason: reason.into(),
        }
    }
}

/// Operator facing summary of one build cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: BuildOutcome,
    pub submissions: usize,
    /// Identifiers published in the resulting snapshot.
    pub accepted: Vec<String>,
    /// Identifiers held back until a reviewer acts.
    pub held: Vec<String>,
    pub rejected: Vec<RejectedSubmission>,
    pub conflicts: Vec<Conflict>,
    pub warnings: Vec<String>,
}

impl BuildReport {
    pub(crate) fn start() -> Self {
        let now = Utc::now();
        Self {
            cycle_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            outcome: BuildOutcome::aborted("cycle did not complete"),
            submissions: 0,
            accepted: Vec::new(),
            held: Vec::new(),
            rejected: Vec::new(),
            conflicts: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn finish(mut self, outcome: BuildOutcome) -> Self {
        self.outcome = outcome;
        self.finished_at = Utc::now();
        self
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, BuildOutcome::Aborted { .. })
    }

    /// Sequence of the snapshot live after this cycle, if the cycle completed.
    pub fn sequence(&self) -> Option<u64> {
        match &self.outcome {
            BuildOutcome::Published { sequence, .. } | BuildOutcome::Unchanged { sequence, .. } => {
                Some(*sequence)
            }
            BuildOutcome::Aborted { .. } => None,
        }
    }

    pub fn rejected_with(&self, kind: ErrorKind) -> impl Iterator<Item = &RejectedSubmission> {
        self.rejected.iter().filter(move |r| r.kind == kind)
    }
}
