//! Batch level conflict detection
//!
//! Runs over every submission that passed schema validation in one build cycle. Nothing here
//! is resolved silently: duplicate losers are rejected with a reason and attested-field
//! changes are held, both listed as conflicts for a human.

use std::collections::BTreeMap;

use madmin_types::ModuleManifest;

use crate::error::ErrorKind;
use crate::report::{Conflict, RejectedSubmission};
use crate::verification::{AttestedFields, VerificationLedger};

/// A manifest that passed schema validation, with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSubmission {
    pub source: String,
    pub manifest: ModuleManifest,
}

#[derive(Debug, Clone, Default)]
pub struct ConflictOutcome {
    /// Safe to publish, one per identifier.
    pub accepted: Vec<ValidatedSubmission>,
    /// Kept out of the index until a reviewer approves the change.
    pub held: Vec<ValidatedSubmission>,
    pub rejected: Vec<RejectedSubmission>,
    pub conflicts: Vec<Conflict>,
}

/// Partition a batch into accepted, held and rejected submissions.
///
/// For duplicate identifiers the submission with the lexicographically smallest source path
/// wins. Winners whose category or repository differ from the fields attested at their last
/// approval are held with [`ErrorKind::VerifiedFieldMismatch`].
pub fn detect_conflicts(
    batch: Vec<ValidatedSubmission>,
    ledger: &VerificationLedger,
) -> ConflictOutcome {
    let mut by_id: BTreeMap<String, Vec<ValidatedSubmission>> = BTreeMap::new();
    for submission in batch {
        by_id
            .entry(submission.manifest.id.clone())
            .or_default()
            .push(submission);
    }

    let mut outcome = ConflictOutcome::default();

    for (identifier, mut candidates) in by_id {
        candidates.sort_by(|a, b| a.source.cmp(&b.source));
        let mut candidates = candidates.into_iter();
        let Some(winner) = candidates.next() else {
            continue;
        };
        let losers: Vec<ValidatedSubmission> = candidates.collect();

        if !losers.is_empty() {
            tracing::warn!(
                identifier = %identifier,
                winner = %winner.source,
                losers = losers.len(),
                "Duplicate identifier in batch"
            );
            for loser in &losers {
                outcome.rejected.push(RejectedSubmission {
                    source: loser.source.clone(),
                    identifier: Some(identifier.clone()),
                    kind: ErrorKind::DuplicateIdentifier,
                    reasons: vec![format!(
                        "identifier '{}' is also submitted by '{}', which takes precedence",
                        identifier, winner.source
                    )],
                });
            }
            outcome.conflicts.push(Conflict {
                identifier: identifier.clone(),
                kind: ErrorKind::DuplicateIdentifier,
                sources: std::iter::once(winner.source.clone())
                    .chain(losers.iter().map(|l| l.source.clone()))
                    .collect(),
                detail: format!(
                    "{} submissions share identifier '{}'; kept '{}'",
                    losers.len() + 1,
                    identifier,
                    winner.source
                ),
            });
        }

        let attested = ledger.get(&identifier).and_then(|r| r.attested.as_ref());
        let changes = attested
            .map(|fields| fields.differences(&AttestedFields::of(&winner.manifest)))
            .unwrap_or_default();

        if changes.is_empty() {
            outcome.accepted.push(winner);
        } else {
            tracing::warn!(
                identifier = %identifier,
                source = %winner.source,
                "Submission changes attested fields, holding for review"
            );
            outcome.conflicts.push(Conflict {
                identifier: identifier.clone(),
                kind: ErrorKind::VerifiedFieldMismatch,
                sources: vec![winner.source.clone()],
                detail: format!(
                    "changes reviewed fields without re-review: {}",
                    changes.join("; ")
                ),
            });
            outcome.held.push(winner);
        }
    }

    outcome
}
