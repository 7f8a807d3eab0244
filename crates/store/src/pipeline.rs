//! One build cycle from raw submissions to a published snapshot
//!
//! A cycle never fails outright. Whatever happens is written to the [`BuildReport`]; when a
//! step that guards the published index fails, the cycle is aborted and the previous snapshot
//! stays live.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::Mutex;

use madmin_types::{ModuleManifest, VerificationStatus};

use crate::conflict::{ValidatedSubmission, detect_conflicts};
use crate::distribution::DistributionService;
use crate::enrich::StatsProvider;
use crate::error::ErrorKind;
use crate::index::{BuildResult, IndexBuilder, RegistryIndex};
use crate::report::{BuildOutcome, BuildReport, RejectedSubmission};
use crate::source::SubmissionSource;
use crate::state::StateStore;
use crate::validation::SchemaValidator;
use crate::verification::VerificationWorkflow;

pub struct BuildPipeline {
    source: Arc<dyn SubmissionSource>,
    validator: SchemaValidator,
    verification: Arc<VerificationWorkflow>,
    distribution: Arc<DistributionService>,
    /// Held for the whole cycle, so cycles never overlap.
    builder: Mutex<IndexBuilder>,
    state: Option<StateStore>,
    stats: Option<Arc<dyn StatsProvider>>,
    last_report: RwLock<Option<BuildReport>>,
}

impl BuildPipeline {
    pub fn new(
        source: Arc<dyn SubmissionSource>,
        validator: SchemaValidator,
        verification: Arc<VerificationWorkflow>,
        distribution: Arc<DistributionService>,
        builder: IndexBuilder,
    ) -> Self {
        Self {
            source,
            validator,
            verification,
            distribution,
            builder: Mutex::new(builder),
            state: None,
            stats: None,
            last_report: RwLock::new(None),
        }
    }

    pub fn with_state_store(mut self, state: StateStore) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_stats_provider(mut self, provider: Arc<dyn StatsProvider>) -> Self {
        self.stats = Some(provider);
        self
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// Report of the most recent cycle, if any ran.
    pub fn last_report(&self) -> Option<BuildReport> {
        self.last_report
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run one build cycle and return its report.
    pub async fn run_cycle(&self) -> BuildReport {
        let mut builder = self.builder.lock().await;
        let mut report = BuildReport::start();
        tracing::info!(cycle = %report.cycle_id, source = self.source.name(), "Starting build cycle");

        let outcome = match self.execute(&mut builder, &mut report).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                tracing::error!(cycle = %report.cycle_id, reason = %reason, "Build cycle aborted");
                BuildOutcome::aborted(reason)
            }
        };
        drop(builder);

        let report = report.finish(outcome);
        match &report.outcome {
            BuildOutcome::Published { sequence, .. } => tracing::info!(
                cycle = %report.cycle_id,
                sequence,
                accepted = report.accepted.len(),
                rejected = report.rejected.len(),
                held = report.held.len(),
                "Build cycle published a new snapshot"
            ),
            BuildOutcome::Unchanged { sequence, .. } => tracing::info!(
                cycle = %report.cycle_id,
                sequence,
                rejected = report.rejected.len(),
                "Build cycle found no changes"
            ),
            BuildOutcome::Aborted { .. } => {}
        }

        *self.last_report.write().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
        report
    }

    async fn execute(
        &self,
        builder: &mut IndexBuilder,
        report: &mut BuildReport,
    ) -> std::result::Result<BuildOutcome, String> {
        let submissions = self
            .source
            .fetch_submissions()
            .await
            .map_err(|e| format!("could not read submissions: {}", e))?;
        report.submissions = submissions.len();

        let mut validated = Vec::with_capacity(submissions.len());
        for submission in submissions {
            match self.validator.validate(&submission.bytes, &submission.source) {
                Ok(manifest) => {
                    tracing::debug!(source = %submission.source, id = %manifest.id, "Submission accepted by validator");
                    validated.push(ValidatedSubmission {
                        source: submission.source,
                        manifest,
                    });
                }
                Err(violation) => {
                    tracing::warn!(
                        source = %submission.source,
                        errors = violation.errors.len(),
                        "Submission failed validation"
                    );
                    report.rejected.push(RejectedSubmission {
                        identifier: submitted_identifier(&submission.bytes),
                        source: submission.source,
                        kind: violation.kind(),
                        reasons: violation.errors.iter().map(ToString::to_string).collect(),
                    });
                }
            }
        }

        let before = self
            .verification
            .refresh()
            .await
            .map_err(|e| format!("could not read verification records: {}", e))?;
        let outcome = detect_conflicts(validated, &before);
        report.rejected.extend(outcome.rejected);
        report.conflicts.extend(outcome.conflicts);
        report.held = outcome.held.iter().map(|s| s.manifest.id.clone()).collect();

        let ledger = self
            .verification
            .observe(
                outcome
                    .accepted
                    .iter()
                    .chain(&outcome.held)
                    .map(|s| &s.manifest),
            )
            .await
            .map_err(|e| format!("could not record verification sightings: {}", e))?;

        let mut manifests: Vec<ModuleManifest> = Vec::with_capacity(outcome.accepted.len());
        for submission in outcome.accepted {
            if ledger.status(&submission.manifest.id) == VerificationStatus::Rejected {
                tracing::warn!(id = %submission.manifest.id, "Excluding rejected identifier");
                report.rejected.push(RejectedSubmission {
                    source: submission.source,
                    identifier: Some(submission.manifest.id.clone()),
                    kind: ErrorKind::ReviewRejected,
                    reasons: vec![format!(
                        "identifier '{}' was rejected by a reviewer",
                        submission.manifest.id
                    )],
                });
            } else {
                manifests.push(submission.manifest);
            }
        }

        let current = self.distribution.snapshot();

        if let Some(provider) = &self.stats {
            for manifest in &mut manifests {
                match provider.fetch_stats(&manifest.repository).await {
                    Ok(Some(stats)) => stats.apply_to(&mut manifest.stats),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(id = %manifest.id, error = %e, "Could not fetch repository stats");
                        report
                            .warnings
                            .push(format!("stats for '{}' unavailable: {}", manifest.id, e));
                        // Keep the last published numbers rather than resetting them.
                        if let Some(previous) = current
                            .get(&manifest.id)
                            .filter(|p| p.repository == manifest.repository)
                        {
                            manifest.stats = previous.stats.clone();
                        }
                    }
                }
            }
        }

        let built = match builder.build(manifests, &ledger, &current) {
            Ok(BuildResult::Built(index)) => index,
            Ok(BuildResult::Unchanged) => {
                report.accepted = published_ids(&current);
                return Ok(BuildOutcome::Unchanged {
                    sequence: current.sequence(),
                    fingerprint: current.fingerprint().to_string(),
                });
            }
            Err(e) => return Err(e.to_string()),
        };

        if let Some(state) = &self.state {
            state
                .save_next_sequence(builder.next_sequence())
                .await
                .map_err(|e| format!("could not persist sequence counter: {}", e))?;
            state
                .save_snapshot(&built)
                .await
                .map_err(|e| format!("could not persist snapshot {}: {}", built.sequence(), e))?;
        }

        let published = self
            .distribution
            .publish(built)
            .map_err(|e| format!("could not publish snapshot: {}", e))?;
        report.accepted = published_ids(&published);

        if let Some(state) = &self.state {
            if let Err(e) = state.write_legacy_export(&published).await {
                tracing::warn!(error = %e, "Could not write modules.json export");
                report
                    .warnings
                    .push(format!("modules.json export failed: {}", e));
            }
        }

        Ok(BuildOutcome::Published {
            sequence: published.sequence(),
            fingerprint: published.fingerprint().to_string(),
        })
    }
}

fn published_ids(snapshot: &RegistryIndex) -> Vec<String> {
    snapshot.manifests().iter().map(|m| m.id.clone()).collect()
}

/// Best effort identifier of a submission that failed validation, for the report.
fn submitted_identifier(bytes: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use url::Url;

    use crate::enrich::RepositoryStats;
    use crate::error::{Result, StoreError};
    use crate::source::{MemorySource, Submission};
    use crate::verification::{ReviewAction, VerificationLedger};

    fn module(id: &str, repository: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": id,
            "name": id,
            "description": "test module",
            "repository": repository,
            "author": { "name": "Tester" },
            "category": "networking",
        }))
        .unwrap()
    }

    fn pipeline(source: Arc<MemorySource>) -> BuildPipeline {
        BuildPipeline::new(
            source,
            SchemaValidator::default(),
            Arc::new(VerificationWorkflow::new(VerificationLedger::new())),
            Arc::new(DistributionService::new(4)),
            IndexBuilder::new(1),
        )
    }

    #[tokio::test]
    async fn test_cycle_reports_every_submission() {
        let source = Arc::new(MemorySource::new(vec![
            Submission::new("a.json", module("adguard", "https://github.com/acme/adguard")),
            Submission::new("b.json", b"{\"id\": \"broken\"}".to_vec()),
            Submission::new("c.json", b"not json".to_vec()),
        ]));
        let pipeline = pipeline(source);

        let report = pipeline.run_cycle().await;

        assert_eq!(report.sequence(), Some(1));
        assert_eq!(report.submissions, 3);
        assert_eq!(report.accepted, vec!["adguard"]);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].identifier.as_deref(), Some("broken"));
        assert_eq!(report.rejected[1].identifier, None);
        assert!(pipeline.last_report().is_some());
    }

    #[tokio::test]
    async fn test_rejected_identifier_is_excluded() {
        let source = Arc::new(MemorySource::new(vec![Submission::new(
            "vpn.json",
            module("vpn-guard", "https://github.com/acme/vpn-guard"),
        )]));
        let pipeline = pipeline(source);
        pipeline.run_cycle().await;

        for target in [VerificationStatus::Pending, VerificationStatus::Rejected] {
            pipeline
                .verification
                .apply_review(ReviewAction {
                    identifier: "vpn-guard".to_string(),
                    reviewer: "dana".to_string(),
                    target,
                    note: String::new(),
                    expected_revision: None,
                })
                .await
                .unwrap();
        }

        let report = pipeline.run_cycle().await;
        assert!(report.accepted.is_empty());
        assert_eq!(
            report.rejected_with(ErrorKind::ReviewRejected).count(),
            1
        );
        assert!(pipeline.distribution.snapshot().get("vpn-guard").is_none());
    }

    struct FlakyStats;

    #[async_trait]
    impl StatsProvider for FlakyStats {
        async fn fetch_stats(&self, repository: &Url) -> Result<Option<RepositoryStats>> {
            if repository.path().contains("broken") {
                return Err(StoreError::NetworkError("rate limited".to_string()));
            }
            Ok(Some(RepositoryStats {
                stars: Some(7),
                version: Some("1.2.0".to_string()),
                ..Default::default()
            }))
        }
    }

    #[tokio::test]
    async fn test_enrichment_failures_are_warnings() {
        let source = Arc::new(MemorySource::new(vec![
            Submission::new("a.json", module("adguard", "https://github.com/acme/adguard")),
            Submission::new("b.json", module("broken-stats", "https://github.com/acme/broken")),
        ]));
        let pipeline = pipeline(source).with_stats_provider(Arc::new(FlakyStats));

        let report = pipeline.run_cycle().await;
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.warnings.len(), 1);

        let snapshot = pipeline.distribution.snapshot();
        assert_eq!(snapshot.get("adguard").unwrap().stats.stars, 7);
        assert_eq!(snapshot.get("broken-stats").unwrap().stats.version, "0.0.0");
    }

    /// Answers once, then fails like a rate limited API.
    struct RateLimitedStats {
        answered: AtomicBool,
    }

    #[async_trait]
    impl StatsProvider for RateLimitedStats {
        async fn fetch_stats(&self, _repository: &Url) -> Result<Option<RepositoryStats>> {
            if self.answered.swap(true, Ordering::SeqCst) {
                return Err(StoreError::NetworkError("rate limited".to_string()));
            }
            Ok(Some(RepositoryStats {
                stars: Some(42),
                version: Some("3.1.0".to_string()),
                ..Default::default()
            }))
        }
    }

    #[tokio::test]
    async fn test_failed_stats_fetch_keeps_published_stats() {
        let source = Arc::new(MemorySource::new(vec![Submission::new(
            "a.json",
            module("adguard", "https://github.com/acme/adguard"),
        )]));
        let pipeline = pipeline(source).with_stats_provider(Arc::new(RateLimitedStats {
            answered: AtomicBool::new(false),
        }));

        let first = pipeline.run_cycle().await;
        assert_eq!(first.sequence(), Some(1));

        let second = pipeline.run_cycle().await;
        assert_eq!(second.warnings.len(), 1);
        assert!(matches!(second.outcome, BuildOutcome::Unchanged { sequence: 1, .. }));

        let snapshot = pipeline.distribution.snapshot();
        let stats = &snapshot.get("adguard").unwrap().stats;
        assert_eq!(stats.stars, 42);
        assert_eq!(stats.version, "3.1.0");
    }
}
