//! Wiring for a complete registry instance

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::RegistryConfig;
use crate::distribution::DistributionService;
use crate::error::{Result, StoreError};
use crate::index::{IndexBuilder, RegistryIndex};
use crate::pipeline::BuildPipeline;
use crate::report::BuildReport;
use crate::source::{DirectorySource, SubmissionSource};
use crate::state::StateStore;
use crate::validation::SchemaValidator;
use crate::verification::{ReviewAction, VerificationLedger, VerificationRecord, VerificationWorkflow};

/// Distribution service, verification workflow and build pipeline sharing one state directory.
pub struct Registry {
    config: RegistryConfig,
    distribution: Arc<DistributionService>,
    verification: Arc<VerificationWorkflow>,
    pipeline: Arc<BuildPipeline>,
    state: Option<StateStore>,
}

impl Registry {
    /// Open the registry described by `config`, reading submissions from its modules directory
    /// and resuming from whatever is stored in its state directory.
    pub async fn open(config: RegistryConfig) -> Result<Self> {
        let source = Arc::new(DirectorySource::new(&config.modules_dir));
        Self::open_with_source(config, source).await
    }

    pub async fn open_with_source(
        config: RegistryConfig,
        source: Arc<dyn SubmissionSource>,
    ) -> Result<Self> {
        config.validate()?;
        let state = StateStore::open(&config.state_dir, config.history_depth).await?;

        let mut snapshots = state.load_snapshots().await?;
        let current = snapshots.pop().unwrap_or_else(RegistryIndex::empty);
        let stored_next = state.load_next_sequence().await?.unwrap_or(1);
        let next_sequence = stored_next.max(current.sequence() + 1);
        let ledger = state.load_ledger().await?;

        tracing::info!(
            state_dir = %config.state_dir.display(),
            sequence = current.sequence(),
            modules = current.len(),
            history = snapshots.len(),
            verification_records = ledger.len(),
            "Restored registry state"
        );

        let distribution = Arc::new(DistributionService::with_snapshots(
            current,
            snapshots,
            config.history_depth,
        ));
        let verification =
            Arc::new(VerificationWorkflow::new(ledger).with_state_store(state.clone()));
        let pipeline = Self::assemble_pipeline(
            &config,
            source,
            verification.clone(),
            distribution.clone(),
            IndexBuilder::new(next_sequence),
        )?
        .with_state_store(state.clone());

        Ok(Self {
            config,
            distribution,
            verification,
            pipeline: Arc::new(pipeline),
            state: Some(state),
        })
    }

    /// A registry that keeps nothing on disk.
    pub fn in_memory(config: RegistryConfig, source: Arc<dyn SubmissionSource>) -> Result<Self> {
        config.validate()?;
        let distribution = Arc::new(DistributionService::new(config.history_depth));
        let verification = Arc::new(VerificationWorkflow::new(VerificationLedger::new()));
        let pipeline = Self::assemble_pipeline(
            &config,
            source,
            verification.clone(),
            distribution.clone(),
            IndexBuilder::new(1),
        )?;

        Ok(Self {
            config,
            distribution,
            verification,
            pipeline: Arc::new(pipeline),
            state: None,
        })
    }

    fn assemble_pipeline(
        config: &RegistryConfig,
        source: Arc<dyn SubmissionSource>,
        verification: Arc<VerificationWorkflow>,
        distribution: Arc<DistributionService>,
        builder: IndexBuilder,
    ) -> Result<BuildPipeline> {
        let pipeline = BuildPipeline::new(
            source,
            SchemaValidator::new(config.validation.clone()),
            verification,
            distribution,
            builder,
        );

        if !config.enrich_stats {
            return Ok(pipeline);
        }

        #[cfg(feature = "github")]
        let pipeline = {
            let provider = crate::enrich::GithubStatsProvider::new(config.github_token.as_deref())?;
            pipeline.with_stats_provider(Arc::new(provider))
        };
        #[cfg(not(feature = "github"))]
        tracing::warn!("enrich_stats is set but this build has no stats provider");

        Ok(pipeline)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn distribution(&self) -> &Arc<DistributionService> {
        &self.distribution
    }

    pub fn verification(&self) -> &Arc<VerificationWorkflow> {
        &self.verification
    }

    pub fn pipeline(&self) -> &Arc<BuildPipeline> {
        &self.pipeline
    }

    pub fn state(&self) -> Option<&StateStore> {
        self.state.as_ref()
    }

    pub async fn rebuild(&self) -> BuildReport {
        self.pipeline.run_cycle().await
    }

    pub async fn review(&self, action: ReviewAction) -> Result<VerificationRecord> {
        self.verification.apply_review(action).await
    }

    /// Write `modules.json` for the live snapshot.
    pub async fn export(&self) -> Result<PathBuf> {
        let state = self.state.as_ref().ok_or_else(|| {
            StoreError::ConfigError("this registry has no state directory".to_string())
        })?;
        state.write_legacy_export(&self.distribution.snapshot()).await
    }
}
