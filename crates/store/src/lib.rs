//! MADMIN Registry Store - manifest validation and index distribution
//!
//! This crate turns a directory of community submitted module manifests into versioned,
//! immutable registry snapshots and serves them to store clients.
//!
//! # Overview
//!
//! - **Validation**: raw JSON submissions are checked field by field, every problem reported
//! - **Conflict detection**: duplicate identifiers and unreviewed changes to attested fields
//! - **Index building**: sorted, fingerprinted snapshots with category and tag lookups
//! - **Distribution**: full fetch, single module lookup and incremental diffs, filtered by
//!   client compatibility
//! - **Verification**: reviewer driven trust status that survives rebuilds
//! - **Persistence**: snapshots, ledger and sequence counter under a state directory
//!
//! # Example
//!
//! ```rust,no_run
//! use madmin_store::{IndexQuery, Registry, RegistryConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::open(RegistryConfig::default()).await?;
//!
//! let report = registry.rebuild().await;
//! println!("cycle {} -> {:?}", report.cycle_id, report.outcome);
//!
//! let index = registry.distribution().fetch_index(&IndexQuery {
//!     client_version: Some("2.1.0".to_string()),
//!     ..Default::default()
//! })?;
//! for module in index.modules {
//!     println!("{} ({})", module.id, module.category);
//! }
//! # Ok(())
//! # }
//! ```
pub mod compat;
pub mod config;
pub mod conflict;
pub mod distribution;
pub mod enrich;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod source;
pub mod state;
pub mod validation;
pub mod verification;

pub use compat::{ClientProfile, ClientVersion, Eligibility, IneligibleReason, check_eligibility};
pub use config::{RegistryConfig, ValidationLimits};
pub use conflict::{ConflictOutcome, ValidatedSubmission, detect_conflicts};
pub use distribution::{
    DiffResponse, DistributionService, IndexDiff, IndexQuery, IndexResponse, LookupResult,
};
pub use enrich::{RepositoryStats, StatsProvider};
pub use error::{ErrorKind, Result, StoreError};
pub use index::{BuildResult, IndexBuilder, RegistryIndex, SnapshotDocument};
pub use pipeline::BuildPipeline;
pub use registry::Registry;
pub use report::{BuildOutcome, BuildReport, Conflict, RejectedSubmission};
pub use source::{DirectorySource, MemorySource, Submission, SubmissionSource};
pub use state::{LedgerLock, StateStore};
pub use validation::{FieldError, SchemaValidator, SchemaViolation};
pub use verification::{
    AttestedFields, ReviewAction, ReviewEntry, VerificationLedger, VerificationRecord,
    VerificationWorkflow,
};

#[cfg(feature = "github")]
pub use enrich::GithubStatsProvider;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "madmin_store");
    }
}
