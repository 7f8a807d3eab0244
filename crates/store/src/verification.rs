//! Verification workflow
//!
//! Tracks the trust status of every identifier the registry has ever seen. Records survive
//! rebuilds and outlive the manifests they describe; a module that disappears and comes back
//! picks up its old status.
//!
//! All review actions go through [`VerificationWorkflow`], which applies them one at a time
//! and persists each change before releasing its lock. With a state directory attached the
//! lock is also taken on disk, and the stored ledger is merged in first, so a server and a
//! CLI sharing the directory never overwrite each other's reviews.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use madmin_types::{Category, ModuleManifest, VerificationStatus};

use crate::error::{Result, StoreError};
use crate::state::{LedgerLock, StateStore};

/// Fields that a reviewer vouches for when approving an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestedFields {
    pub category: Category,
    pub repository: Url,
}

impl AttestedFields {
    pub fn of(manifest: &ModuleManifest) -> Self {
        Self {
            category: manifest.category,
            repository: manifest.repository.clone(),
        }
    }

    /// Human readable list of the fields that differ from `other`.
    pub fn differences(&self, other: &AttestedFields) -> Vec<String> {
        let mut changed = Vec::new();
        if self.category != other.category {
            changed.push(format!("category {} -> {}", self.category, other.category));
        }
        if self.repository != other.repository {
            changed.push(format!(
                "repository {} -> {}",
                self.repository, other.repository
            ));
        }
        changed
    }
}

/// One audited review action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub id: Uuid,
    pub reviewer: String,
    pub from: VerificationStatus,
    pub to: VerificationStatus,
    pub note: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub identifier: String,
    pub status: VerificationStatus,
    /// Incremented on every review action.
    pub revision: u64,
    pub first_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Set when the identifier was last approved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attested: Option<AttestedFields>,
    /// Fields of the most recent accepted submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<AttestedFields>,
    #[serde(default)]
    pub history: Vec<ReviewEntry>,
}

impl VerificationRecord {
    fn new(identifier: &str, now: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.to_string(),
            status: VerificationStatus::Unverified,
            revision: 0,
            first_seen: now,
            last_reviewed_at: None,
            reviewer: None,
            note: None,
            attested: None,
            candidate: None,
            history: Vec::new(),
        }
    }
}

/// A reviewer's request to move an identifier to a new status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewAction {
    pub identifier: String,
    pub reviewer: String,
    pub target: VerificationStatus,
    #[serde(default)]
    pub note: String,
    /// When set, the action only applies if the record is still at this revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_revision: Option<u64>,
}

/// Every verification record, keyed by identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationLedger {
    records: BTreeMap<String, VerificationRecord>,
}

impl VerificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identifier: &str) -> Option<&VerificationRecord> {
        self.records.get(identifier)
    }

    /// Current status, `Unverified` for identifiers never seen.
    pub fn status(&self, identifier: &str) -> VerificationStatus {
        self.records
            .get(identifier)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn records(&self) -> impl Iterator<Item = &VerificationRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fold in records written elsewhere. A stored record replaces ours unless ours has seen
    /// more review actions.
    pub fn merge(&mut self, stored: VerificationLedger) {
        for (identifier, record) in stored.records {
            match self.records.get(&identifier) {
                Some(ours) if ours.revision > record.revision => {}
                _ => {
                    self.records.insert(identifier, record);
                }
            }
        }
    }

    /// Record a sighting of an accepted submission. Creates the record on first sighting.
    ///
    /// Returns `true` when the ledger changed.
    pub fn observe(
        &mut self,
        identifier: &str,
        fields: AttestedFields,
        now: DateTime<Utc>,
    ) -> bool {
        let mut changed = false;
        let record = self
            .records
            .entry(identifier.to_string())
            .or_insert_with(|| {
                changed = true;
                VerificationRecord::new(identifier, now)
            });

        if record.candidate.as_ref() != Some(&fields) {
            record.candidate = Some(fields);
            changed = true;
        }
        changed
    }

    /// Apply a review action, returning the updated record.
    pub fn apply(&mut self, action: &ReviewAction, now: DateTime<Utc>) -> Result<VerificationRecord> {
        let record = self
            .records
            .get_mut(&action.identifier)
            .ok_or_else(|| StoreError::ModuleNotFound(action.identifier.clone()))?;

        if let Some(expected) = action.expected_revision {
            if expected != record.revision {
                return Err(StoreError::ReviewConflict {
                    identifier: action.identifier.clone(),
                    expected,
                    actual: record.revision,
                });
            }
        }

        if !record.status.can_transition_to(action.target) {
            return Err(StoreError::InvalidTransition {
                identifier: action.identifier.clone(),
                from: record.status,
                to: action.target,
            });
        }

        let from = record.status;
        record.status = action.target;
        record.revision += 1;
        record.last_reviewed_at = Some(now);
        record.reviewer = Some(action.reviewer.clone());
        record.note = Some(action.note.clone());
        if action.target == VerificationStatus::Verified {
            record.attested = record.candidate.clone();
        }
        record.history.push(ReviewEntry {
            id: Uuid::new_v4(),
            reviewer: action.reviewer.clone(),
            from,
            to: action.target,
            note: action.note.clone(),
            at: now,
        });

        Ok(record.clone())
    }
}

/// Serialized access to the verification ledger.
pub struct VerificationWorkflow {
    ledger: Mutex<VerificationLedger>,
    state: Option<StateStore>,
}

impl VerificationWorkflow {
    pub fn new(ledger: VerificationLedger) -> Self {
        Self {
            ledger: Mutex::new(ledger),
            state: None,
        }
    }

    /// Persist every change to `state`.
    pub fn with_state_store(mut self, state: StateStore) -> Self {
        self.state = Some(state);
        self
    }

    /// Copy of the ledger as this process last saw it.
    pub async fn snapshot(&self) -> VerificationLedger {
        self.ledger.lock().await.clone()
    }

    /// Copy of the ledger after merging in what is stored on disk.
    pub async fn refresh(&self) -> Result<VerificationLedger> {
        let mut ledger = self.ledger.lock().await;
        let _lock = self.sync(&mut ledger).await?;
        Ok(ledger.clone())
    }

    /// Take the on-disk lock and merge the stored ledger into `ledger`. The returned guard
    /// must be held until the change is saved.
    async fn sync(&self, ledger: &mut VerificationLedger) -> Result<Option<LedgerLock>> {
        let Some(state) = &self.state else {
            return Ok(None);
        };
        let lock = state.lock_ledger().await?;
        ledger.merge(state.load_ledger().await?);
        Ok(Some(lock))
    }

    pub async fn record(&self, identifier: &str) -> Option<VerificationRecord> {
        self.ledger.lock().await.get(identifier).cloned()
    }

    /// Apply one review action. Concurrent callers are serialized; the change is persisted
    /// before the next action may run, and rolled back if persisting fails.
    pub async fn apply_review(&self, action: ReviewAction) -> Result<VerificationRecord> {
        let mut ledger = self.ledger.lock().await;
        let _lock = self.sync(&mut ledger).await?;
        let previous = ledger.clone();

        let record = ledger.apply(&action, Utc::now())?;

        if let Some(state) = &self.state {
            if let Err(e) = state.save_ledger(&ledger).await {
                *ledger = previous;
                return Err(e);
            }
        }

        tracing::info!(
            identifier = %record.identifier,
            reviewer = %action.reviewer,
            status = %record.status,
            revision = record.revision,
            "Applied review action"
        );
        Ok(record)
    }

    /// Record sightings for a build cycle and return the ledger afterwards.
    pub async fn observe<'a>(
        &self,
        manifests: impl IntoIterator<Item = &'a ModuleManifest>,
    ) -> Result<VerificationLedger> {
        let mut ledger = self.ledger.lock().await;
        let _lock = self.sync(&mut ledger).await?;
        let previous = ledger.clone();
        let now = Utc::now();

        let mut changed = false;
        for manifest in manifests {
            if ledger.observe(&manifest.id, AttestedFields::of(manifest), now) {
                changed = true;
            }
        }

        if changed {
            if let Some(state) = &self.state {
                if let Err(e) = state.save_ledger(&ledger).await {
                    *ledger = previous;
                    return Err(e);
                }
            }
        }

        Ok(ledger.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(repo: &str) -> AttestedFields {
        AttestedFields {
            category: Category::Security,
            repository: Url::parse(repo).unwrap(),
        }
    }

    fn action(target: VerificationStatus) -> ReviewAction {
        ReviewAction {
            identifier: "vpn-guard".to_string(),
            reviewer: "alice".to_string(),
            target,
            note: format!("moving to {}", target),
            expected_revision: None,
        }
    }

    #[test]
    fn test_first_sighting_creates_unverified_record() {
        let mut ledger = VerificationLedger::new();
        assert!(ledger.observe("vpn-guard", fields("https://example.com/a"), Utc::now()));
        assert!(!ledger.observe("vpn-guard", fields("https://example.com/a"), Utc::now()));

        let record = ledger.get("vpn-guard").unwrap();
        assert_eq!(record.status, VerificationStatus::Unverified);
        assert_eq!(record.revision, 0);
        assert!(record.attested.is_none());
    }

    #[test]
    fn test_review_lifecycle_and_audit_trail() {
        let mut ledger = VerificationLedger::new();
        ledger.observe("vpn-guard", fields("https://example.com/a"), Utc::now());

        ledger.apply(&action(VerificationStatus::Pending), Utc::now()).unwrap();
        let record = ledger
            .apply(&action(VerificationStatus::Verified), Utc::now())
            .unwrap();

        assert_eq!(record.status, VerificationStatus::Verified);
        assert_eq!(record.revision, 2);
        assert_eq!(record.attested, Some(fields("https://example.com/a")));
        assert_eq!(record.reviewer.as_deref(), Some("alice"));
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.history[1].from, VerificationStatus::Pending);
        assert_eq!(record.history[1].to, VerificationStatus::Verified);
    }

    #[test]
    fn test_invalid_transition_is_refused() {
        let mut ledger = VerificationLedger::new();
        ledger.observe("vpn-guard", fields("https://example.com/a"), Utc::now());

        let err = ledger
            .apply(&action(VerificationStatus::Verified), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(ledger.status("vpn-guard"), VerificationStatus::Unverified);
    }

    #[test]
    fn test_unknown_identifier() {
        let mut ledger = VerificationLedger::new();
        let err = ledger
            .apply(&action(VerificationStatus::Pending), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::ModuleNotFound(_)));
    }

    #[test]
    fn test_stale_revision_conflicts() {
        let mut ledger = VerificationLedger::new();
        ledger.observe("vpn-guard", fields("https://example.com/a"), Utc::now());
        ledger.apply(&action(VerificationStatus::Pending), Utc::now()).unwrap();

        let mut stale = action(VerificationStatus::Rejected);
        stale.expected_revision = Some(0);
        let err = ledger.apply(&stale, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::ReviewConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));

        stale.expected_revision = Some(1);
        assert!(ledger.apply(&stale, Utc::now()).is_ok());
    }

    #[test]
    fn test_merge_keeps_the_most_reviewed_record() {
        let mut ours = VerificationLedger::new();
        ours.observe("vpn-guard", fields("https://example.com/a"), Utc::now());
        ours.observe("adguard", fields("https://example.com/b"), Utc::now());

        let mut stored = ours.clone();
        stored.apply(&action(VerificationStatus::Pending), Utc::now()).unwrap();
        ours.observe("adguard", fields("https://example.com/c"), Utc::now());
        let mut reviewed = action(VerificationStatus::Pending);
        reviewed.identifier = "adguard".to_string();
        ours.apply(&reviewed, Utc::now()).unwrap();

        ours.merge(stored);
        assert_eq!(ours.status("vpn-guard"), VerificationStatus::Pending);
        assert_eq!(ours.status("adguard"), VerificationStatus::Pending);
        assert_eq!(
            ours.get("adguard").unwrap().candidate,
            Some(fields("https://example.com/c"))
        );
    }

    #[tokio::test]
    async fn test_workflows_sharing_a_state_dir_keep_each_others_reviews() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateStore::open(dir.path(), 4).await.unwrap();
        let module = |id: &str| -> ModuleManifest {
            serde_json::from_value(serde_json::json!({
                "id": id,
                "name": id,
                "description": "test module",
                "repository": format!("https://example.com/{}", id),
                "author": { "name": "Tester" },
                "category": "security",
            }))
            .unwrap()
        };

        let server = VerificationWorkflow::new(VerificationLedger::new())
            .with_state_store(state.clone());
        server.observe([&module("vpn-guard")]).await.unwrap();

        let cli = VerificationWorkflow::new(state.load_ledger().await.unwrap())
            .with_state_store(state.clone());
        cli.apply_review(action(VerificationStatus::Pending))
            .await
            .unwrap();

        let ledger = server
            .observe([&module("vpn-guard"), &module("adguard")])
            .await
            .unwrap();
        assert_eq!(ledger.status("vpn-guard"), VerificationStatus::Pending);
        assert_eq!(ledger.len(), 2);

        let stored = state.load_ledger().await.unwrap();
        assert_eq!(stored.status("vpn-guard"), VerificationStatus::Pending);
        assert!(stored.get("adguard").is_some());
    }

    #[tokio::test]
    async fn test_concurrent_reviews_are_serialized() {
        let mut ledger = VerificationLedger::new();
        ledger.observe("vpn-guard", fields("https://example.com/a"), Utc::now());
        let workflow = std::sync::Arc::new(VerificationWorkflow::new(ledger));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let workflow = workflow.clone();
            handles.push(tokio::spawn(async move {
                let mut request = action(VerificationStatus::Pending);
                request.expected_revision = Some(0);
                workflow.apply_review(request).await
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);

        let record = workflow.record("vpn-guard").await.unwrap();
        assert_eq!(record.revision, 1);
        assert_eq!(record.history.len(), 1);
    }
}
