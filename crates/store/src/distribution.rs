//! Read path: serving snapshots to clients
//!
//! The current snapshot sits behind a single swap point. Readers clone the `Arc` and drop the
//! lock straight away, so a request always completes against one whole snapshot even if a
//! publish happens meanwhile. A bounded history of superseded snapshots is kept for
//! incremental diffs.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use madmin_types::{Category, ModuleManifest, TagSet};

use crate::compat::{ClientProfile, Eligibility, IneligibleReason, check_eligibility};
use crate::error::{Result, StoreError};
use crate::index::RegistryIndex;

/// Filters accepted by the full index fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexQuery {
    pub client_version: Option<String>,
    pub os: Option<String>,
    pub category: Option<String>,
    pub tag: Option<String>,
}

impl IndexQuery {
    pub fn client(&self) -> ClientProfile {
        ClientProfile::new(self.client_version.as_deref(), self.os.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResponse {
    pub sequence: u64,
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
    pub modules: Vec<ModuleManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LookupResult {
    Found {
        module: ModuleManifest,
    },
    Ineligible {
        id: String,
        reason: IneligibleReason,
        message: String,
    },
    NotFound {
        id: String,
    },
}

/// Changes between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDiff {
    pub base_sequence: u64,
    pub sequence: u64,
    pub fingerprint: String,
    pub added: Vec<ModuleManifest>,
    pub changed: Vec<ModuleManifest>,
    pub removed: Vec<String>,
}

impl IndexDiff {
    pub fn compute(base: &RegistryIndex, target: &RegistryIndex) -> Self {
        let mut added = Vec::new();
        let mut changed = Vec::new();
        for manifest in target.manifests() {
            match base.get(&manifest.id) {
                None => added.push(manifest.clone()),
                Some(previous) if previous != manifest => changed.push(manifest.clone()),
                Some(_) => {}
            }
        }

        let removed = base
            .manifests()
            .iter()
            .filter(|m| target.get(&m.id).is_none())
            .map(|m| m.id.clone())
            .collect();

        Self {
            base_sequence: base.sequence(),
            sequence: target.sequence(),
            fingerprint: target.fingerprint().to_string(),
            added,
            changed,
            removed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Apply this diff to a client's copy of the base snapshot.
    ///
    /// The result is in canonical identifier order.
    pub fn apply(&self, base: &[ModuleManifest]) -> Vec<ModuleManifest> {
        let mut modules: BTreeMap<String, ModuleManifest> = base
            .iter()
            .map(|m| (m.id.clone(), m.clone()))
            .collect();
        for id in &self.removed {
            modules.remove(id);
        }
        for manifest in self.added.iter().chain(&self.changed) {
            modules.insert(manifest.id.clone(), manifest.clone());
        }
        modules.into_values().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiffResponse {
    Diff(IndexDiff),
    /// The client's base sequence is not retained; it must refetch the whole index.
    FullFetchRequired { sequence: u64, fingerprint: String },
}

struct Published {
    current: Arc<RegistryIndex>,
    /// Superseded snapshots, oldest first.
    history: VecDeque<Arc<RegistryIndex>>,
}

/// Holds the live snapshot and answers client queries against it.
pub struct DistributionService {
    published: RwLock<Published>,
    history_depth: usize,
}

impl DistributionService {
    /// Start out serving the empty snapshot.
    pub fn new(history_depth: usize) -> Self {
        Self::with_snapshots(RegistryIndex::empty(), Vec::new(), history_depth)
    }

    /// Resume from restored state. `history` may be in any order; only snapshots older than
    /// `current` are kept.
    pub fn with_snapshots(
        current: RegistryIndex,
        history: Vec<RegistryIndex>,
        history_depth: usize,
    ) -> Self {
        let mut history: Vec<RegistryIndex> = history
            .into_iter()
            .filter(|s| s.sequence() < current.sequence())
            .collect();
        history.sort_by_key(RegistryIndex::sequence);
        history.dedup_by_key(|s| s.sequence());

        let mut history: VecDeque<Arc<RegistryIndex>> =
            history.into_iter().map(Arc::new).collect();
        while history.len() > history_depth {
            history.pop_front();
        }

        Self {
            published: RwLock::new(Published {
                current: Arc::new(current),
                history,
            }),
            history_depth,
        }
    }

    /// The snapshot live right now.
    pub fn snapshot(&self) -> Arc<RegistryIndex> {
        let published = self.published.read().unwrap_or_else(|e| e.into_inner());
        published.current.clone()
    }

    /// Sequences that an incremental diff can start from, oldest first.
    pub fn retained_sequences(&self) -> Vec<u64> {
        let published = self.published.read().unwrap_or_else(|e| e.into_inner());
        published
            .history
            .iter()
            .chain(std::iter::once(&published.current))
            .map(|s| s.sequence())
            .collect()
    }

    /// Make `snapshot` current. The replaced snapshot moves into the diff history.
    pub fn publish(&self, snapshot: RegistryIndex) -> Result<Arc<RegistryIndex>> {
        let snapshot = Arc::new(snapshot);
        let mut published = self.published.write().unwrap_or_else(|e| e.into_inner());

        let current = published.current.sequence();
        if snapshot.sequence() <= current {
            return Err(StoreError::StaleSnapshot {
                offered: snapshot.sequence(),
                current,
            });
        }

        let previous = std::mem::replace(&mut published.current, snapshot.clone());
        published.history.push_back(previous);
        while published.history.len() > self.history_depth {
            published.history.pop_front();
        }
        drop(published);

        tracing::info!(
            sequence = snapshot.sequence(),
            fingerprint = %snapshot.fingerprint(),
            modules = snapshot.len(),
            "Published registry snapshot"
        );
        Ok(snapshot)
    }

    /// Full index fetch, filtered by category, tag and client eligibility. Filters the query
    /// leaves out are not applied.
    pub fn fetch_index(&self, query: &IndexQuery) -> Result<IndexResponse> {
        let category = query
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| c.parse::<Category>().map_err(StoreError::InvalidQuery))
            .transpose()?;
        let tag = query
            .tag
            .as_deref()
            .map(TagSet::normalize)
            .filter(|t| !t.is_empty());
        let client = query.client();

        let snapshot = self.snapshot();
        let candidates: Box<dyn Iterator<Item = &ModuleManifest>> = match (category, &tag) {
            (Some(category), _) => Box::new(
                snapshot
                    .ids_in_category(category)
                    .iter()
                    .filter_map(|id| snapshot.get(id)),
            ),
            (None, Some(tag)) => Box::new(
                snapshot
                    .ids_with_tag(tag)
                    .iter()
                    .filter_map(|id| snapshot.get(id)),
            ),
            (None, None) => Box::new(snapshot.manifests().iter()),
        };

        let modules = candidates
            .filter(|m| tag.as_deref().is_none_or(|t| m.tags.contains(t)))
            .filter(|m| check_eligibility(&client, &m.requirements).is_eligible())
            .cloned()
            .collect();

        Ok(IndexResponse {
            sequence: snapshot.sequence(),
            fingerprint: snapshot.fingerprint().to_string(),
            built_at: snapshot.built_at(),
            modules,
        })
    }

    /// Single module lookup, subject to the client's eligibility.
    pub fn lookup(&self, identifier: &str, client: &ClientProfile) -> LookupResult {
        let snapshot = self.snapshot();
        let Some(module) = snapshot.get(identifier) else {
            return LookupResult::NotFound {
                id: identifier.to_string(),
            };
        };

        match check_eligibility(client, &module.requirements) {
            Eligibility::Eligible => LookupResult::Found {
                module: module.clone(),
            },
            Eligibility::Ineligible(reason) => LookupResult::Ineligible {
                id: identifier.to_string(),
                message: reason.to_string(),
                reason,
            },
        }
    }

    /// Changes since the client's last known sequence.
    pub fn diff_since(&self, since: u64) -> DiffResponse {
        let (current, base) = {
            let published = self.published.read().unwrap_or_else(|e| e.into_inner());
            let base = if published.current.sequence() == since {
                Some(published.current.clone())
            } else {
                published
                    .history
                    .iter()
                    .find(|s| s.sequence() == since)
                    .cloned()
            };
            (published.current.clone(), base)
        };

        match base {
            Some(base) => DiffResponse::Diff(IndexDiff::compute(&base, &current)),
            None => DiffResponse::FullFetchRequired {
                sequence: current.sequence(),
                fingerprint: current.fingerprint().to_string(),
            },
        }
    }
}
