//! Immutable registry snapshots and the builder that produces them

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use madmin_types::{Category, ModuleManifest, VerificationStatus};

use crate::error::{Result, StoreError};
use crate::verification::VerificationLedger;

/// One fully built version of the registry index.
///
/// Never mutated after construction. Rebuilds produce a new value that replaces this one
/// in the distribution service.
#[derive(Debug, Clone)]
pub struct RegistryIndex {
    sequence: u64,
    fingerprint: String,
    built_at: DateTime<Utc>,
    manifests: Vec<ModuleManifest>,
    by_id: HashMap<String, usize>,
    by_category: BTreeMap<Category, Vec<String>>,
    by_tag: BTreeMap<String, Vec<String>>,
}

/// On-disk form of a snapshot. Derived lookups are rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub sequence: u64,
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
    pub modules: Vec<ModuleManifest>,
}

impl RegistryIndex {
    /// The snapshot served before the first successful build.
    pub fn empty() -> Self {
        Self::assemble(
            0,
            blake3::Hasher::new().finalize().to_hex().to_string(),
            Utc::now(),
            Vec::new(),
        )
    }

    /// `manifests` must already be sorted by identifier and free of duplicates.
    fn assemble(
        sequence: u64,
        fingerprint: String,
        built_at: DateTime<Utc>,
        manifests: Vec<ModuleManifest>,
    ) -> Self {
        let mut by_id = HashMap::with_capacity(manifests.len());
        let mut by_category: BTreeMap<Category, Vec<String>> = BTreeMap::new();
        let mut by_tag: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (position, manifest) in manifests.iter().enumerate() {
            by_id.insert(manifest.id.clone(), position);
            by_category
                .entry(manifest.category)
                .or_default()
                .push(manifest.id.clone());
            for tag in manifest.tags.iter() {
                by_tag
                    .entry(tag.to_string())
                    .or_default()
                    .push(manifest.id.clone());
            }
        }

        Self {
            sequence,
            fingerprint,
            built_at,
            manifests,
            by_id,
            by_category,
            by_tag,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Manifests in canonical (identifier) order.
    pub fn manifests(&self) -> &[ModuleManifest] {
        &self.manifests
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<&ModuleManifest> {
        self.by_id
            .get(identifier)
            .and_then(|&position| self.manifests.get(position))
    }

    pub fn ids_in_category(&self, category: Category) -> &[String] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn ids_with_tag(&self, tag: &str) -> &[String] {
        self.by_tag
            .get(tag)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn categories(&self) -> impl Iterator<Item = (Category, usize)> + '_ {
        self.by_category.iter().map(|(c, ids)| (*c, ids.len()))
    }

    pub fn tags(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.by_tag.iter().map(|(t, ids)| (t.as_str(), ids.len()))
    }

    pub fn to_document(&self) -> SnapshotDocument {
        SnapshotDocument {
            sequence: self.sequence,
            fingerprint: self.fingerprint.clone(),
            built_at: self.built_at,
            modules: self.manifests.clone(),
        }
    }

    /// Rebuild a snapshot from its stored form, checking order, uniqueness and fingerprint.
    pub fn from_document(document: SnapshotDocument) -> Result<Self> {
        let corrupted = |reason: String| StoreError::CorruptedSnapshot {
            sequence: document.sequence,
            reason,
        };

        if !document.modules.windows(2).all(|w| w[0].id < w[1].id) {
            return Err(corrupted(
                "modules are not in strictly ascending identifier order".to_string(),
            ));
        }

        let fingerprint = compute_fingerprint(&document.modules)?;
        if fingerprint != document.fingerprint {
            return Err(corrupted(format!(
                "fingerprint mismatch: stored {}, computed {}",
                document.fingerprint, fingerprint
            )));
        }

        Ok(Self::assemble(
            document.sequence,
            document.fingerprint,
            document.built_at,
            document.modules,
        ))
    }
}

/// BLAKE3 over the canonical serialization of `manifests`, in the order given.
pub fn compute_fingerprint(manifests: &[ModuleManifest]) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    for manifest in manifests {
        let bytes = serde_json::to_vec(&manifest.canonical())?;
        hasher.update(&bytes);
        hasher.update(b"\n");
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[derive(Debug)]
pub enum BuildResult {
    /// A new snapshot with a fresh sequence number.
    Built(RegistryIndex),
    /// Content is identical to the current snapshot; no sequence was consumed.
    Unchanged,
}

/// Produces snapshots and owns the sequence counter.
#[derive(Debug)]
pub struct IndexBuilder {
    next_sequence: u64,
}

impl IndexBuilder {
    /// `next_sequence` is the lowest sequence number that may still be handed out.
    pub fn new(next_sequence: u64) -> Self {
        Self {
            next_sequence: next_sequence.max(1),
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Build a snapshot from the accepted manifests of one cycle.
    ///
    /// Verification flags are stamped from `ledger`; identifiers it has never seen are
    /// unverified. `current` is never modified. A sequence number, once assigned, is never
    /// handed out again even if the caller fails to publish the result.
    pub fn build(
        &mut self,
        accepted: Vec<ModuleManifest>,
        ledger: &VerificationLedger,
        current: &RegistryIndex,
    ) -> Result<BuildResult> {
        let mut manifests: Vec<ModuleManifest> = accepted
            .into_iter()
            .map(|mut manifest| {
                manifest.verified = ledger.status(&manifest.id) == VerificationStatus::Verified;
                manifest
            })
            .collect();
        manifests.sort_by(|a, b| a.id.cmp(&b.id));

        let mut seen = HashSet::with_capacity(manifests.len());
        if let Some(duplicate) = manifests.iter().find(|m| !seen.insert(m.id.as_str())) {
            return Err(StoreError::BuildAborted(format!(
                "identifier '{}' reached the builder more than once",
                duplicate.id
            )));
        }

        let fingerprint = compute_fingerprint(&manifests)
            .map_err(|e| StoreError::BuildAborted(format!("fingerprinting failed: {}", e)))?;

        if fingerprint == current.fingerprint() {
            return Ok(BuildResult::Unchanged);
        }

        let sequence = self.next_sequence.max(current.sequence() + 1);
        self.next_sequence = sequence.checked_add(1).ok_or_else(|| {
            StoreError::BuildAborted("sequence numbers exhausted".to_string())
        })?;

        Ok(BuildResult::Built(RegistryIndex::assemble(
            sequence,
            fingerprint,
            Utc::now(),
            manifests,
        )))
    }
}
