//! Durable registry state
//!
//! Layout below the state directory:
//!
//! ```text
//! snapshots/00000000000000000042.json   one file per retained snapshot
//! verification.json                     the verification ledger
//! verification.lock                     held while a process reads and rewrites the ledger
//! sequence.json                         {"next_sequence": N}
//! modules.json                          flat export of the current snapshot
//! ```
//!
//! Every file is written to a temporary sibling first and renamed into place, so readers
//! never observe a partial write.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::index::{RegistryIndex, SnapshotDocument};
use crate::verification::VerificationLedger;

const SNAPSHOT_DIR: &str = "snapshots";
const LEDGER_FILE: &str = "verification.json";
const LEDGER_LOCK_FILE: &str = "verification.lock";
const SEQUENCE_FILE: &str = "sequence.json";
const EXPORT_FILE: &str = "modules.json";
const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
struct SequenceFile {
    next_sequence: u64,
}

/// Exclusive hold on the ledger, shared with every process using the same state directory.
/// Released on drop.
#[derive(Debug)]
pub struct LedgerLock {
    _file: std::fs::File,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
    history_depth: usize,
}

impl StateStore {
    /// Open (and create if needed) the state directory.
    pub async fn open<P: AsRef<Path>>(root: P, history_depth: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let snapshots = root.join(SNAPSHOT_DIR);
        tokio::fs::create_dir_all(&snapshots)
            .await
            .map_err(|e| StoreError::io("create state directory", &snapshots, e))?;
        Ok(Self {
            root,
            history_depth,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn export_path(&self) -> PathBuf {
        self.root.join(EXPORT_FILE)
    }

    fn snapshot_path(&self, sequence: u64) -> PathBuf {
        self.root
            .join(SNAPSHOT_DIR)
            .join(format!("{:020}.json", sequence))
    }

    /// Store a snapshot and prune the ones that fell out of the history window.
    pub async fn save_snapshot(&self, snapshot: &RegistryIndex) -> Result<()> {
        let path = self.snapshot_path(snapshot.sequence());
        let bytes = serde_json::to_vec_pretty(&snapshot.to_document())?;
        write_atomic(&path, &bytes).await?;
        self.prune_snapshots().await
    }

    async fn snapshot_sequences(&self) -> Result<Vec<u64>> {
        let dir = self.root.join(SNAPSHOT_DIR);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| StoreError::io("list snapshots", &dir, e))?;

        let mut sequences = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io("list snapshots", &dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(sequence) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                sequences.push(sequence);
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }

    async fn prune_snapshots(&self) -> Result<()> {
        let sequences = self.snapshot_sequences().await?;
        let keep = self.history_depth + 1;
        if sequences.len() <= keep {
            return Ok(());
        }
        for sequence in &sequences[..sequences.len() - keep] {
            let path = self.snapshot_path(*sequence);
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| StoreError::io("prune snapshot", &path, e))?;
            tracing::debug!(sequence, "Pruned snapshot");
        }
        Ok(())
    }

    /// Every readable snapshot, oldest first. Unreadable or tampered files are skipped.
    pub async fn load_snapshots(&self) -> Result<Vec<RegistryIndex>> {
        let mut snapshots = Vec::new();
        for sequence in self.snapshot_sequences().await? {
            let path = self.snapshot_path(sequence);
            match self.load_snapshot(&path).await {
                Ok(snapshot) if snapshot.sequence() == sequence => snapshots.push(snapshot),
                Ok(snapshot) => tracing::warn!(
                    path = %path.display(),
                    stored = snapshot.sequence(),
                    "Snapshot sequence does not match its file name, skipping"
                ),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable snapshot"
                ),
            }
        }
        Ok(snapshots)
    }

    async fn load_snapshot(&self, path: &Path) -> Result<RegistryIndex> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::io("read snapshot", path, e))?;
        let document: SnapshotDocument =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::InvalidStateFile {
                path: path.to_path_buf(),
                source: e,
            })?;
        RegistryIndex::from_document(document)
    }

    /// Wait for the advisory lock that serializes ledger read-modify-write cycles.
    pub async fn lock_ledger(&self) -> Result<LedgerLock> {
        let path = self.root.join(LEDGER_LOCK_FILE);
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .map_err(|e| StoreError::io("open ledger lock", &path, e))?;
            file.lock()
                .map_err(|e| StoreError::io("lock ledger", &path, e))?;
            Ok(LedgerLock { _file: file })
        })
        .await
        .map_err(|e| {
            StoreError::io(
                "lock ledger",
                self.root.join(LEDGER_LOCK_FILE),
                std::io::Error::other(e),
            )
        })?
    }

    pub async fn save_ledger(&self, ledger: &VerificationLedger) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(ledger)?;
        write_atomic(&self.root.join(LEDGER_FILE), &bytes).await
    }

    /// The stored ledger, or an empty one if none was written yet.
    pub async fn load_ledger(&self) -> Result<VerificationLedger> {
        Ok(self
            .read_json::<VerificationLedger>(&self.root.join(LEDGER_FILE))
            .await?
            .unwrap_or_default())
    }

    pub async fn save_next_sequence(&self, next_sequence: u64) -> Result<()> {
        let bytes = serde_json::to_vec(&SequenceFile { next_sequence })?;
        write_atomic(&self.root.join(SEQUENCE_FILE), &bytes).await
    }

    pub async fn load_next_sequence(&self) -> Result<Option<u64>> {
        Ok(self
            .read_json::<SequenceFile>(&self.root.join(SEQUENCE_FILE))
            .await?
            .map(|f| f.next_sequence))
    }

    /// Write the flat `modules.json` export of `snapshot`.
    pub async fn write_legacy_export(&self, snapshot: &RegistryIndex) -> Result<PathBuf> {
        let path = self.export_path();
        let bytes = serde_json::to_vec_pretty(&legacy_export(snapshot)?)?;
        write_atomic(&path, &bytes).await?;
        Ok(path)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io("read state file", path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::InvalidStateFile {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

/// The flat document older clients consume: stats fields sit next to the manifest fields.
pub fn legacy_export(snapshot: &RegistryIndex) -> Result<Value> {
    let mut modules = Vec::with_capacity(snapshot.len());
    for manifest in snapshot.manifests() {
        let mut value = serde_json::to_value(manifest)?;
        if let Value::Object(object) = &mut value {
            if let Some(Value::Object(stats)) = object.shift_remove("stats") {
                for (key, field) in stats {
                    object.entry(key).or_insert(field);
                }
            }
        }
        modules.push(value);
    }

    let mut document = Map::new();
    document.insert("version".to_string(), Value::from(EXPORT_VERSION));
    document.insert(
        "generated_at".to_string(),
        Value::from(Utc::now().to_rfc3339()),
    );
    document.insert("sequence".to_string(), Value::from(snapshot.sequence()));
    document.insert("modules".to_string(), Value::Array(modules));
    Ok(Value::Object(document))
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&temp, bytes).await {
        return Err(StoreError::io("write state file", &temp, e));
    }
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(StoreError::io("replace state file", path, e));
    }
    Ok(())
}
