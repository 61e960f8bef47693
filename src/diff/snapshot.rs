use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

use super::engine::DiffEngine;
use super::symbols::diff_symbol_maps;
use super::types::{DiffChange, SymbolChange};
use crate::utils::{log_debug, log_warn, MinctxError, Result};

/// Last known state of each file, used as the "old" side of a diff
#[derive(Debug, Default)]
pub struct SnapshotStore {
    engine: DiffEngine,
    inner: RwLock<Snapshots>,
}

#[derive(Debug, Default)]
struct Snapshots {
    files: HashMap<String, String>,
    symbols: HashMap<String, HashMap<String, String>>,
}

impl SnapshotStore {
    pub fn new(engine: DiffEngine) -> Self {
        Self {
            engine,
            inner: RwLock::new(Snapshots::default()),
        }
    }

    /// Remember `text` as the current state of `key`
    pub fn snapshot_from_content(&self, key: &str, text: impl Into<String>) {
        self.inner.write().files.insert(key.to_string(), text.into());
    }

    /// Read `path` from disk and snapshot it under its display path.
    ///
    /// Unreadable files are logged and skipped; returns whether a snapshot was taken.
    pub async fn snapshot(&self, path: &Path) -> bool {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                self.snapshot_from_content(&path.to_string_lossy(), text);
                true
            }
            Err(e) => {
                log_warn("⚠️", format!("Could not snapshot {}: {}", path.display(), e));
                false
            }
        }
    }

    /// Remember the per-symbol code of `key`
    pub fn symbol_snapshot(&self, key: &str, symbols: HashMap<String, String>) {
        self.inner.write().symbols.insert(key.to_string(), symbols);
    }

    pub fn has_snapshot(&self, key: &str) -> bool {
        self.inner.read().files.contains_key(key)
    }

    pub fn snapshot_text(&self, key: &str) -> Option<String> {
        self.inner.read().files.get(key).cloned()
    }

    /// SHA-256 of the stored text, hex encoded
    pub fn fingerprint(&self, key: &str) -> Option<String> {
        self.inner.read().files.get(key).map(|text| content_hash(text))
    }

    /// Diff the stored snapshot of `key` against `current`
    pub fn diff_against_current(&self, key: &str, current: &str) -> Result<Vec<DiffChange>> {
        let guard = self.inner.read();
        let previous = guard
            .files
            .get(key)
            .ok_or_else(|| MinctxError::NotFound(format!("no snapshot for {}", key)))?;

        if previous == current {
            log_debug(format!("{} unchanged since last snapshot", key));
            return Ok(Vec::new());
        }

        Ok(self.engine.diff(previous, current))
    }

    /// Compare the stored symbol map of `key` with `current`.
    ///
    /// A key without a symbol snapshot is compared against an empty map.
    pub fn symbol_diff(
        &self,
        key: &str,
        current: &HashMap<String, String>,
        current_text: Option<&str>,
    ) -> Vec<SymbolChange> {
        let guard = self.inner.read();
        let empty = HashMap::new();
        let previous = guard.symbols.get(key).unwrap_or(&empty);
        let previous_text = guard.files.get(key).map(String::as_str);

        diff_symbol_maps(previous, current, previous_text, current_text)
    }

    /// Forget both snapshots of `key`
    pub fn clear(&self, key: &str) {
        let mut guard = self.inner.write();
        guard.files.remove(key);
        guard.symbols.remove(key);
    }

    pub fn clear_all(&self) {
        let mut guard = self.inner.write();
        guard.files.clear();
        guard.symbols.clear();
    }
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
