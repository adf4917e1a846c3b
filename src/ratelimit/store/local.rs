//! Local fallback store: a per-key log of request timestamps.
//!
//! Used when the shared store is not configured or was unreachable at
//! startup. Entries older than the window are pruned on every hit and the
//! remaining entries are the count. Each key's log lives behind its DashMap
//! entry lock, so two hits on the same key are serialized.
//!
//! With a directory configured, each key's log is mirrored to
//! `<dir>/<sha256(key)>.json` and reloaded on first use after a restart.
//! The files are a best-effort mirror: a failed write is logged and the
//! in-memory count still decides. Keys whose log empties are dropped, file
//! included, by [`RateStore::cleanup_expired`].

use super::{Hit, RateStore};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timestamps (unix ms) of the requests inside the key's window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KeyLog {
    window_ms: i64,
    hits: VecDeque<i64>,
}

impl KeyLog {
    fn prune(&mut self, now_ms: i64) {
        while self.hits.front().is_some_and(|&ts| ts <= now_ms - self.window_ms) {
            self.hits.pop_front();
        }
    }
}

/// Per-process timestamp-log store
pub struct LocalStore {
    logs: DashMap<String, KeyLog>,
    dir: Option<PathBuf>,
    closed: AtomicBool,
}

impl LocalStore {
    /// Purely in-memory store
    pub fn in_memory() -> Self {
        Self {
            logs: DashMap::new(),
            dir: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Store mirrored to files under `dir` (created if missing)
    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "Local rate limit store persisting to disk");

        Ok(Self {
            logs: DashMap::new(),
            dir: Some(dir),
            closed: AtomicBool::new(false),
        })
    }

    fn file_for(dir: &Path, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        dir.join(format!("{}.json", hex::encode(digest)))
    }

    fn read_file(path: &Path) -> Option<KeyLog> {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(log) => Some(log),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Discarding unreadable rate limit file");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read rate limit file");
                None
            }
        }
    }

    fn load(&self, key: &str) -> KeyLog {
        self.dir
            .as_deref()
            .and_then(|dir| Self::read_file(&Self::file_for(dir, key)))
            .unwrap_or_default()
    }

    fn write_file(path: &Path, log: &KeyLog) -> Result<(), StoreError> {
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(log).map_err(|e| StoreError::Protocol(e.to_string()))?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Mirror a key's log to disk. Failures only cost durability.
    fn persist(&self, key: &str, log: &KeyLog) {
        let Some(dir) = &self.dir else {
            return;
        };

        let path = Self::file_for(dir, key);
        if let Err(e) = Self::write_file(&path, log) {
            warn!(path = %path.display(), error = %e, "Failed to persist rate limit log, counting in memory");
        }
    }

    fn remove_file(path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove rate limit file"),
        }
    }

    /// Delete files whose every entry has expired, including keys this
    /// process never touched (left over from an earlier run).
    fn sweep_dir(dir: &Path, now_ms: i64) -> usize {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to scan rate limit directory");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let expired = match Self::read_file(&path) {
                Some(mut log) => {
                    log.prune(now_ms);
                    log.hits.is_empty()
                }
                None => true,
            };
            if expired {
                Self::remove_file(&path);
                removed += 1;
            }
        }
        removed
    }

    /// Number of timestamps currently logged for a key
    pub fn logged(&self, key: &str) -> usize {
        self.logs.get(key).map(|log| log.hits.len()).unwrap_or(0)
    }

    /// Number of keys held in memory
    pub fn tracked_keys(&self) -> usize {
        self.logs.len()
    }
}

#[async_trait]
impl RateStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn hit(&self, key: &str, window: Duration) -> Result<Hit, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("local store is closed".to_string()));
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let window_ms = window.as_millis() as i64;

        let mut log = match self.logs.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => entry.insert(self.load(key)),
        };

        log.window_ms = window_ms;
        log.prune(now_ms);
        log.hits.push_back(now_ms);

        let count = log.hits.len() as u64;
        let oldest = log.hits.front().copied().unwrap_or(now_ms);
        let reset_in = Duration::from_millis((oldest + window_ms - now_ms).max(0) as u64);

        self.persist(key, &log);

        debug!(key = %key, count = count, "Local rate limit hit");

        Ok(Hit { count, reset_in })
    }

    fn cleanup_expired(&self) -> usize {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut removed = 0;

        self.logs.retain(|key, log| {
            log.prune(now_ms);
            if !log.hits.is_empty() {
                return true;
            }
            if let Some(dir) = &self.dir {
                Self::remove_file(&Self::file_for(dir, key));
            }
            removed += 1;
            false
        });

        if let Some(dir) = &self.dir {
            removed += Self::sweep_dir(dir, now_ms);
        }

        debug!(removed = removed, remaining = self.logs.len(), "Swept expired local rate limit keys");
        removed
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("local store is closed".to_string()));
        }

        if let Some(dir) = &self.dir {
            if !dir.is_dir() {
                return Err(StoreError::Unavailable(format!(
                    "directory {} is missing",
                    dir.display()
                )));
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
