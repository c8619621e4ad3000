//! Best-effort on-disk cache for successful GET responses

use crate::atomic::write_atomic;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio_stream::wrappers::ReadDirStream;

pub const DEFAULT_TTL_SECS: u64 = 15 * 60;
pub const DEFAULT_DIR: &str = "twitter_cleanse_cache";

#[derive(Debug, Error)]
enum CacheError {
    #[error("Unable to access cache file: {0}")]
    Io(#[from] io::Error),
    #[error("Cache entry is corrupt: {0}")]
    Format(#[from] serde_json::Error),
}

/// Identity of a request: the endpoint plus every query parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize, Serialize)]
struct CacheEntry {
    stored_at: DateTime<Utc>,
    payload: String,
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    /// `None` when caching is switched off
    dir: Option<PathBuf>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: std::time::Duration) -> Self {
        Self {
            dir: Some(dir.into()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::MAX),
        }
    }

    pub fn disabled() -> Self {
        Self {
            dir: None,
            ttl: Duration::zero(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Parameters are sorted before hashing so insertion order never matters.
    /// Every component is length-prefixed so adjacent values can't run together.
    pub fn key<I, K, V>(endpoint: &str, params: I) -> Fingerprint
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let sorted: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();
        let mut hasher = Sha256::new();
        let mut feed = |part: &str| {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        };
        feed(endpoint);
        for (k, v) in &sorted {
            feed(k);
            feed(v);
        }
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    pub async fn get(&self, key: &Fingerprint) -> Option<String> {
        self.get_at(key, Utc::now()).await
    }

    pub(crate) async fn get_at(&self, key: &Fingerprint, now: DateTime<Utc>) -> Option<String> {
        let path = match self.path_for(key) {
            Some(path) => path,
            None => return None,
        };
        let entry = match read_entry(&path).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                log::debug!("[CACHE] Miss for key: {}", key.short());
                return None;
            }
            Err(e) => {
                log::warn!("[CACHE] Ignoring unreadable entry {}: {}", key.short(), e);
                return None;
            }
        };
        let age = now - entry.stored_at;
        if age > self.ttl {
            log::debug!(
                "[CACHE] Expired entry (age: {}s) for key: {}",
                age.num_seconds(),
                key.short()
            );
            if let Err(e) = fs::remove_file(&path).await {
                log::warn!("[CACHE] Unable to remove expired entry {}: {}", key.short(), e);
            }
            return None;
        }
        log::debug!(
            "[CACHE] Hit (age: {}s) for key: {}",
            age.num_seconds(),
            key.short()
        );
        Some(entry.payload)
    }

    pub async fn put(&self, key: &Fingerprint, payload: &str) {
        self.put_at(key, payload, Utc::now()).await
    }

    pub(crate) async fn put_at(&self, key: &Fingerprint, payload: &str, now: DateTime<Utc>) {
        let path = match self.path_for(key) {
            Some(path) => path,
            None => return,
        };
        let entry = CacheEntry {
            stored_at: now,
            payload: payload.to_string(),
        };
        let result = async {
            let bytes = serde_json::to_vec(&entry)?;
            write_atomic(&path, &bytes).await?;
            Ok::<_, CacheError>(())
        }
        .await;
        match result {
            Ok(()) => log::debug!(
                "[CACHE] Stored {} bytes for key: {}",
                payload.len(),
                key.short()
            ),
            Err(e) => log::warn!("[CACHE] Unable to store entry {}: {}", key.short(), e),
        }
    }

    /// Removes every cached response, returning how many were deleted
    pub async fn clear(&self) -> io::Result<usize> {
        self.remove_where(|_| true).await
    }

    /// Removes only entries that have outlived the TTL
    pub async fn prune(&self) -> io::Result<usize> {
        let now = Utc::now();
        let ttl = self.ttl;
        self.remove_where(move |entry| match entry {
            Some(entry) => now - entry.stored_at > ttl,
            // Unreadable entries are never going to be served
            None => true,
        })
        .await
    }

    async fn remove_where<F>(&self, predicate: F) -> io::Result<usize>
    where
        F: Fn(Option<&CacheEntry>) -> bool,
    {
        let dir = match &self.dir {
            Some(dir) => dir,
            None => return Ok(0),
        };
        let entries = match fs::read_dir(dir).await {
            Ok(entries) => ReadDirStream::new(entries),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let paths = entries
            .filter_map(|entry| async move {
                let path = entry.ok()?.path();
                (path.extension()? == "json").then(|| path)
            })
            .collect::<Vec<_>>()
            .await;
        let mut removed = 0;
        for path in paths {
            let entry = read_entry(&path).await.ok().flatten();
            if predicate(entry.as_ref()) {
                fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        log::info!("[CACHE] Removed {} entries from {}", removed, dir.display());
        Ok(removed)
    }

    fn path_for(&self, key: &Fingerprint) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", key.0)))
    }
}

async fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}
