//! Byte-bounded LRU cache for downloaded segment audio.
//!
//! Entries are whole segment files keyed by their remote object key. The
//! bound is total bytes, not entry count; once an insert pushes the total
//! past the ceiling, least-recently-used entries are evicted and their
//! files deleted until the total fits again.

use std::path::{Path, PathBuf};

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

pub struct AudioCache {
    dir: PathBuf,
    ceiling_bytes: u64,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    /// Key -> file size. Unbounded here; the byte ceiling does the bounding.
    entries: LruCache<String, u64>,
    total_bytes: u64,
}

impl AudioCache {
    /// Open (or create) a cache directory, rebuilding size accounting from
    /// the files already on disk. Recency order across restarts is not
    /// preserved; pre-existing files start cold.
    pub fn open(dir: impl Into<PathBuf>, ceiling_bytes: u64) -> PipelineResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut entries = LruCache::unbounded();
        let mut total_bytes = 0u64;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let size = meta.len();
            entries.put(entry.file_name().to_string_lossy().into_owned(), size);
            total_bytes += size;
        }

        debug!(
            dir = %dir.display(),
            files = entries.len(),
            total_bytes,
            "audio cache opened"
        );
        Ok(Self {
            dir,
            ceiling_bytes,
            inner: Mutex::new(CacheInner {
                entries,
                total_bytes,
            }),
        })
    }

    /// Read an entry, marking it most recently used.
    pub async fn get(&self, key: &str) -> PipelineResult<Option<Vec<u8>>> {
        let file_name = file_name_for(key);
        let mut inner = self.inner.lock().await;
        if inner.entries.get(&file_name).is_none() {
            return Ok(None);
        }

        let path = self.dir.join(&file_name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File vanished underneath us; drop the stale entry.
                if let Some(size) = inner.entries.pop(&file_name) {
                    inner.total_bytes = inner.total_bytes.saturating_sub(size);
                }
                Ok(None)
            }
            Err(e) => Err(PipelineError::Io(e)),
        }
    }

    /// Insert an entry, evicting least-recently-used files until the total
    /// fits under the ceiling.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> PipelineResult<PathBuf> {
        if bytes.len() as u64 > self.ceiling_bytes {
            return Err(PipelineError::CacheError(format!(
                "entry of {} bytes exceeds cache ceiling {}",
                bytes.len(),
                self.ceiling_bytes
            )));
        }

        let file_name = file_name_for(key);
        let path = self.dir.join(&file_name);

        let mut inner = self.inner.lock().await;
        tokio::fs::write(&path, bytes).await?;

        if let Some(old) = inner.entries.put(file_name, bytes.len() as u64) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old);
        }
        inner.total_bytes += bytes.len() as u64;

        while inner.total_bytes > self.ceiling_bytes {
            let Some((evicted_name, evicted_size)) = inner.entries.pop_lru() else {
                break;
            };
            inner.total_bytes = inner.total_bytes.saturating_sub(evicted_size);
            let evicted_path = self.dir.join(&evicted_name);
            if let Err(e) = tokio::fs::remove_file(&evicted_path).await {
                warn!(path = %evicted_path.display(), error = %e, "failed to delete evicted entry");
            }
            debug!(key = %evicted_name, bytes = evicted_size, "evicted from audio cache");
        }

        Ok(path)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.entries.contains(&file_name_for(key))
    }

    pub async fn total_bytes(&self) -> u64 {
        self.inner.lock().await.total_bytes
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// The object key is hierarchical; flatten it to one file name.
fn file_name_for(key: &str) -> String {
    key.replace('/', "_")
}
