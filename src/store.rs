//! Thread snapshot storage - one JSON file per thread id

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{HarvestError, Result};
use crate::materializer::thread_age_hours;
use crate::media::MediaCategory;
use crate::models::Thread;
use crate::storage::{read_json, write_json_atomic, DataPaths};

/// Owner of `threads/<id>.json`.
pub struct SnapshotStore {
    paths: DataPaths,
}

/// Result of a snapshot purge pass
#[derive(Debug, Default)]
pub struct PurgeStats {
    pub examined: usize,
    pub removed: usize,
    pub media_removed: usize,
    pub failures: usize,
}

impl SnapshotStore {
    pub fn new(paths: DataPaths) -> Self {
        Self { paths }
    }

    /// Persist a thread, replacing any previous snapshot atomically.
    pub fn save(&self, thread: &Thread) -> Result<PathBuf> {
        let path = self.paths.thread_file(thread.no);
        write_json_atomic(&path, thread)?;
        info!("Thread {} saved to {}", thread.no, path.display());
        Ok(path)
    }

    pub fn load(&self, thread_id: u64) -> Result<Option<Thread>> {
        read_json(&self.paths.thread_file(thread_id))
    }

    /// Every readable snapshot. Unreadable files are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<Thread>> {
        let mut threads = Vec::new();
        for path in self.snapshot_files()? {
            match read_json::<Thread>(&path) {
                Ok(Some(thread)) => threads.push(thread),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", path.display(), e),
            }
        }
        threads.sort_by(|a, b| b.no.cmp(&a.no));
        Ok(threads)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.snapshot_files()?.len())
    }

    /// Delete snapshots older than `age_limit_hours`, with their origin media.
    ///
    /// Age comes from the origin post's creation date string; snapshots whose
    /// date cannot be parsed are kept.
    pub fn purge_older_than(&self, age_limit_hours: f64, now: DateTime<Utc>) -> Result<PurgeStats> {
        let mut stats = PurgeStats::default();

        for path in self.snapshot_files()? {
            stats.examined += 1;

            let thread = match read_json::<Thread>(&path) {
                Ok(Some(thread)) => thread,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Error processing {}: {}", path.display(), e);
                    stats.failures += 1;
                    continue;
                }
            };

            let age = thread_age_hours(&thread.now, now);
            if age <= age_limit_hours {
                continue;
            }

            info!(
                "Removing old thread: {} ({:.1} hours old)",
                path.display(),
                age
            );
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove {}: {}", path.display(), e);
                stats.failures += 1;
                continue;
            }
            stats.removed += 1;

            match self.remove_origin_media(&thread) {
                Ok(n) => stats.media_removed += n,
                Err(e) => {
                    warn!("Failed to remove media for thread {}: {}", thread.no, e);
                    stats.failures += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Remove archived origin-category files stored for this thread's attachment.
    fn remove_origin_media(&self, thread: &Thread) -> Result<usize> {
        let Some(media) = &thread.media else {
            return Ok(0);
        };

        let dir = self.paths.category_dir(MediaCategory::Op);
        let suffix = format!("_{}", media.remote_name());
        let mut removed = 0;

        for path in list_dir(&dir)? {
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&suffix));
            if matches {
                std::fs::remove_file(&path).map_err(|e| HarvestError::storage(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn snapshot_files(&self) -> Result<Vec<PathBuf>> {
        Ok(list_dir(&self.paths.threads_dir())?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect())
    }
}

/// Entries of a directory; empty when it does not exist.
pub(crate) fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(HarvestError::storage(dir, e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| HarvestError::storage(dir, e))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
