//! Media archiving with content-hash deduplication
//!
//! Attachments are downloaded, hashed (MD5 over the bytes) and written once
//! per unique hash. The hash index in `media/hashes.json` is the single
//! source of truth for dedup: loaded whole at startup, rewritten whole after
//! each archiving run.

use chrono::Utc;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::client::BoardSource;
use crate::config::MediaConfig;
use crate::error::{HarvestError, Result};
use crate::models::{MediaRef, Thread};
use crate::storage::{read_json, write_json_atomic, DataPaths};
use crate::store::list_dir;

/// Cap on recent files carried in a run summary
const MAX_RECENT_FILES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    /// Origin-post attachments
    Op,
    /// Reply attachments, capped
    Misc,
}

impl MediaCategory {
    pub const ALL: [MediaCategory; 2] = [MediaCategory::Op, MediaCategory::Misc];

    pub fn dir_name(&self) -> &'static str {
        match self {
            MediaCategory::Op => "op",
            MediaCategory::Misc => "misc",
        }
    }
}

/// An archived file. Created once per unique content hash, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    /// Display filename from the source
    pub filename: String,
    /// `<archiveTimestampMs>_<token><ext>`
    pub stored_name: String,
    pub category: MediaCategory,
    pub thread_id: u64,
    pub post_id: u64,
    pub md5: String,
    /// Archive time, unix milliseconds
    pub timestamp: i64,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Video,
    UnsupportedFormat,
    CategoryFull,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveOutcome {
    Stored(MediaFile),
    /// Bytes hashed to a known entry and were discarded
    Duplicate,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub category: MediaCategory,
    pub file_count: usize,
    pub total_size: u64,
}

/// Counters for one archiving run, persisted as the media analyzer result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRunSummary {
    pub timestamp: i64,
    pub files_downloaded: usize,
    pub duplicates_skipped: usize,
    pub files_skipped: usize,
    pub failures: usize,
    pub files_deleted: usize,
    pub category_stats: Vec<CategoryStats>,
    pub recent_files: Vec<MediaFile>,
}

impl MediaRunSummary {
    fn record(&mut self, outcome: &ArchiveOutcome) {
        match outcome {
            ArchiveOutcome::Stored(file) => {
                self.files_downloaded += 1;
                self.recent_files.push(file.clone());
            }
            ArchiveOutcome::Duplicate => self.duplicates_skipped += 1,
            ArchiveOutcome::Skipped(_) => self.files_skipped += 1,
        }
    }

    /// Keep the newest files only.
    pub fn finish(&mut self) {
        self.recent_files
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.recent_files.truncate(MAX_RECENT_FILES);
        self.timestamp = Utc::now().timestamp_millis();
    }
}

pub struct MediaArchiver {
    paths: DataPaths,
    max_misc_files: usize,
    max_file_age: Duration,
    /// content hash -> stored path
    hashes: BTreeMap<String, String>,
}

impl MediaArchiver {
    /// Create an archiver, loading the persisted hash index when present.
    /// A corrupt index is logged and replaced by an empty one.
    pub fn load(paths: DataPaths, config: &MediaConfig) -> Self {
        let hashes = match read_json::<BTreeMap<String, String>>(&paths.hashes_file()) {
            Ok(Some(hashes)) => {
                info!("Loaded {} existing file hashes", hashes.len());
                hashes
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("Error loading file hashes, starting empty: {}", e);
                BTreeMap::new()
            }
        };

        Self {
            paths,
            max_misc_files: config.max_misc_files,
            max_file_age: config.max_file_age(),
            hashes,
        }
    }

    /// Rewrite the whole hash index.
    pub fn save_index(&self) -> Result<()> {
        write_json_atomic(&self.paths.hashes_file(), &self.hashes)?;
        info!("Saved {} file hashes", self.hashes.len());
        Ok(())
    }

    pub fn index_len(&self) -> usize {
        self.hashes.len()
    }

    pub fn contains_hash(&self, hash: &str) -> bool {
        self.hashes.contains_key(hash)
    }

    /// Why an attachment would be refused before downloading, if at all.
    pub fn check_eligibility(&self, media: &MediaRef, category: MediaCategory) -> Result<Option<SkipReason>> {
        if media.is_video() {
            return Ok(Some(SkipReason::Video));
        }
        if !media.is_still_image() {
            return Ok(Some(SkipReason::UnsupportedFormat));
        }
        if category == MediaCategory::Misc
            && self.file_count(MediaCategory::Misc)? >= self.max_misc_files
        {
            return Ok(Some(SkipReason::CategoryFull));
        }
        Ok(None)
    }

    /// Download and archive one attachment.
    pub async fn archive<S: BoardSource + ?Sized>(
        &mut self,
        source: &S,
        media: &MediaRef,
        post_id: u64,
        category: MediaCategory,
        thread_id: u64,
    ) -> Result<ArchiveOutcome> {
        if let Some(reason) = self.check_eligibility(media, category)? {
            debug!(
                "Skipping {} for thread {} ({:?})",
                media.display_name(),
                thread_id,
                reason
            );
            return Ok(ArchiveOutcome::Skipped(reason));
        }

        let bytes = source.media(media).await?;
        self.store_bytes(&bytes, media, post_id, category, thread_id)
    }

    /// Hash downloaded bytes and write them unless the hash is already indexed.
    pub fn store_bytes(
        &mut self,
        bytes: &[u8],
        media: &MediaRef,
        post_id: u64,
        category: MediaCategory,
        thread_id: u64,
    ) -> Result<ArchiveOutcome> {
        let hash = format!("{:x}", Md5::digest(bytes));

        if self.hashes.contains_key(&hash) {
            info!("Skipping duplicate file: {}", media.display_name());
            return Ok(ArchiveOutcome::Duplicate);
        }

        let dir = self.paths.category_dir(category);
        std::fs::create_dir_all(&dir).map_err(|e| HarvestError::storage(&dir, e))?;

        let (timestamp, stored_name, path) = unique_stored_path(&dir, media);
        std::fs::write(&path, bytes).map_err(|e| HarvestError::storage(&path, e))?;
        self.hashes
            .insert(hash.clone(), path.to_string_lossy().into_owned());

        debug!("Archived {} as {}", media.display_name(), stored_name);

        Ok(ArchiveOutcome::Stored(MediaFile {
            filename: media.display_name(),
            stored_name,
            category,
            thread_id,
            post_id,
            md5: hash,
            timestamp,
            file_size: media.fsize.unwrap_or(bytes.len() as u64),
            width: media.w.unwrap_or(0),
            height: media.h.unwrap_or(0),
        }))
    }

    /// Archive the origin attachment (`op`) and every reply attachment (`misc`).
    /// Download failures are logged and counted; they never abort the thread.
    pub async fn process_thread<S: BoardSource + ?Sized>(
        &mut self,
        source: &S,
        thread: &Thread,
        summary: &mut MediaRunSummary,
    ) {
        let origin = thread
            .media
            .as_ref()
            .map(|m| (m, thread.no, MediaCategory::Op));
        let replies = thread
            .posts
            .iter()
            .filter_map(|p| p.media.as_ref().map(|m| (m, p.no, MediaCategory::Misc)));

        for (media, post_id, category) in origin.into_iter().chain(replies) {
            match self.archive(source, media, post_id, category, thread.no).await {
                Ok(outcome) => {
                    let downloaded = !matches!(outcome, ArchiveOutcome::Skipped(_));
                    summary.record(&outcome);
                    if downloaded {
                        source.pause().await;
                    }
                }
                Err(e) => {
                    warn!(
                        "Error downloading file from post {} in thread {}: {}",
                        post_id, thread.no, e
                    );
                    summary.failures += 1;
                }
            }
        }
    }

    /// Delete archived files whose modification time is older than the
    /// configured maximum age. Returns the number deleted.
    pub fn purge_older_than(&mut self, max_age: Option<Duration>) -> Result<usize> {
        let max_age = max_age.unwrap_or(self.max_file_age);
        let now = SystemTime::now();
        let mut deleted = 0;

        for category in MediaCategory::ALL {
            let dir = self.paths.category_dir(category);
            let files = match list_dir(&dir) {
                Ok(files) => files,
                Err(e) => {
                    warn!("Cannot list {}: {}", dir.display(), e);
                    continue;
                }
            };

            for path in files {
                let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(e) => {
                        warn!("Cannot stat {}: {}", path.display(), e);
                        continue;
                    }
                };

                let age = now.duration_since(modified).unwrap_or_default();
                if age > max_age {
                    match std::fs::remove_file(&path) {
                        Ok(()) => deleted += 1,
                        Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
                    }
                }
            }
        }

        let pruned = self.prune_index();
        if deleted > 0 || pruned > 0 {
            info!("Deleted {} old files, pruned {} hash entries", deleted, pruned);
        }
        Ok(deleted)
    }

    /// Drop index entries whose stored file is gone, so purged content can be archived again.
    pub fn prune_index(&mut self) -> usize {
        let before = self.hashes.len();
        self.hashes.retain(|_, path| Path::new(path).exists());
        before - self.hashes.len()
    }

    /// File count and total bytes per category, read from disk.
    pub fn category_stats(&self) -> Result<Vec<CategoryStats>> {
        let mut stats = Vec::new();
        for category in MediaCategory::ALL {
            let files = list_dir(&self.paths.category_dir(category))?;
            let total_size = files
                .iter()
                .filter_map(|p| std::fs::metadata(p).ok())
                .map(|m| m.len())
                .sum();
            stats.push(CategoryStats {
                category,
                file_count: files.len(),
                total_size,
            });
        }
        Ok(stats)
    }

    fn file_count(&self, category: MediaCategory) -> Result<usize> {
        Ok(list_dir(&self.paths.category_dir(category))?.len())
    }
}

/// Pick `<ms>_<tim><ext>`, bumping the timestamp until the name is free.
fn unique_stored_path(dir: &Path, media: &MediaRef) -> (i64, String, PathBuf) {
    let mut timestamp = Utc::now().timestamp_millis();
    loop {
        let stored_name = format!("{}_{}", timestamp, media.remote_name());
        let path = dir.join(&stored_name);
        if !path.exists() {
            return (timestamp, stored_name, path);
        }
        timestamp += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CatalogPage, Post, RawPost, ANONYMOUS};
    use async_trait::async_trait;

    fn media(tim: i64, ext: &str) -> MediaRef {
        MediaRef {
            tim,
            ext: ext.to_string(),
            filename: format!("file{}", tim),
            fsize: None,
            w: Some(640),
            h: Some(480),
        }
    }

    fn archiver(max_misc_files: usize) -> (tempfile::TempDir, DataPaths, MediaArchiver) {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        paths.ensure_directories().unwrap();
        let config = MediaConfig {
            max_misc_files,
            max_file_age_hours: 72,
        };
        let archiver = MediaArchiver::load(paths.clone(), &config);
        (dir, paths, archiver)
    }

    #[test]
    fn test_same_bytes_different_tokens_stored_once() {
        let (_dir, paths, mut archiver) = archiver(100);
        let bytes = b"the same picture";

        let first = archiver
            .store_bytes(bytes, &media(1, ".jpg"), 10, MediaCategory::Op, 1)
            .unwrap();
        let second = archiver
            .store_bytes(bytes, &media(2, ".jpg"), 20, MediaCategory::Misc, 2)
            .unwrap();

        assert!(matches!(first, ArchiveOutcome::Stored(_)));
        assert_eq!(second, ArchiveOutcome::Duplicate);
        assert_eq!(archiver.index_len(), 1);

        let total: usize = MediaCategory::ALL
            .iter()
            .map(|c| list_dir(&paths.category_dir(*c)).unwrap().len())
            .sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_stored_record_fields() {
        let (_dir, paths, mut archiver) = archiver(100);
        let outcome = archiver
            .store_bytes(b"abc", &media(1700, ".png"), 5, MediaCategory::Op, 4)
            .unwrap();

        let ArchiveOutcome::Stored(file) = outcome else {
            panic!("expected stored file");
        };
        assert_eq!(file.md5, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(file.filename, "file1700.png");
        assert!(file.stored_name.ends_with("_1700.png"));
        assert!(file.stored_name.starts_with(&file.timestamp.to_string()));
        assert_eq!(file.file_size, 3);
        assert_eq!((file.width, file.height), (640, 480));
        assert!(paths.category_dir(MediaCategory::Op).join(&file.stored_name).exists());
    }

    #[test]
    fn test_index_survives_restart() {
        let (_dir, paths, mut archiver) = archiver(100);
        archiver
            .store_bytes(b"persist me", &media(1, ".jpg"), 1, MediaCategory::Op, 1)
            .unwrap();
        archiver.save_index().unwrap();

        let mut reloaded = MediaArchiver::load(paths, &MediaConfig::default());
        assert_eq!(reloaded.index_len(), 1);
        let again = reloaded
            .store_bytes(b"persist me", &media(9, ".jpg"), 9, MediaCategory::Op, 9)
            .unwrap();
        assert_eq!(again, ArchiveOutcome::Duplicate);
    }

    #[test]
    fn test_eligibility_rules() {
        let (_dir, _paths, mut archiver) = archiver(2);
        assert_eq!(
            archiver.check_eligibility(&media(1, ".webm"), MediaCategory::Op).unwrap(),
            Some(SkipReason::Video)
        );
        assert_eq!(
            archiver.check_eligibility(&media(1, ".gif"), MediaCategory::Op).unwrap(),
            Some(SkipReason::UnsupportedFormat)
        );

        for i in 0..2u8 {
            archiver
                .store_bytes(&[i], &media(i as i64, ".jpg"), 1, MediaCategory::Misc, 1)
                .unwrap();
        }
        assert_eq!(
            archiver.check_eligibility(&media(5, ".jpg"), MediaCategory::Misc).unwrap(),
            Some(SkipReason::CategoryFull)
        );
        // the cap only applies to misc
        assert_eq!(
            archiver.check_eligibility(&media(5, ".jpg"), MediaCategory::Op).unwrap(),
            None
        );
    }

    #[test]
    fn test_purge_by_mtime_prunes_index() {
        let (_dir, paths, mut archiver) = archiver(100);
        let ArchiveOutcome::Stored(old) = archiver
            .store_bytes(b"old", &media(1, ".jpg"), 1, MediaCategory::Op, 1)
            .unwrap()
        else {
            panic!("expected stored file");
        };
        archiver
            .store_bytes(b"fresh", &media(2, ".jpg"), 2, MediaCategory::Misc, 1)
            .unwrap();

        let old_path = paths.category_dir(MediaCategory::Op).join(&old.stored_name);
        std::fs::File::options()
            .write(true)
            .open(&old_path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(100 * 3600))
            .unwrap();

        assert_eq!(archiver.purge_older_than(None).unwrap(), 1);
        assert!(!old_path.exists());
        assert_eq!(archiver.index_len(), 1);
        assert!(!archiver.contains_hash(&old.md5));

        let stats = archiver.category_stats().unwrap();
        assert_eq!(stats[0].file_count, 0);
        assert_eq!(stats[1].file_count, 1);
        assert_eq!(stats[1].total_size, 5);
    }

    #[test]
    fn test_purge_continues_past_unreadable_category() {
        let (_dir, paths, mut archiver) = archiver(100);
        let ArchiveOutcome::Stored(old) = archiver
            .store_bytes(b"old misc", &media(3, ".png"), 3, MediaCategory::Misc, 1)
            .unwrap()
        else {
            panic!("expected stored file");
        };
        let old_path = paths.category_dir(MediaCategory::Misc).join(&old.stored_name);
        std::fs::File::options()
            .write(true)
            .open(&old_path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(100 * 3600))
            .unwrap();

        // op listing fails: the path is a plain file, not a directory
        let op_dir = paths.category_dir(MediaCategory::Op);
        std::fs::remove_dir_all(&op_dir).unwrap();
        std::fs::write(&op_dir, b"not a directory").unwrap();

        assert_eq!(archiver.purge_older_than(None).unwrap(), 1);
        assert!(!old_path.exists());
        assert!(!archiver.contains_hash(&old.md5));
    }

    struct FixedBytes;

    #[async_trait]
    impl BoardSource for FixedBytes {
        async fn catalog(&self) -> Result<Vec<CatalogPage>> {
            Ok(Vec::new())
        }
        async fn thread_posts(&self, _thread_id: u64) -> Result<Vec<RawPost>> {
            Ok(Vec::new())
        }
        async fn media(&self, media: &MediaRef) -> Result<Vec<u8>> {
            if media.tim == 404 {
                return Err(HarvestError::NotFound("gone".into()));
            }
            // two tokens share content
            Ok(format!("bytes-{}", media.tim % 2).into_bytes())
        }
        async fn pause(&self) {}
    }

    #[tokio::test]
    async fn test_process_thread_categorizes_and_counts() {
        let (_dir, paths, mut archiver) = archiver(100);
        let reply = |no: u64, m: Option<MediaRef>| Post {
            no,
            resto: 1,
            name: ANONYMOUS.to_string(),
            com: None,
            time: 0,
            media: m,
        };
        let thread = Thread {
            no: 1,
            time: 0,
            now: "03/15/25(Sat)10:00:00".to_string(),
            name: ANONYMOUS.to_string(),
            sub: None,
            com: None,
            media: Some(media(10, ".jpg")),
            replies: 4,
            images: 4,
            posts: vec![
                reply(2, Some(media(11, ".png"))),
                reply(3, Some(media(12, ".jpg"))), // same bytes as the origin
                reply(4, Some(media(13, ".mp4"))),
                reply(5, Some(media(404, ".jpg"))),
                reply(6, None),
            ],
            last_modified: 0,
        };

        let mut summary = MediaRunSummary::default();
        archiver.process_thread(&FixedBytes, &thread, &mut summary).await;
        summary.finish();

        assert_eq!(summary.files_downloaded, 2);
        assert_eq!(summary.duplicates_skipped, 1);
        assert_eq!(summary.files_skipped, 1);
        assert_eq!(summary.failures, 1);
        assert_eq!(list_dir(&paths.category_dir(MediaCategory::Op)).unwrap().len(), 1);
        assert_eq!(list_dir(&paths.category_dir(MediaCategory::Misc)).unwrap().len(), 1);
    }
}
