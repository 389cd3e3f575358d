//! On-disk layout and whole-file JSON persistence
//!
//! Every JSON document is written to `<target>.tmp` and renamed over the
//! target, so readers observe either the old or the new file, never a torn one.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{HarvestError, Result};
use crate::media::MediaCategory;

/// Paths under the data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn threads_dir(&self) -> PathBuf {
        self.root.join("threads")
    }

    pub fn thread_file(&self, thread_id: u64) -> PathBuf {
        self.threads_dir().join(format!("{}.json", thread_id))
    }

    pub fn media_dir(&self) -> PathBuf {
        self.root.join("media")
    }

    pub fn category_dir(&self, category: MediaCategory) -> PathBuf {
        self.media_dir().join(category.dir_name())
    }

    pub fn hashes_file(&self) -> PathBuf {
        self.media_dir().join("hashes.json")
    }

    pub fn analysis_dir(&self) -> PathBuf {
        self.root.join("analysis")
    }

    pub fn analyzer_results_file(&self, analyzer: &str) -> PathBuf {
        self.analysis_dir().join(analyzer).join("results.json")
    }

    pub fn trends_file(&self) -> PathBuf {
        self.analysis_dir().join("delusional-trends.json")
    }

    pub fn latest_summary_file(&self) -> PathBuf {
        self.analysis_dir().join("latest-summary.json")
    }

    pub fn latest_delusional_file(&self) -> PathBuf {
        self.analysis_dir().join("latest-delusional.json")
    }

    pub fn previous_delusional_file(&self) -> PathBuf {
        self.analysis_dir().join("previous-delusional.json")
    }

    pub fn articles_dir(&self) -> PathBuf {
        self.root.join("articles")
    }

    pub fn article_file(&self, thread_id: u64) -> PathBuf {
        self.articles_dir().join(format!("{}.json", thread_id))
    }

    /// Create the fixed directory tree. Failure here is a setup error.
    pub fn ensure_directories(&self) -> Result<()> {
        let mut dirs = vec![
            self.root.clone(),
            self.threads_dir(),
            self.media_dir(),
            self.analysis_dir(),
            self.articles_dir(),
        ];
        dirs.extend(MediaCategory::ALL.iter().map(|c| self.category_dir(*c)));

        for dir in dirs {
            if !dir.exists() {
                info!("Creating directory: {}", dir.display());
            }
            std::fs::create_dir_all(&dir).map_err(|e| HarvestError::storage(&dir, e))?;
        }
        Ok(())
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HarvestError::storage(parent, e))?;
    }

    let json = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path(path);

    if let Err(e) = std::fs::write(&tmp, &json).and_then(|_| std::fs::rename(&tmp, path)) {
        if tmp.exists() {
            if let Err(cleanup) = std::fs::remove_file(&tmp) {
                warn!("Failed to clean up {}: {}", tmp.display(), cleanup);
            }
        }
        return Err(HarvestError::storage(path, e));
    }

    debug!("Wrote {} ({} bytes)", path.display(), json.len());
    Ok(())
}

/// Read a JSON document; `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HarvestError::storage(path, e)),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_layout() {
        let paths = DataPaths::new("/data");
        assert_eq!(paths.thread_file(42), PathBuf::from("/data/threads/42.json"));
        assert_eq!(paths.hashes_file(), PathBuf::from("/data/media/hashes.json"));
        assert_eq!(
            paths.analyzer_results_file("terms"),
            PathBuf::from("/data/analysis/terms/results.json")
        );
        assert_eq!(
            paths.trends_file(),
            PathBuf::from("/data/analysis/delusional-trends.json")
        );
        assert_eq!(paths.category_dir(MediaCategory::Op), PathBuf::from("/data/media/op"));
    }

    #[test]
    fn test_write_then_read_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        let mut doc = BTreeMap::new();
        doc.insert("a".to_string(), 1);
        write_json_atomic(&path, &doc).unwrap();

        let loaded: Option<BTreeMap<String, i32>> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(doc));
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Vec<u8>> = read_json(&dir.path().join("missing.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path().join("data"));
        paths.ensure_directories().unwrap();
        assert!(paths.threads_dir().is_dir());
        assert!(paths.category_dir(MediaCategory::Misc).is_dir());
        assert!(paths.articles_dir().is_dir());
    }
}
