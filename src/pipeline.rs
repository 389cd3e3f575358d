//! Harvest pipeline
//!
//! `scrape()` pulls the catalog, materializes the sampled threads one at a
//! time, archives their media and snapshots them, then runs the term
//! analyzer. `analyze()` runs the language-model summary over a stratified
//! selection of stored threads. Both take the run lock, so at most one run
//! touches the data directory at a time.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::analysis::terms::{self, TermMentionAnalyzer};
use crate::analysis::{select_threads, Summarizer, Summary, TrendAggregator};
use crate::catalog::sample_catalog;
use crate::client::BoardSource;
use crate::config::Config;
use crate::error::{HarvestError, Result};
use crate::llm::TextGenerator;
use crate::materializer::{materialize, ThreadFetch};
use crate::media::{MediaArchiver, MediaRunSummary};
use crate::models::Thread;
use crate::storage::{write_json_atomic, DataPaths};
use crate::store::SnapshotStore;

/// Analyzer name for the media run summary
const MEDIA_ANALYZER: &str = "media";

/// Counters for one scrape run
#[derive(Debug, Default)]
pub struct ScrapeStats {
    pub candidates: usize,
    pub saved: usize,
    pub pruned: usize,
    pub failed: usize,
    pub snapshots_purged: usize,
    pub term_mentions: usize,
    pub media: MediaRunSummary,
}

pub struct Harvester {
    config: Config,
    paths: DataPaths,
    source: Arc<dyn BoardSource>,
    generator: Option<Arc<dyn TextGenerator>>,
    run_lock: Mutex<()>,
}

impl Harvester {
    pub fn new(
        config: Config,
        source: Arc<dyn BoardSource>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        let paths = DataPaths::new(&config.storage.data_dir);
        Self {
            config,
            paths,
            source,
            generator,
            run_lock: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    /// One harvesting pass. Only setup failures are returned; everything
    /// per-thread is logged, counted and skipped.
    pub async fn scrape(&self) -> Result<ScrapeStats> {
        let _guard = self.run_lock.lock().await;
        let now = Utc::now();
        let mut stats = ScrapeStats::default();

        self.paths.ensure_directories()?;
        let store = SnapshotStore::new(self.paths.clone());

        match store.purge_older_than(self.config.scraper.thread_age_limit_hours, now) {
            Ok(purge) => stats.snapshots_purged = purge.removed,
            Err(e) => warn!("Snapshot purge failed: {}", e),
        }

        let mut archiver = MediaArchiver::load(self.paths.clone(), &self.config.media);

        let catalog = match self.source.catalog().await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!("Catalog fetch failed, ending run: {}", e);
                return Ok(stats);
            }
        };

        let candidates = sample_catalog(&catalog, self.config.scraper.max_threads_per_category);
        stats.candidates = candidates.len();
        info!("Processing {} candidate threads", candidates.len());

        let mut threads = Vec::new();
        for candidate in &candidates {
            match materialize(self.source.as_ref(), candidate.no, Utc::now()).await {
                ThreadFetch::Found(thread) => {
                    archiver
                        .process_thread(self.source.as_ref(), &thread, &mut stats.media)
                        .await;
                    match store.save(&thread) {
                        Ok(_) => stats.saved += 1,
                        Err(e) => {
                            warn!("Failed to save thread {}: {}", thread.no, e);
                            stats.failed += 1;
                        }
                    }
                    threads.push(thread);
                }
                ThreadFetch::Pruned => stats.pruned += 1,
                ThreadFetch::Failed(e) => {
                    warn!("Error processing thread {}: {}", candidate.no, e);
                    stats.failed += 1;
                }
            }
            self.source.pause().await;
        }

        self.run_term_analysis(&threads, &mut stats);
        self.finish_media_run(&mut archiver, &mut stats.media);

        info!(
            "Scrape complete: {} saved, {} pruned, {} failed of {} candidates; {} new media files",
            stats.saved, stats.pruned, stats.failed, stats.candidates, stats.media.files_downloaded
        );
        Ok(stats)
    }

    fn run_term_analysis(&self, threads: &[Thread], stats: &mut ScrapeStats) {
        let analyzer = match TermMentionAnalyzer::new(&self.config.terms) {
            Ok(analyzer) => analyzer,
            Err(e) => {
                warn!("Term analyzer unavailable: {}", e);
                return;
            }
        };

        let report = analyzer.analyze(threads);
        stats.term_mentions = report.metadata.posts_with_term;
        if let Err(e) = terms::save_report(&self.paths, &report) {
            warn!("Failed to save term report: {}", e);
        }
    }

    fn finish_media_run(&self, archiver: &mut MediaArchiver, summary: &mut MediaRunSummary) {
        match archiver.purge_older_than(None) {
            Ok(deleted) => summary.files_deleted = deleted,
            Err(e) => warn!("Media purge failed: {}", e),
        }
        match archiver.category_stats() {
            Ok(category_stats) => summary.category_stats = category_stats,
            Err(e) => warn!("Could not read media stats: {}", e),
        }
        summary.finish();

        if let Err(e) = write_json_atomic(&self.paths.analyzer_results_file(MEDIA_ANALYZER), summary) {
            warn!("Failed to save media summary: {}", e);
        }
        if let Err(e) = archiver.save_index() {
            warn!("Failed to save hash index: {}", e);
        }
    }

    /// Select threads from the store and run the summary. Fails with
    /// `InsufficientData` when the store cannot fill every bucket.
    pub async fn analyze(&self) -> Result<Summary> {
        let _guard = self.run_lock.lock().await;

        let generator = self.generator.clone().ok_or_else(|| {
            HarvestError::Config(format!(
                "{} environment variable is not set",
                self.config.llm.api_key_env
            ))
        })?;

        self.paths.ensure_directories()?;
        let store = SnapshotStore::new(self.paths.clone());
        let threads = store.load_all()?;
        info!("Loaded {} threads", threads.len());

        let selection = select_threads(&threads, &self.config.selection)?;
        let trends = TrendAggregator::new(&self.paths, self.config.trends.clone());
        let summarizer = Summarizer::new(generator, self.paths.clone(), trends);

        summarizer.summarize(&selection.into_threads(), Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::PromptRequest;
    use crate::models::{CatalogPage, CatalogThread, MediaRef, RawPost};
    use crate::storage::read_json;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// In-memory board: a catalog plus per-thread post lists; missing threads are pruned.
    struct MemoryBoard {
        catalog: Vec<CatalogPage>,
        threads: HashMap<u64, Vec<RawPost>>,
        catalog_down: bool,
    }

    #[async_trait]
    impl BoardSource for MemoryBoard {
        async fn catalog(&self) -> Result<Vec<CatalogPage>> {
            if self.catalog_down {
                return Err(HarvestError::transient("/catalog.json", "HTTP 503"));
            }
            Ok(self.catalog.clone())
        }

        async fn thread_posts(&self, thread_id: u64) -> Result<Vec<RawPost>> {
            self.threads
                .get(&thread_id)
                .cloned()
                .ok_or_else(|| HarvestError::NotFound(format!("/thread/{}.json", thread_id)))
        }

        async fn media(&self, media: &MediaRef) -> Result<Vec<u8>> {
            Ok(format!("image-{}", media.tim).into_bytes())
        }

        async fn pause(&self) {}
    }

    fn recent_date() -> String {
        (Utc::now() - chrono::Duration::hours(1))
            .format("%m/%d/%y(%a)%H:%M:%S")
            .to_string()
    }

    fn posts(no: u64, replies: usize, date: Option<String>) -> Vec<RawPost> {
        let mut op = RawPost {
            no,
            now: date,
            time: Utc::now().timestamp(),
            com: Some(format!("thread {} op", no)),
            tim: Some(no as i64 * 10),
            ext: Some(".jpg".to_string()),
            ..Default::default()
        };
        op.filename = Some("op".to_string());

        let mut all = vec![op];
        all.extend((0..replies).map(|i| RawPost {
            no: no + 1 + i as u64,
            resto: no,
            time: Utc::now().timestamp(),
            com: Some(if i == 0 { "take your meds".to_string() } else { "ok".to_string() }),
            ..Default::default()
        }));
        all
    }

    fn board(catalog_down: bool) -> MemoryBoard {
        let ids = [100u64, 200, 300, 400];
        let catalog = vec![CatalogPage {
            page: 1,
            threads: ids
                .iter()
                .map(|no| CatalogThread {
                    no: *no,
                    replies: Some(*no as u32 / 100),
                    ..Default::default()
                })
                .collect(),
        }];

        let mut threads = HashMap::new();
        threads.insert(100, posts(100, 2, Some(recent_date())));
        threads.insert(200, posts(200, 1, Some(recent_date())));
        threads.insert(300, posts(300, 1, None)); // unparseable
        // 400 is pruned

        MemoryBoard {
            catalog,
            threads,
            catalog_down,
        }
    }

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_scrape_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let harvester = Harvester::new(config(dir.path()), Arc::new(board(false)), None);

        let stats = harvester.scrape().await.unwrap();
        assert_eq!(stats.candidates, 4);
        assert_eq!(stats.saved, 2);
        assert_eq!(stats.pruned, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.term_mentions, 2);
        assert_eq!(stats.media.files_downloaded, 2);

        let paths = harvester.paths();
        assert!(paths.thread_file(100).exists());
        assert!(!paths.thread_file(300).exists());
        assert!(paths.hashes_file().exists());
        let media: Option<serde_json::Value> =
            read_json(&paths.analyzer_results_file(MEDIA_ANALYZER)).unwrap();
        assert_eq!(media.unwrap()["filesDownloaded"], 2);
        assert!(paths.analyzer_results_file("terms").exists());

        // a second pass re-downloads nothing new
        let again = harvester.scrape().await.unwrap();
        assert_eq!(again.media.files_downloaded, 0);
        assert_eq!(again.media.duplicates_skipped, 2);
    }

    #[tokio::test]
    async fn test_catalog_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let harvester = Harvester::new(config(dir.path()), Arc::new(board(true)), None);

        let stats = harvester.scrape().await.unwrap();
        assert_eq!(stats.candidates, 0);
        assert!(harvester.paths().threads_dir().is_dir());
    }

    struct Fixed;

    #[async_trait]
    impl TextGenerator for Fixed {
        async fn generate(&self, request: PromptRequest) -> Result<String> {
            if request.messages[0].content.contains("psychiatrist") {
                Ok("1".into())
            } else {
                Ok("HEADLINE: Something\nARTICLE: Text".into())
            }
        }
    }

    #[tokio::test]
    async fn test_analyze_requires_generator_and_enough_threads() {
        let dir = tempfile::tempdir().unwrap();
        let harvester = Harvester::new(config(dir.path()), Arc::new(board(false)), None);
        assert!(matches!(harvester.analyze().await, Err(HarvestError::Config(_))));

        let harvester =
            Harvester::new(config(dir.path()), Arc::new(board(false)), Some(Arc::new(Fixed)));
        harvester.scrape().await.unwrap();
        assert!(matches!(
            harvester.analyze().await,
            Err(HarvestError::InsufficientData { expected: 12, actual: 2 })
        ));
    }

    #[tokio::test]
    async fn test_analyze_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut board = board(false);
        board.catalog[0].threads = (1..=12u64)
            .map(|i| CatalogThread {
                no: i * 1000,
                replies: Some(i as u32 * 12),
                ..Default::default()
            })
            .collect();
        board.threads = (1..=12u64)
            .map(|i| (i * 1000, posts(i * 1000, 2, Some(recent_date()))))
            .collect();

        let harvester = Harvester::new(config(dir.path()), Arc::new(board), Some(Arc::new(Fixed)));
        let stats = harvester.scrape().await.unwrap();
        assert_eq!(stats.saved, 12);

        let summary = harvester.analyze().await.unwrap();
        assert_eq!(summary.articles.articles.len(), 12);
        assert_eq!(summary.matrix.trends.len(), 1);
        assert!(harvester.paths().latest_summary_file().exists());
    }
}
