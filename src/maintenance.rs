//! Storage maintenance and statistics
//!
//! Applies the retention policies outside a scrape run and reports how much
//! the data directory currently holds.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::analysis::TrendAggregator;
use crate::config::Config;
use crate::error::Result;
use crate::media::{CategoryStats, MediaArchiver};
use crate::storage::DataPaths;
use crate::store::{list_dir, SnapshotStore};

/// Retention operations over the data directory
pub struct Maintenance<'a> {
    paths: &'a DataPaths,
    config: &'a Config,
}

impl<'a> Maintenance<'a> {
    pub fn new(paths: &'a DataPaths, config: &'a Config) -> Self {
        Self { paths, config }
    }

    /// Run all maintenance tasks
    pub fn run_all(&self, now: DateTime<Utc>) -> Result<MaintenanceStats> {
        let mut stats = MaintenanceStats::default();
        self.paths.ensure_directories()?;

        // 1. Old snapshots and their origin media
        let purge = SnapshotStore::new(self.paths.clone())
            .purge_older_than(self.config.scraper.thread_age_limit_hours, now)?;
        stats.snapshots_removed = purge.removed;
        stats.snapshot_media_removed = purge.media_removed;

        // 2. Old media files, then index entries pointing at missing files
        let mut archiver = MediaArchiver::load(self.paths.clone(), &self.config.media);
        let indexed = archiver.index_len();
        stats.media_deleted = archiver.purge_older_than(None)?;
        stats.hashes_pruned = indexed - archiver.index_len();
        archiver.save_index()?;

        // 3. Trend series
        stats.trend_points_dropped = TrendAggregator::new(self.paths, self.config.trends.clone())
            .compact_stored(now)?;

        info!("Maintenance finished: {:?}", stats);
        Ok(stats)
    }

    /// Get current storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let snapshots = list_dir(&self.paths.threads_dir())?;
        let snapshot_bytes = snapshots
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        let archiver = MediaArchiver::load(self.paths.clone(), &self.config.media);
        let trends = TrendAggregator::new(self.paths, self.config.trends.clone());

        Ok(StorageStats {
            snapshot_count: SnapshotStore::new(self.paths.clone()).count()?,
            snapshot_bytes,
            media: archiver.category_stats()?,
            hash_entries: archiver.index_len(),
            trend_points: trends.load().len(),
            article_count: list_dir(&self.paths.articles_dir())?.len(),
        })
    }
}

#[derive(Debug, Default)]
pub struct MaintenanceStats {
    pub snapshots_removed: usize,
    pub snapshot_media_removed: usize,
    pub media_deleted: usize,
    pub hashes_pruned: usize,
    pub trend_points_dropped: usize,
}

#[derive(Debug)]
pub struct StorageStats {
    pub snapshot_count: usize,
    pub snapshot_bytes: u64,
    pub media: Vec<CategoryStats>,
    pub hash_entries: usize,
    pub trend_points: usize,
    pub article_count: usize,
}

impl StorageStats {
    pub fn media_bytes(&self) -> u64 {
        self.media.iter().map(|c| c.total_size).sum()
    }

    pub fn print_report(&self) {
        println!("\n{}", "=".repeat(50));
        println!("STORAGE STATISTICS");
        println!("{}", "=".repeat(50));
        println!("\nRecords:");
        println!("  Thread snapshots: {:>10}", self.snapshot_count);
        println!("  Articles:         {:>10}", self.article_count);
        println!("  Hash index:       {:>10}", self.hash_entries);
        println!("  Trend points:     {:>10}", self.trend_points);
        println!("\nMedia:");
        for category in &self.media {
            println!(
                "  {:<16}  {:>10} files, {}",
                category.category.dir_name(),
                category.file_count,
                format_bytes(category.total_size)
            );
        }
        println!("\nStorage:");
        println!("  Snapshots:        {:>10}", format_bytes(self.snapshot_bytes));
        println!("  Media:            {:>10}", format_bytes(self.media_bytes()));
    }
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / 1024.0 / 1024.0)
    } else {
        format!("{:.2} GB", bytes as f64 / 1024.0 / 1024.0 / 1024.0)
    }
}
