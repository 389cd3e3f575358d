//! Delusional-content statistics and the downsampled trend series
//!
//! The series lives in `analysis/delusional-trends.json`, ascending by
//! timestamp. Points are only appended (at most one per minimum interval) or
//! dropped by compaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::TrendConfig;
use crate::error::Result;
use crate::storage::{read_json, write_json_atomic, DataPaths};

const HOUR_MS: i64 = 3_600_000;

/// Per-thread sample produced by the article generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleStats {
    pub analyzed_comments: usize,
    pub delusional_comments: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelusionalStatistics {
    pub mean: f64,
    pub median: f64,
    pub total_analyzed: usize,
    pub total_delusional: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelusionalTrend {
    /// Unix milliseconds
    pub timestamp: i64,
    pub percentage: f64,
    pub thread_count: usize,
}

/// Mean, median and totals over the samples. Empty input yields zeros.
pub fn compute_statistics(samples: &[ArticleStats]) -> DelusionalStatistics {
    if samples.is_empty() {
        return DelusionalStatistics::default();
    }

    let mut percentages: Vec<f64> = samples.iter().map(|s| s.percentage).collect();
    percentages.sort_by(|a, b| a.total_cmp(b));

    let mid = percentages.len() / 2;
    let median = if percentages.len() % 2 == 0 {
        (percentages[mid - 1] + percentages[mid]) / 2.0
    } else {
        percentages[mid]
    };

    DelusionalStatistics {
        mean: percentages.iter().sum::<f64>() / percentages.len() as f64,
        median,
        total_analyzed: samples.iter().map(|s| s.analyzed_comments).sum(),
        total_delusional: samples.iter().map(|s| s.delusional_comments).sum(),
    }
}

/// Downsample a series.
///
/// Drops points outside the retention window, keeps the `max_per_hour` most
/// recent points of each hour bucket, sorts ascending and keeps the newest
/// `max_stored()` points. Applying it twice with the same `now` changes nothing.
pub fn compact(series: Vec<DelusionalTrend>, now_ms: i64, config: &TrendConfig) -> Vec<DelusionalTrend> {
    let cutoff = now_ms - i64::from(config.hours_to_keep) * HOUR_MS;

    let mut by_hour: BTreeMap<i64, Vec<DelusionalTrend>> = BTreeMap::new();
    for point in series.into_iter().filter(|p| p.timestamp > cutoff) {
        by_hour
            .entry(point.timestamp.div_euclid(HOUR_MS))
            .or_default()
            .push(point);
    }

    let mut kept: Vec<DelusionalTrend> = by_hour
        .into_values()
        .flat_map(|mut bucket| {
            // newest first; among equal timestamps the latest appended wins
            bucket.reverse();
            bucket.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            bucket.dedup_by_key(|p| p.timestamp);
            bucket.truncate(config.max_per_hour);
            bucket
        })
        .collect();

    kept.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let excess = kept.len().saturating_sub(config.max_stored());
    kept.drain(..excess);
    kept
}

/// Owner of the persisted trend series.
pub struct TrendAggregator {
    path: PathBuf,
    config: TrendConfig,
}

impl TrendAggregator {
    pub fn new(paths: &DataPaths, config: TrendConfig) -> Self {
        Self {
            path: paths.trends_file(),
            config,
        }
    }

    /// The stored series; a missing or unreadable file reads as empty.
    pub fn load(&self) -> Vec<DelusionalTrend> {
        match read_json::<Vec<DelusionalTrend>>(&self.path) {
            Ok(series) => series.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to read trend series {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Append a point for `samples` unless the newest point is younger than
    /// the minimum interval, then compact and persist. Returns the series.
    pub fn update_trend(&self, samples: &[ArticleStats], now: DateTime<Utc>) -> Result<Vec<DelusionalTrend>> {
        let series = self.load();
        let now_ms = now.timestamp_millis();

        if samples.is_empty() {
            debug!("No samples, trend series left unchanged");
            return Ok(series);
        }

        if let Some(newest) = series.iter().map(|p| p.timestamp).max() {
            let min_interval_ms = self.config.min_interval_minutes * 60_000;
            if now_ms <= newest || now_ms - newest < min_interval_ms {
                debug!(
                    "Last trend point is {} minutes old, skipping update",
                    (now_ms - newest) / 60_000
                );
                return Ok(series);
            }
        }

        let statistics = compute_statistics(samples);
        let mut updated = series;
        updated.push(DelusionalTrend {
            timestamp: now_ms,
            percentage: statistics.mean,
            thread_count: samples.len(),
        });

        let compacted = compact(updated, now_ms, &self.config);
        write_json_atomic(&self.path, &compacted)?;
        info!(
            "Trend updated: {:.2}% over {} threads ({} points stored)",
            statistics.mean,
            samples.len(),
            compacted.len()
        );
        Ok(compacted)
    }

    /// Compact the stored series in place. Returns the number of points dropped.
    pub fn compact_stored(&self, now: DateTime<Utc>) -> Result<usize> {
        let series = self.load();
        let before = series.len();
        let compacted = compact(series, now.timestamp_millis(), &self.config);
        let dropped = before - compacted.len();
        if dropped > 0 {
            write_json_atomic(&self.path, &compacted)?;
        }
        Ok(dropped)
    }
}
