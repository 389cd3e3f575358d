//! Stratified thread selection for the analysis run
//!
//! Threads are split by reply count into four buckets and each bucket is
//! filled to its quota. A bucket without enough threads borrows the unselected
//! threads whose reply counts sit closest to its range, so any input with at
//! least `total` distinct threads yields exactly `total`.

use std::collections::HashSet;
use tracing::{debug, info};

use crate::config::SelectionConfig;
use crate::error::{HarvestError, Result};
use crate::models::Thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Top,
    MediumHigh,
    Medium,
    Low,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [Bucket::Top, Bucket::MediumHigh, Bucket::Medium, Bucket::Low];

    /// Inclusive lower and exclusive upper reply bound.
    fn range(&self, config: &SelectionConfig) -> (u32, Option<u32>) {
        match self {
            Bucket::Top => (config.top_min_replies, None),
            Bucket::MediumHigh => (config.medium_high_min_replies, Some(config.top_min_replies)),
            Bucket::Medium => (config.medium_min_replies, Some(config.medium_high_min_replies)),
            Bucket::Low => (0, Some(config.medium_min_replies)),
        }
    }

    fn quota(&self, config: &SelectionConfig) -> usize {
        match self {
            Bucket::Top => config.top_quota,
            Bucket::MediumHigh => config.medium_high_quota,
            Bucket::Medium => config.medium_quota,
            Bucket::Low => config.low_quota,
        }
    }

    /// Distance in replies from the bucket's range, 0 inside it.
    fn distance(&self, replies: u32, config: &SelectionConfig) -> u32 {
        let (min, max) = self.range(config);
        if replies < min {
            min - replies
        } else {
            match max {
                Some(max) if replies >= max => replies - max + 1,
                _ => 0,
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThreadSelection {
    pub top: Vec<Thread>,
    pub medium_high: Vec<Thread>,
    pub medium: Vec<Thread>,
    pub low: Vec<Thread>,
}

impl ThreadSelection {
    pub fn bucket(&self, bucket: Bucket) -> &[Thread] {
        match bucket {
            Bucket::Top => &self.top,
            Bucket::MediumHigh => &self.medium_high,
            Bucket::Medium => &self.medium,
            Bucket::Low => &self.low,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut Vec<Thread> {
        match bucket {
            Bucket::Top => &mut self.top,
            Bucket::MediumHigh => &mut self.medium_high,
            Bucket::Medium => &mut self.medium,
            Bucket::Low => &mut self.low,
        }
    }

    pub fn len(&self) -> usize {
        self.top.len() + self.medium_high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All selected threads, top bucket first.
    pub fn into_threads(self) -> Vec<Thread> {
        let mut threads = self.top;
        threads.extend(self.medium_high);
        threads.extend(self.medium);
        threads.extend(self.low);
        threads
    }
}

fn by_replies_desc(a: &&Thread, b: &&Thread) -> std::cmp::Ordering {
    b.replies.cmp(&a.replies).then_with(|| b.no.cmp(&a.no))
}

/// Select exactly `config.total` threads across the four buckets, or fail
/// with `InsufficientData`.
pub fn select_threads(threads: &[Thread], config: &SelectionConfig) -> Result<ThreadSelection> {
    let mut seen = HashSet::new();
    let mut pool: Vec<&Thread> = threads.iter().filter(|t| seen.insert(t.no)).collect();
    pool.sort_by(by_replies_desc);

    let mut selection = ThreadSelection::default();
    let mut taken: HashSet<u64> = HashSet::new();

    for bucket in Bucket::ALL {
        let quota = bucket.quota(config);
        let picked: Vec<Thread> = pool
            .iter()
            .filter(|t| bucket.distance(t.replies, config) == 0)
            .take(quota)
            .map(|t| (*t).clone())
            .collect();
        taken.extend(picked.iter().map(|t| t.no));
        *selection.bucket_mut(bucket) = picked;
    }

    for bucket in Bucket::ALL {
        let missing = bucket.quota(config).saturating_sub(selection.bucket(bucket).len());
        if missing == 0 {
            continue;
        }

        let mut nearest: Vec<&Thread> = pool
            .iter()
            .copied()
            .filter(|t| !taken.contains(&t.no))
            .collect();
        nearest.sort_by(|a, b| {
            bucket
                .distance(a.replies, config)
                .cmp(&bucket.distance(b.replies, config))
                .then_with(|| by_replies_desc(a, b))
        });

        let padding: Vec<Thread> = nearest.into_iter().take(missing).cloned().collect();
        debug!("Padding {:?} bucket with {} nearby threads", bucket, padding.len());
        taken.extend(padding.iter().map(|t| t.no));

        let slot = selection.bucket_mut(bucket);
        slot.extend(padding);
        slot.sort_by(|a, b| by_replies_desc(&a, &b));
    }

    if selection.len() != config.total {
        return Err(HarvestError::InsufficientData {
            expected: config.total,
            actual: selection.len(),
        });
    }

    info!(
        "Selected {} threads (top {}, medium-high {}, medium {}, low {})",
        selection.len(),
        selection.top.len(),
        selection.medium_high.len(),
        selection.medium.len(),
        selection.low.len()
    );
    Ok(selection)
}
