//! Tracked-term mention analysis
//!
//! Scans origin posts and replies for a whole-word, case-insensitive match of
//! the tracked term. Matching runs on the markup-stripped comment, so a term
//! split by tags or written as an entity still counts.

use chrono::Utc;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::config::TermConfig;
use crate::error::{HarvestError, Result};
use crate::models::{Post, Thread};
use crate::storage::{write_json_atomic, DataPaths};
use crate::text::strip_html;

/// Analyzer name, also the results directory under `analysis/`
pub const ANALYZER_NAME: &str = "terms";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermMention {
    pub post_id: u64,
    pub thread_id: u64,
    /// Comment as posted, markup included
    pub comment: String,
    /// Post time, unix milliseconds
    pub timestamp: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermMetadata {
    pub total_posts_analyzed: usize,
    pub posts_with_term: usize,
    pub last_analysis: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermReport {
    pub timestamp: i64,
    pub term: String,
    /// Newest first, capped
    pub posts: Vec<TermMention>,
    pub metadata: TermMetadata,
}

#[derive(Serialize)]
struct ResultsFile<'a> {
    results: [&'a TermReport; 1],
}

pub struct TermMentionAnalyzer {
    term: String,
    pattern: Regex,
    max_posts: usize,
}

impl TermMentionAnalyzer {
    pub fn new(config: &TermConfig) -> Result<Self> {
        let term = config.tracked_term.trim().to_string();
        let pattern = RegexBuilder::new(&format!(r"\b{}\b", regex::escape(&term)))
            .case_insensitive(true)
            .build()
            .map_err(|e| HarvestError::Config(format!("invalid tracked term {:?}: {}", term, e)))?;

        Ok(Self {
            term,
            pattern,
            max_posts: config.max_posts,
        })
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn matches(&self, comment: &str) -> bool {
        self.pattern.is_match(&strip_html(comment))
    }

    /// Scan a batch of threads. A post seen more than once yields one entry.
    pub fn analyze(&self, threads: &[Thread]) -> TermReport {
        let mut found: HashMap<u64, TermMention> = HashMap::new();
        let mut scanned = 0;

        for thread in threads {
            let origin = thread.origin_post();
            for post in std::iter::once(&origin).chain(&thread.posts) {
                scanned += 1;
                if let Some(mention) = self.mention(post, thread.no) {
                    found.entry(mention.post_id).or_insert(mention);
                }
            }
        }

        let posts_with_term = found.len();
        let mut posts: Vec<TermMention> = found.into_values().collect();
        posts.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.post_id.cmp(&a.post_id))
        });
        posts.truncate(self.max_posts);

        info!(
            "Term analysis: {} posts scanned, {} mention {:?}",
            scanned, posts_with_term, self.term
        );

        let now = Utc::now().timestamp_millis();
        TermReport {
            timestamp: now,
            term: self.term.clone(),
            posts,
            metadata: TermMetadata {
                total_posts_analyzed: scanned,
                posts_with_term,
                last_analysis: now,
            },
        }
    }

    fn mention(&self, post: &Post, thread_id: u64) -> Option<TermMention> {
        let comment = post.com.as_deref()?;
        if !self.matches(comment) {
            return None;
        }
        Some(TermMention {
            post_id: post.no,
            thread_id,
            comment: comment.to_string(),
            timestamp: post.time * 1000,
            name: post.name.clone(),
        })
    }
}

/// Persist as `analysis/terms/results.json` in the `{ "results": [...] }` envelope.
pub fn save_report(paths: &DataPaths, report: &TermReport) -> Result<()> {
    write_json_atomic(
        &paths.analyzer_results_file(ANALYZER_NAME),
        &ResultsFile { results: [report] },
    )
}
