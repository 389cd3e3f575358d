//! Analysis run: per-thread articles, delusional-content counts, themes and
//! the trend update.
//!
//! Every model call can fail independently. A failed article drops that
//! thread, failed theme extraction yields no themes, and the run still
//! writes its outputs.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::analysis::trends::{
    compute_statistics, ArticleStats, DelusionalStatistics, DelusionalTrend, TrendAggregator,
};
use crate::error::{HarvestError, Result};
use crate::llm::{extract_json_block, PromptRequest, TextGenerator};
use crate::models::Thread;
use crate::storage::{read_json, write_json_atomic, DataPaths};
use crate::text::strip_html;

static HEADLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"HEADLINE:\s*(.*)").unwrap());
static ARTICLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)ARTICLE:\s*(.*)").unwrap());
static FIRST_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

const ARTICLE_PROMPT: &str = "You are an expert journalist summarizing online discussions.
Your task is to analyze a thread of posts and generate:
1. A clear, concise headline of 4 to 6 words.
2. A detailed article summarizing the key points and themes (175 - 200 words).

Focus on identifying paranoid and delusional thought patterns, conspiracy theories, and extreme beliefs.
Maintain a neutral, academic tone.
Always directly quote comments verbatim in quotation marks.
Never mention the discussion itself, only what was discussed.
Format your response as:
HEADLINE: [your headline]
ARTICLE: [your article]";

const CLASSIFY_PROMPT: &str = "You are an expert psychiatrist analyzing online discussions.
Your task is to identify posts that exhibit signs of paranoid or delusional thinking.
Common indicators include conspiracy theories, persecution complexes, grandiose delusions,
bizarre beliefs without evidence, extreme paranoia and disorganized thinking.

For each post, determine if it shows clear signs of delusional content. Be very liberal with your interpretation.
Respond with ONLY a number indicating how many posts contain clear delusional content.";

const THEME_PROMPT: &str = r#"You are an academic researcher analyzing paranoid and delusional content patterns.
Identify exactly 5 dominant themes in the provided content.
For each theme provide a clear, specific name, 3-5 relevant keywords and its frequency
(percentage of content this theme appears in).
Do not include any commentary or recommendations.
Format your response as JSON matching this structure:
{
  "themes": [
    { "name": "theme name", "frequency": 0, "keywords": ["word1", "word2", "word3"] }
  ]
}"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleAnalysis {
    pub thread_id: u64,
    pub headline: String,
    pub article: String,
    pub delusional_stats: ArticleStats,
    pub generated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total_threads: usize,
    pub total_analyzed_posts: usize,
    pub average_delusional_percentage: f64,
    pub generated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleBatch {
    pub articles: Vec<ArticleAnalysis>,
    pub batch_stats: BatchStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelusionalTheme {
    pub name: String,
    #[serde(default)]
    pub frequency: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ThemeReply {
    #[serde(default)]
    themes: Vec<DelusionalTheme>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelusionalMatrix {
    pub statistics: DelusionalStatistics,
    pub themes: Vec<DelusionalTheme>,
    pub trends: Vec<DelusionalTrend>,
    pub generated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub articles: ArticleBatch,
    pub matrix: DelusionalMatrix,
    pub timestamp: i64,
}

/// Aggregate written to `latest-delusional.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelusionalSnapshot {
    pub statistics: ArticleStats,
    pub generated_at: i64,
}

pub struct Summarizer {
    generator: Arc<dyn TextGenerator>,
    paths: DataPaths,
    trends: TrendAggregator,
}

impl Summarizer {
    pub fn new(generator: Arc<dyn TextGenerator>, paths: DataPaths, trends: TrendAggregator) -> Self {
        Self {
            generator,
            paths,
            trends,
        }
    }

    /// Analyze the selected threads and persist every output.
    pub async fn summarize(&self, threads: &[Thread], now: DateTime<Utc>) -> Result<Summary> {
        info!("Generating summaries for {} threads", threads.len());

        let mut articles = Vec::new();
        for thread in threads {
            match self.generate_article(thread, now).await {
                Ok(article) => {
                    let path = self.paths.article_file(article.thread_id);
                    if let Err(e) = write_json_atomic(&path, &article) {
                        warn!("Failed to save article for thread {}: {}", thread.no, e);
                    }
                    articles.push(article);
                }
                Err(e) => warn!("Failed to generate article for thread {}: {}", thread.no, e),
            }
        }

        let samples: Vec<ArticleStats> = articles.iter().map(|a| a.delusional_stats).collect();
        let batch = ArticleBatch {
            batch_stats: batch_stats(&samples, now),
            articles,
        };

        let themes = self.generate_themes(&batch.articles).await;
        let trends = match self.trends.update_trend(&samples, now) {
            Ok(trends) => trends,
            Err(e) => {
                warn!("Trend update failed: {}", e);
                self.trends.load()
            }
        };

        let summary = Summary {
            matrix: DelusionalMatrix {
                statistics: compute_statistics(&samples),
                themes,
                trends,
                generated_at: now.timestamp_millis(),
            },
            articles: batch,
            timestamp: now.timestamp_millis(),
        };

        self.save_summary(&summary)?;

        info!(
            "Analysis complete: {} posts across {} threads, {:.2}% delusional on average, {} themes",
            summary.articles.batch_stats.total_analyzed_posts,
            summary.articles.batch_stats.total_threads,
            summary.articles.batch_stats.average_delusional_percentage,
            summary.matrix.themes.len()
        );
        Ok(summary)
    }

    /// Headline, article body and delusional-content count for one thread.
    pub async fn generate_article(&self, thread: &Thread, now: DateTime<Utc>) -> Result<ArticleAnalysis> {
        let comments = thread_comments(thread);
        if comments.is_empty() {
            return Err(HarvestError::Generation(format!(
                "thread {} has no comments to analyze",
                thread.no
            )));
        }
        let joined = comments.join("\n\n");

        let request = PromptRequest::new(
            ARTICLE_PROMPT,
            format!("Analyze and summarize this thread:\n\n{}", joined),
        )
        .max_tokens(1000)
        .temperature(0.7)
        .top_p(0.9)
        .penalties(0.5, 0.5);
        let reply = self.generator.generate(request).await?;
        let (headline, article) = parse_article(&reply);

        let delusional_stats = self.count_delusional(&comments, &joined).await?;

        Ok(ArticleAnalysis {
            thread_id: thread.no,
            headline,
            article,
            delusional_stats,
            generated_at: now.timestamp_millis(),
        })
    }

    async fn count_delusional(&self, comments: &[String], joined: &str) -> Result<ArticleStats> {
        let request = PromptRequest::new(
            CLASSIFY_PROMPT,
            format!(
                "Analyze these {} posts for delusional content:\n\n{}",
                comments.len(),
                joined
            ),
        )
        .temperature(0.3);
        let reply = self.generator.generate(request).await?;

        let analyzed = comments.len();
        let delusional = parse_count(&reply).min(analyzed);
        Ok(ArticleStats {
            analyzed_comments: analyzed,
            delusional_comments: delusional,
            percentage: delusional as f64 / analyzed as f64 * 100.0,
        })
    }

    /// Dominant themes across the articles; empty on any failure.
    pub async fn generate_themes(&self, articles: &[ArticleAnalysis]) -> Vec<DelusionalTheme> {
        if articles.is_empty() {
            return Vec::new();
        }

        let digest = articles
            .iter()
            .map(|a| {
                format!(
                    "Thread {}:\nHeadline: {}\nArticle: {}\nDelusional content: {} out of {} posts ({:.2}%)",
                    a.thread_id,
                    a.headline,
                    a.article,
                    a.delusional_stats.delusional_comments,
                    a.delusional_stats.analyzed_comments,
                    a.delusional_stats.percentage
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = PromptRequest::new(
            THEME_PROMPT,
            format!(
                "Analyze these summaries and identify exactly 5 dominant paranoid/delusional themes:\n\n{}",
                digest
            ),
        )
        .temperature(0.3);

        let reply = match self.generator.generate(request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Theme generation failed: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<ThemeReply>(extract_json_block(&reply)) {
            Ok(parsed) => {
                info!("Generated {} themes", parsed.themes.len());
                parsed.themes
            }
            Err(e) => {
                warn!("Could not parse theme reply: {}", e);
                Vec::new()
            }
        }
    }

    fn save_summary(&self, summary: &Summary) -> Result<()> {
        write_json_atomic(&self.paths.latest_summary_file(), summary)?;
        info!("Summary saved to {}", self.paths.latest_summary_file().display());

        let latest = self.paths.latest_delusional_file();
        if let Some(previous) = read_json::<DelusionalSnapshot>(&latest).unwrap_or(None) {
            write_json_atomic(&self.paths.previous_delusional_file(), &previous)?;
        }

        let stats = &summary.articles.batch_stats;
        let snapshot = DelusionalSnapshot {
            statistics: ArticleStats {
                analyzed_comments: stats.total_analyzed_posts,
                delusional_comments: (stats.total_analyzed_posts as f64
                    * stats.average_delusional_percentage
                    / 100.0)
                    .round() as usize,
                percentage: stats.average_delusional_percentage,
            },
            generated_at: summary.timestamp,
        };
        write_json_atomic(&latest, &snapshot)
    }
}

fn batch_stats(samples: &[ArticleStats], now: DateTime<Utc>) -> BatchStats {
    let average = if samples.is_empty() {
        0.0
    } else {
        samples.iter().map(|s| s.percentage).sum::<f64>() / samples.len() as f64
    };
    BatchStats {
        total_threads: samples.len(),
        total_analyzed_posts: samples.iter().map(|s| s.analyzed_comments).sum(),
        average_delusional_percentage: average,
        generated_at: now.timestamp_millis(),
    }
}

/// Non-empty plain-text comments, origin post first.
fn thread_comments(thread: &Thread) -> Vec<String> {
    thread
        .com
        .iter()
        .chain(thread.posts.iter().filter_map(|p| p.com.as_ref()))
        .map(|c| strip_html(c))
        .filter(|c| !c.is_empty())
        .collect()
}

fn parse_article(reply: &str) -> (String, String) {
    let headline = HEADLINE
        .captures(reply)
        .map(|c| c[1].trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "Untitled Thread".to_string());
    let article = ARTICLE
        .captures(reply)
        .map(|c| c[1].trim().to_string())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "No content generated".to_string());
    (headline, article)
}

/// First integer in the reply; 0 when there is none.
fn parse_count(reply: &str) -> usize {
    FIRST_INTEGER
        .find(reply)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrendConfig;
    use crate::models::{Post, ANONYMOUS};
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Answers by prompt kind; fails article generation for thread-marked comments.
    struct Canned {
        themes: &'static str,
    }

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, request: PromptRequest) -> Result<String> {
            let system = &request.messages[0].content;
            let user = &request.messages[1].content;
            if system.starts_with("You are an expert journalist") {
                if user.contains("explode") {
                    return Err(HarvestError::Generation("HTTP 500".into()));
                }
                Ok("HEADLINE: Lizard Men Run Banks\nARTICLE: Posters agreed.\nMore detail.".into())
            } else if system.starts_with("You are an expert psychiatrist") {
                Ok("2".into())
            } else {
                Ok(self.themes.into())
            }
        }
    }

    fn thread(no: u64, comments: &[&str]) -> Thread {
        Thread {
            no,
            time: 0,
            now: "03/15/25(Sat)10:00:00".to_string(),
            name: ANONYMOUS.to_string(),
            sub: None,
            com: Some("<b>origin</b>".to_string()),
            media: None,
            replies: comments.len() as u32,
            images: 0,
            posts: comments
                .iter()
                .enumerate()
                .map(|(i, c)| Post {
                    no: no + i as u64 + 1,
                    resto: no,
                    name: ANONYMOUS.to_string(),
                    com: Some(c.to_string()),
                    time: 0,
                    media: None,
                })
                .collect(),
            last_modified: 0,
        }
    }

    fn summarizer(themes: &'static str) -> (tempfile::TempDir, DataPaths, Summarizer) {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        paths.ensure_directories().unwrap();
        let trends = TrendAggregator::new(&paths, TrendConfig::default());
        let summarizer = Summarizer::new(Arc::new(Canned { themes }), paths.clone(), trends);
        (dir, paths, summarizer)
    }

    #[test]
    fn test_parse_article_and_count() {
        let (h, a) = parse_article("HEADLINE: Five Words Go Here\nARTICLE:  Body\n\nsecond para ");
        assert_eq!(h, "Five Words Go Here");
        assert_eq!(a, "Body\n\nsecond para");
        assert_eq!(
            parse_article("nothing useful"),
            ("Untitled Thread".to_string(), "No content generated".to_string())
        );
        assert_eq!(parse_count("7"), 7);
        assert_eq!(parse_count("About 3 of them."), 3);
        assert_eq!(parse_count("none"), 0);
    }

    #[tokio::test]
    async fn test_summarize_writes_outputs_and_skips_failed_threads() {
        let (_dir, paths, summarizer) =
            summarizer("```json\n{\"themes\": [{\"name\": \"Banking cabal\", \"frequency\": 40, \"keywords\": [\"banks\"]}]}\n```");
        let now = Utc.with_ymd_and_hms(2025, 3, 15, 21, 30, 0).unwrap();
        let threads = vec![
            thread(10, &["they watch", "glowies", "meds"]),
            thread(20, &["it will explode"]),
        ];

        let summary = summarizer.summarize(&threads, now).await.unwrap();

        assert_eq!(summary.articles.articles.len(), 1);
        let article = &summary.articles.articles[0];
        assert_eq!(article.headline, "Lizard Men Run Banks");
        assert_eq!(article.delusional_stats.analyzed_comments, 4);
        assert_eq!(article.delusional_stats.delusional_comments, 2);
        assert_eq!(article.delusional_stats.percentage, 50.0);

        assert_eq!(summary.matrix.themes.len(), 1);
        assert!(summary.matrix.themes[0].examples.is_empty());
        assert_eq!(summary.matrix.statistics.mean, 50.0);
        assert_eq!(summary.matrix.trends.len(), 1);

        assert!(paths.article_file(10).exists());
        assert!(!paths.article_file(20).exists());
        assert!(paths.latest_summary_file().exists());
        let latest: DelusionalSnapshot = read_json(&paths.latest_delusional_file()).unwrap().unwrap();
        assert_eq!(latest.statistics.delusional_comments, 2);
    }

    #[tokio::test]
    async fn test_bad_theme_reply_degrades_to_empty() {
        let (_dir, paths, summarizer) = summarizer("I refuse to answer in JSON");
        let now = Utc.with_ymd_and_hms(2025, 3, 15, 21, 30, 0).unwrap();

        let first = summarizer.summarize(&[thread(1, &["a"])], now).await.unwrap();
        assert!(first.matrix.themes.is_empty());
        assert!(!paths.previous_delusional_file().exists());

        summarizer
            .summarize(&[thread(1, &["a"])], now + chrono::Duration::hours(2))
            .await
            .unwrap();
        let previous: DelusionalSnapshot =
            read_json(&paths.previous_delusional_file()).unwrap().unwrap();
        assert_eq!(previous.generated_at, now.timestamp_millis());
    }
}
