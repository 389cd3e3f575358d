//! Derived signals over harvested threads

pub mod selection;
pub mod summarizer;
pub mod terms;
pub mod trends;

pub use selection::{select_threads, Bucket, ThreadSelection};
pub use summarizer::{ArticleAnalysis, DelusionalMatrix, Summarizer, Summary};
pub use terms::{TermMentionAnalyzer, TermReport};
pub use trends::{compact, compute_statistics, ArticleStats, DelusionalTrend, TrendAggregator};
