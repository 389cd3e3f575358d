//! /x/ Board Harvester Library
//!
//! Harvests threads from a 4chan-compatible board API into bounded local
//! snapshots, archives media with content-hash dedup, and derives term,
//! sentiment and trend signals from the stored threads.

pub mod analysis;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod maintenance;
pub mod materializer;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod text;

pub use client::{BoardSource, FetchClient};
pub use config::Config;
pub use error::{HarvestError, Result};
pub use pipeline::Harvester;
pub use scheduler::Scheduler;
