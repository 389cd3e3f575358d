//! Recurring jobs: the scrape interval and the daily analysis run.
//!
//! The scheduler is an ordinary value owned by the caller. It holds the
//! harvester and the join handles of the jobs it spawned; dropping or
//! stopping it ends the jobs.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::ScheduleConfig;
use crate::error::{HarvestError, Result};
use crate::pipeline::Harvester;

pub struct Scheduler {
    harvester: Arc<Harvester>,
    config: ScheduleConfig,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(harvester: Arc<Harvester>, config: ScheduleConfig) -> Self {
        Self {
            harvester,
            config,
            handles: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }

    /// Spawn both jobs. The first scrape runs immediately.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            warn!("Scheduler already running");
            return Ok(());
        }

        let analysis_time = self.config.analysis_time()?;
        let interval_minutes = self.config.scrape_interval_minutes.max(1);
        let every = Duration::from_secs(interval_minutes * 60);

        let harvester = Arc::clone(&self.harvester);
        self.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                info!("Running scheduled scrape");
                match harvester.scrape().await {
                    Ok(stats) => info!("Scheduled scrape finished: {} threads saved", stats.saved),
                    Err(e) => error!("Scheduled scrape failed: {}", e),
                }
            }
        }));

        let harvester = Arc::clone(&self.harvester);
        self.handles.push(tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = next_daily_run(now, analysis_time);
                info!("Next analysis run at {}", next);
                let wait = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;

                info!("Running scheduled analysis");
                match harvester.analyze().await {
                    Ok(summary) => info!(
                        "Scheduled analysis finished: {} articles",
                        summary.articles.articles.len()
                    ),
                    Err(HarvestError::InsufficientData { expected, actual }) => warn!(
                        "Skipping analysis: only {} of {} threads available",
                        actual, expected
                    ),
                    Err(e) => error!("Scheduled analysis failed: {}", e),
                }
            }
        }));

        info!(
            "Scheduler started: scrape every {} minutes, analysis daily at {} UTC",
            interval_minutes, analysis_time
        );
        Ok(())
    }

    /// Abort every job. A run in progress is cancelled at its next await point.
    pub fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// The next instant at `time` (UTC) strictly after `now`.
pub fn next_daily_run(now: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}
