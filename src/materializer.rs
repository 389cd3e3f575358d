//! Thread materialization
//!
//! Turns the raw post list of a thread into a canonical [`Thread`] record.
//! A 404 is an expected terminal state (the thread was pruned) and is reported
//! as [`ThreadFetch::Pruned`], not as a failure.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::client::BoardSource;
use crate::error::{HarvestError, Result};
use crate::models::{RawPost, Thread};

static THREAD_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2})/(\d{2})/(\d{2})\([^)]+\)(\d{2}):(\d{2}):(\d{2})").unwrap()
});

/// Outcome of materializing one thread.
#[derive(Debug)]
pub enum ThreadFetch {
    Found(Thread),
    /// The source no longer has the thread
    Pruned,
    Failed(HarvestError),
}

/// Fetch and normalize a thread.
pub async fn materialize<S: BoardSource + ?Sized>(
    source: &S,
    thread_id: u64,
    now: DateTime<Utc>,
) -> ThreadFetch {
    match source.thread_posts(thread_id).await {
        Ok(posts) => match build_thread(thread_id, posts, now) {
            Ok(thread) => {
                debug!(
                    "Thread {} materialized: {} replies, {} images",
                    thread.no, thread.replies, thread.images
                );
                ThreadFetch::Found(thread)
            }
            Err(e) => ThreadFetch::Failed(e),
        },
        Err(e) if e.is_not_found() => {
            info!("Thread {} was pruned", thread_id);
            ThreadFetch::Pruned
        }
        Err(e) => ThreadFetch::Failed(e),
    }
}

/// Build a thread record from its posts. The first post is the origin post.
pub fn build_thread(thread_id: u64, posts: Vec<RawPost>, now: DateTime<Utc>) -> Result<Thread> {
    let mut posts = posts.into_iter();
    let op = posts
        .next()
        .ok_or_else(|| HarvestError::Parse(format!("thread {} has no posts", thread_id)))?;

    let created = op
        .now
        .clone()
        .ok_or_else(|| HarvestError::Parse(format!("thread {} missing creation date", thread_id)))?;
    parse_thread_date(&created, now)?;

    let replies: Vec<_> = posts.map(RawPost::into_post).collect();
    let images = replies.iter().filter(|p| p.media.is_some()).count() as u32;

    Ok(Thread {
        no: op.no,
        time: op.time,
        now: created,
        name: op.author(),
        sub: op.sub.clone(),
        com: op.com.clone(),
        media: op.media(),
        replies: replies.len() as u32,
        images,
        posts: replies,
        last_modified: now.timestamp(),
    })
}

/// Parse a board date string such as `03/15/25(Sat)10:49:41`.
///
/// The two-digit year resolves to the current century unless that lands in
/// the future relative to `now`, in which case the previous century is used.
pub fn parse_thread_date(value: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let caps = THREAD_DATE
        .captures(value)
        .ok_or_else(|| HarvestError::Parse(format!("unrecognized thread date {:?}", value)))?;

    let field = |i: usize| -> Result<u32> {
        caps[i]
            .parse::<u32>()
            .map_err(|e| HarvestError::Parse(format!("bad date field in {:?}: {}", value, e)))
    };

    let (month, day, year) = (field(1)?, field(2)?, field(3)? as i32);
    let time = NaiveTime::from_hms_opt(field(4)?, field(5)?, field(6)?)
        .ok_or_else(|| HarvestError::Parse(format!("invalid time in {:?}", value)))?;

    let century = now.year() / 100 * 100;
    let resolve = |full_year: i32| -> Result<DateTime<Utc>> {
        let date = NaiveDate::from_ymd_opt(full_year, month, day)
            .ok_or_else(|| HarvestError::Parse(format!("invalid date in {:?}", value)))?;
        Ok(Utc.from_utc_datetime(&NaiveDateTime::new(date, time)))
    };

    let proposed = resolve(century + year)?;
    if proposed > now {
        resolve(century - 100 + year)
    } else {
        Ok(proposed)
    }
}

/// Age of a thread in hours, computed from its creation date string.
/// Unparseable dates count as age zero so the snapshot is never purged.
pub fn thread_age_hours(thread_date: &str, now: DateTime<Utc>) -> f64 {
    match parse_thread_date(thread_date, now) {
        Ok(created) => (now - created).num_milliseconds() as f64 / 3_600_000.0,
        Err(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::models::{CatalogPage, MediaRef};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn raw(no: u64, resto: u64, now: Option<&str>) -> RawPost {
        RawPost {
            no,
            resto,
            now: now.map(str::to_string),
            time: 1_700_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_thread_date() {
        let parsed = parse_thread_date("03/15/25(Sat)10:49:41", at(2025, 6, 1, 0)).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 3, 15, 10, 49, 41).unwrap());
    }

    #[test]
    fn test_future_year_falls_back_a_century() {
        // "99" in 2025 would be 2099, which is in the future
        let parsed = parse_thread_date("12/31/99(Fri)23:59:59", at(2025, 6, 1, 0)).unwrap();
        assert_eq!(parsed.year(), 1999);

        // same-year date later than now also falls back
        let parsed = parse_thread_date("07/01/25(Tue)00:00:00", at(2025, 6, 1, 0)).unwrap();
        assert_eq!(parsed.year(), 1925);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let now = at(2025, 1, 1, 0);
        assert!(parse_thread_date("yesterday", now).is_err());
        assert!(parse_thread_date("13/45/25(Sat)10:49:41", now).is_err());
        assert!(parse_thread_date("01/01/24(Mon)25:00:00", now).is_err());
    }

    #[test]
    fn test_thread_age_hours() {
        let now = at(2025, 3, 16, 10);
        let age = thread_age_hours("03/15/25(Sat)10:00:00", now);
        assert!((age - 24.0).abs() < 1e-9);
        assert_eq!(thread_age_hours("not a date", now), 0.0);
    }

    #[test]
    fn test_build_thread_counts_replies_and_images() {
        let mut op = raw(100, 0, Some("03/15/25(Sat)10:49:41"));
        op.com = Some("origin".to_string());
        op.tim = Some(555);
        op.ext = Some(".jpg".to_string());
        let mut with_image = raw(101, 100, None);
        with_image.tim = Some(556);
        with_image.ext = Some(".png".to_string());
        with_image.filename = Some("ghost".to_string());
        let mut named = raw(102, 100, None);
        named.name = Some("seer".to_string());

        let now = at(2025, 3, 16, 0);
        let thread = build_thread(100, vec![op, with_image, named], now).unwrap();

        assert_eq!(thread.no, 100);
        assert_eq!(thread.replies, 2);
        assert_eq!(thread.images, 1);
        assert_eq!(thread.name, "Anonymous");
        assert_eq!(thread.posts[0].no, 101);
        assert_eq!(thread.posts[1].name, "seer");
        assert_eq!(thread.media.as_ref().map(|m| m.tim), Some(555));
        assert_eq!(thread.last_modified, now.timestamp());
    }

    #[test]
    fn test_build_thread_requires_parseable_date() {
        let now = at(2025, 3, 16, 0);
        assert!(matches!(
            build_thread(1, vec![raw(1, 0, None)], now),
            Err(HarvestError::Parse(_))
        ));
        assert!(matches!(
            build_thread(1, vec![raw(1, 0, Some("garbage"))], now),
            Err(HarvestError::Parse(_))
        ));
        assert!(matches!(build_thread(1, vec![], now), Err(HarvestError::Parse(_))));
    }

    struct StubSource {
        result: fn() -> Result<Vec<RawPost>>,
    }

    #[async_trait]
    impl BoardSource for StubSource {
        async fn catalog(&self) -> Result<Vec<CatalogPage>> {
            Ok(Vec::new())
        }
        async fn thread_posts(&self, _thread_id: u64) -> Result<Vec<RawPost>> {
            (self.result)()
        }
        async fn media(&self, _media: &MediaRef) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn pause(&self) {}
    }

    #[tokio::test]
    async fn test_materialize_outcomes() {
        let now = at(2025, 3, 16, 0);

        let pruned = StubSource {
            result: || Err(HarvestError::NotFound("/thread/1.json".into())),
        };
        assert!(matches!(materialize(&pruned, 1, now).await, ThreadFetch::Pruned));

        let failing = StubSource {
            result: || Err(HarvestError::transient("/thread/1.json", "HTTP 503")),
        };
        assert!(matches!(
            materialize(&failing, 1, now).await,
            ThreadFetch::Failed(HarvestError::Transient { .. })
        ));

        let found = StubSource {
            result: || Ok(vec![raw(1, 0, Some("03/15/25(Sat)10:49:41"))]),
        };
        assert!(matches!(materialize(&found, 1, now).await, ThreadFetch::Found(_)));
    }
}
