//! Catalog sampling
//!
//! Picks the threads worth materializing from the board catalog: the busiest
//! threads, the newest threads carrying still images, and the newest threads
//! overall. The three views overlap heavily, so the union is usually well
//! under `3 * per_view`.

use std::collections::HashSet;

use crate::models::{CatalogPage, CatalogThread};

/// Sample candidate threads from a catalog.
///
/// Sticky and closed threads are excluded. The result has no duplicate ids,
/// holds at most `3 * per_view` entries and is sorted by id descending.
pub fn sample_catalog(catalog: &[CatalogPage], per_view: usize) -> Vec<CatalogThread> {
    let open: Vec<&CatalogThread> = catalog
        .iter()
        .flat_map(|page| &page.threads)
        .filter(|thread| !thread.is_sticky() && !thread.is_closed())
        .collect();

    let mut by_replies = open.clone();
    by_replies.sort_by(|a, b| b.replies.unwrap_or(0).cmp(&a.replies.unwrap_or(0)));
    by_replies.truncate(per_view);

    let mut with_media: Vec<&CatalogThread> = open
        .iter()
        .copied()
        .filter(|thread| thread.has_still_media())
        .collect();
    with_media.sort_by(|a, b| b.no.cmp(&a.no));
    with_media.truncate(per_view);

    let mut newest = open;
    newest.sort_by(|a, b| b.no.cmp(&a.no));
    newest.truncate(per_view);

    let mut seen = HashSet::new();
    let mut sampled: Vec<CatalogThread> = by_replies
        .into_iter()
        .chain(with_media)
        .chain(newest)
        .filter(|thread| seen.insert(thread.no))
        .cloned()
        .collect();

    sampled.sort_by(|a, b| b.no.cmp(&a.no));
    sampled
}
