//! Comment normalization

use once_cell::sync::Lazy;
use regex::Regex;

static BREAK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Strip markup from a post comment and collapse whitespace.
///
/// Tags are removed before entities are decoded so `&gt;` quotes survive as
/// literal `>` instead of being mistaken for tag boundaries.
pub fn strip_html(text: &str) -> String {
    let text = BREAK_TAG.replace_all(text, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    let decoded = html_escape::decode_html_entities(&text);

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
