//! Thread, post and media records, plus the board API response shapes.

use serde::{Deserialize, Serialize};

/// Author label used when the source omits a name.
pub const ANONYMOUS: &str = "Anonymous";

const VIDEO_EXTENSIONS: &[&str] = &[".webm", ".mp4", ".mov", ".avi", ".wmv", ".flv"];
const STILL_IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp"];

/// Media attached to a post, as described by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    /// Source content token (server-side upload timestamp)
    pub tim: i64,
    pub ext: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fsize: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
}

impl MediaRef {
    pub fn is_video(&self) -> bool {
        is_video_ext(&self.ext)
    }

    pub fn is_still_image(&self) -> bool {
        let ext = self.ext.to_lowercase();
        STILL_IMAGE_EXTENSIONS.contains(&ext.as_str())
    }

    /// Name shown to readers: original filename plus extension.
    pub fn display_name(&self) -> String {
        format!("{}{}", self.filename, self.ext)
    }

    /// Remote object name: `<tim><ext>`.
    pub fn remote_name(&self) -> String {
        format!("{}{}", self.tim, self.ext)
    }
}

pub fn is_video_ext(ext: &str) -> bool {
    let ext = ext.to_lowercase();
    VIDEO_EXTENSIONS.contains(&ext.as_str())
}

/// A single post. `resto` is the parent thread id, 0 for an origin post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub no: u64,
    pub resto: u64,
    pub name: String,
    #[serde(default)]
    pub com: Option<String>,
    /// Creation time, unix seconds
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
}

/// Canonical thread snapshot. Written wholesale on every re-fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub no: u64,
    /// Origin post creation time, unix seconds
    pub time: i64,
    /// Origin post creation date string, `MM/DD/YY(Day)HH:MM:SS`
    pub now: String,
    pub name: String,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub com: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    pub replies: u32,
    pub images: u32,
    /// Replies in arrival order
    pub posts: Vec<Post>,
    /// Unix seconds of the fetch that produced this snapshot
    pub last_modified: i64,
}

impl Thread {
    /// The origin post as a standalone record.
    pub fn origin_post(&self) -> Post {
        Post {
            no: self.no,
            resto: 0,
            name: self.name.clone(),
            com: self.com.clone(),
            time: self.time,
            media: self.media.clone(),
        }
    }
}

// === API Response Types ===

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogPage {
    #[serde(default)]
    pub page: i32,
    #[serde(default)]
    pub threads: Vec<CatalogThread>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogThread {
    pub no: u64,
    #[serde(default)]
    pub replies: Option<u32>,
    #[serde(default)]
    pub tim: Option<i64>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub sticky: Option<u8>,
    #[serde(default)]
    pub closed: Option<u8>,
}

impl CatalogThread {
    pub fn is_sticky(&self) -> bool {
        self.sticky.unwrap_or(0) == 1
    }

    pub fn is_closed(&self) -> bool {
        self.closed.unwrap_or(0) == 1
    }

    /// Has attached media that is not a video.
    pub fn has_still_media(&self) -> bool {
        match (&self.tim, &self.ext) {
            (Some(_), Some(ext)) => !is_video_ext(ext),
            (Some(_), None) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadResponse {
    #[serde(default)]
    pub posts: Vec<RawPost>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPost {
    pub no: u64,
    #[serde(default)]
    pub resto: u64,
    #[serde(default)]
    pub now: Option<String>,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub com: Option<String>,
    #[serde(default)]
    pub tim: Option<i64>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub fsize: Option<u64>,
    #[serde(default)]
    pub w: Option<u32>,
    #[serde(default)]
    pub h: Option<u32>,
}

impl RawPost {
    pub fn media(&self) -> Option<MediaRef> {
        let tim = self.tim?;
        let ext = self.ext.clone()?;
        Some(MediaRef {
            tim,
            ext,
            filename: self.filename.clone().unwrap_or_else(|| tim.to_string()),
            fsize: self.fsize,
            w: self.w,
            h: self.h,
        })
    }

    pub fn author(&self) -> String {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| ANONYMOUS.to_string())
    }

    pub fn into_post(self) -> Post {
        let media = self.media();
        let name = self.author();
        Post {
            no: self.no,
            resto: self.resto,
            name,
            com: self.com,
            time: self.time,
            media,
        }
    }
}
