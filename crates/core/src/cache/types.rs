//! Types for the card image cache.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Face index of the synthetic row mapping a multi-faced card's combined
/// name onto its front face image.
pub const ALIAS_FACE_INDEX: i64 = -1;

/// Image sizes offered by the remote CDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageSize {
    /// 146x204 thumbnails.
    Small,
    /// 488x680, the default.
    #[default]
    Normal,
    /// 672x936.
    Large,
    /// 745x1040 with transparency.
    Png,
}

impl ImageSize {
    pub const ALL: [ImageSize; 4] = [
        ImageSize::Small,
        ImageSize::Normal,
        ImageSize::Large,
        ImageSize::Png,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::Small => "small",
            ImageSize::Normal => "normal",
            ImageSize::Large => "large",
            ImageSize::Png => "png",
        }
    }

    /// File extension for images of this size.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageSize::Png => "png",
            _ => "jpg",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(ImageSize::Small),
            "normal" => Ok(ImageSize::Normal),
            "large" => Ok(ImageSize::Large),
            "png" => Ok(ImageSize::Png),
            other => Err(CacheError::InvalidSize(other.to_string())),
        }
    }
}

/// Input for `add_image`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    /// Stable remote identity (preferred key).
    pub identity: String,
    /// 0 for the front face, 1.. for later faces, -1 for the alias row.
    pub face_index: i64,
    pub name: String,
    pub set_code: String,
    pub collector_number: String,
    pub size: ImageSize,
    pub file_path: PathBuf,
    pub source_uri: Option<String>,
    pub artist: Option<String>,
}

/// A stored image row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub identity: String,
    pub face_index: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collector_number: Option<String>,
    pub size: ImageSize,
    /// Path string exactly as written; resolve before use.
    pub file_path: String,
    pub downloaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
}

/// Freshness information about the local bulk snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMetadataRecord {
    /// Vendor `updated_at` of the snapshot (or local download time when absent).
    pub downloaded_at: String,
    /// Card count; 0 when deferred.
    pub total_cards: u64,
    /// Download URI the snapshot came from.
    pub source_uri: String,
}

/// Row counts per image size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeCounts {
    pub small: u64,
    pub normal: u64,
    pub large: u64,
    pub png: u64,
}

impl SizeCounts {
    pub fn get(&self, size: ImageSize) -> u64 {
        match size {
            ImageSize::Small => self.small,
            ImageSize::Normal => self.normal,
            ImageSize::Large => self.large,
            ImageSize::Png => self.png,
        }
    }

    fn slot(&mut self, size: ImageSize) -> &mut u64 {
        match size {
            ImageSize::Small => &mut self.small,
            ImageSize::Normal => &mut self.normal,
            ImageSize::Large => &mut self.large,
            ImageSize::Png => &mut self.png,
        }
    }

    pub(crate) fn set(&mut self, size: ImageSize, count: u64) {
        *self.slot(size) = count;
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Distinct identities with at least one image.
    pub unique_cards: u64,
    pub by_size: SizeCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulk_data_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulk_total_cards: Option<u64>,
}

/// Errors for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid image size: {0}")]
    InvalidSize(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_size_serialization() {
        assert_eq!(
            serde_json::to_string(&ImageSize::Normal).unwrap(),
            "\"normal\""
        );
        assert_eq!(serde_json::to_string(&ImageSize::Png).unwrap(), "\"png\"");
    }

    #[test]
    fn test_image_size_from_str() {
        assert_eq!("LARGE".parse::<ImageSize>().unwrap(), ImageSize::Large);
        assert_eq!(" small ".parse::<ImageSize>().unwrap(), ImageSize::Small);
        assert!(matches!(
            "huge".parse::<ImageSize>(),
            Err(CacheError::InvalidSize(_))
        ));
    }

    #[test]
    fn test_image_size_extension() {
        assert_eq!(ImageSize::Png.extension(), "png");
        assert_eq!(ImageSize::Small.extension(), "jpg");
        assert_eq!(ImageSize::Normal.extension(), "jpg");
    }

    #[test]
    fn test_cache_stats_skips_missing_bulk_fields() {
        let stats = CacheStats::default();
        let json = serde_json::to_string(&stats).unwrap();
        assert!(!json.contains("bulk_data_date"));
        assert!(json.contains("by_size"));
    }
}
