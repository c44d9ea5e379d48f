//! Remote card records.
//!
//! Only the fields needed for indexing and image URLs are modelled; anything
//! else in the vendor payload is ignored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cache::ImageSize;

/// Per-size image URLs, keyed by size name.
pub type ImageUris = HashMap<String, String>;

/// One card object from the bulk snapshot or the card API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardRecord {
    pub id: Option<String>,
    pub name: Option<String>,
    pub set: Option<String>,
    pub set_name: Option<String>,
    pub collector_number: Option<String>,
    pub released_at: Option<String>,
    pub image_uris: Option<ImageUris>,
    pub card_faces: Option<Vec<CardFace>>,
    pub artist: Option<String>,
    pub scryfall_uri: Option<String>,
}

/// One face of a multi-faced card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardFace {
    pub name: Option<String>,
    pub image_uris: Option<ImageUris>,
}

impl CardRecord {
    /// Trimmed display name, empty when absent.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().map(str::trim).unwrap_or("")
    }

    pub fn faces(&self) -> &[CardFace] {
        self.card_faces.as_deref().unwrap_or(&[])
    }

    pub fn set_code(&self) -> &str {
        self.set.as_deref().unwrap_or("")
    }

    pub fn collector_number(&self) -> &str {
        self.collector_number.as_deref().unwrap_or("")
    }
}

/// Image URL for `size`, falling back to the normal size.
pub fn image_url(uris: Option<&ImageUris>, size: ImageSize) -> Option<&str> {
    let uris = uris?;
    uris.get(size.as_str())
        .or_else(|| uris.get(ImageSize::Normal.as_str()))
        .map(String::as_str)
        .filter(|url| !url.is_empty())
}

/// Bulk data metadata endpoint response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkMetadata {
    pub download_uri: Option<String>,
    pub updated_at: Option<String>,
    /// Payload size in bytes.
    pub size: Option<u64>,
}

/// Card search response page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct SearchPage {
    pub data: Vec<CardRecord>,
    pub has_more: bool,
    pub next_page: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_ignores_unknown_fields() {
        let json = r#"{
            "object": "card",
            "id": "uuid-1",
            "name": "Lightning Bolt",
            "set": "m11",
            "collector_number": "146",
            "legalities": {"modern": "legal"},
            "image_uris": {"small": "https://img/s.jpg", "normal": "https://img/n.jpg"}
        }"#;
        let card: CardRecord = serde_json::from_str(json).unwrap();
        assert_eq!(card.id.as_deref(), Some("uuid-1"));
        assert_eq!(card.display_name(), "Lightning Bolt");
        assert!(card.faces().is_empty());
        assert_eq!(
            image_url(card.image_uris.as_ref(), ImageSize::Small),
            Some("https://img/s.jpg")
        );
    }

    #[test]
    fn test_image_url_falls_back_to_normal() {
        let mut uris = ImageUris::new();
        uris.insert("normal".to_string(), "https://img/n.jpg".to_string());
        assert_eq!(
            image_url(Some(&uris), ImageSize::Png),
            Some("https://img/n.jpg")
        );
        assert_eq!(image_url(Some(&ImageUris::new()), ImageSize::Png), None);
        assert_eq!(image_url(None, ImageSize::Normal), None);
    }

    #[test]
    fn test_bulk_metadata_fields_optional() {
        let meta: BulkMetadata = serde_json::from_str("{}").unwrap();
        assert!(meta.download_uri.is_none());
        assert!(meta.updated_at.is_none());
    }
}
