use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::ImageSize;

/// A request to have one card image available locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRequest {
    pub card_name: String,
    /// Remote identity, when already known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_number: Option<String>,
    #[serde(default)]
    pub size: ImageSize,
}

impl ImageRequest {
    pub fn new(card_name: impl Into<String>) -> Self {
        Self {
            card_name: card_name.into(),
            identity: None,
            set_code: None,
            collector_number: None,
            size: ImageSize::default(),
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_set(mut self, set_code: impl Into<String>) -> Self {
        self.set_code = Some(set_code.into());
        self
    }

    pub fn with_collector_number(mut self, collector_number: impl Into<String>) -> Self {
        self.collector_number = Some(collector_number.into());
        self
    }

    pub fn with_size(mut self, size: ImageSize) -> Self {
        self.size = size;
        self
    }

    pub fn identity(&self) -> Option<&str> {
        non_empty(self.identity.as_deref())
    }

    pub fn set_code(&self) -> Option<&str> {
        non_empty(self.set_code.as_deref())
    }

    pub fn collector_number(&self) -> Option<&str> {
        non_empty(self.collector_number.as_deref())
    }

    /// Whether the request names something the remote could resolve.
    pub fn can_fetch(&self) -> bool {
        !self.card_name.trim().is_empty() || self.identity().is_some()
    }

    /// Key identifying the same unit of work.
    pub fn queue_key(&self) -> QueueKey {
        match self.identity() {
            Some(identity) => QueueKey::Identity {
                identity: identity.to_string(),
                size: self.size,
            },
            None => QueueKey::Printing {
                name: self.card_name.trim().to_lowercase(),
                set_code: self.set_code().unwrap_or("").to_lowercase(),
                collector_number: self.collector_number().unwrap_or("").to_lowercase(),
                size: self.size,
            },
        }
    }

    /// Key used by the not-found memo: name and set only.
    pub fn not_found_key(&self) -> NotFoundKey {
        NotFoundKey::new(&self.card_name, self.set_code().unwrap_or(""))
    }
}

impl fmt::Display for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.card_name)?;
        if let Some(set) = self.set_code() {
            write!(f, " [{}", set)?;
            if let Some(cn) = self.collector_number() {
                write!(f, " #{}", cn)?;
            }
            write!(f, "]")?;
        }
        write!(f, " ({})", self.size)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Identity of queued work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueKey {
    /// Bound to a remote identity; the name is irrelevant.
    Identity { identity: String, size: ImageSize },
    /// Lower-cased name, set code and collector number.
    Printing {
        name: String,
        set_code: String,
        collector_number: String,
        size: ImageSize,
    },
}

/// Lower-cased `(name, set_code)` confirmed absent remotely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotFoundKey {
    pub name: String,
    pub set_code: String,
}

impl NotFoundKey {
    pub fn new(name: &str, set_code: &str) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            set_code: set_code.trim().to_lowercase(),
        }
    }
}

/// Terminal outcome of a queued request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Downloaded(ImageRequest),
    Failed {
        request: ImageRequest,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_key_ignores_case_and_whitespace() {
        let a = ImageRequest::new("Lightning Bolt").with_set("M11");
        let b = ImageRequest::new(" lightning bolt ").with_set("m11");
        assert_eq!(a.queue_key(), b.queue_key());
    }

    #[test]
    fn test_queue_key_distinguishes_size_and_collector_number() {
        let base = ImageRequest::new("Bolt").with_set("m11");
        assert_ne!(
            base.queue_key(),
            base.clone().with_size(ImageSize::Large).queue_key()
        );
        assert_ne!(
            base.queue_key(),
            base.clone().with_collector_number("146").queue_key()
        );
    }

    #[test]
    fn test_identity_key_ignores_name() {
        let a = ImageRequest::new("Bolt").with_identity("uuid-1");
        let b = ImageRequest::new("Other Name").with_identity("uuid-1");
        assert_eq!(a.queue_key(), b.queue_key());
    }

    #[test]
    fn test_blank_identity_treated_as_absent() {
        let request = ImageRequest::new("Bolt").with_identity("  ");
        assert!(matches!(request.queue_key(), QueueKey::Printing { .. }));
    }

    #[test]
    fn test_not_found_key_uses_name_and_set_only() {
        let a = ImageRequest::new("Mirrorpool")
            .with_set("AEOE")
            .with_collector_number("1");
        let b = ImageRequest::new("mirrorpool")
            .with_set("aeoe")
            .with_size(ImageSize::Png);
        assert_eq!(a.not_found_key(), b.not_found_key());
    }

    #[test]
    fn test_can_fetch() {
        assert!(ImageRequest::new("Bolt").can_fetch());
        assert!(!ImageRequest::new("   ").can_fetch());
        assert!(ImageRequest::new("").with_identity("uuid").can_fetch());
    }

    #[test]
    fn test_display() {
        let request = ImageRequest::new("Bolt")
            .with_set("m11")
            .with_collector_number("146");
        assert_eq!(request.to_string(), "Bolt [m11 #146] (normal)");
    }
}
