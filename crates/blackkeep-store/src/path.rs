//! Slash-separated store paths.

use std::fmt;

use crate::error::StoreError;

/// A validated store path such as `blackkeep/rooms/K7H3MQXZ`.
///
/// Non-empty, no leading or trailing `/`, no empty segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath(String);

impl StorePath {
    /// Parse a path.
    ///
    /// # Errors
    ///
    /// - `InvalidPath`: empty path or empty segment
    pub fn new(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        if path.is_empty() {
            return Err(StoreError::InvalidPath { path, reason: "empty".to_string() });
        }
        if path.split('/').any(str::is_empty) {
            return Err(StoreError::InvalidPath { path, reason: "empty segment".to_string() });
        }
        Ok(Self(path))
    }

    /// Extend by one segment.
    ///
    /// `segment` must be a single non-empty segment; callers pass validated
    /// identifiers or store-generated keys.
    pub fn child(&self, segment: impl AsRef<str>) -> Self {
        let segment = segment.as_ref();
        debug_assert!(!segment.is_empty() && !segment.contains('/'), "bad segment {segment:?}");
        Self(format!("{}/{}", self.0, segment))
    }

    /// Parent path, `None` for a single-segment path.
    pub fn parent(&self) -> Option<Self> {
        self.0.rsplit_once('/').map(|(parent, _)| Self(parent.to_string()))
    }

    /// Final segment.
    pub fn key(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, key)| key)
    }

    /// True if `other` equals this path or lies beneath it.
    pub fn contains(&self, other: &str) -> bool {
        other
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Key of `other` if it is a direct child of this path.
    pub fn direct_child_key<'a>(&self, other: &'a str) -> Option<&'a str> {
        let rest = other.strip_prefix(self.0.as_str())?.strip_prefix('/')?;
        (!rest.is_empty() && !rest.contains('/')).then_some(rest)
    }

    /// Path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_segments() {
        assert!(StorePath::new("").is_err());
        assert!(StorePath::new("/rooms").is_err());
        assert!(StorePath::new("rooms/").is_err());
        assert!(StorePath::new("a//b").is_err());
        assert!(StorePath::new("blackkeep/rooms").is_ok());
    }

    #[test]
    fn navigation() {
        let room = StorePath::new("ns/rooms").unwrap().child("K7H3MQXZ");
        assert_eq!(room.as_str(), "ns/rooms/K7H3MQXZ");
        assert_eq!(room.key(), "K7H3MQXZ");
        assert_eq!(room.parent().unwrap().as_str(), "ns/rooms");
        assert_eq!(StorePath::new("ns").unwrap().parent(), None);
    }

    #[test]
    fn containment_respects_segment_boundaries() {
        let room = StorePath::new("ns/rooms/ABC").unwrap();
        assert!(room.contains("ns/rooms/ABC"));
        assert!(room.contains("ns/rooms/ABC/members/x"));
        assert!(!room.contains("ns/rooms/ABCD"));
        assert!(!room.contains("ns/rooms"));
    }

    #[test]
    fn direct_children_only() {
        let signals = StorePath::new("ns/rooms/ABC/signals").unwrap();
        assert_eq!(signals.direct_child_key("ns/rooms/ABC/signals/01"), Some("01"));
        assert_eq!(signals.direct_child_key("ns/rooms/ABC/signals/01/x"), None);
        assert_eq!(signals.direct_child_key("ns/rooms/ABC/signals"), None);
        assert_eq!(signals.direct_child_key("ns/rooms/ABC/signalsX/01"), None);
    }
}
