//! Hierarchical cache keys
//!
//! A key is a slash-separated, case-sensitive path such as
//! `projects/demo/src/main.rs`. Each key maps to exactly one logical entry,
//! and the disk backend mirrors the segments 1:1 as directories and a file.

use crate::errors::{CacheError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Suffix reserved for temporary, alternate and bookkeeping files.
pub const RESERVED_SUFFIX: &str = ".$$$";

/// Separator between key segments
pub const SEPARATOR: char = '/';

/// A validated hierarchical cache key
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    normalized: String,
}

impl CacheKey {
    /// Parse and normalize a key.
    ///
    /// Leading, trailing and repeated separators are dropped, so `"/a//b/"`
    /// and `"a/b"` name the same entry.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut normalized = String::with_capacity(raw.len());

        for segment in raw.split(SEPARATOR).filter(|s| !s.is_empty()) {
            validate_segment(raw, segment)?;
            if !normalized.is_empty() {
                normalized.push(SEPARATOR);
            }
            normalized.push_str(segment);
        }

        if normalized.is_empty() {
            return Err(CacheError::invalid_key(raw, "key has no segments"));
        }

        Ok(Self { normalized })
    }

    /// The normalized key string
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// Iterate over the key's segments, outermost first
    pub fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        self.normalized.split(SEPARATOR)
    }

    /// Number of segments in the key
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The last segment
    pub fn file_name(&self) -> &str {
        match self.normalized.rsplit_once(SEPARATOR) {
            Some((_, name)) => name,
            None => &self.normalized,
        }
    }

    /// The enclosing key, or `None` for a top-level key
    pub fn parent(&self) -> Option<CacheKey> {
        self.normalized
            .rsplit_once(SEPARATOR)
            .map(|(parent, _)| CacheKey {
                normalized: parent.to_string(),
            })
    }

    /// Append one or more segments
    pub fn join(&self, child: &str) -> Result<CacheKey> {
        CacheKey::parse(&format!("{}{SEPARATOR}{child}", self.normalized))
    }

    /// True when `other` is nested strictly below this key.
    ///
    /// Matching is segment-wise: `a/b` is an ancestor of `a/b/c` but not of
    /// `a/bc`.
    pub fn is_ancestor_of(&self, other: &CacheKey) -> bool {
        other.normalized.len() > self.normalized.len()
            && other.normalized.starts_with(&self.normalized)
            && other.normalized.as_bytes()[self.normalized.len()] == SEPARATOR as u8
    }

    /// True when `self` equals `prefix` or is nested below it
    pub fn is_same_or_descendant_of(&self, prefix: &CacheKey) -> bool {
        self == prefix || prefix.is_ancestor_of(self)
    }

    /// The key as a relative filesystem path
    pub fn to_relative_path(&self) -> PathBuf {
        self.segments().collect()
    }
}

fn validate_segment(raw: &str, segment: &str) -> Result<()> {
    if segment == "." || segment == ".." {
        return Err(CacheError::invalid_key(
            raw,
            format!("relative segment '{segment}' is not allowed"),
        ));
    }

    if let Some(c) = segment
        .chars()
        .find(|c| c.is_control() || *c == '\\' || *c == '\0')
    {
        return Err(CacheError::invalid_key(
            raw,
            format!("segment '{}' contains forbidden character {c:?}", segment.escape_debug()),
        ));
    }

    if segment.ends_with(RESERVED_SUFFIX) {
        return Err(CacheError::invalid_key(
            raw,
            format!("segment '{segment}' uses the reserved '{RESERVED_SUFFIX}' suffix"),
        ));
    }

    Ok(())
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({:?})", self.normalized)
    }
}

impl FromStr for CacheKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        CacheKey::parse(s)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.normalized
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.normalized)
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CacheKey::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalization() {
        let key = CacheKey::parse("/projects//demo/src/").unwrap();
        assert_eq!(key.as_str(), "projects/demo/src");
        assert_eq!(key.depth(), 3);
        assert_eq!(key.file_name(), "src");
        assert_eq!(key.parent().unwrap().as_str(), "projects/demo");
        assert_eq!(
            key.to_relative_path(),
            PathBuf::from("projects").join("demo").join("src")
        );
    }

    #[test]
    fn test_top_level_key_has_no_parent() {
        let key = CacheKey::parse("readme").unwrap();
        assert!(key.parent().is_none());
        assert_eq!(key.file_name(), "readme");
    }

    #[test]
    fn test_rejects_invalid_keys() {
        for raw in ["", "/", "//", "a/../b", "./a", "a/b.$$$", "a\\b", "a/\u{7}"] {
            let err = CacheKey::parse(raw).unwrap_err();
            assert!(
                matches!(err, CacheError::InvalidKey { .. }),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_reserved_suffix_only_rejected_at_end() {
        assert!(CacheKey::parse("a/b.$$$.txt").is_ok());
    }

    #[test]
    fn test_case_sensitive() {
        assert_ne!(
            CacheKey::parse("Dir/File").unwrap(),
            CacheKey::parse("dir/file").unwrap()
        );
    }

    #[test]
    fn test_ancestry_is_segment_wise() {
        let ab = CacheKey::parse("a/b").unwrap();
        let abc = CacheKey::parse("a/b/c").unwrap();
        let abc2 = CacheKey::parse("a/bc").unwrap();

        assert!(ab.is_ancestor_of(&abc));
        assert!(!ab.is_ancestor_of(&abc2));
        assert!(!ab.is_ancestor_of(&ab));
        assert!(ab.is_same_or_descendant_of(&ab));
        assert!(abc.is_same_or_descendant_of(&ab));
        assert!(!ab.is_same_or_descendant_of(&abc));
    }

    #[test]
    fn test_join() {
        let base = CacheKey::parse("a").unwrap();
        assert_eq!(base.join("b/c").unwrap().as_str(), "a/b/c");
        assert!(base.join("..").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            key: CacheKey,
        }

        let parsed: Wrapper = toml::from_str("key = \"/x//y\"").unwrap();
        assert_eq!(parsed.key.as_str(), "x/y");
        assert!(toml::from_str::<Wrapper>("key = \"x/..\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_parse_is_idempotent(segments in proptest::collection::vec("[a-zA-Z0-9_.-]{1,8}", 1..6)) {
            prop_assume!(segments.iter().all(|s| s != "." && s != ".."));
            let raw = segments.join("/");
            let key = CacheKey::parse(&raw).unwrap();
            let reparsed = CacheKey::parse(key.as_str()).unwrap();
            prop_assert_eq!(key.depth(), segments.len());
            prop_assert_eq!(key, reparsed);
        }

        #[test]
        fn prop_parent_is_ancestor(segments in proptest::collection::vec("[a-z0-9]{1,6}", 2..6)) {
            let key = CacheKey::parse(&segments.join("/")).unwrap();
            let parent = key.parent().unwrap();
            prop_assert!(parent.is_ancestor_of(&key));
            prop_assert!(key.is_same_or_descendant_of(&parent));
        }
    }
}
