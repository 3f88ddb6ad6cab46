use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

/// Name of a logical file slot in a transform's interface.
///
/// Construction never fails; [`Tag::is_valid`] is checked by the composition
/// layer so that bad names are reported together with the transform that
/// declared them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

/// Ordered so that iteration, error messages and commit order are deterministic.
pub type TagSet = BTreeSet<Tag>;

/// Marks a tag whose slot holds a list of files instead of one file.
pub const FILESET_PREFIX: &str = "fileset::";

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The fileset tag `fileset::<name>`.
    pub fn fileset(name: &str) -> Self {
        Self(format!("{FILESET_PREFIX}{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_fileset(&self) -> bool {
        self.0.starts_with(FILESET_PREFIX)
    }

    /// The name without the fileset prefix.
    pub fn base_name(&self) -> &str {
        self.0.strip_prefix(FILESET_PREFIX).unwrap_or(&self.0)
    }

    /// The base name is non-empty ASCII alphanumerics plus `_` and `-`.
    pub fn is_valid(&self) -> bool {
        let base = self.base_name();
        !base.is_empty()
            && base
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&Tag> for Tag {
    fn from(value: &Tag) -> Self {
        value.clone()
    }
}

impl Borrow<str> for Tag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Collect anything tag-like into a [`TagSet`], silently merging duplicates.
pub fn tag_set<I, T>(tags: I) -> TagSet
where
    I: IntoIterator<Item = T>,
    T: Into<Tag>,
{
    tags.into_iter().map(Into::into).collect()
}

/// `a, b, c` in iteration order.
pub fn join_tags<'a, I>(tags: I) -> String
where
    I: IntoIterator<Item = &'a Tag>,
{
    tags.into_iter()
        .map(Tag::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn valid_tags() {
        for name in ["x", "in_file", "model-v2", "A1"] {
            assert!(Tag::from(name).is_valid(), "{name} should be valid");
        }
    }

    #[test]
    fn invalid_tags() {
        for name in ["", "has space", "dots.txt", "slash/y", "ünicode", "fileset::", "a::b"] {
            assert!(!Tag::from(name).is_valid(), "{name:?} should be invalid");
        }
    }

    #[test]
    fn fileset_tags_carry_a_prefix() {
        let tag = Tag::fileset("images");
        assert_eq!(tag.as_str(), "fileset::images");
        assert!(tag.is_fileset());
        assert!(tag.is_valid());
        assert_eq!(tag.base_name(), "images");

        let plain = Tag::from("images");
        assert!(!plain.is_fileset());
        assert_eq!(plain.base_name(), "images");
        assert_ne!(plain, tag);
    }

    #[test]
    fn tags_serialize_as_plain_strings() {
        let value = serde_json::to_value(Tag::from("x")).expect("serialize");
        assert_eq!(value, serde_json::json!("x"));

        let mut map = BTreeMap::new();
        map.insert(Tag::from("a"), Tag::from("b"));
        let value = serde_json::to_value(&map).expect("serialize map");
        assert_eq!(value, serde_json::json!({ "a": "b" }));
    }

    #[test]
    fn maps_are_queryable_by_str() {
        let mut map = BTreeMap::new();
        map.insert(Tag::from("foo"), 1);
        assert_eq!(map.get("foo"), Some(&1));
    }

    #[test]
    fn tag_set_sorts_and_dedups() {
        let set = tag_set(["b", "a", "b"]);
        assert_eq!(join_tags(&set), "a, b");
    }
}
