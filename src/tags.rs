//! Cache tag model.
//!
//! A tag names a dependency a cached page has on a piece of content. The
//! canonical string form is `prefix_code + value` (`el42`, `se7`, `st3`);
//! tags compare equal iff their canonical strings are equal.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::TagError;

/// Prefix taxonomy for cache tags.
///
/// The two-character codes are part of the wire format and must not change:
/// they are what reverse proxies match on when banning by tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagPrefix {
    /// A single content element (entry, asset, global).
    Element,
    /// Every element in a section; purged when the section membership changes.
    Section,
    /// A structure's ordering; one tag covers every listing page that depends
    /// on the order, regardless of how many elements moved.
    Structure,
    /// Caller-defined tag, transmitted verbatim.
    Custom,
}

impl TagPrefix {
    /// Fixed two-character prefix code; empty for custom tags.
    pub fn code(&self) -> &'static str {
        match self {
            TagPrefix::Element => "el",
            TagPrefix::Section => "se",
            TagPrefix::Structure => "st",
            TagPrefix::Custom => "",
        }
    }
}

/// Immutable cache tag value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    prefix: TagPrefix,
    canonical: String,
}

impl Tag {
    /// Construct a tag from a prefix and a non-empty value.
    pub fn new(prefix: TagPrefix, value: impl AsRef<str>) -> Result<Self, TagError> {
        let value = value.as_ref();
        if value.is_empty() {
            return Err(TagError::EmptyValue);
        }
        Ok(Self {
            prefix,
            canonical: format!("{}{}", prefix.code(), value),
        })
    }

    pub fn element(id: impl AsRef<str>) -> Result<Self, TagError> {
        Self::new(TagPrefix::Element, id)
    }

    pub fn section(id: impl AsRef<str>) -> Result<Self, TagError> {
        Self::new(TagPrefix::Section, id)
    }

    pub fn structure(id: impl AsRef<str>) -> Result<Self, TagError> {
        Self::new(TagPrefix::Structure, id)
    }

    pub fn custom(value: impl AsRef<str>) -> Result<Self, TagError> {
        Self::new(TagPrefix::Custom, value)
    }

    pub fn prefix(&self) -> TagPrefix {
        self.prefix
    }

    /// Canonical string form, used in headers and as the index storage key.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Canonical form with the multi-tenant key prefix prepended.
    ///
    /// Several installations sharing one cache backend configure distinct key
    /// prefixes so their tag namespaces cannot collide.
    pub fn namespaced(&self, key_prefix: &str) -> String {
        if key_prefix.is_empty() {
            self.canonical.clone()
        } else {
            format!("{key_prefix}{}", self.canonical)
        }
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn canonical_form_uses_fixed_prefix_codes() {
        assert_eq!(Tag::element("42").unwrap().canonical(), "el42");
        assert_eq!(Tag::section("7").unwrap().canonical(), "se7");
        assert_eq!(Tag::structure("3").unwrap().canonical(), "st3");
        assert_eq!(Tag::custom("home").unwrap().canonical(), "home");
    }

    #[test]
    fn empty_value_is_rejected() {
        assert_eq!(Tag::element("").unwrap_err(), TagError::EmptyValue);
        assert_eq!(Tag::custom("").unwrap_err(), TagError::EmptyValue);
    }

    #[test]
    fn equality_is_by_canonical_string() {
        // A custom tag spelled "el42" is indistinguishable from the element
        // tag: the cache backend only ever sees the canonical string.
        let element = Tag::element("42").unwrap();
        let custom = Tag::custom("el42").unwrap();
        assert_eq!(element, custom);

        let mut set = HashSet::new();
        set.insert(element);
        set.insert(custom);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn namespaced_prepends_key_prefix() {
        let tag = Tag::element("42").unwrap();
        assert_eq!(tag.namespaced(""), "el42");
        assert_eq!(tag.namespaced("site1-"), "site1-el42");
    }
}
