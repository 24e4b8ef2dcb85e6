//! Response header computation.
//!
//! A pure function from the accumulated tag set to header name/value pairs,
//! decoupled from any request/response object model: the axum middleware uses
//! it, and non-axum hosts can apply the pairs to their own response type.

use std::collections::HashSet;

use crate::config::{DEFAULT_INFO_HEADER, DEFAULT_TAG_HEADER, PurgeSettings};
use crate::tags::Tag;

/// How the current response relates to the cache. Observability only; the
/// value is never purge-relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Bypass => "bypass",
        }
    }
}

/// Header names and the key prefix applied at transmission time.
#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    pub tag_header: String,
    pub info_header: String,
    pub key_prefix: String,
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        Self {
            tag_header: DEFAULT_TAG_HEADER.to_string(),
            info_header: DEFAULT_INFO_HEADER.to_string(),
            key_prefix: String::new(),
        }
    }
}

impl HeaderPolicy {
    pub fn from_settings(settings: &PurgeSettings) -> Self {
        Self {
            tag_header: settings.tag_header.clone(),
            info_header: settings.info_header.clone(),
            key_prefix: settings.key_prefix.clone(),
        }
    }

    /// Compute the outgoing headers for a response that declared `tags`.
    ///
    /// The tag header is omitted when no tags were collected. Tags are sorted
    /// by canonical string so the header value is deterministic.
    pub fn compute_headers(&self, tags: &HashSet<Tag>) -> Vec<(String, String)> {
        if tags.is_empty() {
            return Vec::new();
        }

        let mut namespaced: Vec<String> = tags
            .iter()
            .map(|tag| tag.namespaced(&self.key_prefix))
            .collect();
        namespaced.sort_unstable();

        vec![(self.tag_header.clone(), namespaced.join(" "))]
    }

    /// The informational cache-status header pair.
    pub fn status_header(&self, status: CacheStatus) -> (String, String) {
        (self.info_header.clone(), status.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(canonicals: &[&str]) -> HashSet<Tag> {
        canonicals
            .iter()
            .map(|c| Tag::custom(*c).unwrap())
            .collect()
    }

    #[test]
    fn empty_tag_set_emits_no_tag_header() {
        let policy = HeaderPolicy::default();
        assert!(policy.compute_headers(&HashSet::new()).is_empty());
    }

    #[test]
    fn header_value_is_sorted_and_space_separated() {
        let policy = HeaderPolicy::default();
        let headers = policy.compute_headers(&tags(&["st3", "el42", "se7"]));
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].0, "Cache-Tags");
        assert_eq!(headers[0].1, "el42 se7 st3");
    }

    #[test]
    fn key_prefix_is_applied_before_transmission() {
        let policy = HeaderPolicy {
            key_prefix: "site1-".to_string(),
            ..HeaderPolicy::default()
        };
        let headers = policy.compute_headers(&tags(&["el42"]));
        assert_eq!(headers[0].1, "site1-el42");
    }

    #[test]
    fn status_header_reports_cache_outcome() {
        let policy = HeaderPolicy::default();
        let (name, value) = policy.status_header(CacheStatus::Miss);
        assert_eq!(name, "X-Scopa-Cache");
        assert_eq!(value, "miss");
        assert_eq!(policy.status_header(CacheStatus::Bypass).1, "bypass");
    }
}
