//! In-process tag index.
//!
//! Bidirectional maps so that a re-render of a URL can drop its previous
//! entries without scanning every tag. Suitable for single-process
//! deployments and tests; durable deployments use [`super::PgTagIndex`].

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::lock::{rw_read, rw_write};
use crate::tags::Tag;

use super::TagIndex;

const SOURCE: &str = "scopa::index::memory";

#[derive(Default)]
pub struct MemoryTagIndex {
    /// canonical tag -> urls that declared it at last render
    tag_to_urls: RwLock<HashMap<String, HashSet<String>>>,
    /// url -> canonical tags it declared at last render
    url_to_tags: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryTagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct tags currently indexed.
    pub fn tag_count(&self) -> usize {
        rw_read(&self.tag_to_urls, SOURCE, "tag_count").len()
    }

    /// Number of distinct URLs currently indexed.
    pub fn url_count(&self) -> usize {
        rw_read(&self.url_to_tags, SOURCE, "url_count").len()
    }
}

#[async_trait]
impl TagIndex for MemoryTagIndex {
    async fn record(&self, url: &str, tags: &HashSet<Tag>) -> Result<(), IndexError> {
        // Both guards held together so the replace is atomic per URL.
        let mut t2u = rw_write(&self.tag_to_urls, SOURCE, "record");
        let mut u2t = rw_write(&self.url_to_tags, SOURCE, "record");

        if let Some(previous) = u2t.remove(url) {
            for canonical in previous {
                if let Some(urls) = t2u.get_mut(&canonical) {
                    urls.remove(url);
                    if urls.is_empty() {
                        t2u.remove(&canonical);
                    }
                }
            }
        }

        let mut declared = HashSet::with_capacity(tags.len());
        for tag in tags {
            let canonical = tag.canonical().to_string();
            t2u.entry(canonical.clone())
                .or_default()
                .insert(url.to_string());
            declared.insert(canonical);
        }
        if !declared.is_empty() {
            u2t.insert(url.to_string(), declared);
        }

        Ok(())
    }

    async fn lookup(&self, tags: &[Tag]) -> Result<HashSet<String>, IndexError> {
        let t2u = rw_read(&self.tag_to_urls, SOURCE, "lookup");
        let mut urls = HashSet::new();
        for tag in tags {
            if let Some(found) = t2u.get(tag.canonical()) {
                urls.extend(found.iter().cloned());
            }
        }
        Ok(urls)
    }

    async fn remove(&self, tags: &[Tag]) -> Result<(), IndexError> {
        let mut t2u = rw_write(&self.tag_to_urls, SOURCE, "remove");
        let mut u2t = rw_write(&self.url_to_tags, SOURCE, "remove");

        for tag in tags {
            if let Some(urls) = t2u.remove(tag.canonical()) {
                for url in urls {
                    if let Some(declared) = u2t.get_mut(&url) {
                        declared.remove(tag.canonical());
                        if declared.is_empty() {
                            u2t.remove(&url);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn remove_urls(&self, tag: &Tag, urls: &[String]) -> Result<(), IndexError> {
        let mut t2u = rw_write(&self.tag_to_urls, SOURCE, "remove_urls");
        let mut u2t = rw_write(&self.url_to_tags, SOURCE, "remove_urls");

        if let Some(tagged) = t2u.get_mut(tag.canonical()) {
            for url in urls {
                tagged.remove(url);
                if let Some(declared) = u2t.get_mut(url) {
                    declared.remove(tag.canonical());
                    if declared.is_empty() {
                        u2t.remove(url);
                    }
                }
            }
            if tagged.is_empty() {
                t2u.remove(tag.canonical());
            }
        }

        Ok(())
    }
}
