//! Local-index driver: emulates purge-by-tag for URL-only backends.
//!
//! Wraps a URL-capable inner driver and the local tag index. For each tag it
//! resolves the URLs recorded at render time, invalidates them through the
//! inner driver, and deletes each `(tag, URL)` pair whose purge succeeded;
//! pairs for failed URLs stay so the next purge retries exactly them. URLs
//! are resolved before the network call and no index lock is held across it.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::PurgeCallError;
use crate::index::TagIndex;
use crate::tags::Tag;

use super::{PurgeDriver, PurgeOutcome, PurgeSubject};

pub struct LocalIndexDriver {
    index: Arc<dyn TagIndex>,
    inner: Arc<dyn PurgeDriver>,
    name: String,
}

impl LocalIndexDriver {
    pub fn new(index: Arc<dyn TagIndex>, inner: Arc<dyn PurgeDriver>) -> Self {
        let name = format!("local-index({})", inner.name());
        Self { index, inner, name }
    }

    pub fn inner(&self) -> &Arc<dyn PurgeDriver> {
        &self.inner
    }

    /// Purge one tag: resolve, invalidate, then clean up the index.
    ///
    /// Deletion and purge are one logical step per URL: a pair is removed
    /// only after the downstream purge of that URL succeeded, so a failed
    /// URL is retried on the next purge without re-purging the rest.
    async fn purge_one(&self, tag: &Tag) -> Result<(), PurgeCallError> {
        let urls = match self.index.lookup(std::slice::from_ref(tag)).await {
            Ok(urls) => urls,
            Err(err) => return Err(PurgeCallError::from(&err)),
        };

        if urls.is_empty() {
            debug!(tag = %tag, "No cached URLs recorded for tag");
            return Ok(());
        }

        let urls: Vec<String> = urls.into_iter().collect();
        let outcome = self.inner.purge_urls(&urls).await;

        let cleanup = if outcome.is_clean() {
            self.index.remove(std::slice::from_ref(tag)).await
        } else {
            let failed: HashSet<&str> = outcome
                .failures
                .iter()
                .filter_map(|failure| match &failure.subject {
                    PurgeSubject::Url(url) => Some(url.as_str()),
                    PurgeSubject::Tag(_) => None,
                })
                .collect();
            let purged: Vec<String> = urls
                .iter()
                .filter(|url| !failed.contains(url.as_str()))
                .cloned()
                .collect();
            self.index.remove_urls(tag, &purged).await
        };

        if let Err(err) = cleanup {
            // The purges themselves succeeded; leftover entries only cause a
            // harmless re-purge later.
            warn!(tag = %tag, error = %err, "Failed to delete purged index entries");
        }

        match outcome.failures.first() {
            Some(failure) => Err(failure.error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PurgeDriver for LocalIndexDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_tag_purge(&self) -> bool {
        true
    }

    async fn purge_tags(&self, tags: &[Tag]) -> PurgeOutcome {
        let mut outcome = PurgeOutcome::default();
        for tag in tags {
            let result = self.purge_one(tag).await;
            outcome.record_tag(tag, result);
        }
        outcome
    }

    async fn purge_urls(&self, urls: &[String]) -> PurgeOutcome {
        self.inner.purge_urls(urls).await
    }
}
