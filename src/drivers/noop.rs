//! No-op driver: always succeeds, purges nothing.
//!
//! Selected explicitly when purging is disabled, or substituted at startup
//! when the configured driver cannot be built.

use async_trait::async_trait;
use tracing::debug;

use crate::tags::Tag;

use super::{PurgeDriver, PurgeOutcome};

pub struct NoopDriver {
    name: String,
}

impl NoopDriver {
    pub fn new() -> Self {
        Self::named("noop".to_string())
    }

    pub fn named(name: String) -> Self {
        Self { name }
    }
}

impl Default for NoopDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PurgeDriver for NoopDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_tag_purge(&self) -> bool {
        true
    }

    async fn purge_tags(&self, tags: &[Tag]) -> PurgeOutcome {
        debug!(driver = %self.name, tag_count = tags.len(), "No-op driver dropped tag purge");
        PurgeOutcome::default()
    }

    async fn purge_urls(&self, urls: &[String]) -> PurgeOutcome {
        debug!(driver = %self.name, url_count = urls.len(), "No-op driver dropped URL purge");
        PurgeOutcome::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn purges_nothing_and_never_fails() {
        let driver = NoopDriver::new();
        let tags = [Tag::element("42").unwrap(), Tag::section("7").unwrap()];

        let outcome = driver.purge_tags(&tags).await;
        assert_eq!(outcome.purged, 0);
        assert!(outcome.is_clean());

        let outcome = driver.purge_urls(&["/a".to_string()]).await;
        assert_eq!(outcome.purged, 0);
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn repeated_purges_behave_identically() {
        let driver = NoopDriver::new();
        let tags = [Tag::element("42").unwrap()];
        let first = driver.purge_tags(&tags).await;
        let second = driver.purge_tags(&tags).await;
        assert_eq!(first.purged, second.purged);
        assert!(first.is_clean() && second.is_clean());
    }
}
