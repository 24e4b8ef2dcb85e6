//! Local tag index: the fallback store mapping tags to cached URLs.
//!
//! Used when the active purge backend cannot purge by tag natively. The
//! invariant is replace-on-rerender: an entry `(tag, url)` exists iff the
//! last render of `url` declared a dependency on `tag`. Stale entries only
//! cause harmless extra purges; missing entries cause under-purging, so
//! `record` must never be append-only.

mod memory;
mod postgres;

pub use memory::MemoryTagIndex;
pub use postgres::PgTagIndex;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::tags::Tag;

/// Persistent many-to-many mapping between tags and URLs.
///
/// Implementations must tolerate concurrent `record` calls for different
/// URLs and concurrent `lookup`/`remove` from the purge path. Atomicity is
/// required per URL (`record`) and per tag (`remove`) only; there is no
/// whole-table lock.
#[async_trait]
pub trait TagIndex: Send + Sync {
    /// Transactionally replace all entries for `url` with one per tag.
    async fn record(&self, url: &str, tags: &HashSet<Tag>) -> Result<(), IndexError>;

    /// Union of URLs across all supplied tags.
    async fn lookup(&self, tags: &[Tag]) -> Result<HashSet<String>, IndexError>;

    /// Delete every entry matching any of the supplied tags.
    async fn remove(&self, tags: &[Tag]) -> Result<(), IndexError>;

    /// Delete the entries pairing `tag` with each of the supplied URLs,
    /// leaving the tag's other entries in place.
    async fn remove_urls(&self, tag: &Tag, urls: &[String]) -> Result<(), IndexError>;
}
