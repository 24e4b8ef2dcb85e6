//! Purge drivers: the pluggable capability that talks to a cache backend.
//!
//! A driver purges by tag when the backend supports it natively
//! ([`PurgeDriver::supports_tag_purge`]), or by URL otherwise. URL-only
//! backends get wrapped by [`LocalIndexDriver`] when fallback mode is on, so
//! the rest of the system always purges by tag.
//!
//! Purging is best-effort: one unreachable call is recorded as a per-subject
//! failure and never aborts the remainder of a batch.

mod http;
mod local;
mod noop;

pub use http::HttpDriver;
pub use local::LocalIndexDriver;
pub use noop::NoopDriver;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{DriverKind, PurgeSettings};
use crate::error::{DriverError, PurgeCallError};
use crate::tags::Tag;

/// What a single purge failure refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeSubject {
    Tag(Tag),
    Url(String),
}

impl fmt::Display for PurgeSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurgeSubject::Tag(tag) => write!(f, "tag {tag}"),
            PurgeSubject::Url(url) => write!(f, "url {url}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PurgeFailure {
    pub subject: PurgeSubject,
    pub error: PurgeCallError,
}

/// Result of one purge batch: how many subjects were purged, and which
/// failed. Failures are retained by the caller for retry; they never abort
/// the batch.
#[derive(Debug, Clone, Default)]
pub struct PurgeOutcome {
    pub purged: usize,
    pub failures: Vec<PurgeFailure>,
}

impl PurgeOutcome {
    pub fn purged(count: usize) -> Self {
        Self {
            purged: count,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: PurgeOutcome) {
        self.purged += other.purged;
        self.failures.extend(other.failures);
    }

    pub(crate) fn record_tag(&mut self, tag: &Tag, result: Result<(), PurgeCallError>) {
        match result {
            Ok(()) => self.purged += 1,
            Err(error) => self.failures.push(PurgeFailure {
                subject: PurgeSubject::Tag(tag.clone()),
                error,
            }),
        }
    }

    pub(crate) fn record_url(&mut self, url: &str, result: Result<(), PurgeCallError>) {
        match result {
            Ok(()) => self.purged += 1,
            Err(error) => self.failures.push(PurgeFailure {
                subject: PurgeSubject::Url(url.to_string()),
                error,
            }),
        }
    }
}

/// Capability interface for a cache backend.
#[async_trait]
pub trait PurgeDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the backend can purge by tag natively. URL-only backends
    /// answer false and rely on the local tag index to resolve URLs.
    fn supports_tag_purge(&self) -> bool;

    /// Purge every cached page that declared any of the given tags.
    async fn purge_tags(&self, tags: &[Tag]) -> PurgeOutcome;

    /// Invalidate the given URLs directly.
    async fn purge_urls(&self, urls: &[String]) -> PurgeOutcome;
}

/// Construct the active driver from the named registry.
///
/// Pure factory: exactly one instance, selected once at startup. Fails with
/// [`DriverError::UnknownDriver`] when the active name has no definition and
/// [`DriverError::MissingField`] when required configuration is absent; the
/// orchestrator degrades both to the no-op driver with a surfaced warning.
pub fn build_driver(settings: &PurgeSettings) -> Result<Arc<dyn PurgeDriver>, DriverError> {
    let name = &settings.active_driver;
    let definition = settings
        .drivers
        .get(name)
        .ok_or_else(|| DriverError::unknown(name.clone()))?;

    match definition.kind {
        DriverKind::Noop => Ok(Arc::new(NoopDriver::named(name.clone()))),
        DriverKind::Http => Ok(Arc::new(HttpDriver::from_settings(
            name,
            definition,
            &settings.key_prefix,
        )?)),
    }
}
