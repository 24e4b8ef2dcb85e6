//! Orchestration: wires the mutation signal, the tag index, and the purge
//! driver together.
//!
//! Two independent flows share only the index and the driver:
//!
//! - **Request flow** (`RequestScope`, [`Invalidator::finalize`]): collect
//!   tags while the response renders, then compute the outgoing headers and,
//!   in fallback mode, record the URL's tag set into the local index.
//! - **Mutation flow** ([`Invalidator::handle_mutation`],
//!   [`Invalidator::consume`]): map content mutations to tags and purge them
//!   through the active driver.
//!
//! Neither flow holds a lock across an index operation and an outbound
//! network call, so they cannot deadlock against each other.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info, instrument, warn};

use crate::config::PurgeSettings;
use crate::drivers::{self, LocalIndexDriver, NoopDriver, PurgeDriver, PurgeOutcome};
use crate::events::EventQueue;
use crate::headers::HeaderPolicy;
use crate::index::TagIndex;
use crate::mapper::{ElementMutation, PurgePlan, map_mutation};
use crate::tags::Tag;

const METRIC_PURGE_MS: &str = "scopa_purge_ms";
const METRIC_PURGE_TAG_TOTAL: &str = "scopa_purge_tag_total";
const METRIC_PURGE_FAIL_TOTAL: &str = "scopa_purge_fail_total";
const METRIC_INDEX_RECORD_TOTAL: &str = "scopa_index_record_total";
const METRIC_INDEX_RECORD_FAIL_TOTAL: &str = "scopa_index_record_fail_total";

/// Process-lifetime owner of one purge driver and one tag index.
pub struct Invalidator {
    driver: Arc<dyn PurgeDriver>,
    index: Arc<dyn TagIndex>,
    queue: Arc<EventQueue>,
    policy: HeaderPolicy,
    fallback: bool,
    consume_batch_limit: usize,
}

impl Invalidator {
    /// Build the invalidator from settings, resolving the active driver.
    ///
    /// Startup configuration faults must not crash the host: an unknown
    /// driver name or incomplete driver definition degrades to the no-op
    /// driver with a surfaced warning, as does a URL-only backend when
    /// fallback mode is off.
    pub fn from_settings(settings: &PurgeSettings, index: Arc<dyn TagIndex>) -> Self {
        let driver = match drivers::build_driver(settings) {
            Ok(driver) => driver,
            Err(err) => {
                warn!(
                    error = %err,
                    active_driver = %settings.active_driver,
                    "Purge driver unavailable, degrading to no-op"
                );
                Arc::new(NoopDriver::new()) as Arc<dyn PurgeDriver>
            }
        };
        Self::with_driver(settings, index, driver)
    }

    /// Build the invalidator around an already-constructed driver.
    ///
    /// Applies the same capability resolution as [`Invalidator::from_settings`];
    /// hosts use this to inject a driver the registry cannot describe.
    pub fn with_driver(
        settings: &PurgeSettings,
        index: Arc<dyn TagIndex>,
        driver: Arc<dyn PurgeDriver>,
    ) -> Self {
        let driver: Arc<dyn PurgeDriver> = if settings.fallback_local_index {
            Arc::new(LocalIndexDriver::new(index.clone(), driver))
        } else if !driver.supports_tag_purge() {
            warn!(
                driver = %driver.name(),
                "Driver cannot purge by tag and fallback mode is off, degrading to no-op"
            );
            Arc::new(NoopDriver::new())
        } else {
            driver
        };

        info!(
            driver = %driver.name(),
            fallback = settings.fallback_local_index,
            "Cache invalidation active"
        );

        Self {
            driver,
            index,
            queue: Arc::new(EventQueue::new()),
            policy: HeaderPolicy::from_settings(settings),
            fallback: settings.fallback_local_index,
            consume_batch_limit: settings.consume_batch_limit,
        }
    }

    pub fn driver(&self) -> &Arc<dyn PurgeDriver> {
        &self.driver
    }

    pub fn index(&self) -> &Arc<dyn TagIndex> {
        &self.index
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn policy(&self) -> &HeaderPolicy {
        &self.policy
    }

    pub fn fallback_enabled(&self) -> bool {
        self.fallback
    }

    /// Finalize a response: compute its headers and, in fallback mode,
    /// record its tag dependencies against the URL.
    ///
    /// Recording happens even for an empty tag set: a re-render that no
    /// longer declares any tags must drop the URL's previous entries.
    /// Header emission always proceeds; a failed index record is logged and
    /// counted, leaving the URL's previous entries in place (under-purge
    /// until the next render, the documented degraded state).
    pub async fn finalize(&self, url: &str, tags: &HashSet<Tag>) -> Vec<(String, String)> {
        let headers = self.policy.compute_headers(tags);

        if self.fallback {
            match self.index.record(url, tags).await {
                Ok(()) => {
                    counter!(METRIC_INDEX_RECORD_TOTAL).increment(1);
                    debug!(url, tag_count = tags.len(), "Recorded response tags");
                }
                Err(err) => {
                    counter!(METRIC_INDEX_RECORD_FAIL_TOTAL).increment(1);
                    warn!(url, error = %err, "Failed to record response tags");
                }
            }
        }

        headers
    }

    /// Purge the tags affected by a single mutation, bypassing the queue.
    pub async fn handle_mutation(&self, mutation: &ElementMutation) -> PurgeOutcome {
        self.purge(map_mutation(mutation)).await
    }

    /// Drain queued mutations and purge their merged tag set.
    ///
    /// Returns true if any events were processed.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> bool {
        let events = self.queue.drain(self.consume_batch_limit);
        if events.is_empty() {
            return false;
        }

        let event_count = events.len();
        let plan = PurgePlan::from_mutations(events.iter().map(|event| &event.mutation));
        info!(event_count, plan = %plan, "Consuming mutation events");

        self.purge(plan.tags.into_iter().collect()).await;
        true
    }

    /// Purge a set of tags through the active driver, best-effort.
    pub async fn purge(&self, mut tags: Vec<Tag>) -> PurgeOutcome {
        if tags.is_empty() {
            return PurgeOutcome::default();
        }
        // Deterministic order for reproducible logs and tests.
        tags.sort_unstable_by(|a, b| a.canonical().cmp(b.canonical()));

        let started_at = Instant::now();
        let outcome = self.driver.purge_tags(&tags).await;

        counter!(METRIC_PURGE_TAG_TOTAL).increment(outcome.purged as u64);
        counter!(METRIC_PURGE_FAIL_TOTAL).increment(outcome.failures.len() as u64);
        histogram!(METRIC_PURGE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        if outcome.is_clean() {
            info!(
                driver = %self.driver.name(),
                purged = outcome.purged,
                "Purge complete"
            );
        } else {
            for failure in &outcome.failures {
                warn!(
                    driver = %self.driver.name(),
                    subject = %failure.subject,
                    error = %failure.error,
                    "Purge failure"
                );
            }
            info!(
                driver = %self.driver.name(),
                purged = outcome.purged,
                failed = outcome.failures.len(),
                "Purge complete with failures"
            );
        }

        outcome
    }
}

/// Lifecycle of one request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Idle,
    Collecting,
    Emitted,
}

/// Per-request state machine: `Idle -> Collecting -> Emitted`.
///
/// Owns the request's tag collection; the final headers are computed exactly
/// once, at emission.
pub struct RequestScope {
    collection: Arc<crate::collection::TagCollection>,
    phase: RequestPhase,
}

impl RequestScope {
    pub fn new() -> Self {
        Self {
            collection: Arc::new(crate::collection::TagCollection::new()),
            phase: RequestPhase::Idle,
        }
    }

    /// Begin collecting. Idempotent once collecting has started.
    pub fn begin(&mut self) {
        if self.phase == RequestPhase::Idle {
            self.phase = RequestPhase::Collecting;
        }
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    pub fn collection(&self) -> &Arc<crate::collection::TagCollection> {
        &self.collection
    }

    pub fn add(&self, tag: Tag) {
        debug_assert_eq!(self.phase, RequestPhase::Collecting);
        self.collection.add(tag);
    }

    pub fn add_all(&self, tags: impl IntoIterator<Item = Tag>) {
        debug_assert_eq!(self.phase, RequestPhase::Collecting);
        self.collection.add_all(tags);
    }

    /// Emit the response: transition to `Emitted` and finalize through the
    /// invalidator. Returns `None` on a second emission attempt.
    pub async fn emit(
        &mut self,
        invalidator: &Invalidator,
        url: &str,
    ) -> Option<Vec<(String, String)>> {
        if self.phase == RequestPhase::Emitted {
            warn!(url, "Response already emitted for this request scope");
            return None;
        }
        self.phase = RequestPhase::Emitted;
        Some(invalidator.finalize(url, &self.collection.all()).await)
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience facade for write paths: publish a mutation and optionally
/// consume the queue immediately.
pub struct Trigger {
    invalidator: Arc<Invalidator>,
}

impl Trigger {
    pub fn new(invalidator: Arc<Invalidator>) -> Self {
        Self { invalidator }
    }

    /// Publish a mutation; when `consume_now` is false the event waits for a
    /// background consumption pass.
    pub async fn mutated(&self, mutation: ElementMutation, consume_now: bool) {
        self.invalidator.queue().publish(mutation);
        if consume_now {
            self.invalidator.consume().await;
        }
    }

    pub async fn element_saved(
        &self,
        element_id: &str,
        section_id: Option<&str>,
        structure_id: Option<&str>,
    ) {
        let mut mutation = ElementMutation::save(element_id);
        mutation.section_id = section_id.map(str::to_string);
        mutation.structure_id = structure_id.map(str::to_string);
        self.mutated(mutation, true).await;
    }

    pub async fn element_deleted(
        &self,
        element_id: &str,
        section_id: Option<&str>,
        structure_id: Option<&str>,
    ) {
        let mut mutation = ElementMutation::delete(element_id);
        mutation.section_id = section_id.map(str::to_string);
        mutation.structure_id = structure_id.map(str::to_string);
        self.mutated(mutation, true).await;
    }

    pub async fn structure_reordered(&self, structure_id: &str) {
        self.mutated(ElementMutation::reorder(structure_id), true).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::config::DriverSettings;
    use crate::error::{IndexError, PurgeCallError};
    use crate::index::MemoryTagIndex;

    /// Tag-capable driver that records every purge call.
    #[derive(Default)]
    struct RecordingDriver {
        calls: Mutex<Vec<Vec<String>>>,
        fail_tags: Mutex<HashSet<String>>,
    }

    impl RecordingDriver {
        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        fn fail_on(&self, canonical: &str) {
            self.fail_tags.lock().unwrap().insert(canonical.to_string());
        }
    }

    #[async_trait]
    impl PurgeDriver for RecordingDriver {
        fn name(&self) -> &str {
            "recording"
        }

        fn supports_tag_purge(&self) -> bool {
            true
        }

        async fn purge_tags(&self, tags: &[Tag]) -> PurgeOutcome {
            self.calls
                .lock()
                .unwrap()
                .push(tags.iter().map(|t| t.canonical().to_string()).collect());

            let mut outcome = PurgeOutcome::default();
            for tag in tags {
                if self.fail_tags.lock().unwrap().contains(tag.canonical()) {
                    outcome.record_tag(tag, Err(PurgeCallError::transport("backend down")));
                } else {
                    outcome.record_tag(tag, Ok(()));
                }
            }
            outcome
        }

        async fn purge_urls(&self, _urls: &[String]) -> PurgeOutcome {
            PurgeOutcome::default()
        }
    }

    /// Index that always fails, for degraded-record coverage.
    struct BrokenIndex;

    #[async_trait]
    impl crate::index::TagIndex for BrokenIndex {
        async fn record(&self, _url: &str, _tags: &HashSet<Tag>) -> Result<(), IndexError> {
            Err(IndexError::storage("record", "disk on fire"))
        }

        async fn lookup(&self, _tags: &[Tag]) -> Result<HashSet<String>, IndexError> {
            Err(IndexError::storage("lookup", "disk on fire"))
        }

        async fn remove(&self, _tags: &[Tag]) -> Result<(), IndexError> {
            Err(IndexError::storage("remove", "disk on fire"))
        }

        async fn remove_urls(&self, _tag: &Tag, _urls: &[String]) -> Result<(), IndexError> {
            Err(IndexError::storage("remove_urls", "disk on fire"))
        }
    }

    fn invalidator_with(driver: Arc<dyn PurgeDriver>, fallback: bool) -> Invalidator {
        let settings = PurgeSettings {
            fallback_local_index: fallback,
            ..PurgeSettings::default()
        };
        Invalidator::with_driver(&settings, Arc::new(MemoryTagIndex::new()), driver)
    }

    #[tokio::test]
    async fn unknown_driver_degrades_to_noop() {
        let settings = PurgeSettings {
            active_driver: "varnish".to_string(),
            ..PurgeSettings::default()
        };
        let invalidator = Invalidator::from_settings(&settings, Arc::new(MemoryTagIndex::new()));
        assert_eq!(invalidator.driver().name(), "noop");

        // The degraded subsystem still answers purges, with nothing done.
        let outcome = invalidator
            .handle_mutation(&ElementMutation::save("42"))
            .await;
        assert_eq!(outcome.purged, 0);
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn invalid_driver_config_degrades_to_noop() {
        let mut drivers = HashMap::new();
        drivers.insert(
            "varnish".to_string(),
            DriverSettings {
                kind: crate::config::DriverKind::Http,
                endpoint: None,
                ..DriverSettings::default()
            },
        );
        let settings = PurgeSettings {
            active_driver: "varnish".to_string(),
            drivers,
            ..PurgeSettings::default()
        };
        let invalidator = Invalidator::from_settings(&settings, Arc::new(MemoryTagIndex::new()));
        assert_eq!(invalidator.driver().name(), "noop");
    }

    #[tokio::test]
    async fn url_only_driver_without_fallback_degrades_to_noop() {
        let mut drivers = HashMap::new();
        let mut keycdn = DriverSettings::http("https://api.keycdn.example/purge");
        keycdn.tag_capable = false;
        drivers.insert("keycdn".to_string(), keycdn);
        let settings = PurgeSettings {
            active_driver: "keycdn".to_string(),
            drivers,
            fallback_local_index: false,
            ..PurgeSettings::default()
        };
        let invalidator = Invalidator::from_settings(&settings, Arc::new(MemoryTagIndex::new()));
        assert_eq!(invalidator.driver().name(), "noop");
    }

    #[tokio::test]
    async fn url_only_driver_with_fallback_is_wrapped() {
        let mut drivers = HashMap::new();
        let mut keycdn = DriverSettings::http("https://api.keycdn.example/purge");
        keycdn.tag_capable = false;
        drivers.insert("keycdn".to_string(), keycdn);
        let settings = PurgeSettings {
            active_driver: "keycdn".to_string(),
            drivers,
            fallback_local_index: true,
            ..PurgeSettings::default()
        };
        let invalidator = Invalidator::from_settings(&settings, Arc::new(MemoryTagIndex::new()));
        assert!(invalidator.driver().supports_tag_purge());
        assert_eq!(invalidator.driver().name(), "local-index(keycdn)");
    }

    #[tokio::test]
    async fn handle_mutation_purges_mapped_tags_in_order() {
        let driver = Arc::new(RecordingDriver::default());
        let invalidator = invalidator_with(driver.clone(), false);

        let mutation = ElementMutation::save("42").in_section("7");
        let outcome = invalidator.handle_mutation(&mutation).await;
        assert_eq!(outcome.purged, 2);

        assert_eq!(driver.calls(), vec![vec!["el42".to_string(), "se7".to_string()]]);
    }

    #[tokio::test]
    async fn consume_merges_queued_mutations_into_one_purge() {
        let driver = Arc::new(RecordingDriver::default());
        let invalidator = invalidator_with(driver.clone(), false);

        invalidator
            .queue()
            .publish(ElementMutation::save("1").in_section("7"));
        invalidator
            .queue()
            .publish(ElementMutation::save("2").in_section("7"));

        assert!(invalidator.consume().await);
        assert!(invalidator.queue().is_empty());

        // One driver call with the deduplicated union.
        let calls = driver.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["el1", "el2", "se7"]);
    }

    #[tokio::test]
    async fn consume_on_empty_queue_returns_false() {
        let invalidator = invalidator_with(Arc::new(RecordingDriver::default()), false);
        assert!(!invalidator.consume().await);
    }

    #[tokio::test]
    async fn partial_failure_does_not_abort_the_batch() {
        let driver = Arc::new(RecordingDriver::default());
        driver.fail_on("el2");
        let invalidator = invalidator_with(driver.clone(), false);

        let tags = vec![
            Tag::element("1").unwrap(),
            Tag::element("2").unwrap(),
            Tag::element("3").unwrap(),
        ];
        let outcome = invalidator.purge(tags).await;
        assert_eq!(outcome.purged, 2);
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test]
    async fn finalize_emits_headers_and_records_in_fallback_mode() {
        let invalidator = invalidator_with(Arc::new(RecordingDriver::default()), true);

        let tags: HashSet<Tag> = [Tag::element("42").unwrap(), Tag::section("7").unwrap()]
            .into_iter()
            .collect();
        let headers = invalidator.finalize("/blog/post-42", &tags).await;
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].1, "el42 se7");

        let urls = invalidator
            .index()
            .lookup(&[Tag::element("42").unwrap()])
            .await
            .unwrap();
        assert!(urls.contains("/blog/post-42"));
    }

    #[tokio::test]
    async fn rerender_without_tags_clears_previous_entries() {
        let invalidator = invalidator_with(Arc::new(RecordingDriver::default()), true);

        let tags: HashSet<Tag> = [Tag::element("42").unwrap()].into_iter().collect();
        invalidator.finalize("/blog/post-42", &tags).await;

        // The page re-renders declaring nothing; stale entries must go away.
        invalidator.finalize("/blog/post-42", &HashSet::new()).await;

        let urls = invalidator
            .index()
            .lookup(&[Tag::element("42").unwrap()])
            .await
            .unwrap();
        assert!(urls.is_empty());
    }

    #[tokio::test]
    async fn finalize_does_not_record_when_fallback_is_off() {
        let invalidator = invalidator_with(Arc::new(RecordingDriver::default()), false);

        let tags: HashSet<Tag> = [Tag::element("42").unwrap()].into_iter().collect();
        invalidator.finalize("/blog/post-42", &tags).await;

        let urls = invalidator
            .index()
            .lookup(&[Tag::element("42").unwrap()])
            .await
            .unwrap();
        assert!(urls.is_empty());
    }

    #[tokio::test]
    async fn header_emission_survives_index_failure() {
        let settings = PurgeSettings {
            fallback_local_index: true,
            ..PurgeSettings::default()
        };
        let invalidator = Invalidator::from_settings(&settings, Arc::new(BrokenIndex));

        let tags: HashSet<Tag> = [Tag::element("42").unwrap()].into_iter().collect();
        let headers = invalidator.finalize("/blog/post-42", &tags).await;
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].1, "el42");
    }

    #[tokio::test]
    async fn request_scope_emits_exactly_once() {
        let invalidator = invalidator_with(Arc::new(RecordingDriver::default()), false);

        let mut scope = RequestScope::new();
        assert_eq!(scope.phase(), RequestPhase::Idle);

        scope.begin();
        assert_eq!(scope.phase(), RequestPhase::Collecting);
        scope.add(Tag::element("42").unwrap());
        scope.add_all([Tag::section("7").unwrap()]);

        let headers = scope.emit(&invalidator, "/blog/post-42").await;
        assert!(headers.is_some());
        assert_eq!(scope.phase(), RequestPhase::Emitted);

        assert!(scope.emit(&invalidator, "/blog/post-42").await.is_none());
    }

    #[tokio::test]
    async fn trigger_publishes_and_consumes() {
        let driver = Arc::new(RecordingDriver::default());
        let invalidator = Arc::new(invalidator_with(driver.clone(), false));
        let trigger = Trigger::new(invalidator.clone());

        trigger.element_saved("42", Some("7"), None).await;
        assert!(invalidator.queue().is_empty());
        assert_eq!(driver.calls().len(), 1);

        trigger.mutated(ElementMutation::save("9"), false).await;
        assert_eq!(invalidator.queue().len(), 1);
    }

    #[tokio::test]
    async fn trigger_reorder_purges_only_the_structure_tag() {
        let driver = Arc::new(RecordingDriver::default());
        let invalidator = Arc::new(invalidator_with(driver.clone(), false));
        let trigger = Trigger::new(invalidator);

        trigger.structure_reordered("3").await;
        assert_eq!(driver.calls(), vec![vec!["st3".to_string()]]);
    }
}
