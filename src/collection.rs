//! Request-scoped tag accumulation.
//!
//! A [`TagCollection`] is created at the start of a request/response cycle,
//! filled additively by any code that renders content into the response, read
//! once at emission time, and discarded. The task-local [`record`] /
//! [`with_collection`] pair lets deeply nested render code declare
//! dependencies without threading the collection through every signature.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::lock::mutex_lock;
use crate::tags::Tag;

const SOURCE: &str = "scopa::collection";

/// Deduplicating, request-scoped accumulator of cache tags.
///
/// `add` is safe under concurrent calls from fragment renderers running on
/// separate tasks within the same request scope.
#[derive(Debug, Default)]
pub struct TagCollection {
    tags: Mutex<HashSet<Tag>>,
}

impl TagCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent insert; a duplicate canonical string is a no-op.
    pub fn add(&self, tag: Tag) {
        mutex_lock(&self.tags, SOURCE, "add").insert(tag);
    }

    pub fn add_all(&self, tags: impl IntoIterator<Item = Tag>) {
        let mut guard = mutex_lock(&self.tags, SOURCE, "add_all");
        guard.extend(tags);
    }

    /// Unordered snapshot of the accumulated tags.
    pub fn all(&self) -> HashSet<Tag> {
        mutex_lock(&self.tags, SOURCE, "all").clone()
    }

    pub fn clear(&self) {
        mutex_lock(&self.tags, SOURCE, "clear").clear();
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.tags, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

tokio::task_local! {
    static ACTIVE: Arc<TagCollection>;
}

/// Record a tag into the active request's collection.
///
/// If no collection scope is active (background work, tests without a
/// request), the call is silently ignored.
pub fn record(tag: Tag) {
    let _ = ACTIVE.try_with(|collection| collection.add(tag));
}

/// Record several tags into the active request's collection.
pub fn record_all(tags: impl IntoIterator<Item = Tag>) {
    let _ = ACTIVE.try_with(|collection| collection.add_all(tags));
}

/// Run an async block with a fresh tag collection scoped to the current task.
///
/// Returns the block's result together with the tags recorded while it ran.
pub async fn with_collection<F, R>(f: F) -> (R, HashSet<Tag>)
where
    F: std::future::Future<Output = R>,
{
    let collection = Arc::new(TagCollection::new());
    let result = ACTIVE.scope(collection.clone(), f).await;
    let tags = collection.all();
    (result, tags)
}
