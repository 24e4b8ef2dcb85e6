//! Scopa: tag-based cache invalidation for reverse proxies and CDNs.
//!
//! Every cacheable response declares the content it depends on as a set of
//! cache tags, emitted in a response header the caching proxy indexes. When
//! content changes, the mutation is mapped back to the same tags and a purge
//! request is dispatched to the configured backend, invalidating exactly the
//! pages that rendered that content.
//!
//! Backends that cannot purge by tag natively are covered by fallback mode:
//! a local tag-to-URL index records which URLs declared which tags at render
//! time, and purges resolve tags to URLs through it.
//!
//! ## Configuration
//!
//! Behavior is controlled via `scopa.toml` (or `SCOPA__`-prefixed
//! environment variables):
//!
//! ```toml
//! [purge]
//! active_driver = "varnish"
//! fallback_local_index = false
//! key_prefix = ""
//!
//! [purge.drivers.varnish]
//! kind = "http"
//! endpoint = "http://127.0.0.1:6081"
//! tag_header = "xkey-purge"
//! batch = true
//! # ... see config.rs for all options
//! ```

pub mod collection;
pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod headers;
pub mod index;
mod lock;
pub mod mapper;
pub mod middleware;
pub mod orchestrator;
pub mod tags;
pub mod telemetry;

pub use collection::{TagCollection, record, record_all, with_collection};
pub use config::{DriverKind, DriverSettings, PurgeSettings, Settings};
pub use drivers::{
    HttpDriver, LocalIndexDriver, NoopDriver, PurgeDriver, PurgeFailure, PurgeOutcome,
    PurgeSubject, build_driver,
};
pub use error::{DriverError, IndexError, PurgeCallError, TagError};
pub use events::{Epoch, EventQueue, MutationEvent};
pub use headers::{CacheStatus, HeaderPolicy};
pub use index::{MemoryTagIndex, PgTagIndex, TagIndex};
pub use mapper::{ElementMutation, Operation, PurgePlan, map_mutation};
pub use middleware::{PurgeState, tag_collection_layer};
pub use orchestrator::{Invalidator, RequestPhase, RequestScope, Trigger};
pub use tags::{Tag, TagPrefix};
