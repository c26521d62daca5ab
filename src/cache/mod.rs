//! Time-bounded artifact cache.
//!
//! Rendered PDFs are kept on disk, one file per cache key:
//!
//! ```text
//! <cache.directory>/<document id><variant suffixes>.pdf
//! ```
//!
//! Entries stay servable for `cache.ttl_seconds` after they were written
//! (15 minutes by default) and are replaced by the next render afterwards.

mod clock;
mod keys;
mod store;

pub use clock::{Clock, SystemClock};
pub use keys::CacheKey;
pub use store::{CacheEntry, CacheError, CacheStore, DiskCacheStore, Lookup, is_fresh};
