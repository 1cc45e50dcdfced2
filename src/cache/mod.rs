//! Cache Module
//!
//! In-process cache engine with loading through a value source, expiry and
//! background refresh, and pluggable eviction.

mod arena;
mod builder;
mod entry;
mod expire;
mod expiry;
mod integrity;
mod iter;
pub mod policy;
mod source;
mod stats;
mod store;
mod structure;
mod table;
pub mod time;


// Re-export public types
pub use arena::{Arena, EntryId, Node};
pub use builder::CacheBuilder;
pub use entry::{CacheEntry, CachedValue, EntryStatus};
pub use expiry::{ExceptionExpiryCalculator, Expiry, ExpiryCalculator};
pub use integrity::IntegrityState;
pub use iter::Iter;
pub use policy::{ClockPolicy, EvictionPolicy, LruPolicy};
pub use source::ValueSource;
pub use stats::{CacheInfo, CacheStats};
pub use store::Cache;
pub use table::{hash_key, modified_hash};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
