//! Cachemill - an embeddable in-process cache engine
//!
//! Bounded key/value cache with loading through a value source, time based
//! expiry, background refresh and pluggable eviction, safe to share between
//! threads.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{Cache, CacheBuilder, CacheEntry, CacheInfo, ClockPolicy, LruPolicy};
pub use config::{CacheConfig, Tunables};
pub use error::{CacheError, LoadFailure, Result};
