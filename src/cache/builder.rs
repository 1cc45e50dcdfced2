//! Cache Builder Module
//!
//! Fluent construction of a [`Cache`]. The builder is consumed by `build`,
//! so a running cache cannot be reconfigured.

use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::cache::expiry::{ExceptionExpiryCalculator, ExpiryCalculator, ExpiryPolicy};
use crate::cache::policy::{EvictionPolicy, LruPolicy};
use crate::cache::source::ValueSource;
use crate::cache::store::{Cache, CacheCore};
use crate::cache::structure::Structure;
use crate::cache::time::{Clock, SystemClock};
use crate::config::{CacheConfig, Tunables};
use crate::error::{CacheError, Result};
use crate::tasks::Background;

/// Builder for [`Cache`].
///
/// # Example
/// ```
/// use std::time::Duration;
/// use cachemill::CacheBuilder;
///
/// let cache = CacheBuilder::<u32, String>::new()
///     .name("squares")
///     .max_size(100)
///     .expiry(Duration::from_secs(60))
///     .source(|key: &u32| -> anyhow::Result<String> { Ok((key * key).to_string()) })
///     .build()
///     .unwrap();
/// assert_eq!(cache.get(&3).unwrap(), "9");
/// cache.close();
/// ```
pub struct CacheBuilder<K, V, P: EvictionPolicy = LruPolicy> {
    config: CacheConfig,
    policy: P,
    source: Option<Box<dyn ValueSource<K, V>>>,
    calculator: Option<Box<dyn ExpiryCalculator<K, V>>>,
    exception_calculator: Option<Box<dyn ExceptionExpiryCalculator<K>>>,
    clock: Arc<dyn Clock>,
    _types: PhantomData<fn(K) -> V>,
}

impl<K, V> CacheBuilder<K, V, LruPolicy> {
    /// Builder with default configuration and LRU eviction.
    pub fn new() -> Self {
        Self::from_config(CacheConfig::default())
    }

    /// Builder starting from an existing configuration, e.g.
    /// [`CacheConfig::from_env`].
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            policy: LruPolicy::new(),
            source: None,
            calculator: None,
            exception_calculator: None,
            clock: Arc::new(SystemClock),
            _types: PhantomData,
        }
    }
}

impl<K, V> Default for CacheBuilder<K, V, LruPolicy> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, P: EvictionPolicy> CacheBuilder<K, V, P> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = max_size;
        self
    }

    /// Lifetime of loaded values. Zero disables caching of values.
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.config.expiry = Some(expiry);
        self
    }

    /// Values never expire.
    pub fn eternal(mut self) -> Self {
        self.config.expiry = None;
        self
    }

    /// Lifetime of cached load failures.
    pub fn exception_expiry(mut self, expiry: Duration) -> Self {
        self.config.exception_expiry = Some(expiry);
        self
    }

    pub fn keep_after_expire(mut self, keep: bool) -> Self {
        self.config.keep_after_expire = keep;
        self
    }

    pub fn sharp_expiry(mut self, sharp: bool) -> Self {
        self.config.sharp_expiry = sharp;
        self
    }

    pub fn suppress_exceptions(mut self, suppress: bool) -> Self {
        self.config.suppress_exceptions = suppress;
        self
    }

    /// Refreshes entries in the background on expiry, with up to `threads`
    /// concurrent reloads.
    pub fn refresh_threads(mut self, threads: usize) -> Self {
        self.config.refresh_threads = threads;
        self
    }

    pub fn tunables(mut self, tunables: Tunables) -> Self {
        self.config.tunables = tunables;
        self
    }

    pub fn hash_seed(mut self, seed: u64) -> Self {
        self.config.tunables.hash_seed = Some(seed);
        self
    }

    /// Switches the eviction policy.
    pub fn policy<Q: EvictionPolicy>(self, policy: Q) -> CacheBuilder<K, V, Q> {
        CacheBuilder {
            config: self.config,
            policy,
            source: self.source,
            calculator: self.calculator,
            exception_calculator: self.exception_calculator,
            clock: self.clock,
            _types: PhantomData,
        }
    }

    pub fn source(mut self, source: impl ValueSource<K, V>) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn expiry_calculator(mut self, calculator: impl ExpiryCalculator<K, V>) -> Self {
        self.calculator = Some(Box::new(calculator));
        self
    }

    pub fn exception_expiry_calculator(
        mut self,
        calculator: impl ExceptionExpiryCalculator<K>,
    ) -> Self {
        self.exception_calculator = Some(Box::new(calculator));
        self
    }

    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

impl<K, V, P> CacheBuilder<K, V, P>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: EvictionPolicy,
{
    // == Build ==
    /// Validates the configuration and starts the cache.
    pub fn build(self) -> Result<Cache<K, V, P>> {
        let mut config = self.config;
        config.validate()?;
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("cache-{:08x}", rand::random::<u32>()));

        if config.refresh_threads > 0 && self.source.is_none() {
            return Err(CacheError::Configuration(format!(
                "cache '{}': background refresh needs a value source",
                name
            )));
        }
        let expiry = ExpiryPolicy::new(
            config.expiry,
            config.effective_exception_expiry(),
            config.sharp_expiry,
            self.calculator,
            self.exception_calculator,
        );
        if config.refresh_threads > 0 && !expiry.refreshable() {
            warn!(
                cache = %name,
                "Background refresh disabled, values never expire or are never cached"
            );
            config.refresh_threads = 0;
        }

        let background = if expiry.may_expire() || config.refresh_threads > 0 {
            Some(Background::start(&name, config.refresh_threads)?)
        } else {
            None
        };
        let seed = config.tunables.hash_seed.unwrap_or_else(rand::random);
        let serves_expired = config.refresh_threads > 0 && !config.sharp_expiry;
        let structure = Structure::new(self.policy, config.max_size, &config.tunables);

        info!(
            cache = %name,
            policy = structure.policy().name(),
            max_size = config.max_size,
            expiry = ?config.expiry,
            refresh_threads = config.refresh_threads,
            "Cache built"
        );

        let core = Arc::new_cyclic(|weak| CacheCore {
            name,
            config,
            clock: self.clock,
            source: self.source,
            expiry,
            seed,
            structure: RwLock::new(structure),
            closed: AtomicBool::new(false),
            gets: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            fetches_in_flight: AtomicUsize::new(0),
            background,
            serves_expired,
            weak: weak.clone(),
        });
        Ok(Cache { core })
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::policy::ClockPolicy;

    fn source(key: &u32) -> anyhow::Result<u32> {
        Ok(key + 1)
    }

    #[test]
    fn test_build_defaults() {
        let cache = CacheBuilder::<u32, u32>::new()
            .name("defaults")
            .source(source)
            .build()
            .unwrap();
        assert_eq!(cache.name(), "defaults");
        let info = cache.info();
        assert_eq!(info.max_size, 5000);
        assert_eq!(info.implementation, "lru");
        cache.close();
    }

    #[test]
    fn test_generated_name() {
        let cache = CacheBuilder::<u32, u32>::new().eternal().build().unwrap();
        assert!(cache.name().starts_with("cache-"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = CacheBuilder::<u32, u32>::new().max_size(0).build();
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_refresh_without_source_rejected() {
        let result = CacheBuilder::<u32, u32>::new().refresh_threads(2).build();
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_refresh_disabled_for_eternal_values() {
        let cache = CacheBuilder::<u32, u32>::new()
            .eternal()
            .refresh_threads(2)
            .source(source)
            .build()
            .unwrap();
        assert_eq!(cache.core.config.refresh_threads, 0);
        assert!(cache.core.background.is_none());
        assert!(!cache.core.serves_expired);
    }

    #[test]
    fn test_policy_switch() {
        let cache = CacheBuilder::<u32, u32>::new()
            .policy(ClockPolicy::new())
            .source(source)
            .build()
            .unwrap();
        assert_eq!(cache.info().implementation, "clock");
        assert_eq!(cache.get(&1).unwrap(), 2);
        cache.close();
    }

    #[test]
    fn test_from_config() {
        let config = CacheConfig {
            name: Some("configured".to_string()),
            max_size: 7,
            ..CacheConfig::default()
        };
        let cache = CacheBuilder::<u32, u32>::from_config(config).build().unwrap();
        assert_eq!(cache.name(), "configured");
        assert_eq!(cache.info().max_size, 7);
        cache.close();
    }
}
