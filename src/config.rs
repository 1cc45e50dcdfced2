//! Configuration Module
//!
//! Handles loading and validating cache configuration, either built in code or
//! read from environment variables.

use std::env;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Engine constants that are rarely changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunables {
    /// Upper bound on lookup/lock retries before failing with
    /// [`CacheError::LockSpinsExceeded`]
    pub max_entry_lock_spins: u32,
    /// Maximum number of candidates examined per eviction pass
    pub max_evict_spins: u32,
    /// Bucket count of a fresh hash table, must be a power of two
    pub initial_hash_size: usize,
    /// Fill percentage at which a hash table doubles
    pub hash_load_percent: usize,
    /// Fixed hash seed; `None` picks a random seed per cache
    pub hash_seed: Option<u64>,
    /// How far ahead of the deadline a sharp expiry timer fires
    pub sharp_expiry_safety_gap: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_entry_lock_spins: 333_333,
            max_evict_spins: 5,
            initial_hash_size: 64,
            hash_load_percent: 64,
            hash_seed: None,
            sharp_expiry_safety_gap: Duration::from_millis(666),
        }
    }
}

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Cache name used in logs and errors; generated if not set
    pub name: Option<String>,
    /// Maximum number of entries the cache holds once eviction has run
    pub max_size: usize,
    /// Lifetime of a loaded value. `None` = eternal, zero = never cached
    pub expiry: Option<Duration>,
    /// Lifetime of a cached load failure. `None` derives it from `expiry`
    pub exception_expiry: Option<Duration>,
    /// Keep expired entries in the table instead of removing them
    pub keep_after_expire: bool,
    /// Never serve a value past its deadline, regardless of timer latency
    pub sharp_expiry: bool,
    /// Hide a load failure while a previous good value exists
    pub suppress_exceptions: bool,
    /// Worker count of the background refresh pool, zero disables refresh
    pub refresh_threads: usize,
    /// Engine constants
    pub tunables: Tunables,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_size: 5000,
            expiry: Some(Duration::from_secs(600)),
            exception_expiry: None,
            keep_after_expire: false,
            sharp_expiry: false,
            suppress_exceptions: false,
            refresh_threads: 0,
            tunables: Tunables::default(),
        }
    }
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAME` - Cache name (default: generated)
    /// - `CACHE_MAX_SIZE` - Maximum entries (default: 5000)
    /// - `CACHE_EXPIRY_MILLIS` - Value lifetime, negative = eternal (default: 600000)
    /// - `CACHE_EXCEPTION_EXPIRY_MILLIS` - Failure lifetime (default: derived)
    /// - `CACHE_KEEP_AFTER_EXPIRE` - Keep expired entries (default: false)
    /// - `CACHE_SHARP_EXPIRY` - Sharp expiry (default: false)
    /// - `CACHE_SUPPRESS_EXCEPTIONS` - Suppress failures (default: false)
    /// - `CACHE_REFRESH_THREADS` - Refresh pool size (default: 0)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            name: env::var("CACHE_NAME").ok().filter(|v| !v.is_empty()),
            max_size: parse_var("CACHE_MAX_SIZE").unwrap_or(defaults.max_size),
            expiry: match parse_var::<i64>("CACHE_EXPIRY_MILLIS") {
                Some(ms) if ms < 0 => None,
                Some(ms) => Some(Duration::from_millis(ms as u64)),
                None => defaults.expiry,
            },
            exception_expiry: parse_var::<u64>("CACHE_EXCEPTION_EXPIRY_MILLIS")
                .map(Duration::from_millis),
            keep_after_expire: parse_var("CACHE_KEEP_AFTER_EXPIRE")
                .unwrap_or(defaults.keep_after_expire),
            sharp_expiry: parse_var("CACHE_SHARP_EXPIRY").unwrap_or(defaults.sharp_expiry),
            suppress_exceptions: parse_var("CACHE_SUPPRESS_EXCEPTIONS")
                .unwrap_or(defaults.suppress_exceptions),
            refresh_threads: parse_var("CACHE_REFRESH_THREADS")
                .unwrap_or(defaults.refresh_threads),
            tunables: defaults.tunables,
        }
    }

    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CacheError::Configuration(
                "max_size must be greater than 0".to_string(),
            ));
        }
        let tunables = &self.tunables;
        if !tunables.initial_hash_size.is_power_of_two() {
            return Err(CacheError::Configuration(format!(
                "initial_hash_size must be a power of two, got {}",
                tunables.initial_hash_size
            )));
        }
        if tunables.hash_load_percent == 0 || tunables.hash_load_percent > 100 {
            return Err(CacheError::Configuration(format!(
                "hash_load_percent must be within 1..=100, got {}",
                tunables.hash_load_percent
            )));
        }
        if tunables.max_entry_lock_spins == 0 {
            return Err(CacheError::Configuration(
                "max_entry_lock_spins must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Lifetime applied to cached load failures.
    ///
    /// Unless configured explicitly this is a tenth of the value lifetime, or
    /// eternal when values are eternal.
    pub fn effective_exception_expiry(&self) -> Option<Duration> {
        match self.exception_expiry {
            Some(expiry) => Some(expiry),
            None => self.expiry.map(|expiry| expiry / 10),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.max_size, 5000);
        assert_eq!(config.expiry, Some(Duration::from_secs(600)));
        assert_eq!(config.refresh_threads, 0);
        assert!(!config.sharp_expiry);
        assert_eq!(config.tunables.max_evict_spins, 5);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("CACHE_NAME");
        env::remove_var("CACHE_MAX_SIZE");
        env::remove_var("CACHE_EXPIRY_MILLIS");
        env::remove_var("CACHE_EXCEPTION_EXPIRY_MILLIS");
        env::remove_var("CACHE_REFRESH_THREADS");

        let config = CacheConfig::from_env();
        assert_eq!(config.name, None);
        assert_eq!(config.max_size, 5000);
        assert_eq!(config.expiry, Some(Duration::from_secs(600)));
        assert_eq!(config.exception_expiry, None);
        assert_eq!(config.refresh_threads, 0);
    }

    #[test]
    fn test_exception_expiry_derived_from_expiry() {
        let config = CacheConfig {
            expiry: Some(Duration::from_secs(100)),
            ..CacheConfig::default()
        };
        assert_eq!(
            config.effective_exception_expiry(),
            Some(Duration::from_secs(10))
        );

        let eternal = CacheConfig {
            expiry: None,
            ..CacheConfig::default()
        };
        assert_eq!(eternal.effective_exception_expiry(), None);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = CacheConfig {
            max_size: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_odd_hash_size() {
        let mut config = CacheConfig::default();
        config.tunables.initial_hash_size = 100;
        assert!(config.validate().is_err());
        config.tunables.initial_hash_size = 128;
        assert!(config.validate().is_ok());
    }
}
