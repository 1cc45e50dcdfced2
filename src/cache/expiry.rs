//! Expiry Module
//!
//! Computes when a freshly loaded value, or a cached load failure, must be
//! loaded again. Custom calculators can shorten lifetimes; the configured
//! maximum lifetime always caps them.

use std::time::Duration;

use crate::cache::time::Timestamp;
use crate::error::LoadFailure;

// == Expiry ==
/// Point in time at which an entry stops being fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Do not keep the value at all; the next access loads again
    Immediately,
    /// Never expires
    Eternal,
    /// Expires at the timestamp
    At(Timestamp),
    /// Expires at the timestamp and is never served afterwards, even if the
    /// timer fires late
    SharpAt(Timestamp),
}

impl Expiry {
    /// Expiry `lifetime` after `now`; `None` lifetime means eternal.
    pub fn after(now: Timestamp, lifetime: Option<Duration>) -> Self {
        match lifetime {
            None => Expiry::Eternal,
            Some(d) if d.is_zero() => Expiry::Immediately,
            Some(d) => Expiry::At(now.saturating_add(d.as_millis() as u64)),
        }
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        match *self {
            Expiry::At(t) | Expiry::SharpAt(t) => Some(t),
            _ => None,
        }
    }

    /// Caps a finite expiry at `now + max`, keeping the sharp flag. An
    /// eternal expiry requested by a calculator stays eternal.
    pub fn limit_to(self, now: Timestamp, max: Option<Duration>) -> Self {
        let max = match max {
            None => return self,
            Some(d) if d.is_zero() => return Expiry::Immediately,
            Some(d) => now.saturating_add(d.as_millis() as u64),
        };
        match self {
            Expiry::At(t) if t > max => Expiry::At(max),
            Expiry::SharpAt(t) if t > max => Expiry::SharpAt(max),
            other => other,
        }
    }
}

// == Calculator Traits ==
/// Decides the expiry of a successfully loaded or put value.
pub trait ExpiryCalculator<K, V>: Send + Sync + 'static {
    /// `previous` is the value being replaced, if the entry held one.
    fn calculate(&self, key: &K, value: &V, now: Timestamp, previous: Option<&V>) -> Expiry;
}

impl<K, V, F> ExpiryCalculator<K, V> for F
where
    F: Fn(&K, &V, Timestamp, Option<&V>) -> Expiry + Send + Sync + 'static,
{
    fn calculate(&self, key: &K, value: &V, now: Timestamp, previous: Option<&V>) -> Expiry {
        self(key, value, now, previous)
    }
}

/// Decides how long a load failure stays cached.
pub trait ExceptionExpiryCalculator<K>: Send + Sync + 'static {
    fn calculate(&self, key: &K, failure: &LoadFailure, now: Timestamp) -> Expiry;
}

impl<K, F> ExceptionExpiryCalculator<K> for F
where
    F: Fn(&K, &LoadFailure, Timestamp) -> Expiry + Send + Sync + 'static,
{
    fn calculate(&self, key: &K, failure: &LoadFailure, now: Timestamp) -> Expiry {
        self(key, failure, now)
    }
}

// == Expiry Policy ==
/// Configured lifetimes plus the optional calculators.
pub(crate) struct ExpiryPolicy<K, V> {
    max_lifetime: Option<Duration>,
    exception_max_lifetime: Option<Duration>,
    sharp: bool,
    calculator: Option<Box<dyn ExpiryCalculator<K, V>>>,
    exception_calculator: Option<Box<dyn ExceptionExpiryCalculator<K>>>,
}

impl<K: 'static, V: 'static> ExpiryPolicy<K, V> {
    pub(crate) fn new(
        max_lifetime: Option<Duration>,
        exception_max_lifetime: Option<Duration>,
        sharp: bool,
        calculator: Option<Box<dyn ExpiryCalculator<K, V>>>,
        exception_calculator: Option<Box<dyn ExceptionExpiryCalculator<K>>>,
    ) -> Self {
        Self {
            max_lifetime,
            exception_max_lifetime,
            sharp,
            calculator,
            exception_calculator,
        }
    }

    /// Expiry of a loaded or put value.
    pub(crate) fn for_value(&self, key: &K, value: &V, now: Timestamp, previous: Option<&V>) -> Expiry {
        let expiry = match &self.calculator {
            Some(_) if self.max_lifetime == Some(Duration::ZERO) => Expiry::Immediately,
            Some(calc) => calc
                .calculate(key, value, now, previous)
                .limit_to(now, self.max_lifetime),
            None => Expiry::after(now, self.max_lifetime),
        };
        self.sharpen(expiry)
    }

    /// Expiry of a cached load failure.
    pub(crate) fn for_failure(&self, key: &K, failure: &LoadFailure, now: Timestamp) -> Expiry {
        let expiry = match &self.exception_calculator {
            Some(_) if self.exception_max_lifetime == Some(Duration::ZERO) => Expiry::Immediately,
            Some(calc) => calc
                .calculate(key, failure, now)
                .limit_to(now, self.exception_max_lifetime),
            None => Expiry::after(now, self.exception_max_lifetime),
        };
        self.sharpen(expiry)
    }

    /// Whether any computed expiry can be finite, i.e. timers may be needed.
    pub(crate) fn may_expire(&self) -> bool {
        self.max_lifetime.is_some()
            || self.exception_max_lifetime.is_some()
            || self.calculator.is_some()
            || self.exception_calculator.is_some()
    }

    /// Whether values can live long enough for a background refresh.
    pub(crate) fn refreshable(&self) -> bool {
        match self.max_lifetime {
            Some(d) => !d.is_zero(),
            None => self.calculator.is_some(),
        }
    }

    fn sharpen(&self, expiry: Expiry) -> Expiry {
        match expiry {
            Expiry::At(t) if self.sharp => Expiry::SharpAt(t),
            other => other,
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Option<Duration> {
        Some(Duration::from_secs(s))
    }

    fn policy(max: Option<Duration>, sharp: bool) -> ExpiryPolicy<String, u32> {
        ExpiryPolicy::new(max, max.map(|d| d / 10), sharp, None, None)
    }

    #[test]
    fn test_fixed_lifetime() {
        let p = policy(secs(10), false);
        assert_eq!(
            p.for_value(&"k".to_string(), &1, 1_000, None),
            Expiry::At(11_000)
        );
        let failure = LoadFailure::new(anyhow::anyhow!("x"));
        assert_eq!(
            p.for_failure(&"k".to_string(), &failure, 1_000),
            Expiry::At(2_000)
        );
    }

    #[test]
    fn test_eternal_and_zero() {
        assert_eq!(
            policy(None, false).for_value(&"k".to_string(), &1, 5, None),
            Expiry::Eternal
        );
        assert_eq!(
            policy(Some(Duration::ZERO), false).for_value(&"k".to_string(), &1, 5, None),
            Expiry::Immediately
        );
    }

    #[test]
    fn test_sharp_flag_applies() {
        let p = policy(secs(1), true);
        assert_eq!(
            p.for_value(&"k".to_string(), &1, 0, None),
            Expiry::SharpAt(1_000)
        );
    }

    #[test]
    fn test_calculator_is_capped_by_max_lifetime() {
        let calc = |_: &String, v: &u32, now: Timestamp, _: Option<&u32>| {
            Expiry::At(now + *v as u64)
        };
        let p: ExpiryPolicy<String, u32> =
            ExpiryPolicy::new(secs(10), None, false, Some(Box::new(calc)), None);
        let key = "k".to_string();
        assert_eq!(p.for_value(&key, &500, 0, None), Expiry::At(500));
        assert_eq!(p.for_value(&key, &50_000, 0, None), Expiry::At(10_000));
    }

    #[test]
    fn test_calculator_can_request_sharp_and_eternal_is_kept() {
        let calc = |_: &String, v: &u32, _: Timestamp, _: Option<&u32>| match v {
            0 => Expiry::Eternal,
            _ => Expiry::SharpAt(*v as u64),
        };
        let p: ExpiryPolicy<String, u32> =
            ExpiryPolicy::new(secs(1), None, false, Some(Box::new(calc)), None);
        let key = "k".to_string();
        assert_eq!(p.for_value(&key, &0, 0, None), Expiry::Eternal);
        assert_eq!(p.for_value(&key, &9_999, 0, None), Expiry::SharpAt(1_000));
        assert_eq!(p.for_value(&key, &10, 0, None), Expiry::SharpAt(10));
    }

    #[test]
    fn test_calculator_sees_previous_value() {
        let calc = |_: &String, _: &u32, now: Timestamp, prev: Option<&u32>| match prev {
            Some(_) => Expiry::At(now + 1),
            None => Expiry::Eternal,
        };
        let p: ExpiryPolicy<String, u32> =
            ExpiryPolicy::new(None, None, false, Some(Box::new(calc)), None);
        let key = "k".to_string();
        assert_eq!(p.for_value(&key, &1, 0, None), Expiry::Eternal);
        assert_eq!(p.for_value(&key, &1, 0, Some(&7)), Expiry::At(1));
    }

    #[test]
    fn test_may_expire() {
        assert!(policy(secs(1), false).may_expire());
        assert!(!ExpiryPolicy::<String, u32>::new(None, None, false, None, None).may_expire());
        assert!(!policy(Some(Duration::ZERO), false).refreshable());
    }
}
