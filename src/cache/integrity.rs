//! Integrity Check Module
//!
//! Collects the outcome of consistency checks over the cache's counters and
//! data structures. Used by tests and diagnostics, never on the hot path.

use std::fmt::Debug;

/// Accumulates failing checks.
#[derive(Debug, Default)]
pub struct IntegrityState {
    checks: usize,
    failing: Vec<String>,
}

impl IntegrityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a boolean check.
    pub fn check(&mut self, name: &str, ok: bool) -> &mut Self {
        self.checks += 1;
        if !ok {
            self.failing.push(name.to_string());
        }
        self
    }

    /// Records an equality check, reporting both sides on failure.
    pub fn check_equals<T: PartialEq + Debug>(&mut self, name: &str, left: T, right: T) -> &mut Self {
        self.checks += 1;
        if left != right {
            self.failing.push(format!("{}: {:?} != {:?}", name, left, right));
        }
        self
    }

    /// Records failures found by a sub-check, e.g. the eviction policy.
    pub fn extend(&mut self, group: &str, failures: Vec<String>) -> &mut Self {
        self.checks += 1;
        self.failing
            .extend(failures.into_iter().map(|f| format!("{}: {}", group, f)));
        self
    }

    pub fn checks(&self) -> usize {
        self.checks
    }

    pub fn is_ok(&self) -> bool {
        self.failing.is_empty()
    }

    pub fn into_failing(self) -> Vec<String> {
        self.failing
    }
}
