//! Test ordering for validation runs: failing tests first, then fastest.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::discovery::TestUnit;

/// Orders tests so a validation run fails as early and cheaply as possible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestComparator {
    timing: HashMap<String, u64>,
    failing: BTreeSet<String>,
}

impl TestComparator {
    pub fn new(timing: HashMap<String, u64>, failing: BTreeSet<String>) -> Self {
        Self { timing, failing }
    }

    pub fn timing(&self) -> &HashMap<String, u64> {
        &self.timing
    }

    pub fn failing(&self) -> &BTreeSet<String> {
        &self.failing
    }

    /// Historical time of `test`, `u64::MAX` when unmeasured.
    fn time_of(&self, test: &str) -> u64 {
        match self.timing.get(test) {
            Some(&ms) => ms,
            None => {
                warn!(test, "Missing time measurement; u64::MAX is being used");
                u64::MAX
            }
        }
    }

    /// Stable sort: failing tests first, then ascending historical time.
    pub fn sort(&self, units: &mut [TestUnit]) {
        units.sort_by_cached_key(|unit| {
            let name = unit.name();
            (!self.failing.contains(&name), self.time_of(&name))
        });
    }
}
