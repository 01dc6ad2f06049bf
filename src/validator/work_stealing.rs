//! Fork-join patch validation over a rayon pool.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{info, warn};

use super::{run_validator, ValidationContext, ValidationOutcome};
use crate::patch::Patch;
use crate::process::WorkerLauncher;
use crate::timing::start_timer;

/// Produces the verdict for one patch.
pub trait ValidationBackend: Sync {
    fn validate(&self, patch: &Patch) -> ValidationOutcome;
}

/// Validates each patch in its own worker process.
pub struct ProcessBackend<L> {
    launcher: L,
    context: ValidationContext,
}

impl<L: WorkerLauncher> ProcessBackend<L> {
    pub fn new(launcher: L, context: ValidationContext) -> Self {
        Self { launcher, context }
    }
}

impl<L: WorkerLauncher> ValidationBackend for ProcessBackend<L> {
    fn validate(&self, patch: &Patch) -> ValidationOutcome {
        run_validator(&self.launcher, &self.context, patch)
    }
}

/// Worker count for a requested degree: `<= 0` means every core, anything
/// else is capped at the core count.
pub fn effective_parallelism(requested: i32) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    match usize::try_from(requested) {
        Ok(n) if n > 0 => n.min(cores),
        _ => cores,
    }
}

/// Splits the patch list in halves until one patch remains, validating the
/// leaves on a work-stealing pool.
#[derive(Debug, Default)]
pub struct WorkStealingValidator {
    elapsed: Duration,
    parallelism: usize,
}

impl WorkStealingValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate every patch; the map holds one entry per patch.
    pub fn run<B: ValidationBackend>(
        &mut self,
        backend: &B,
        patches: &[Patch],
        parallelism: i32,
    ) -> Result<HashMap<Patch, ValidationOutcome>, rayon::ThreadPoolBuildError> {
        let threads = effective_parallelism(parallelism);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("prf-validator-{}", i))
            .build()?;
        self.parallelism = pool.current_num_threads();

        info!(patches = patches.len(), parallelism = self.parallelism, "Validating patches");
        let results = Mutex::new(HashMap::with_capacity(patches.len()));
        let timer = start_timer();
        if !patches.is_empty() {
            pool.install(|| split(backend, patches, 0, patches.len() - 1, &results));
        }
        self.elapsed = timer.elapsed();

        let results = results.into_inner().unwrap_or_else(|p| p.into_inner());
        info!(
            validated = results.len(),
            elapsed_ms = self.elapsed.as_millis() as u64,
            "Patch validation finished"
        );
        Ok(results)
    }

    pub fn time_elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn degree_of_parallelism(&self) -> usize {
        self.parallelism
    }
}

fn split<B: ValidationBackend>(
    backend: &B,
    patches: &[Patch],
    low: usize,
    high: usize,
    results: &Mutex<HashMap<Patch, ValidationOutcome>>,
) {
    if low == high {
        let patch = &patches[low];
        let outcome = backend.validate(patch);
        let mut map = results.lock().unwrap_or_else(|p| p.into_inner());
        if map.insert(patch.clone(), outcome).is_some() {
            warn!(patch = %patch.id(), "Patch validated twice");
        }
    } else {
        let mid = low + (high - low) / 2;
        rayon::join(
            || split(backend, patches, low, mid, results),
            || split(backend, patches, mid + 1, high, results),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchLocation;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysPlausible {
        calls: AtomicUsize,
    }

    impl ValidationBackend for AlwaysPlausible {
        fn validate(&self, _patch: &Patch) -> ValidationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ValidationOutcome::Plausible
        }
    }

    /// Plausible only for patches touching `a.Good`.
    struct ByClass;

    impl ValidationBackend for ByClass {
        fn validate(&self, patch: &Patch) -> ValidationOutcome {
            if patch.locations().iter().any(|l| l.class_name() == "a.Good") {
                ValidationOutcome::Plausible
            } else {
                ValidationOutcome::RunError
            }
        }
    }

    fn patches(n: usize) -> Vec<Patch> {
        (0..n)
            .map(|i| {
                Patch::new(vec![PatchLocation::with_class_name(
                    format!("/p{}/A.class", i),
                    "a.A",
                )])
            })
            .collect()
    }

    #[test]
    fn test_effective_parallelism_is_clamped() {
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        assert_eq!(effective_parallelism(0), cores);
        assert_eq!(effective_parallelism(-3), cores);
        assert_eq!(effective_parallelism(1), 1);
        assert_eq!(effective_parallelism(i32::MAX), cores);
    }

    #[test]
    fn test_empty_patch_list() {
        let backend = AlwaysPlausible {
            calls: AtomicUsize::new(0),
        };
        let mut validator = WorkStealingValidator::new();
        let results = validator.run(&backend, &[], 2).unwrap();
        assert!(results.is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_outcomes_follow_backend() {
        let good = Patch::new(vec![PatchLocation::with_class_name("/g/Good.class", "a.Good")]);
        let bad = Patch::new(vec![PatchLocation::with_class_name("/b/Bad.class", "a.Bad")]);
        let mut validator = WorkStealingValidator::new();
        let results = validator.run(&ByClass, &[good.clone(), bad.clone()], 0).unwrap();
        assert_eq!(results[&good], ValidationOutcome::Plausible);
        assert_eq!(results[&bad], ValidationOutcome::RunError);
        assert!(validator.degree_of_parallelism() >= 1);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            /// Property: N always-plausible patches give N plausible entries
            #[test]
            fn prop_every_patch_validated_once(n in 0usize..40, parallelism in -2i32..9) {
                let backend = AlwaysPlausible { calls: AtomicUsize::new(0) };
                let patches = patches(n);
                let mut validator = WorkStealingValidator::new();
                let results = validator.run(&backend, &patches, parallelism).unwrap();
                prop_assert_eq!(results.len(), n);
                prop_assert_eq!(backend.calls.load(Ordering::SeqCst), n);
                prop_assert!(results.values().all(|o| *o == ValidationOutcome::Plausible));
                prop_assert_eq!(validator.degree_of_parallelism(), effective_parallelism(parallelism));
            }
        }
    }
}
