//! Spectrum-based suspiciousness scoring.
//!
//! For an entity, `ef`/`ep` count the failing/passing tests that cover it
//! and `nf`/`np` the failing/passing tests that do not.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::coverage::{CoverageInfo, FaultLocalizationInfo, ProgramElement};

/// SBFL formula used to turn spectra into scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlStrategy {
    /// Cosine similarity of coverage and failure vectors.
    #[default]
    Ochiai,
    /// Classic failure-ratio formula.
    Tarantula,
}

impl FlStrategy {
    /// Score one spectrum. Every degenerate denominator yields 0.
    pub fn compute_susp(self, ef: u64, ep: u64, nf: u64, np: u64) -> f64 {
        let (ef, ep, nf, np) = (ef as f64, ep as f64, nf as f64, np as f64);
        match self {
            Self::Ochiai => {
                let denom = ((ef + ep) * (ef + nf)).sqrt();
                if denom > 0.0 {
                    ef / denom
                } else {
                    0.0
                }
            }
            Self::Tarantula => {
                let fail_ratio = if ef + nf > 0.0 { ef / (ef + nf) } else { 0.0 };
                let pass_ratio = if ep + np > 0.0 { ep / (ep + np) } else { 0.0 };
                if fail_ratio + pass_ratio > 0.0 {
                    fail_ratio / (fail_ratio + pass_ratio)
                } else {
                    0.0
                }
            }
        }
    }
}

impl fmt::Display for FlStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ochiai => write!(f, "ochiai"),
            Self::Tarantula => write!(f, "tarantula"),
        }
    }
}

impl FromStr for FlStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ochiai" => Ok(Self::Ochiai),
            "tarantula" => Ok(Self::Tarantula),
            other => Err(format!("unknown FL strategy '{}'", other)),
        }
    }
}

/// Per-entity counts of covering tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Spectrum {
    ef: u64,
    ep: u64,
}

/// Score every entity covered by at least one test.
///
/// `failing` is the full failing set; tests in it that were never profiled
/// still count toward `nf`. Every profiled test not in `failing` passes.
pub fn localize<E: ProgramElement>(
    coverage: &CoverageInfo<E>,
    failing: &BTreeSet<String>,
    strategy: FlStrategy,
) -> FaultLocalizationInfo<E> {
    let mut spectra: BTreeMap<E, Spectrum> = BTreeMap::new();
    let mut total_passing = 0u64;

    for (test, covered) in coverage.iter() {
        let failed = failing.contains(test);
        if !failed {
            total_passing += 1;
        }
        for element in covered {
            let spectrum = spectra.entry(element.clone()).or_default();
            if failed {
                spectrum.ef += 1;
            } else {
                spectrum.ep += 1;
            }
        }
    }

    let total_failing = failing.len() as u64;
    let scores = spectra
        .into_iter()
        .map(|(element, s)| {
            let nf = total_failing.saturating_sub(s.ef);
            let np = total_passing.saturating_sub(s.ep);
            (element, strategy.compute_susp(s.ef, s.ep, nf, np))
        })
        .collect();
    FaultLocalizationInfo::new(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::ClassName;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_reference_spectrum_values() {
        assert!(close(FlStrategy::Ochiai.compute_susp(2, 1, 1, 3), 0.6667));
        assert!(close(FlStrategy::Tarantula.compute_susp(2, 1, 1, 3), 0.7273));
    }

    #[test]
    fn test_degenerate_spectra_score_zero() {
        assert_eq!(FlStrategy::Ochiai.compute_susp(0, 3, 2, 1), 0.0);
        assert_eq!(FlStrategy::Ochiai.compute_susp(0, 0, 0, 0), 0.0);
        assert_eq!(FlStrategy::Tarantula.compute_susp(0, 0, 0, 0), 0.0);
        assert_eq!(FlStrategy::Tarantula.compute_susp(0, 0, 4, 2), 0.0);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("OCHIAI".parse::<FlStrategy>(), Ok(FlStrategy::Ochiai));
        assert_eq!("tarantula".parse::<FlStrategy>(), Ok(FlStrategy::Tarantula));
        assert!("dstar".parse::<FlStrategy>().is_err());
    }

    #[test]
    fn test_localize_counts_spectra() {
        let a = ClassName("A".into());
        let b = ClassName("B".into());
        let mut per_test = BTreeMap::new();
        per_test.insert("F1".to_string(), BTreeSet::from([a.clone()]));
        per_test.insert("F2".to_string(), BTreeSet::from([a.clone()]));
        per_test.insert("P1".to_string(), BTreeSet::from([a.clone(), b.clone()]));
        per_test.insert("P2".to_string(), BTreeSet::new());
        per_test.insert("P3".to_string(), BTreeSet::new());
        per_test.insert("P4".to_string(), BTreeSet::new());
        let coverage = CoverageInfo::new(per_test);
        // F3 failed but never produced coverage: it still counts toward nf.
        let failing: BTreeSet<String> = ["F1", "F2", "F3"].iter().map(|s| s.to_string()).collect();

        let fl = localize(&coverage, &failing, FlStrategy::Ochiai);
        // A: ef=2 ep=1 nf=1 np=3
        assert!(close(fl.score(&a).unwrap(), 0.6667));
        // B: ef=0
        assert_eq!(fl.score(&b), Some(0.0));
        assert_eq!(fl.len(), 2);
    }

    #[test]
    fn test_uncovered_entities_are_omitted() {
        let coverage: CoverageInfo<ClassName> = CoverageInfo::default();
        let fl = localize(&coverage, &BTreeSet::new(), FlStrategy::Tarantula);
        assert!(fl.is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(128))]

            /// Property: scores stay within [0, 1]
            #[test]
            fn prop_scores_are_bounded(ef in 0u64..50, ep in 0u64..50, nf in 0u64..50, np in 0u64..50) {
                for strategy in [FlStrategy::Ochiai, FlStrategy::Tarantula] {
                    let s = strategy.compute_susp(ef, ep, nf, np);
                    prop_assert!((0.0..=1.0 + 1e-9).contains(&s), "{} gave {}", strategy, s);
                }
            }
        }
    }
}
