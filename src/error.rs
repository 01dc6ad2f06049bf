//! Errors that end a repair run.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::plugin::{GenerationFailure, PluginError, PrioritizationFailure};
use crate::process::WireError;

#[derive(Debug, Error)]
pub enum PrfError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No test classes found in {0}; check the test globs")]
    NoTestClasses(PathBuf),

    #[error("Profiling failed: {0}")]
    Profiling(#[from] WireError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Generation(#[from] GenerationFailure),

    #[error(transparent)]
    Prioritization(#[from] PrioritizationFailure),

    #[error("Failed to start validator pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("No plausible patch among {0} candidates")]
    NoPlausiblePatch(usize),
}
