// Library exports for the PRF program repair framework
pub mod ansi_colors;
pub mod collections;
pub mod config;
pub mod coverage;
pub mod domain;
pub mod error;
pub mod filter;
pub mod junit;
pub mod localization;
pub mod patch;
pub mod pipeline;
pub mod plugin;
pub mod process;
pub mod profiler;
pub mod report;
pub mod timing;
pub mod validator;

// Re-export key types for convenience
pub use config::{RepairConfig, RepairConfigBuilder};
pub use coverage::{FlReport, Granularity};
pub use error::PrfError;
pub use localization::FlStrategy;
pub use patch::{Patch, PatchLocation};
pub use pipeline::{RepairOutcome, RepairPipeline};
pub use plugin::{PatchGenerationPlugin, PatchPrioritizationPlugin, PluginRegistry, RepairPlugin};
pub use report::{FixReport, ReportFormat};
pub use validator::ValidationOutcome;
