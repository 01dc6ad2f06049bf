/// Fix report for a repair run
use crate::patch::{Patch, PatchId, PatchLocation};
use crate::validator::ValidationOutcome;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

/// Title printed at the top of every text report
pub const REPORT_TITLE: &str = "PRF Fix Report";

/// Counts of validation verdicts for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub candidates: usize,
    pub plausible: usize,
    pub timed_out: usize,
    pub run_error: usize,
    pub memory_error: usize,
    pub elapsed_ms: u64,
    pub parallelism: usize,
}

impl ValidationSummary {
    pub fn from_outcomes(
        outcomes: &HashMap<Patch, ValidationOutcome>,
        elapsed: Duration,
        parallelism: usize,
    ) -> Self {
        let mut summary = Self {
            candidates: outcomes.len(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            parallelism,
            ..Self::default()
        };
        for outcome in outcomes.values() {
            match outcome {
                ValidationOutcome::Plausible => summary.plausible += 1,
                ValidationOutcome::TimedOut => summary.timed_out += 1,
                ValidationOutcome::RunError => summary.run_error += 1,
                ValidationOutcome::MemoryError => summary.memory_error += 1,
            }
        }
        summary
    }
}

/// One patched source file and its diff against the original
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Source file in the project, if it could be located
    pub original: Option<PathBuf>,
    /// Source file shipped with the patch
    pub patched: Option<PathBuf>,
    /// Unified diff from the original to the patched file
    pub diff: Option<String>,
}

/// A plausible patch, in prioritized order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    pub rank: usize,
    pub patch_id: PatchId,
    pub locations: Vec<String>,
    pub files: Vec<FileChange>,
}

/// Fix report data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixReport {
    pub project_name: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub summary: ValidationSummary,
    pub fixes: Vec<Fix>,
}

impl FixReport {
    /// Build a report listing `plausible` in the order given. Patched
    /// sources are diffed against their originals under `source_root`.
    pub fn new(
        project_name: String,
        summary: ValidationSummary,
        plausible: &[Patch],
        source_root: &Path,
    ) -> Self {
        let fixes = plausible
            .iter()
            .enumerate()
            .map(|(i, patch)| Fix {
                rank: i + 1,
                patch_id: patch.id(),
                locations: patch.locations().iter().map(ToString::to_string).collect(),
                files: file_changes(patch, source_root),
            })
            .collect();
        Self {
            project_name,
            timestamp: chrono::Utc::now(),
            summary,
            fixes,
        }
    }

    /// Generate Markdown report
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!("# {}: {}\n\n", REPORT_TITLE, self.project_name));
        md.push_str(&format!(
            "**Generated:** {}\n\n",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        md.push_str("## Summary\n\n");
        md.push_str("| Verdict | Patches |\n");
        md.push_str("|---------|---------|\n");
        md.push_str(&format!("| Candidates | {} |\n", self.summary.candidates));
        md.push_str(&format!("| PLAUSIBLE | {} |\n", self.summary.plausible));
        md.push_str(&format!("| TIMED_OUT | {} |\n", self.summary.timed_out));
        md.push_str(&format!("| RUN_ERROR | {} |\n", self.summary.run_error));
        md.push_str(&format!("| MEMORY_ERROR | {} |\n", self.summary.memory_error));
        md.push('\n');
        md.push_str(&format!(
            "Validated in {} ms with {} workers.\n\n",
            self.summary.elapsed_ms, self.summary.parallelism
        ));

        md.push_str("## Fixes\n\n");
        if self.fixes.is_empty() {
            md.push_str("No plausible patches found.\n");
        }
        for fix in &self.fixes {
            md.push_str(&format!("### {}. Patch {}\n\n", fix.rank, fix.patch_id));
            for location in &fix.locations {
                md.push_str(&format!("- `{}`\n", location));
            }
            md.push('\n');
            for file in &fix.files {
                if let Some(original) = &file.original {
                    md.push_str(&format!("**File:** `{}`\n\n", original.display()));
                }
                if let Some(diff) = &file.diff {
                    md.push_str("```diff\n");
                    md.push_str(diff);
                    if !diff.ends_with('\n') {
                        md.push('\n');
                    }
                    md.push_str("```\n\n");
                }
            }
        }

        md
    }

    /// Generate JSON report
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Generate plain text report
    pub fn to_text(&self) -> String {
        let mut text = String::new();

        text.push_str(&format!("{}: {}\n", REPORT_TITLE, self.project_name));
        text.push_str(&format!(
            "Generated: {}\n",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        text.push_str(&"=".repeat(80));
        text.push_str("\n\n");

        text.push_str("SUMMARY\n");
        text.push_str(&"-".repeat(80));
        text.push('\n');
        text.push_str(&format!("Candidates:   {}\n", self.summary.candidates));
        text.push_str(&format!("PLAUSIBLE:    {}\n", self.summary.plausible));
        text.push_str(&format!("TIMED_OUT:    {}\n", self.summary.timed_out));
        text.push_str(&format!("RUN_ERROR:    {}\n", self.summary.run_error));
        text.push_str(&format!("MEMORY_ERROR: {}\n", self.summary.memory_error));
        text.push_str(&format!(
            "Elapsed:      {} ms ({} workers)\n",
            self.summary.elapsed_ms, self.summary.parallelism
        ));
        text.push('\n');

        if self.fixes.is_empty() {
            text.push_str("No plausible patches found.\n");
            return text;
        }
        for fix in &self.fixes {
            text.push_str(&format!("{}. Patch {}\n", fix.rank, fix.patch_id));
            for location in &fix.locations {
                text.push_str(&format!("   Location: {}\n", location));
            }
            for file in &fix.files {
                let original = file
                    .original
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                text.push_str(&format!("   File: {}\n", original));
                text.push_str("   Patch:\n");
                match &file.diff {
                    Some(diff) => {
                        for line in diff.lines() {
                            text.push_str(&format!("   {}\n", line));
                        }
                    }
                    None => text.push_str("   <diff unavailable>\n"),
                }
            }
            text.push_str(&"-".repeat(80));
            text.push('\n');
        }

        text
    }

    /// Save report to file
    pub fn save(&self, path: &Path, format: ReportFormat) -> Result<()> {
        let content = match format {
            ReportFormat::Markdown => self.to_markdown(),
            ReportFormat::Json => self.to_json()?,
            ReportFormat::Text => self.to_text(),
        };

        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Json,
    Text,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
            Self::Text => "txt",
        }
    }
}

/// One entry per distinct patched source file of `patch`.
fn file_changes(patch: &Patch, source_root: &Path) -> Vec<FileChange> {
    let mut seen: Vec<Option<PathBuf>> = Vec::new();
    let mut changes = Vec::new();
    for location in patch.locations() {
        let patched = location.source_file();
        if seen.contains(&patched) {
            continue;
        }
        seen.push(patched.clone());
        changes.push(file_change(location, patched, source_root));
    }
    changes
}

fn file_change(location: &PatchLocation, patched: Option<PathBuf>, source_root: &Path) -> FileChange {
    let original = location.original_source_file(source_root);
    let diff = match (&original, &patched) {
        (Some(original), Some(patched)) if original.is_file() && patched.is_file() => {
            unified_diff(original, patched)
        }
        _ => {
            debug!(location = %location, "No source pair to diff");
            None
        }
    };
    FileChange {
        original,
        patched,
        diff,
    }
}

/// `diff -u original patched` through the system `diff`.
pub fn unified_diff(original: &Path, patched: &Path) -> Option<String> {
    let output = match Command::new("diff").arg("-u").arg(original).arg(patched).output() {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "Failed to run diff");
            return None;
        }
    };
    // 0: identical, 1: different, anything else: trouble
    match output.status.code() {
        Some(0) | Some(1) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
        _ => {
            warn!(
                original = %original.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "diff failed"
            );
            None
        }
    }
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
