//! `prf init`: write a starter configuration file

use std::path::{Path, PathBuf};

use anyhow::bail;
use prf::ansi_colors::Colorize;
use prf::config::{RepairConfig, CONFIG_FILE};

/// Sample command that runs one JUnit method through the console launcher
pub fn sample_command() -> Vec<String> {
    [
        "java",
        "-cp",
        "{classpath}",
        "org.junit.runner.JUnitCore",
        "{class}#{method}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// The configuration `init` writes
pub fn template(group: Option<String>) -> RepairConfig {
    let mut config = RepairConfig::default();
    config.project.group = group;
    config.tests.command = sample_command();
    config
}

/// Write `prf.toml` into `dir`; refuses to overwrite unless `force`
pub fn cmd_init(dir: &Path, group: Option<String>, force: bool) -> anyhow::Result<PathBuf> {
    let path = dir.join(CONFIG_FILE);
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    std::fs::create_dir_all(dir)?;
    template(group).save(&path)?;

    println!("{} Created configuration: {}", "✓".green(), path.display());
    println!();
    println!("{}", "Next steps:".bold());
    println!("  1. Edit {} and set [tests].command for your build", CONFIG_FILE.cyan());
    println!("  2. Put candidate patches under {}/<patch>/", prf::plugin::POOL_GENERATOR.cyan());
    println!("  3. Run {}", "prf repair".cyan());
    Ok(path)
}
