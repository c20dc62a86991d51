//! `vgl settings`: show the effective layout settings.

use anyhow::Result;
use serde::Serialize;
use vibe_graph_layout::{ConvergenceConfig, LayoutSetting};

use crate::config::ConfigArgs;

#[derive(Debug, Serialize)]
pub struct SettingsReport {
    pub source: Option<String>,
    pub settings: Vec<LayoutSetting>,
    pub convergence: ConvergenceConfig,
}

/// Resolve settings without running anything.
pub fn execute(args: &ConfigArgs) -> Result<SettingsReport> {
    let resolved = args.resolve()?;
    Ok(SettingsReport {
        source: resolved.source.map(|p| p.display().to_string()),
        settings: resolved.settings.snapshot(),
        convergence: resolved.layout.convergence,
    })
}

/// Human readable table on stdout.
pub fn print_table(report: &SettingsReport) {
    println!("Layout settings");
    println!("{:-<60}", "");
    for s in &report.settings {
        println!(
            "{:<22} {:>10.4}  (default {}, range {}..{})",
            s.name, s.value, s.default_value, s.min, s.max
        );
    }
    if let Some(source) = &report.source {
        println!("\nConfig file: {}", source);
    }
}
