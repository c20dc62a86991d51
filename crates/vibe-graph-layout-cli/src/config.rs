//! Layout configuration resolution.
//!
//! Precedence, lowest to highest: built-in defaults, the JSON config file
//! (`--config` or `VGL_CONFIG`), then `--set name=value` overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::{debug, warn};
use vibe_graph_layout::{LayoutConfig, LayoutSettings};

/// Arguments shared by every command that builds layout settings.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON file with `settings` overrides and `convergence` tuning.
    #[arg(long, env = "VGL_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override a layout setting (can be specified multiple times).
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_override)]
    pub overrides: Vec<(String, f32)>,
}

/// Settings and convergence tuning after every layer has been applied.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub layout: LayoutConfig,
    pub settings: LayoutSettings,
    pub source: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        resolve(self.config.as_deref(), &self.overrides)
    }
}

/// Parse a `name=value` pair.
pub fn parse_override(raw: &str) -> std::result::Result<(String, f32), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing setting name in `{raw}`"));
    }

    let value: f32 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for `{name}`: {e}"))?;

    Ok((name.to_string(), value))
}

/// Build settings from an optional config file plus explicit overrides.
pub fn resolve(path: Option<&Path>, overrides: &[(String, f32)]) -> Result<ResolvedConfig> {
    let layout = match path {
        Some(path) => LayoutConfig::from_path(path)
            .with_context(|| format!("Failed to load layout config from {}", path.display()))?,
        None => LayoutConfig::default(),
    };

    let settings = layout.build_settings();

    for (name, value) in overrides {
        let applied = settings
            .set(name, *value)
            .with_context(|| format!("Invalid --set {name}={value}"))?;
        if applied != *value {
            warn!(setting = %name, requested = value, applied, "layout_setting_clamped");
        }
    }

    debug!(
        source = ?path,
        overrides = overrides.len(),
        "layout_config_resolved"
    );

    Ok(ResolvedConfig {
        layout,
        settings,
        source: path.map(Path::to_path_buf),
    })
}
