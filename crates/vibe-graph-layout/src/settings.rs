//! Named layout parameters shared between a UI and the layout worker.
//!
//! A UI lists the registered settings, shows sliders between `min` and `max`
//! and writes new values at any time. The force-directed layout takes one
//! snapshot of the values per iteration.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::convergence::ConvergenceConfig;
use crate::error::{LayoutError, LayoutResult};

pub const REPULSION_STRENGTH: &str = "repulsion_strength";
pub const ATTRACTION_STRENGTH: &str = "attraction_strength";
pub const SPRING_LENGTH: &str = "spring_length";
pub const MAX_DISPLACEMENT: &str = "max_displacement";
pub const DAMPING: &str = "damping";
pub const BARNES_HUT_THETA: &str = "barnes_hut_theta";

/// One named numeric parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutSetting {
    /// Stable identifier used by configuration files and the UI.
    pub name: String,
    /// Human readable label.
    pub display_name: String,
    /// Current value, always within `[min, max]`.
    pub value: f32,
    /// Value restored by [`LayoutSettings::reset`].
    pub default_value: f32,
    pub min: f32,
    pub max: f32,
}

impl LayoutSetting {
    pub fn new(name: &str, display_name: &str, default_value: f32, min: f32, max: f32) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            value: default_value,
            default_value,
            min,
            max,
        }
    }
}

/// Thread-safe collection of [`LayoutSetting`]s.
#[derive(Debug, Default)]
pub struct LayoutSettings {
    settings: RwLock<Vec<LayoutSetting>>,
}

impl LayoutSettings {
    /// Create an empty settings object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings recognised by the force-directed layout, at their defaults.
    pub fn force_directed() -> Self {
        let settings = Self::new();
        settings.register(LayoutSetting::new(
            REPULSION_STRENGTH,
            "Repulsion Strength",
            1.0,
            0.05,
            10.0,
        ));
        settings.register(LayoutSetting::new(
            ATTRACTION_STRENGTH,
            "Attraction Strength",
            0.1,
            0.005,
            0.4,
        ));
        settings.register(LayoutSetting::new(SPRING_LENGTH, "Spring Length", 5.0, 0.5, 50.0));
        settings.register(LayoutSetting::new(
            MAX_DISPLACEMENT,
            "Maximum Displacement",
            10.0,
            0.1,
            100.0,
        ));
        settings.register(LayoutSetting::new(DAMPING, "Damping", 0.5, 0.0, 0.95));
        settings.register(LayoutSetting::new(
            BARNES_HUT_THETA,
            "Barnes-Hut Theta",
            0.8,
            0.1,
            1.5,
        ));
        settings
    }

    /// Register a setting, replacing any existing one with the same name.
    pub fn register(&self, setting: LayoutSetting) {
        let mut settings = self.write();
        match settings.iter_mut().find(|s| s.name == setting.name) {
            Some(existing) => *existing = setting,
            None => settings.push(setting),
        }
    }

    /// Current value of a setting.
    pub fn value(&self, name: &str) -> Option<f32> {
        self.read().iter().find(|s| s.name == name).map(|s| s.value)
    }

    /// Current value of a setting, or `fallback` if it is not registered.
    pub fn value_or(&self, name: &str, fallback: f32) -> f32 {
        self.value(name).unwrap_or(fallback)
    }

    /// Full description of a setting.
    pub fn get(&self, name: &str) -> Option<LayoutSetting> {
        self.read().iter().find(|s| s.name == name).cloned()
    }

    /// Set a value, clamped to the setting's range. Returns the stored value.
    pub fn set(&self, name: &str, value: f32) -> LayoutResult<f32> {
        if !value.is_finite() {
            return Err(LayoutError::InvalidSettingValue {
                name: name.to_string(),
                value,
            });
        }

        let mut settings = self.write();
        let setting = settings
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| LayoutError::UnknownSetting {
                name: name.to_string(),
            })?;
        setting.value = value.clamp(setting.min, setting.max);
        Ok(setting.value)
    }

    /// Restore one setting to its default.
    pub fn reset(&self, name: &str) -> LayoutResult<()> {
        let mut settings = self.write();
        let setting = settings
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| LayoutError::UnknownSetting {
                name: name.to_string(),
            })?;
        setting.value = setting.default_value;
        Ok(())
    }

    /// Restore every setting to its default.
    pub fn reset_all(&self) {
        for setting in self.write().iter_mut() {
            setting.value = setting.default_value;
        }
    }

    /// Apply a name → value map. Unknown names are skipped with a warning;
    /// the number of applied values is returned.
    pub fn apply_overrides(&self, overrides: &BTreeMap<String, f32>) -> usize {
        let mut applied = 0;
        for (name, value) in overrides {
            match self.set(name, *value) {
                Ok(_) => applied += 1,
                Err(e) => warn!(setting = %name, error = %e, "layout_setting_override_skipped"),
            }
        }
        applied
    }

    /// Copy of all settings in registration order.
    pub fn snapshot(&self) -> Vec<LayoutSetting> {
        self.read().clone()
    }

    /// Number of registered settings.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<LayoutSetting>> {
        self.settings.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<LayoutSetting>> {
        self.settings.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Serializable layout configuration: setting overrides plus convergence tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Values applied on top of the registered defaults.
    #[serde(default)]
    pub settings: BTreeMap<String, f32>,

    /// Convergence detector tuning.
    #[serde(default)]
    pub convergence: ConvergenceConfig,
}

impl LayoutConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> LayoutResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON document from disk.
    pub fn from_path(path: impl AsRef<Path>) -> LayoutResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Build force-directed settings with this config's overrides applied.
    pub fn build_settings(&self) -> LayoutSettings {
        let settings = LayoutSettings::force_directed();
        settings.apply_overrides(&self.settings);
        settings
    }
}
