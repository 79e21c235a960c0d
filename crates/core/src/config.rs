//! Viewer configuration, loaded from an optional JSON file.
//!
//! Every field has a default, so `{}` is a valid configuration and a file
//! only needs to name what it changes.

use std::path::Path;

use ratioflame_protocol::Color;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::ViewState;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which counters feed the weight and the ratio denominator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterKeys {
    /// Rectangle size in the flamegraph.
    pub weight: String,
    /// Denominator of every derived ratio.
    pub normalizer: String,
}

impl Default for CounterKeys {
    fn default() -> Self {
        Self {
            weight: "cpu-cycles".to_string(),
            normalizer: "instructions".to_string(),
        }
    }
}

/// Distribution calibration and threshold slider shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Quantile used as the top of the color domain, in `[0, 1]`.
    pub percentile: f64,
    /// Slider max is `ceil(p * headroom)`.
    pub slider_headroom: f64,
    /// Slider step is `max / slider_steps`.
    pub slider_steps: u32,
    /// Slider max when no finite ratio exists.
    pub fallback_slider_max: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            percentile: 0.98,
            slider_headroom: 1.5,
            slider_steps: 200,
            fallback_slider_max: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteConfig {
    /// Nodes whose ratio is NaN or infinite.
    pub not_applicable: Color,
    /// Nodes whose ratio is below the threshold.
    pub below_threshold: Color,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            not_applicable: Color::rgb(0xcc, 0xcc, 0xcc),
            below_threshold: Color::rgb(0xf1, 0xf3, 0xf5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    /// Height of one stack level, in viewport units.
    pub cell_height: f64,
    /// Frames narrower than this are not drawn.
    pub min_frame_width: f64,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            cell_height: 18.0,
            min_frame_width: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub counters: CounterKeys,
    pub calibration: CalibrationConfig,
    pub palette: PaletteConfig,
    pub layout: LayoutOptions,
    /// Prefix joined with `<file key>.json` when fetching over HTTP.
    pub data_url_prefix: String,
    /// Control values used when the shared state names nothing.
    pub defaults: ViewState,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            counters: CounterKeys::default(),
            calibration: CalibrationConfig::default(),
            palette: PaletteConfig::default(),
            layout: LayoutOptions::default(),
            data_url_prefix: "./".to_string(),
            defaults: ViewState::default(),
        }
    }
}

impl ViewerConfig {
    pub fn from_slice(data: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_slice(&data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.calibration;
        if !(0.0..=1.0).contains(&c.percentile) {
            return Err(ConfigError::Invalid(format!(
                "percentile must be within [0, 1], got {}",
                c.percentile
            )));
        }
        if !(c.slider_headroom.is_finite() && c.slider_headroom > 0.0) {
            return Err(ConfigError::Invalid("slider_headroom must be positive".into()));
        }
        if c.slider_steps == 0 {
            return Err(ConfigError::Invalid("slider_steps must be non-zero".into()));
        }
        if !(c.fallback_slider_max.is_finite() && c.fallback_slider_max > 0.0) {
            return Err(ConfigError::Invalid(
                "fallback_slider_max must be positive".into(),
            ));
        }
        if !(self.layout.cell_height.is_finite() && self.layout.cell_height > 0.0) {
            return Err(ConfigError::Invalid("cell_height must be positive".into()));
        }
        if !(self.defaults.threshold.is_finite() && self.defaults.threshold >= 0.0) {
            return Err(ConfigError::Invalid(
                "default threshold must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    /// URL of a data file for a browser fetch.
    pub fn data_url(&self, file_key: &str) -> String {
        format!("{}{}.json", self.data_url_prefix, file_key)
    }
}
