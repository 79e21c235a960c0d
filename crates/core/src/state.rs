//! The three user selections and their shareable, URL-fragment encoding.
//!
//! `ViewState` is the single source of truth. Controls and the share
//! string are both projections of it; the share string is rewritten after
//! every committed change.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::form_urlencoded;

pub const PROFILE_KEY: &str = "profile";
pub const METRIC_KEY: &str = "metric";
pub const THRESHOLD_KEY: &str = "threshold";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewState {
    pub file_key: String,
    pub metric_key: String,
    pub threshold: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            file_key: String::new(),
            metric_key: "cpu-cycles".to_string(),
            threshold: 0.0,
        }
    }
}

impl ViewState {
    /// Override every field present in `partial`.
    pub fn merge(&mut self, partial: PartialViewState) {
        if let Some(file_key) = partial.file_key {
            self.file_key = file_key;
        }
        if let Some(metric_key) = partial.metric_key {
            self.metric_key = metric_key;
        }
        if let Some(threshold) = partial.threshold {
            self.threshold = threshold;
        }
    }

    /// This state with the threshold at share-string precision.
    pub fn rounded(&self) -> Self {
        Self {
            threshold: round_threshold(self.threshold),
            ..self.clone()
        }
    }
}

/// Fields recovered from a share string. Absent or unparsable fields are
/// `None`; callers keep their current value for those.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialViewState {
    pub file_key: Option<String>,
    pub metric_key: Option<String>,
    pub threshold: Option<f64>,
}

impl PartialViewState {
    pub fn is_empty(&self) -> bool {
        self.file_key.is_none() && self.metric_key.is_none() && self.threshold.is_none()
    }
}

/// Thresholds are shared with two decimals.
pub fn format_threshold(threshold: f64) -> String {
    format!("{threshold:.2}")
}

pub fn round_threshold(threshold: f64) -> f64 {
    format_threshold(threshold).parse().unwrap_or(threshold)
}

/// Canonical encoding: `profile=…&metric=…&threshold=…`, always in that
/// order, form-urlencoded, no leading `#`.
pub fn serialize(state: &ViewState) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair(PROFILE_KEY, &state.file_key)
        .append_pair(METRIC_KEY, &state.metric_key)
        .append_pair(THRESHOLD_KEY, &format_threshold(state.threshold))
        .finish()
}

/// Parse a share string, with or without its leading `#`.
///
/// Never fails. The first occurrence of a key wins, unknown keys are
/// ignored, empty names count as absent, and a threshold must be a finite,
/// non-negative number.
pub fn deserialize(input: &str) -> PartialViewState {
    let input = input.strip_prefix('#').unwrap_or(input);
    let mut partial = PartialViewState::default();

    for (key, value) in form_urlencoded::parse(input.as_bytes()) {
        match &*key {
            PROFILE_KEY if partial.file_key.is_none() && !value.is_empty() => {
                partial.file_key = Some(value.into_owned());
            }
            METRIC_KEY if partial.metric_key.is_none() && !value.is_empty() => {
                partial.metric_key = Some(value.into_owned());
            }
            THRESHOLD_KEY if partial.threshold.is_none() => {
                partial.threshold = parse_threshold(&value);
            }
            _ => {}
        }
    }
    partial
}

fn parse_threshold(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite() && *t >= 0.0)
}

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("silent replacement refused: {0}")]
    Refused(String),
}

/// Where the share string lives (a browser location, a status line…).
pub trait ShareTarget {
    /// The current share string, including any leading `#`.
    fn current(&self) -> String;

    /// Replace the string without creating a navigable history entry.
    fn replace(&mut self, fragment: &str) -> Result<(), ShareError>;

    /// Set the string, creating a history entry if the surface has one.
    fn assign(&mut self, fragment: &str);
}

/// Write `state` to `target` canonically. Returns the written fragment.
///
/// A target that refuses silent replacement gets a history-creating
/// update instead; the string is updated either way.
pub fn publish(target: &mut dyn ShareTarget, state: &ViewState) -> String {
    let fragment = format!("#{}", serialize(state));
    if let Err(err) = target.replace(&fragment) {
        debug!(%err, "falling back to history-creating share update");
        target.assign(&fragment);
    }
    fragment
}

/// In-memory share surface with a history list. Used by the terminal
/// frontend and by tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLink {
    fragment: String,
    history: Vec<String>,
    refuse_replace: bool,
}

impl MemoryLink {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            ..Self::default()
        }
    }

    /// A link that rejects silent replacement, like a strict `file://` page.
    pub fn strict(fragment: impl Into<String>) -> Self {
        Self {
            refuse_replace: true,
            ..Self::new(fragment)
        }
    }

    /// Previous fragments pushed by `assign`, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }
}

impl ShareTarget for MemoryLink {
    fn current(&self) -> String {
        self.fragment.clone()
    }

    fn replace(&mut self, fragment: &str) -> Result<(), ShareError> {
        if self.refuse_replace {
            return Err(ShareError::Refused("replacement disabled".into()));
        }
        self.fragment = fragment.to_string();
        Ok(())
    }

    fn assign(&mut self, fragment: &str) {
        let previous = std::mem::replace(&mut self.fragment, fragment.to_string());
        self.history.push(previous);
    }
}
