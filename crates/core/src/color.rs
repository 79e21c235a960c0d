use ratioflame_protocol::Color;
use serde::Serialize;

use crate::calibrate::DistributionSummary;
use crate::config::PaletteConfig;

/// The nine-class sequential "Oranges" ramp, light to dark.
pub const ORANGES: [Color; 9] = [
    Color::rgb(0xff, 0xf5, 0xeb),
    Color::rgb(0xfe, 0xe6, 0xce),
    Color::rgb(0xfd, 0xd0, 0xa2),
    Color::rgb(0xfd, 0xae, 0x6b),
    Color::rgb(0xfd, 0x8d, 0x3c),
    Color::rgb(0xf1, 0x69, 0x13),
    Color::rgb(0xd9, 0x48, 0x01),
    Color::rgb(0xa6, 0x36, 0x03),
    Color::rgb(0x7f, 0x27, 0x04),
];

/// Sequential color scale over `[0, domain_max]`, clamped at both ends.
///
/// The ramp is interpolated with a uniform cubic B-spline so neighbouring
/// ratios get smoothly varying colors rather than nine bands.
#[derive(Debug, Clone, PartialEq)]
pub struct SequentialScale {
    domain_max: f64,
    ramp: &'static [Color],
}

impl SequentialScale {
    /// A non-positive or non-finite `domain_max` becomes `1`.
    pub fn new(domain_max: f64) -> Self {
        let domain_max = if domain_max.is_finite() && domain_max > 0.0 {
            domain_max
        } else {
            1.0
        };
        Self {
            domain_max,
            ramp: &ORANGES,
        }
    }

    pub fn from_summary(summary: &DistributionSummary) -> Self {
        Self::new(summary.color_domain_max())
    }

    pub fn domain_max(&self) -> f64 {
        self.domain_max
    }

    /// Color at `value`. Values beyond the domain take the terminal color.
    pub fn at(&self, value: f64) -> Color {
        let t = value / self.domain_max;
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let channel = |pick: fn(Color) -> u8| {
            let values: Vec<f64> = self.ramp.iter().map(|c| f64::from(pick(*c))).collect();
            basis_spline(&values, t).round().clamp(0.0, 255.0) as u8
        };
        Color::rgb(channel(|c| c.r), channel(|c| c.g), channel(|c| c.b))
    }
}

/// Uniform cubic B-spline through `values`, evaluated at `t ∈ [0, 1]`.
/// The curve passes exactly through the first and last value.
fn basis_spline(values: &[f64], t: f64) -> f64 {
    let n = values.len().saturating_sub(1);
    if n == 0 {
        return values.first().copied().unwrap_or(0.0);
    }
    let i = if t >= 1.0 {
        n - 1
    } else {
        ((t * n as f64).floor() as usize).min(n - 1)
    };
    let v1 = values[i];
    let v2 = values[i + 1];
    let v0 = if i > 0 { values[i - 1] } else { 2.0 * v1 - v2 };
    let v3 = if i + 2 <= n { values[i + 2] } else { 2.0 * v2 - v1 };

    let t1 = (t - i as f64 / n as f64) * n as f64;
    let t2 = t1 * t1;
    let t3 = t2 * t1;
    ((1.0 - 3.0 * t1 + 3.0 * t2 - t3) * v0
        + (4.0 - 6.0 * t2 + 3.0 * t3) * v1
        + (1.0 + 3.0 * t1 + 3.0 * t2 - 3.0 * t3) * v2
        + t3 * v3)
        / 6.0
}

/// Outcome of the threshold policy for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeColor {
    /// Ratio is NaN or infinite.
    NotApplicable,
    /// Ratio is finite but under the threshold.
    BelowThreshold,
    /// Ratio is at or above the threshold.
    Scaled(Color),
}

/// Maps a node's ratio and the live threshold to a fill color.
///
/// Built once per calibration; evaluating it is a couple of comparisons and
/// one spline lookup, so it runs on every threshold change without touching
/// the derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorPolicy {
    scale: SequentialScale,
    palette: PaletteConfig,
}

impl ColorPolicy {
    pub fn new(scale: SequentialScale, palette: PaletteConfig) -> Self {
        Self { scale, palette }
    }

    pub fn scale(&self) -> &SequentialScale {
        &self.scale
    }

    pub fn classify(&self, ratio: f64, threshold: f64) -> NodeColor {
        if !ratio.is_finite() {
            NodeColor::NotApplicable
        } else if ratio < threshold {
            NodeColor::BelowThreshold
        } else {
            NodeColor::Scaled(self.scale.at(ratio))
        }
    }

    pub fn resolve(&self, color: NodeColor) -> Color {
        match color {
            NodeColor::NotApplicable => self.palette.not_applicable,
            NodeColor::BelowThreshold => self.palette.below_threshold,
            NodeColor::Scaled(c) => c,
        }
    }

    pub fn color_for(&self, ratio: f64, threshold: f64) -> Color {
        self.resolve(self.classify(ratio, threshold))
    }
}
