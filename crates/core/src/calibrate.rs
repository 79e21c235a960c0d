use serde::Serialize;
use tracing::debug;

use crate::config::CalibrationConfig;
use crate::derive::Annotations;

/// Robust bounds of the finite ratio distribution for one derivation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistributionSummary {
    /// Largest finite ratio, 0 if there is none.
    pub max_finite_ratio: f64,
    /// Configured quantile (98th by default), falling back to the maximum
    /// when the quantile is 0 or undefined.
    pub p98_ratio: f64,
    /// How many nodes had a finite ratio.
    pub finite_count: usize,
}

impl DistributionSummary {
    /// Upper end of the color domain: the quantile, or 1 when degenerate.
    pub fn color_domain_max(&self) -> f64 {
        if self.p98_ratio > 0.0 { self.p98_ratio } else { 1.0 }
    }

    /// The maximum as shown next to the slider.
    pub fn max_label(&self) -> String {
        if self.max_finite_ratio > 0.0 {
            format!("{:.2}", self.max_finite_ratio)
        } else {
            "0".to_string()
        }
    }
}

/// Linear interpolation between the closest ranks of an ascending slice.
///
/// With `h = (n - 1) * p`, returns `x[⌊h⌋] + (h - ⌊h⌋) * (x[⌊h⌋+1] - x[⌊h⌋])`.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let (&first, &last) = (sorted.first()?, sorted.last()?);
    if p.is_nan() {
        return None;
    }
    if p <= 0.0 || sorted.len() < 2 {
        return Some(first);
    }
    if p >= 1.0 {
        return Some(last);
    }
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let x0 = sorted[lo];
    let x1 = sorted.get(lo + 1).copied().unwrap_or(x0);
    Some(x0 + (x1 - x0) * (h - lo as f64))
}

/// Summarize the finite ratios of a derivation.
///
/// NaN and infinite ratios mark "not applicable" nodes and are excluded
/// before anything is measured.
pub fn calibrate(annotations: &Annotations, percentile: f64) -> DistributionSummary {
    let mut finite: Vec<f64> = annotations.ratios().filter(|r| r.is_finite()).collect();
    finite.sort_by(f64::total_cmp);

    let max_finite_ratio = finite.last().copied().unwrap_or(0.0);
    let p98_ratio = match quantile_sorted(&finite, percentile) {
        Some(q) if q != 0.0 => q,
        _ => max_finite_ratio,
    };

    debug!(
        metric = annotations.metric(),
        finite = finite.len(),
        max = max_finite_ratio,
        quantile = p98_ratio,
        "calibrated ratio distribution"
    );
    DistributionSummary {
        max_finite_ratio,
        p98_ratio,
        finite_count: finite.len(),
    }
}

/// Range of the threshold slider, derived from the calibrated quantile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SliderRange {
    pub max: f64,
    pub step: f64,
}

impl SliderRange {
    pub fn from_summary(summary: &DistributionSummary, config: &CalibrationConfig) -> Self {
        let max = if summary.p98_ratio > 0.0 {
            (summary.p98_ratio * config.slider_headroom).ceil()
        } else {
            config.fallback_slider_max
        };
        Self {
            max,
            step: max / f64::from(config.slider_steps),
        }
    }

    /// Move `value` by `steps` slider steps, staying within `[0, max]`.
    pub fn nudge(&self, value: f64, steps: i32) -> f64 {
        (value + self.step * f64::from(steps)).clamp(0.0, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CounterKeys;
    use crate::derive::derive;
    use crate::model::TreeBuilder;

    /// A flat tree whose nodes have the given ratios under metric `m`.
    fn annotations_for(ratios: &[f64]) -> Annotations {
        let mut b = TreeBuilder::new();
        let root = b.add_node("root", [("cpu-cycles", 1.0)]);
        for (i, r) in ratios.iter().enumerate() {
            let id = if r.is_nan() {
                b.add_node(format!("n{i}"), [("instructions", 1.0)])
            } else if r.is_infinite() {
                b.add_node(format!("n{i}"), [("m", 1.0), ("instructions", 0.0)])
            } else {
                b.add_node(format!("n{i}"), [("m", *r), ("instructions", 1.0)])
            };
            b.link(root, id).unwrap();
        }
        let tree = b.build(root).unwrap();
        derive(&tree, "m", &CounterKeys::default())
    }

    #[test]
    fn quantile_interpolates_between_ranks() {
        let q = quantile_sorted(&[1.0, 2.0, 3.0, 4.0, 5.0], 0.98).unwrap();
        assert!((q - 4.92).abs() < 1e-9);
        assert_eq!(quantile_sorted(&[1.0, 2.0, 3.0, 4.0, 5.0], 0.5), Some(3.0));
        assert_eq!(quantile_sorted(&[7.0], 0.98), Some(7.0));
        assert_eq!(quantile_sorted(&[], 0.98), None);
    }

    #[test]
    fn five_ratio_scenario() {
        let ann = annotations_for(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let summary = calibrate(&ann, 0.98);
        assert_eq!(summary.max_finite_ratio, 5.0);
        assert!((summary.p98_ratio - 4.92).abs() < 1e-9);
        assert_eq!(summary.finite_count, 5);

        let slider = SliderRange::from_summary(&summary, &CalibrationConfig::default());
        assert_eq!(slider.max, 8.0);
        assert!((slider.step - 0.04).abs() < 1e-12);
        assert_eq!(summary.max_label(), "5.00");
    }

    #[test]
    fn non_finite_ratios_are_excluded() {
        let ann = annotations_for(&[f64::NAN, f64::INFINITY, 1.0, 2.0]);
        let summary = calibrate(&ann, 0.98);
        assert_eq!(summary.finite_count, 2);
        assert_eq!(summary.max_finite_ratio, 2.0);
        assert!(summary.p98_ratio <= summary.max_finite_ratio);
    }

    #[test]
    fn all_non_finite_is_degenerate() {
        let ann = annotations_for(&[f64::NAN, f64::INFINITY]);
        let summary = calibrate(&ann, 0.98);
        assert_eq!(summary.max_finite_ratio, 0.0);
        assert_eq!(summary.p98_ratio, 0.0);
        assert_eq!(summary.color_domain_max(), 1.0);
        assert_eq!(summary.max_label(), "0");

        let slider = SliderRange::from_summary(&summary, &CalibrationConfig::default());
        assert_eq!(slider.max, 100.0);
        assert_eq!(slider.step, 0.5);
    }

    #[test]
    fn zero_quantile_falls_back_to_max() {
        let mut ratios = vec![0.0; 99];
        ratios.push(3.0);
        let summary = calibrate(&annotations_for(&ratios), 0.98);
        assert_eq!(summary.p98_ratio, 3.0);
    }

    #[test]
    fn outlier_does_not_set_the_domain() {
        let mut ratios: Vec<f64> = (1..=100).map(|i| f64::from(i) / 100.0).collect();
        ratios.push(1000.0);
        let summary = calibrate(&annotations_for(&ratios), 0.98);
        assert_eq!(summary.max_finite_ratio, 1000.0);
        assert!(summary.p98_ratio < 1.0);
    }

    #[test]
    fn quantile_never_exceeds_max() {
        for n in 1..40 {
            let ratios: Vec<f64> = (0..n).map(|i| f64::from(i * i) * 0.37).collect();
            let summary = calibrate(&annotations_for(&ratios), 0.98);
            assert!(summary.p98_ratio <= summary.max_finite_ratio);
        }
    }

    #[test]
    fn nudge_stays_in_range() {
        let slider = SliderRange { max: 8.0, step: 0.04 };
        assert_eq!(slider.nudge(0.0, -1), 0.0);
        assert_eq!(slider.nudge(7.99, 5), 8.0);
        assert!((slider.nudge(1.0, 25) - 2.0).abs() < 1e-12);
    }
}
