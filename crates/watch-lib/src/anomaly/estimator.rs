//! Dynamic bounds from interquartile dispersion
//!
//! For each bucket the raw bounds are built from the `n` buckets strictly
//! before it (`q25 - a*iqr`, `q75 + a*iqr`), then both raw sequences are
//! smoothed with a centered moving average of width `n`. Buckets with fewer
//! than `n` predecessors have no raw bounds.

use crate::models::{Bounds, TimeSeries};

/// Default number of preceding buckets used for quantiles
pub const DEFAULT_TRAILING_WINDOW: usize = 5;

/// Default IQR multiplier
pub const DEFAULT_IQR_MULTIPLIER: f64 = 3.0;

/// Estimates expected ranges from trailing IQR
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundEstimator {
    /// Number of preceding buckets (`n`)
    pub trailing_window: usize,
    /// Dispersion multiplier (`a`)
    pub iqr_multiplier: f64,
}

impl BoundEstimator {
    pub fn new(trailing_window: usize, iqr_multiplier: f64) -> Self {
        Self {
            trailing_window: trailing_window.max(1),
            iqr_multiplier,
        }
    }

    /// Bounds for the latest bucket of the series.
    ///
    /// Returns `None` when no bucket in the smoothing window has enough
    /// history. Only buckets before the latest one feed the result.
    pub fn estimate(&self, series: &TimeSeries) -> Option<Bounds> {
        let values = series.values();
        let last = values.len().checked_sub(1)?;
        let raw = self.raw_bounds(&values);
        smoothed_at(&raw, last, self.trailing_window)
    }

    /// Smoothed bounds for every bucket in the series (chart context)
    pub fn band(&self, series: &TimeSeries) -> Vec<Option<Bounds>> {
        let raw = self.raw_bounds(&series.values());
        (0..raw.len())
            .map(|i| smoothed_at(&raw, i, self.trailing_window))
            .collect()
    }

    /// Unsmoothed bounds per position, `None` where history is short
    pub fn raw_bounds(&self, values: &[f64]) -> Vec<Option<Bounds>> {
        let n = self.trailing_window.max(1);
        (0..values.len())
            .map(|t| {
                if t < n {
                    return None;
                }
                let mut window = values[t - n..t].to_vec();
                window.sort_by(f64::total_cmp);

                let q25 = quantile(&window, 0.25);
                let q75 = quantile(&window, 0.75);
                let iqr = q75 - q25;

                Some(Bounds {
                    lower: q25 - self.iqr_multiplier * iqr,
                    upper: q75 + self.iqr_multiplier * iqr,
                })
            })
            .collect()
    }
}

impl Default for BoundEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_TRAILING_WINDOW, DEFAULT_IQR_MULTIPLIER)
    }
}

/// Quantile of sorted values with linear interpolation between closest ranks
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Centered moving average at `index`, skipping undefined entries.
///
/// The window spans `(width - 1) / 2` positions after `index` and the rest
/// before it, truncated at the series edges.
fn smoothed_at(raw: &[Option<Bounds>], index: usize, width: usize) -> Option<Bounds> {
    let width = width.max(1);
    let after = (width - 1) / 2;
    let before = width - 1 - after;
    let start = index.saturating_sub(before);
    let end = (index + after).min(raw.len().saturating_sub(1));

    let defined: Vec<Bounds> = raw.get(start..=end)?.iter().flatten().copied().collect();
    if defined.is_empty() {
        return None;
    }

    let count = defined.len() as f64;
    Some(Bounds {
        lower: defined.iter().map(|b| b.lower).sum::<f64>() / count,
        upper: defined.iter().map(|b| b.upper).sum::<f64>() / count,
    })
}
