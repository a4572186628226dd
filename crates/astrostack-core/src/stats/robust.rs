//! Robust location and scale estimators.
//!
//! None of these log; failures come back as errors or `None`.

use rayon::prelude::*;

use crate::consts::{
    BWMV_TUNING, IKSS_CLIP, IKSS_CONVERGENCE, IKSS_CORRECTION, IKSS_LITE_CLIP, IKSS_SCALE_FLOOR,
    MAD_TO_SIGMA, MIN_SKY_PIXELS, ROBUST_MEAN_CLIP,
};
use crate::error::{try_alloc, Result, StackError};
use crate::order::{select_median, sort_in_place, Sample};

/// Mean absolute deviation from `median`.
pub fn avg_dev<T: Sample>(data: &[T], median: f64) -> Result<f64> {
    if data.is_empty() {
        return Err(StackError::EmptySampleSet);
    }
    let sum: f64 = data.par_iter().map(|&x| (x.as_f64() - median).abs()).sum();
    Ok(sum / data.len() as f64)
}

/// Median absolute deviation from `median`.
///
/// The deviations go to a scratch buffer, so `data` is left untouched.
pub fn mad<T: Sample>(data: &[T], median: f64) -> Result<f64> {
    if data.is_empty() {
        return Err(StackError::EmptySampleSet);
    }
    let mut deviations = try_alloc(data.len(), 0.0f32)?;
    deviations
        .par_iter_mut()
        .zip(data.par_iter())
        .for_each(|(d, &x)| *d = (x.as_f64() - median).abs() as f32);
    select_median(&mut deviations)
}

/// Tukey biweight midvariance with tuning constant 9.
///
/// Samples further than `9 * mad` from `median` get zero weight. A zero MAD
/// (all samples equal within rounding) yields 0.
pub fn bwmv<T: Sample>(data: &[T], median: f64, mad: f64) -> Result<f64> {
    if data.is_empty() {
        return Err(StackError::EmptySampleSet);
    }
    if mad == 0.0 {
        return Ok(0.0);
    }
    let c = BWMV_TUNING * mad;
    let (num, den) = data
        .par_iter()
        .fold(
            || (0.0f64, 0.0f64),
            |(num, den), &x| {
                let dx = x.as_f64() - median;
                let y = dx / c;
                if y.abs() >= 1.0 {
                    return (num, den);
                }
                let y2 = y * y;
                let w = 1.0 - y2;
                (num + dx * dx * w.powi(4), den + w * (1.0 - 5.0 * y2))
            },
        )
        .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));
    if den == 0.0 {
        return Ok(0.0);
    }
    Ok(data.len() as f64 * num / (den * den))
}

fn sorted_median(sorted: &[f32]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2] as f64
    } else {
        (sorted[n / 2 - 1] as f64 + sorted[n / 2] as f64) / 2.0
    }
}

/// Iterative robust location and scale.
///
/// Destructive: `data` is normalized to `[0, 1]` and sorted. Each pass
/// computes median, MAD and `sqrt(bwmv)` of the retained window, then narrows
/// the window to `median ± 4 * scale`. Stops with a zero scale under the
/// numerical floor, or when the scale no longer shrinks meaningfully, in which
/// case the scale is multiplied by 0.991. Results are in the input units.
pub fn ikss(data: &mut [f32]) -> Result<(f64, f64)> {
    if data.is_empty() {
        return Err(StackError::EmptySampleSet);
    }
    let (min, max) = data
        .par_iter()
        .fold(
            || (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), &v| (lo.min(v as f64), hi.max(v as f64)),
        )
        .reduce(
            || (f64::INFINITY, f64::NEG_INFINITY),
            |a, b| (a.0.min(b.0), a.1.max(b.1)),
        );
    let range = max - min;
    if range <= 0.0 {
        return Ok((min, 0.0));
    }
    data.par_iter_mut()
        .for_each(|v| *v = ((*v as f64 - min) / range) as f32);
    sort_in_place(data);

    let rescale = |location: f64, scale: f64| (location * range + min, scale * range);
    let mut i = 0usize;
    let mut j = data.len();
    let mut previous = 1.0f64;
    loop {
        if j <= i {
            return Ok(rescale(0.0, 0.0));
        }
        let window = &data[i..j];
        let m = sorted_median(window);
        let window_mad = mad(window, m)?;
        let s = bwmv(window, m, window_mad)?.sqrt();
        if s < IKSS_SCALE_FLOOR {
            return Ok(rescale(m, 0.0));
        }
        if (previous - s) / s < IKSS_CONVERGENCE {
            return Ok(rescale(m, IKSS_CORRECTION * s));
        }
        previous = s;
        let low = m - IKSS_CLIP * s;
        let high = m + IKSS_CLIP * s;
        while i < j && (data[i] as f64) < low {
            i += 1;
        }
        while j > i && (data[j - 1] as f64) > high {
            j -= 1;
        }
    }
}

/// One-pass robust location and scale for very large buffers.
///
/// Trims once at `median ± 6 * mad` instead of iterating, then returns the
/// median and `0.991 * sqrt(bwmv)` of the retained samples.
pub fn ikss_lite<T: Sample>(data: &[T], median: f64, mad_value: f64) -> Result<(f64, f64)> {
    if data.is_empty() {
        return Err(StackError::EmptySampleSet);
    }
    if mad_value == 0.0 {
        return Ok((median, 0.0));
    }
    let low = median - IKSS_LITE_CLIP * mad_value;
    let high = median + IKSS_LITE_CLIP * mad_value;
    let mut kept: Vec<f32> = data
        .par_iter()
        .map(|&x| x.as_f64())
        .filter(|&x| x >= low && x <= high)
        .map(|x| x as f32)
        .collect();
    if kept.is_empty() {
        return Ok((median, 0.0));
    }
    let location = select_median(&mut kept)?;
    let kept_mad = mad(&kept, location)?;
    let scale = bwmv(&kept, location, kept_mad)?.sqrt();
    Ok((location, IKSS_CORRECTION * scale))
}

/// Mean and standard deviation after rejecting samples more than 3 sigma
/// (MAD-derived) from the median.
///
/// `None` for an empty input.
pub fn robust_mean(data: &[f64]) -> Option<(f64, f64)> {
    if data.is_empty() {
        return None;
    }
    let mut scratch = data.to_vec();
    let median = select_median(&mut scratch).ok()?;
    let sigma = MAD_TO_SIGMA * mad(data, median).ok()?;
    let limit = ROBUST_MEAN_CLIP * sigma;

    let kept: Vec<f64> = data
        .iter()
        .copied()
        .filter(|x| (x - median).abs() <= limit)
        .collect();
    if kept.is_empty() {
        return Some((median, 0.0));
    }
    let n = kept.len() as f64;
    let mean = kept.iter().sum::<f64>() / n;
    let var = if kept.len() > 1 {
        kept.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    Some((mean, var.sqrt()))
}

/// Sky level and noise from an annulus of samples, as used for photometry.
///
/// `None` when fewer than [`MIN_SKY_PIXELS`] samples are given.
pub fn sky_background(data: &[f64]) -> Option<(f64, f64)> {
    if data.len() < MIN_SKY_PIXELS {
        return None;
    }
    robust_mean(data)
}
