//! Per-pixel outlier rejection for mean stacking.
//!
//! Every routine works on the samples of one pixel across all frames, already
//! normalized. Survivors are compacted to the front of the buffer; the mean of
//! the survivors is the stacked value.

use crate::consts::{
    LINEAR_FIT_RESIDUAL_FLOOR, MAD_TO_SIGMA, MIN_REJECTION_SAMPLES, WINSORIZE_CONVERGENCE,
    WINSORIZE_CORRECTION, WINSORIZE_HUBER, WINSORIZE_MAX_ITERATIONS,
};
use crate::order::{select_median, sort_in_place};

use super::config::Rejection;

/// Result of combining one pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Combined {
    pub value: f32,
    /// Samples rejected below the centre.
    pub low: u32,
    /// Samples rejected above the centre.
    pub high: u32,
}

/// Reusable buffers, one set per worker.
#[derive(Debug, Default)]
pub(crate) struct Scratch {
    work: Vec<f32>,
    aux: Vec<f32>,
    candidates: Vec<(f64, bool)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Keep,
    Low,
    High,
}

fn classify(diff: f64, low: f64, high: f64) -> Verdict {
    if diff < -low {
        Verdict::Low
    } else if diff > high {
        Verdict::High
    } else {
        Verdict::Keep
    }
}

/// Mean of the samples left after `rejection`.
///
/// `values` is reordered. For [`Rejection::Gesdt`], `low` is the maximum
/// outlier fraction and `high` the significance level.
pub(crate) fn reject_mean(
    values: &mut [f32],
    rejection: Rejection,
    low: f32,
    high: f32,
    scratch: &mut Scratch,
) -> Combined {
    let mut out = Combined::default();
    if values.is_empty() {
        return out;
    }
    let (low, high) = (low as f64, high as f64);
    let len = match rejection {
        Rejection::None => values.len(),
        Rejection::Percentile => percentile_clip(values, low, high, scratch, &mut out),
        Rejection::Sigma => sigma_clip(values, low, high, scratch, &mut out),
        Rejection::SigmaMedian => sigma_median_clip(values, low, high, scratch, &mut out),
        Rejection::Winsorized => winsorized_clip(values, low, high, scratch, &mut out),
        Rejection::LinearFit => linear_fit_clip(values, low, high, scratch, &mut out),
        Rejection::Gesdt => gesd(values, low, high, scratch, &mut out),
    };
    out.value = mean(&values[..len]) as f32;
    out
}

/// Median of one pixel's samples. `values` is reordered.
pub(crate) fn median_value(values: &mut [f32]) -> f32 {
    select_median(values).unwrap_or(0.0) as f32
}

fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

fn std_dev_about(values: &[f32], centre: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|&v| (v as f64 - centre).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

fn median_copy(values: &[f32], buf: &mut Vec<f32>) -> f64 {
    buf.clear();
    buf.extend_from_slice(values);
    select_median(&mut buf[..]).unwrap_or(0.0)
}

fn mad_sigma(values: &[f32], median: f64, buf: &mut Vec<f32>) -> f64 {
    buf.clear();
    buf.extend(values.iter().map(|&v| (v as f64 - median).abs() as f32));
    MAD_TO_SIGMA * select_median(&mut buf[..]).unwrap_or(0.0)
}

/// Keep the samples of `values[..len]` that `judge` accepts.
///
/// A pass that would reject everything is discarded and leaves the buffer as
/// it was.
fn clip_pass<F>(values: &mut [f32], len: usize, out: &mut Combined, mut judge: F) -> usize
where
    F: FnMut(usize, f32) -> Verdict,
{
    let (mut low, mut high, mut write) = (0u32, 0u32, 0usize);
    for read in 0..len {
        let v = values[read];
        match judge(read, v) {
            Verdict::Keep => {
                values[write] = v;
                write += 1;
            }
            Verdict::Low => low += 1,
            Verdict::High => high += 1,
        }
    }
    if write == 0 {
        return len;
    }
    out.low += low;
    out.high += high;
    write
}

fn percentile_clip(
    values: &mut [f32],
    low: f64,
    high: f64,
    scratch: &mut Scratch,
    out: &mut Combined,
) -> usize {
    let len = values.len();
    if len <= MIN_REJECTION_SAMPLES {
        return len;
    }
    let m = median_copy(values, &mut scratch.work);
    let (lo, hi) = (m.abs() * low, m.abs() * high);
    clip_pass(values, len, out, |_, v| classify(v as f64 - m, lo, hi))
}

fn sigma_clip(
    values: &mut [f32],
    low: f64,
    high: f64,
    scratch: &mut Scratch,
    out: &mut Combined,
) -> usize {
    let mut len = values.len();
    while len > MIN_REJECTION_SAMPLES {
        let active = &values[..len];
        let m = median_copy(active, &mut scratch.work);
        let sd = std_dev_about(active, mean(active));
        if sd <= f64::EPSILON {
            break;
        }
        let kept = clip_pass(values, len, out, |_, v| {
            classify(v as f64 - m, low * sd, high * sd)
        });
        if kept == len {
            break;
        }
        len = kept;
    }
    len
}

/// Sigma clipping that replaces outliers by the median and keeps every slot.
fn sigma_median_clip(
    values: &mut [f32],
    low: f64,
    high: f64,
    scratch: &mut Scratch,
    out: &mut Combined,
) -> usize {
    let n = values.len();
    if n <= MIN_REJECTION_SAMPLES {
        return n;
    }
    for _ in 0..n {
        let m = median_copy(values, &mut scratch.work);
        let sd = std_dev_about(values, mean(values));
        if sd <= f64::EPSILON {
            break;
        }
        let mut changed = false;
        for v in values.iter_mut() {
            match classify(*v as f64 - m, low * sd, high * sd) {
                Verdict::Keep => continue,
                Verdict::Low => out.low += 1,
                Verdict::High => out.high += 1,
            }
            *v = m as f32;
            changed = true;
        }
        if !changed {
            break;
        }
    }
    n
}

/// Robust centre and sigma by iterative Winsorization with Huber's constant.
fn winsorized_estimate(values: &[f32], scratch: &mut Scratch) -> (f64, f64) {
    let Scratch { work, aux, .. } = scratch;
    work.clear();
    work.extend_from_slice(values);
    let mut centre = median_copy(work, aux);
    let mut sigma = WINSORIZE_CORRECTION * std_dev_about(work, centre);
    for _ in 0..WINSORIZE_MAX_ITERATIONS {
        if sigma <= f64::EPSILON {
            return (centre, 0.0);
        }
        let lo = (centre - WINSORIZE_HUBER * sigma) as f32;
        let hi = (centre + WINSORIZE_HUBER * sigma) as f32;
        for v in work.iter_mut() {
            *v = v.clamp(lo, hi);
        }
        centre = median_copy(work, aux);
        let next = WINSORIZE_CORRECTION * std_dev_about(work, centre);
        let converged = (next - sigma).abs() <= sigma * WINSORIZE_CONVERGENCE;
        sigma = next;
        if converged {
            break;
        }
    }
    (centre, sigma)
}

fn winsorized_clip(
    values: &mut [f32],
    low: f64,
    high: f64,
    scratch: &mut Scratch,
    out: &mut Combined,
) -> usize {
    let mut len = values.len();
    while len > MIN_REJECTION_SAMPLES {
        let (centre, sigma) = winsorized_estimate(&values[..len], scratch);
        if sigma <= f64::EPSILON {
            break;
        }
        let kept = clip_pass(values, len, out, |_, v| {
            classify(v as f64 - centre, low * sigma, high * sigma)
        });
        if kept == len {
            break;
        }
        len = kept;
    }
    len
}

/// Least-squares line `a + b * i` through samples sorted ascending.
fn fit_sorted(sorted: &[f32]) -> Option<(f64, f64)> {
    let n = sorted.len() as f64;
    let (mut sx, mut sy, mut sxy, mut sxx) = (0.0, 0.0, 0.0, 0.0);
    for (i, &v) in sorted.iter().enumerate() {
        let (x, y) = (i as f64, v as f64);
        sx += x;
        sy += y;
        sxy += x * y;
        sxx += x * x;
    }
    let denom = n * sxx - sx * sx;
    if denom.abs() <= f64::EPSILON {
        return None;
    }
    let b = (n * sxy - sx * sy) / denom;
    Some(((sy - b * sx) / n, b))
}

/// A median/MAD clip, then passes that clip each sorted sample against a line
/// fitted through the survivors, with the mean absolute residual as sigma.
/// At least one line-fit pass always runs.
fn linear_fit_clip(
    values: &mut [f32],
    low: f64,
    high: f64,
    scratch: &mut Scratch,
    out: &mut Combined,
) -> usize {
    let mut len = values.len();
    if len <= MIN_REJECTION_SAMPLES {
        return len;
    }
    let m = median_copy(values, &mut scratch.work);
    let sigma = mad_sigma(values, m, &mut scratch.work);
    if sigma > f64::EPSILON {
        len = clip_pass(values, len, out, |_, v| {
            classify(v as f64 - m, low * sigma, high * sigma)
        });
    }
    while len > MIN_REJECTION_SAMPLES {
        let active = &mut values[..len];
        sort_in_place(active);
        let Some((a, b)) = fit_sorted(active) else {
            break;
        };
        let (residual, magnitude) = active
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(r, mag), (i, &v)| {
                let v = v as f64;
                (r + (v - (a + b * i as f64)).abs(), mag + v.abs())
            });
        let sigma = residual / len as f64;
        let floor = LINEAR_FIT_RESIDUAL_FLOOR * (magnitude / len as f64);
        if sigma <= f64::EPSILON.max(floor) {
            break;
        }
        let kept = clip_pass(values, len, out, |i, v| {
            classify(v as f64 - (a + b * i as f64), low * sigma, high * sigma)
        });
        if kept == len {
            break;
        }
        len = kept;
    }
    len
}

/// Generalized extreme Studentized deviate test.
///
/// Up to `max_fraction * n` candidates are removed one at a time, most deviant
/// first (median and MAD sigma of the remaining samples). The outlier count is
/// the largest `i` whose test statistic exceeds its critical value at
/// significance `alpha`.
fn gesd(
    values: &mut [f32],
    max_fraction: f64,
    alpha: f64,
    scratch: &mut Scratch,
    out: &mut Combined,
) -> usize {
    let n = values.len();
    if n <= MIN_REJECTION_SAMPLES {
        return n;
    }
    let max_outliers =
        ((n as f64 * max_fraction.max(0.0)).floor() as usize).min(n - MIN_REJECTION_SAMPLES);
    let alpha = alpha.clamp(1e-6, 0.5);

    scratch.candidates.clear();
    let mut len = n;
    for _ in 0..max_outliers {
        let m = median_copy(&values[..len], &mut scratch.work);
        let sigma = mad_sigma(&values[..len], m, &mut scratch.work);
        if sigma <= f64::EPSILON {
            break;
        }
        let (idx, dev) = values[..len]
            .iter()
            .enumerate()
            .map(|(i, &v)| (i, v as f64 - m))
            .fold((0, 0.0f64), |best, cur| {
                if cur.1.abs() > best.1.abs() {
                    cur
                } else {
                    best
                }
            });
        scratch.candidates.push((dev.abs() / sigma, dev < 0.0));
        values.swap(idx, len - 1);
        len -= 1;
    }

    let mut outliers = 0;
    for (i, &(r, _)) in scratch.candidates.iter().enumerate().rev() {
        if r > gesd_critical(n - i, alpha) {
            outliers = i + 1;
            break;
        }
    }
    for &(_, below) in &scratch.candidates[..outliers] {
        if below {
            out.low += 1;
        } else {
            out.high += 1;
        }
    }
    n - outliers
}

/// Critical value of the test with `remaining` samples.
fn gesd_critical(remaining: usize, alpha: f64) -> f64 {
    let ni = remaining as f64;
    let p = 1.0 - alpha / (2.0 * ni);
    let dof = ni - 2.0;
    let t = student_t_quantile(p, dof);
    (ni - 1.0) * t / ((dof + t * t) * ni).sqrt()
}

/// Student t quantile from the normal quantile (Cornish-Fisher expansion).
fn student_t_quantile(p: f64, dof: f64) -> f64 {
    let z = inverse_normal(p);
    let z3 = z * z * z;
    let z5 = z3 * z * z;
    z + (z3 + z) / (4.0 * dof) + (5.0 * z5 + 16.0 * z3 + 3.0 * z) / (96.0 * dof * dof)
}

/// Inverse standard normal CDF, Abramowitz and Stegun 26.2.23.
fn inverse_normal(p: f64) -> f64 {
    const C: [f64; 3] = [2.515_517, 0.802_853, 0.010_328];
    const D: [f64; 3] = [1.432_788, 0.189_269, 0.001_308];
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    let (q, sign) = if p > 0.5 { (1.0 - p, 1.0) } else { (p, -1.0) };
    let t = (-2.0 * q.ln()).sqrt();
    let num = C[0] + C[1] * t + C[2] * t * t;
    let den = 1.0 + D[0] * t + D[1] * t * t + D[2] * t * t * t;
    sign * (t - num / den)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn noisy_with_outlier() -> Vec<f32> {
        vec![98.0, 99.0, 100.0, 101.0, 102.0, 100.0, 99.0, 101.0, 100.0, 5000.0]
    }

    #[test]
    fn test_inverse_normal() {
        assert_abs_diff_eq!(inverse_normal(0.975), 1.96, epsilon = 1e-3);
        assert_abs_diff_eq!(inverse_normal(0.5), 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(inverse_normal(0.025), -1.96, epsilon = 1e-3);
    }

    #[test]
    fn test_student_t_quantile() {
        assert_abs_diff_eq!(student_t_quantile(0.975, 10.0), 2.228, epsilon = 0.01);
    }

    #[test]
    fn test_clip_pass_never_empties() {
        let mut v = vec![1.0f32, 2.0, 3.0];
        let mut out = Combined::default();
        let kept = clip_pass(&mut v, 3, &mut out, |_, _| Verdict::High);
        assert_eq!(kept, 3);
        assert_eq!(out.high, 0);
        assert_eq!(v, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_gesd_finds_single_outlier() {
        let mut v = noisy_with_outlier();
        let mut s = Scratch::default();
        let out = reject_mean(&mut v, Rejection::Gesdt, 0.3, 0.05, &mut s);
        assert_eq!((out.low, out.high), (0, 1));
        assert_abs_diff_eq!(out.value, 100.0, epsilon = 1e-4);
    }

    #[test]
    fn test_linear_fit_rejects_high() {
        let mut v = noisy_with_outlier();
        let mut s = Scratch::default();
        let out = reject_mean(&mut v, Rejection::LinearFit, 5.0, 5.0, &mut s);
        assert_eq!(out.high, 1);
        assert_eq!(out.low, 0);
        assert_abs_diff_eq!(out.value, 100.0, epsilon = 1e-4);
    }

    #[test]
    fn test_linear_fit_runs_after_clean_mad_pass() {
        // The MAD pass keeps 124; only the fitted line exposes it.
        let mut v: Vec<f32> = (100..=118).map(|x| x as f32).collect();
        v.push(124.0);
        let mut s = Scratch::default();
        let out = reject_mean(&mut v, Rejection::LinearFit, 3.0, 3.0, &mut s);
        assert_eq!((out.low, out.high), (0, 1));
        assert_abs_diff_eq!(out.value, 109.0, epsilon = 1e-4);
    }

    #[test]
    fn test_linear_fit_keeps_exact_line() {
        let mut v: Vec<f32> = (0..12).map(|x| 10.0 + 2.0 * x as f32).collect();
        let mut s = Scratch::default();
        let out = reject_mean(&mut v, Rejection::LinearFit, 3.0, 3.0, &mut s);
        assert_eq!((out.low, out.high), (0, 0));
        assert_abs_diff_eq!(out.value, 21.0, epsilon = 1e-4);
    }

    #[test]
    fn test_winsorized_rejects_high() {
        let mut v = noisy_with_outlier();
        let mut s = Scratch::default();
        let out = reject_mean(&mut v, Rejection::Winsorized, 3.0, 3.0, &mut s);
        assert_eq!((out.low, out.high), (0, 1));
        assert_abs_diff_eq!(out.value, 100.0, epsilon = 1e-4);
    }

    #[test]
    fn test_winsorized_rejects_low() {
        let mut v = noisy_with_outlier();
        v[9] = -4000.0;
        let mut s = Scratch::default();
        let out = reject_mean(&mut v, Rejection::Winsorized, 3.0, 3.0, &mut s);
        assert_eq!((out.low, out.high), (1, 0));
        assert_abs_diff_eq!(out.value, 100.0, epsilon = 1e-4);
    }

    #[test]
    fn test_winsorized_estimate_bounds_outlier() {
        let mut s = Scratch::default();
        let (centre, sigma) = winsorized_estimate(&noisy_with_outlier(), &mut s);
        assert_abs_diff_eq!(centre, 100.0);
        assert!(sigma > 1.0 && sigma < 2.0, "sigma = {sigma}");
    }

    #[test]
    fn test_sigma_median_replaces_outlier() {
        let mut v = noisy_with_outlier();
        let mut s = Scratch::default();
        let out = reject_mean(&mut v, Rejection::SigmaMedian, 2.0, 2.0, &mut s);
        assert_eq!((out.low, out.high), (0, 1));
        assert_eq!(v.len(), 10);
        assert_eq!(v[9], 100.0);
        assert_abs_diff_eq!(out.value, 100.0, epsilon = 1e-4);
    }

    #[test]
    fn test_sigma_median_counts_both_sides() {
        let mut v = vec![100.0f32, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, -900.0, 1100.0];
        let mut s = Scratch::default();
        let out = reject_mean(&mut v, Rejection::SigmaMedian, 2.0, 2.0, &mut s);
        assert_eq!((out.low, out.high), (1, 1));
        assert!(v.iter().all(|&x| x == 100.0));
        assert_abs_diff_eq!(out.value, 100.0);
    }

    #[test]
    fn test_percentile() {
        let mut v = vec![100.0f32, 100.0, 100.0, 100.0, 100.0, 300.0, 10.0];
        let mut s = Scratch::default();
        let out = reject_mean(&mut v, Rejection::Percentile, 0.2, 0.1, &mut s);
        assert_eq!((out.low, out.high), (1, 1));
        assert_abs_diff_eq!(out.value, 100.0);
    }

    #[test]
    fn test_too_few_samples_are_kept() {
        let mut v = vec![1.0f32, 1.0, 1000.0];
        let mut s = Scratch::default();
        let out = reject_mean(&mut v, Rejection::Sigma, 1.0, 1.0, &mut s);
        assert_eq!((out.low, out.high), (0, 0));
        assert_abs_diff_eq!(out.value, 334.0);
    }
}
