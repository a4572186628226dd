use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::consts::MAD_TO_SIGMA;
use crate::error::{try_alloc, Result};
use crate::order::{select_median, Sample};

/// Location-free summary of a sample set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BasicStats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1 denominator).
    pub sigma: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Copy)]
struct Accumulator {
    count: usize,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    const EMPTY: Self = Self {
        count: 0,
        sum: 0.0,
        sum_sq: 0.0,
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
    };

    fn push(mut self, v: f64) -> Self {
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self
    }

    fn merge(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            sum_sq: self.sum_sq + other.sum_sq,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Count, mean, standard deviation and extremes of `data`. `None` when empty.
///
/// Sums are reduced in f64 across workers; the result may differ from a
/// sequential pass in the last bits.
pub fn basic_stats<T: Sample>(data: &[T]) -> Option<BasicStats> {
    let acc = data
        .par_iter()
        .fold(|| Accumulator::EMPTY, |acc, &v| acc.push(v.as_f64()))
        .reduce(|| Accumulator::EMPTY, Accumulator::merge);
    if acc.count == 0 {
        return None;
    }
    let n = acc.count as f64;
    let mean = acc.sum / n;
    let sigma = if acc.count > 1 {
        ((acc.sum_sq - n * mean * mean) / (n - 1.0)).max(0.0).sqrt()
    } else {
        0.0
    };
    Some(BasicStats {
        count: acc.count,
        mean,
        sigma,
        min: acc.min,
        max: acc.max,
    })
}

/// Background noise from second differences along rows.
///
/// `1.4826 / sqrt(6) * median(|2 x[i] - x[i-2] - x[i+2]|)`, which cancels
/// smooth gradients and star profiles wider than a couple of pixels. Triples
/// touching a zero (invalid) sample are skipped. Returns 0 when no triple is
/// available.
pub fn background_noise<T: Sample>(view: ArrayView2<'_, T>) -> Result<f64> {
    let (h, w) = view.dim();
    if w < 5 || h == 0 {
        return Ok(0.0);
    }
    let per_row = w - 4;
    let mut diffs = try_alloc(h * per_row, f32::NAN)?;
    diffs
        .par_chunks_mut(per_row)
        .enumerate()
        .for_each(|(r, out)| {
            let row = view.row(r);
            for (i, d) in out.iter_mut().enumerate() {
                let (a, b, c) = (row[i].as_f64(), row[i + 2].as_f64(), row[i + 4].as_f64());
                if a != 0.0 && b != 0.0 && c != 0.0 {
                    *d = (2.0 * b - a - c).abs() as f32;
                }
            }
        });
    diffs.retain(|d| !d.is_nan());
    if diffs.is_empty() {
        return Ok(0.0);
    }
    let med = select_median(&mut diffs)?;
    Ok(MAD_TO_SIGMA / 6f64.sqrt() * med)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_basic_stats_small() {
        let s = basic_stats(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(s.count, 4);
        assert!((s.mean - 2.5).abs() < 1e-12);
        assert!((s.sigma - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!((s.min, s.max), (1.0, 4.0));
    }

    #[test]
    fn test_basic_stats_empty() {
        assert!(basic_stats::<u16>(&[]).is_none());
    }

    #[test]
    fn test_noise_of_linear_ramp_is_zero() {
        let a = Array2::from_shape_fn((4, 16), |(r, c)| (100 + r * 16 + c) as u16);
        assert_eq!(background_noise(a.view()).unwrap(), 0.0);
    }
}
