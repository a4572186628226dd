use rayon::prelude::*;

use crate::consts::{PARALLEL_HISTOGRAM_THRESHOLD, U16_HISTOGRAM_BINS};
use crate::context::ComputeContext;
use crate::error::{Result, StackError};

/// Build a 65536-bin histogram of 16-bit samples.
///
/// Large inputs are split into one disjoint chunk per worker; each worker
/// fills a private histogram and the partial histograms are summed in a
/// reduction, so no counter is ever shared between threads.
pub fn u16_histogram(data: &[u16], ctx: &ComputeContext) -> Vec<u64> {
    let workers = ctx.thread_count();
    if workers <= 1 || data.len() < PARALLEL_HISTOGRAM_THRESHOLD {
        let mut hist = vec![0u64; U16_HISTOGRAM_BINS];
        for &v in data {
            hist[v as usize] += 1;
        }
        return hist;
    }

    let chunk = data.len().div_ceil(workers);
    data.par_chunks(chunk)
        .map(|part| {
            let mut hist = vec![0u64; U16_HISTOGRAM_BINS];
            for &v in part {
                hist[v as usize] += 1;
            }
            hist
        })
        .reduce(
            || vec![0u64; U16_HISTOGRAM_BINS],
            |mut acc, part| {
                for (a, p) in acc.iter_mut().zip(part) {
                    *a += p;
                }
                acc
            },
        )
}

/// Median from a histogram holding `n` samples, where bin `i` stands for value `i`.
///
/// Walks the cumulative counts to the bins holding ranks `(n - 1) / 2` and
/// `n / 2` (0-based) and averages them; both ranks coincide for odd `n`.
pub fn median_from_histogram(hist: &[u64], n: usize) -> Result<f64> {
    if n == 0 {
        return Err(StackError::EmptySampleSet);
    }
    let lower_rank = ((n - 1) / 2) as u64;
    let upper_rank = (n / 2) as u64;

    let mut lower = None;
    let mut cumulative = 0u64;
    for (value, &count) in hist.iter().enumerate() {
        cumulative += count;
        if lower.is_none() && cumulative > lower_rank {
            lower = Some(value as f64);
        }
        if cumulative > upper_rank {
            let lower = lower.unwrap_or(value as f64);
            return Ok((lower + value as f64) / 2.0);
        }
    }
    Err(StackError::InvalidInput(format!(
        "histogram holds {cumulative} samples, expected {n}"
    )))
}

/// Median of 16-bit samples in linear time, leaving the buffer untouched.
pub fn histogram_median(data: &[u16], ctx: &ComputeContext) -> Result<f64> {
    if data.is_empty() {
        return Err(StackError::EmptySampleSet);
    }
    let hist = u16_histogram(data, ctx);
    median_from_histogram(&hist, data.len())
}
