use crate::error::{try_alloc, Result, StackError};

use super::network;
use super::sort::hoare_partition;
use super::Sample;

/// Find the `k`-th smallest sample (0-based) with iterative Hoare quickselect.
///
/// Destructive: on return `data[k]` holds the result, everything before it is
/// `<=` and everything after it is `>=`.
pub fn select_kth<T: Sample>(data: &mut [T], k: usize) -> Result<T> {
    if data.is_empty() {
        return Err(StackError::EmptySampleSet);
    }
    if k >= data.len() {
        return Err(StackError::InvalidInput(format!(
            "rank {k} out of range for {} samples",
            data.len()
        )));
    }

    let mut lo = 0usize;
    let mut hi = data.len();
    while hi - lo > 1 {
        let window = &mut data[lo..hi];
        let mid = window.len() / 2;
        let (left_end, right_start) = hoare_partition(window, mid);
        let rank = k - lo;
        if rank < left_end {
            hi = lo + left_end;
        } else if rank >= right_start {
            lo += right_start;
        } else {
            break;
        }
    }
    Ok(data[k])
}

/// Median of a buffer, reordering it.
///
/// Buffers of up to nine samples go through the sorting networks; larger ones
/// through quickselect on `k = n / 2`. Even lengths average the two central
/// samples.
pub fn select_median<T: Sample>(data: &mut [T]) -> Result<f64> {
    let n = data.len();
    if n == 0 {
        return Err(StackError::EmptySampleSet);
    }
    if network::supports(n) {
        return Ok(network::median_small(data));
    }

    let k = n / 2;
    let upper = select_kth(data, k)?.as_f64();
    if n % 2 == 1 {
        return Ok(upper);
    }
    // After selection everything left of k is <= data[k]; its maximum is rank k-1.
    let lower = data[..k]
        .iter()
        .copied()
        .fold(data[0], |acc, v| if v > acc { v } else { acc })
        .as_f64();
    Ok((lower + upper) / 2.0)
}

/// Median of float samples without touching the input.
pub fn float_median(data: &[f32]) -> Result<f64> {
    if data.is_empty() {
        return Err(StackError::EmptySampleSet);
    }
    let mut scratch = try_alloc(data.len(), 0.0f32)?;
    scratch.copy_from_slice(data);
    select_median(&mut scratch)
}

/// Nearest-rank quantile `q` in `[0, 1]` of float samples, without touching the input.
pub fn quantile(data: &[f32], q: f64) -> Result<f64> {
    if data.is_empty() {
        return Err(StackError::EmptySampleSet);
    }
    if !(0.0..=1.0).contains(&q) {
        return Err(StackError::InvalidInput(format!(
            "quantile {q} outside [0, 1]"
        )));
    }
    let mut scratch = try_alloc(data.len(), 0.0f32)?;
    scratch.copy_from_slice(data);
    let k = ((data.len() - 1) as f64 * q).round() as usize;
    Ok(select_kth(&mut scratch, k)?.as_f64())
}
