use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::consts::U16_NORM;
use crate::error::{try_alloc, Result, StackError};
use crate::image::{PixelBuffer, SampleKind};

use super::minmax::kind_mismatch;
use super::{
    accumulate_shifted, CancelToken, Combination, ProgressReporter, StackConfig, StackPlan,
    StackSample, StackState,
};

/// Per-pixel sum over the selected frames.
///
/// 16-bit frames accumulate exactly in 64-bit integers and stay 16-bit when
/// the largest sum fits; otherwise the result is float, with 16-bit sums
/// scaled by `1 / 65535`.
pub(crate) fn stack_sum(
    plan: &StackPlan<'_>,
    config: &StackConfig,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<Option<Combination>> {
    let channels = match plan.kind {
        SampleKind::U16 => {
            let Some(acc) = accumulate::<u16, u64, _>(plan, cancel, reporter, |v| v as u64)? else {
                return Ok(None);
            };
            let peak = acc.iter().flat_map(|a| a.iter()).copied().max().unwrap_or(0);
            if !config.force_float && peak <= u16::MAX as u64 {
                finish(plan, acc, |s| s as u16)?
            } else {
                info!(peak, "Sum exceeds 16 bits, promoting to float");
                finish(plan, acc, |s| (s as f64 / U16_NORM) as f32)?
            }
        }
        SampleKind::F32 => {
            let Some(acc) = accumulate::<f32, f64, _>(plan, cancel, reporter, |v| v as f64)? else {
                return Ok(None);
            };
            finish(plan, acc, |s| s as f32)?
        }
    };
    Ok(Some(Combination {
        channels,
        rejected_low: 0,
        rejected_high: 0,
    }))
}

fn accumulate<T, A, F>(
    plan: &StackPlan<'_>,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
    widen: F,
) -> Result<Option<Vec<Vec<A>>>>
where
    T: StackSample,
    A: Copy + Default + Send + std::ops::AddAssign,
    F: Fn(T) -> A + Sync,
{
    let (h, w, c) = plan.dims;
    let mut acc = Vec::with_capacity(c);
    for _ in 0..c {
        acc.push(try_alloc(h * w, A::default())?);
    }

    reporter.begin_stage(StackState::Combine, Some(plan.frames.len()));
    for position in 0..plan.frames.len() {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let buffers = plan.read_frame(position)?;
        for (channel, buffer) in buffers.iter().enumerate() {
            let src = T::array(buffer).ok_or_else(|| kind_mismatch(plan, position))?;
            accumulate_shifted(&mut acc[channel], src, plan.shift(position, channel), |a, v| {
                *a += widen(v)
            });
        }
        debug!(frame = plan.frames[position], "Frame summed");
        reporter.advance(position + 1);
    }
    reporter.finish_stage();
    Ok(Some(acc))
}

fn finish<A, T, F>(plan: &StackPlan<'_>, acc: Vec<Vec<A>>, narrow: F) -> Result<Vec<PixelBuffer>>
where
    A: Copy + Sync,
    T: StackSample,
    F: Fn(A) -> T + Sync + Send,
{
    let (h, w, _) = plan.dims;
    acc.into_iter()
        .map(|data| {
            let out: Vec<T> = data.par_iter().map(|&s| narrow(s)).collect();
            Array2::from_shape_vec((h, w), out)
                .map(T::wrap)
                .map_err(|e| StackError::InvalidInput(e.to_string()))
        })
        .collect()
}
