use ndarray::Array2;
use tracing::debug;

use crate::error::{try_alloc, Result, StackError};
use crate::image::SampleKind;

use super::{
    accumulate_shifted, CancelToken, Combination, ProgressReporter, StackPlan, StackSample,
    StackState,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extreme {
    Min,
    Max,
}

/// Per-pixel minimum or maximum over the selected frames.
///
/// Pixels that no shifted frame covers are 0 in the result.
pub(crate) fn stack_extreme(
    plan: &StackPlan<'_>,
    extreme: Extreme,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<Option<Combination>> {
    match plan.kind {
        SampleKind::U16 => run::<u16>(plan, extreme, cancel, reporter),
        SampleKind::F32 => run::<f32>(plan, extreme, cancel, reporter),
    }
}

fn run<T: StackSample>(
    plan: &StackPlan<'_>,
    extreme: Extreme,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<Option<Combination>> {
    let (h, w, c) = plan.dims;
    let init = match extreme {
        Extreme::Min => T::max_value(),
        Extreme::Max => T::default(),
    };
    let mut acc = Vec::with_capacity(c);
    for _ in 0..c {
        acc.push(try_alloc(h * w, init)?);
    }

    reporter.begin_stage(StackState::Combine, Some(plan.frames.len()));
    for position in 0..plan.frames.len() {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let buffers = plan.read_frame(position)?;
        for (channel, buffer) in buffers.iter().enumerate() {
            let src = T::array(buffer).ok_or_else(|| kind_mismatch(plan, position))?;
            let shift = plan.shift(position, channel);
            match extreme {
                Extreme::Min => accumulate_shifted(&mut acc[channel], src, shift, |a, v| {
                    if v < *a {
                        *a = v;
                    }
                }),
                Extreme::Max => accumulate_shifted(&mut acc[channel], src, shift, |a, v| {
                    if v > *a {
                        *a = v;
                    }
                }),
            }
        }
        debug!(frame = plan.frames[position], "Frame accumulated");
        reporter.advance(position + 1);
    }
    reporter.finish_stage();

    let mut channels = Vec::with_capacity(c);
    for (channel, mut data) in acc.into_iter().enumerate() {
        if extreme == Extreme::Min {
            for (i, v) in data.iter_mut().enumerate() {
                if !plan.covers(channel, i / w, i % w) {
                    *v = T::default();
                }
            }
        }
        let array = Array2::from_shape_vec((h, w), data)
            .map_err(|e| StackError::InvalidInput(e.to_string()))?;
        channels.push(T::wrap(array));
    }
    Ok(Some(Combination {
        channels,
        rejected_low: 0,
        rejected_high: 0,
    }))
}

pub(crate) fn kind_mismatch(plan: &StackPlan<'_>, position: usize) -> StackError {
    StackError::FrameRead {
        index: plan.frames[position],
        reason: format!("expected {} samples", plan.kind),
    }
}
