use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::consts::U16_NORM;
use crate::context::ComputeContext;
use crate::error::{try_alloc, Result, StackError};
use crate::image::{PixelBuffer, SampleKind};

use super::budget::rows_in_memory;
use super::normalize::Coefficients;
use super::rejection::{median_value, reject_mean, Scratch};
use super::{
    frame_read_error, CancelToken, Combination, Normalization, ProgressReporter, StackConfig,
    StackMethod, StackPlan, StackState,
};

/// Rows of one frame channel covering part of a block, in output coordinates.
struct FrameRows {
    buffer: PixelBuffer,
    /// Output-space row of `buffer`'s first row.
    first_row: usize,
}

impl FrameRows {
    #[inline]
    fn sample(&self, y: i64, x: i64, (h, w): (usize, usize)) -> Option<f32> {
        if y < 0 || x < 0 || y >= h as i64 || x >= w as i64 {
            return None;
        }
        let row = (y as usize).checked_sub(self.first_row)?;
        if row >= self.buffer.height() {
            return None;
        }
        Some(self.buffer.get(row, x as usize))
    }
}

/// Read the source rows that output rows `start..end` of `channel` map to.
///
/// `None` when the shifted range misses the frame entirely.
fn load_rows(
    plan: &StackPlan<'_>,
    position: usize,
    channel: usize,
    start: usize,
    end: usize,
) -> Result<Option<FrameRows>> {
    let (h, w, _) = plan.dims;
    let dy = plan.shift(position, channel).dy as i64;
    let lo = (start as i64 + dy).clamp(0, h as i64) as usize;
    let hi = (end as i64 + dy).clamp(0, h as i64) as usize;
    if lo >= hi {
        return Ok(None);
    }

    let f = plan.upscale;
    let (src_start, src_end) = (lo / f, hi.div_ceil(f));
    let index = plan.frames[position];
    let rows = plan
        .source
        .read_rows(index, channel, src_start, src_end - src_start)
        .map_err(|e| frame_read_error(index, e))?;
    if rows.kind() != plan.kind || rows.width() * f != w || rows.height() != src_end - src_start {
        return Err(StackError::FrameRead {
            index,
            reason: format!("rows {src_start}..{src_end} have an unexpected layout"),
        });
    }
    let buffer = if f > 1 { rows.upscale2x() } else { rows };
    Ok(Some(FrameRows {
        buffer,
        first_row: src_start * f,
    }))
}

/// Median or rejected mean, one block of rows at a time.
///
/// Every frame contributes the samples its shift places inside the output;
/// pixels with no sample are 0. The result stays 16-bit only for 16-bit input
/// without normalization; float results of 16-bit input are scaled to `[0, 1]`.
pub(crate) fn stack_block(
    plan: &StackPlan<'_>,
    config: &StackConfig,
    coefficients: &[Vec<Coefficients>],
    ctx: &ComputeContext,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<Option<Combination>> {
    let (h, w, c) = plan.dims;
    let n = plan.frames.len();
    let ceiling = ctx.memory.resolve();
    let rows = rows_in_memory(h, w, n, plan.kind.size_of(), ctx.thread_count(), ceiling);
    let blocks_per_channel = h.div_ceil(rows);
    info!(rows, blocks = blocks_per_channel * c, memory = %ctx.memory, "Block stacking");

    let keep_u16 = plan.kind == SampleKind::U16
        && config.normalization == Normalization::None
        && !config.force_float;
    let identity = vec![Coefficients::IDENTITY; c];

    reporter.begin_stage(StackState::Combine, Some(blocks_per_channel * c));
    let mut channels = Vec::with_capacity(c);
    let (mut rejected_low, mut rejected_high) = (0u64, 0u64);
    let mut done = 0;
    for channel in 0..c {
        let mut out = try_alloc(h * w, 0.0f32)?;
        let (mut low, mut high) = (0u64, 0u64);

        for start in (0..h).step_by(rows) {
            let end = (start + rows).min(h);
            let mut loaded = Vec::with_capacity(n);
            for position in 0..n {
                if cancel.is_cancelled() {
                    return Ok(None);
                }
                loaded.push(load_rows(plan, position, channel, start, end)?);
            }

            let (l, hh) = out[start * w..end * w]
                .par_chunks_mut(w)
                .enumerate()
                .map_init(
                    || (Scratch::default(), Vec::with_capacity(n)),
                    |(scratch, samples), (r, row)| {
                        let y = (start + r) as i64;
                        let (mut low, mut high) = (0u64, 0u64);
                        for (x, px) in row.iter_mut().enumerate() {
                            samples.clear();
                            for (position, frame) in loaded.iter().enumerate() {
                                let Some(frame) = frame else { continue };
                                let s = plan.shift(position, channel);
                                let sample = frame.sample(
                                    y + s.dy as i64,
                                    x as i64 + s.dx as i64,
                                    (h, w),
                                );
                                if let Some(v) = sample {
                                    let k = coefficients
                                        .get(position)
                                        .unwrap_or(&identity)[channel];
                                    samples.push(k.apply(v));
                                }
                            }
                            if samples.is_empty() {
                                continue;
                            }
                            *px = match config.method {
                                StackMethod::Median => median_value(samples),
                                _ => {
                                    let r = reject_mean(
                                        samples,
                                        config.rejection,
                                        config.sig_low,
                                        config.sig_high,
                                        scratch,
                                    );
                                    low += r.low as u64;
                                    high += r.high as u64;
                                    r.value
                                }
                            };
                        }
                        (low, high)
                    },
                )
                .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1));
            low += l;
            high += hh;
            done += 1;
            reporter.advance(done);
        }

        debug!(channel, rejected_low = low, rejected_high = high, "Channel combined");
        rejected_low += low;
        rejected_high += high;
        channels.push(to_buffer(out, h, w, plan.kind, keep_u16)?);
    }
    reporter.finish_stage();

    Ok(Some(Combination {
        channels,
        rejected_low,
        rejected_high,
    }))
}

fn to_buffer(
    data: Vec<f32>,
    h: usize,
    w: usize,
    kind: SampleKind,
    keep_u16: bool,
) -> Result<PixelBuffer> {
    let shape_err = |e: ndarray::ShapeError| StackError::InvalidInput(e.to_string());
    if keep_u16 {
        let out: Vec<u16> = data
            .par_iter()
            .map(|&v| v.round().clamp(0.0, u16::MAX as f32) as u16)
            .collect();
        return Array2::from_shape_vec((h, w), out)
            .map(PixelBuffer::U16)
            .map_err(shape_err);
    }
    let out = match kind {
        SampleKind::U16 => data.par_iter().map(|&v| (v as f64 / U16_NORM) as f32).collect(),
        SampleKind::F32 => data,
    };
    Array2::from_shape_vec((h, w), out)
        .map(PixelBuffer::F32)
        .map_err(shape_err)
}
