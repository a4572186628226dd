//! Multi-frame combination.
//!
//! [`stack_sequence`] walks `Init -> Normalize -> Upscale -> Combine ->
//! Finalize`. Sum, minimum and maximum accumulate whole frames one at a time;
//! median and mean read blocks of rows from every frame so memory stays within
//! the context's ceiling.

pub mod block;
pub mod budget;
pub mod config;
pub mod minmax;
pub mod normalize;
pub mod rejection;
pub mod sum;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array2;
use num_traits::Bounded;
use rayon::prelude::*;
use tracing::{error, info};

use crate::consts::{MIN_STACK_FRAMES, PARALLEL_PIXEL_THRESHOLD};
use crate::context::ComputeContext;
use crate::error::{Result, StackError};
use crate::image::{Image, PixelBuffer, SampleKind};
use crate::order::Sample;
use crate::sequence::{FrameSource, Sequence, Shift};

pub use budget::rows_in_memory;
pub use config::{Normalization, Rejection, StackConfig, StackMethod};
pub use normalize::Coefficients;
pub use rejection::Combined;

/// Stage of a stacking run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackState {
    Init,
    Normalize,
    Upscale,
    Combine,
    Finalize,
}

impl std::fmt::Display for StackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "Preparing"),
            Self::Normalize => write!(f, "Normalizing"),
            Self::Upscale => write!(f, "Upscaling"),
            Self::Combine => write!(f, "Combining"),
            Self::Finalize => write!(f, "Finalizing"),
        }
    }
}

/// Receives progress updates from a stacking run.
///
/// All methods have no-op defaults.
pub trait ProgressReporter: Send + Sync {
    /// A stage has started. `total_items` is frames or blocks, if known.
    fn begin_stage(&self, _state: StackState, _total_items: Option<usize>) {}

    fn advance(&self, _items_done: usize) {}

    fn finish_stage(&self) {}
}

pub struct NoOpReporter;

impl ProgressReporter for NoOpReporter {}

/// Cooperative cancellation flag, cheap to clone across threads.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A finished combination.
#[derive(Clone, Debug)]
pub struct StackResult {
    pub image: Image,
    /// Sum of the exposures of the combined frames, in seconds.
    pub exposure: f64,
    pub frames: usize,
    pub rejected_low: u64,
    pub rejected_high: u64,
}

#[derive(Clone, Debug)]
pub enum StackOutcome {
    Completed(StackResult),
    Cancelled,
}

impl StackOutcome {
    pub fn completed(self) -> Option<StackResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Everything the combiners need to know about the selected frames.
pub(crate) struct StackPlan<'a> {
    pub source: &'a dyn FrameSource,
    /// Selected frame indices, reference first.
    pub frames: Vec<usize>,
    /// `[position][channel]`, already scaled by the upscale factor.
    pub shifts: Vec<Vec<Shift>>,
    /// Output `(height, width, channels)`.
    pub dims: (usize, usize, usize),
    pub kind: SampleKind,
    pub upscale: usize,
}

impl StackPlan<'_> {
    pub fn shift(&self, position: usize, channel: usize) -> Shift {
        self.shifts[position][channel]
    }

    /// Whether any frame lands on output pixel `(y, x)` of `channel`.
    pub fn covers(&self, channel: usize, y: usize, x: usize) -> bool {
        let (h, w, _) = self.dims;
        self.shifts.iter().any(|per_channel| {
            let s = per_channel[channel];
            let sy = y as i64 + s.dy as i64;
            let sx = x as i64 + s.dx as i64;
            sy >= 0 && sy < h as i64 && sx >= 0 && sx < w as i64
        })
    }

    /// Read a whole frame, enlarged if upscaling.
    pub fn read_frame(&self, position: usize) -> Result<Vec<PixelBuffer>> {
        let index = self.frames[position];
        let image = self
            .source
            .read_frame(index)
            .map_err(|e| frame_read_error(index, e))?;
        let channels = image.into_channels();
        let channels = if self.upscale > 1 {
            channels.iter().map(PixelBuffer::upscale2x).collect()
        } else {
            channels
        };
        let (h, w, c) = self.dims;
        if channels.len() != c || channels.iter().any(|b| b.dim() != (h, w)) {
            return Err(StackError::FrameRead {
                index,
                reason: "frame changed shape while stacking".into(),
            });
        }
        Ok(channels)
    }
}

/// Output of one combiner before it is wrapped in an [`Image`].
pub(crate) struct Combination {
    pub channels: Vec<PixelBuffer>,
    pub rejected_low: u64,
    pub rejected_high: u64,
}

/// Wrap a source failure as a read failure of frame `index`.
pub(crate) fn frame_read_error(index: usize, e: StackError) -> StackError {
    match e {
        e @ StackError::FrameRead { .. } => e,
        other => StackError::FrameRead {
            index,
            reason: other.to_string(),
        },
    }
}

/// Sample types the combiners accumulate natively.
pub(crate) trait StackSample: Sample + Bounded + Default {
    fn array(buffer: &PixelBuffer) -> Option<&Array2<Self>>;
    fn wrap(a: Array2<Self>) -> PixelBuffer;
}

impl StackSample for u16 {
    fn array(buffer: &PixelBuffer) -> Option<&Array2<Self>> {
        buffer.as_u16()
    }

    fn wrap(a: Array2<Self>) -> PixelBuffer {
        PixelBuffer::U16(a)
    }
}

impl StackSample for f32 {
    fn array(buffer: &PixelBuffer) -> Option<&Array2<Self>> {
        buffer.as_f32()
    }

    fn wrap(a: Array2<Self>) -> PixelBuffer {
        PixelBuffer::F32(a)
    }
}

/// Fold a shifted frame into a row-major accumulator of the same shape.
///
/// Output pixel `(y, x)` receives source pixel `(y + dy, x + dx)`; output
/// pixels whose source falls outside the frame are left alone.
pub(crate) fn accumulate_shifted<T, A, F>(acc: &mut [A], src: &Array2<T>, shift: Shift, op: F)
where
    T: Copy + Sync,
    A: Send,
    F: Fn(&mut A, T) + Sync,
{
    let (h, w) = src.dim();
    if w == 0 {
        return;
    }
    let body = |(y, row): (usize, &mut [A])| {
        let sy = y as i64 + shift.dy as i64;
        if sy < 0 || sy >= h as i64 {
            return;
        }
        let src_row = src.row(sy as usize);
        for (x, a) in row.iter_mut().enumerate() {
            let sx = x as i64 + shift.dx as i64;
            if sx >= 0 && sx < w as i64 {
                op(a, src_row[sx as usize]);
            }
        }
    };
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        acc.par_chunks_mut(w).enumerate().for_each(&body);
    } else {
        acc.chunks_mut(w).enumerate().for_each(&body);
    }
}

/// Combine the frames of `sequence` selected by `config.filter`.
///
/// Fails before any allocation if fewer than two frames are selected or their
/// layouts differ. Normalization statistics are computed through the sequence
/// cache. A cancelled run returns [`StackOutcome::Cancelled`] and drops its
/// partial results.
pub fn stack_sequence(
    source: &dyn FrameSource,
    sequence: &mut Sequence,
    config: &StackConfig,
    ctx: &ComputeContext,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<StackOutcome> {
    // --- Init ---
    reporter.begin_stage(StackState::Init, None);
    let frames = sequence.select(&config.filter);
    info!(
        frames = frames.len(),
        method = %config.method,
        rejection = %config.rejection,
        normalization = %config.normalization,
        "Stacking"
    );
    if frames.len() < MIN_STACK_FRAMES {
        error!(found = frames.len(), "Not enough frames to stack");
        return Err(StackError::NotEnoughFrames {
            found: frames.len(),
            required: MIN_STACK_FRAMES,
        });
    }

    let reference = source
        .frame_layout(frames[0])
        .map_err(|e| frame_read_error(frames[0], e))?;
    let mut exposure = 0.0;
    for &index in &frames {
        let layout = source
            .frame_layout(index)
            .map_err(|e| frame_read_error(index, e))?;
        if layout.dims() != reference.dims() {
            error!(frame = index, "Frame dimensions differ from the reference");
            return Err(StackError::DimensionMismatch {
                index,
                expected: reference.dims(),
                found: layout.dims(),
            });
        }
        if layout.kind != reference.kind {
            return Err(StackError::InvalidInput(format!(
                "frame {index} is {} but the reference is {}",
                layout.kind, reference.kind
            )));
        }
        exposure += layout.exposure;
    }
    let channels = reference.channels;
    if sequence.channels() != channels {
        return Err(StackError::InvalidInput(format!(
            "sequence has {} channels but frames have {channels}",
            sequence.channels()
        )));
    }
    reporter.finish_stage();

    // --- Normalize ---
    let coefficients = if config.method.is_block_based() {
        if config.normalization != Normalization::None {
            reporter.begin_stage(StackState::Normalize, Some(frames.len()));
            info!(normalization = %config.normalization, "Computing normalization");
        }
        let c = normalize::coefficients(
            source,
            sequence,
            &frames,
            channels,
            config.normalization,
            config.fast_normalization,
            ctx,
        )?;
        if config.normalization != Normalization::None {
            reporter.finish_stage();
        }
        c
    } else {
        Vec::new()
    };
    if cancel.is_cancelled() {
        info!("Stacking cancelled");
        return Ok(StackOutcome::Cancelled);
    }

    // --- Upscale ---
    let factor = config.upscale_factor();
    if factor > 1 {
        reporter.begin_stage(StackState::Upscale, None);
        info!(factor, "Upscaling frames while combining");
        reporter.finish_stage();
    }
    let shifts = frames
        .iter()
        .map(|&index| {
            (0..channels)
                .map(|c| {
                    sequence
                        .frame(index)
                        .map(|f| f.shift(c))
                        .unwrap_or_default()
                        .scaled(factor as i32)
                })
                .collect()
        })
        .collect();
    let plan = StackPlan {
        source,
        frames,
        shifts,
        dims: (reference.height * factor, reference.width * factor, channels),
        kind: reference.kind,
        upscale: factor,
    };

    // --- Combine ---
    let combined = ctx.install(|| match config.method {
        StackMethod::Sum => sum::stack_sum(&plan, config, cancel, reporter),
        StackMethod::Min => minmax::stack_extreme(&plan, minmax::Extreme::Min, cancel, reporter),
        StackMethod::Max => minmax::stack_extreme(&plan, minmax::Extreme::Max, cancel, reporter),
        StackMethod::Median | StackMethod::Mean => {
            block::stack_block(&plan, config, &coefficients, ctx, cancel, reporter)
        }
    })?;
    let combined = match combined {
        Ok(Some(c)) => c,
        Ok(None) => {
            info!("Stacking cancelled");
            return Ok(StackOutcome::Cancelled);
        }
        Err(e) => {
            error!(error = %e, "Stacking failed");
            return Err(e);
        }
    };

    // --- Finalize ---
    reporter.begin_stage(StackState::Finalize, None);
    let image = Image::new(combined.channels)?.with_exposure(exposure);
    info!(
        frames = plan.frames.len(),
        exposure,
        rejected_low = combined.rejected_low,
        rejected_high = combined.rejected_high,
        kind = %image.kind(),
        "Stacking complete"
    );
    reporter.finish_stage();
    Ok(StackOutcome::Completed(StackResult {
        image,
        exposure,
        frames: plan.frames.len(),
        rejected_low: combined.rejected_low,
        rejected_high: combined.rejected_high,
    }))
}
