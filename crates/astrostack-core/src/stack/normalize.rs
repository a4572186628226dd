use tracing::debug;

use crate::context::ComputeContext;
use crate::error::{Result, StackError};
use crate::sequence::{FrameSource, Sequence};
use crate::stats::StatFlags;

use super::config::Normalization;

/// Affine correction `gain * v + offset` applied to one frame channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coefficients {
    pub gain: f64,
    pub offset: f64,
}

impl Coefficients {
    pub const IDENTITY: Self = Self {
        gain: 1.0,
        offset: 0.0,
    };

    /// Coefficients bringing a frame with `(location, scale)` onto the reference.
    ///
    /// A zero location or scale leaves the corresponding factor at 1.
    pub fn between(
        mode: Normalization,
        reference: (f64, f64),
        frame: (f64, f64),
    ) -> Self {
        let (l0, s0) = reference;
        let (li, si) = frame;
        let level = if li != 0.0 { l0 / li } else { 1.0 };
        let spread = if si != 0.0 { s0 / si } else { 1.0 };
        match mode {
            Normalization::None => Self::IDENTITY,
            Normalization::Additive => Self {
                gain: 1.0,
                offset: l0 - li,
            },
            Normalization::Multiplicative => Self {
                gain: level,
                offset: 0.0,
            },
            Normalization::AdditiveScaling => Self {
                gain: spread,
                offset: l0 - li * spread,
            },
            // ((v - li) * spread + li) * level
            Normalization::MultiplicativeScaling => Self {
                gain: spread * level,
                offset: li * (1.0 - spread) * level,
            },
        }
    }

    #[inline]
    pub fn apply(&self, v: f32) -> f32 {
        (self.gain * v as f64 + self.offset) as f32
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

/// Normalization coefficients for `frames`, indexed `[position][channel]`.
///
/// Location and scale come from the sequence statistics cache (computed on
/// first use); the first selected frame is the reference.
pub(crate) fn coefficients(
    source: &dyn FrameSource,
    sequence: &mut Sequence,
    frames: &[usize],
    channels: usize,
    mode: Normalization,
    fast: bool,
    ctx: &ComputeContext,
) -> Result<Vec<Vec<Coefficients>>> {
    if mode == Normalization::None {
        return Ok(vec![vec![Coefficients::IDENTITY; channels]; frames.len()]);
    }
    let flags = if fast {
        StatFlags::IKSS_LITE
    } else {
        StatFlags::IKSS
    };

    let mut estimates = Vec::with_capacity(frames.len());
    for &index in frames {
        let mut per_channel = Vec::with_capacity(channels);
        for channel in 0..channels {
            let stats = sequence.statistics(source, index, channel, flags, ctx)?;
            let pair = stats
                .location_scale()
                .ok_or(StackError::StatisticsUnavailable("IKSS_LITE"))?;
            per_channel.push(pair);
        }
        estimates.push(per_channel);
    }

    let Some(reference) = estimates.first().cloned() else {
        return Ok(Vec::new());
    };
    let out = estimates
        .iter()
        .zip(frames)
        .map(|(per_channel, &index)| {
            let coeffs: Vec<_> = per_channel
                .iter()
                .zip(&reference)
                .map(|(&frame, &reference)| Coefficients::between(mode, reference, frame))
                .collect();
            debug!(frame = index, gain = coeffs[0].gain, offset = coeffs[0].offset, "Normalization");
            coeffs
        })
        .collect();
    Ok(out)
}
