use std::borrow::Cow;

use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::consts::U16_NORM;
use crate::context::ComputeContext;
use crate::error::{Result, StackError};
use crate::stats::{self, ImageStatistics, Region, SharedStats, StatFlags};

/// Element type of a pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleKind {
    U16,
    F32,
}

impl SampleKind {
    pub fn size_of(self) -> usize {
        match self {
            Self::U16 => std::mem::size_of::<u16>(),
            Self::F32 => std::mem::size_of::<f32>(),
        }
    }

    /// Value that maps the sample range onto `[0, 1]`.
    pub fn norm(self) -> f64 {
        match self {
            Self::U16 => U16_NORM,
            Self::F32 => 1.0,
        }
    }
}

impl std::fmt::Display for SampleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::U16 => write!(f, "16-bit"),
            Self::F32 => write!(f, "32-bit float"),
        }
    }
}

/// One channel of one image, row-major with shape `(height, width)`.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelBuffer {
    U16(Array2<u16>),
    F32(Array2<f32>),
}

impl PixelBuffer {
    pub fn zeros(kind: SampleKind, height: usize, width: usize) -> Self {
        match kind {
            SampleKind::U16 => Self::U16(Array2::zeros((height, width))),
            SampleKind::F32 => Self::F32(Array2::zeros((height, width))),
        }
    }

    pub fn kind(&self) -> SampleKind {
        match self {
            Self::U16(_) => SampleKind::U16,
            Self::F32(_) => SampleKind::F32,
        }
    }

    /// `(height, width)`
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::U16(a) => a.dim(),
            Self::F32(a) => a.dim(),
        }
    }

    pub fn height(&self) -> usize {
        self.dim().0
    }

    pub fn width(&self) -> usize {
        self.dim().1
    }

    pub fn len(&self) -> usize {
        let (h, w) = self.dim();
        h * w
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample at `(row, col)` widened to f32.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        match self {
            Self::U16(a) => a[[row, col]] as f32,
            Self::F32(a) => a[[row, col]],
        }
    }

    /// Copy of `count` rows starting at `start`.
    pub fn rows(&self, start: usize, count: usize) -> Self {
        let end = (start + count).min(self.height());
        match self {
            Self::U16(a) => Self::U16(a.slice(s![start..end, ..]).to_owned()),
            Self::F32(a) => Self::F32(a.slice(s![start..end, ..]).to_owned()),
        }
    }

    /// Nearest-neighbour 2x enlargement.
    pub fn upscale2x(&self) -> Self {
        fn grow<T: Copy>(a: &Array2<T>) -> Array2<T> {
            let (h, w) = a.dim();
            Array2::from_shape_fn((h * 2, w * 2), |(r, c)| a[[r / 2, c / 2]])
        }
        match self {
            Self::U16(a) => Self::U16(grow(a)),
            Self::F32(a) => Self::F32(grow(a)),
        }
    }

    pub fn as_u16(&self) -> Option<&Array2<u16>> {
        match self {
            Self::U16(a) => Some(a),
            Self::F32(_) => None,
        }
    }

    pub fn as_f32(&self) -> Option<&Array2<f32>> {
        match self {
            Self::F32(a) => Some(a),
            Self::U16(_) => None,
        }
    }
}

/// Borrow the samples as a flat slice, copying only if the array is not contiguous.
pub(crate) fn contiguous<T: Copy>(a: &Array2<T>) -> Cow<'_, [T]> {
    match a.as_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None => Cow::Owned(a.iter().copied().collect()),
    }
}

/// A decoded image: one buffer per channel plus a statistics slot per channel.
///
/// The statistics slots may be shared with a sequence; any change to the pixel
/// data resets the shared statistics to unknown.
#[derive(Debug)]
pub struct Image {
    channels: Vec<PixelBuffer>,
    /// Exposure time in seconds.
    pub exposure: f64,
    stats: Vec<Option<SharedStats>>,
}

impl Clone for Image {
    /// Copies pixels and metadata; the copy starts with its own empty statistics.
    fn clone(&self) -> Self {
        Self {
            channels: self.channels.clone(),
            exposure: self.exposure,
            stats: vec![None; self.channels.len()],
        }
    }
}

impl Image {
    /// Build an image from channels that share one shape and sample kind.
    pub fn new(channels: Vec<PixelBuffer>) -> Result<Self> {
        let first = channels
            .first()
            .ok_or_else(|| StackError::InvalidInput("image has no channels".into()))?;
        let (dim, kind) = (first.dim(), first.kind());
        if let Some(bad) = channels
            .iter()
            .find(|c| c.dim() != dim || c.kind() != kind)
        {
            return Err(StackError::InvalidInput(format!(
                "channel {:?} {} does not match {:?} {}",
                bad.dim(),
                bad.kind(),
                dim,
                kind
            )));
        }
        let n = channels.len();
        Ok(Self {
            channels,
            exposure: 0.0,
            stats: vec![None; n],
        })
    }

    pub fn mono(buffer: PixelBuffer) -> Self {
        Self {
            channels: vec![buffer],
            exposure: 0.0,
            stats: vec![None],
        }
    }

    pub fn with_exposure(mut self, exposure: f64) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn width(&self) -> usize {
        self.channels[0].width()
    }

    pub fn height(&self) -> usize {
        self.channels[0].height()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn kind(&self) -> SampleKind {
        self.channels[0].kind()
    }

    /// `(height, width, channels)`
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.height(), self.width(), self.channel_count())
    }

    pub fn channel(&self, index: usize) -> Option<&PixelBuffer> {
        self.channels.get(index)
    }

    pub fn channels(&self) -> &[PixelBuffer] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<PixelBuffer> {
        self.channels
    }

    /// Replace a channel's pixels. The new buffer must keep shape and kind.
    pub fn set_channel(&mut self, index: usize, buffer: PixelBuffer) -> Result<()> {
        let current = self.channel_checked(index)?;
        if current.dim() != buffer.dim() || current.kind() != buffer.kind() {
            return Err(StackError::InvalidInput(format!(
                "replacement channel {:?} {} does not match {:?} {}",
                buffer.dim(),
                buffer.kind(),
                current.dim(),
                current.kind()
            )));
        }
        self.channels[index] = buffer;
        self.invalidate_stats(index);
        Ok(())
    }

    /// Edit a channel's pixels in place; cached statistics are reset afterwards.
    pub fn update_channel<F>(&mut self, index: usize, edit: F) -> Result<()>
    where
        F: FnOnce(&mut PixelBuffer),
    {
        self.channel_checked(index)?;
        edit(&mut self.channels[index]);
        self.invalidate_stats(index);
        Ok(())
    }

    /// Handle to the channel's cached statistics, if any were computed or attached.
    pub fn stats_handle(&self, index: usize) -> Option<SharedStats> {
        self.stats.get(index).and_then(|s| s.clone())
    }

    /// Share an existing statistics object with this image.
    pub fn attach_stats(&mut self, index: usize, handle: SharedStats) -> Result<()> {
        self.channel_checked(index)?;
        self.stats[index] = Some(handle);
        Ok(())
    }

    /// Drop this image's reference to the channel's statistics.
    pub fn release_stats(&mut self, index: usize) {
        if let Some(slot) = self.stats.get_mut(index) {
            *slot = None;
        }
    }

    /// Reset the channel's statistics to unknown, keeping the shared object alive.
    pub fn invalidate_stats(&self, index: usize) {
        if let Some(Some(handle)) = self.stats.get(index) {
            stats::write_stats(handle).invalidate();
        }
    }

    /// Cached statistics of a whole channel, computing whatever `flags` asks for
    /// that is not known yet.
    pub fn statistics(
        &mut self,
        index: usize,
        flags: StatFlags,
        ctx: &ComputeContext,
    ) -> Result<ImageStatistics> {
        self.channel_checked(index)?;
        let handle = self.stats[index]
            .get_or_insert_with(stats::new_shared)
            .clone();
        stats::statistics(Some(&self.channels[index]), None, flags, Some(&handle), ctx)
    }

    /// Statistics of a sub-region. Never cached.
    pub fn region_statistics(
        &self,
        index: usize,
        region: Region,
        flags: StatFlags,
        ctx: &ComputeContext,
    ) -> Result<ImageStatistics> {
        let buffer = self.channel_checked(index)?;
        stats::statistics(Some(buffer), Some(region), flags, None, ctx)
    }

    fn channel_checked(&self, index: usize) -> Result<&PixelBuffer> {
        self.channels.get(index).ok_or_else(|| {
            StackError::InvalidInput(format!(
                "channel {index} out of range ({} channels)",
                self.channels.len()
            ))
        })
    }
}
