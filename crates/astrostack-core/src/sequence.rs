use serde::{Deserialize, Serialize};

use crate::context::ComputeContext;
use crate::error::{Result, StackError};
use crate::image::{Image, PixelBuffer, SampleKind};
use crate::stats::{self, ImageStatistics, SharedStats, StatFlags};

/// Integer registration shift of one channel, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub dx: i32,
    pub dy: i32,
}

impl Shift {
    pub fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy }
    }

    pub fn scaled(self, factor: i32) -> Self {
        Self {
            dx: self.dx * factor,
            dy: self.dy * factor,
        }
    }
}

/// One frame of a sequence as seen by stacking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    pub index: usize,
    pub included: bool,
    /// One shift per channel; a single entry applies to every channel.
    #[serde(default)]
    pub shifts: Vec<Shift>,
    /// Quality score from registration, higher is better.
    #[serde(default)]
    pub quality: Option<f64>,
}

impl FrameDescriptor {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            included: true,
            shifts: Vec::new(),
            quality: None,
        }
    }

    /// Shift of `channel`, falling back to the first channel's, then to none.
    pub fn shift(&self, channel: usize) -> Shift {
        self.shifts
            .get(channel)
            .or_else(|| self.shifts.first())
            .copied()
            .unwrap_or_default()
    }
}

/// Predicate choosing which frames of a sequence get stacked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum FrameFilter {
    /// Every frame.
    All,
    /// Frames flagged as included.
    #[default]
    Included,
    /// Included frames whose quality is at least this value.
    MinQuality(f64),
    /// Exactly these frame indices, in this order.
    Indices(Vec<usize>),
}

/// Shape, sample kind and exposure of a frame, known without its pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameLayout {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub kind: SampleKind,
    pub exposure: f64,
}

impl FrameLayout {
    pub fn of(image: &Image) -> Self {
        Self {
            height: image.height(),
            width: image.width(),
            channels: image.channel_count(),
            kind: image.kind(),
            exposure: image.exposure,
        }
    }

    /// `(height, width, channels)`
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }
}

/// Supplies decoded frames to stacking. Implemented by the I/O layer.
pub trait FrameSource: Send + Sync {
    fn frame_count(&self) -> usize;

    fn read_frame(&self, index: usize) -> Result<Image>;

    /// Layout of a frame. The default decodes the whole frame.
    fn frame_layout(&self, index: usize) -> Result<FrameLayout> {
        self.read_frame(index).map(|image| FrameLayout::of(&image))
    }

    /// Rows `start..start + count` of one channel.
    fn read_rows(
        &self,
        index: usize,
        channel: usize,
        start: usize,
        count: usize,
    ) -> Result<PixelBuffer> {
        let image = self.read_frame(index)?;
        let buffer = image.channel(channel).ok_or_else(|| StackError::FrameRead {
            index,
            reason: format!("no channel {channel}"),
        })?;
        Ok(buffer.rows(start, count))
    }
}

/// Frames held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySequence {
    images: Vec<Image>,
}

impl MemorySequence {
    pub fn new(images: Vec<Image>) -> Self {
        Self { images }
    }

    pub fn push(&mut self, image: Image) {
        self.images.push(image);
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }
}

impl FrameSource for MemorySequence {
    fn frame_count(&self) -> usize {
        self.images.len()
    }

    fn read_frame(&self, index: usize) -> Result<Image> {
        self.images
            .get(index)
            .cloned()
            .ok_or_else(|| StackError::FrameRead {
                index,
                reason: format!("only {} frames", self.images.len()),
            })
    }

    fn frame_layout(&self, index: usize) -> Result<FrameLayout> {
        self.images
            .get(index)
            .map(FrameLayout::of)
            .ok_or_else(|| StackError::FrameRead {
                index,
                reason: format!("only {} frames", self.images.len()),
            })
    }

    fn read_rows(
        &self,
        index: usize,
        channel: usize,
        start: usize,
        count: usize,
    ) -> Result<PixelBuffer> {
        let buffer = self
            .images
            .get(index)
            .and_then(|img| img.channel(channel))
            .ok_or_else(|| StackError::FrameRead {
                index,
                reason: format!("no frame or channel {channel}"),
            })?;
        Ok(buffer.rows(start, count))
    }
}

/// Ordered frame descriptors plus a statistics slot per frame and channel.
#[derive(Debug, Default)]
pub struct Sequence {
    frames: Vec<FrameDescriptor>,
    channels: usize,
    stats: Vec<Vec<Option<SharedStats>>>,
}

impl Sequence {
    /// `count` included frames with no shift.
    pub fn new(count: usize, channels: usize) -> Self {
        let frames = (0..count).map(FrameDescriptor::new).collect();
        Self {
            frames,
            channels,
            stats: vec![vec![None; channels]; count],
        }
    }

    /// Build from descriptors; `frames[i].index` must equal `i`.
    pub fn from_descriptors(frames: Vec<FrameDescriptor>, channels: usize) -> Result<Self> {
        if let Some((pos, f)) = frames.iter().enumerate().find(|(i, f)| f.index != *i) {
            return Err(StackError::InvalidInput(format!(
                "descriptor at position {pos} has index {}",
                f.index
            )));
        }
        let n = frames.len();
        Ok(Self {
            frames,
            channels,
            stats: vec![vec![None; channels]; n],
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> &[FrameDescriptor] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&FrameDescriptor> {
        self.frames.get(index)
    }

    pub fn frame_mut(&mut self, index: usize) -> Option<&mut FrameDescriptor> {
        self.frames.get_mut(index)
    }

    /// Set the same shift on every channel of a frame.
    pub fn set_shift(&mut self, index: usize, shift: Shift) -> Result<()> {
        let frame = self.frame_checked_mut(index)?;
        frame.shifts = vec![shift];
        Ok(())
    }

    pub fn set_included(&mut self, index: usize, included: bool) -> Result<()> {
        self.frame_checked_mut(index)?.included = included;
        Ok(())
    }

    /// Ordered frame indices that pass `filter`.
    pub fn select(&self, filter: &FrameFilter) -> Vec<usize> {
        match filter {
            FrameFilter::All => (0..self.frames.len()).collect(),
            FrameFilter::Included => self
                .frames
                .iter()
                .filter(|f| f.included)
                .map(|f| f.index)
                .collect(),
            FrameFilter::MinQuality(min) => self
                .frames
                .iter()
                .filter(|f| f.included && f.quality.is_some_and(|q| q >= *min))
                .map(|f| f.index)
                .collect(),
            FrameFilter::Indices(indices) => indices
                .iter()
                .copied()
                .filter(|&i| i < self.frames.len())
                .collect(),
        }
    }

    /// Shared statistics of a frame channel, if the slot is populated.
    pub fn stats_handle(&self, index: usize, channel: usize) -> Option<SharedStats> {
        self.stats.get(index)?.get(channel)?.clone()
    }

    /// Get or create the slot's statistics and share them with `image`.
    pub fn share_stats(
        &mut self,
        index: usize,
        channel: usize,
        image: &mut Image,
    ) -> Result<SharedStats> {
        let handle = self.slot(index, channel)?;
        image.attach_stats(channel, handle.clone())?;
        Ok(handle)
    }

    /// Drop the sequence's reference; the image may keep the object alive.
    pub fn release_stats(&mut self, index: usize, channel: usize) {
        if let Some(slot) = self.stats.get_mut(index).and_then(|s| s.get_mut(channel)) {
            *slot = None;
        }
    }

    /// Statistics served from the cache only.
    pub fn cached_statistics(
        &self,
        index: usize,
        channel: usize,
        flags: StatFlags,
        ctx: &ComputeContext,
    ) -> Result<ImageStatistics> {
        let handle = self.stats_handle(index, channel);
        stats::statistics(None, None, flags, handle.as_ref(), ctx)
    }

    /// Statistics of a frame channel, reading the frame only when the cache
    /// cannot answer.
    pub fn statistics(
        &mut self,
        source: &dyn FrameSource,
        index: usize,
        channel: usize,
        flags: StatFlags,
        ctx: &ComputeContext,
    ) -> Result<ImageStatistics> {
        let handle = self.slot(index, channel)?;
        match stats::statistics(None, None, flags, Some(&handle), ctx) {
            Err(StackError::StatisticsUnavailable(_)) => {}
            other => return other,
        }
        let mut image = source.read_frame(index)?;
        image.attach_stats(channel, handle)?;
        image.statistics(channel, flags, ctx)
    }

    fn slot(&mut self, index: usize, channel: usize) -> Result<SharedStats> {
        let slot = self
            .stats
            .get_mut(index)
            .and_then(|s| s.get_mut(channel))
            .ok_or_else(|| {
                StackError::InvalidInput(format!("no frame {index} channel {channel}"))
            })?;
        Ok(slot.get_or_insert_with(stats::new_shared).clone())
    }

    fn frame_checked_mut(&mut self, index: usize) -> Result<&mut FrameDescriptor> {
        let len = self.frames.len();
        self.frames
            .get_mut(index)
            .ok_or_else(|| StackError::InvalidInput(format!("frame {index} out of range ({len})")))
    }
}
