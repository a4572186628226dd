//! Per-channel image statistics with lazy, cached computation.
//!
//! An [`ImageStatistics`] value holds every statistic as an `Option`; `None`
//! means "not computed yet", so zero or negative results are never confused
//! with missing ones. The object is shared through [`SharedStats`] between an
//! image's channel slot and its sequence's slot.

pub mod basic;
pub mod compute;
pub mod robust;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StackError};

pub use compute::statistics;
pub use robust::{avg_dev, bwmv, ikss, ikss_lite, mad, robust_mean, sky_background};

bitflags! {
    /// Which statistics a request needs.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct StatFlags: u16 {
        /// Minimum and maximum.
        const MINMAX = 1 << 0;
        /// Pixel counts, mean, sigma and background noise.
        const BASIC = 1 << 1;
        const MEDIAN = 1 << 2;
        const AVGDEV = 1 << 3;
        const MAD = 1 << 4;
        /// Square root of the biweight midvariance.
        const BWMV = 1 << 5;
        /// Iterative robust location/scale.
        const IKSS = 1 << 6;
        /// One-pass robust location/scale for large float buffers.
        const IKSS_LITE = 1 << 7;
        /// Normalization value.
        const NORM = 1 << 8;

        const MAIN = Self::MINMAX.bits() | Self::BASIC.bits() | Self::MEDIAN.bits()
            | Self::MAD.bits() | Self::BWMV.bits() | Self::NORM.bits();
        const ALL = Self::MAIN.bits() | Self::AVGDEV.bits() | Self::IKSS.bits();
    }
}

impl StatFlags {
    /// Flags whose inputs must be known before these can be computed.
    pub fn with_dependencies(self) -> Self {
        let mut out = self;
        if self.intersects(Self::AVGDEV | Self::MAD | Self::BWMV | Self::IKSS_LITE) {
            out |= Self::MEDIAN;
        }
        if self.intersects(Self::BWMV | Self::IKSS_LITE) {
            out |= Self::MAD;
        }
        out
    }

    /// Human-readable name of the lowest flag set, for error messages.
    pub fn first_name(self) -> &'static str {
        self.iter_names().next().map(|(name, _)| name).unwrap_or("NONE")
    }
}

/// Which estimator produced the cached location/scale pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Estimator {
    Ikss,
    IkssLite,
}

/// Cached statistics of one channel of one image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageStatistics {
    /// Number of samples in the channel or region.
    pub total: Option<usize>,
    /// Number of valid (non-zero, finite) samples.
    pub ngoodpix: Option<usize>,
    pub mean: Option<f64>,
    pub sigma: Option<f64>,
    pub bgnoise: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub norm_value: Option<f64>,
    pub median: Option<f64>,
    pub avg_dev: Option<f64>,
    pub mad: Option<f64>,
    pub sqrt_bwmv: Option<f64>,
    pub location: Option<f64>,
    pub scale: Option<f64>,
    pub estimator: Option<Estimator>,
}

impl ImageStatistics {
    /// Reset every field to unknown.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    /// The subset of `flags` not yet known.
    pub fn missing(&self, flags: StatFlags) -> StatFlags {
        let mut missing = StatFlags::empty();
        if flags.contains(StatFlags::MINMAX) && (self.min.is_none() || self.max.is_none()) {
            missing |= StatFlags::MINMAX;
        }
        if flags.contains(StatFlags::BASIC)
            && (self.total.is_none()
                || self.ngoodpix.is_none()
                || self.mean.is_none()
                || self.sigma.is_none()
                || self.bgnoise.is_none())
        {
            missing |= StatFlags::BASIC;
        }
        if flags.contains(StatFlags::MEDIAN) && self.median.is_none() {
            missing |= StatFlags::MEDIAN;
        }
        if flags.contains(StatFlags::AVGDEV) && self.avg_dev.is_none() {
            missing |= StatFlags::AVGDEV;
        }
        if flags.contains(StatFlags::MAD) && self.mad.is_none() {
            missing |= StatFlags::MAD;
        }
        if flags.contains(StatFlags::BWMV) && self.sqrt_bwmv.is_none() {
            missing |= StatFlags::BWMV;
        }
        if flags.contains(StatFlags::NORM) && self.norm_value.is_none() {
            missing |= StatFlags::NORM;
        }
        let robust_known = self.location.is_some() && self.scale.is_some();
        if flags.contains(StatFlags::IKSS)
            && !(robust_known && self.estimator == Some(Estimator::Ikss))
        {
            missing |= StatFlags::IKSS;
        }
        if flags.contains(StatFlags::IKSS_LITE) && !robust_known {
            missing |= StatFlags::IKSS_LITE;
        }
        missing
    }

    /// Copy every field `other` knows and `self` does not.
    pub fn fill_from(&mut self, other: &Self) {
        macro_rules! fill {
            ($($field:ident),*) => {
                $( if self.$field.is_none() { self.$field = other.$field; } )*
            };
        }
        fill!(
            total, ngoodpix, mean, sigma, bgnoise, min, max, norm_value, median, avg_dev, mad,
            sqrt_bwmv
        );
        let upgrade = other.estimator == Some(Estimator::Ikss)
            && self.estimator != Some(Estimator::Ikss);
        if self.location.is_none() || upgrade {
            self.location = other.location;
            self.scale = other.scale;
            self.estimator = other.estimator;
        }
    }

    /// Robust location/scale, falling back to median and `sqrt_bwmv`.
    pub fn location_scale(&self) -> Option<(f64, f64)> {
        match (self.location, self.scale) {
            (Some(l), Some(s)) => Some((l, s)),
            _ => Some((self.median?, self.sqrt_bwmv?)),
        }
    }
}

/// Reference-counted statistics shared between an image and its sequence.
///
/// Only one orchestration thread computes statistics at a time; the lock
/// guards against torn reads from display code.
pub type SharedStats = Arc<RwLock<ImageStatistics>>;

pub fn new_shared() -> SharedStats {
    Arc::new(RwLock::new(ImageStatistics::default()))
}

pub(crate) fn read_stats(handle: &SharedStats) -> RwLockReadGuard<'_, ImageStatistics> {
    handle.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_stats(handle: &SharedStats) -> RwLockWriteGuard<'_, ImageStatistics> {
    handle.write().unwrap_or_else(PoisonError::into_inner)
}

/// Rectangular sub-region of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check the region lies inside a `(height, width)` channel.
    pub fn validate(&self, dim: (usize, usize)) -> Result<()> {
        let (h, w) = dim;
        if self.width == 0
            || self.height == 0
            || self.x + self.width > w
            || self.y + self.height > h
        {
            return Err(StackError::InvalidInput(format!(
                "region {self:?} outside {w}x{h} channel"
            )));
        }
        Ok(())
    }
}
