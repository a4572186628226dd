//! Size-adaptive order statistics on raw sample buffers.
//!
//! Destructive routines take `&mut [T]` and leave the buffer reordered;
//! non-destructive ones take `&[T]`. Callers must not rely on the order of a
//! buffer after handing it to a destructive routine.

pub mod histogram;
pub mod network;
pub mod select;
pub mod sort;

pub use histogram::{histogram_median, median_from_histogram, u16_histogram};
pub use select::{float_median, quantile, select_kth, select_median};
pub use sort::sort_in_place;

use crate::context::ComputeContext;
use crate::error::Result;
use crate::image::{contiguous, PixelBuffer};

/// A numeric sample that order statistics can operate on.
pub trait Sample: Copy + PartialOrd + Send + Sync + 'static {
    fn as_f64(self) -> f64;
}

macro_rules! impl_sample {
    ($($t:ty),*) => {
        $(
            impl Sample for $t {
                #[inline]
                fn as_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_sample!(u8, u16, u32, i32, f32, f64);

/// Median of a whole pixel buffer, leaving it untouched.
///
/// 16-bit data goes through the histogram path; float data is copied and
/// reduced with quickselect.
pub fn median_of(buffer: &PixelBuffer, ctx: &ComputeContext) -> Result<f64> {
    match buffer {
        PixelBuffer::U16(a) => histogram_median(&contiguous(a), ctx),
        PixelBuffer::F32(a) => float_median(&contiguous(a)),
    }
}
