use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    ImageError(#[from] ::image::ImageError),

    #[error("Empty sample set")]
    EmptySampleSet,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not enough frames to stack: found {found}, need at least {required}")]
    NotEnoughFrames { found: usize, required: usize },

    #[error("Frame {index} has dimensions {found:?}, expected {expected:?}")]
    DimensionMismatch {
        index: usize,
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    #[error("Failed to read frame {index}: {reason}")]
    FrameRead { index: usize, reason: String },

    #[error("Allocation of {bytes} bytes failed")]
    Allocation { bytes: usize },

    #[error("Statistic '{0}' is not cached and no pixel data is available")]
    StatisticsUnavailable(&'static str),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, StackError>;

/// Allocate a zero-initialized vector, reporting failure instead of aborting.
pub(crate) fn try_alloc<T: Clone>(len: usize, fill: T) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| StackError::Allocation {
        bytes: len.saturating_mul(std::mem::size_of::<T>()),
    })?;
    v.resize(len, fill);
    Ok(v)
}
