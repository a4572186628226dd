/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Below this many elements the quicksort switches to insertion sort.
pub const INSERTION_SORT_THRESHOLD: usize = 32;

/// Largest buffer handled by the hand-unrolled sorting networks.
pub const SORTING_NETWORK_MAX: usize = 9;

/// Number of bins for 16-bit histograms.
pub const U16_HISTOGRAM_BINS: usize = 65_536;

/// Minimum sample count to build the histogram median with several workers.
pub const PARALLEL_HISTOGRAM_THRESHOLD: usize = 1 << 20;

/// Normalization value of 16-bit images: maps samples to [0, 1].
pub const U16_NORM: f64 = 65_535.0;

/// Tukey biweight tuning constant, in units of MAD.
pub const BWMV_TUNING: f64 = 9.0;

/// IKSS window half-width, in units of the current scale.
pub const IKSS_CLIP: f64 = 4.0;

/// Scale below which IKSS converges to a zero scale.
///
/// Expressed in normalised units (samples mapped to `[0, 1]`), so it sits
/// above f32 rounding of the mapped samples rather than at 2e-23.
pub const IKSS_SCALE_FLOOR: f64 = 2e-6;

/// Relative scale change below which IKSS is converged.
///
/// Tighter than the customary 1e-5; costs one or two extra iterations at most.
pub const IKSS_CONVERGENCE: f64 = 1e-6;

/// Empirical bias correction applied to the converged IKSS scale.
pub const IKSS_CORRECTION: f64 = 0.991;

/// Hard trim used by the one-pass IKSS variant, in units of MAD.
pub const IKSS_LITE_CLIP: f64 = 6.0;

/// `1 / Phi^-1(3/4)`: converts MAD to a normal standard deviation.
pub const MAD_TO_SIGMA: f64 = 1.482_602_2;

/// Rejection threshold used by the robust mean, in standard deviations.
pub const ROBUST_MEAN_CLIP: f64 = 3.0;

/// Minimum number of sky samples for a background estimate.
pub const MIN_SKY_PIXELS: usize = 5;

/// Minimum number of frames a combination needs.
pub const MIN_STACK_FRAMES: usize = 2;

/// Fraction of the image height buffered when no memory ceiling resolves.
pub const DEFAULT_ROWS_DIVISOR: usize = 4;

/// Per-pixel rejection stops once this few samples remain.
pub const MIN_REJECTION_SAMPLES: usize = 3;

/// Huber constant bounding the Winsorized sample set, in sigma.
pub const WINSORIZE_HUBER: f64 = 1.5;

/// Bias correction of the Winsorized standard deviation.
pub const WINSORIZE_CORRECTION: f64 = 1.134;

/// Relative sigma change below which Winsorization is converged.
pub const WINSORIZE_CONVERGENCE: f64 = 5e-4;

pub const WINSORIZE_MAX_ITERATIONS: usize = 50;

/// Mean absolute line-fit residual, relative to the mean sample magnitude,
/// below which the survivors lie on the line and fitting stops.
pub const LINEAR_FIT_RESIDUAL_FLOOR: f64 = 1e-9;
