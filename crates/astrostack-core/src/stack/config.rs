use serde::{Deserialize, Serialize};

use crate::sequence::FrameFilter;

/// Pixel combination strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackMethod {
    /// Sum of all frames, promoted to float when it overflows 16 bits.
    Sum,
    /// Per-pixel minimum. Pixels no shifted frame covers are 0, not the
    /// type's maximum.
    Min,
    /// Per-pixel maximum.
    Max,
    /// Per-pixel median, optionally normalized.
    Median,
    /// Per-pixel mean after outlier rejection.
    #[default]
    Mean,
}

impl StackMethod {
    /// Whether this method runs block-wise over buffered rows.
    pub fn is_block_based(self) -> bool {
        matches!(self, Self::Median | Self::Mean)
    }
}

impl std::fmt::Display for StackMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sum => write!(f, "Sum"),
            Self::Min => write!(f, "Minimum"),
            Self::Max => write!(f, "Maximum"),
            Self::Median => write!(f, "Median"),
            Self::Mean => write!(f, "Mean"),
        }
    }
}

/// Outlier rejection used by [`StackMethod::Mean`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    None,
    /// Reject samples further from the median than a fraction of it.
    Percentile,
    /// Iterative sigma clipping around the median.
    #[default]
    Sigma,
    /// Sigma clipping that replaces outliers by the median instead of dropping them.
    SigmaMedian,
    /// Sigma clipping with a Winsorized sigma estimate.
    Winsorized,
    /// Clipping against a line fitted through the sorted samples.
    LinearFit,
    /// Generalized extreme Studentized deviate test.
    Gesdt,
}

impl Rejection {
    /// Customary `(low, high)` thresholds.
    ///
    /// For [`Rejection::Gesdt`] these are the maximum outlier fraction and the
    /// significance level.
    pub fn default_thresholds(self) -> (f32, f32) {
        match self {
            Self::None => (0.0, 0.0),
            Self::Percentile => (0.2, 0.1),
            Self::Sigma | Self::SigmaMedian | Self::Winsorized => (3.0, 3.0),
            Self::LinearFit => (5.0, 5.0),
            Self::Gesdt => (0.3, 0.05),
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Percentile => write!(f, "Percentile Clipping"),
            Self::Sigma => write!(f, "Sigma Clipping"),
            Self::SigmaMedian => write!(f, "Median Sigma Clipping"),
            Self::Winsorized => write!(f, "Winsorized Sigma Clipping"),
            Self::LinearFit => write!(f, "Linear Fit Clipping"),
            Self::Gesdt => write!(f, "Generalized Extreme Studentized Deviate"),
        }
    }
}

/// Frame normalization applied before median or mean combination.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalization {
    #[default]
    None,
    Additive,
    Multiplicative,
    AdditiveScaling,
    MultiplicativeScaling,
}

impl std::fmt::Display for Normalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Additive => write!(f, "Additive"),
            Self::Multiplicative => write!(f, "Multiplicative"),
            Self::AdditiveScaling => write!(f, "Additive + Scaling"),
            Self::MultiplicativeScaling => write!(f, "Multiplicative + Scaling"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub method: StackMethod,
    #[serde(default)]
    pub rejection: Rejection,
    #[serde(default = "default_sig")]
    pub sig_low: f32,
    #[serde(default = "default_sig")]
    pub sig_high: f32,
    #[serde(default)]
    pub normalization: Normalization,
    /// Use the one-pass robust estimator for normalization coefficients.
    #[serde(default = "default_true")]
    pub fast_normalization: bool,
    /// Enlarge frames 2x (nearest neighbour) before combining.
    #[serde(default)]
    pub upscale: bool,
    #[serde(default)]
    pub filter: FrameFilter,
    /// Always produce a float result.
    #[serde(default)]
    pub force_float: bool,
}

fn default_sig() -> f32 {
    3.0
}

fn default_true() -> bool {
    true
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            method: StackMethod::default(),
            rejection: Rejection::default(),
            sig_low: default_sig(),
            sig_high: default_sig(),
            normalization: Normalization::default(),
            fast_normalization: true,
            upscale: false,
            filter: FrameFilter::default(),
            force_float: false,
        }
    }
}

impl StackConfig {
    /// A config for `method` with every other field at its default.
    pub fn with_method(method: StackMethod) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    /// Set the rejection and its customary thresholds.
    pub fn with_rejection(mut self, rejection: Rejection) -> Self {
        let (low, high) = rejection.default_thresholds();
        self.rejection = rejection;
        self.sig_low = low;
        self.sig_high = high;
        self
    }

    pub(crate) fn upscale_factor(&self) -> usize {
        if self.upscale {
            2
        } else {
            1
        }
    }
}
