use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use astrostack_core::context::MemoryLimit;
use astrostack_core::io::{save_image, FileSequence};
use astrostack_core::sequence::{FrameFilter, FrameSource, Sequence, Shift};
use astrostack_core::stack::{
    stack_sequence, CancelToken, Normalization, ProgressReporter, Rejection, StackMethod,
    StackOutcome, StackState,
};
use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use super::config::JobConfig;
use crate::summary::{print_stack_result, print_stack_summary};

#[derive(Clone, Copy, ValueEnum)]
pub enum MethodArg {
    Sum,
    Min,
    Max,
    Median,
    Mean,
}

impl From<MethodArg> for StackMethod {
    fn from(m: MethodArg) -> Self {
        match m {
            MethodArg::Sum => Self::Sum,
            MethodArg::Min => Self::Min,
            MethodArg::Max => Self::Max,
            MethodArg::Median => Self::Median,
            MethodArg::Mean => Self::Mean,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RejectionArg {
    None,
    Percentile,
    Sigma,
    SigmaMedian,
    Winsorized,
    LinearFit,
    Gesdt,
}

impl From<RejectionArg> for Rejection {
    fn from(r: RejectionArg) -> Self {
        match r {
            RejectionArg::None => Self::None,
            RejectionArg::Percentile => Self::Percentile,
            RejectionArg::Sigma => Self::Sigma,
            RejectionArg::SigmaMedian => Self::SigmaMedian,
            RejectionArg::Winsorized => Self::Winsorized,
            RejectionArg::LinearFit => Self::LinearFit,
            RejectionArg::Gesdt => Self::Gesdt,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum NormalizationArg {
    None,
    Additive,
    Multiplicative,
    AdditiveScaling,
    MultiplicativeScaling,
}

impl From<NormalizationArg> for Normalization {
    fn from(n: NormalizationArg) -> Self {
        match n {
            NormalizationArg::None => Self::None,
            NormalizationArg::Additive => Self::Additive,
            NormalizationArg::Multiplicative => Self::Multiplicative,
            NormalizationArg::AdditiveScaling => Self::AdditiveScaling,
            NormalizationArg::MultiplicativeScaling => Self::MultiplicativeScaling,
        }
    }
}

/// Parse `index:dx,dy`.
fn parse_shift(s: &str) -> std::result::Result<(usize, Shift), String> {
    let (index, offsets) = s
        .split_once(':')
        .ok_or_else(|| format!("expected index:dx,dy, got '{s}'"))?;
    let (dx, dy) = offsets
        .split_once(',')
        .ok_or_else(|| format!("expected dx,dy after ':', got '{offsets}'"))?;
    let parse = |v: &str| v.trim().parse::<i32>().map_err(|e| format!("'{v}': {e}"));
    let index = index
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("'{index}': {e}"))?;
    Ok((index, Shift::new(parse(dx)?, parse(dy)?)))
}

#[derive(Args)]
pub struct StackArgs {
    /// Input image files, the first is the reference
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Job config file (TOML); command-line options override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Combination method
    #[arg(long, value_enum)]
    pub method: Option<MethodArg>,

    /// Rejection for mean stacking
    #[arg(long, value_enum)]
    pub rejection: Option<RejectionArg>,

    /// Low rejection threshold (max outlier fraction for gesdt)
    #[arg(long)]
    pub sig_low: Option<f32>,

    /// High rejection threshold (significance for gesdt)
    #[arg(long)]
    pub sig_high: Option<f32>,

    /// Normalization for median and mean stacking
    #[arg(long, value_enum)]
    pub normalize: Option<NormalizationArg>,

    /// Memory ceiling in MiB
    #[arg(long, conflicts_with = "memory_ratio")]
    pub memory_mb: Option<u64>,

    /// Memory ceiling as a fraction of available memory
    #[arg(long)]
    pub memory_ratio: Option<f64>,

    /// Worker threads (0 = all cores)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Enlarge frames 2x before combining
    #[arg(long)]
    pub upscale: bool,

    /// Always write a float result
    #[arg(long)]
    pub force_float: bool,

    /// Registration shift of a frame, as index:dx,dy (repeatable)
    #[arg(long = "shift", value_parser = parse_shift)]
    pub shifts: Vec<(usize, Shift)>,

    /// Leave a frame out (repeatable)
    #[arg(long)]
    pub exclude: Vec<usize>,

    /// Output file path
    #[arg(short, long, default_value = "stacked.tiff")]
    pub output: PathBuf,
}

/// Progress bars for each stacking stage.
struct BarReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl BarReporter {
    fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }
}

impl ProgressReporter for BarReporter {
    fn begin_stage(&self, state: StackState, total_items: Option<usize>) {
        let Some(total) = total_items else {
            return;
        };
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template(&format!("{state} [{{bar:40}}] {{pos}}/{{len}}"))
        {
            pb.set_style(style.progress_chars("=> "));
        }
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(pb);
        }
    }

    fn advance(&self, items_done: usize) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(pb) = slot.as_ref() {
                pb.set_position(items_done as u64);
            }
        }
    }

    fn finish_stage(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(pb) = slot.take() {
                pb.finish();
            }
        }
    }
}

fn build_job(args: &StackArgs) -> Result<JobConfig> {
    let mut job = match args.config {
        Some(ref path) => JobConfig::load(path)?,
        None => JobConfig::default(),
    };
    let stacking = &mut job.stacking;
    if let Some(method) = args.method {
        stacking.method = method.into();
    }
    if let Some(rejection) = args.rejection {
        *stacking = stacking.clone().with_rejection(rejection.into());
    }
    if let Some(v) = args.sig_low {
        stacking.sig_low = v;
    }
    if let Some(v) = args.sig_high {
        stacking.sig_high = v;
    }
    if let Some(n) = args.normalize {
        stacking.normalization = n.into();
    }
    stacking.upscale |= args.upscale;
    stacking.force_float |= args.force_float;
    if !args.exclude.is_empty() {
        stacking.filter = FrameFilter::Included;
    }

    if let Some(mb) = args.memory_mb {
        job.compute.memory = MemoryLimit::Bytes(mb * 1024 * 1024);
    }
    if let Some(ratio) = args.memory_ratio {
        if !(0.0..=1.0).contains(&ratio) {
            bail!("--memory-ratio must be between 0 and 1, got {ratio}");
        }
        job.compute.memory = MemoryLimit::AvailableRatio(ratio);
    }
    if let Some(threads) = args.threads {
        job.compute.threads = threads;
    }
    Ok(job)
}

pub fn run(args: &StackArgs) -> Result<()> {
    let job = build_job(args)?;
    let source = FileSequence::new(args.files.clone());

    let mut sequence = Sequence::new(source.frame_count(), 1);
    for &(index, shift) in &args.shifts {
        debug!(frame = index, dx = shift.dx, dy = shift.dy, "Shift from command line");
        sequence
            .set_shift(index, shift)
            .with_context(|| format!("Invalid --shift for frame {index}"))?;
    }
    for &index in &args.exclude {
        sequence
            .set_included(index, false)
            .with_context(|| format!("Invalid --exclude {index}"))?;
    }

    info!(
        files = args.files.len(),
        output = %args.output.display(),
        config = ?args.config,
        "Stack job"
    );
    print_stack_summary(&job.stacking, &job.compute, args.files.len(), &args.output);

    let reporter = BarReporter::new();
    let cancel = CancelToken::new();
    let outcome = stack_sequence(
        &source,
        &mut sequence,
        &job.stacking,
        &job.compute,
        &cancel,
        &reporter,
    )?;
    let result = match outcome {
        StackOutcome::Completed(result) => result,
        StackOutcome::Cancelled => bail!("Stacking was cancelled"),
    };

    save_image(&result.image, &args.output)
        .with_context(|| format!("Failed to save {}", args.output.display()))?;
    print_stack_result(&result, &args.output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shift() {
        assert_eq!(parse_shift("3:-2,5").unwrap(), (3, Shift::new(-2, 5)));
        assert_eq!(parse_shift(" 0 : 1 , 1 ").unwrap(), (0, Shift::new(1, 1)));
        assert!(parse_shift("3:-2").is_err());
        assert!(parse_shift("x:1,1").is_err());
    }
}
