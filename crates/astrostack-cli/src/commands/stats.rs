use std::path::PathBuf;

use anyhow::{Context, Result};
use astrostack_core::context::ComputeContext;
use astrostack_core::io::load_image;
use astrostack_core::stats::StatFlags;
use clap::Args;

use crate::summary::print_statistics;

#[derive(Args)]
pub struct StatsArgs {
    /// Input image file
    pub file: PathBuf,

    /// Also compute average deviation and the iterative robust estimator
    #[arg(long)]
    pub all: bool,

    /// Worker threads (0 = all cores)
    #[arg(long, default_value = "0")]
    pub threads: usize,
}

pub fn run(args: &StatsArgs) -> Result<()> {
    let mut image = load_image(&args.file)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;
    let ctx = ComputeContext::new(args.threads, Default::default());
    let flags = if args.all {
        StatFlags::ALL
    } else {
        StatFlags::MAIN
    };

    let (h, w, c) = image.dims();
    let mut per_channel = Vec::with_capacity(c);
    for channel in 0..c {
        per_channel.push(image.statistics(channel, flags, &ctx)?);
    }
    print_statistics(&args.file, (h, w, c), image.kind(), &per_channel);
    Ok(())
}
