use std::path::Path;

use astrostack_core::context::ComputeContext;
use astrostack_core::image::SampleKind;
use astrostack_core::stack::{Rejection, StackConfig, StackMethod, StackResult};
use astrostack_core::stats::ImageStatistics;
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

fn title(s: &Styles, text: &str) {
    println!();
    println!("  {}", s.title.apply_to(text));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(text.chars().count())));
    println!();
}

fn row<T: std::fmt::Display>(s: &Styles, label: &str, value: Option<T>) {
    match value {
        Some(v) => println!("    {:<12}{}", s.label.apply_to(label), s.value.apply_to(v)),
        None => println!("    {:<12}{}", s.label.apply_to(label), s.disabled.apply_to("n/a")),
    }
}

pub fn print_stack_summary(
    config: &StackConfig,
    compute: &ComputeContext,
    frames: usize,
    output: &Path,
) {
    let s = Styles::new();
    title(&s, "Stacking");

    println!(
        "  {:<14}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(frames)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(output.display())
    );
    println!();

    println!("  {}", s.header.apply_to("Combination"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Method"),
        s.method.apply_to(config.method)
    );
    if config.method == StackMethod::Mean {
        if config.rejection == Rejection::None {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Rejection"),
                s.disabled.apply_to("none")
            );
        } else {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Rejection"),
                s.method.apply_to(config.rejection)
            );
            println!(
                "    {:<12}{} / {}",
                s.label.apply_to("Thresholds"),
                s.value.apply_to(config.sig_low),
                s.value.apply_to(config.sig_high)
            );
        }
    }
    if config.method.is_block_based() {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Normalize"),
            s.method.apply_to(config.normalization)
        );
    }
    if config.upscale {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Upscale"),
            s.value.apply_to("2x")
        );
    }
    println!();

    println!("  {}", s.header.apply_to("Resources"));
    let threads = if compute.threads == 0 {
        "all cores".to_string()
    } else {
        compute.threads.to_string()
    };
    println!(
        "    {:<12}{}",
        s.label.apply_to("Threads"),
        s.value.apply_to(threads)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Memory"),
        s.value.apply_to(compute.memory)
    );
    println!();
}

pub fn print_stack_result(result: &StackResult, output: &Path) {
    let s = Styles::new();
    println!();
    println!("  {}", s.header.apply_to("Result"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(result.frames)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Exposure"),
        s.value.apply_to(format!("{:.1} s", result.exposure))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Samples"),
        s.value.apply_to(result.image.kind())
    );
    if result.rejected_low + result.rejected_high > 0 {
        println!(
            "    {:<12}{} low, {} high",
            s.label.apply_to("Rejected"),
            s.value.apply_to(result.rejected_low),
            s.value.apply_to(result.rejected_high)
        );
    }
    println!(
        "    {:<12}{}",
        s.label.apply_to("Saved to"),
        s.path.apply_to(output.display())
    );
    println!();
}

pub fn print_statistics(
    file: &Path,
    dims: (usize, usize, usize),
    kind: SampleKind,
    channels: &[ImageStatistics],
) {
    let s = Styles::new();
    title(&s, "Statistics");

    let (h, w, c) = dims;
    println!(
        "  {:<14}{}",
        s.label.apply_to("File"),
        s.path.apply_to(file.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Size"),
        s.value.apply_to(format!("{w}x{h}, {c} channel(s), {kind}"))
    );
    println!();

    for (i, st) in channels.iter().enumerate() {
        println!("  {}", s.header.apply_to(format!("Channel {i}")));
        row(&s, "Pixels", st.total);
        row(&s, "Good", st.ngoodpix);
        row(&s, "Min", st.min.map(|v| format!("{v:.4}")));
        row(&s, "Max", st.max.map(|v| format!("{v:.4}")));
        row(&s, "Mean", st.mean.map(|v| format!("{v:.4}")));
        row(&s, "Sigma", st.sigma.map(|v| format!("{v:.4}")));
        row(&s, "Noise", st.bgnoise.map(|v| format!("{v:.4}")));
        row(&s, "Median", st.median.map(|v| format!("{v:.4}")));
        row(&s, "MAD", st.mad.map(|v| format!("{v:.4}")));
        row(&s, "sqrt(BWMV)", st.sqrt_bwmv.map(|v| format!("{v:.4}")));
        if st.avg_dev.is_some() {
            row(&s, "Avg dev", st.avg_dev.map(|v| format!("{v:.4}")));
        }
        if st.location.is_some() {
            row(&s, "Location", st.location.map(|v| format!("{v:.4}")));
            row(&s, "Scale", st.scale.map(|v| format!("{v:.4}")));
        }
        println!();
    }
}
