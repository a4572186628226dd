use astrostack_core::context::{ComputeContext, MemoryLimit};
use astrostack_core::sequence::FrameFilter;
use astrostack_core::stack::{Normalization, Rejection, StackConfig, StackMethod};

// ---------------------------------------------------------------------------
// Stack configuration
// ---------------------------------------------------------------------------

#[test]
fn test_defaults() {
    let config = StackConfig::default();
    assert_eq!(config.method, StackMethod::Mean);
    assert_eq!(config.rejection, Rejection::Sigma);
    assert_eq!((config.sig_low, config.sig_high), (3.0, 3.0));
    assert_eq!(config.normalization, Normalization::None);
    assert!(config.fast_normalization);
    assert_eq!(config.filter, FrameFilter::Included);
    assert!(!config.upscale && !config.force_float);
}

#[test]
fn test_empty_toml_gives_defaults() {
    let config: StackConfig = toml::from_str("").unwrap();
    assert_eq!(config, StackConfig::default());
}

#[test]
fn test_partial_toml() {
    let config: StackConfig = toml::from_str(
        r#"
        method = "Median"
        normalization = "AdditiveScaling"
        sig_high = 2.5
        "#,
    )
    .unwrap();
    assert_eq!(config.method, StackMethod::Median);
    assert_eq!(config.normalization, Normalization::AdditiveScaling);
    assert_eq!(config.sig_low, 3.0);
    assert_eq!(config.sig_high, 2.5);
}

#[test]
fn test_toml_round_trip() {
    let config = StackConfig {
        upscale: true,
        force_float: true,
        ..StackConfig::with_method(StackMethod::Mean).with_rejection(Rejection::Gesdt)
    };
    let text = toml::to_string_pretty(&config).unwrap();
    let back: StackConfig = toml::from_str(&text).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_index_filter_from_toml() {
    let config: StackConfig = toml::from_str(
        r#"
        method = "Sum"

        [filter]
        Indices = [3, 1]
        "#,
    )
    .unwrap();
    assert_eq!(config.filter, FrameFilter::Indices(vec![3, 1]));
}

#[test]
fn test_with_rejection_sets_thresholds() {
    let config = StackConfig::default().with_rejection(Rejection::LinearFit);
    assert_eq!((config.sig_low, config.sig_high), (5.0, 5.0));
    let config = config.with_rejection(Rejection::Percentile);
    assert_eq!((config.sig_low, config.sig_high), (0.2, 0.1));
    assert_eq!(Rejection::Gesdt.default_thresholds(), (0.3, 0.05));
}

#[test]
fn test_block_based_methods() {
    assert!(StackMethod::Median.is_block_based());
    assert!(StackMethod::Mean.is_block_based());
    assert!(!StackMethod::Sum.is_block_based());
    assert!(!StackMethod::Max.is_block_based());
}

#[test]
fn test_display_names() {
    assert_eq!(StackMethod::Min.to_string(), "Minimum");
    assert_eq!(Rejection::Winsorized.to_string(), "Winsorized Sigma Clipping");
    assert_eq!(
        Rejection::Gesdt.to_string(),
        "Generalized Extreme Studentized Deviate"
    );
    assert_eq!(
        Normalization::MultiplicativeScaling.to_string(),
        "Multiplicative + Scaling"
    );
}

// ---------------------------------------------------------------------------
// Compute context
// ---------------------------------------------------------------------------

#[test]
fn test_memory_limit_resolution() {
    assert_eq!(MemoryLimit::Unset.resolve(), None);
    assert_eq!(MemoryLimit::Unlimited.resolve(), Some(u64::MAX));
    assert_eq!(MemoryLimit::Bytes(4096).resolve(), Some(4096));
    assert_eq!(MemoryLimit::AvailableRatio(0.0).resolve(), None);
    assert_eq!(MemoryLimit::AvailableRatio(f64::NAN).resolve(), None);
}

#[test]
fn test_memory_limit_display() {
    assert_eq!(MemoryLimit::Bytes(3 * 1024 * 1024).to_string(), "3 MiB");
    assert_eq!(MemoryLimit::AvailableRatio(0.25).to_string(), "25% of available");
}

#[test]
fn test_context_round_trip() {
    let ctx = ComputeContext::new(4, MemoryLimit::Bytes(1 << 20));
    let text = toml::to_string(&ctx).unwrap();
    let back: ComputeContext = toml::from_str(&text).unwrap();
    assert_eq!(back, ctx);
}

#[test]
fn test_install_uses_requested_threads() {
    let ctx = ComputeContext::new(2, MemoryLimit::Unset);
    assert_eq!(ctx.thread_count(), 2);
    let inside = ctx.install(rayon::current_num_threads).unwrap();
    assert_eq!(inside, 2);
}

#[test]
fn test_default_context_uses_every_core() {
    let ctx = ComputeContext::default();
    assert_eq!(ctx.threads, 0);
    assert!(ctx.thread_count() >= 1);
}
