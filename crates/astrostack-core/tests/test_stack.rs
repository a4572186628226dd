mod common;

use std::sync::Mutex;

use approx::assert_abs_diff_eq;
use ndarray::Array2;

use astrostack_core::context::{ComputeContext, MemoryLimit};
use astrostack_core::error::StackError;
use astrostack_core::image::{Image, PixelBuffer, SampleKind};
use astrostack_core::sequence::{FrameFilter, MemorySequence, Sequence, Shift};
use astrostack_core::stack::{
    stack_sequence, CancelToken, NoOpReporter, Normalization, ProgressReporter, Rejection,
    StackConfig, StackMethod, StackResult, StackState,
};
use common::{f32_at, flat_u16, memory_stack, mono_f32, mono_u16, u16_at, Lcg};

fn run_with(
    source: &MemorySequence,
    sequence: &mut Sequence,
    config: &StackConfig,
    ctx: &ComputeContext,
) -> StackResult {
    stack_sequence(source, sequence, config, ctx, &CancelToken::new(), &NoOpReporter)
        .unwrap()
        .completed()
        .expect("run completes")
}

fn run(source: &MemorySequence, sequence: &mut Sequence, config: &StackConfig) -> StackResult {
    run_with(source, sequence, config, &ComputeContext::sequential())
}

fn stack(images: Vec<Image>, config: &StackConfig) -> StackResult {
    let (source, mut sequence) = memory_stack(images);
    run(&source, &mut sequence, config)
}

fn try_stack(images: Vec<Image>, config: &StackConfig) -> Result<StackResult, StackError> {
    let (source, mut sequence) = memory_stack(images);
    stack_sequence(
        &source,
        &mut sequence,
        config,
        &ComputeContext::sequential(),
        &CancelToken::new(),
        &NoOpReporter,
    )
    .map(|o| o.completed().expect("run completes"))
}

/// Non-zero pattern used for the normalization tests.
fn pattern(r: usize, c: usize) -> u16 {
    1000 + ((r * 7 + c * 13) % 50) as u16
}

#[derive(Default)]
struct Recorder(Mutex<Vec<StackState>>);

impl ProgressReporter for Recorder {
    fn begin_stage(&self, state: StackState, _total_items: Option<usize>) {
        self.0.lock().unwrap().push(state);
    }
}

// ---------------------------------------------------------------------------
// Minimum and maximum
// ---------------------------------------------------------------------------

#[test]
fn test_min_max_elementwise() {
    let a = mono_u16(3, 4, |r, c| (r * 4 + c + 1) as u16);
    let b = mono_u16(3, 4, |r, c| (12 - (r * 4 + c)) as u16);

    let max = stack(vec![a.clone(), b.clone()], &StackConfig::with_method(StackMethod::Max));
    let min = stack(vec![a, b], &StackConfig::with_method(StackMethod::Min));
    assert_eq!(max.image.kind(), SampleKind::U16);
    for r in 0..3 {
        for c in 0..4 {
            let (x, y) = ((r * 4 + c + 1) as u16, (12 - (r * 4 + c)) as u16);
            assert_eq!(u16_at(&max.image, r, c), x.max(y));
            assert_eq!(u16_at(&min.image, r, c), x.min(y));
        }
    }
}

#[test]
fn test_shift_drops_out_of_bounds_samples() {
    let (source, mut sequence) = memory_stack(vec![flat_u16(2, 4, 10), flat_u16(2, 4, 20)]);
    sequence.set_shift(1, Shift::new(1, 0)).unwrap();

    let max = run(&source, &mut sequence, &StackConfig::with_method(StackMethod::Max));
    assert_eq!(u16_at(&max.image, 0, 0), 20);
    assert_eq!(u16_at(&max.image, 1, 2), 20);
    // The shifted frame has nothing for the last column.
    assert_eq!(u16_at(&max.image, 0, 3), 10);
    assert_eq!(u16_at(&max.image, 1, 3), 10);
}

#[test]
fn test_frame_shifted_out_contributes_nothing() {
    let base = mono_u16(3, 4, |r, c| (r * 4 + c + 1) as u16);
    let (source, mut sequence) = memory_stack(vec![base.clone(), flat_u16(3, 4, 60_000)]);
    sequence.set_shift(1, Shift::new(10, 0)).unwrap();

    for method in [StackMethod::Max, StackMethod::Min] {
        let result = run(&source, &mut sequence, &StackConfig::with_method(method));
        assert_eq!(result.image.channel(0), base.channel(0), "{method}");
    }
}

#[test]
fn test_max_of_identical_frames_with_hot_pixel() {
    let frame = mono_u16(4, 5, |r, c| (r * 5 + c + 100) as u16);
    let identical = stack(
        vec![frame.clone(), frame.clone(), frame.clone()],
        &StackConfig::with_method(StackMethod::Max),
    );
    assert_eq!(identical.image.channel(0), frame.channel(0));

    let mut hot = frame.clone();
    hot.update_channel(0, |b| {
        if let PixelBuffer::U16(a) = b {
            a[[2, 3]] = u16::MAX;
        }
    })
    .unwrap();
    let result = stack(
        vec![frame.clone(), hot, frame.clone()],
        &StackConfig::with_method(StackMethod::Max),
    );
    for r in 0..4 {
        for c in 0..5 {
            let expected = if (r, c) == (2, 3) {
                u16::MAX
            } else {
                u16_at(&frame, r, c)
            };
            assert_eq!(u16_at(&result.image, r, c), expected);
        }
    }
}

#[test]
fn test_min_of_uncovered_pixel_is_zero() {
    let (source, mut sequence) = memory_stack(vec![flat_u16(2, 4, 10), flat_u16(2, 4, 20)]);
    sequence.set_shift(0, Shift::new(1, 0)).unwrap();
    sequence.set_shift(1, Shift::new(1, 0)).unwrap();

    let min = run(&source, &mut sequence, &StackConfig::with_method(StackMethod::Min));
    assert_eq!(u16_at(&min.image, 0, 0), 10);
    assert_eq!(u16_at(&min.image, 0, 3), 0);
}

#[test]
fn test_max_of_float_frames() {
    let result = stack(
        vec![
            mono_f32(2, 2, |_, c| c as f32 * 0.5),
            mono_f32(2, 2, |r, _| r as f32 * 0.25),
        ],
        &StackConfig::with_method(StackMethod::Max),
    );
    assert_eq!(result.image.kind(), SampleKind::F32);
    assert_eq!(f32_at(&result.image, 1, 0), 0.25);
    assert_eq!(f32_at(&result.image, 1, 1), 0.5);
}

// ---------------------------------------------------------------------------
// Sum
// ---------------------------------------------------------------------------

#[test]
fn test_sum_stays_16_bit_when_it_fits() {
    let result = stack(
        vec![flat_u16(3, 3, 100), flat_u16(3, 3, 200)],
        &StackConfig::with_method(StackMethod::Sum),
    );
    assert_eq!(result.image.kind(), SampleKind::U16);
    assert_eq!(u16_at(&result.image, 2, 2), 300);
}

#[test]
fn test_sum_promotes_on_overflow() {
    let result = stack(
        vec![flat_u16(3, 3, 40_000), flat_u16(3, 3, 40_000)],
        &StackConfig::with_method(StackMethod::Sum),
    );
    assert_eq!(result.image.kind(), SampleKind::F32);
    assert_abs_diff_eq!(f32_at(&result.image, 1, 1), (80_000.0 / 65_535.0) as f32);
}

#[test]
fn test_sum_force_float() {
    let config = StackConfig {
        force_float: true,
        ..StackConfig::with_method(StackMethod::Sum)
    };
    let result = stack(vec![flat_u16(2, 2, 100), flat_u16(2, 2, 200)], &config);
    assert_eq!(result.image.kind(), SampleKind::F32);
    assert_abs_diff_eq!(f32_at(&result.image, 0, 0), (300.0 / 65_535.0) as f32);
}

#[test]
fn test_sum_of_float_frames() {
    let result = stack(
        vec![mono_f32(2, 2, |_, _| 0.25), mono_f32(2, 2, |_, _| 0.5)],
        &StackConfig::with_method(StackMethod::Sum),
    );
    assert_abs_diff_eq!(f32_at(&result.image, 1, 1), 0.75);
}

// ---------------------------------------------------------------------------
// Median and mean
// ---------------------------------------------------------------------------

#[test]
fn test_median_of_three_frames() {
    let result = stack(
        vec![flat_u16(4, 4, 10), flat_u16(4, 4, 30), flat_u16(4, 4, 20)],
        &StackConfig::with_method(StackMethod::Median),
    );
    assert_eq!(result.image.kind(), SampleKind::U16);
    assert_eq!(u16_at(&result.image, 3, 3), 20);
}

#[test]
fn test_median_of_float_frames_is_unscaled() {
    let result = stack(
        vec![
            mono_f32(2, 2, |_, _| 0.1),
            mono_f32(2, 2, |_, _| 0.3),
            mono_f32(2, 2, |_, _| 0.2),
        ],
        &StackConfig::with_method(StackMethod::Median),
    );
    assert_eq!(result.image.kind(), SampleKind::F32);
    assert_abs_diff_eq!(f32_at(&result.image, 0, 1), 0.2, epsilon = 1e-7);
}

#[test]
fn test_mean_rejects_outlier_frame() {
    let mut images = vec![flat_u16(4, 4, 100); 11];
    images.push(flat_u16(4, 4, 1000));
    let config = StackConfig::with_method(StackMethod::Mean).with_rejection(Rejection::Sigma);

    let result = stack(images, &config);
    assert_eq!(u16_at(&result.image, 2, 1), 100);
    assert_eq!(result.rejected_high, 16);
    assert_eq!(result.rejected_low, 0);
}

#[test]
fn test_mean_without_rejection_keeps_outlier() {
    let mut images = vec![flat_u16(2, 2, 100); 3];
    images.push(flat_u16(2, 2, 500));
    let config = StackConfig::with_method(StackMethod::Mean).with_rejection(Rejection::None);

    let result = stack(images, &config);
    assert_eq!(u16_at(&result.image, 0, 0), 200);
    assert_eq!(result.rejected_high + result.rejected_low, 0);
}

#[test]
fn test_mean_force_float_scales_16_bit_input() {
    let config = StackConfig {
        force_float: true,
        ..StackConfig::with_method(StackMethod::Mean).with_rejection(Rejection::None)
    };
    let result = stack(vec![flat_u16(2, 2, 100), flat_u16(2, 2, 301)], &config);
    assert_eq!(result.image.kind(), SampleKind::F32);
    assert_abs_diff_eq!(f32_at(&result.image, 0, 0), (200.5 / 65_535.0) as f32, epsilon = 1e-9);
}

#[test]
fn test_block_size_does_not_change_result() {
    let (h, w) = (16, 8);
    let mut rng = Lcg::new(21);
    let images: Vec<Image> = (0..3)
        .map(|_| {
            let data = rng.u16_vec(h * w, 60_000);
            mono_u16(h, w, |r, c| data[r * w + c].max(1))
        })
        .collect();

    for method in [StackMethod::Median, StackMethod::Mean] {
        let config = StackConfig::with_method(method);
        let (source, mut sequence) = memory_stack(images.clone());
        sequence.set_shift(1, Shift::new(1, -2)).unwrap();
        sequence.set_shift(2, Shift::new(0, 3)).unwrap();

        let whole = run_with(&source, &mut sequence, &config, &ComputeContext::sequential());
        // 8 * 3 * 2 bytes per row: two rows per block.
        let tight = ComputeContext::new(1, MemoryLimit::Bytes(100));
        let blocked = run_with(&source, &mut sequence, &config, &tight);
        assert_eq!(whole.image.channel(0), blocked.image.channel(0), "{method}");
    }
}

#[test]
fn test_median_matches_direct_computation() {
    let (h, w) = (6, 5);
    let mut rng = Lcg::new(22);
    let data: Vec<Vec<u16>> = (0..3).map(|_| rng.u16_vec(h * w, 1000)).collect();
    let images = data
        .iter()
        .map(|d| mono_u16(h, w, |r, c| d[r * w + c]))
        .collect();

    let result = stack(images, &StackConfig::with_method(StackMethod::Median));
    for i in 0..h * w {
        let mut v = [data[0][i], data[1][i], data[2][i]];
        v.sort_unstable();
        assert_eq!(u16_at(&result.image, i / w, i % w), v[1]);
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

#[test]
fn test_additive_normalization_removes_offsets() {
    let images = [0u16, 500, 1000]
        .iter()
        .map(|&offset| mono_u16(8, 8, |r, c| pattern(r, c) + offset))
        .collect();
    let config = StackConfig {
        normalization: Normalization::Additive,
        ..StackConfig::with_method(StackMethod::Mean).with_rejection(Rejection::None)
    };

    let result = stack(images, &config);
    assert_eq!(result.image.kind(), SampleKind::F32);
    for (r, c) in [(0, 0), (3, 5), (7, 7)] {
        let expected = pattern(r, c) as f32 / 65_535.0;
        assert_abs_diff_eq!(f32_at(&result.image, r, c), expected, epsilon = 1e-6);
    }
}

#[test]
fn test_multiplicative_normalization_removes_gain() {
    let images = [1u16, 2]
        .iter()
        .map(|&gain| mono_u16(8, 8, |r, c| pattern(r, c) * gain))
        .collect();
    let config = StackConfig {
        normalization: Normalization::Multiplicative,
        fast_normalization: false,
        ..StackConfig::with_method(StackMethod::Median)
    };

    let result = stack(images, &config);
    let expected = pattern(2, 3) as f32 / 65_535.0;
    assert_abs_diff_eq!(f32_at(&result.image, 2, 3), expected, epsilon = 1e-6);
}

#[test]
fn test_normalization_statistics_are_cached_in_sequence() {
    let images = vec![flat_u16(4, 4, 7), mono_u16(4, 4, pattern)];
    let (source, mut sequence) = memory_stack(images);
    let config = StackConfig {
        normalization: Normalization::Additive,
        ..StackConfig::with_method(StackMethod::Median)
    };
    run(&source, &mut sequence, &config);

    let handle = sequence.stats_handle(1, 0).expect("statistics slot filled");
    assert!(handle.read().unwrap().location.is_some());
}

// ---------------------------------------------------------------------------
// Frame selection, layout and metadata
// ---------------------------------------------------------------------------

#[test]
fn test_single_frame_is_not_enough() {
    let r = try_stack(vec![flat_u16(2, 2, 1)], &StackConfig::default());
    assert!(matches!(
        r,
        Err(StackError::NotEnoughFrames {
            found: 1,
            required: 2
        })
    ));
}

#[test]
fn test_excluded_frames_are_skipped() {
    let (source, mut sequence) = memory_stack(vec![
        flat_u16(2, 2, 1),
        flat_u16(2, 2, 2),
        flat_u16(2, 2, 4),
    ]);
    sequence.set_included(1, false).unwrap();
    let result = run(&source, &mut sequence, &StackConfig::with_method(StackMethod::Sum));
    assert_eq!(result.frames, 2);
    assert_eq!(u16_at(&result.image, 0, 0), 5);

    sequence.set_included(2, false).unwrap();
    let r = stack_sequence(
        &source,
        &mut sequence,
        &StackConfig::with_method(StackMethod::Sum),
        &ComputeContext::sequential(),
        &CancelToken::new(),
        &NoOpReporter,
    );
    assert!(matches!(r, Err(StackError::NotEnoughFrames { found: 1, .. })));
}

#[test]
fn test_index_filter_picks_frames() {
    let (source, mut sequence) = memory_stack(vec![
        flat_u16(2, 2, 1),
        flat_u16(2, 2, 2),
        flat_u16(2, 2, 4),
    ]);
    let config = StackConfig {
        filter: FrameFilter::Indices(vec![2, 1]),
        ..StackConfig::with_method(StackMethod::Sum)
    };
    let result = run(&source, &mut sequence, &config);
    assert_eq!(u16_at(&result.image, 1, 1), 6);
}

#[test]
fn test_quality_filter() {
    let (source, mut sequence) = memory_stack(vec![
        flat_u16(2, 2, 1),
        flat_u16(2, 2, 2),
        flat_u16(2, 2, 4),
    ]);
    for (i, q) in [0.9, 0.2, 0.7].into_iter().enumerate() {
        sequence.frame_mut(i).unwrap().quality = Some(q);
    }
    let config = StackConfig {
        filter: FrameFilter::MinQuality(0.5),
        ..StackConfig::with_method(StackMethod::Sum)
    };
    let result = run(&source, &mut sequence, &config);
    assert_eq!(u16_at(&result.image, 0, 1), 5);
}

#[test]
fn test_dimension_mismatch() {
    let r = try_stack(
        vec![flat_u16(4, 4, 1), flat_u16(4, 5, 1)],
        &StackConfig::with_method(StackMethod::Mean),
    );
    assert!(matches!(
        r,
        Err(StackError::DimensionMismatch { index: 1, .. })
    ));
}

#[test]
fn test_sample_kind_mismatch() {
    let r = try_stack(
        vec![flat_u16(2, 2, 1), mono_f32(2, 2, |_, _| 0.5)],
        &StackConfig::with_method(StackMethod::Sum),
    );
    assert!(matches!(r, Err(StackError::InvalidInput(_))));
}

#[test]
fn test_sequence_channel_count_must_match_frames() {
    let source = MemorySequence::new(vec![flat_u16(2, 2, 1), flat_u16(2, 2, 1)]);
    let mut sequence = Sequence::new(2, 3);
    let r = stack_sequence(
        &source,
        &mut sequence,
        &StackConfig::default(),
        &ComputeContext::sequential(),
        &CancelToken::new(),
        &NoOpReporter,
    );
    assert!(matches!(r, Err(StackError::InvalidInput(_))));
}

#[test]
fn test_exposure_is_summed() {
    let result = stack(
        vec![
            flat_u16(2, 2, 1).with_exposure(2.0),
            flat_u16(2, 2, 1).with_exposure(3.5),
        ],
        &StackConfig::with_method(StackMethod::Median),
    );
    assert_abs_diff_eq!(result.exposure, 5.5);
    assert_abs_diff_eq!(result.image.exposure, 5.5);
}

#[test]
fn test_multi_channel_frames() {
    let rgb = |v: u16| {
        Image::new(
            (0..3u16)
                .map(|c| PixelBuffer::U16(Array2::from_elem((2, 2), v + c)))
                .collect(),
        )
        .unwrap()
    };
    let source = MemorySequence::new(vec![rgb(10), rgb(20)]);
    let mut sequence = Sequence::new(2, 3);
    let result = run(&source, &mut sequence, &StackConfig::with_method(StackMethod::Max));
    assert_eq!(result.image.channel_count(), 3);
    let blue = result.image.channel(2).unwrap().as_u16().unwrap();
    assert_eq!(blue[[1, 1]], 22);
}

// ---------------------------------------------------------------------------
// Upscale, cancellation and progress
// ---------------------------------------------------------------------------

#[test]
fn test_upscale_doubles_dimensions() {
    let ramp = mono_u16(2, 3, |r, c| (r * 3 + c + 1) as u16);
    let config = StackConfig {
        upscale: true,
        ..StackConfig::with_method(StackMethod::Sum)
    };
    let result = stack(vec![ramp.clone(), ramp], &config);
    assert_eq!(result.image.dims(), (4, 6, 1));
    assert_eq!(u16_at(&result.image, 0, 1), 2);
    assert_eq!(u16_at(&result.image, 3, 5), 12);
}

#[test]
fn test_upscale_scales_shifts() {
    let (source, mut sequence) = memory_stack(vec![
        flat_u16(2, 3, 1),
        mono_u16(2, 3, |r, c| (r * 3 + c + 1) as u16),
    ]);
    sequence.set_shift(1, Shift::new(1, 0)).unwrap();
    let config = StackConfig {
        upscale: true,
        ..StackConfig::with_method(StackMethod::Max)
    };
    let result = run(&source, &mut sequence, &config);
    assert_eq!(u16_at(&result.image, 0, 0), 2);
    assert_eq!(u16_at(&result.image, 3, 3), 6);
    assert_eq!(u16_at(&result.image, 0, 4), 1);
}

#[test]
fn test_upscaled_median_uses_blocks() {
    let ramp = mono_u16(4, 2, |r, c| (r * 2 + c + 1) as u16);
    let config = StackConfig {
        upscale: true,
        ..StackConfig::with_method(StackMethod::Median)
    };
    let (source, mut sequence) = memory_stack(vec![ramp.clone(), ramp.clone(), ramp]);
    let tight = ComputeContext::new(1, MemoryLimit::Bytes(48));
    let result = run_with(&source, &mut sequence, &config, &tight);
    assert_eq!(result.image.dims(), (8, 4, 1));
    assert_eq!(u16_at(&result.image, 5, 3), 6);
}

#[test]
fn test_cancelled_run() {
    let (source, mut sequence) = memory_stack(vec![flat_u16(2, 2, 1), flat_u16(2, 2, 2)]);
    let cancel = CancelToken::new();
    cancel.cancel();
    for method in [StackMethod::Sum, StackMethod::Median] {
        let outcome = stack_sequence(
            &source,
            &mut sequence,
            &StackConfig::with_method(method),
            &ComputeContext::sequential(),
            &cancel,
            &NoOpReporter,
        )
        .unwrap();
        assert!(outcome.is_cancelled());
    }
}

#[test]
fn test_stage_order() {
    let (source, mut sequence) = memory_stack(vec![mono_u16(4, 4, pattern), mono_u16(4, 4, pattern)]);
    let recorder = Recorder::default();
    let config = StackConfig {
        normalization: Normalization::Multiplicative,
        upscale: true,
        ..StackConfig::with_method(StackMethod::Mean)
    };
    stack_sequence(
        &source,
        &mut sequence,
        &config,
        &ComputeContext::sequential(),
        &CancelToken::new(),
        &recorder,
    )
    .unwrap();
    assert_eq!(
        *recorder.0.lock().unwrap(),
        vec![
            StackState::Init,
            StackState::Normalize,
            StackState::Upscale,
            StackState::Combine,
            StackState::Finalize,
        ]
    );
}
