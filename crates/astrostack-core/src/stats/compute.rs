use ndarray::{s, Array2, ArrayView2};

use crate::context::ComputeContext;
use crate::error::{Result, StackError};
use crate::image::PixelBuffer;
use crate::order::{histogram_median, select_median, Sample};

use super::basic::{background_noise, basic_stats};
use super::robust::{avg_dev, bwmv, ikss, ikss_lite, mad};
use super::{read_stats, write_stats, Estimator, ImageStatistics, Region, SharedStats, StatFlags};

/// Fill the statistics requested by `flags`.
///
/// Fields already present in `cache` are reused and never recomputed. Newly
/// computed fields are written back to `cache`, except when a `region` is
/// given: region statistics are returned but never cached.
///
/// Without a `buffer` only cached fields can be served; if any requested field
/// is unknown the whole request fails. Zero samples (and non-finite floats) are
/// not part of the effective sample set; if nothing remains the request fails.
pub fn statistics(
    buffer: Option<&PixelBuffer>,
    region: Option<Region>,
    flags: StatFlags,
    cache: Option<&SharedStats>,
    ctx: &ComputeContext,
) -> Result<ImageStatistics> {
    let cacheable = region.is_none();
    let mut stats = match cache {
        Some(handle) if cacheable => *read_stats(handle),
        _ => ImageStatistics::default(),
    };

    let missing = stats.missing(flags);
    if missing.is_empty() {
        return Ok(stats);
    }
    let buffer = buffer.ok_or(StackError::StatisticsUnavailable(missing.first_name()))?;
    if let Some(r) = region {
        r.validate(buffer.dim())?;
    }

    let needed = stats.missing(missing.with_dependencies());
    ctx.install(|| fill(&mut stats, buffer, region, needed, ctx))??;

    if let (Some(handle), true) = (cache, cacheable) {
        let mut cached = write_stats(handle);
        cached.fill_from(&stats);
        stats = *cached;
    }
    Ok(stats)
}

enum Samples {
    U16(Vec<u16>),
    F32(Vec<f32>),
}

fn view_of<T>(a: &Array2<T>, region: Option<Region>) -> ArrayView2<'_, T> {
    match region {
        Some(r) => a.slice(s![r.y..r.y + r.height, r.x..r.x + r.width]),
        None => a.view(),
    }
}

fn collect_valid<T: Sample>(view: ArrayView2<'_, T>, valid: impl Fn(T) -> bool) -> Result<Vec<T>> {
    let mut out = Vec::new();
    out.try_reserve_exact(view.len())
        .map_err(|_| StackError::Allocation {
            bytes: view.len() * std::mem::size_of::<T>(),
        })?;
    out.extend(view.iter().copied().filter(|&v| valid(v)));
    Ok(out)
}

fn gather(buffer: &PixelBuffer, region: Option<Region>) -> Result<Samples> {
    Ok(match buffer {
        PixelBuffer::U16(a) => Samples::U16(collect_valid(view_of(a, region), |v| v != 0)?),
        PixelBuffer::F32(a) => Samples::F32(collect_valid(view_of(a, region), |v| {
            v != 0.0 && v.is_finite()
        })?),
    })
}

fn fill(
    stats: &mut ImageStatistics,
    buffer: &PixelBuffer,
    region: Option<Region>,
    needed: StatFlags,
    ctx: &ComputeContext,
) -> Result<()> {
    if needed.contains(StatFlags::NORM) {
        stats.norm_value = Some(buffer.kind().norm());
    }
    if (needed - StatFlags::NORM).is_empty() {
        return Ok(());
    }

    let mut samples = gather(buffer, region)?;
    let good = match &samples {
        Samples::U16(v) => v.len(),
        Samples::F32(v) => v.len(),
    };
    if good == 0 {
        return Err(StackError::EmptySampleSet);
    }

    if needed.intersects(StatFlags::BASIC | StatFlags::MINMAX) {
        let basic = match &samples {
            Samples::U16(v) => basic_stats(v),
            Samples::F32(v) => basic_stats(v),
        }
        .ok_or(StackError::EmptySampleSet)?;
        stats.min.get_or_insert(basic.min);
        stats.max.get_or_insert(basic.max);
        if needed.contains(StatFlags::BASIC) {
            let noise = match buffer {
                PixelBuffer::U16(a) => background_noise(view_of(a, region))?,
                PixelBuffer::F32(a) => background_noise(view_of(a, region))?,
            };
            stats.total = Some(region.map_or(buffer.len(), |r| r.width * r.height));
            stats.ngoodpix = Some(good);
            stats.mean = Some(basic.mean);
            stats.sigma = Some(basic.sigma);
            stats.bgnoise = Some(noise);
        }
    }

    match &mut samples {
        Samples::U16(v) => fill_robust(stats, v, needed, |d| histogram_median(d, ctx)),
        Samples::F32(v) => fill_robust(stats, v, needed, |d| select_median(d)),
    }
}

/// Median-dependent statistics, in dependency order.
fn fill_robust<T, M>(
    stats: &mut ImageStatistics,
    data: &mut [T],
    needed: StatFlags,
    median_of: M,
) -> Result<()>
where
    T: Sample,
    M: FnOnce(&mut [T]) -> Result<f64>,
{
    if needed.contains(StatFlags::MEDIAN) {
        stats.median = Some(median_of(data)?);
    }
    let median = stats.median;
    let median = || median.ok_or(StackError::StatisticsUnavailable("MEDIAN"));

    if needed.contains(StatFlags::AVGDEV) {
        stats.avg_dev = Some(avg_dev(data, median()?)?);
    }
    if needed.contains(StatFlags::MAD) {
        stats.mad = Some(mad(data, median()?)?);
    }
    let mad_cached = stats.mad;
    let mad_value = || mad_cached.ok_or(StackError::StatisticsUnavailable("MAD"));
    if needed.contains(StatFlags::BWMV) {
        stats.sqrt_bwmv = Some(bwmv(data, median()?, mad_value()?)?.sqrt());
    }

    if needed.contains(StatFlags::IKSS) {
        let mut work = Vec::new();
        work.try_reserve_exact(data.len())
            .map_err(|_| StackError::Allocation {
                bytes: data.len() * std::mem::size_of::<f32>(),
            })?;
        work.extend(data.iter().map(|v| v.as_f64() as f32));
        let (location, scale) = ikss(&mut work)?;
        stats.location = Some(location);
        stats.scale = Some(scale);
        stats.estimator = Some(Estimator::Ikss);
    } else if needed.contains(StatFlags::IKSS_LITE) {
        let (location, scale) = ikss_lite(data, median()?, mad_value()?)?;
        stats.location = Some(location);
        stats.scale = Some(scale);
        stats.estimator = Some(Estimator::IkssLite);
    }
    Ok(())
}
