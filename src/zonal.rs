//! Zonal statistics engine: sample one polygon against one raster, apply
//! nodata and quality masking plus the configured value transform, and reduce
//! to the requested statistics.
//!
//! NaN semantics are load-bearing throughout: a polygon outside the raster,
//! an empty crop, or a crop with zero finite pixels all produce NaN for every
//! requested statistic, `count` included. `count` is a finite-pixel count,
//! and an all-invalid tile reports "no signal" (NaN) rather than a confirmed
//! zero. Downstream weighting relies on NaN counts collapsing to zero weight.

use anyhow::{bail, Result};
use gdal::vector::Geometry;
use ndarray::Array2;

use crate::config::{QualitySpec, TransformSpec};
use crate::quality::CompanionSet;
use crate::raster::{geom_bounds, RasterSource};

/// A supported zonal statistic. Unknown names are a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Mean,
    Median,
    P90,
    Count,
}

impl Stat {
    pub fn parse(name: &str) -> Result<Stat> {
        match name {
            "mean" => Ok(Stat::Mean),
            "median" => Ok(Stat::Median),
            "p90" => Ok(Stat::P90),
            "count" => Ok(Stat::Count),
            other => bail!("Unknown stat: {:?}", other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stat::Mean => "mean",
            Stat::Median => "median",
            Stat::P90 => "p90",
            Stat::Count => "count",
        }
    }
}

/// The configured value transform, e.g. Kelvin → Celsius.
#[derive(Debug, Clone, Copy)]
pub enum ValueTransform {
    Identity,
    ScaleOffset { scale: f64, offset: f64 },
}

impl ValueTransform {
    pub fn from_spec(spec: &TransformSpec) -> Result<ValueTransform> {
        match spec.kind.as_str() {
            "identity" => Ok(ValueTransform::Identity),
            "scale_offset" => Ok(ValueTransform::ScaleOffset {
                scale: spec.scale.unwrap_or(1.0),
                offset: spec.offset.unwrap_or(0.0),
            }),
            other => bail!("Unknown value_transform.type: {:?}", other),
        }
    }

    pub fn apply(&self, v: f64) -> f64 {
        match self {
            ValueTransform::Identity => v,
            ValueTransform::ScaleOffset { scale, offset } => v * scale + offset,
        }
    }
}

/// Reduce a sample array to one statistic over its finite values.
///
/// Empty input ⇒ NaN for every stat, count included. Non-empty input with no
/// finite values ⇒ NaN as well.
pub fn safe_stat(values: &[f64], stat: Stat) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let finite = crate::stats::finite(values);
    if finite.is_empty() {
        return f64::NAN;
    }
    match stat {
        Stat::Mean => finite.iter().sum::<f64>() / finite.len() as f64,
        Stat::Median => crate::stats::nan_percentile(&finite, 50.0),
        Stat::P90 => crate::stats::nan_percentile(&finite, 90.0),
        Stat::Count => finite.len() as f64,
    }
}

/// Everything `zonal_stats_for_geom` needs besides the raster and polygon.
pub struct ZonalRequest<'a> {
    pub stats: &'a [Stat],
    pub transform: ValueTransform,
    pub nodata_equals: Option<f64>,
    pub nodata_below: Option<f64>,
    pub quality: &'a QualitySpec,
}

fn all_nan(n: usize) -> Vec<f64> {
    vec![f64::NAN; n]
}

/// Sample a polygon from a raster: crop, mask to the polygon, and replace
/// nodata with NaN. Returns `None` when there is no spatial overlap.
pub fn sample_polygon(
    src: &RasterSource,
    geom: &Geometry,
    nodata_equals: Option<f64>,
    nodata_below: Option<f64>,
) -> Result<Option<Array2<f64>>> {
    // Fast reject: common with tiled rasters, avoids touching pixel data.
    if !src.bounds().intersects(&geom_bounds(geom)) {
        return Ok(None);
    }
    let window = match src.crop_to_polygon(geom)? {
        Some(w) => w,
        None => return Ok(None),
    };

    let mut data = window.data;
    let nodata = src.nodata();
    for (value, &inside) in data.iter_mut().zip(window.inside.iter()) {
        if !inside {
            *value = f64::NAN;
            continue;
        }
        if let Some(nd) = nodata {
            if *value == nd {
                *value = f64::NAN;
                continue;
            }
        }
        if let Some(eq) = nodata_equals {
            if *value == eq {
                *value = f64::NAN;
                continue;
            }
        }
        if let Some(floor) = nodata_below {
            if *value < floor {
                *value = f64::NAN;
            }
        }
    }
    Ok(Some(data))
}

/// The full per-(raster, AOI) pipeline: sample → quality mask → transform →
/// reduce. Returns one value per requested statistic, in order.
///
/// Sampling failures (no overlap, empty intersection) come back as NaN rows,
/// never as errors; companion-mask failures disable only that channel.
pub fn zonal_stats_for_geom(
    src: &RasterSource,
    geom: &Geometry,
    req: &ZonalRequest,
    companions: Option<&CompanionSet>,
) -> Result<Vec<f64>> {
    let mut data = match sample_polygon(src, geom, req.nodata_equals, req.nodata_below)? {
        Some(d) => d,
        None => return Ok(all_nan(req.stats.len())),
    };

    if req.quality.enabled && req.quality.ecostress_companion_masks {
        if let Some(set) = companions {
            let mut keep = data.mapv(|v| v.is_finite());
            set.apply_channels(geom, req.quality, &mut keep);
            for (value, &k) in data.iter_mut().zip(keep.iter()) {
                if !k {
                    *value = f64::NAN;
                }
            }
        }
    }

    data.mapv_inplace(|v| req.transform.apply(v));

    let flat: Vec<f64> = data.iter().copied().collect();
    Ok(req.stats.iter().map(|s| safe_stat(&flat, *s)).collect())
}
