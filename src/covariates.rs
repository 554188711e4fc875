//! Static covariate extraction: one row per AOI, columns driven by a JSON
//! manifest of covariate rasters (elevation, impervious fraction, land
//! cover, ...).
//!
//! Unlike the LST extraction this is time-invariant and masks only each
//! band's own nodata sentinel. Numeric covariates reduce with the shared
//! NaN-aware statistics; categorical covariates produce a modal class plus
//! per-class pixel fractions.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::aoi::{reproject, wgs84, AoiSet};
use crate::config::Config;
use crate::raster::RasterSource;
use crate::table::Table;
use crate::text;
use crate::zonal::{safe_stat, Stat};

#[derive(Debug, Clone, Deserialize)]
pub struct CovariateSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    /// Numeric covariates only; defaults to ["mean"].
    #[serde(default)]
    pub stats: Vec<String>,
    /// Categorical covariates only; the classes to report fractions for.
    #[serde(default)]
    pub classes: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CovariateManifest {
    pub covariates: Vec<CovariateSpec>,
}

pub fn load_manifest(path: &Path) -> Result<CovariateManifest> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read covariate manifest: {}", path.display()))?;
    let mut manifest: CovariateManifest = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse covariate manifest: {}", path.display()))?;
    for spec in &mut manifest.covariates {
        match spec.kind.as_str() {
            "numeric" => {
                if spec.stats.is_empty() {
                    spec.stats = vec!["mean".to_string()];
                }
                for s in &spec.stats {
                    Stat::parse(s)?;
                }
            }
            "categorical" => {
                if spec.classes.is_empty() {
                    bail!(
                        "Categorical covariate {:?} needs a non-empty 'classes' list",
                        spec.name
                    );
                }
            }
            other => bail!("Unknown covariate type {:?} for {:?}", other, spec.name),
        }
    }
    Ok(manifest)
}

/// Modal class and per-class fractions over integer-valued pixels. Ties on
/// the mode resolve to the smallest class value.
pub fn categorical_summary(values: &[i64], classes: &[i64]) -> (Option<i64>, Vec<f64>) {
    if values.is_empty() {
        return (None, vec![f64::NAN; classes.len()]);
    }
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for &v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    let mode = counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(&v, _)| v);
    let total = values.len() as f64;
    let fracs = classes
        .iter()
        .map(|c| *counts.get(c).unwrap_or(&0) as f64 / total)
        .collect();
    (mode, fracs)
}

/// Valid pixels of one covariate raster inside one WGS84 polygon. Only the
/// band's own nodata sentinel is excluded.
fn polygon_values(src: &RasterSource, wgs84_geom: &gdal::vector::Geometry) -> Result<Vec<f64>> {
    let geom = reproject(wgs84_geom, &wgs84()?, &src.spatial_ref()?)?;
    let window = match src.crop_to_polygon(&geom)? {
        Some(w) => w,
        None => return Ok(Vec::new()),
    };
    let nodata = src.nodata();
    let mut values = Vec::new();
    for (&v, &inside) in window.data.iter().zip(window.inside.iter()) {
        if !inside || !v.is_finite() {
            continue;
        }
        if let Some(nd) = nodata {
            if v == nd {
                continue;
            }
        }
        values.push(v);
    }
    Ok(values)
}

/// Extract every manifest covariate for every AOI and write the wide table.
pub fn run_covariates(cfg: &Config, manifest_path: &Path, out_path: &Path) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    if manifest.covariates.is_empty() {
        bail!("Covariate manifest lists no covariates");
    }

    let aois = AoiSet::load(
        Path::new(&cfg.aoi_path),
        &cfg.aoi_id_field,
        &cfg.aoi_crs_if_missing,
        cfg.buffer_m,
    )?;

    let mut headers = vec!["aoi_id".to_string()];
    for spec in &manifest.covariates {
        match spec.kind.as_str() {
            "numeric" => {
                for s in &spec.stats {
                    headers.push(format!("{}__{}", spec.name, s));
                }
            }
            _ => {
                headers.push(format!("{}__mode", spec.name));
                for c in &spec.classes {
                    headers.push(format!("{}__frac_{}", spec.name, c));
                }
            }
        }
    }
    let mut out = Table::new(headers);

    for aoi in aois.iter() {
        out.rows.push(vec![aoi.aoi_id.clone()]);
    }

    // One raster open per covariate, each applied to every AOI ring.
    for spec in &manifest.covariates {
        println!(
            "{} {} ({})",
            text::ARROW,
            text::bold(&spec.name),
            spec.kind
        );
        let src = RasterSource::open(Path::new(&spec.path))
            .with_context(|| format!("Failed to open covariate raster for {:?}", spec.name))?;
        for (aoi, row) in aois.iter().zip(out.rows.iter_mut()) {
            let values = polygon_values(&src, &aoi.geometry)?;
            match spec.kind.as_str() {
                "numeric" => {
                    for s in &spec.stats {
                        let stat = Stat::parse(s)?;
                        row.push(crate::timeseries::fmt_num(safe_stat(&values, stat)));
                    }
                }
                _ => {
                    let ints: Vec<i64> = values.iter().map(|&v| v.round() as i64).collect();
                    let (mode, fracs) = categorical_summary(&ints, &spec.classes);
                    row.push(mode.map(|m| m.to_string()).unwrap_or_default());
                    for f in fracs {
                        row.push(crate::timeseries::fmt_num(f));
                    }
                }
            }
        }
    }

    out.write_csv(out_path)?;
    println!(
        "{} Extracted {} covariate column(s) for {} AOI(s) {} {}",
        text::check_icon(),
        out.headers.len() - 1,
        out.rows.len(),
        text::ARROW,
        out_path.display()
    );
    Ok(())
}
