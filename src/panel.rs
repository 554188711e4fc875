//! Panel construction: collapse tile-level observations to one row per
//! (AOI, date), apply the pixel-support usability filter, and summarize the
//! data-center vs control difference per (date, buffer).
//!
//! Collapsing is pixel-weighted: a tile that contributed 500 valid pixels to
//! an AOI ring counts 100x more than a sliver tile with 5. A NaN pixel count
//! is treated as zero support, so an all-masked tile neither weighs in nor
//! poisons the sum.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::aoi::AoiSet;
use crate::config::Config;
use crate::stats;
use crate::table::Table;
use crate::text;
use crate::timeseries::fmt_num;

/// Pixel-support floor below which an observation is unusable.
pub const MIN_ABS_PIXELS: f64 = 5.0;
/// Fraction of the AOI's own p95 pixel count required for usability.
pub const MIN_FRAC_OF_P95: f64 = 0.25;

/// Usability threshold for one AOI given the p95 of its pixel counts.
pub fn usability_threshold(p95_pixels: f64) -> f64 {
    MIN_ABS_PIXELS.max(MIN_FRAC_OF_P95 * p95_pixels)
}

struct CollapseGroup {
    rows: Vec<usize>,
}

/// Collapse the per-tile timeseries into the (AOI, date) panel and write both
/// the full and the usability-filtered tables.
pub fn run_collapse(cfg: &Config) -> Result<()> {
    let out_dir = Path::new(&cfg.outputs_dir);
    let ts_path = out_dir.join("timeseries.csv");
    if !ts_path.exists() {
        bail!(
            "Missing input: {}. Run the extract step first.",
            ts_path.display()
        );
    }
    let ts = Table::read_csv(&ts_path)?;
    let aoi_col = ts.col("aoi_id")?;
    let date_col = ts.col("date")?;
    let raster_col = ts.col("raster")?;
    let mean_col = ts.col("mean")?;
    let count_col = match ts.col_opt("count") {
        Some(i) => i,
        None => bail!(
            "Collapsing needs the 'count' statistic for pixel weighting. Add 'count' to config.stats."
        ),
    };
    let median_col = ts.col_opt("median");
    let p90_col = ts.col_opt("p90");

    let aois = AoiSet::load(
        Path::new(&cfg.aoi_path),
        &cfg.aoi_id_field,
        &cfg.aoi_crs_if_missing,
        None,
    )?;

    let mut groups: BTreeMap<(String, String), CollapseGroup> = BTreeMap::new();
    for r in 0..ts.rows.len() {
        let key = (
            ts.get(r, aoi_col).to_string(),
            ts.get(r, date_col).to_string(),
        );
        groups.entry(key).or_insert(CollapseGroup { rows: Vec::new() }).rows.push(r);
    }

    let mut out = Table::new(
        [
            "aoi_id", "date", "group", "site_id", "site_name", "buffer_m",
            "is_data_center", "mean", "median", "p90", "pixels", "n_tiles",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    // Pixel counts per AOI for the usability pass.
    let mut pixels_by_aoi: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for ((aoi_id, date), g) in &groups {
        let counts: Vec<f64> = g.rows.iter().map(|&r| ts.num(r, count_col)).collect();
        let means: Vec<f64> = g.rows.iter().map(|&r| ts.num(r, mean_col)).collect();
        let wmean = stats::weighted_mean(&means, &counts);
        let wmedian = match median_col {
            Some(c) => {
                let v: Vec<f64> = g.rows.iter().map(|&r| ts.num(r, c)).collect();
                stats::weighted_mean(&v, &counts)
            }
            None => f64::NAN,
        };
        let wp90 = match p90_col {
            Some(c) => {
                let v: Vec<f64> = g.rows.iter().map(|&r| ts.num(r, c)).collect();
                stats::weighted_mean(&v, &counts)
            }
            None => f64::NAN,
        };
        let pixels: f64 = counts.iter().map(|&c| stats::zero_if_nan(c)).sum();
        let n_tiles = g
            .rows
            .iter()
            .map(|&r| ts.get(r, raster_col))
            .collect::<BTreeSet<_>>()
            .len();

        let meta = aois.by_id(aoi_id);
        let s = |v: &Option<String>| v.clone().unwrap_or_default();
        out.rows.push(vec![
            aoi_id.clone(),
            date.clone(),
            meta.map(|a| s(&a.group)).unwrap_or_default(),
            meta.map(|a| s(&a.site_id)).unwrap_or_default(),
            meta.map(|a| s(&a.site_name)).unwrap_or_default(),
            meta.and_then(|a| a.buffer_m).map(|v| fmt_num(v)).unwrap_or_default(),
            meta.and_then(|a| a.is_data_center)
                .map(|v| v.to_string())
                .unwrap_or_default(),
            fmt_num(wmean),
            fmt_num(wmedian),
            fmt_num(wp90),
            fmt_num(pixels),
            n_tiles.to_string(),
        ]);
        pixels_by_aoi.entry(aoi_id.clone()).or_default().push(pixels);
    }

    // Usability: per-AOI p95 support, threshold, flag.
    let thresholds: BTreeMap<String, (f64, f64)> = pixels_by_aoi
        .iter()
        .map(|(aoi_id, pixels)| {
            let p95 = stats::nan_percentile(pixels, 95.0);
            (aoi_id.clone(), (p95, usability_threshold(p95)))
        })
        .collect();

    let out_aoi_col = out.col("aoi_id")?;
    let out_pixels_col = out.col("pixels")?;
    let n = out.rows.len();
    let mut p95s = vec![f64::NAN; n];
    let mut mins = vec![f64::NAN; n];
    let mut usable = vec![String::new(); n];
    for r in 0..n {
        let (p95, threshold) = thresholds[out.get(r, out_aoi_col)];
        p95s[r] = p95;
        mins[r] = threshold;
        let px = out.num(r, out_pixels_col);
        usable[r] = if px.is_finite() && px >= threshold { "1" } else { "0" }.to_string();
    }
    out.add_num_column("p95_pixels", &p95s);
    out.add_num_column("min_pixels_threshold", &mins);
    out.add_str_column("is_usable", usable);

    let usable_col = out.col("is_usable")?;
    let mut filtered = Table::new(out.headers.clone());
    filtered.rows = out
        .rows
        .iter()
        .filter(|row| row[usable_col] == "1")
        .cloned()
        .collect();

    let out_all = out_dir.join("collapsed_aoi_dt.csv");
    let out_usable = out_dir.join("collapsed_aoi_dt_usable.csv");
    out.write_csv(&out_all)?;
    filtered.write_csv(&out_usable)?;
    println!(
        "{} Collapsed {} observation(s), {} usable {} {}",
        text::check_icon(),
        out.rows.len(),
        filtered.rows.len(),
        text::ARROW,
        out_usable.display()
    );
    Ok(())
}

/// Summarize the mean data-center minus control difference per
/// (date, buffer_m) over usable observations.
pub fn run_effects(cfg: &Config) -> Result<()> {
    let out_dir = Path::new(&cfg.outputs_dir);
    let usable_path = out_dir.join("collapsed_aoi_dt_usable.csv");
    if !usable_path.exists() {
        bail!(
            "Missing input: {}. Run the collapse step first.",
            usable_path.display()
        );
    }
    let t = Table::read_csv(&usable_path)?;
    let date_col = t.col("date")?;
    let buf_col = t.col("buffer_m")?;
    let dc_col = t.col("is_data_center")?;
    let mean_col = t.col("mean")?;
    let pixels_col = t.col("pixels")?;

    struct Side {
        means: Vec<f64>,
        pixels: Vec<f64>,
    }
    let mut cells: BTreeMap<(String, String, bool), Side> = BTreeMap::new();
    for r in 0..t.rows.len() {
        let is_dc = matches!(t.get(r, dc_col).trim(), "1" | "true" | "True");
        let key = (
            t.get(r, date_col).to_string(),
            t.get(r, buf_col).to_string(),
            is_dc,
        );
        let side = cells.entry(key).or_insert(Side {
            means: Vec::new(),
            pixels: Vec::new(),
        });
        side.means.push(t.num(r, mean_col));
        side.pixels.push(t.num(r, pixels_col));
    }

    let keys: BTreeSet<(String, String)> = cells
        .keys()
        .map(|(d, b, _)| (d.clone(), b.clone()))
        .collect();

    let mut out = Table::new(
        [
            "date",
            "buffer_m",
            "mean_dc",
            "mean_ctrl",
            "mean_diff_dc_minus_ctrl",
            "pixels_dc",
            "pixels_ctrl",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    for (date, buffer) in keys {
        let side_stats = |is_dc: bool| -> (f64, f64) {
            match cells.get(&(date.clone(), buffer.clone(), is_dc)) {
                Some(s) => (
                    stats::weighted_mean(&s.means, &s.pixels),
                    s.pixels.iter().map(|&p| stats::zero_if_nan(p)).sum(),
                ),
                None => (f64::NAN, 0.0),
            }
        };
        let (mean_dc, px_dc) = side_stats(true);
        let (mean_ctrl, px_ctrl) = side_stats(false);
        out.rows.push(vec![
            date.clone(),
            buffer.clone(),
            fmt_num(mean_dc),
            fmt_num(mean_ctrl),
            fmt_num(mean_dc - mean_ctrl),
            fmt_num(px_dc),
            fmt_num(px_ctrl),
        ]);
    }

    let out_path = out_dir.join("summary_effects_by_date_buffer.csv");
    out.write_csv(&out_path)?;
    println!(
        "{} Wrote {} effect row(s) {} {}",
        text::check_icon(),
        out.rows.len(),
        text::ARROW,
        out_path.display()
    );
    Ok(())
}
