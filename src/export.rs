//! GeoJSON exports for mapping: the latest per-AOI risk snapshot and the
//! cumulative data-center effect layer.
//!
//! Geometries come from the AOI source (already WGS84-normalized on load);
//! tabular properties come from the summary CSVs. Numeric-looking cells are
//! emitted as JSON numbers, empty cells as null, so downstream web maps can
//! style on the values directly.

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::aoi::AoiSet;
use crate::config::Config;
use crate::stats;
use crate::table::Table;
use crate::text;
use crate::timeseries::parse_dt;

fn num_value(v: f64) -> Value {
    if v.is_finite() {
        serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else {
        Value::Null
    }
}

fn cell_value(s: &str) -> Value {
    let t = s.trim();
    if t.is_empty() {
        return Value::Null;
    }
    if let Ok(v) = t.parse::<f64>() {
        if v.is_finite() {
            if let Some(num) = serde_json::Number::from_f64(v) {
                return Value::Number(num);
            }
        }
    }
    Value::String(t.to_string())
}

fn geometry_value(geom: &gdal::vector::Geometry) -> Result<Value> {
    let raw = geom.json()?;
    serde_json::from_str(&raw).context("GDAL produced unparseable geometry JSON")
}

fn write_feature_collection(path: &Path, features: Vec<Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let fc = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    fs::write(path, serde_json::to_string_pretty(&fc)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Export the latest per-AOI summary (anomaly, hot-night count, trend, risk
/// score) as a GeoJSON layer.
pub fn run_export_risk(cfg: &Config) -> Result<()> {
    let summary_path = Path::new(&cfg.outputs_dir).join("aoi_summary_latest.csv");
    if !summary_path.exists() {
        bail!(
            "Missing input: {}. Run the anomaly step first.",
            summary_path.display()
        );
    }
    let summary = Table::read_csv(&summary_path)?;
    let aoi_col = summary.col("aoi_id")?;

    let aois = AoiSet::load(
        Path::new(&cfg.aoi_path),
        &cfg.aoi_id_field,
        &cfg.aoi_crs_if_missing,
        cfg.buffer_m,
    )?;

    let mut features = Vec::new();
    let mut skipped = 0usize;
    for r in 0..summary.rows.len() {
        let aoi_id = summary.get(r, aoi_col);
        let aoi = match aois.by_id(aoi_id) {
            Some(a) => a,
            None => {
                skipped += 1;
                continue;
            }
        };
        let mut props = Map::new();
        for (c, header) in summary.headers.iter().enumerate() {
            props.insert(header.clone(), cell_value(summary.get(r, c)));
        }
        features.push(json!({
            "type": "Feature",
            "geometry": geometry_value(&aoi.geometry)?,
            "properties": Value::Object(props),
        }));
    }
    if skipped > 0 {
        println!(
            "{}",
            text::warning(&format!(
                "Skipped {} summary row(s) with no matching AOI geometry",
                skipped
            ))
        );
    }

    let out_path = Path::new(&cfg.export_geojson_path);
    write_feature_collection(out_path, features)?;
    println!(
        "{} Exported risk snapshot {} {}",
        text::check_icon(),
        text::ARROW,
        out_path.display()
    );
    Ok(())
}

/// Optional site attributes joined into the effect export. Keyed by site_id;
/// an opening year splits the deltas into pre/post periods at Jan 1 of that
/// year.
fn load_site_attrs(path: &Path) -> Result<BTreeMap<String, i32>> {
    let t = Table::read_csv(path)?;
    let site_col = t.col("site_id")?;
    let year_col = t.col("opening_year")?;
    let mut out = BTreeMap::new();
    for r in 0..t.rows.len() {
        let year = t.num(r, year_col);
        if year.is_finite() {
            out.insert(t.get(r, site_col).to_string(), year as i32);
        }
    }
    Ok(out)
}

struct DeltaAccum {
    deltas: Vec<f64>,
    weights: Vec<f64>,
    pre: Vec<(f64, f64)>,
    post: Vec<(f64, f64)>,
}

/// Export the cumulative data-center effect as GeoJSON: for every data-center
/// ring, the pixel-weighted mean of (ring mean - control mean at the same
/// date and buffer), overall and split pre/post the site's opening date.
pub fn run_export_effects(
    cfg: &Config,
    attrs_path: Option<&Path>,
    out_path: &Path,
) -> Result<()> {
    let usable_path = Path::new(&cfg.outputs_dir).join("collapsed_aoi_dt_usable.csv");
    if !usable_path.exists() {
        bail!(
            "Missing input: {}. Run the collapse step first.",
            usable_path.display()
        );
    }
    let t = Table::read_csv(&usable_path)?;
    let aoi_col = t.col("aoi_id")?;
    let date_col = t.col("date")?;
    let buf_col = t.col("buffer_m")?;
    let dc_col = t.col("is_data_center")?;
    let mean_col = t.col("mean")?;
    let pixels_col = t.col("pixels")?;
    let site_col = t.col("site_id")?;

    let attrs = match attrs_path {
        Some(p) => load_site_attrs(p)?,
        None => BTreeMap::new(),
    };

    // Control reference per (date, buffer): pixel-weighted mean over control
    // rows.
    let mut ctrl: BTreeMap<(String, String), (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for r in 0..t.rows.len() {
        if matches!(t.get(r, dc_col).trim(), "1" | "true" | "True") {
            continue;
        }
        let key = (
            t.get(r, date_col).to_string(),
            t.get(r, buf_col).to_string(),
        );
        let entry = ctrl.entry(key).or_default();
        entry.0.push(t.num(r, mean_col));
        entry.1.push(t.num(r, pixels_col));
    }
    let ctrl_mean: BTreeMap<(String, String), f64> = ctrl
        .into_iter()
        .map(|(key, (means, px))| (key, stats::weighted_mean(&means, &px)))
        .collect();

    let mut accum: BTreeMap<String, DeltaAccum> = BTreeMap::new();
    let mut site_of: BTreeMap<String, String> = BTreeMap::new();
    for r in 0..t.rows.len() {
        if !matches!(t.get(r, dc_col).trim(), "1" | "true" | "True") {
            continue;
        }
        let date = t.get(r, date_col).to_string();
        let buffer = t.get(r, buf_col).to_string();
        let reference = match ctrl_mean.get(&(date.clone(), buffer)) {
            Some(&m) if m.is_finite() => m,
            _ => continue,
        };
        let mean = t.num(r, mean_col);
        let pixels = t.num(r, pixels_col);
        if !mean.is_finite() {
            continue;
        }
        let delta = mean - reference;
        let weight = stats::zero_if_nan(pixels).max(0.0);

        let aoi_id = t.get(r, aoi_col).to_string();
        let site_id = t.get(r, site_col).to_string();
        let a = accum.entry(aoi_id.clone()).or_insert(DeltaAccum {
            deltas: Vec::new(),
            weights: Vec::new(),
            pre: Vec::new(),
            post: Vec::new(),
        });
        a.deltas.push(delta);
        a.weights.push(weight);
        if let Some(&year) = attrs.get(&site_id) {
            let opened = format!("{:04}-01-01", year);
            if let (Some(obs), Some(open_dt)) = (parse_dt(&date), parse_dt(&opened)) {
                if obs < open_dt {
                    a.pre.push((delta, weight));
                } else {
                    a.post.push((delta, weight));
                }
            }
        }
        site_of.insert(aoi_id, site_id);
    }
    if accum.is_empty() {
        bail!("No usable data-center observations with a control reference to export");
    }

    let aois = AoiSet::load(
        Path::new(&cfg.aoi_path),
        &cfg.aoi_id_field,
        &cfg.aoi_crs_if_missing,
        None,
    )?;

    let mut features = Vec::new();
    for (aoi_id, a) in &accum {
        let aoi = match aois.by_id(aoi_id) {
            Some(aoi) => aoi,
            None => continue,
        };
        let split = |pairs: &[(f64, f64)]| -> f64 {
            let d: Vec<f64> = pairs.iter().map(|p| p.0).collect();
            let w: Vec<f64> = pairs.iter().map(|p| p.1).collect();
            stats::weighted_mean(&d, &w)
        };
        let overall = stats::weighted_mean(&a.deltas, &a.weights);
        let mut props = Map::new();
        props.insert("aoi_id".into(), Value::String(aoi_id.clone()));
        props.insert(
            "site_id".into(),
            Value::String(site_of.get(aoi_id).cloned().unwrap_or_default()),
        );
        props.insert(
            "buffer_m".into(),
            aoi.buffer_m
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
        props.insert("delta_mean_c".into(), num_value(overall));
        props.insert("delta_pre_mean_c".into(), num_value(split(&a.pre)));
        props.insert("delta_post_mean_c".into(), num_value(split(&a.post)));
        props.insert("n_obs".into(), json!(a.deltas.len()));
        props.insert("n_obs_pre".into(), json!(a.pre.len()));
        props.insert("n_obs_post".into(), json!(a.post.len()));
        features.push(json!({
            "type": "Feature",
            "geometry": geometry_value(&aoi.geometry)?,
            "properties": Value::Object(props),
        }));
    }

    write_feature_collection(out_path, features)?;
    println!(
        "{} Exported {} data-center effect feature(s) {} {}",
        text::check_icon(),
        accum.len(),
        text::ARROW,
        out_path.display()
    );
    Ok(())
}
