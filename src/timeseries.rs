//! Time-series assembly: iterate the raster collection, extract zonal
//! statistics for every surviving AOI, and persist the chronologically
//! ordered series.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::aoi::{prune_to_tile, AoiSet};
use crate::config::Config;
use crate::quality::{companions_apply, CompanionSet};
use crate::raster::RasterSource;
use crate::text;
use crate::zonal::{zonal_stats_for_geom, Stat, ZonalRequest};

/// One (AOI, time-slice) row of the output series.
pub struct ZonalRecord {
    pub date: String,
    pub dt: DateTime<Utc>,
    pub aoi_id: String,
    pub raster: String,
    pub crs: String,
    pub values: Vec<f64>,
}

/// Render a float for CSV: empty cell for NaN (the convention every
/// downstream reader of these tables understands).
pub fn fmt_num(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        format!("{}", v)
    }
}

/// Parse a CSV cell as a float; empty or unparseable cells are NaN.
pub fn parse_num(s: &str) -> f64 {
    if s.trim().is_empty() {
        return f64::NAN;
    }
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Parse a timestamp cell: full ISO8601 or a bare `YYYY-MM-DD`.
pub fn parse_dt(s: &str) -> Option<DateTime<Utc>> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// Extract the observation timestamp from a raster filename via the
/// configured regex + chrono format. Returns the rendered date string (date
/// only, or full timestamp when the format captures time-of-day) plus the
/// parsed instant. `None` means the time-slice is dropped (fail-closed).
pub fn parse_date_from_name(
    name: &str,
    date_regex: &Regex,
    date_format: &str,
) -> Option<(String, DateTime<Utc>)> {
    let captures = date_regex.captures(name)?;
    let raw = captures.get(1)?.as_str();
    let dt = if let Ok(dt) = NaiveDateTime::parse_from_str(raw, date_format) {
        dt
    } else {
        NaiveDate::parse_from_str(raw, date_format)
            .ok()?
            .and_hms_opt(0, 0, 0)?
    };
    let has_time = ["%H", "%M", "%S"]
        .iter()
        .any(|t| date_format.contains(t))
        || raw.contains('T');
    let rendered = if has_time {
        dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    } else {
        dt.date().format("%Y-%m-%d").to_string()
    };
    Some((rendered, dt.and_utc()))
}

/// Simple filename glob (`*` and `?` wildcards) compiled to an anchored
/// regex.
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).with_context(|| format!("Invalid raster_glob: {:?}", glob))
}

/// All rasters in `raster_dir` matching the glob, sorted by filename.
pub fn list_rasters(raster_dir: &Path, raster_glob: &str) -> Result<Vec<PathBuf>> {
    let matcher = glob_to_regex(raster_glob)?;
    let mut paths: Vec<PathBuf> = fs::read_dir(raster_dir)
        .with_context(|| format!("Failed to read raster_dir: {}", raster_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| matcher.is_match(n))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Run the full extraction over a raster collection. Returns records sorted
/// by (aoi_id, timestamp).
pub fn extract_timeseries(cfg: &Config, aois: &mut AoiSet) -> Result<Vec<ZonalRecord>> {
    let stats = cfg.parsed_stats()?;
    let transform = cfg.transform()?;
    let date_regex = Regex::new(&cfg.date_regex)?;

    let rasters = list_rasters(Path::new(&cfg.raster_dir), &cfg.raster_glob)?;
    if rasters.is_empty() {
        bail!(
            "No rasters found in {:?} with glob {:?}",
            cfg.raster_dir,
            cfg.raster_glob
        );
    }

    let request = ZonalRequest {
        stats: &stats,
        transform,
        nodata_equals: cfg.nodata_equals,
        nodata_below: cfg.nodata_below,
        quality: &cfg.quality,
    };

    let mut records: Vec<ZonalRecord> = Vec::new();
    let total = rasters.len();
    for (done, raster_path) in rasters.iter().enumerate() {
        let name = raster_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        // Skip unknown-dated rasters; keep the pipeline strict.
        let (date, dt) = match parse_date_from_name(&name, &date_regex, &cfg.date_format) {
            Some(parsed) => parsed,
            None => continue,
        };

        let src = RasterSource::open(raster_path)?;
        let crs_key = src.projection_wkt();
        let crs_label = src.crs_label();
        let target = src.spatial_ref()?;
        let tile_bounds = src.bounds();

        let (surviving, geoms) = {
            let projected = aois.projected(&crs_key, &target)?;
            let surviving = prune_to_tile(projected, &tile_bounds);
            let geoms: Vec<_> = surviving.iter().map(|&i| projected[i].clone()).collect();
            (surviving, geoms)
        };
        if surviving.is_empty() {
            continue;
        }

        // Companion rasters open once per tile; dropped (closed) at the end
        // of this iteration on every path.
        let companions = if companions_apply(raster_path, &cfg.quality) {
            CompanionSet::locate(raster_path, &cfg.quality)
        } else {
            None
        };

        for (&aoi_index, geom) in surviving.iter().zip(geoms.iter()) {
            let values = zonal_stats_for_geom(&src, geom, &request, companions.as_ref())?;
            records.push(ZonalRecord {
                date: date.clone(),
                dt,
                aoi_id: aois.get(aoi_index).aoi_id.clone(),
                raster: name.clone(),
                crs: crs_label.clone(),
                values,
            });
        }

        print!(
            "\rExtracting zonal statistics... {:.0}%",
            (done + 1) as f32 / total as f32 * 100.0
        );
        let _ = std::io::stdout().flush();
    }
    println!();

    if records.is_empty() {
        let examples: Vec<String> = rasters
            .iter()
            .take(20)
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
            .map(|n| format!("  - {}", n))
            .collect();
        bail!(
            "No zonal-stat records were produced.\n\n\
             Most likely: your `date_regex` / `date_format` did not match any raster filenames, \
             so every raster was skipped.\n\n\
             - raster_dir: {}\n\
             - raster_glob: {}\n\
             - date_regex: {:?}\n\
             - date_format: {:?}\n\
             - example filenames (first {}):\n{}",
            cfg.raster_dir,
            cfg.raster_glob,
            cfg.date_regex,
            cfg.date_format,
            examples.len(),
            examples.join("\n")
        );
    }

    records.sort_by(|a, b| a.aoi_id.cmp(&b.aoi_id).then(a.dt.cmp(&b.dt)));
    Ok(records)
}

/// Write `timeseries.csv` in the canonical column order.
pub fn write_timeseries_csv(
    out_path: &Path,
    cfg: &Config,
    stats: &[Stat],
    records: &[ZonalRecord],
) -> Result<()> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let mut header = vec![
        "project".to_string(),
        "date".to_string(),
        "aoi_id".to_string(),
        "raster".to_string(),
        "crs".to_string(),
        "units".to_string(),
    ];
    header.extend(stats.iter().map(|s| s.name().to_string()));
    wtr.write_record(&header)?;
    for rec in records {
        let mut row = vec![
            cfg.project_name.clone(),
            rec.date.clone(),
            rec.aoi_id.clone(),
            rec.raster.clone(),
            rec.crs.clone(),
            cfg.value_units.clone(),
        ];
        row.extend(rec.values.iter().map(|v| fmt_num(*v)));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Extraction entry point used by the CLI: extract, persist, report.
pub fn run_extract(cfg: &Config) -> Result<PathBuf> {
    let mut aois = AoiSet::load(
        Path::new(&cfg.aoi_path),
        &cfg.aoi_id_field,
        &cfg.aoi_crs_if_missing,
        cfg.buffer_m,
    )?;
    println!(
        "{} Loaded {} AOIs from {}",
        text::check_icon(),
        aois.len(),
        cfg.aoi_path
    );

    let records = extract_timeseries(cfg, &mut aois)?;
    let stats = cfg.parsed_stats()?;
    let out_path = Path::new(&cfg.outputs_dir).join("timeseries.csv");
    write_timeseries_csv(&out_path, cfg, &stats, &records)?;
    println!(
        "{} Wrote {} records {} {}",
        text::check_icon(),
        records.len(),
        text::ARROW,
        out_path.display()
    );
    Ok(out_path)
}
