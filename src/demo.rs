//! Synthetic demo dataset: a month of small nightly LST tiles, three AOI
//! boxes and a ready-to-run configuration, so the whole pipeline can be
//! exercised end to end without downloading satellite data.
//!
//! The signal is deliberately simple: a seasonal sine plus a slow warming
//! trend plus Gaussian noise, with a fixed +4 degree hotspot in the
//! south-east quadrant and a 2-pixel nodata border. The hotspot AOI should
//! always come out warmer than the cool AOI, which the end-to-end test
//! leans on.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use gdal::spatial_ref::SpatialRef;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use crate::raster::write_geotiff;
use crate::text;

pub const DEMO_NODATA: f64 = -9999.0;
const GRID: usize = 50;
const DAYS: usize = 30;
const PIXEL_DEG: f64 = 0.01;
const WEST: f64 = -88.2;
const NORTH: f64 = 42.2;

/// The demo AOI boxes as (id, west, south, east, north).
pub const DEMO_AOIS: [(&str, f64, f64, f64, f64); 3] = [
    ("aoi_cool", -88.15, 41.75, -87.95, 41.95),
    ("aoi_mid", -88.00, 41.85, -87.80, 42.05),
    ("aoi_hotspot", -87.92, 41.75, -87.75, 41.92),
];

/// Standard normal draw via Box-Muller.
fn normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Pixel value of demo tile `day` at (row, col), before the nodata border.
pub fn demo_signal(day: usize, row: usize, col: usize, noise: f64) -> f64 {
    let seasonal = 2.5 * (day as f64 / DAYS as f64 * 2.0 * PI).sin();
    let trend = 0.05 * day as f64;
    let hotspot = if col > 30 && row > 30 { 4.0 } else { 0.0 };
    18.0 + seasonal + trend + hotspot + noise
}

/// Generate rasters, AOIs and config under `out_dir`. Returns the config
/// path.
pub fn run_demo(out_dir: &Path, seed: u64) -> Result<std::path::PathBuf> {
    let raster_dir = out_dir.join("rasters");
    fs::create_dir_all(&raster_dir)
        .with_context(|| format!("Failed to create {}", raster_dir.display()))?;

    let wkt = SpatialRef::from_epsg(4326)?.to_wkt()?;
    let geo = [WEST, PIXEL_DEG, 0.0, NORTH, 0.0, -PIXEL_DEG];
    let mut rng = StdRng::seed_from_u64(seed);
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date");

    for day in 0..DAYS {
        let date = start + Duration::days(day as i64);
        let mut values = vec![0f32; GRID * GRID];
        for row in 0..GRID {
            for col in 0..GRID {
                let v = if row < 2 || col < 2 {
                    DEMO_NODATA
                } else {
                    demo_signal(day, row, col, 0.6 * normal(&mut rng))
                };
                values[row * GRID + col] = v as f32;
            }
        }
        let path = raster_dir.join(format!("lst_night_{}.tif", date.format("%Y-%m-%d")));
        write_geotiff(&path, GRID, GRID, geo, &wkt, DEMO_NODATA, values)?;
    }
    println!(
        "{} Wrote {} demo raster(s) {} {}",
        text::check_icon(),
        DAYS,
        text::ARROW,
        raster_dir.display()
    );

    let aoi_path = out_dir.join("aois.geojson");
    let features: Vec<serde_json::Value> = DEMO_AOIS
        .iter()
        .map(|&(id, west, south, east, north)| {
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[
                        [west, south], [east, south], [east, north],
                        [west, north], [west, south],
                    ]],
                },
                "properties": {"aoi_id": id},
            })
        })
        .collect();
    fs::write(
        &aoi_path,
        serde_json::to_string_pretty(&json!({
            "type": "FeatureCollection",
            "features": features,
        }))?,
    )?;
    println!(
        "{} Wrote {} demo AOI(s) {} {}",
        text::check_icon(),
        DEMO_AOIS.len(),
        text::ARROW,
        aoi_path.display()
    );

    let config_path = out_dir.join("config.json");
    let config = json!({
        "project_name": "uhi_demo",
        "aoi_path": aoi_path.to_string_lossy(),
        "aoi_id_field": "aoi_id",
        "raster_dir": raster_dir.to_string_lossy(),
        "raster_glob": "*.tif",
        "date_regex": "(\\d{4}-\\d{2}-\\d{2})",
        "date_format": "%Y-%m-%d",
        "value_units": "degC",
        "nodata_equals": DEMO_NODATA,
        "stats": ["mean", "median", "p90", "count"],
        "baseline": {"grouping": "month", "min_obs_per_group": 5},
        "outputs_dir": out_dir.join("outputs").to_string_lossy(),
        "export_geojson_path": out_dir.join("outputs/aoi_risk_latest.geojson").to_string_lossy(),
    });
    fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;
    println!(
        "{} Wrote demo config {} {}",
        text::check_icon(),
        text::ARROW,
        config_path.display()
    );
    Ok(config_path)
}
