use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use uhi_pipeline::baseline::run_anomaly;
use uhi_pipeline::config::load_config;
use uhi_pipeline::demo::run_demo;
use uhi_pipeline::matching::run_matching;
use uhi_pipeline::panel::run_collapse;
use uhi_pipeline::raster::RasterSource;
use uhi_pipeline::table::Table;
use uhi_pipeline::timeseries::run_extract;
use uhi_pipeline::zonal::{safe_stat, sample_polygon, Stat};

fn fresh_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_demo_pipeline_extract_anomaly_collapse() {
    let dir = fresh_dir("uhi_e2e");
    let config_path = run_demo(&dir, 42).unwrap();
    let cfg = load_config(&config_path).unwrap();

    let ts_path = run_extract(&cfg).unwrap();
    let ts = Table::read_csv(&ts_path).unwrap();
    // 3 AOIs x 30 daily rasters.
    assert_eq!(ts.rows.len(), 90);

    let date_col = ts.col("date").unwrap();
    let aoi_col = ts.col("aoi_id").unwrap();
    let mean_col = ts.col("mean").unwrap();
    let count_col = ts.col("count").unwrap();

    // The hotspot AOI must come out warmer than the cool AOI on every date.
    let mut by_date: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for r in 0..ts.rows.len() {
        assert!(ts.num(r, count_col) > 0.0);
        by_date
            .entry(ts.get(r, date_col).to_string())
            .or_default()
            .insert(ts.get(r, aoi_col).to_string(), ts.num(r, mean_col));
    }
    assert_eq!(by_date.len(), 30);
    for (date, means) in &by_date {
        let hot = means["aoi_hotspot"];
        let cool = means["aoi_cool"];
        assert!(
            hot > cool,
            "hotspot ({}) not warmer than cool ({}) on {}",
            hot,
            cool,
            date
        );
    }

    run_anomaly(&cfg).unwrap();
    let latest = Table::read_csv(&Path::new(&cfg.outputs_dir).join("aoi_summary_latest.csv"))
        .unwrap();
    assert_eq!(latest.rows.len(), 3);
    let risk_col = latest.col("risk_score").unwrap();
    let hot14_col = latest.col("hot_nights_14").unwrap();
    for r in 0..latest.rows.len() {
        let risk = latest.num(r, risk_col);
        assert!(risk.is_finite() && (0.0..=100.0).contains(&risk));
        let hot14 = latest.num(r, hot14_col);
        assert!((0.0..=14.0).contains(&hot14));
    }

    // All 30 observations share one calendar month, so every baseline group
    // clears the minimum count.
    let full = Table::read_csv(&Path::new(&cfg.outputs_dir).join("aoi_summary_full.csv")).unwrap();
    assert_eq!(full.rows.len(), 3);
    let n_obs_col = full.col("n_obs").unwrap();
    for r in 0..full.rows.len() {
        assert_eq!(full.get(r, n_obs_col), "30");
    }

    run_collapse(&cfg).unwrap();
    let collapsed =
        Table::read_csv(&Path::new(&cfg.outputs_dir).join("collapsed_aoi_dt.csv")).unwrap();
    assert_eq!(collapsed.rows.len(), 90);
    // One tile per date and uniform support: everything is usable.
    let usable_col = collapsed.col("is_usable").unwrap();
    let tiles_col = collapsed.col("n_tiles").unwrap();
    for r in 0..collapsed.rows.len() {
        assert_eq!(collapsed.get(r, usable_col), "1");
        assert_eq!(collapsed.get(r, tiles_col), "1");
    }

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_matching_drops_rows_with_an_empty_buffer_cell() {
    let dir = fresh_dir("uhi_match_nobuf");

    // dc:bare has no buffer_m value, the way an AOI drawn by hand (without
    // the ring attributes) lands in the collapsed table.
    let collapsed_path = dir.join("collapsed.csv");
    fs::write(
        &collapsed_path,
        "aoi_id,site_id,is_data_center,buffer_m,is_usable\n\
         dc:a:buf_500m,a,1,500,1\n\
         dc:bare,bare,1,,1\n\
         ctrl:1:buf_500m,c1,0,500,1\n",
    )
    .unwrap();
    let cov_path = dir.join("covariates.csv");
    fs::write(
        &cov_path,
        "aoi_id,elev_mean\ndc:a:buf_500m,10\ndc:bare,11\nctrl:1:buf_500m,12\n",
    )
    .unwrap();

    let out_path = dir.join("matches.csv");
    run_matching(
        &collapsed_path,
        &cov_path,
        &out_path,
        1,
        &["elev_mean".to_string()],
        true,
    )
    .unwrap();

    let pairs = Table::read_csv(&out_path).unwrap();
    assert_eq!(pairs.rows.len(), 1);
    let dc_col = pairs.col("data_center_aoi_id").unwrap();
    assert_eq!(pairs.get(0, dc_col), "dc:a:buf_500m");

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_nodata_border_is_excluded_from_count() {
    let dir = fresh_dir("uhi_border");
    run_demo(&dir, 7).unwrap();

    let tile = dir.join("rasters/lst_night_2025-01-01.tif");
    let src = RasterSource::open(&tile).unwrap();

    // A 10x10 pixel box in the raster's top-left corner. The demo grid
    // carries a 2-pixel nodata border, leaving an 8x8 block of valid pixels.
    let geom = gdal::vector::Geometry::bbox(-88.2, 42.1, -88.1, 42.2).unwrap();
    let sample = sample_polygon(&src, &geom, Some(-9999.0), None)
        .unwrap()
        .expect("polygon overlaps the raster");
    let flat: Vec<f64> = sample.iter().copied().collect();
    assert_eq!(safe_stat(&flat, Stat::Count), 64.0);
    // Values inside are plausible temperatures, not the sentinel.
    assert!(safe_stat(&flat, Stat::Mean) > 0.0);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_polygon_outside_raster_gives_nan_row() {
    let dir = fresh_dir("uhi_outside");
    run_demo(&dir, 11).unwrap();

    let tile = dir.join("rasters/lst_night_2025-01-02.tif");
    let src = RasterSource::open(&tile).unwrap();

    let geom = gdal::vector::Geometry::bbox(10.0, 50.0, 10.5, 50.5).unwrap();
    let sample = sample_polygon(&src, &geom, Some(-9999.0), None).unwrap();
    assert!(sample.is_none());

    fs::remove_dir_all(&dir).unwrap();
}
