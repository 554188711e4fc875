use approx::assert_relative_eq;
use chrono::{TimeZone, Utc};
use regex::Regex;
use uhi_pipeline::aoi::ring_aoi_id;
use uhi_pipeline::baseline::{baseline_of, risk_score, trend_c_per_year, Bucketing};
use uhi_pipeline::config::TransformSpec;
use uhi_pipeline::covariates::categorical_summary;
use uhi_pipeline::matching::{greedy_match, MatchUnit};
use uhi_pipeline::panel::usability_threshold;
use uhi_pipeline::quality::qc_class;
use uhi_pipeline::stats;
use uhi_pipeline::timeseries::{glob_to_regex, parse_date_from_name};
use uhi_pipeline::zonal::{safe_stat, Stat, ValueTransform};

#[test]
fn test_safe_stat_empty_sample_is_nan_including_count() {
    for stat in [Stat::Mean, Stat::Median, Stat::P90, Stat::Count] {
        assert!(safe_stat(&[], stat).is_nan());
    }
}

#[test]
fn test_safe_stat_all_invalid_sample_is_nan_including_count() {
    let values = [f64::NAN, f64::NAN, f64::INFINITY];
    for stat in [Stat::Mean, Stat::Median, Stat::P90, Stat::Count] {
        assert!(safe_stat(&values, stat).is_nan());
    }
}

#[test]
fn test_safe_stat_counts_only_finite_values() {
    let values = [1.0, 2.0, f64::NAN, 3.0, f64::NAN];
    assert_relative_eq!(safe_stat(&values, Stat::Count), 3.0);
    assert_relative_eq!(safe_stat(&values, Stat::Mean), 2.0);
    assert_relative_eq!(safe_stat(&values, Stat::Median), 2.0);
}

#[test]
fn test_percentile_linear_interpolation() {
    let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
    // numpy-style: rank = 0.9 * 9 = 8.1 -> 9.1
    assert_relative_eq!(stats::nan_percentile(&values, 90.0), 9.1, epsilon = 1e-12);
    assert_relative_eq!(stats::nan_percentile(&values, 50.0), 5.5, epsilon = 1e-12);
    assert_relative_eq!(stats::nan_percentile(&values, 0.0), 1.0);
    assert_relative_eq!(stats::nan_percentile(&values, 100.0), 10.0);
}

#[test]
fn test_value_transform_kelvin_to_celsius() {
    let spec = TransformSpec {
        kind: "scale_offset".to_string(),
        scale: Some(0.02),
        offset: Some(-273.15),
    };
    let transform = ValueTransform::from_spec(&spec).unwrap();
    // 15000 * 0.02 - 273.15 = 26.85
    assert_relative_eq!(transform.apply(15000.0), 26.85, epsilon = 1e-12);

    let identity = ValueTransform::from_spec(&TransformSpec::default()).unwrap();
    assert_relative_eq!(identity.apply(42.5), 42.5);
}

#[test]
fn test_value_transform_rejects_unknown_type() {
    let spec = TransformSpec {
        kind: "log".to_string(),
        scale: None,
        offset: None,
    };
    assert!(ValueTransform::from_spec(&spec).is_err());
}

#[test]
fn test_stat_rejects_unknown_name() {
    assert!(Stat::parse("p99").is_err());
    assert_eq!(Stat::parse("p90").unwrap(), Stat::P90);
}

#[test]
fn test_baseline_group_below_min_obs_is_nan() {
    let b = baseline_of(&[20.0, 21.0, 22.0], 5);
    assert_eq!(b.n_obs, 3);
    assert!(b.mean.is_nan());
    assert!(b.std.is_nan());
    assert!(b.p90.is_nan());

    let b = baseline_of(&[20.0, 21.0, 22.0, 23.0, 24.0], 5);
    assert_eq!(b.n_obs, 5);
    assert_relative_eq!(b.mean, 22.0);
    // population std of 20..24 = sqrt(2)
    assert_relative_eq!(b.std, 2.0f64.sqrt(), epsilon = 1e-12);
}

#[test]
fn test_baseline_min_obs_counts_finite_only() {
    let b = baseline_of(&[20.0, f64::NAN, 21.0, f64::NAN, 22.0, 23.0], 5);
    assert_eq!(b.n_obs, 4);
    assert!(b.mean.is_nan());
}

#[test]
fn test_bucketing_parse_and_values() {
    assert!(Bucketing::parse("week").is_err());
    let dt = Utc.with_ymd_and_hms(2025, 2, 10, 0, 0, 0).unwrap();
    assert_eq!(Bucketing::parse("month").unwrap().bucket(&dt), 2);
    assert_eq!(Bucketing::parse("doy").unwrap().bucket(&dt), 41);
}

#[test]
fn test_risk_score_nan_inputs_give_zero_contribution() {
    let score = risk_score(f64::NAN, f64::NAN, f64::NAN);
    assert_relative_eq!(score, 0.0);
}

#[test]
fn test_risk_score_stays_in_range() {
    // Extreme inputs clip to the 0..100 band.
    assert_relative_eq!(risk_score(100.0, 14.0, 100.0), 100.0);
    assert_relative_eq!(risk_score(-100.0, 0.0, -100.0), 0.0);
    // z=2, 7 hot nights, trend 1 deg/yr: 20 + 12.5 + 5.
    assert_relative_eq!(risk_score(2.0, 7.0, 1.0), 37.5, epsilon = 1e-12);
}

#[test]
fn test_trend_requires_five_valid_pairs() {
    let dts: Vec<_> = (0..4)
        .map(|d| Some(Utc.with_ymd_and_hms(2025, 1, 1 + d, 0, 0, 0).unwrap()))
        .collect();
    let values = vec![1.0, 2.0, 3.0, 4.0];
    assert!(trend_c_per_year(&dts, &values).is_nan());
}

#[test]
fn test_trend_recovers_linear_warming() {
    // One degree per year, sampled every 73.05 days for 10 samples.
    let dts: Vec<_> = (0..10)
        .map(|i| {
            let dt = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::seconds((i as f64 * 0.2 * 365.25 * 86400.0) as i64);
            Some(dt)
        })
        .collect();
    let values: Vec<f64> = (0..10).map(|i| 15.0 + i as f64 * 0.2).collect();
    assert_relative_eq!(trend_c_per_year(&dts, &values), 1.0, epsilon = 1e-6);
}

fn unit(aoi_id: &str, is_dc: bool, buffer_m: f64, features: &[f64]) -> MatchUnit {
    MatchUnit {
        aoi_id: aoi_id.to_string(),
        is_data_center: is_dc,
        buffer_m,
        features: features.to_vec(),
    }
}

#[test]
fn test_matching_without_reuse_never_repeats_a_control() {
    let units = vec![
        unit("dc:a", true, 500.0, &[0.0]),
        unit("dc:b", true, 500.0, &[0.1]),
        unit("ctrl:1", false, 500.0, &[0.05]),
        unit("ctrl:2", false, 500.0, &[0.0]),
        unit("ctrl:3", false, 500.0, &[10.0]),
    ];
    let records = greedy_match(&units, 1, true);
    assert_eq!(records.len(), 2);
    // dc:a goes first (ascending id) and takes the exact match.
    assert_eq!(records[0].data_center_aoi_id, "dc:a");
    assert_eq!(records[0].control_aoi_id, "ctrl:2");
    assert_eq!(records[1].data_center_aoi_id, "dc:b");
    assert_eq!(records[1].control_aoi_id, "ctrl:1");
    assert_ne!(records[0].control_aoi_id, records[1].control_aoi_id);
}

#[test]
fn test_matching_with_reuse_shares_the_nearest_control() {
    let units = vec![
        unit("dc:a", true, 500.0, &[0.0]),
        unit("dc:b", true, 500.0, &[0.1]),
        unit("ctrl:1", false, 500.0, &[0.05]),
        unit("ctrl:2", false, 500.0, &[5.0]),
    ];
    let records = greedy_match(&units, 1, false);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].control_aoi_id, "ctrl:1");
    assert_eq!(records[1].control_aoi_id, "ctrl:1");
}

#[test]
fn test_matching_ranks_are_contiguous_and_ordered_by_distance() {
    let units = vec![
        unit("dc:a", true, 1000.0, &[0.0, 0.0]),
        unit("ctrl:1", false, 1000.0, &[3.0, 0.0]),
        unit("ctrl:2", false, 1000.0, &[1.0, 0.0]),
        unit("ctrl:3", false, 1000.0, &[2.0, 0.0]),
    ];
    let records = greedy_match(&units, 3, true);
    assert_eq!(records.len(), 3);
    for (i, rec) in records.iter().enumerate() {
        assert_eq!(rec.match_rank, i);
    }
    assert_eq!(records[0].control_aoi_id, "ctrl:2");
    assert_eq!(records[1].control_aoi_id, "ctrl:3");
    assert_eq!(records[2].control_aoi_id, "ctrl:1");
    assert!(records[0].distance <= records[1].distance);
    assert!(records[1].distance <= records[2].distance);
}

#[test]
fn test_matching_distance_ties_resolve_by_input_position() {
    let units = vec![
        unit("dc:a", true, 500.0, &[0.0]),
        unit("ctrl:far", false, 500.0, &[2.0]),
        unit("ctrl:near_first", false, 500.0, &[1.0]),
        unit("ctrl:near_second", false, 500.0, &[-1.0]),
    ];
    let records = greedy_match(&units, 1, true);
    assert_eq!(records[0].control_aoi_id, "ctrl:near_first");
}

#[test]
fn test_matching_is_segregated_by_buffer() {
    let units = vec![
        unit("dc:a", true, 500.0, &[0.0]),
        unit("ctrl:wrong_ring", false, 1000.0, &[0.0]),
        unit("ctrl:right_ring", false, 500.0, &[4.0]),
    ];
    let records = greedy_match(&units, 2, true);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].control_aoi_id, "ctrl:right_ring");
    assert_relative_eq!(records[0].buffer_m, 500.0);
}

#[test]
fn test_matching_units_without_a_buffer_sit_out() {
    // An AOI file without a buffer_m attribute surfaces here as a NaN
    // buffer; such units must never match and must never abort the run.
    let units = vec![
        unit("dc:a", true, 500.0, &[0.0]),
        unit("dc:unbuffered", true, f64::NAN, &[0.0]),
        unit("ctrl:1", false, 500.0, &[0.2]),
        unit("ctrl:unbuffered", false, f64::NAN, &[0.1]),
    ];
    let records = greedy_match(&units, 2, true);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data_center_aoi_id, "dc:a");
    assert_eq!(records[0].control_aoi_id, "ctrl:1");
}

#[test]
fn test_ring_aoi_id_keeps_fractional_radii() {
    assert_eq!(ring_aoi_id("dc", "chi_01", 500.0), "dc:chi_01:buf_500m");
    assert_eq!(ring_aoi_id("ctrl", "ctrl_0003", 762.5), "ctrl:ctrl_0003:buf_762.5m");
}

#[test]
fn test_usability_threshold_floors_and_scales() {
    // Small rings: the absolute floor dominates.
    assert_relative_eq!(usability_threshold(10.0), 5.0);
    // Large rings: a quarter of the typical support dominates.
    assert_relative_eq!(usability_threshold(400.0), 100.0);
}

#[test]
fn test_usability_flags_sliver_observations() {
    // Nine full observations at 50 pixels and one sliver at 2.
    let mut pixels = vec![50.0; 9];
    pixels.push(2.0);
    let p95 = stats::nan_percentile(&pixels, 95.0);
    let threshold = usability_threshold(p95);
    let usable: Vec<bool> = pixels.iter().map(|&p| p >= threshold).collect();
    assert_eq!(usable.iter().filter(|&&u| u).count(), 9);
    assert!(!usable[9]);
}

#[test]
fn test_categorical_summary_mode_and_fractions() {
    let values = [21, 21, 21, 22, 23, 23];
    let (mode, fracs) = categorical_summary(&values, &[21, 22, 24]);
    assert_eq!(mode, Some(21));
    assert_relative_eq!(fracs[0], 0.5);
    assert_relative_eq!(fracs[1], 1.0 / 6.0, epsilon = 1e-12);
    assert_relative_eq!(fracs[2], 0.0);
}

#[test]
fn test_categorical_summary_mode_tie_prefers_smallest_class() {
    let values = [23, 21, 23, 21];
    let (mode, _) = categorical_summary(&values, &[21]);
    assert_eq!(mode, Some(21));
}

#[test]
fn test_categorical_summary_empty_is_none_and_nan() {
    let (mode, fracs) = categorical_summary(&[], &[1, 2]);
    assert_eq!(mode, None);
    assert!(fracs.iter().all(|f| f.is_nan()));
}

#[test]
fn test_qc_bitmask_decodes_low_bits() {
    // The low two bits carry the quality class; high bits are flags.
    assert_eq!(qc_class(0.0, 3), 0);
    assert_eq!(qc_class(1.0, 3), 1);
    assert_eq!(qc_class(6.0, 3), 2);
    assert_eq!(qc_class(255.0, 3), 3);
}

#[test]
fn test_qc_keeping_every_class_is_a_noop() {
    let keep_all: Vec<u16> = vec![0, 1, 2, 3];
    for raw in 0..=255u16 {
        assert!(keep_all.contains(&qc_class(raw as f64, 3)));
    }
}

#[test]
fn test_weighted_mean_skips_nan_and_nonpositive_weights() {
    let values = [10.0, 20.0, 30.0, 40.0];
    let weights = [1.0, f64::NAN, 0.0, 3.0];
    // Only (10, 1) and (40, 3) survive.
    assert_relative_eq!(stats::weighted_mean(&values, &weights), 32.5);
    assert!(stats::weighted_mean(&[1.0], &[0.0]).is_nan());
}

#[test]
fn test_clip_and_zero_if_nan() {
    assert_relative_eq!(stats::clip(7.0, -3.0, 6.0), 6.0);
    assert!(stats::clip(f64::NAN, 0.0, 1.0).is_nan());
    assert_relative_eq!(stats::zero_if_nan(f64::NAN), 0.0);
    assert_relative_eq!(stats::zero_if_nan(-2.5), -2.5);
}

#[test]
fn test_date_parsing_from_filenames() {
    let regex = Regex::new(r"(\d{4}-\d{2}-\d{2})").unwrap();
    let parsed = parse_date_from_name("lst_night_2025-03-07.tif", &regex, "%Y-%m-%d");
    let (date, dt) = parsed.unwrap();
    assert_eq!(date, "2025-03-07");
    assert_eq!(dt, Utc.with_ymd_and_hms(2025, 3, 7, 0, 0, 0).unwrap());

    // Non-matching names are dropped, not defaulted.
    assert!(parse_date_from_name("lst_night_latest.tif", &regex, "%Y-%m-%d").is_none());
}

#[test]
fn test_date_parsing_with_time_of_day() {
    let regex = Regex::new(r"_(\d{8}T\d{6})_").unwrap();
    let parsed = parse_date_from_name(
        "ECO_L2T_LST_20250307T031500_tile.tif",
        &regex,
        "%Y%m%dT%H%M%S",
    );
    let (date, dt) = parsed.unwrap();
    assert_eq!(date, "2025-03-07T03:15:00Z");
    assert_eq!(dt, Utc.with_ymd_and_hms(2025, 3, 7, 3, 15, 0).unwrap());
}

#[test]
fn test_glob_matching() {
    let m = glob_to_regex("*_LST.tif").unwrap();
    assert!(m.is_match("ECO_tile_LST.tif"));
    assert!(!m.is_match("ECO_tile_LST.tif.aux.xml"));
    assert!(!m.is_match("ECO_tile_cloud.tif"));

    let m = glob_to_regex("lst_?.tif").unwrap();
    assert!(m.is_match("lst_a.tif"));
    assert!(!m.is_match("lst_ab.tif"));
}

#[test]
fn test_lsq_slope_degenerate_inputs() {
    assert!(stats::lsq_slope(&[1.0], &[2.0]).is_nan());
    assert!(stats::lsq_slope(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]).is_nan());
    assert_relative_eq!(
        stats::lsq_slope(&[0.0, 1.0, 2.0], &[5.0, 7.0, 9.0]),
        2.0,
        epsilon = 1e-12
    );
}
