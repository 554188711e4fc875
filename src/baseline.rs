//! Seasonal baselines, anomalies and the composite risk score.
//!
//! Observations are grouped per (AOI, calendar bucket); a group below the
//! configured minimum count contributes NaN baseline fields to every member
//! observation, and NaN baselines flow through to NaN anomaly/z/hot-flag.
//! The risk score, by contrast, treats NaN inputs as a zero contribution: a
//! site with too little history gets a defined, non-alarming score instead
//! of a missing one.

use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::Config;
use crate::stats;
use crate::table::Table;
use crate::text;
use crate::timeseries::{fmt_num, parse_dt};

/// Calendar bucketing for the seasonal baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucketing {
    Month,
    DayOfYear,
}

impl Bucketing {
    pub fn parse(name: &str) -> Result<Bucketing> {
        match name {
            "month" => Ok(Bucketing::Month),
            "doy" => Ok(Bucketing::DayOfYear),
            other => bail!("Unknown baseline.grouping: {:?}", other),
        }
    }

    pub fn bucket(&self, dt: &DateTime<Utc>) -> u32 {
        match self {
            Bucketing::Month => dt.month(),
            Bucketing::DayOfYear => dt.ordinal(),
        }
    }
}

/// Baseline reduction of one (AOI, bucket) group.
#[derive(Debug, Clone, Copy)]
pub struct BaselineValue {
    pub mean: f64,
    pub std: f64,
    pub p90: f64,
    pub n_obs: usize,
}

/// Reduce a group's primary-statistic history. Groups below `min_obs` (counted
/// over finite observations) get NaN for all three baseline fields.
pub fn baseline_of(values: &[f64], min_obs: usize) -> BaselineValue {
    let n_obs = values.iter().filter(|v| v.is_finite()).count();
    if n_obs < min_obs {
        return BaselineValue {
            mean: f64::NAN,
            std: f64::NAN,
            p90: f64::NAN,
            n_obs,
        };
    }
    BaselineValue {
        mean: stats::nan_mean(values),
        std: stats::nan_std_pop(values),
        p90: stats::nan_percentile(values, 90.0),
        n_obs,
    }
}

/// Least-squares trend of value per year. Needs at least 5 valid
/// (timestamp, value) pairs; NaN otherwise.
pub fn trend_c_per_year(dts: &[Option<DateTime<Utc>>], values: &[f64]) -> f64 {
    let pairs: Vec<(DateTime<Utc>, f64)> = dts
        .iter()
        .zip(values.iter())
        .filter_map(|(dt, &v)| match (dt, v.is_finite()) {
            (Some(d), true) => Some((*d, v)),
            _ => None,
        })
        .collect();
    if pairs.len() < 5 {
        return f64::NAN;
    }
    let t0 = pairs.iter().map(|p| p.0).min().expect("non-empty");
    const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;
    let x: Vec<f64> = pairs
        .iter()
        .map(|p| (p.0 - t0).num_seconds() as f64 / SECONDS_PER_YEAR)
        .collect();
    let y: Vec<f64> = pairs.iter().map(|p| p.1).collect();
    stats::lsq_slope(&x, &y)
}

/// Composite risk score in [0, 100]. NaN inputs contribute 0.
pub fn risk_score(z: f64, hot_nights_14: f64, trend_per_year: f64) -> f64 {
    let z_part = stats::zero_if_nan(stats::clip(z, -3.0, 6.0)) * 10.0;
    let freq_part = stats::zero_if_nan(hot_nights_14) / 14.0 * 25.0;
    let trend_part = stats::zero_if_nan(stats::clip(trend_per_year, 0.0, 5.0)) * 5.0;
    stats::clip(z_part + freq_part + trend_part, 0.0, 100.0)
}

/// Compute anomalies + per-AOI summaries from `timeseries.csv` and write the
/// three output tables.
pub fn run_anomaly(cfg: &Config) -> Result<()> {
    let out_dir = Path::new(&cfg.outputs_dir);
    let ts_path = out_dir.join("timeseries.csv");
    if !ts_path.exists() {
        bail!(
            "Missing input: {}. Run the extract step first.",
            ts_path.display()
        );
    }
    let bucketing = cfg.bucketing()?;
    let min_obs = cfg.baseline.min_obs_per_group;

    let mut ts = Table::read_csv(&ts_path)?;
    let mean_col = match ts.col_opt("mean") {
        Some(i) => i,
        None => bail!("Expected 'mean' column in timeseries.csv. Add 'mean' to config.stats."),
    };
    let date_col = ts.col("date")?;
    let aoi_col = ts.col("aoi_id")?;

    let n = ts.rows.len();
    let dts: Vec<Option<DateTime<Utc>>> =
        (0..n).map(|r| parse_dt(ts.get(r, date_col))).collect();
    let buckets: Vec<Option<u32>> = dts
        .iter()
        .map(|dt| dt.as_ref().map(|d| bucketing.bucket(d)))
        .collect();
    let means: Vec<f64> = (0..n).map(|r| ts.num(r, mean_col)).collect();

    // Baselines per (aoi_id, bucket).
    let mut groups: BTreeMap<(String, u32), Vec<f64>> = BTreeMap::new();
    for r in 0..n {
        if let Some(bucket) = buckets[r] {
            groups
                .entry((ts.get(r, aoi_col).to_string(), bucket))
                .or_default()
                .push(means[r]);
        }
    }
    let baselines: BTreeMap<(String, u32), BaselineValue> = groups
        .into_iter()
        .map(|(key, values)| (key, baseline_of(&values, min_obs)))
        .collect();

    let mut full = Table::new(
        ["aoi_id", "group", "baseline_mean", "baseline_std", "baseline_p90", "n_obs"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    for ((aoi_id, bucket), b) in &baselines {
        full.rows.push(vec![
            aoi_id.clone(),
            bucket.to_string(),
            fmt_num(b.mean),
            fmt_num(b.std),
            fmt_num(b.p90),
            b.n_obs.to_string(),
        ]);
    }

    // Join baselines back and derive anomaly columns.
    let mut b_mean = vec![f64::NAN; n];
    let mut b_std = vec![f64::NAN; n];
    let mut b_p90 = vec![f64::NAN; n];
    let mut anomaly = vec![f64::NAN; n];
    let mut z = vec![f64::NAN; n];
    let mut hot = vec![f64::NAN; n];
    for r in 0..n {
        if let Some(bucket) = buckets[r] {
            if let Some(b) = baselines.get(&(ts.get(r, aoi_col).to_string(), bucket)) {
                b_mean[r] = b.mean;
                b_std[r] = b.std;
                b_p90[r] = b.p90;
                anomaly[r] = means[r] - b.mean;
                z[r] = anomaly[r] / b.std;
                if b.p90.is_finite() && means[r].is_finite() {
                    hot[r] = if means[r] > b.p90 { 1.0 } else { 0.0 };
                }
            }
        }
    }

    ts.add_str_column(
        "dt",
        dts.iter()
            .map(|dt| {
                dt.map(|d| d.format("%Y-%m-%dT%H:%M:%SZ").to_string())
                    .unwrap_or_default()
            })
            .collect(),
    );
    ts.add_str_column(
        "group",
        buckets
            .iter()
            .map(|b| b.map(|v| v.to_string()).unwrap_or_default())
            .collect(),
    );
    ts.add_num_column("baseline_mean", &b_mean);
    ts.add_num_column("baseline_std", &b_std);
    ts.add_num_column("baseline_p90", &b_p90);
    ts.add_num_column("anomaly", &anomaly);
    ts.add_num_column("z", &z);
    ts.add_num_column("is_hot_night", &hot);

    // Row order for per-AOI windows: (aoi_id, dt) ascending.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        ts.get(a, aoi_col)
            .cmp(ts.get(b, aoi_col))
            .then(dts[a].cmp(&dts[b]))
    });

    let aoi_ids: BTreeSet<String> = (0..n).map(|r| ts.get(r, aoi_col).to_string()).collect();

    let mut latest = Table::new(ts.headers.clone());
    latest.headers.push("hot_nights_14".to_string());
    latest.headers.push("trend_c_per_year".to_string());
    latest.headers.push("risk_score".to_string());

    let z_col = ts.col("z")?;
    for aoi_id in &aoi_ids {
        let rows: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&r| ts.get(r, aoi_col) == aoi_id)
            .collect();
        let last = *rows.last().expect("every id has rows");

        let hot_14: f64 = rows
            .iter()
            .rev()
            .take(14)
            .map(|&r| stats::zero_if_nan(hot[r]))
            .sum();
        let aoi_dts: Vec<Option<DateTime<Utc>>> = rows.iter().map(|&r| dts[r]).collect();
        let aoi_means: Vec<f64> = rows.iter().map(|&r| means[r]).collect();
        let trend = trend_c_per_year(&aoi_dts, &aoi_means);
        let score = risk_score(ts.num(last, z_col), hot_14, trend);

        let mut row = ts.rows[last].clone();
        row.push(format!("{}", hot_14 as i64));
        row.push(fmt_num(trend));
        row.push(fmt_num(score));
        latest.rows.push(row);
    }

    // Persist in the (aoi_id, dt) order computed above.
    let reordered: Vec<Vec<String>> = order.iter().map(|&r| ts.rows[r].clone()).collect();
    ts.rows = reordered;

    let out_ts = out_dir.join("timeseries_with_anomaly.csv");
    let out_latest = out_dir.join("aoi_summary_latest.csv");
    let out_full = out_dir.join("aoi_summary_full.csv");
    ts.write_csv(&out_ts)?;
    latest.write_csv(&out_latest)?;
    full.write_csv(&out_full)?;
    println!("{} Wrote: {}", text::check_icon(), out_ts.display());
    println!("{} Wrote: {}", text::check_icon(), out_latest.display());
    println!("{} Wrote: {}", text::check_icon(), out_full.display());
    Ok(())
}
