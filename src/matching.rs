//! Greedy nearest-neighbour matching of control sites to data-center sites
//! on static covariates.
//!
//! Matching happens per buffer radius so a 1 km data-center ring is only ever
//! compared against 1 km control rings. Covariates are standardized jointly
//! over all units in the buffer before distances are taken, so no single
//! feature dominates by unit scale. With reuse disabled (the default) a
//! control is consumed globally: once matched in any buffer it is out of the
//! pool for every later assignment.

use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::path::Path;

use crate::table::Table;
use crate::text;
use crate::timeseries::fmt_num;

/// One matchable unit: a (site, buffer) ring with its covariate vector.
#[derive(Debug, Clone)]
pub struct MatchUnit {
    pub aoi_id: String,
    pub is_data_center: bool,
    pub buffer_m: f64,
    pub features: Vec<f64>,
}

/// One matched pair in the output table.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub data_center_aoi_id: String,
    pub control_aoi_id: String,
    pub buffer_m: f64,
    pub match_rank: usize,
    pub distance: f64,
}

/// Standardize each feature column to zero mean / unit variance over the
/// given units. Columns with zero or non-finite spread keep their centred
/// values (scale 1), so constant covariates contribute nothing to distance.
fn standardize(units: &mut [MatchUnit]) {
    if units.is_empty() {
        return;
    }
    let dims = units[0].features.len();
    let n = units.len() as f64;
    for d in 0..dims {
        let mean = units.iter().map(|u| u.features[d]).sum::<f64>() / n;
        let var = units
            .iter()
            .map(|u| (u.features[d] - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = var.sqrt();
        let scale = if std.is_finite() && std > 0.0 { std } else { 1.0 };
        for u in units.iter_mut() {
            u.features[d] = (u.features[d] - mean) / scale;
        }
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Match up to `k` controls to every data-center unit, buffer by buffer.
///
/// Data centers are visited in ascending `aoi_id` order within each buffer;
/// candidate controls are ranked by (distance, position) so ties resolve
/// deterministically. Ranks are contiguous from 0 per data center.
pub fn greedy_match(units: &[MatchUnit], k: usize, no_reuse: bool) -> Vec<MatchRecord> {
    let mut buffers: Vec<f64> = units.iter().map(|u| u.buffer_m).collect();
    buffers.sort_by(|a, b| a.total_cmp(b));
    buffers.dedup();

    let mut used: BTreeSet<String> = BTreeSet::new();
    let mut records = Vec::new();

    for buffer_m in buffers {
        let mut pool: Vec<MatchUnit> = units
            .iter()
            .filter(|u| u.buffer_m == buffer_m)
            .cloned()
            .collect();
        standardize(&mut pool);

        let mut treatments: Vec<&MatchUnit> =
            pool.iter().filter(|u| u.is_data_center).collect();
        treatments.sort_by(|a, b| a.aoi_id.cmp(&b.aoi_id));
        let controls: Vec<&MatchUnit> =
            pool.iter().filter(|u| !u.is_data_center).collect();

        for dc in treatments {
            let mut candidates: Vec<(f64, usize)> = controls
                .iter()
                .enumerate()
                .filter(|(_, c)| !(no_reuse && used.contains(&c.aoi_id)))
                .map(|(i, c)| (euclidean(&dc.features, &c.features), i))
                .collect();
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            for (rank, (distance, ci)) in candidates.into_iter().take(k).enumerate() {
                let ctrl = controls[ci];
                if no_reuse {
                    used.insert(ctrl.aoi_id.clone());
                }
                records.push(MatchRecord {
                    data_center_aoi_id: dc.aoi_id.clone(),
                    control_aoi_id: ctrl.aoi_id.clone(),
                    buffer_m,
                    match_rank: rank,
                    distance,
                });
            }
        }
    }
    records
}

fn truthy(s: &str) -> bool {
    matches!(s.trim(), "1" | "true" | "True" | "TRUE" | "1.0")
}

/// Build match units from the collapsed-observation table plus the static
/// covariate table, match, and write the pair table. Rows without a
/// parseable `buffer_m` or a complete covariate vector are dropped with a
/// warning, never matched.
pub fn run_matching(
    collapsed_path: &Path,
    covariates_path: &Path,
    out_path: &Path,
    k: usize,
    features: &[String],
    no_reuse: bool,
) -> Result<()> {
    let collapsed = Table::read_csv(collapsed_path)?;
    let aoi_col = collapsed.col("aoi_id")?;
    let dc_col = collapsed.col("is_data_center")?;
    let buf_col = collapsed.col("buffer_m")?;
    collapsed.col("site_id")?;
    let usable_col = collapsed.col_opt("is_usable");

    let cov = Table::read_csv(covariates_path)?;
    let cov_aoi_col = cov.col("aoi_id")?;
    let missing: Vec<&String> = features
        .iter()
        .filter(|f| cov.col_opt(f).is_none())
        .collect();
    if !missing.is_empty() {
        bail!(
            "Covariate table {} is missing feature column(s): {:?}",
            covariates_path.display(),
            missing
        );
    }
    let feature_cols: Vec<usize> = features
        .iter()
        .map(|f| cov.col(f))
        .collect::<Result<_>>()?;

    // One unit per aoi_id, first occurrence wins.
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut units: Vec<MatchUnit> = Vec::new();
    let mut dropped_incomplete = 0usize;
    for r in 0..collapsed.rows.len() {
        if let Some(u) = usable_col {
            if !truthy(collapsed.get(r, u)) {
                continue;
            }
        }
        let aoi_id = collapsed.get(r, aoi_col).to_string();
        if !seen.insert(aoi_id.clone()) {
            continue;
        }
        let buffer_m = collapsed.num(r, buf_col);
        if !buffer_m.is_finite() {
            dropped_incomplete += 1;
            continue;
        }
        let cov_row = match (0..cov.rows.len()).find(|&cr| cov.get(cr, cov_aoi_col) == aoi_id) {
            Some(cr) => cr,
            None => {
                dropped_incomplete += 1;
                continue;
            }
        };
        let feats: Vec<f64> = feature_cols.iter().map(|&c| cov.num(cov_row, c)).collect();
        if feats.iter().any(|v| !v.is_finite()) {
            dropped_incomplete += 1;
            continue;
        }
        units.push(MatchUnit {
            aoi_id,
            is_data_center: truthy(collapsed.get(r, dc_col)),
            buffer_m,
            features: feats,
        });
    }
    if units.is_empty() {
        bail!("No matchable units: every usable AOI lacks complete covariates");
    }
    if dropped_incomplete > 0 {
        println!(
            "{}",
            text::warning(&format!(
                "Dropped {} AOI(s) with a missing buffer_m or incomplete covariates",
                dropped_incomplete
            ))
        );
    }

    let records = greedy_match(&units, k, no_reuse);

    let mut out = Table::new(
        ["data_center_aoi_id", "control_aoi_id", "buffer_m", "match_rank", "distance"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    for rec in &records {
        out.rows.push(vec![
            rec.data_center_aoi_id.clone(),
            rec.control_aoi_id.clone(),
            fmt_num(rec.buffer_m),
            rec.match_rank.to_string(),
            fmt_num(rec.distance),
        ]);
    }
    out.write_csv(out_path)?;
    println!(
        "{} Matched {} pair(s) {} {}",
        text::check_icon(),
        records.len(),
        text::ARROW,
        out_path.display()
    );
    Ok(())
}
