//! Validated JSON configuration for a pipeline run.
//!
//! The document shape mirrors what the orchestration step generates: raster
//! collection + AOI source + nodata/transform/stat selection + optional
//! quality masking + baseline grouping. Unknown statistic names, transform
//! types and baseline groupings are rejected at load, not deep inside the
//! reduction loop.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::baseline::Bucketing;
use crate::zonal::{Stat, ValueTransform};

#[derive(Debug, Clone, Deserialize)]
pub struct TransformSpec {
    #[serde(rename = "type", default = "default_transform_type")]
    pub kind: String,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub offset: Option<f64>,
}

impl Default for TransformSpec {
    fn default() -> Self {
        TransformSpec {
            kind: default_transform_type(),
            scale: None,
            offset: None,
        }
    }
}

fn default_transform_type() -> String {
    "identity".to_string()
}

/// Optional quality masking via ECOSTRESS-style companion rasters that live
/// next to each `*_LST.tif`:
/// - `*_cloud.tif` (0 clear, 1 cloud)
/// - `*_water.tif` (0 land, 1 water)
/// - `*_QC.tif` (bitmask; the low bits encode a 0..3 quality class)
/// - `*_LST_err.tif` (uncertainty)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualitySpec {
    pub enabled: bool,
    pub ecostress_companion_masks: bool,
    pub cloud_suffix: String,
    pub water_suffix: String,
    pub qc_suffix: String,
    pub lst_err_suffix: String,
    pub keep_cloud_values: Vec<i64>,
    pub keep_water_values: Vec<i64>,
    pub qc_keep_classes: Vec<u16>,
    pub qc_class_bitmask: u16,
    pub max_lst_err: Option<f64>,
}

impl Default for QualitySpec {
    fn default() -> Self {
        QualitySpec {
            enabled: false,
            ecostress_companion_masks: false,
            cloud_suffix: "_cloud.tif".to_string(),
            water_suffix: "_water.tif".to_string(),
            qc_suffix: "_QC.tif".to_string(),
            lst_err_suffix: "_LST_err.tif".to_string(),
            keep_cloud_values: vec![0],
            keep_water_values: vec![0],
            // keep perfect + nominal
            qc_keep_classes: vec![0, 1],
            qc_class_bitmask: 3,
            max_lst_err: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaselineSpec {
    /// "month" or "doy"
    pub grouping: String,
    pub min_obs_per_group: usize,
}

impl Default for BaselineSpec {
    fn default() -> Self {
        BaselineSpec {
            grouping: "month".to_string(),
            min_obs_per_group: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub project_name: String,
    pub aoi_path: String,
    pub aoi_id_field: String,
    #[serde(default)]
    pub buffer_m: Option<f64>,
    #[serde(default = "default_aoi_crs")]
    pub aoi_crs_if_missing: String,
    pub raster_dir: String,
    #[serde(default = "default_raster_glob")]
    pub raster_glob: String,
    pub date_regex: String,
    pub date_format: String,
    #[serde(default = "default_units")]
    pub value_units: String,
    #[serde(default)]
    pub nodata_below: Option<f64>,
    #[serde(default)]
    pub nodata_equals: Option<f64>,
    #[serde(default)]
    pub value_transform: TransformSpec,
    #[serde(default = "default_stats")]
    pub stats: Vec<String>,
    #[serde(default)]
    pub quality: QualitySpec,
    #[serde(default)]
    pub baseline: BaselineSpec,
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: String,
    #[serde(default = "default_export_path")]
    pub export_geojson_path: String,
}

fn default_aoi_crs() -> String {
    "EPSG:4326".to_string()
}

fn default_raster_glob() -> String {
    "*.tif".to_string()
}

fn default_units() -> String {
    "unknown".to_string()
}

fn default_stats() -> Vec<String> {
    vec!["mean".to_string()]
}

fn default_outputs_dir() -> String {
    "outputs".to_string()
}

fn default_export_path() -> String {
    "outputs/aoi_risk_latest.geojson".to_string()
}

impl Config {
    /// Parse and validate the configured statistic names.
    pub fn parsed_stats(&self) -> Result<Vec<Stat>> {
        self.stats.iter().map(|s| Stat::parse(s)).collect()
    }

    /// Parse and validate the configured value transform.
    pub fn transform(&self) -> Result<ValueTransform> {
        ValueTransform::from_spec(&self.value_transform)
    }

    /// Parse and validate the baseline calendar grouping.
    pub fn bucketing(&self) -> Result<Bucketing> {
        Bucketing::parse(&self.baseline.grouping)
    }

    /// Reject unknown statistic/transform/grouping names and a broken date
    /// regex up front.
    pub fn validate(&self) -> Result<()> {
        self.parsed_stats()?;
        self.transform()?;
        self.bucketing()?;
        Regex::new(&self.date_regex)
            .with_context(|| format!("Invalid date_regex: {:?}", self.date_regex))?;
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let cfg: Config = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config JSON: {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
