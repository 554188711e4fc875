//! # UHI Pipeline
//!
//! Library behind the `uhi_pipeline` tool: a batch pipeline that quantifies
//! the urban heat island effect of data centers by extracting zonal
//! land-surface-temperature statistics around data-center and control sites,
//! computing seasonal anomalies and risk scores, matching control sites by
//! static covariates, and collapsing observations into effect tables.
//!
//! The main components are:
//! - `zonal`: crop/mask sampling of one polygon against one raster plus the
//!   NaN-aware statistic reduction.
//! - `quality`: ECOSTRESS-style companion mask composition (cloud, water, QC
//!   bitmask, uncertainty).
//! - `aoi`: the AOI set with its per-CRS reprojection cache and tile pruning.
//! - `timeseries`: the per-raster/per-AOI extraction loop.
//! - `baseline`, `matching`, `panel`, `export`: the tabular stages downstream
//!   of extraction.

pub mod aoi;
pub mod baseline;
pub mod config;
pub mod controls;
pub mod covariates;
pub mod demo;
pub mod export;
pub mod matching;
pub mod panel;
pub mod quality;
pub mod raster;
pub mod stats;
pub mod table;
pub mod text;
pub mod timeseries;
pub mod zonal;
