//! Command-line surface: one subcommand per pipeline stage.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "Quantifies the urban heat island effect of data centers from land-surface-temperature rasters: zonal extraction, seasonal anomalies, covariate-matched controls and effect tables."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: CommandKind,
}

#[derive(Subcommand, Debug)]
pub enum CommandKind {
    /// Generate a synthetic demo dataset (rasters, AOIs, config).
    Demo {
        /// Directory to generate the demo dataset into.
        #[arg(long, default_value = "demo_data")]
        out_dir: PathBuf,

        /// Random seed for the noise field.
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Build ring AOIs around data-center (and optional control) sites.
    Buffers {
        /// Data-center site points (any OGR-readable vector file).
        #[arg(long)]
        dc_sites: PathBuf,

        /// Control site points.
        #[arg(long)]
        control_sites: Option<PathBuf>,

        /// Comma-separated buffer radii in meters, e.g. "500,1000,2000".
        #[arg(long, default_value = "500,1000,2000")]
        buffers: String,

        /// Output AOI GeoJSON path.
        #[arg(long)]
        out: PathBuf,
    },

    /// Sample candidate control sites away from the data centers.
    Controls {
        /// Data-center site points.
        #[arg(long)]
        sites: PathBuf,

        /// Boundary polygon to sample within (buffered hull of the sites
        /// when omitted).
        #[arg(long)]
        boundary: Option<PathBuf>,

        /// Output control-point GeoJSON path.
        #[arg(long)]
        out: PathBuf,

        /// Number of control sites to sample.
        #[arg(long, default_value_t = 30)]
        n_controls: usize,

        /// Minimum distance from any data-center site, in meters.
        #[arg(long, default_value_t = 3000.0)]
        min_distance_m: f64,

        /// Hull buffer in kilometers when no boundary is given.
        #[arg(long, default_value_t = 25.0)]
        metro_buffer_km: f64,

        /// Sampling attempt budget before giving up.
        #[arg(long, default_value_t = 20000)]
        max_tries: usize,

        /// Random seed.
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Extract the zonal-statistic timeseries from the raster collection.
    Extract {
        /// Pipeline configuration (JSON).
        #[arg(long)]
        config: PathBuf,
    },

    /// Extract static covariates per AOI from a covariate manifest.
    Covariates {
        /// Pipeline configuration (JSON).
        #[arg(long)]
        config: PathBuf,

        /// Covariate manifest (JSON).
        #[arg(long)]
        manifest: PathBuf,

        /// Output covariate CSV path.
        #[arg(long)]
        out: PathBuf,
    },

    /// Compute seasonal baselines, anomalies and per-AOI risk summaries.
    Anomaly {
        /// Pipeline configuration (JSON).
        #[arg(long)]
        config: PathBuf,
    },

    /// Collapse tile observations to one row per (AOI, date) and flag
    /// usable observations.
    Collapse {
        /// Pipeline configuration (JSON).
        #[arg(long)]
        config: PathBuf,
    },

    /// Match control AOIs to data-center AOIs on static covariates.
    MatchControls {
        /// Collapsed usable observation table (CSV).
        #[arg(long)]
        collapsed: PathBuf,

        /// Static covariate table (CSV).
        #[arg(long)]
        covariates: PathBuf,

        /// Output matched-pair CSV path.
        #[arg(long)]
        out: PathBuf,

        /// Controls to match per data center.
        #[arg(long, default_value_t = 3)]
        k: usize,

        /// Comma-separated covariate columns to match on.
        #[arg(long)]
        features: String,

        /// Allow one control to be matched to several data centers.
        #[arg(long, default_value_t = false)]
        allow_reuse: bool,
    },

    /// Summarize the data-center minus control difference per (date, buffer).
    Effects {
        /// Pipeline configuration (JSON).
        #[arg(long)]
        config: PathBuf,
    },

    /// Export the latest per-AOI risk summary as GeoJSON.
    ExportRisk {
        /// Pipeline configuration (JSON).
        #[arg(long)]
        config: PathBuf,
    },

    /// Export the cumulative per-data-center effect as GeoJSON.
    ExportEffects {
        /// Pipeline configuration (JSON).
        #[arg(long)]
        config: PathBuf,

        /// Optional site attribute CSV (site_id, opening_year) for the
        /// pre/post split.
        #[arg(long)]
        attrs: Option<PathBuf>,

        /// Output GeoJSON path.
        #[arg(long)]
        out: PathBuf,
    },
}
