use anyhow::Result;
use clap::Parser;
use std::time::Instant;

use uhi_pipeline::aoi;
use uhi_pipeline::baseline;
use uhi_pipeline::config::load_config;
use uhi_pipeline::controls::{self, ControlSamplerOptions};
use uhi_pipeline::covariates;
use uhi_pipeline::demo;
use uhi_pipeline::export;
use uhi_pipeline::matching;
use uhi_pipeline::panel;
use uhi_pipeline::text;
use uhi_pipeline::timeseries;

mod cli;

use cli::{Args, CommandKind};

fn parse_radii(list: &str) -> Result<Vec<f64>> {
    list.split(',')
        .map(|s| {
            s.trim()
                .parse::<f64>()
                .map_err(|_| anyhow::anyhow!("Invalid buffer radius: {:?}", s.trim()))
        })
        .collect()
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let args = Args::parse();

    let line = "-".repeat(72);
    println!(
        "\n{} {}\n{}\nTool for quantifying the urban heat island effect of data centers\nfrom land-surface-temperature rasters.\n{}\n",
        text::highlight("UHI Pipeline"),
        env!("CARGO_PKG_VERSION"),
        line,
        line
    );

    match args.command {
        CommandKind::Demo { out_dir, seed } => {
            demo::run_demo(&out_dir, seed)?;
        }
        CommandKind::Buffers {
            dc_sites,
            control_sites,
            buffers,
            out,
        } => {
            let radii = parse_radii(&buffers)?;
            aoi::run_buffers(&dc_sites, control_sites.as_deref(), &radii, &out)?;
        }
        CommandKind::Controls {
            sites,
            boundary,
            out,
            n_controls,
            min_distance_m,
            metro_buffer_km,
            max_tries,
            seed,
        } => {
            let opts = ControlSamplerOptions {
                n_controls,
                min_distance_m,
                metro_buffer_km,
                max_tries,
                seed,
            };
            controls::run_controls(&sites, boundary.as_deref(), &out, &opts)?;
        }
        CommandKind::Extract { config } => {
            let cfg = load_config(&config)?;
            timeseries::run_extract(&cfg)?;
        }
        CommandKind::Covariates {
            config,
            manifest,
            out,
        } => {
            let cfg = load_config(&config)?;
            covariates::run_covariates(&cfg, &manifest, &out)?;
        }
        CommandKind::Anomaly { config } => {
            let cfg = load_config(&config)?;
            baseline::run_anomaly(&cfg)?;
        }
        CommandKind::Collapse { config } => {
            let cfg = load_config(&config)?;
            panel::run_collapse(&cfg)?;
        }
        CommandKind::MatchControls {
            collapsed,
            covariates,
            out,
            k,
            features,
            allow_reuse,
        } => {
            let feature_names: Vec<String> = features
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if feature_names.is_empty() {
                anyhow::bail!("At least one matching feature is required");
            }
            matching::run_matching(&collapsed, &covariates, &out, k, &feature_names, !allow_reuse)?;
        }
        CommandKind::Effects { config } => {
            let cfg = load_config(&config)?;
            panel::run_effects(&cfg)?;
        }
        CommandKind::ExportRisk { config } => {
            let cfg = load_config(&config)?;
            export::run_export_risk(&cfg)?;
        }
        CommandKind::ExportEffects { config, attrs, out } => {
            let cfg = load_config(&config)?;
            export::run_export_effects(&cfg, attrs.as_deref(), &out)?;
        }
    }

    println!("{}", line);
    println!("{}", text::success("Completed successfully."));
    println!(
        "Total elapsed time: {:.2} seconds.\n",
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}
