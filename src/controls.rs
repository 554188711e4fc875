//! Candidate control-site generation by seeded rejection sampling.
//!
//! Controls are drawn uniformly inside a metro boundary (an explicit polygon
//! file, or the buffered convex hull of the data-center sites when none is
//! given) and must keep a minimum metric distance from every data-center
//! site, so no control ring overlaps the heat plume it is supposed to
//! contrast against. Sampling is seeded and therefore reproducible.

use anyhow::{bail, Context, Result};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::vector::{Geometry, LayerAccess};
use gdal::Dataset;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

use crate::aoi::{buffer_wgs84_m, utm_epsg, wgs84};
use crate::raster::geom_bounds;
use crate::text;

#[derive(Debug, Clone)]
pub struct ControlSamplerOptions {
    pub n_controls: usize,
    pub min_distance_m: f64,
    /// Hull buffer (km) when no boundary file is given.
    pub metro_buffer_km: f64,
    pub max_tries: usize,
    pub seed: u64,
}

impl Default for ControlSamplerOptions {
    fn default() -> Self {
        ControlSamplerOptions {
            n_controls: 30,
            min_distance_m: 3000.0,
            metro_buffer_km: 25.0,
            max_tries: 20000,
            seed: 42,
        }
    }
}

/// Point locations (lon, lat) of every feature in a vector file.
fn load_points(path: &Path) -> Result<Vec<(f64, f64)>> {
    let dataset = Dataset::open(path)
        .with_context(|| format!("Failed to open sites file: {}", path.display()))?;
    let mut layer = dataset
        .layer(0)
        .with_context(|| format!("No vector layer in {}", path.display()))?;
    let mut points = Vec::new();
    for feature in layer.features() {
        if let Some(geom) = feature.geometry() {
            let b = geom_bounds(geom);
            points.push(((b.west + b.east) / 2.0, (b.south + b.north) / 2.0));
        }
    }
    if points.is_empty() {
        bail!("No site features found in {}", path.display());
    }
    Ok(points)
}

/// First geometry of a boundary file, assumed WGS84.
fn load_boundary(path: &Path) -> Result<Geometry> {
    let dataset = Dataset::open(path)
        .with_context(|| format!("Failed to open boundary file: {}", path.display()))?;
    let mut layer = dataset
        .layer(0)
        .with_context(|| format!("No vector layer in {}", path.display()))?;
    let feature = layer
        .features()
        .next()
        .with_context(|| format!("No boundary feature in {}", path.display()))?;
    let geom = feature
        .geometry()
        .with_context(|| format!("Boundary feature has no geometry in {}", path.display()))?;
    Ok(geom.clone())
}

/// Buffered convex hull of the site points, in WGS84.
fn hull_boundary(sites: &[(f64, f64)], buffer_km: f64) -> Result<Geometry> {
    let wkt = format!(
        "MULTIPOINT ({})",
        sites
            .iter()
            .map(|(lon, lat)| format!("{} {}", lon, lat))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let points = Geometry::from_wkt(&wkt)?;
    let hull = points.convex_hull()?;
    buffer_wgs84_m(&hull, buffer_km * 1000.0)
}

/// Sample `n_controls` points inside the boundary keeping `min_distance_m`
/// from every site. Fatal when the try budget runs out, with a hint at which
/// constraint is starving the sampler.
pub fn sample_controls(
    sites: &[(f64, f64)],
    boundary: &Geometry,
    opts: &ControlSamplerOptions,
) -> Result<Vec<(f64, f64)>> {
    let b = geom_bounds(boundary);

    // Metric workspace: the UTM zone of the boundary center.
    let mut utm = SpatialRef::from_epsg(utm_epsg(
        (b.west + b.east) / 2.0,
        (b.south + b.north) / 2.0,
    ))?;
    utm.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    let ct = CoordTransform::new(&wgs84()?, &utm)?;
    let to_utm = |lon: f64, lat: f64| -> Result<(f64, f64)> {
        let mut x = [lon];
        let mut y = [lat];
        let mut z = [0.0];
        ct.transform_coords(&mut x, &mut y, &mut z)?;
        Ok((x[0], y[0]))
    };
    let sites_utm: Vec<(f64, f64)> = sites
        .iter()
        .map(|&(lon, lat)| to_utm(lon, lat))
        .collect::<Result<_>>()?;

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut accepted: Vec<(f64, f64)> = Vec::new();
    let mut tries = 0usize;
    while accepted.len() < opts.n_controls {
        if tries >= opts.max_tries {
            bail!(
                "Rejection sampling exhausted {} tries with {}/{} controls accepted. \
                 Loosen min_distance_m ({} m), enlarge the boundary, or lower n_controls.",
                opts.max_tries,
                accepted.len(),
                opts.n_controls,
                opts.min_distance_m
            );
        }
        tries += 1;

        let lon = rng.gen_range(b.west..b.east);
        let lat = rng.gen_range(b.south..b.north);
        let pt = Geometry::from_wkt(&format!("POINT ({} {})", lon, lat))?;
        if !boundary.contains(&pt) {
            continue;
        }
        let (x, y) = to_utm(lon, lat)?;
        let clear = sites_utm
            .iter()
            .all(|&(sx, sy)| ((x - sx).powi(2) + (y - sy).powi(2)).sqrt() >= opts.min_distance_m);
        if clear {
            accepted.push((lon, lat));
        }
    }
    Ok(accepted)
}

/// CLI entry point: load sites and boundary, sample, write the control-point
/// GeoJSON.
pub fn run_controls(
    sites_path: &Path,
    boundary_path: Option<&Path>,
    out_path: &Path,
    opts: &ControlSamplerOptions,
) -> Result<()> {
    let sites = load_points(sites_path)?;
    let boundary = match boundary_path {
        Some(p) => load_boundary(p)?,
        None => hull_boundary(&sites, opts.metro_buffer_km)?,
    };
    let controls = sample_controls(&sites, &boundary, opts)?;

    let features: Vec<Value> = controls
        .iter()
        .enumerate()
        .map(|(i, &(lon, lat))| {
            json!({
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [lon, lat]},
                "properties": {
                    "control_id": format!("ctrl_{:04}", i),
                    "lon": lon,
                    "lat": lat,
                },
            })
        })
        .collect();
    let fc = json!({"type": "FeatureCollection", "features": features});
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(out_path, serde_json::to_string_pretty(&fc)?)
        .with_context(|| format!("Failed to write {}", out_path.display()))?;
    println!(
        "{} Sampled {} control site(s) {} {}",
        text::check_icon(),
        controls.len(),
        text::ARROW,
        out_path.display()
    );
    Ok(())
}
