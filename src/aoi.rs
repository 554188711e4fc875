//! Areas of interest: loading, buffering, per-CRS reprojection cache and
//! tile pruning.
//!
//! AOI geometries are normalized to WGS84 on load and never mutated
//! afterwards; a fresh reprojected copy per raster CRS is cached keyed by the
//! raster's projection string (write-once per key, read-many under the
//! sequential execution model).

use anyhow::{anyhow, Context, Result};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::vector::{Geometry, LayerAccess};
use gdal::Dataset;
use std::collections::HashMap;
use std::path::Path;

use crate::raster::{geom_bounds, Bounds};
use crate::timeseries::fmt_num;

/// Ring identifier for one (site, buffer) AOI, e.g. `dc:chi_01:buf_500m`.
/// Fractional radii keep their fractional part.
pub fn ring_aoi_id(group: &str, site_id: &str, radius: f64) -> String {
    format!("{}:{}:buf_{}m", group, site_id, fmt_num(radius))
}

/// One area of interest. The geometry is a WGS84 polygon; the remaining
/// fields are carried through from the AOI file when present.
pub struct Aoi {
    pub aoi_id: String,
    pub group: Option<String>,
    pub site_id: Option<String>,
    pub site_name: Option<String>,
    pub buffer_m: Option<f64>,
    pub is_data_center: Option<i64>,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
    pub geometry: Geometry,
}

/// The full AOI set plus the CRS-keyed reprojection cache.
pub struct AoiSet {
    aois: Vec<Aoi>,
    cache: HashMap<String, Vec<Geometry>>,
}

/// WGS84 with traditional lon/lat axis order.
pub fn wgs84() -> Result<SpatialRef> {
    let mut sr = SpatialRef::from_epsg(4326)?;
    sr.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(sr)
}

/// SpatialRef from a user definition like "EPSG:4326", lon/lat axis order.
pub fn spatial_ref_from(def: &str) -> Result<SpatialRef> {
    let mut sr = SpatialRef::from_definition(def)
        .with_context(|| format!("Invalid CRS definition: {:?}", def))?;
    sr.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(sr)
}

/// Estimated UTM EPSG code for a lon/lat location (used for metric buffering
/// and distance checks).
pub fn utm_epsg(lon: f64, lat: f64) -> u32 {
    let zone = (((lon + 180.0) / 6.0).floor() as i64).clamp(0, 59) as u32 + 1;
    if lat >= 0.0 {
        32600 + zone
    } else {
        32700 + zone
    }
}

/// Reproject a geometry between two spatial references.
pub fn reproject(geom: &Geometry, from: &SpatialRef, to: &SpatialRef) -> Result<Geometry> {
    let ct = CoordTransform::new(from, to)?;
    Ok(geom.transform(&ct)?)
}

/// Buffer a WGS84 geometry by a metric distance, via the estimated UTM zone
/// of its envelope center.
pub fn buffer_wgs84_m(geom: &Geometry, buffer_m: f64) -> Result<Geometry> {
    let b = geom_bounds(geom);
    let lon = (b.west + b.east) / 2.0;
    let lat = (b.south + b.north) / 2.0;
    let mut utm = SpatialRef::from_epsg(utm_epsg(lon, lat))?;
    utm.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    let w = wgs84()?;
    let metric = reproject(geom, &w, &utm)?;
    let buffered = metric.buffer(buffer_m, 30)?;
    reproject(&buffered, &utm, &w)
}

fn field_str(feature: &gdal::vector::Feature, name: &str) -> Option<String> {
    feature
        .field(name)
        .ok()
        .flatten()
        .and_then(|v| v.into_string())
}

fn field_f64(feature: &gdal::vector::Feature, name: &str) -> Option<f64> {
    feature.field(name).ok().flatten().and_then(|v| v.into_real())
}

fn field_i64(feature: &gdal::vector::Feature, name: &str) -> Option<i64> {
    feature.field(name).ok().flatten().and_then(|v| v.into_int64())
}

impl AoiSet {
    /// Load AOIs from a vector file. Geometries are normalized to WGS84; a
    /// missing id field falls back to the feature index; `buffer_m` (when
    /// given) buffers every geometry by that metric radius.
    pub fn load(
        aoi_path: &Path,
        id_field: &str,
        crs_if_missing: &str,
        buffer_m: Option<f64>,
    ) -> Result<AoiSet> {
        let dataset = Dataset::open(aoi_path)
            .with_context(|| format!("Failed to open AOI file: {}", aoi_path.display()))?;
        let mut layer = dataset
            .layer(0)
            .with_context(|| format!("No vector layer in {}", aoi_path.display()))?;

        let target = wgs84()?;
        let source = match layer.spatial_ref() {
            Some(mut sr) => {
                sr.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
                sr
            }
            None => spatial_ref_from(crs_if_missing)?,
        };
        let needs_reprojection = source.auth_code().ok() != Some(4326);

        let mut aois = Vec::new();
        for (index, feature) in layer.features().enumerate() {
            let raw = match feature.geometry() {
                Some(g) => g.clone(),
                None => continue,
            };
            let mut geometry = if needs_reprojection {
                reproject(&raw, &source, &target)?
            } else {
                raw
            };
            if let Some(radius) = buffer_m {
                geometry = buffer_wgs84_m(&geometry, radius)?;
            }
            let aoi_id =
                field_str(&feature, id_field).unwrap_or_else(|| index.to_string());
            aois.push(Aoi {
                aoi_id,
                group: field_str(&feature, "group"),
                site_id: field_str(&feature, "site_id"),
                site_name: field_str(&feature, "site_name"),
                buffer_m: field_f64(&feature, "buffer_m"),
                is_data_center: field_i64(&feature, "is_data_center"),
                lon: field_f64(&feature, "lon"),
                lat: field_f64(&feature, "lat"),
                geometry,
            });
        }
        if aois.is_empty() {
            return Err(anyhow!("No AOI features found in {}", aoi_path.display()));
        }
        Ok(AoiSet {
            aois,
            cache: HashMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.aois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aois.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Aoi> {
        self.aois.iter()
    }

    pub fn get(&self, index: usize) -> &Aoi {
        &self.aois[index]
    }

    pub fn by_id(&self, aoi_id: &str) -> Option<&Aoi> {
        self.aois.iter().find(|a| a.aoi_id == aoi_id)
    }

    /// Reprojected copies of every AOI geometry in the given raster CRS,
    /// computed once per CRS key and cached (index-aligned with the set).
    pub fn projected(&mut self, crs_key: &str, target: &SpatialRef) -> Result<&[Geometry]> {
        if !self.cache.contains_key(crs_key) {
            let mut t = target.clone();
            t.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
            let source = wgs84()?;
            let ct = CoordTransform::new(&source, &t)?;
            let mut projected = Vec::with_capacity(self.aois.len());
            for aoi in &self.aois {
                projected.push(aoi.geometry.transform(&ct)?);
            }
            self.cache.insert(crs_key.to_string(), projected);
        }
        Ok(self.cache.get(crs_key).expect("cache populated above"))
    }
}

struct SitePoint {
    site_id: String,
    site_name: String,
    lon: f64,
    lat: f64,
}

fn load_site_points(path: &Path, id_fields: &[&str]) -> Result<Vec<SitePoint>> {
    let dataset = Dataset::open(path)
        .with_context(|| format!("Failed to open sites file: {}", path.display()))?;
    let mut layer = dataset
        .layer(0)
        .with_context(|| format!("No vector layer in {}", path.display()))?;
    let mut sites = Vec::new();
    for (index, feature) in layer.features().enumerate() {
        let geom = match feature.geometry() {
            Some(g) => g,
            None => continue,
        };
        let b = geom_bounds(geom);
        let site_id = id_fields
            .iter()
            .find_map(|f| field_str(&feature, f))
            .unwrap_or_else(|| format!("site_{:04}", index));
        let site_name = field_str(&feature, "site_name").unwrap_or_else(|| site_id.clone());
        sites.push(SitePoint {
            site_id,
            site_name,
            lon: (b.west + b.east) / 2.0,
            lat: (b.south + b.north) / 2.0,
        });
    }
    if sites.is_empty() {
        return Err(anyhow!("No site features found in {}", path.display()));
    }
    Ok(sites)
}

/// Build the ring AOI layer: one buffered polygon per (site, radius) for the
/// data-center sites and, when given, the control sites. Ring ids follow the
/// `{group}:{site_id}:buf_{radius}m` convention the downstream tables key on.
pub fn run_buffers(
    dc_sites_path: &Path,
    control_sites_path: Option<&Path>,
    buffers_m: &[f64],
    out_path: &Path,
) -> Result<()> {
    use serde_json::{json, Value};

    if buffers_m.is_empty() {
        return Err(anyhow!("At least one buffer radius is required"));
    }

    let mut groups: Vec<(&str, i64, Vec<SitePoint>)> = Vec::new();
    groups.push(("dc", 1, load_site_points(dc_sites_path, &["site_id"])?));
    if let Some(path) = control_sites_path {
        groups.push(("ctrl", 0, load_site_points(path, &["control_id", "site_id"])?));
    }

    let mut features: Vec<Value> = Vec::new();
    for (group, is_data_center, sites) in &groups {
        for site in sites {
            let point = Geometry::from_wkt(&format!("POINT ({} {})", site.lon, site.lat))?;
            for &radius in buffers_m {
                let ring = buffer_wgs84_m(&point, radius)?;
                let geometry: Value = serde_json::from_str(&ring.json()?)
                    .context("GDAL produced unparseable geometry JSON")?;
                features.push(json!({
                    "type": "Feature",
                    "geometry": geometry,
                    "properties": {
                        "aoi_id": ring_aoi_id(group, &site.site_id, radius),
                        "group": group,
                        "site_id": site.site_id,
                        "site_name": site.site_name,
                        "buffer_m": radius,
                        "is_data_center": is_data_center,
                        "lon": site.lon,
                        "lat": site.lat,
                    },
                }));
            }
        }
    }

    let fc = json!({"type": "FeatureCollection", "features": features});
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out_path, serde_json::to_string_pretty(&fc)?)
        .with_context(|| format!("Failed to write {}", out_path.display()))?;
    println!(
        "{} Wrote {} ring AOI(s) {} {}",
        crate::text::check_icon(),
        features.len(),
        crate::text::ARROW,
        out_path.display()
    );
    Ok(())
}

/// Indices of geometries that intersect a tile's bounding rectangle.
///
/// Envelope overlap is checked first to prune cheaply; survivors are
/// confirmed with an exact intersects test against the tile rectangle. If
/// the rectangle polygon cannot be built, fall back to the envelope-only
/// answer: pruning is an optimization and must never drop an AOI that
/// overlaps the tile.
pub fn prune_to_tile(geoms: &[Geometry], tile: &Bounds) -> Vec<usize> {
    let tile_poly = tile.to_polygon().ok();
    let mut keep = Vec::new();
    for (i, geom) in geoms.iter().enumerate() {
        if !geom_bounds(geom).intersects(tile) {
            continue;
        }
        match &tile_poly {
            Some(poly) => {
                if geom.intersects(poly) {
                    keep.push(i);
                }
            }
            None => keep.push(i),
        }
    }
    keep
}
