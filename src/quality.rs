//! Companion quality rasters and the keep-mask composer.
//!
//! ECOSTRESS tiled LST ships sibling rasters next to each `*_LST.tif`
//! (cloud, water, QC bitmask, LST uncertainty). Each channel is an
//! independent predicate stage AND-ed into the keep mask; a channel whose
//! raster is missing, fails to open, fails to crop, or comes back with a
//! mismatched grid contributes no constraint. Nothing in here is fatal.

use gdal::vector::Geometry;
use ndarray::Array2;
use std::path::Path;

use crate::config::QualitySpec;
use crate::raster::RasterSource;

const LST_SUFFIX: &str = "_LST.tif";

/// Decode a QC pixel to its quality class via the configured bitmask.
pub fn qc_class(value: f64, bitmask: u16) -> u16 {
    (value as u16) & bitmask
}

/// Open companion rasters for one LST tile. Channels that are absent stay
/// `None`.
pub struct CompanionSet {
    cloud: Option<RasterSource>,
    water: Option<RasterSource>,
    qc: Option<RasterSource>,
    lst_err: Option<RasterSource>,
}

fn open_if_present(path: &Path) -> Option<RasterSource> {
    if !path.exists() {
        return None;
    }
    RasterSource::open(path).ok()
}

impl CompanionSet {
    /// Locate companions for `raster_path` by suffix convention. Returns
    /// `None` when the raster is not an LST tile (no companion lookup
    /// applies).
    pub fn locate(raster_path: &Path, q: &QualitySpec) -> Option<CompanionSet> {
        let name = raster_path.file_name()?.to_str()?;
        let base = name.strip_suffix(LST_SUFFIX)?;
        let dir = raster_path.parent()?;
        Some(CompanionSet {
            cloud: open_if_present(&dir.join(format!("{}{}", base, q.cloud_suffix))),
            water: open_if_present(&dir.join(format!("{}{}", base, q.water_suffix))),
            qc: open_if_present(&dir.join(format!("{}{}", base, q.qc_suffix))),
            lst_err: open_if_present(&dir.join(format!("{}{}", base, q.lst_err_suffix))),
        })
    }

    /// Crop one companion to the polygon; `None` (no constraint) on any
    /// failure or grid mismatch with the keep mask.
    fn crop_channel(
        channel: &Option<RasterSource>,
        geom: &Geometry,
        shape: (usize, usize),
    ) -> Option<Array2<f64>> {
        let src = channel.as_ref()?;
        let window = src.crop_to_polygon(geom).ok()??;
        if window.data.dim() != shape {
            return None;
        }
        Some(window.data)
    }

    /// AND all available channel predicates into `keep`.
    pub fn apply_channels(&self, geom: &Geometry, q: &QualitySpec, keep: &mut Array2<bool>) {
        let shape = keep.dim();

        if let Some(cloud) = Self::crop_channel(&self.cloud, geom, shape) {
            for (k, &v) in keep.iter_mut().zip(cloud.iter()) {
                *k = *k && q.keep_cloud_values.contains(&(v as i64));
            }
        }

        if let Some(water) = Self::crop_channel(&self.water, geom, shape) {
            for (k, &v) in keep.iter_mut().zip(water.iter()) {
                *k = *k && q.keep_water_values.contains(&(v as i64));
            }
        }

        if let Some(qc) = Self::crop_channel(&self.qc, geom, shape) {
            for (k, &v) in keep.iter_mut().zip(qc.iter()) {
                *k = *k && q.qc_keep_classes.contains(&qc_class(v, q.qc_class_bitmask));
            }
        }

        if let Some(ceiling) = q.max_lst_err {
            if let Some(err) = Self::crop_channel(&self.lst_err, geom, shape) {
                for (k, &v) in keep.iter_mut().zip(err.iter()) {
                    *k = *k && v <= ceiling;
                }
            }
        }
    }
}

/// Whether companion masks apply to this raster at all (quality masking on,
/// companion mode requested, filename carries the LST suffix).
pub fn companions_apply(raster_path: &Path, q: &QualitySpec) -> bool {
    q.enabled
        && q.ecostress_companion_masks
        && raster_path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(LST_SUFFIX))
}
