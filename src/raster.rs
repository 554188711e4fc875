//! Raster source wrapper around GDAL.
//!
//! Exposes the handful of things the zonal engine needs from a raster file:
//! bounds, CRS, nodata sentinel, and a crop-by-polygon read that returns the
//! pixel window overlapping a polygon together with an inside/outside mask
//! burned from the polygon itself.

use anyhow::{anyhow, Context, Result};
use gdal::cpl::CslStringList;
use gdal::raster::{rasterize, Buffer, ResampleAlg};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::Geometry;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Axis-aligned rectangle in a raster's CRS.
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.west <= other.east
            && other.west <= self.east
            && self.south <= other.north
            && other.south <= self.north
    }

    pub fn to_polygon(&self) -> Result<Geometry> {
        Ok(Geometry::bbox(self.west, self.south, self.east, self.north)?)
    }
}

/// Envelope of a geometry as a [`Bounds`] rectangle.
pub fn geom_bounds(geom: &Geometry) -> Bounds {
    let env = geom.envelope();
    Bounds {
        west: env.MinX,
        south: env.MinY,
        east: env.MaxX,
        north: env.MaxY,
    }
}

/// A polygon-cropped window of a raster band.
pub struct CroppedWindow {
    /// Pixel values of the window, row-major.
    pub data: Array2<f64>,
    /// True where the pixel center falls inside the polygon.
    pub inside: Array2<bool>,
    /// Geotransform of the window (origin shifted to the window corner).
    pub geo: [f64; 6],
}

pub struct RasterSource {
    dataset: Dataset,
    geo: [f64; 6],
    width: usize,
    height: usize,
    nodata: Option<f64>,
}

impl RasterSource {
    pub fn open(path: &Path) -> Result<Self> {
        let dataset = Dataset::open(path)
            .with_context(|| format!("Failed to open raster: {}", path.display()))?;
        let geo = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        let nodata = dataset.rasterband(1)?.no_data_value();
        Ok(RasterSource {
            dataset,
            geo,
            width,
            height,
            nodata,
        })
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Total bounding rectangle of the raster in its own CRS.
    pub fn bounds(&self) -> Bounds {
        let x0 = self.geo[0];
        let y0 = self.geo[3];
        let x1 = x0 + self.geo[1] * self.width as f64;
        let y1 = y0 + self.geo[5] * self.height as f64;
        Bounds {
            west: x0.min(x1),
            south: y0.min(y1),
            east: x0.max(x1),
            north: y0.max(y1),
        }
    }

    pub fn projection_wkt(&self) -> String {
        self.dataset.projection()
    }

    pub fn spatial_ref(&self) -> Result<SpatialRef> {
        Ok(self.dataset.spatial_ref()?)
    }

    /// Short CRS label for reporting: "EPSG:4326" when an authority code is
    /// available, the raw WKT otherwise.
    pub fn crs_label(&self) -> String {
        crs_label_of(&self.dataset.projection())
    }

    /// Crop-and-mask the first band to a polygon (given in this raster's
    /// CRS). Returns `None` when the polygon's envelope does not overlap any
    /// pixels; the caller turns that into NaN statistics.
    pub fn crop_to_polygon(&self, geom: &Geometry) -> Result<Option<CroppedWindow>> {
        let env = geom.envelope();

        // Envelope to pixel window, clamped to the raster grid. Assumes a
        // north-up geotransform (no rotation terms), which holds for the
        // tiled LST products this tool consumes.
        let px = self.geo[1];
        let py = self.geo[5];
        let col0 = ((env.MinX - self.geo[0]) / px).floor().max(0.0) as usize;
        let col1 = (((env.MaxX - self.geo[0]) / px).ceil() as isize).min(self.width as isize);
        let row0 = ((env.MaxY - self.geo[3]) / py).floor().max(0.0) as usize;
        let row1 = (((env.MinY - self.geo[3]) / py).ceil() as isize).min(self.height as isize);
        if col1 <= col0 as isize || row1 <= row0 as isize {
            return Ok(None);
        }
        let (col1, row1) = (col1 as usize, row1 as usize);
        let (cw, ch) = (col1 - col0, row1 - row0);

        let band = self.dataset.rasterband(1)?;
        let buf = band.read_as::<f64>(
            (col0 as isize, row0 as isize),
            (cw, ch),
            (cw, ch),
            Some(ResampleAlg::NearestNeighbour),
        )?;
        let data = Array2::from_shape_vec((ch, cw), buf.into_shape_and_vec().1)
            .map_err(|e| anyhow!("Window shape mismatch: {}", e))?;

        let window_geo = [
            self.geo[0] + col0 as f64 * px,
            px,
            0.0,
            self.geo[3] + row0 as f64 * py,
            0.0,
            py,
        ];
        let inside = burn_polygon_mask(geom, window_geo, cw, ch)?;

        Ok(Some(CroppedWindow {
            data,
            inside,
            geo: window_geo,
        }))
    }
}

/// Rasterize a polygon into a window-sized boolean mask (pixel-center test,
/// via an in-memory dataset).
fn burn_polygon_mask(
    geom: &Geometry,
    window_geo: [f64; 6],
    width: usize,
    height: usize,
) -> Result<Array2<bool>> {
    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut mem = driver.create_with_band_type::<u8, _>("", width, height, 1)?;
    mem.set_geo_transform(&window_geo)?;
    rasterize(&mut mem, &[1], &[geom.clone()], &[1.0], None)?;

    let buf = mem.rasterband(1)?.read_as::<u8>(
        (0, 0),
        (width, height),
        (width, height),
        Some(ResampleAlg::NearestNeighbour),
    )?;
    let mask = Array2::from_shape_vec((height, width), buf.into_shape_and_vec().1)
        .map_err(|e| anyhow!("Mask shape mismatch: {}", e))?;
    Ok(mask.mapv(|v| v != 0))
}

/// Short CRS label from a projection WKT string.
pub fn crs_label_of(wkt: &str) -> String {
    if wkt.is_empty() {
        return "unknown".to_string();
    }
    if let Ok(sr) = SpatialRef::from_wkt(wkt) {
        if let (Ok(name), Ok(code)) = (sr.auth_name(), sr.auth_code()) {
            return format!("{}:{}", name, code);
        }
    }
    wkt.to_string()
}

/// Write a single-band float GeoTIFF (used by the demo generator).
pub fn write_geotiff(
    path: &Path,
    width: usize,
    height: usize,
    geo: [f64; 6],
    projection_wkt: &str,
    nodata: f64,
    values: Vec<f32>,
) -> Result<()> {
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let options = CslStringList::from_iter(["COMPRESS=LZW"]);
    let mut ds = driver
        .create_with_band_type_with_options::<f32, _>(path, width, height, 1, &options)
        .with_context(|| format!("Failed to create GeoTIFF: {}", path.display()))?;
    ds.set_projection(projection_wkt)?;
    ds.set_geo_transform(&geo)?;
    let mut band = ds.rasterband(1)?;
    band.set_no_data_value(Some(nodata))?;
    let mut buffer = Buffer::new((width, height), values);
    band.write((0, 0), (width, height), &mut buffer)?;
    ds.flush_cache()?;
    Ok(())
}
