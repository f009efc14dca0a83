use std::path::Path;

use anyhow::Context;
use gdal::Dataset;
use ndarray::{s, Array2, ArrayView2};
use tracing::{debug, info};

use crate::error::Result;

/// Land/ocean grid read from a reference raster.
#[derive(Debug, Clone, PartialEq)]
pub struct LandMask {
    land: Array2<bool>,
}

impl LandMask {
    pub fn from_cells(land: Array2<bool>) -> Self {
        Self { land }
    }

    /// Read band 1 of any GDAL raster, e.g. a GeoTIFF or
    /// `NETCDF:"landmask.nc":landmask`.
    ///
    /// A cell is land when its value is finite, non-zero and not the band's
    /// nodata value. GDAL hands back north-up rasters; pass
    /// `lat_ascending = true` when the target grid stores its southernmost row
    /// first so the rows are flipped to match.
    pub fn open(path: &Path, lat_ascending: bool) -> Result<Self> {
        info!("Reading land mask: {:?}", path);

        let dataset = Dataset::open(path)
            .with_context(|| format!("Failed to open land mask {}", path.display()))?;
        let (cols, rows) = dataset.raster_size();

        let band = dataset.rasterband(1)?;
        let nodata = band.no_data_value();
        let buffer = band.read_as::<f64>((0, 0), (cols, rows), (cols, rows), None)?;
        let (_, values) = buffer.into_shape_and_vec();

        let land = Array2::from_shape_vec((rows, cols), values)
            .context("Land mask buffer does not match raster size")?
            .mapv(|v| v.is_finite() && v != 0.0 && Some(v) != nodata);

        // 地理変換が北上向きなら、南から始まるグリッドに合わせて行を反転
        let north_up = dataset
            .geo_transform()
            .map(|gt| gt[5] < 0.0)
            .unwrap_or(false);
        let land = if north_up && lat_ascending {
            debug!("Flipping north-up land mask rows");
            land.slice(s![..;-1, ..]).to_owned()
        } else {
            land
        };

        debug!(
            "Land mask {}x{}: {} land cells",
            rows,
            cols,
            land.iter().filter(|&&l| l).count()
        );
        Ok(Self { land })
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.land.dim()
    }

    pub fn cells(&self) -> ArrayView2<'_, bool> {
        self.land.view()
    }
}
