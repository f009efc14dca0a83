//! Selection of grid cells inside a lat/lon rectangle.
//!
//! Longitudes are compared on a 0..360 circle. A rectangle whose `lon_1` is
//! east of `lon_2` wraps across the prime meridian and selects
//! `[lon_1, 360) ∪ [0, lon_2]`. Latitudes are a closed interval with a
//! single-precision epsilon of slack on both edges, so grids stored as `f32`
//! still hit their boundaries.

use ndarray::{Array2, ArrayView2, Zip};
use tracing::debug;

use crate::error::{ModifyError, Result};
use crate::landmask::LandMask;

const LAT_EPS: f64 = f32::EPSILON as f64;

/// Geographic rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub lat_1: f64,
    pub lat_2: f64,
    pub lon_1: f64,
    pub lon_2: f64,
}

impl Rectangle {
    pub const GLOBAL: Rectangle = Rectangle {
        lat_1: -90.0,
        lat_2: 90.0,
        lon_1: 0.0,
        lon_2: 360.0,
    };

    pub fn new(lat_1: f64, lat_2: f64, lon_1: f64, lon_2: f64) -> Result<Self> {
        let rect = Self {
            lat_1,
            lat_2,
            lon_1,
            lon_2,
        };
        rect.validate()?;
        Ok(rect)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, lat) in [("lnd_lat_1", self.lat_1), ("lnd_lat_2", self.lat_2)] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(ModifyError::Config(format!(
                    "{name} = {lat} must be in the range -90 to 90"
                )));
            }
        }
        if self.lat_1 > self.lat_2 {
            return Err(ModifyError::Config(format!(
                "lnd_lat_1 ({}) must not exceed lnd_lat_2 ({})",
                self.lat_1, self.lat_2
            )));
        }
        lon_range_0_to_360(self.lon_1)?;
        lon_range_0_to_360(self.lon_2)?;
        Ok(())
    }

    /// The rectangle spans the full longitude circle.
    pub fn spans_all_longitudes(&self) -> bool {
        self.lon_2 - self.lon_1 >= 360.0
    }

    pub fn is_global(&self) -> bool {
        self.lat_1 <= -90.0 && self.lat_2 >= 90.0 && self.spans_all_longitudes()
    }
}

impl Default for Rectangle {
    fn default() -> Self {
        Self::GLOBAL
    }
}

/// Map a user longitude in `[-180, 360]` onto `[0, 360]`.
pub fn lon_range_0_to_360(lon: f64) -> Result<f64> {
    if (-180.0..0.0).contains(&lon) {
        Ok(lon + 360.0)
    } else if (0.0..=360.0).contains(&lon) {
        Ok(lon)
    } else {
        Err(ModifyError::Config(format!(
            "longitude {lon} must be in the range -180 to 360"
        )))
    }
}

/// Boolean selection over the `(lat, lon)` grid.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionMask {
    cells: Array2<bool>,
}

impl SelectionMask {
    pub fn from_cells(cells: Array2<bool>) -> Self {
        Self { cells }
    }

    pub fn all(rows: usize, cols: usize) -> Self {
        Self::from_cells(Array2::from_elem((rows, cols), true))
    }

    pub fn cells(&self) -> ArrayView2<'_, bool> {
        self.cells.view()
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.cells.dim()
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.cells.get((row, col)).copied().unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn complement(&self) -> Self {
        Self::from_cells(self.cells.mapv(|c| !c))
    }

    /// Selected `(row, col)` pairs in row-major order.
    pub fn selected(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cells
            .indexed_iter()
            .filter_map(|(idx, &c)| c.then_some(idx))
    }
}

/// A rectangle selection and its exact complement.
#[derive(Debug, Clone, PartialEq)]
pub struct GridMask {
    pub mask: SelectionMask,
    pub not_mask: SelectionMask,
}

impl GridMask {
    /// Select every cell whose coordinates fall in `rect` and, when a land
    /// mask is given, that is also land.
    pub fn compute(
        rect: &Rectangle,
        lats: ArrayView2<'_, f64>,
        lons: ArrayView2<'_, f64>,
        landmask: Option<&LandMask>,
    ) -> Result<Self> {
        rect.validate()?;
        if lats.dim() != lons.dim() {
            return Err(ModifyError::RankMismatch {
                field: "LONGXY".to_string(),
                detail: format!(
                    "longitude grid {:?} differs from latitude grid {:?}",
                    lons.dim(),
                    lats.dim()
                ),
            });
        }

        let lon_1 = lon_range_0_to_360(rect.lon_1)?;
        let lon_2 = lon_range_0_to_360(rect.lon_2)?;
        let all_lons = rect.spans_all_longitudes();
        let lat_lo = rect.lat_1 - LAT_EPS;
        let lat_hi = rect.lat_2 + LAT_EPS;

        let mut cells = Array2::from_elem(lats.dim(), false);
        Zip::from(&mut cells)
            .and(&lats)
            .and(&lons)
            .for_each(|cell, &lat, &lon| {
                let in_lat = lat >= lat_lo && lat <= lat_hi;
                let lon = lon.rem_euclid(360.0);
                let in_lon = if all_lons {
                    true
                } else if lon_1 <= lon_2 {
                    lon >= lon_1 && lon <= lon_2
                } else {
                    lon >= lon_1 || lon <= lon_2
                };
                *cell = in_lat && in_lon;
            });

        if let Some(landmask) = landmask {
            if landmask.shape() != cells.dim() {
                return Err(ModifyError::GridMismatch {
                    expected: cells.dim(),
                    found: landmask.shape(),
                });
            }
            Zip::from(&mut cells)
                .and(&landmask.cells())
                .for_each(|cell, &land| *cell = *cell && land);
        }

        let mask = SelectionMask::from_cells(cells);
        debug!(
            "Selected {} of {} grid cells",
            mask.count(),
            mask.cells.len()
        );
        let not_mask = mask.complement();
        Ok(Self { mask, not_mask })
    }
}
