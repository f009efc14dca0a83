//! Percentage-sum checks run after edits that touch fraction fields.

use ndarray::{Array2, Axis};

use crate::error::{ModifyError, Result};
use crate::mask::SelectionMask;
use crate::model::{names, Dataset, Field};

/// Allowed deviation from 100, in percentage points.
pub const FRACTION_TOLERANCE: f64 = 1e-6;

/// Land-unit weight fields; together they cover each grid cell.
pub const LANDUNIT_FIELDS: [&str; 7] = [
    names::PCT_NATVEG,
    names::PCT_CROP,
    names::PCT_LAKE,
    names::PCT_WETLAND,
    names::PCT_GLACIER,
    names::PCT_URBAN,
    names::PCT_OCEAN,
];

/// Per-cell sum over every leading dimension of `field`.
pub fn cell_totals(field: &Field) -> Array2<f64> {
    let (rows, cols) = field.grid_shape();
    let lead: usize = field.lead_shape().iter().product();
    match field.values.to_shape((lead, rows, cols)) {
        Ok(cube) => cube.sum_axis(Axis(0)),
        Err(_) => Array2::zeros((rows, cols)),
    }
}

fn check_totals(name: &str, totals: &Array2<f64>, mask: &SelectionMask) -> Result<()> {
    for (row, col) in mask.selected() {
        let sum = totals[[row, col]];
        if (sum - 100.0).abs() > FRACTION_TOLERANCE {
            return Err(ModifyError::InvariantViolation {
                field: name.to_string(),
                row,
                col,
                sum,
            });
        }
    }
    Ok(())
}

/// `name` (e.g. `PCT_NAT_PFT`) sums to 100 along its category axis at every
/// selected cell.
pub fn check_category_sum(dataset: &Dataset, name: &str, mask: &SelectionMask) -> Result<()> {
    let totals = cell_totals(dataset.field(name)?);
    check_totals(name, &totals, mask)
}

/// Land-unit weights present in the dataset sum to 100 at every selected
/// cell.
pub fn check_landunit_sum(dataset: &Dataset, mask: &SelectionMask) -> Result<()> {
    let mut totals: Array2<f64> = Array2::zeros(dataset.grid_shape());
    for name in LANDUNIT_FIELDS {
        if let Some(field) = dataset.get(name) {
            totals += &cell_totals(field);
        }
    }
    check_totals("land units", &totals, mask)
}
