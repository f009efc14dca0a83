//! Remove non-vegetated land units and renormalize the vegetated ones.
//!
//! Lake, wetland, glacier, urban and ocean weights go to zero inside the
//! mask. The natural-vegetation and crop weights are scaled so the land
//! units sum to 100 again. A cell with no vegetated weight left becomes
//! 100% natural vegetation, all of it bare soil.

use ndarray::Array2;
use tracing::{debug, info};

use crate::error::{ModifyError, Result};
use crate::invariant::{cell_totals, check_category_sum, check_landunit_sum};
use crate::mask::SelectionMask;
use crate::model::{names, Dataset};
use crate::overwrite::{overwrite, OverwriteValue};
use crate::vegetation::{natural_pft_count, BARE_SOIL};

/// Land units zeroed by [`zero_nonveg`].
pub const NONVEG_FIELDS: [&str; 5] = [
    names::PCT_LAKE,
    names::PCT_WETLAND,
    names::PCT_GLACIER,
    names::PCT_URBAN,
    names::PCT_OCEAN,
];

fn grid_copy(dataset: &Dataset, name: &str, mask: &SelectionMask) -> Result<Array2<f64>> {
    let grid = dataset.field(name)?.as_grid(name)?;
    if grid.dim() != mask.shape() {
        return Err(ModifyError::RankMismatch {
            field: name.to_string(),
            detail: format!("grid {:?} does not match mask {:?}", grid.dim(), mask.shape()),
        });
    }
    Ok(grid.to_owned())
}

pub fn zero_nonveg(dataset: &mut Dataset, mask: &SelectionMask) -> Result<()> {
    let natveg = grid_copy(dataset, names::PCT_NATVEG, mask)?;
    let crop = match dataset.get(names::PCT_CROP) {
        Some(_) => Some(grid_copy(dataset, names::PCT_CROP, mask)?),
        None => None,
    };
    let present: Vec<&str> = NONVEG_FIELDS
        .into_iter()
        .filter(|name| dataset.contains(name))
        .collect();
    for name in &present {
        let field = dataset.field(name)?;
        if field.grid_shape() != mask.shape() {
            return Err(ModifyError::RankMismatch {
                field: name.to_string(),
                detail: format!(
                    "grid {:?} does not match mask {:?}",
                    field.grid_shape(),
                    mask.shape()
                ),
            });
        }
    }

    let mut freed: Array2<f64> = Array2::zeros(mask.shape());
    for name in &present {
        freed += &cell_totals(dataset.field(name)?);
        overwrite(dataset, name, mask, &0.0.into())?;
    }

    let mut new_natveg = natveg.clone();
    let mut new_crop = crop.clone();
    let mut bare = Array2::from_elem(mask.shape(), false);
    for (row, col) in mask.selected() {
        let n = natveg[[row, col]];
        let k = crop.as_ref().map_or(0.0, |c| c[[row, col]]);
        let remaining = n + k;
        if remaining > 0.0 {
            let scale = 100.0 / remaining;
            new_natveg[[row, col]] = n * scale;
            if let Some(c) = new_crop.as_mut() {
                c[[row, col]] = k * scale;
            }
        } else {
            new_natveg[[row, col]] = 100.0;
            if let Some(c) = new_crop.as_mut() {
                c[[row, col]] = 0.0;
            }
            bare[[row, col]] = true;
        }
    }

    dataset.field_mut(names::PCT_NATVEG)?.values = new_natveg.into_dyn();
    if let Some(c) = new_crop {
        dataset.field_mut(names::PCT_CROP)?.values = c.into_dyn();
    }

    let bare = SelectionMask::from_cells(bare);
    if !bare.is_empty() && dataset.contains(names::PCT_NAT_PFT) {
        let n_natpft = natural_pft_count(dataset)?;
        let mut composition = vec![0.0; n_natpft];
        composition[BARE_SOIL] = 100.0;
        overwrite(
            dataset,
            names::PCT_NAT_PFT,
            &bare,
            &OverwriteValue::per_index(composition),
        )?;
        check_category_sum(dataset, names::PCT_NAT_PFT, &bare)?;
        debug!("{} cells had no vegetated land left; set to bare soil", bare.count());
    }

    check_landunit_sum(dataset, mask)?;

    let total_freed: f64 = mask.selected().map(|(row, col)| freed[[row, col]]).sum();
    info!(
        "Zeroed non-vegetated land units in {} cells ({:.2} percentage points redistributed)",
        mask.count(),
        total_freed
    );
    Ok(())
}
