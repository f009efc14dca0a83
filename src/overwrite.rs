//! Mask-guided replace-or-keep on fields of any rank.
//!
//! The mask always applies to the trailing `(lat, lon)` axes. Cells outside
//! the mask keep their previous bits; nothing is recomputed there.

use ndarray::{Array1, ArrayD, ArrayViewMutD, Axis, Zip};
use tracing::debug;

use crate::error::{ModifyError, Result};
use crate::mask::SelectionMask;
use crate::model::{Dataset, Field, LAT_DIM, LON_DIM};

/// Value written into the selected cells.
#[derive(Debug, Clone, PartialEq)]
pub enum OverwriteValue {
    Scalar(f64),
    /// One value per index of the field's leading dimensions, broadcast over
    /// the grid.
    Array(ArrayD<f64>),
}

impl OverwriteValue {
    /// One value per index of a single leading dimension.
    pub fn per_index(values: Vec<f64>) -> Self {
        Self::Array(Array1::from(values).into_dyn())
    }
}

impl From<f64> for OverwriteValue {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

fn check_shapes(
    shape: &[usize],
    mask: &SelectionMask,
    value: &OverwriteValue,
) -> std::result::Result<(), String> {
    let n = shape.len();
    if n < 2 {
        return Err(format!("rank {n} has no ({LAT_DIM}, {LON_DIM}) axes"));
    }
    let grid = (shape[n - 2], shape[n - 1]);
    if grid != mask.shape() {
        return Err(format!(
            "mask is {:?} but field grid is {:?}",
            mask.shape(),
            grid
        ));
    }
    if let OverwriteValue::Array(a) = value {
        if a.len() != 1 && a.shape() != &shape[..n - 2] {
            return Err(format!(
                "value of shape {:?} does not fit leading dimensions {:?}",
                a.shape(),
                &shape[..n - 2]
            ));
        }
    }
    Ok(())
}

/// All failure paths return before the first write.
fn write_selected(
    mut view: ArrayViewMutD<'_, f64>,
    mask: &SelectionMask,
    value: &OverwriteValue,
) -> std::result::Result<(), String> {
    let shape = view.shape().to_vec();
    check_shapes(&shape, mask, value)?;
    let n = shape.len();

    let full = view.raw_dim();
    let mask_view = mask.cells();
    let selected = mask_view
        .broadcast(full.clone())
        .ok_or_else(|| "mask does not broadcast over field".to_string())?;

    match value {
        OverwriteValue::Array(a) if a.len() != 1 => {
            let planes = a.view().insert_axis(Axis(n - 2)).insert_axis(Axis(n - 1));
            let planes = planes
                .broadcast(full)
                .ok_or_else(|| "value does not broadcast over field".to_string())?;
            Zip::from(&mut view)
                .and(&selected)
                .and(&planes)
                .for_each(|x, &m, &v| {
                    if m {
                        *x = v;
                    }
                });
        }
        _ => {
            let v = match value {
                OverwriteValue::Scalar(v) => *v,
                OverwriteValue::Array(a) => a.iter().next().copied().unwrap_or_default(),
            };
            Zip::from(&mut view).and(&selected).for_each(|x, &m| {
                if m {
                    *x = v;
                }
            });
        }
    }
    Ok(())
}

fn rank_mismatch(name: &str) -> impl FnOnce(String) -> ModifyError + '_ {
    move |detail| ModifyError::RankMismatch {
        field: name.to_string(),
        detail,
    }
}

/// Overwrite every selected cell of `field`, across all of its leading
/// indices.
pub fn overwrite_field(
    field: &mut Field,
    name: &str,
    mask: &SelectionMask,
    value: &OverwriteValue,
) -> Result<()> {
    write_selected(field.values.view_mut(), mask, value).map_err(rank_mismatch(name))
}

/// Overwrite `name` in the dataset within `mask`.
pub fn overwrite(
    dataset: &mut Dataset,
    name: &str,
    mask: &SelectionMask,
    value: &OverwriteValue,
) -> Result<()> {
    // 変更前に形状を検証する
    let shape = dataset.field(name)?.values.shape().to_vec();
    check_shapes(&shape, mask, value).map_err(rank_mismatch(name))?;

    overwrite_field(dataset.field_mut(name)?, name, mask, value)?;
    debug!("Overwrote {} in {} cells", name, mask.count());
    Ok(())
}

/// Overwrite the sub-array of `name` found by fixing the given leading
/// dimensions, e.g. `[("time", 3), ("lsmpft", 7)]`.
pub fn overwrite_at(
    dataset: &mut Dataset,
    name: &str,
    index: &[(&str, usize)],
    mask: &SelectionMask,
    value: &OverwriteValue,
) -> Result<()> {
    let field = dataset.field(name)?;
    let mut axes = Vec::with_capacity(index.len());
    for &(dim, i) in index {
        let axis = field
            .axis_of(dim)
            .filter(|_| dim != LAT_DIM && dim != LON_DIM)
            .ok_or_else(|| ModifyError::RankMismatch {
                field: name.to_string(),
                detail: format!("no leading dimension '{dim}' in {:?}", field.dims),
            })?;
        let len = field.values.len_of(Axis(axis));
        if i >= len {
            return Err(ModifyError::RankMismatch {
                field: name.to_string(),
                detail: format!("index {i} out of range for '{dim}' (length {len})"),
            });
        }
        if axes.iter().any(|&(a, _)| a == axis) {
            return Err(ModifyError::RankMismatch {
                field: name.to_string(),
                detail: format!("dimension '{dim}' fixed twice"),
            });
        }
        axes.push((axis, i));
    }
    // 後ろの軸から固定して、前の軸番号を保つ
    axes.sort_by(|a, b| b.0.cmp(&a.0));

    let sub_shape: Vec<usize> = field
        .values
        .shape()
        .iter()
        .enumerate()
        .filter(|(ax, _)| !axes.iter().any(|&(a, _)| a == *ax))
        .map(|(_, &len)| len)
        .collect();
    check_shapes(&sub_shape, mask, value).map_err(rank_mismatch(name))?;

    let mut view = dataset.field_mut(name)?.values.view_mut();
    for &(axis, i) in &axes {
        view = view.index_axis_move(Axis(axis), i);
    }
    write_selected(view, mask, value).map_err(rank_mismatch(name))
}
