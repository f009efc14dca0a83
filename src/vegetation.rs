//! Dominant natural PFT composition.
//!
//! Inside the mask the natural-vegetation composition becomes 100% of one
//! plant functional type. The monthly trait fields (LAI, SAI, canopy
//! top/bottom height) are rewritten for that PFT only.

use tracing::info;

use crate::error::{ModifyError, Result};
use crate::invariant::check_category_sum;
use crate::mask::SelectionMask;
use crate::model::{names, Dataset, PFT_DIM, TIME_DIM};
use crate::overwrite::{overwrite, overwrite_at, OverwriteValue};

/// Highest natural PFT index accepted.
pub const MAX_NAT_PFT: usize = 14;
pub const BARE_SOIL: usize = 0;

/// Monthly traits for the dominant PFT.
///
/// `None` leaves the trait field untouched. `Some(vec![])` writes zeros for
/// every month. Otherwise the list must hold one value per month.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VegetationTraits {
    pub lai: Option<Vec<f64>>,
    pub sai: Option<Vec<f64>>,
    pub hgt_top: Option<Vec<f64>>,
    pub hgt_bot: Option<Vec<f64>>,
}

impl VegetationTraits {
    /// Explicitly empty traits, as used by the idealized preset.
    pub fn zeroed() -> Self {
        Self {
            lai: Some(Vec::new()),
            sai: Some(Vec::new()),
            hgt_top: Some(Vec::new()),
            hgt_bot: Some(Vec::new()),
        }
    }

    pub fn is_unset(&self) -> bool {
        self.entries().iter().all(|(_, _, v)| v.is_none())
    }

    /// `(config key, field name, values)`
    fn entries(&self) -> [(&'static str, &'static str, Option<&[f64]>); 4] {
        [
            ("lai", names::MONTHLY_LAI, self.lai.as_deref()),
            ("sai", names::MONTHLY_SAI, self.sai.as_deref()),
            ("hgt_top", names::MONTHLY_HEIGHT_TOP, self.hgt_top.as_deref()),
            ("hgt_bot", names::MONTHLY_HEIGHT_BOT, self.hgt_bot.as_deref()),
        ]
    }
}

/// Number of natural PFTs in the dataset's composition field.
pub fn natural_pft_count(dataset: &Dataset) -> Result<usize> {
    let field = dataset.field(names::PCT_NAT_PFT)?;
    match field.lead_shape() {
        [n] => Ok(*n),
        other => Err(ModifyError::RankMismatch {
            field: names::PCT_NAT_PFT.to_string(),
            detail: format!("expected one category dimension, got {other:?}"),
        }),
    }
}

/// Check every argument of [`set_dominant`] against the dataset without
/// touching it.
pub fn validate(dataset: &Dataset, dominant: usize, traits: &VegetationTraits) -> Result<()> {
    if dominant > MAX_NAT_PFT {
        return Err(ModifyError::Config(format!(
            "dom_nat_pft = {dominant} must be in the range 0 to {MAX_NAT_PFT}"
        )));
    }
    let n_natpft = natural_pft_count(dataset)?;
    if dominant >= n_natpft {
        return Err(ModifyError::Config(format!(
            "dom_nat_pft = {dominant} but the dataset has {n_natpft} natural PFTs"
        )));
    }

    for (key, name, values) in traits.entries() {
        let Some(values) = values else { continue };
        let field = dataset.field(name)?;
        let n_time = field
            .axis_of(TIME_DIM)
            .map(|axis| field.values.shape()[axis])
            .ok_or_else(|| ModifyError::RankMismatch {
                field: name.to_string(),
                detail: format!("no '{TIME_DIM}' dimension in {:?}", field.dims),
            })?;
        let n_pft = field
            .axis_of(PFT_DIM)
            .map(|axis| field.values.shape()[axis])
            .ok_or_else(|| ModifyError::RankMismatch {
                field: name.to_string(),
                detail: format!("no '{PFT_DIM}' dimension in {:?}", field.dims),
            })?;
        if n_pft < n_natpft {
            return Err(ModifyError::RankMismatch {
                field: name.to_string(),
                detail: format!("{n_pft} PFTs but {n_natpft} natural PFTs expected"),
            });
        }
        if !values.is_empty() && values.len() != n_time {
            return Err(ModifyError::Config(format!(
                "{key} must have exactly {n_time} entries, got {}",
                values.len()
            )));
        }
    }
    Ok(())
}

/// Make `dominant` the only natural PFT inside `mask`.
pub fn set_dominant(
    dataset: &mut Dataset,
    mask: &SelectionMask,
    dominant: usize,
    traits: &VegetationTraits,
) -> Result<()> {
    validate(dataset, dominant, traits)?;
    let n_natpft = natural_pft_count(dataset)?;

    let mut composition = vec![0.0; n_natpft];
    composition[dominant] = 100.0;
    overwrite(
        dataset,
        names::PCT_NAT_PFT,
        mask,
        &OverwriteValue::per_index(composition),
    )?;

    for (_, name, values) in traits.entries() {
        let Some(values) = values else { continue };
        let n_time = dataset
            .dimension(TIME_DIM)
            .unwrap_or(values.len());
        let monthly = if values.is_empty() {
            vec![0.0; n_time]
        } else {
            values.to_vec()
        };
        // 優勢PFTのみ書き換え、他のPFTは入力値を保持
        overwrite_at(
            dataset,
            name,
            &[(PFT_DIM, dominant)],
            mask,
            &OverwriteValue::per_index(monthly),
        )?;
    }

    check_category_sum(dataset, names::PCT_NAT_PFT, mask)?;
    info!(
        "Set dominant natural PFT {} in {} cells",
        dominant,
        mask.count()
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{Field, LAT_DIM, LON_DIM, NATPFT_DIM};
    use ndarray::{arr2, Array3, Array4, IxDyn};

    pub(crate) const N_NATPFT: usize = 15;
    pub(crate) const N_PFT: usize = 17;
    pub(crate) const N_TIME: usize = 12;

    /// 2x2 grid with a mixed composition and non-zero traits everywhere.
    pub(crate) fn vegetated_dataset() -> Dataset {
        let mut ds = Dataset::new(2, 2);
        let pct = Array3::from_shape_fn((N_NATPFT, 2, 2), |(p, _, _)| match p {
            0 => 40.0,
            3 => 35.0,
            7 => 25.0,
            _ => 0.0,
        });
        ds.insert(
            names::PCT_NAT_PFT,
            Field::new([NATPFT_DIM, LAT_DIM, LON_DIM], pct.into_dyn()),
        )
        .unwrap();
        for (i, name) in [
            names::MONTHLY_LAI,
            names::MONTHLY_SAI,
            names::MONTHLY_HEIGHT_TOP,
            names::MONTHLY_HEIGHT_BOT,
        ]
        .into_iter()
        .enumerate()
        {
            let values = Array4::from_elem((N_TIME, N_PFT, 2, 2), 2.0 + i as f64);
            ds.insert(
                name,
                Field::new([TIME_DIM, PFT_DIM, LAT_DIM, LON_DIM], values.into_dyn()),
            )
            .unwrap();
        }
        ds
    }

    fn top_row() -> SelectionMask {
        SelectionMask::from_cells(arr2(&[[true, true], [false, false]]))
    }

    #[test]
    fn test_dominant_pft_gets_full_fraction() {
        let mut ds = vegetated_dataset();
        set_dominant(&mut ds, &top_row(), 7, &VegetationTraits::default()).unwrap();

        let pct = &ds.field(names::PCT_NAT_PFT).unwrap().values;
        for c in 0..2 {
            let column: Vec<f64> = (0..N_NATPFT).map(|p| pct[IxDyn(&[p, 0, c])]).collect();
            assert_eq!(column.iter().sum::<f64>(), 100.0);
            assert_eq!(column[7], 100.0);
            assert!(column.iter().enumerate().all(|(p, &v)| p == 7 || v == 0.0));
            // 下の行は元のまま
            assert_eq!(pct[IxDyn(&[0, 1, c])], 40.0);
            assert_eq!(pct[IxDyn(&[3, 1, c])], 35.0);
        }
        // 特性値は指定しなければ変更しない
        assert!(!ds.is_modified(names::MONTHLY_LAI));
    }

    #[test]
    fn test_traits_written_for_dominant_only() {
        let mut ds = vegetated_dataset();
        let lai: Vec<f64> = (1..=12).map(|m| m as f64 / 2.0).collect();
        let traits = VegetationTraits {
            lai: Some(lai.clone()),
            ..Default::default()
        };
        set_dominant(&mut ds, &top_row(), 1, &traits).unwrap();

        let values = &ds.field(names::MONTHLY_LAI).unwrap().values;
        for (m, &expected) in lai.iter().enumerate() {
            assert_eq!(values[IxDyn(&[m, 1, 0, 0])], expected);
            assert_eq!(values[IxDyn(&[m, 1, 0, 1])], expected);
            // 他の自然PFT、作物PFT、範囲外セルは保持
            assert_eq!(values[IxDyn(&[m, 0, 0, 1])], 2.0);
            assert_eq!(values[IxDyn(&[m, 14, 0, 0])], 2.0);
            assert_eq!(values[IxDyn(&[m, 15, 0, 0])], 2.0);
            assert_eq!(values[IxDyn(&[m, 1, 1, 0])], 2.0);
        }
        assert!(!ds.is_modified(names::MONTHLY_SAI));
    }

    #[test]
    fn test_explicit_empty_traits_zero_every_month() {
        let mut ds = vegetated_dataset();
        set_dominant(&mut ds, &top_row(), BARE_SOIL, &VegetationTraits::zeroed()).unwrap();

        for (name, input) in [(names::MONTHLY_LAI, 2.0), (names::MONTHLY_HEIGHT_BOT, 5.0)] {
            let values = &ds.field(name).unwrap().values;
            for m in 0..N_TIME {
                assert_eq!(values[IxDyn(&[m, BARE_SOIL, 0, 1])], 0.0);
                for p in 1..N_PFT {
                    assert_eq!(values[IxDyn(&[m, p, 0, 1])], input);
                }
            }
        }
        let pct = &ds.field(names::PCT_NAT_PFT).unwrap().values;
        assert_eq!(pct[IxDyn(&[BARE_SOIL, 0, 0])], 100.0);
        assert_eq!(pct[IxDyn(&[7, 0, 0])], 0.0);
    }

    #[test]
    fn test_out_of_range_pft_rejected_before_mutation() {
        let mut ds = vegetated_dataset();
        let before = ds.clone();

        let err = set_dominant(&mut ds, &top_row(), 15, &VegetationTraits::zeroed()).unwrap_err();
        assert!(matches!(err, ModifyError::Config(_)));
        assert_eq!(
            ds.field(names::PCT_NAT_PFT).unwrap(),
            before.field(names::PCT_NAT_PFT).unwrap()
        );
        assert!(ds.modified_fields().next().is_none());
    }

    #[test]
    fn test_wrong_month_count_rejected_before_mutation() {
        let mut ds = vegetated_dataset();
        let traits = VegetationTraits {
            sai: Some(vec![1.0; 11]),
            ..Default::default()
        };

        let err = set_dominant(&mut ds, &top_row(), 2, &traits).unwrap_err();
        assert!(matches!(err, ModifyError::Config(msg) if msg.contains("sai")));
        assert!(ds.modified_fields().next().is_none());
    }

    #[test]
    fn test_traits_require_fields() {
        let mut ds = Dataset::new(2, 2);
        ds.insert(
            names::PCT_NAT_PFT,
            Field::new(
                [NATPFT_DIM, LAT_DIM, LON_DIM],
                Array3::<f64>::zeros((N_NATPFT, 2, 2)).into_dyn(),
            ),
        )
        .unwrap();

        let err = validate(&ds, 1, &VegetationTraits::zeroed()).unwrap_err();
        assert!(matches!(err, ModifyError::MissingField(_)));
        assert!(validate(&ds, 1, &VegetationTraits::default()).is_ok());
    }
}
