//! Bare-soil baseline applied before any user override.
//!
//! Every value here is a constant, so applying the preset twice leaves the
//! dataset exactly as applying it once.

use tracing::{info, warn};

use crate::error::Result;
use crate::invariant::{check_category_sum, check_landunit_sum};
use crate::mask::SelectionMask;
use crate::model::{names, Dataset, CFT_DIM, PFT_DIM};
use crate::overwrite::{overwrite, overwrite_at, OverwriteValue};
use crate::vegetation::{natural_pft_count, set_dominant, VegetationTraits, BARE_SOIL};

/// Maximum saturated area fraction.
pub const MAX_SAT_AREA: f64 = 0.0;
/// Standard deviation of elevation (m).
pub const STD_ELEV: f64 = 0.0;
/// Loam.
pub const SOIL_COLOR: f64 = 15.0;
pub const SLOPE: f64 = 0.0;
/// Depth to bedrock (m).
pub const ZBEDROCK: f64 = 10.0;
pub const PFTDATA_MASK: f64 = 1.0;
pub const LANDFRAC_PFT: f64 = 1.0;
/// Loam texture on every soil level.
pub const PCT_SAND: f64 = 43.0;
pub const PCT_CLAY: f64 = 18.0;
pub const ORGANIC: f64 = 0.0;

/// Fields the preset always writes.
const REQUIRED: [(&str, f64); 3] = [
    (names::FMAX, MAX_SAT_AREA),
    (names::STD_ELEV, STD_ELEV),
    (names::SOIL_COLOR, SOIL_COLOR),
];

/// Fields written only when the dataset carries them. Soil texture fields
/// are per soil level; a scalar covers every level.
const OPTIONAL: [(&str, f64); 14] = [
    (names::SLOPE, SLOPE),
    (names::ZBEDROCK, ZBEDROCK),
    (names::PFTDATA_MASK, PFTDATA_MASK),
    (names::LANDFRAC_PFT, LANDFRAC_PFT),
    (names::PCT_SAND, PCT_SAND),
    (names::PCT_CLAY, PCT_CLAY),
    (names::ORGANIC, ORGANIC),
    (names::PCT_NATVEG, 100.0),
    (names::PCT_CROP, 0.0),
    (names::PCT_LAKE, 0.0),
    (names::PCT_WETLAND, 0.0),
    (names::PCT_GLACIER, 0.0),
    (names::PCT_URBAN, 0.0),
    (names::PCT_OCEAN, 0.0),
];

/// Monthly trait fields cleared for every natural PFT.
const TRAIT_FIELDS: [&str; 4] = [
    names::MONTHLY_LAI,
    names::MONTHLY_SAI,
    names::MONTHLY_HEIGHT_TOP,
    names::MONTHLY_HEIGHT_BOT,
];

/// Reset `mask` to the bare-soil baseline.
pub fn apply(dataset: &mut Dataset, mask: &SelectionMask) -> Result<()> {
    // 必須フィールドを先に確認して、途中で失敗しないようにする
    for (name, _) in REQUIRED {
        dataset.field(name)?;
    }
    crate::vegetation::validate(dataset, BARE_SOIL, &VegetationTraits::zeroed())?;

    for (name, value) in REQUIRED {
        overwrite(dataset, name, mask, &value.into())?;
    }
    for (name, value) in OPTIONAL {
        if dataset.contains(name) {
            overwrite(dataset, name, mask, &value.into())?;
        } else {
            warn!("{} not in dataset, skipping", name);
        }
    }

    // 作物は先頭の作物種に100%
    if dataset.contains(names::PCT_CFT) {
        overwrite(dataset, names::PCT_CFT, mask, &0.0.into())?;
        overwrite_at(
            dataset,
            names::PCT_CFT,
            &[(CFT_DIM, 0)],
            mask,
            &OverwriteValue::Scalar(100.0),
        )?;
        check_category_sum(dataset, names::PCT_CFT, mask)?;
    }
    if dataset.contains(names::PCT_NATVEG) {
        check_landunit_sum(dataset, mask)?;
    }

    // 自然PFTの特性値をすべてゼロに (作物PFTは保持)
    let n_natpft = natural_pft_count(dataset)?;
    for name in TRAIT_FIELDS {
        for pft in 0..n_natpft {
            overwrite_at(dataset, name, &[(PFT_DIM, pft)], mask, &OverwriteValue::Scalar(0.0))?;
        }
    }
    set_dominant(dataset, mask, BARE_SOIL, &VegetationTraits::zeroed())?;

    info!("Applied idealized baseline to {} cells", mask.count());
    Ok(())
}
