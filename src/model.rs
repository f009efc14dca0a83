//! In-memory representation of an fsurdat surface dataset.
//!
//! A [`Dataset`] is an ordered map from variable name to [`Field`]. Every field
//! is indexed by named dimensions and always ends with the two grid
//! dimensions `(lsmlat, lsmlon)`; leading dimensions (plant functional type,
//! soil level, month, ...) come first, as they do on disk.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{ArrayD, ArrayView2, Ix2};

use crate::error::{ModifyError, Result};

/// Grid dimension names.
pub const LAT_DIM: &str = "lsmlat";
pub const LON_DIM: &str = "lsmlon";

/// Non-grid dimension names the engine understands.
pub const NATPFT_DIM: &str = "natpft";
pub const CFT_DIM: &str = "cft";
pub const PFT_DIM: &str = "lsmpft";
pub const TIME_DIM: &str = "time";
pub const SOIL_LEVEL_DIM: &str = "nlevsoi";

/// Field names used by the engine.
pub mod names {
    pub const LONGXY: &str = "LONGXY";
    pub const LATIXY: &str = "LATIXY";

    pub const PCT_NAT_PFT: &str = "PCT_NAT_PFT";
    pub const PCT_CFT: &str = "PCT_CFT";

    pub const MONTHLY_LAI: &str = "MONTHLY_LAI";
    pub const MONTHLY_SAI: &str = "MONTHLY_SAI";
    pub const MONTHLY_HEIGHT_TOP: &str = "MONTHLY_HEIGHT_TOP";
    pub const MONTHLY_HEIGHT_BOT: &str = "MONTHLY_HEIGHT_BOT";

    pub const FMAX: &str = "FMAX";
    pub const STD_ELEV: &str = "STD_ELEV";
    pub const SOIL_COLOR: &str = "SOIL_COLOR";
    pub const SLOPE: &str = "SLOPE";
    pub const ZBEDROCK: &str = "zbedrock";
    pub const PFTDATA_MASK: &str = "PFTDATA_MASK";
    pub const LANDFRAC_PFT: &str = "LANDFRAC_PFT";

    pub const PCT_SAND: &str = "PCT_SAND";
    pub const PCT_CLAY: &str = "PCT_CLAY";
    pub const ORGANIC: &str = "ORGANIC";

    pub const PCT_NATVEG: &str = "PCT_NATVEG";
    pub const PCT_CROP: &str = "PCT_CROP";
    pub const PCT_LAKE: &str = "PCT_LAKE";
    pub const PCT_WETLAND: &str = "PCT_WETLAND";
    pub const PCT_GLACIER: &str = "PCT_GLACIER";
    pub const PCT_URBAN: &str = "PCT_URBAN";
    pub const PCT_OCEAN: &str = "PCT_OCEAN";
}

/// One gridded variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Dimension names, outermost first. The last two are always the grid.
    pub dims: Vec<String>,
    pub values: ArrayD<f64>,
}

impl Field {
    pub fn new<S: Into<String>>(dims: impl IntoIterator<Item = S>, values: ArrayD<f64>) -> Self {
        Self {
            dims: dims.into_iter().map(Into::into).collect(),
            values,
        }
    }

    /// A plain `(lsmlat, lsmlon)` field.
    pub fn grid(values: ndarray::Array2<f64>) -> Self {
        Self::new([LAT_DIM, LON_DIM], values.into_dyn())
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Shape of the leading (non-grid) dimensions.
    pub fn lead_shape(&self) -> &[usize] {
        let shape = self.values.shape();
        &shape[..shape.len().saturating_sub(2)]
    }

    pub fn grid_shape(&self) -> (usize, usize) {
        let shape = self.values.shape();
        let n = shape.len();
        if n < 2 {
            return (0, 0);
        }
        (shape[n - 2], shape[n - 1])
    }

    /// View a plain 2-D field as a grid.
    pub fn as_grid(&self, name: &str) -> Result<ArrayView2<'_, f64>> {
        self.values
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| ModifyError::RankMismatch {
                field: name.to_string(),
                detail: format!("expected a 2-D (lat, lon) field: {e}"),
            })
    }
}

/// A loaded surface dataset.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    dims: BTreeMap<String, usize>,
    fields: BTreeMap<String, Field>,
    modified: BTreeSet<String>,
}

impl Dataset {
    pub fn new(rows: usize, cols: usize) -> Self {
        let mut dims = BTreeMap::new();
        dims.insert(LAT_DIM.to_string(), rows);
        dims.insert(LON_DIM.to_string(), cols);
        Self {
            dims,
            ..Default::default()
        }
    }

    pub fn set_dimension(&mut self, name: &str, len: usize) {
        self.dims.insert(name.to_string(), len);
    }

    pub fn dimension(&self, name: &str) -> Option<usize> {
        self.dims.get(name).copied()
    }

    /// `(rows, cols)` of the lat/lon grid.
    pub fn grid_shape(&self) -> (usize, usize) {
        (
            self.dimension(LAT_DIM).unwrap_or(0),
            self.dimension(LON_DIM).unwrap_or(0),
        )
    }

    /// Add a field loaded from the archive. Inserting does not mark the field
    /// as modified.
    pub fn insert(&mut self, name: &str, field: Field) -> Result<()> {
        let shape = field.values.shape().to_vec();
        if field.dims.len() != shape.len() {
            return Err(ModifyError::RankMismatch {
                field: name.to_string(),
                detail: format!(
                    "{} dimension names for a rank-{} array",
                    field.dims.len(),
                    shape.len()
                ),
            });
        }
        let n = field.dims.len();
        if n < 2 || field.dims[n - 2] != LAT_DIM || field.dims[n - 1] != LON_DIM {
            return Err(ModifyError::RankMismatch {
                field: name.to_string(),
                detail: format!("must end with ({LAT_DIM}, {LON_DIM}), got {:?}", field.dims),
            });
        }
        for (dim, &len) in field.dims.iter().zip(&shape) {
            match self.dims.get(dim) {
                Some(&known) if known != len => {
                    return Err(ModifyError::RankMismatch {
                        field: name.to_string(),
                        detail: format!("dimension '{dim}' has length {len}, dataset has {known}"),
                    });
                }
                Some(_) => {}
                None => {
                    self.dims.insert(dim.clone(), len);
                }
            }
        }
        self.fields.insert(name.to_string(), field);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Field> {
        self.modified.remove(name);
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .get(name)
            .ok_or_else(|| ModifyError::MissingField(name.to_string()))
    }

    /// Mutable access; the field is recorded as modified and will be written.
    pub fn field_mut(&mut self, name: &str) -> Result<&mut Field> {
        let field = self
            .fields
            .get_mut(name)
            .ok_or_else(|| ModifyError::MissingField(name.to_string()))?;
        self.modified.insert(name.to_string());
        Ok(field)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_modified(&self, name: &str) -> bool {
        self.modified.contains(name)
    }

    pub fn modified_fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.modified
            .iter()
            .filter_map(|name| self.fields.get(name).map(|f| (name.as_str(), f)))
    }

    pub fn latitudes(&self) -> Result<ArrayView2<'_, f64>> {
        self.field(names::LATIXY)?.as_grid(names::LATIXY)
    }

    pub fn longitudes(&self) -> Result<ArrayView2<'_, f64>> {
        self.field(names::LONGXY)?.as_grid(names::LONGXY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    #[test]
    fn test_insert_registers_lead_dimensions() {
        let mut ds = Dataset::new(2, 3);
        let pft = Field::new([NATPFT_DIM, LAT_DIM, LON_DIM], Array3::zeros((15, 2, 3)).into_dyn());
        ds.insert(names::PCT_NAT_PFT, pft).unwrap();

        assert_eq!(ds.dimension(NATPFT_DIM), Some(15));
        assert_eq!(ds.field(names::PCT_NAT_PFT).unwrap().lead_shape(), &[15]);
        assert!(!ds.is_modified(names::PCT_NAT_PFT));
    }

    #[test]
    fn test_insert_rejects_wrong_grid() {
        let mut ds = Dataset::new(2, 3);
        let err = ds
            .insert(names::FMAX, Field::grid(Array2::zeros((3, 2))))
            .unwrap_err();
        assert!(matches!(err, ModifyError::RankMismatch { .. }));
    }

    #[test]
    fn test_insert_rejects_non_grid_trailing_dims() {
        let mut ds = Dataset::new(2, 3);
        let field = Field::new([LAT_DIM, NATPFT_DIM], Array2::zeros((2, 3)).into_dyn());
        assert!(ds.insert("BAD", field).is_err());
    }

    #[test]
    fn test_field_mut_marks_modified() {
        let mut ds = Dataset::new(1, 1);
        ds.insert(names::FMAX, Field::grid(Array2::zeros((1, 1))))
            .unwrap();
        ds.field_mut(names::FMAX).unwrap().values[[0, 0]] = 0.5;

        let modified: Vec<_> = ds.modified_fields().map(|(n, _)| n).collect();
        assert_eq!(modified, vec![names::FMAX]);
    }

    #[test]
    fn test_missing_field() {
        let ds = Dataset::new(1, 1);
        assert!(matches!(
            ds.field("NOPE"),
            Err(ModifyError::MissingField(name)) if name == "NOPE"
        ));
    }
}
