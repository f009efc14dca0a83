//! One modification run over a single dataset.
//!
//! Stages run in a fixed order: the mask first, then any of idealized
//! preset, dominant PFT, scalar overrides and non-vegetation zeroing, and
//! finally the write. Stages may be skipped but never reordered.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::ModifyConfig;
use crate::error::{ModifyError, Result};
use crate::idealized;
use crate::landmask::LandMask;
use crate::mask::{GridMask, Rectangle, SelectionMask};
use crate::model::{names, Dataset};
use crate::nonveg;
use crate::overwrite::overwrite;
use crate::reader::read_fsurdat;
use crate::vegetation::{self, VegetationTraits};
use crate::writer::FsurdatWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Loaded,
    MaskComputed,
    Idealized,
    DominantSet,
    ScalarOverrides,
    NonVegZeroed,
    Written,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Loaded => "load",
            SessionState::MaskComputed => "compute_mask",
            SessionState::Idealized => "idealized",
            SessionState::DominantSet => "dom_nat_pft",
            SessionState::ScalarOverrides => "scalar overrides",
            SessionState::NonVegZeroed => "zero_nonveg",
            SessionState::Written => "write",
        }
    }
}

/// Per-field constants written inside the mask.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScalarOverrides {
    pub max_sat_area: Option<f64>,
    pub std_elev: Option<f64>,
    pub soil_color: Option<u8>,
}

impl ScalarOverrides {
    pub fn is_empty(&self) -> bool {
        self.entries().iter().all(|(_, v)| v.is_none())
    }

    /// Fields in the order they are written.
    fn entries(&self) -> [(&'static str, Option<f64>); 3] {
        [
            (names::FMAX, self.max_sat_area),
            (names::STD_ELEV, self.std_elev),
            (names::SOIL_COLOR, self.soil_color.map(f64::from)),
        ]
    }
}

impl From<&ModifyConfig> for ScalarOverrides {
    fn from(config: &ModifyConfig) -> Self {
        Self {
            max_sat_area: config.max_sat_area,
            std_elev: config.std_elev,
            soil_color: config.soil_color,
        }
    }
}

pub struct ModificationSession {
    dataset: Dataset,
    mask: Option<GridMask>,
    state: SessionState,
    fsurdat_in: Option<PathBuf>,
}

impl ModificationSession {
    pub fn load(fsurdat_in: &Path) -> Result<Self> {
        let dataset = read_fsurdat(fsurdat_in)?;
        let mut session = Self::from_dataset(dataset);
        session.fsurdat_in = Some(fsurdat_in.to_path_buf());
        Ok(session)
    }

    /// Session over an in-memory dataset. It has no source file, so it can
    /// be edited but not written.
    pub fn from_dataset(dataset: Dataset) -> Self {
        Self {
            dataset,
            mask: None,
            state: SessionState::Loaded,
            fsurdat_in: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }

    /// The mask computed for this session, once `compute_mask` has run.
    pub fn mask(&self) -> Option<&GridMask> {
        self.mask.as_ref()
    }

    /// Whether latitude increases with row index.
    pub fn lat_ascending(&self) -> Result<bool> {
        let lats = self.dataset.latitudes()?;
        let rows = lats.nrows();
        Ok(rows > 1 && lats[[0, 0]] < lats[[rows - 1, 0]])
    }

    fn check_order(&self, next: SessionState) -> Result<()> {
        let requires_mask = next > SessionState::MaskComputed;
        if next <= self.state || (requires_mask && self.mask.is_none()) {
            return Err(ModifyError::OutOfOrder {
                requested: next.name(),
                current: self.state.name(),
            });
        }
        Ok(())
    }

    /// Dataset and mask borrowed together for an edit stage.
    fn parts(&mut self) -> Result<(&mut Dataset, &SelectionMask)> {
        let mask = self.mask.as_ref().ok_or(ModifyError::OutOfOrder {
            requested: "edit",
            current: SessionState::Loaded.name(),
        })?;
        Ok((&mut self.dataset, &mask.mask))
    }

    pub fn compute_mask(
        &mut self,
        rectangle: &Rectangle,
        landmask: Option<&LandMask>,
    ) -> Result<&GridMask> {
        self.check_order(SessionState::MaskComputed)?;
        let mask = GridMask::compute(
            rectangle,
            self.dataset.latitudes()?,
            self.dataset.longitudes()?,
            landmask,
        )?;
        info!(
            "Selected {} of {} grid cells",
            mask.mask.count(),
            mask.mask.cells().len()
        );
        self.state = SessionState::MaskComputed;
        Ok(self.mask.insert(mask))
    }

    pub fn apply_idealized(&mut self) -> Result<()> {
        self.check_order(SessionState::Idealized)?;
        let (dataset, mask) = self.parts()?;
        idealized::apply(dataset, mask)?;
        self.state = SessionState::Idealized;
        Ok(())
    }

    pub fn set_dominant(&mut self, dominant: usize, traits: &VegetationTraits) -> Result<()> {
        self.check_order(SessionState::DominantSet)?;
        let (dataset, mask) = self.parts()?;
        vegetation::set_dominant(dataset, mask, dominant, traits)?;
        self.state = SessionState::DominantSet;
        Ok(())
    }

    pub fn apply_scalar_overrides(&mut self, overrides: &ScalarOverrides) -> Result<()> {
        self.check_order(SessionState::ScalarOverrides)?;
        let (dataset, mask) = self.parts()?;

        let requested: Vec<(&str, f64)> = overrides
            .entries()
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .collect();
        for (name, _) in &requested {
            dataset.field(name)?;
        }
        for (name, value) in requested {
            overwrite(dataset, name, mask, &value.into())?;
            info!("Set {} = {} in {} cells", name, value, mask.count());
        }

        self.state = SessionState::ScalarOverrides;
        Ok(())
    }

    pub fn zero_nonveg(&mut self) -> Result<()> {
        self.check_order(SessionState::NonVegZeroed)?;
        let (dataset, mask) = self.parts()?;
        nonveg::zero_nonveg(dataset, mask)?;
        self.state = SessionState::NonVegZeroed;
        Ok(())
    }

    pub fn write(&mut self, fsurdat_out: &Path) -> Result<()> {
        self.check_order(SessionState::Written)?;
        let fsurdat_in = self.fsurdat_in.as_deref().ok_or_else(|| {
            ModifyError::Config("session was not loaded from a file".to_string())
        })?;
        FsurdatWriter::new().write(&self.dataset, fsurdat_in, fsurdat_out)?;
        self.state = SessionState::Written;
        Ok(())
    }
}

/// Run every stage the configuration asks for and write the result.
pub fn run(config: &ModifyConfig) -> Result<PathBuf> {
    config.validate()?;
    if config.fsurdat_out.exists() {
        return Err(ModifyError::OutputExists(config.fsurdat_out.clone()));
    }

    let mut session = ModificationSession::load(&config.fsurdat_in)?;

    // 編集前に引数を検証
    if let Some(dominant) = config.dom_nat_pft {
        vegetation::validate(session.dataset(), dominant, &config.traits)?;
    }
    let overrides = ScalarOverrides::from(config);
    for (name, value) in overrides.entries() {
        if value.is_some() {
            session.dataset().field(name)?;
        }
    }

    let landmask = match &config.landmask_file {
        Some(path) => Some(LandMask::open(path, session.lat_ascending()?)?),
        None => None,
    };
    session.compute_mask(&config.rectangle, landmask.as_ref())?;

    if config.idealized {
        session.apply_idealized()?;
    }
    if let Some(dominant) = config.dom_nat_pft {
        session.set_dominant(dominant, &config.traits)?;
    }
    if !overrides.is_empty() {
        session.apply_scalar_overrides(&overrides)?;
    }
    if config.zero_nonveg {
        session.zero_nonveg()?;
    }
    session.write(&config.fsurdat_out)?;

    Ok(config.fsurdat_out.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idealized::tests::surface_dataset;
    use crate::model::Field;
    use ndarray::{arr2, Dimension, IxDyn};

    /// Surface fixture on a grid with rows at -45 and 45 degrees.
    fn session() -> ModificationSession {
        let mut ds = surface_dataset();
        ds.insert(names::LATIXY, Field::grid(arr2(&[[-45.0, -45.0], [45.0, 45.0]])))
            .unwrap();
        ds.insert(names::LONGXY, Field::grid(arr2(&[[90.0, 270.0], [90.0, 270.0]])))
            .unwrap();
        ModificationSession::from_dataset(ds)
    }

    fn northern_half() -> Rectangle {
        Rectangle::new(0.0, 90.0, 0.0, 360.0).unwrap()
    }

    #[test]
    fn test_edits_require_mask() {
        let mut session = session();
        let err = session
            .set_dominant(1, &VegetationTraits::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ModifyError::OutOfOrder {
                requested: "dom_nat_pft",
                current: "load"
            }
        ));
        assert!(session.dataset().modified_fields().next().is_none());
        assert!(session.mask().is_none());
    }

    #[test]
    fn test_stages_cannot_be_reordered() {
        let mut session = session();
        session.compute_mask(&northern_half(), None).unwrap();
        session.zero_nonveg().unwrap();

        let err = session.apply_idealized().unwrap_err();
        assert!(matches!(err, ModifyError::OutOfOrder { .. }));
        let err = session.compute_mask(&northern_half(), None).unwrap_err();
        assert!(matches!(err, ModifyError::OutOfOrder { .. }));
        assert_eq!(session.state(), SessionState::NonVegZeroed);
    }

    #[test]
    fn test_full_sequence_on_northern_half() {
        let mut session = session();
        let mask = session.compute_mask(&northern_half(), None).unwrap();
        assert_eq!(mask.mask.count(), 2);

        session.apply_idealized().unwrap();
        // マスクは以降の段階でも保持される
        let kept = session.mask().unwrap();
        assert_eq!(kept.mask.count(), 2);
        assert_eq!(kept.not_mask.count(), 2);
        let traits = VegetationTraits {
            lai: Some(vec![1.0; 12]),
            ..Default::default()
        };
        session.set_dominant(1, &traits).unwrap();
        session
            .apply_scalar_overrides(&ScalarOverrides {
                std_elev: Some(25.0),
                soil_color: Some(3),
                ..Default::default()
            })
            .unwrap();
        session.zero_nonveg().unwrap();

        let ds = session.into_dataset();
        let at = |name: &str, idx: &[usize]| ds.field(name).unwrap().values[IxDyn(idx)];
        assert_eq!(at(names::PCT_NAT_PFT, &[1, 1, 0]), 100.0);
        assert_eq!(at(names::PCT_NAT_PFT, &[0, 1, 1]), 0.0);
        assert_eq!(at(names::MONTHLY_LAI, &[11, 1, 1, 1]), 1.0);
        assert_eq!(at(names::STD_ELEV, &[1, 0]), 25.0);
        assert_eq!(at(names::SOIL_COLOR, &[1, 1]), 3.0);
        assert_eq!(at(names::FMAX, &[1, 0]), 0.0);
        assert_eq!(at(names::PCT_NATVEG, &[1, 1]), 100.0);

        // 南半分は変更なし
        let original = surface_dataset();
        for name in original.names() {
            let before = &original.field(name).unwrap().values;
            let after = &ds.field(name).unwrap().values;
            for (idx, value) in before.indexed_iter() {
                if idx[idx.ndim() - 2] == 0 {
                    assert_eq!(after[idx.clone()], *value, "{name} {idx:?}");
                }
            }
        }
    }

    #[test]
    fn test_scalar_override_missing_field_aborts_before_mutation() {
        let mut session = session();
        session.compute_mask(&northern_half(), None).unwrap();
        session.dataset.remove(names::SOIL_COLOR);

        let err = session
            .apply_scalar_overrides(&ScalarOverrides {
                std_elev: Some(1.0),
                soil_color: Some(3),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ModifyError::MissingField(_)));
        assert!(!session.dataset().is_modified(names::STD_ELEV));
        assert_eq!(session.state(), SessionState::MaskComputed);
    }

    #[test]
    fn test_in_memory_session_cannot_write() {
        let mut session = session();
        session.compute_mask(&Rectangle::GLOBAL, None).unwrap();
        let err = session.write(Path::new("/nonexistent/out.nc")).unwrap_err();
        assert!(matches!(err, ModifyError::Config(_)));
    }
}
