use std::path::Path;

use anyhow::Context;
use ndarray::{ArrayD, IxDyn};
use tracing::{debug, info};

use netcdf::types::{FloatType, IntType, NcVariableType};

use crate::error::Result;
use crate::model::{Dataset, Field, LAT_DIM, LON_DIM};

fn widen<T: Into<f64>>(values: Vec<T>) -> Vec<f64> {
    values.into_iter().map(Into::into).collect()
}

/// Values of a numeric variable in its stored type, widened to `f64`.
/// `None` for char, string and user-defined types.
pub(crate) fn read_values(var: &netcdf::Variable) -> netcdf::Result<Option<Vec<f64>>> {
    let values = match var.vartype() {
        NcVariableType::Float(FloatType::F64) => var.get_values::<f64, _>(..)?,
        NcVariableType::Float(FloatType::F32) => widen(var.get_values::<f32, _>(..)?),
        NcVariableType::Int(IntType::I32) => widen(var.get_values::<i32, _>(..)?),
        NcVariableType::Int(IntType::U32) => widen(var.get_values::<u32, _>(..)?),
        NcVariableType::Int(IntType::I16) => widen(var.get_values::<i16, _>(..)?),
        NcVariableType::Int(IntType::U16) => widen(var.get_values::<u16, _>(..)?),
        NcVariableType::Int(IntType::I8) => widen(var.get_values::<i8, _>(..)?),
        NcVariableType::Int(IntType::U8) => widen(var.get_values::<u8, _>(..)?),
        _ => return Ok(None),
    };
    Ok(Some(values))
}

/// Load every gridded variable of an fsurdat file.
///
/// Variables whose last two dimensions are `(lsmlat, lsmlon)` are read as
/// `f64`; everything else stays on disk and is carried over by the writer
/// untouched.
pub fn read_fsurdat(path: &Path) -> Result<Dataset> {
    let file = netcdf::open(path)
        .with_context(|| format!("Failed to open fsurdat file: {}", path.display()))?;

    // 格子サイズを取得
    let rows = file
        .dimension(LAT_DIM)
        .map(|d| d.len())
        .with_context(|| format!("No '{LAT_DIM}' dimension in {}", path.display()))?;
    let cols = file
        .dimension(LON_DIM)
        .map(|d| d.len())
        .with_context(|| format!("No '{LON_DIM}' dimension in {}", path.display()))?;

    let mut dataset = Dataset::new(rows, cols);
    for dim in file.dimensions() {
        dataset.set_dimension(&dim.name(), dim.len());
    }

    for var in file.variables() {
        let name = var.name();
        let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        let n = dims.len();
        if n < 2 || dims[n - 2] != LAT_DIM || dims[n - 1] != LON_DIM {
            continue;
        }
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();

        // 数値以外の変数は読み込まない
        let Some(values) = read_values(&var)
            .with_context(|| format!("Failed to read variable {name}"))?
        else {
            debug!("Skipping non-numeric variable {}", name);
            continue;
        };
        let values = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .with_context(|| format!("Variable {name} does not match its dimensions"))?;
        dataset.insert(&name, Field::new(dims, values))?;
    }

    info!(
        "Read {} gridded fields ({} x {}) from {:?}",
        dataset.names().count(),
        rows,
        cols,
        path
    );
    Ok(dataset)
}
