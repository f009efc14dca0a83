use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while configuring, editing or writing an fsurdat dataset.
#[derive(Debug, Error)]
pub enum ModifyError {
    /// Missing or invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// A field the requested edit needs is not in the dataset.
    #[error("field '{0}' not found in dataset")]
    MissingField(String),

    /// The land-mask raster does not match the dataset grid.
    #[error("land mask grid is {found:?} (rows, cols) but dataset grid is {expected:?}")]
    GridMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// An overwrite value or mask is not shaped like the target field.
    #[error("rank mismatch on '{field}': {detail}")]
    RankMismatch { field: String, detail: String },

    /// A category-fraction field no longer sums to 100 after an edit.
    #[error("'{field}' sums to {sum} at cell ({row}, {col}), expected 100")]
    InvariantViolation {
        field: String,
        row: usize,
        col: usize,
        sum: f64,
    },

    /// A session stage was requested after a later stage already ran.
    #[error("cannot run '{requested}' after '{current}'")]
    OutOfOrder {
        requested: &'static str,
        current: &'static str,
    },

    /// The output archive already exists.
    #[error("output file already exists: {0}")]
    OutputExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error(transparent)]
    Archive(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ModifyError>;
