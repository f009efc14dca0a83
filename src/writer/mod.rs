use anyhow::{bail, Context, Result as AnyResult};
use netcdf::types::{FloatType, IntType, NcVariableType};
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ModifyError, Result};
use crate::model::Dataset;

/// Write `values` back in the variable's stored type. Integer fields are
/// rounded to the nearest value.
fn put_native(var: &mut netcdf::VariableMut, values: &[f64]) -> AnyResult<()> {
    macro_rules! narrow {
        ($t:ty, $conv:expr) => {{
            let converted: Vec<$t> = values.iter().map($conv).collect();
            var.put_values(&converted, ..)?
        }};
    }
    match var.vartype() {
        NcVariableType::Float(FloatType::F64) => var.put_values(values, ..)?,
        NcVariableType::Float(FloatType::F32) => narrow!(f32, |&v| v as f32),
        NcVariableType::Int(IntType::I32) => narrow!(i32, |&v| v.round() as i32),
        NcVariableType::Int(IntType::U32) => narrow!(u32, |&v| v.round() as u32),
        NcVariableType::Int(IntType::I16) => narrow!(i16, |&v| v.round() as i16),
        NcVariableType::Int(IntType::U16) => narrow!(u16, |&v| v.round() as u16),
        NcVariableType::Int(IntType::I8) => narrow!(i8, |&v| v.round() as i8),
        NcVariableType::Int(IntType::U8) => narrow!(u8, |&v| v.round() as u8),
        other => bail!("unsupported variable type {other:?}"),
    }
    Ok(())
}

/// Copy a variable's values unchanged, in its stored type.
fn copy_native(src: &netcdf::Variable, dst: &mut netcdf::VariableMut) -> AnyResult<()> {
    macro_rules! copy {
        ($t:ty) => {{
            let values = src.get_values::<$t, _>(..)?;
            dst.put_values(&values, ..)?
        }};
    }
    match src.vartype() {
        NcVariableType::Float(FloatType::F64) => copy!(f64),
        NcVariableType::Float(FloatType::F32) => copy!(f32),
        NcVariableType::Int(IntType::I64) => copy!(i64),
        NcVariableType::Int(IntType::U64) => copy!(u64),
        NcVariableType::Int(IntType::I32) => copy!(i32),
        NcVariableType::Int(IntType::U32) => copy!(u32),
        NcVariableType::Int(IntType::I16) => copy!(i16),
        NcVariableType::Int(IntType::U16) => copy!(u16),
        NcVariableType::Int(IntType::I8) => copy!(i8),
        NcVariableType::Int(IntType::U8) => copy!(u8),
        other => bail!("unsupported variable type {other:?}"),
    }
    Ok(())
}

/// Define `name` in `out` with the same stored type as `src`.
fn define_like<'f>(
    out: &'f mut netcdf::FileMut,
    src: &netcdf::Variable,
    dims: &[&str],
) -> AnyResult<netcdf::VariableMut<'f>> {
    let name = src.name();
    let var = match src.vartype() {
        NcVariableType::Float(FloatType::F64) => out.add_variable::<f64>(&name, dims)?,
        NcVariableType::Float(FloatType::F32) => out.add_variable::<f32>(&name, dims)?,
        NcVariableType::Int(IntType::I64) => out.add_variable::<i64>(&name, dims)?,
        NcVariableType::Int(IntType::U64) => out.add_variable::<u64>(&name, dims)?,
        NcVariableType::Int(IntType::I32) => out.add_variable::<i32>(&name, dims)?,
        NcVariableType::Int(IntType::U32) => out.add_variable::<u32>(&name, dims)?,
        NcVariableType::Int(IntType::I16) => out.add_variable::<i16>(&name, dims)?,
        NcVariableType::Int(IntType::U16) => out.add_variable::<u16>(&name, dims)?,
        NcVariableType::Int(IntType::I8) => out.add_variable::<i8>(&name, dims)?,
        NcVariableType::Int(IntType::U8) => out.add_variable::<u8>(&name, dims)?,
        other => bail!("unsupported variable type {other:?}"),
    };
    Ok(var)
}

/// Creation options matching the on-disk format of an existing file.
///
/// Classic (`CDF\x01`), 64-bit offset (`CDF\x02`), 64-bit data (`CDF\x05`)
/// and HDF5-based netCDF-4 files are recognised by their magic bytes.
pub(crate) fn format_options(path: &Path) -> AnyResult<netcdf::Options> {
    let mut magic = [0u8; 4];
    fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .with_context(|| format!("Failed to read header of {}", path.display()))?;
    let options = match &magic {
        b"CDF\x01" => netcdf::Options::empty(),
        b"CDF\x02" => netcdf::Options::_64BIT_OFFSET,
        b"CDF\x05" => netcdf::Options::_64BIT_DATA,
        b"\x89HDF" => netcdf::Options::NETCDF4,
        _ => bail!("{} is not a netCDF file", path.display()),
    };
    Ok(options)
}

const TITLE: &str = "Modified fsurdat file";
const CONTACT: &str = "N/A";

/// Writes a modified dataset next to its source file.
///
/// The output is rebuilt in a temporary file in the output directory, in the
/// same netCDF format as the input: every dimension, attribute and variable
/// is defined first, then data is written, with the modified fields taken
/// from the dataset and everything else copied unchanged. The temporary file
/// is then moved to the final path. Nothing appears at the output path
/// unless every step succeeded.
#[derive(Default)]
pub struct FsurdatWriter {}

impl FsurdatWriter {
    pub fn new() -> Self {
        Self {}
    }

    pub fn write(&self, dataset: &Dataset, fsurdat_in: &Path, fsurdat_out: &Path) -> Result<()> {
        if fsurdat_out.exists() {
            return Err(ModifyError::OutputExists(fsurdat_out.to_path_buf()));
        }
        if fsurdat_in == fsurdat_out {
            return Err(ModifyError::Config(format!(
                "fsurdat_out must differ from fsurdat_in ({})",
                fsurdat_in.display()
            )));
        }

        // 出力先と同じディレクトリに一時ファイルを作成
        let dir = fsurdat_out
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(".fsurdat-")
            .suffix(".nc")
            .tempfile_in(dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;

        self.rebuild(dataset, fsurdat_in, tmp.path())?;

        // 既存ファイルは上書きしない
        tmp.persist_noclobber(fsurdat_out).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                ModifyError::OutputExists(fsurdat_out.to_path_buf())
            } else {
                ModifyError::Io(e.error)
            }
        })?;

        info!("Successfully created fsurdat_out: {:?}", fsurdat_out);
        Ok(())
    }

    fn rebuild(&self, dataset: &Dataset, fsurdat_in: &Path, path: &Path) -> AnyResult<()> {
        let src = netcdf::open(fsurdat_in)
            .with_context(|| format!("Failed to open {}", fsurdat_in.display()))?;
        let options = format_options(fsurdat_in)?;
        let option_bits = options.bits();
        let mut out = netcdf::create_with(path, options)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        debug!("Creating output with options {:?}", option_bits);

        // 次元の定義 (レコード次元は現在の長さで固定)
        for dim in src.dimensions() {
            out.add_dimension(&dim.name(), dim.len())
                .with_context(|| format!("Failed to define dimension {}", dim.name()))?;
        }

        // グローバル属性の定義
        let updated = self.global_attributes(&src, fsurdat_in);
        for attr in src.attributes() {
            let name = attr.name();
            if updated.iter().any(|(key, _)| *key == name) {
                continue;
            }
            let value = attr
                .value()
                .with_context(|| format!("Failed to read global attribute {name}"))?;
            out.add_attribute(name, value)
                .with_context(|| format!("Failed to copy global attribute {name}"))?;
        }
        for (key, value) in &updated {
            out.add_attribute(*key, value.as_str())
                .with_context(|| format!("Failed to set global attribute {key}"))?;
        }

        // 変数と変数属性の定義
        for var in src.variables() {
            let name = var.name();
            let dim_names: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
            let dims: Vec<&str> = dim_names.iter().map(String::as_str).collect();
            let mut new_var = define_like(&mut out, &var, &dims)
                .with_context(|| format!("Failed to define variable {name}"))?;
            for attr in var.attributes() {
                let attr_name = attr.name();
                let value = attr
                    .value()
                    .with_context(|| format!("Failed to read attribute {name}:{attr_name}"))?;
                new_var
                    .put_attribute(attr_name, value)
                    .with_context(|| format!("Failed to copy attribute {name}:{attr_name}"))?;
            }
        }

        // データの書き込み: 変更されたフィールドのみデータセットから
        let mut count = 0;
        for var in src.variables() {
            let name = var.name();
            let mut new_var = out
                .variable_mut(&name)
                .with_context(|| format!("Variable {name} not found in output file"))?;
            match dataset.get(&name).filter(|_| dataset.is_modified(&name)) {
                Some(field) => {
                    let values = field.values.as_standard_layout();
                    let slice = values
                        .as_slice()
                        .with_context(|| format!("Variable {name} is not contiguous"))?;
                    put_native(&mut new_var, slice)
                        .with_context(|| format!("Failed to write variable {name}"))?;
                    debug!("Wrote {} ({:?})", name, field.values.shape());
                    count += 1;
                }
                None => copy_native(&var, &mut new_var)
                    .with_context(|| format!("Failed to copy variable {name}"))?,
            }
        }

        info!("Rewrote {} modified fields", count);
        Ok(())
    }

    /// Global attributes stamped on every output.
    fn global_attributes(&self, src: &netcdf::File, fsurdat_in: &Path) -> Vec<(&'static str, String)> {
        let description = format!("Modified this file: {}", fsurdat_in.display());
        let data_script = format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let entry = format!("{data_script}: {description}");

        // 既存の履歴に追記
        let history = match src.attribute("history").map(|a| a.value()) {
            Some(Ok(netcdf::AttributeValue::Str(previous))) if !previous.is_empty() => {
                format!("{previous}\n{entry}")
            }
            _ => entry,
        };

        vec![
            ("title", TITLE.to_string()),
            ("summary", TITLE.to_string()),
            ("contact", CONTACT.to_string()),
            ("data_script", data_script),
            ("description", description),
            ("history", history),
        ]
    }
}
