//! Typed run configuration and the `.cfg` reader.
//!
//! The file is INI-style: the first `[section]` holds `key = value` lines,
//! `#` and `;` start comments. `UNSET` or an empty value leaves an optional
//! key absent, except for the trait lists where an empty value is an
//! explicit "all zero" request.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::error::{ModifyError, Result};
use crate::mask::Rectangle;
use crate::vegetation::{VegetationTraits, MAX_NAT_PFT};

const KNOWN_KEYS: [&str; 17] = [
    "fsurdat_in",
    "fsurdat_out",
    "idealized",
    "zero_nonveg",
    "lnd_lat_1",
    "lnd_lat_2",
    "lnd_lon_1",
    "lnd_lon_2",
    "landmask_file",
    "dom_nat_pft",
    "lai",
    "sai",
    "hgt_top",
    "hgt_bot",
    "soil_color",
    "std_elev",
    "max_sat_area",
];

/// Valid soil color classes.
pub const SOIL_COLOR_RANGE: std::ops::RangeInclusive<u8> = 1..=20;

/// Everything one modification run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyConfig {
    pub fsurdat_in: PathBuf,
    pub fsurdat_out: PathBuf,
    pub idealized: bool,
    pub zero_nonveg: bool,
    pub rectangle: Rectangle,
    pub landmask_file: Option<PathBuf>,
    pub dom_nat_pft: Option<usize>,
    pub traits: VegetationTraits,
    pub soil_color: Option<u8>,
    pub std_elev: Option<f64>,
    pub max_sat_area: Option<f64>,
}

impl ModifyConfig {
    /// Global rectangle, no edits.
    pub fn new(fsurdat_in: impl Into<PathBuf>, fsurdat_out: impl Into<PathBuf>) -> Self {
        Self {
            fsurdat_in: fsurdat_in.into(),
            fsurdat_out: fsurdat_out.into(),
            idealized: false,
            zero_nonveg: false,
            rectangle: Rectangle::GLOBAL,
            landmask_file: None,
            dom_nat_pft: None,
            traits: VegetationTraits::default(),
            soil_color: None,
            std_elev: None,
            max_sat_area: None,
        }
    }

    pub fn from_cfg_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_cfg_str(&text)?;
        debug!("Loaded config from {:?}: {:?}", path, config);
        Ok(config)
    }

    pub fn from_cfg_str(text: &str) -> Result<Self> {
        let section = first_section(text)?;
        for key in section.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                return Err(ModifyError::Config(format!("unknown key '{key}'")));
            }
        }
        let lookup = |key: &str| section.get(key).map(String::as_str);

        let fsurdat_in = required_path(lookup("fsurdat_in"), "fsurdat_in")?;
        let fsurdat_out = required_path(lookup("fsurdat_out"), "fsurdat_out")?;

        let rectangle = Rectangle {
            lat_1: parse_f64(lookup("lnd_lat_1"), "lnd_lat_1")?.unwrap_or(-90.0),
            lat_2: parse_f64(lookup("lnd_lat_2"), "lnd_lat_2")?.unwrap_or(90.0),
            lon_1: parse_f64(lookup("lnd_lon_1"), "lnd_lon_1")?.unwrap_or(0.0),
            lon_2: parse_f64(lookup("lnd_lon_2"), "lnd_lon_2")?.unwrap_or(360.0),
        };

        let dom_nat_pft = match optional(lookup("dom_nat_pft")) {
            Some(raw) => Some(parse_number::<usize>(raw, "dom_nat_pft")?),
            None => None,
        };
        let soil_color = match optional(lookup("soil_color")) {
            Some(raw) => Some(parse_number::<u8>(raw, "soil_color")?),
            None => None,
        };

        let config = Self {
            fsurdat_in,
            fsurdat_out,
            idealized: parse_bool(lookup("idealized"), "idealized")?.unwrap_or(false),
            zero_nonveg: parse_bool(lookup("zero_nonveg"), "zero_nonveg")?.unwrap_or(false),
            rectangle,
            landmask_file: optional(lookup("landmask_file")).map(PathBuf::from),
            dom_nat_pft,
            traits: VegetationTraits {
                lai: parse_list(lookup("lai"), "lai")?,
                sai: parse_list(lookup("sai"), "sai")?,
                hgt_top: parse_list(lookup("hgt_top"), "hgt_top")?,
                hgt_bot: parse_list(lookup("hgt_bot"), "hgt_bot")?,
            },
            soil_color,
            std_elev: parse_f64(lookup("std_elev"), "std_elev")?,
            max_sat_area: parse_f64(lookup("max_sat_area"), "max_sat_area")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Range and consistency checks; nothing here looks at the dataset.
    pub fn validate(&self) -> Result<()> {
        if self.fsurdat_in == self.fsurdat_out {
            return Err(ModifyError::Config(format!(
                "fsurdat_out must differ from fsurdat_in ({})",
                self.fsurdat_in.display()
            )));
        }
        self.rectangle.validate()?;
        if let Some(pft) = self.dom_nat_pft {
            if pft > MAX_NAT_PFT {
                return Err(ModifyError::Config(format!(
                    "dom_nat_pft = {pft} must be in the range 0 to {MAX_NAT_PFT}"
                )));
            }
        } else if !self.traits.is_unset() {
            return Err(ModifyError::Config(
                "lai, sai, hgt_top and hgt_bot require dom_nat_pft".to_string(),
            ));
        }
        if let Some(color) = self.soil_color {
            if !SOIL_COLOR_RANGE.contains(&color) {
                return Err(ModifyError::Config(format!(
                    "soil_color = {color} must be in the range {} to {}",
                    SOIL_COLOR_RANGE.start(),
                    SOIL_COLOR_RANGE.end()
                )));
            }
        }
        for (key, value) in [("std_elev", self.std_elev), ("max_sat_area", self.max_sat_area)] {
            if matches!(value, Some(v) if !v.is_finite()) {
                return Err(ModifyError::Config(format!("{key} must be a finite number")));
            }
        }
        Ok(())
    }
}

/// Key/value pairs of the first section. Lines before any header are an
/// error, later sections are ignored.
fn first_section(text: &str) -> Result<BTreeMap<String, String>> {
    let mut entries = BTreeMap::new();
    let mut in_first = false;
    let mut seen_header = false;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            in_first = !seen_header;
            seen_header = true;
            continue;
        }
        if !seen_header {
            return Err(ModifyError::Config(format!(
                "line {}: key outside of a [section]",
                lineno + 1
            )));
        }
        if !in_first {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .or_else(|| line.split_once(':'))
            .ok_or_else(|| {
                ModifyError::Config(format!("line {}: expected 'key = value'", lineno + 1))
            })?;
        let key = key.trim().to_lowercase();
        if entries.insert(key.clone(), value.trim().to_string()).is_some() {
            return Err(ModifyError::Config(format!("duplicate key '{key}'")));
        }
    }

    if !seen_header {
        return Err(ModifyError::Config("no [section] found".to_string()));
    }
    Ok(entries)
}

fn is_unset(raw: &str) -> bool {
    raw.is_empty() || raw.eq_ignore_ascii_case("unset")
}

fn optional(raw: Option<&str>) -> Option<&str> {
    raw.filter(|v| !is_unset(v))
}

fn required_path(raw: Option<&str>, key: &str) -> Result<PathBuf> {
    optional(raw)
        .map(PathBuf::from)
        .ok_or_else(|| ModifyError::Config(format!("missing required key '{key}'")))
}

fn parse_number<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| ModifyError::Config(format!("{key} = '{raw}' is not a valid value")))
}

fn parse_f64(raw: Option<&str>, key: &str) -> Result<Option<f64>> {
    optional(raw).map(|v| parse_number::<f64>(v, key)).transpose()
}

fn parse_bool(raw: Option<&str>, key: &str) -> Result<Option<bool>> {
    let Some(raw) = optional(raw) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(Some(true)),
        "false" | "no" | "off" | "0" => Ok(Some(false)),
        _ => Err(ModifyError::Config(format!(
            "{key} = '{raw}' is not a boolean"
        ))),
    }
}

/// `None` when the key is missing or `UNSET`; an empty value is `Some(vec![])`.
fn parse_list(raw: Option<&str>, key: &str) -> Result<Option<Vec<f64>>> {
    match raw {
        None => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("unset") => Ok(None),
        Some(v) => v
            .split_whitespace()
            .map(|item| parse_number::<f64>(item, key))
            .collect::<Result<Vec<_>>>()
            .map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = "\
[modify_input]
fsurdat_in = in.nc
fsurdat_out = out.nc
";

    #[test]
    fn test_minimal_config_uses_fallbacks() {
        let config = ModifyConfig::from_cfg_str(MINIMAL).unwrap();
        assert_eq!(config, ModifyConfig::new("in.nc", "out.nc"));
        assert!(config.rectangle.is_global());
    }

    #[test]
    fn test_full_config() {
        let text = "\
# comment
[modify_input]
fsurdat_in = /data/in.nc
fsurdat_out = /data/out.nc
idealized = True
zero_nonveg = no
lnd_lat_1 = 0
lnd_lat_2 = 90
lnd_lon_1 = 350
lnd_lon_2 = 10
landmask_file = UNSET
dom_nat_pft = 1
lai = 1 1 1 1 1 1 1 1 1 1 1 1
sai =
hgt_top = UNSET
soil_color = 15
std_elev = 0.5 ; trailing text is not a comment
max_sat_area = UNSET
";
        let err = ModifyConfig::from_cfg_str(text).unwrap_err();
        assert!(matches!(err, ModifyError::Config(msg) if msg.contains("std_elev")));

        let text = text.replace(" ; trailing text is not a comment", "");
        let config = ModifyConfig::from_cfg_str(&text).unwrap();
        assert!(config.idealized);
        assert!(!config.zero_nonveg);
        assert_eq!(config.rectangle.lon_1, 350.0);
        assert_eq!(config.landmask_file, None);
        assert_eq!(config.dom_nat_pft, Some(1));
        assert_eq!(config.traits.lai, Some(vec![1.0; 12]));
        assert_eq!(config.traits.sai, Some(vec![]));
        assert_eq!(config.traits.hgt_top, None);
        assert_eq!(config.traits.hgt_bot, None);
        assert_eq!(config.soil_color, Some(15));
        assert_eq!(config.std_elev, Some(0.5));
        assert_eq!(config.max_sat_area, None);
    }

    #[test]
    fn test_only_first_section_is_read() {
        let text = format!("{MINIMAL}\n[other]\nidealized = maybe\n");
        let config = ModifyConfig::from_cfg_str(&text).unwrap();
        assert!(!config.idealized);
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            ("fsurdat_out = in.nc", "differ"),
            ("dom_nat_pft = 15", "dom_nat_pft"),
            ("soil_color = 0", "soil_color"),
            ("soil_color = 21", "soil_color"),
            ("idealized = maybe", "idealized"),
            ("lnd_lat_1 = 50\nlnd_lat_2 = 10", "lnd_lat_1"),
            ("lnd_lat_2 = 95", "lnd_lat_2"),
            ("lnd_lon_1 = -200", "longitude"),
            ("lai = 1 2 x", "lai"),
            ("sai = 1 2", "dom_nat_pft"),
            ("colour = 3", "unknown key"),
        ];
        for (extra, needle) in cases {
            let text = if extra.starts_with("fsurdat_out") {
                MINIMAL.replace("fsurdat_out = out.nc", extra)
            } else {
                format!("{MINIMAL}{extra}\n")
            };
            let err = ModifyConfig::from_cfg_str(&text).unwrap_err();
            assert!(
                matches!(&err, ModifyError::Config(msg) if msg.contains(needle)),
                "{extra}: {err}"
            );
        }
    }

    #[test]
    fn test_missing_required_key() {
        let err = ModifyConfig::from_cfg_str("[modify_input]\nfsurdat_in = a.nc\n").unwrap_err();
        assert!(matches!(err, ModifyError::Config(msg) if msg.contains("fsurdat_out")));

        let err = ModifyConfig::from_cfg_str("fsurdat_in = a.nc\n").unwrap_err();
        assert!(matches!(err, ModifyError::Config(_)));
    }

    #[test]
    fn test_from_cfg_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = ModifyConfig::from_cfg_file(file.path()).unwrap();
        assert_eq!(config.fsurdat_in, PathBuf::from("in.nc"));

        let err = ModifyConfig::from_cfg_file(Path::new("/nonexistent/modify.cfg")).unwrap_err();
        assert!(matches!(err, ModifyError::Archive(_)));
    }
}
