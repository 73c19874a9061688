// SPDX-License-Identifier: GPL-3.0-only

//! Config loader: hand-rolled line-oriented INI parser for `[device]`,
//! `[rear]`, `[front]` sections (component 4.H).
//!
//! No INI crate is in this codebase's dependency stack, so this is a
//! direct port of the handler semantics of the original Megapixels
//! `config_ini_handler`: unknown sections and unknown keys within a
//! known section both fail fast with a diagnostic naming the offending
//! section and key.

use std::path::{Path, PathBuf};

use crate::errors::ConfigError;
use crate::sensor::PixelFormat;

/// `[device]` section: global identity shared by both sensors.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub csi: String,
    pub make: String,
    pub model: String,
}

/// One `[rear]`/`[front]` section.
#[derive(Debug, Clone, Default)]
pub struct SensorInfo {
    pub driver: String,
    pub width: u32,
    pub height: u32,
    /// `frame_interval = 1 / rate`.
    pub rate: u32,
    pub pixel_format: Option<PixelFormat>,
    pub rotate: u32,
    pub color_matrix: Option<[f64; 9]>,
    pub forward_matrix: Option<[f64; 9]>,
    pub white_level: Option<u32>,
    pub black_level: Option<u32>,
    pub focal_length_mm: Option<f64>,
    pub crop_factor: Option<f64>,
    pub f_number: Option<f64>,
    pub iso_min: Option<u32>,
    pub iso_max: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub device: DeviceInfo,
    pub rear: SensorInfo,
    pub front: SensorInfo,
}

fn parse_decimal(value: &str) -> Option<f64> {
    // `LC_NUMERIC=C` is pinned at startup (see main.rs), so `.` is always
    // the decimal separator here; no locale-aware parsing is needed.
    value.trim().parse::<f64>().ok()
}

fn parse_int(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}

fn parse_nine_floats(value: &str) -> Option<[f64; 9]> {
    let mut out = [0.0f64; 9];
    let mut count = 0;
    for (i, part) in value.split(',').enumerate() {
        if i >= 9 {
            return None;
        }
        out[i] = parse_decimal(part)?;
        count += 1;
    }
    if count == 9 { Some(out) } else { None }
}

fn set_sensor_key(cc: &mut SensorInfo, section: &str, key: &str, value: &str) -> Result<(), ConfigError> {
    let malformed = || ConfigError::Malformed {
        section: section.to_string(),
        key: key.to_string(),
    };
    match key {
        "width" => cc.width = parse_int(value).ok_or_else(malformed)?,
        "height" => cc.height = parse_int(value).ok_or_else(malformed)?,
        "rate" => cc.rate = parse_int(value).ok_or_else(malformed)?,
        "rotate" => cc.rotate = parse_int(value).ok_or_else(malformed)?,
        "fmt" => {
            cc.pixel_format = Some(match value {
                "BGGR8" => PixelFormat::Bggr8,
                other => {
                    let bytes: [u8; 4] = other.as_bytes().try_into().map_err(|_| malformed())?;
                    PixelFormat::Other(u32::from_le_bytes(bytes))
                }
            });
        }
        "driver" => cc.driver = value.to_string(),
        "colormatrix" => cc.color_matrix = Some(parse_nine_floats(value).ok_or_else(malformed)?),
        "forwardmatrix" => {
            cc.forward_matrix = Some(parse_nine_floats(value).ok_or_else(malformed)?)
        }
        "whitelevel" => cc.white_level = Some(parse_int(value).ok_or_else(malformed)?),
        "blacklevel" => cc.black_level = Some(parse_int(value).ok_or_else(malformed)?),
        "focallength" => cc.focal_length_mm = Some(parse_decimal(value).ok_or_else(malformed)?),
        "cropfactor" => cc.crop_factor = Some(parse_decimal(value).ok_or_else(malformed)?),
        "fnumber" => cc.f_number = Some(parse_decimal(value).ok_or_else(malformed)?),
        "iso-min" => cc.iso_min = Some(parse_int(value).ok_or_else(malformed)?),
        "iso-max" => cc.iso_max = Some(parse_int(value).ok_or_else(malformed)?),
        _ => return Err(malformed()),
    }
    Ok(())
}

fn set_device_key(dev: &mut DeviceInfo, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "csi" => dev.csi = value.to_string(),
        "make" => dev.make = value.to_string(),
        "model" => dev.model = value.to_string(),
        _ => {
            return Err(ConfigError::Malformed {
                section: "device".to_string(),
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

/// Parses INI text into a [`Config`]. Lines starting with `;` or `#` are
/// comments; blank lines are ignored. Unknown sections or keys fail fast
/// (S6).
pub fn parse(text: &str) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    let mut section = String::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].trim().to_string();
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match section.as_str() {
            "rear" => set_sensor_key(&mut config.rear, "rear", key, value)?,
            "front" => set_sensor_key(&mut config.front, "front", key, value)?,
            "device" => set_device_key(&mut config.device, key, value)?,
            other => {
                return Err(ConfigError::Malformed {
                    section: other.to_string(),
                    key: key.to_string(),
                });
            }
        }
    }

    Ok(config)
}

/// Reads and parses the config file at `path`.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| ConfigError::NotFound(path.to_path_buf()))?;
    parse(&text)
}

/// Reads the device-tree compatible string's first entry from
/// `/proc/device-tree/compatible` (a NUL-separated list).
pub fn device_tree_compatible() -> Option<String> {
    let bytes = std::fs::read("/proc/device-tree/compatible").ok()?;
    let first = bytes.split(|&b| b == 0).next()?;
    if first.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(first).to_string())
}

/// Configuration discovery order (§6): cwd, `$XDG_CONFIG_HOME`,
/// `<sysconfdir>`, `<datadir>`, then the single fallback
/// `/etc/megapixels.ini`.
pub fn discover_config_path(dt_compatible: &str, sysconfdir: &Path, datadir: &Path) -> Option<PathBuf> {
    let filename = format!("{dt_compatible}.ini");

    let cwd_candidate = Path::new("config").join(&filename);
    if cwd_candidate.is_file() {
        return Some(cwd_candidate);
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        let candidate = Path::new(&xdg).join("megapixels/config").join(&filename);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let sysconf_candidate = sysconfdir.join("megapixels/config").join(&filename);
    if sysconf_candidate.is_file() {
        return Some(sysconf_candidate);
    }

    let datadir_candidate = datadir.join("megapixels/config").join(&filename);
    if datadir_candidate.is_file() {
        return Some(datadir_candidate);
    }

    let fallback = PathBuf::from("/etc/megapixels.ini");
    if fallback.is_file() {
        return Some(fallback);
    }

    None
}

/// Post-processor script discovery order (§6): cwd, then
/// `$XDG_CONFIG_HOME/megapixels/`, `<sysconfdir>/megapixels/`,
/// `<datadir>/megapixels/`.
pub fn discover_postprocessor_path(sysconfdir: &Path, datadir: &Path) -> Option<PathBuf> {
    let cwd_candidate = Path::new("postprocess.sh");
    if cwd_candidate.is_file() {
        return Some(cwd_candidate.to_path_buf());
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        let candidate = Path::new(&xdg).join("megapixels/postprocess.sh");
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let sysconf_candidate = sysconfdir.join("megapixels/postprocess.sh");
    if sysconf_candidate.is_file() {
        return Some(sysconf_candidate);
    }

    let datadir_candidate = datadir.join("megapixels/postprocess.sh");
    if datadir_candidate.is_file() {
        return Some(datadir_candidate);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    // Property 7: parsing then re-reading the same fields yields
    // semantically equal SensorInfo/DeviceInfo.
    #[test]
    fn config_round_trip() {
        let ini = "\
[device]
csi=sun6i-csi
make=PINE64
model=PinePhone

[rear]
driver=ov5640
width=1920
height=1080
rate=30
rotate=90
colormatrix=1,2,3,4,5,6,7,8,9

[front]
driver=gc2145
width=1600
height=1200
rate=30
";
        let config = parse(ini).unwrap();
        assert_eq!(config.device.csi, "sun6i-csi");
        assert_eq!(config.device.make, "PINE64");
        assert_eq!(config.rear.driver, "ov5640");
        assert_eq!(config.rear.width, 1920);
        assert_eq!(config.rear.rotate, 90);
        assert_eq!(
            config.rear.color_matrix,
            Some([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0])
        );
        assert_eq!(config.front.driver, "gc2145");
    }

    // S6: unknown key in [rear] fails fast naming the section and key.
    #[test]
    fn s6_unknown_key_fails_with_diagnostic() {
        let ini = "[rear]\ngamma=2.2\n";
        let err = parse(ini).unwrap_err();
        match err {
            ConfigError::Malformed { section, key } => {
                assert_eq!(section, "rear");
                assert_eq!(key, "gamma");
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn unknown_section_fails() {
        let ini = "[bogus]\nkey=1\n";
        let err = parse(ini).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn decimal_parsing_uses_dot_separator() {
        assert_eq!(parse_decimal("1.5"), Some(1.5));
        assert_eq!(parse_decimal("not-a-number"), None);
    }

    #[test]
    fn postprocessor_discovery_finds_nothing_without_candidates() {
        // SAFETY: test-only env mutation, single-threaded within this test.
        unsafe {
            std::env::remove_var("XDG_CONFIG_HOME");
        }
        let result = discover_postprocessor_path(
            Path::new("/nonexistent/etc"),
            Path::new("/nonexistent/share"),
        );
        assert!(result.is_none());
    }
}
