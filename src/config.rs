// config.rs - 全景列表与视图参数
//
// 查找顺序:
// - CLI: --config <path>
// - Env: PANORAMA_CONFIG
// - <exe_dir>/assets/panoramas.json, ./assets/panoramas.json
// - 内置默认值 (两个全景)

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::input::ControlMode;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PanoramaEntry {
    pub name: String,
    /// Prefix the segment file names are appended to.
    pub path: String,
}

impl PanoramaEntry {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    pub min: f32,
    pub max: f32,
    pub initial: f32,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            min: 0.2,
            max: 3.0,
            initial: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub panoramas: Vec<PanoramaEntry>,
    pub zoom: ZoomConfig,
    pub preview_timeout_secs: f32,
    pub control_mode: ControlMode,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            panoramas: vec![
                PanoramaEntry::new("sphere1", "public/images/1/"),
                PanoramaEntry::new("sphere2", "public/images/0/"),
            ],
            zoom: ZoomConfig::default(),
            preview_timeout_secs: 20.0,
            control_mode: ControlMode::Drag,
        }
    }
}

impl ViewerConfig {
    pub fn from_json(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let cfg: ViewerConfig = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.panoramas.is_empty() {
            return Err(ConfigError::NoPanoramas);
        }
        for (i, entry) in self.panoramas.iter().enumerate() {
            if self.panoramas[..i].iter().any(|e| e.name == entry.name) {
                return Err(ConfigError::DuplicateName(entry.name.clone()));
            }
        }

        let z = self.zoom;
        if !(z.min > 0.0 && z.min <= z.initial && z.initial <= z.max) {
            return Err(ConfigError::ZoomRange {
                min: z.min,
                initial: z.initial,
                max: z.max,
            });
        }
        if !(self.preview_timeout_secs > 0.0 && self.preview_timeout_secs.is_finite()) {
            return Err(ConfigError::Timeout(self.preview_timeout_secs));
        }
        Ok(())
    }

    pub fn preview_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.preview_timeout_secs)
    }

    /// Finds and loads the config; any failure falls back to the defaults.
    pub fn resolve(cli_path: Option<PathBuf>) -> Self {
        let Some(path) = cli_path.or_else(find_config_file) else {
            info!("no panorama config found, using built-in defaults");
            return Self::default();
        };

        match Self::load(&path) {
            Ok(cfg) => {
                info!("loaded panorama config from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("{}; using built-in defaults", e);
                Self::default()
            }
        }
    }
}

/// `--config <path>` from the command line, then `PANORAMA_CONFIG`.
pub fn config_path_from_args() -> Option<PathBuf> {
    let mut it = std::env::args();
    while let Some(a) = it.next() {
        if a == "--config" {
            if let Some(v) = it.next() {
                return Some(PathBuf::from(v));
            }
        }
    }

    match std::env::var("PANORAMA_CONFIG") {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v)),
        _ => None,
    }
}

fn find_config_file() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let p = dir.join("assets").join("panoramas.json");
            if p.exists() {
                return Some(p);
            }
        }
    }

    let p = PathBuf::from("assets").join("panoramas.json");
    p.exists().then_some(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ViewerConfig, ConfigError> {
        ViewerConfig::from_json(text, Path::new("test.json"))
    }

    #[test]
    fn empty_object_gives_defaults() {
        let cfg = parse("{}").unwrap();
        assert_eq!(cfg, ViewerConfig::default());
        assert_eq!(cfg.panoramas[0].name, "sphere1");
        assert_eq!(cfg.preview_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn partial_zoom_keeps_other_defaults() {
        let cfg = parse(
            r#"{
                "panoramas": [{ "name": "hall", "path": "img/hall/" }],
                "zoom": { "max": 2.0 },
                "control_mode": "follow"
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.panoramas, vec![PanoramaEntry::new("hall", "img/hall/")]);
        assert_eq!(cfg.zoom.min, 0.2);
        assert_eq!(cfg.zoom.max, 2.0);
        assert_eq!(cfg.control_mode, ControlMode::Follow);
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = parse(
            r#"{ "panoramas": [
                { "name": "a", "path": "x/" },
                { "name": "a", "path": "y/" }
            ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(n) if n == "a"));
    }

    #[test]
    fn rejects_bad_zoom_and_timeout() {
        assert!(matches!(
            parse(r#"{ "zoom": { "min": 1.0, "initial": 0.5 } }"#),
            Err(ConfigError::ZoomRange { .. })
        ));
        assert!(matches!(
            parse(r#"{ "preview_timeout_secs": 0 }"#),
            Err(ConfigError::Timeout(_))
        ));
        assert!(matches!(parse(r#"{ "panoramas": [] }"#), Err(ConfigError::NoPanoramas)));
        assert!(matches!(parse("not json"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ViewerConfig::resolve(Some(PathBuf::from("/no/such/panoramas.json")));
        assert_eq!(cfg, ViewerConfig::default());
    }
}
