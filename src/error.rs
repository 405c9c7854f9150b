// error.rs - 错误类型

use std::path::PathBuf;

use thiserror::Error;

use crate::tiles::Resolution;

/// Errors reported by the panorama core. All of them are recoverable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ViewerError {
    #[error("unknown panorama '{0}'")]
    UnknownPanorama(String),

    #[error("panorama '{panorama}' segment {segment} ({phase:?}) failed to load: {reason}")]
    AssetLoad {
        panorama: String,
        segment: usize,
        phase: Resolution,
        reason: FetchError,
    },

    #[error("panorama '{panorama}' segment {segment} reported completion twice")]
    DuplicateCompletion { panorama: String, segment: usize },

    #[error("panorama '{panorama}' has no segment {segment}")]
    SegmentOutOfRange { panorama: String, segment: usize },
}

/// Why a single image fetch did not produce a texture.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("cannot open {path}: {message}")]
    Open { path: PathBuf, message: String },

    #[error("cannot decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("request was cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config lists no panoramas")]
    NoPanoramas,

    #[error("panorama name '{0}' is used more than once")]
    DuplicateName(String),

    #[error("zoom range is invalid: min {min}, initial {initial}, max {max}")]
    ZoomRange { min: f32, initial: f32, max: f32 },

    #[error("preview timeout must be positive, got {0}")]
    Timeout(f32),
}
