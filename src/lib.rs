// lib.rs - 分段全景查看器核心 (与窗口/GPU 无关, 可单独测试)

pub mod camera;
pub mod config;
pub mod error;
pub mod i18n;
pub mod input;
pub mod loader;
pub mod mesh;
pub mod navigation;
pub mod panorama;
pub mod switcher;
pub mod tiles;

pub use config::{PanoramaEntry, ViewerConfig};
pub use error::{ConfigError, FetchError, ViewerError};
pub use loader::{FetchHandle, FetchOutcome, FetchRequest, ImageFetcher, ThreadedFetcher};
pub use navigation::{NavigationLoop, Viewer};
pub use panorama::Panorama;
pub use switcher::{Activation, PanoramaSwitcher};
