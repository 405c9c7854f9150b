// loader.rs - 异步贴图加载 (后台线程解码 + 通道回传)

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use image::io::Reader as ImageReader;
use image::RgbaImage;
use log::debug;

use crate::error::FetchError;
use crate::tiles::Resolution;

/// One image to fetch for one segment of one panorama.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub panorama: String,
    pub segment: usize,
    pub resolution: Resolution,
    pub location: PathBuf,
}

impl FetchRequest {
    /// `base` is used as a plain prefix: `"img/1/"` + `"3_small.jpg"`.
    pub fn new(panorama: &str, base: &str, segment: usize, resolution: Resolution) -> Self {
        Self {
            panorama: panorama.to_string(),
            segment,
            resolution,
            location: PathBuf::from(format!("{}{}", base, resolution.file_name(segment))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub request: FetchRequest,
    pub result: Result<Arc<RgbaImage>, FetchError>,
}

/// Handle to an in-flight request. Cancelling makes the worker report
/// [`FetchError::Cancelled`] instead of the decoded image.
#[derive(Debug, Clone)]
pub struct FetchHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl FetchHandle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Source of segment images. Completions are collected by the owner and
/// applied on the main thread between frames.
pub trait ImageFetcher {
    fn fetch(&mut self, request: FetchRequest) -> FetchHandle;

    /// Outcomes that arrived since the last call, in arrival order.
    fn poll_completed(&mut self) -> Vec<FetchOutcome>;
}

/// Decodes every request on its own background thread.
pub struct ThreadedFetcher {
    tx: Sender<FetchOutcome>,
    rx: Receiver<FetchOutcome>,
    next_id: u64,
}

impl ThreadedFetcher {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self { tx, rx, next_id: 0 }
    }
}

impl Default for ThreadedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageFetcher for ThreadedFetcher {
    fn fetch(&mut self, request: FetchRequest) -> FetchHandle {
        self.next_id += 1;
        let handle = FetchHandle::new(self.next_id);
        let worker_handle = handle.clone();
        let tx = self.tx.clone();

        thread::spawn(move || {
            let result = if worker_handle.is_cancelled() {
                Err(FetchError::Cancelled)
            } else {
                decode_rgba(&request.location)
            };
            // 解码期间被取消的请求同样不回传图像
            let result = match result {
                Ok(_) if worker_handle.is_cancelled() => Err(FetchError::Cancelled),
                other => other,
            };
            if tx.send(FetchOutcome { request, result }).is_err() {
                debug!("fetch outcome dropped: receiver is gone");
            }
        });

        handle
    }

    fn poll_completed(&mut self) -> Vec<FetchOutcome> {
        let mut out = Vec::new();
        while let Ok(outcome) = self.rx.try_recv() {
            out.push(outcome);
        }
        out
    }
}

fn decode_rgba(path: &Path) -> Result<Arc<RgbaImage>, FetchError> {
    let file = File::open(path).map_err(|e| FetchError::Open {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let reader = BufReader::new(file);

    let img = ImageReader::new(reader)
        .with_guessed_format()
        .map_err(image::ImageError::IoError)
        .and_then(|mut r| {
            r.no_limits();
            r.decode()
        })
        .map_err(|e| FetchError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(Arc::new(img.to_rgba8()))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Records requests; tests push outcomes by hand.
    #[derive(Default)]
    pub struct RecordingFetcher {
        pub requests: Vec<FetchRequest>,
        pub handles: Vec<FetchHandle>,
        pub pending: VecDeque<FetchOutcome>,
    }

    impl RecordingFetcher {
        pub fn count(&self, resolution: Resolution) -> usize {
            self.requests
                .iter()
                .filter(|r| r.resolution == resolution)
                .count()
        }
    }

    impl ImageFetcher for RecordingFetcher {
        fn fetch(&mut self, request: FetchRequest) -> FetchHandle {
            let handle = FetchHandle::new(self.requests.len() as u64 + 1);
            self.requests.push(request);
            self.handles.push(handle.clone());
            handle
        }

        fn poll_completed(&mut self) -> Vec<FetchOutcome> {
            self.pending.drain(..).collect()
        }
    }

    pub fn tiny_image() -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(2, 1, image::Rgba([10, 20, 30, 255])))
    }

    pub fn ok(panorama: &str, segment: usize, resolution: Resolution) -> FetchOutcome {
        FetchOutcome {
            request: FetchRequest::new(panorama, "img/", segment, resolution),
            result: Ok(tiny_image()),
        }
    }
}
