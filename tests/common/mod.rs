// Shared helpers for the integration tests: a fetcher that never touches
// the filesystem and hands back whatever the test queues.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use image::RgbaImage;
use tiled_panorama::tiles::Resolution;
use tiled_panorama::{FetchError, FetchHandle, FetchOutcome, FetchRequest, ImageFetcher};

#[derive(Default)]
pub struct ScriptedFetcher {
    pub requests: Vec<FetchRequest>,
    pub handles: Vec<FetchHandle>,
    pub queued: VecDeque<FetchOutcome>,
}

impl ScriptedFetcher {
    pub fn requested(&self, panorama: &str, resolution: Resolution) -> Vec<usize> {
        let mut segments: Vec<usize> = self
            .requests
            .iter()
            .filter(|r| r.panorama == panorama && r.resolution == resolution)
            .map(|r| r.segment)
            .collect();
        segments.sort_unstable();
        segments
    }

    /// Completes the matching outstanding request with a tiny image.
    pub fn succeed(&mut self, panorama: &str, segment: usize, resolution: Resolution) {
        self.queued.push_back(outcome(panorama, segment, resolution, Ok(image())));
    }

    pub fn fail(&mut self, panorama: &str, segment: usize, resolution: Resolution) {
        let err = FetchError::Decode {
            path: format!("{}/{}", panorama, resolution.file_name(segment)).into(),
            message: "truncated".into(),
        };
        self.queued.push_back(outcome(panorama, segment, resolution, Err(err)));
    }
}

impl ImageFetcher for ScriptedFetcher {
    fn fetch(&mut self, request: FetchRequest) -> FetchHandle {
        let handle = FetchHandle::new(self.requests.len() as u64 + 1);
        self.requests.push(request);
        self.handles.push(handle.clone());
        handle
    }

    fn poll_completed(&mut self) -> Vec<FetchOutcome> {
        self.queued.drain(..).collect()
    }
}

pub fn image() -> Arc<RgbaImage> {
    Arc::new(RgbaImage::from_pixel(4, 2, image::Rgba([200, 100, 50, 255])))
}

fn outcome(
    panorama: &str,
    segment: usize,
    resolution: Resolution,
    result: Result<Arc<RgbaImage>, FetchError>,
) -> FetchOutcome {
    FetchOutcome {
        request: FetchRequest::new(panorama, "mem/", segment, resolution),
        result,
    }
}
