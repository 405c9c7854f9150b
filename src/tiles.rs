// tiles.rs - 八段球面贴图与两阶段加载 (预览 -> 全分辨率)

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use log::{debug, info};

use crate::error::ViewerError;
use crate::loader::{FetchHandle, FetchRequest, ImageFetcher};

pub const SEGMENT_COUNT: usize = 8;
/// 每段 45°
pub const SEGMENT_ARC: f32 = std::f32::consts::FRAC_PI_4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Preview,
    Full,
}

impl Resolution {
    /// Fixed asset naming: `3_small.jpg` for previews, `3.jpg` for full size.
    pub fn file_name(self, segment: usize) -> String {
        match self {
            Resolution::Preview => format!("{}_small.jpg", segment),
            Resolution::Full => format!("{}.jpg", segment),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentTexture {
    pub resolution: Resolution,
    pub image: Arc<RgbaImage>,
}

/// One 45° wedge. Only the bound texture ever changes.
#[derive(Debug, Clone)]
pub struct TileSegment {
    index: usize,
    texture: Option<SegmentTexture>,
    revision: u64,
}

impl TileSegment {
    fn new(index: usize) -> Self {
        Self {
            index,
            texture: None,
            revision: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn angular_offset(&self) -> f32 {
        self.index as f32 * SEGMENT_ARC
    }

    pub fn texture(&self) -> Option<&SegmentTexture> {
        self.texture.as_ref()
    }

    /// Bumped on every rebind; the renderer re-uploads when it sees a new value.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns false when a preview would replace an already bound full-size image.
    fn bind(&mut self, resolution: Resolution, image: Arc<RgbaImage>) -> bool {
        let has_full = matches!(
            self.texture,
            Some(SegmentTexture {
                resolution: Resolution::Full,
                ..
            })
        );
        if resolution == Resolution::Preview && has_full {
            return false;
        }
        self.texture = Some(SegmentTexture { resolution, image });
        self.revision += 1;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Counted { remaining: usize },
    /// This arrival completed the set.
    Released,
    /// The barrier was already force-released; recorded but not counted.
    Late,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierError {
    OutOfRange(usize),
    Duplicate(usize),
}

/// Fan-in over a fixed set of slots. Releases exactly once, either when every
/// slot has arrived or when forced.
#[derive(Debug, Clone)]
pub struct CompletionBarrier {
    arrived: Vec<bool>,
    count: usize,
    released: bool,
}

impl CompletionBarrier {
    pub fn new(expected: usize) -> Self {
        Self {
            arrived: vec![false; expected],
            count: 0,
            released: false,
        }
    }

    pub fn arrive(&mut self, slot: usize) -> Result<Arrival, BarrierError> {
        let seen = self
            .arrived
            .get_mut(slot)
            .ok_or(BarrierError::OutOfRange(slot))?;
        if *seen {
            return Err(BarrierError::Duplicate(slot));
        }
        *seen = true;
        self.count += 1;

        if self.released {
            return Ok(Arrival::Late);
        }
        if self.count == self.arrived.len() {
            self.released = true;
            return Ok(Arrival::Released);
        }
        Ok(Arrival::Counted {
            remaining: self.arrived.len() - self.count,
        })
    }

    /// Returns true only for the call that actually released the barrier.
    pub fn force_release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        true
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn arrived_count(&self) -> usize {
        self.count
    }

    pub fn missing(&self) -> Vec<usize> {
        self.arrived
            .iter()
            .enumerate()
            .filter(|(_, seen)| !**seen)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadPhase {
    Unloaded,
    PreviewLoading,
    PreviewReady,
    FullResRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewStep {
    Pending { remaining: usize },
    /// All previews settled; the set just became ready.
    Completed,
    /// Arrived after a timeout already made the set ready.
    Late,
}

pub struct TileSet {
    panorama: String,
    base_path: String,
    segments: Vec<TileSegment>,
    phase: LoadPhase,
    barrier: CompletionBarrier,
    preview_started: Option<Instant>,
    handles: Vec<FetchHandle>,
}

impl TileSet {
    pub fn new(panorama: &str, base_path: &str) -> Self {
        Self {
            panorama: panorama.to_string(),
            base_path: base_path.to_string(),
            segments: (0..SEGMENT_COUNT).map(TileSegment::new).collect(),
            phase: LoadPhase::Unloaded,
            barrier: CompletionBarrier::new(SEGMENT_COUNT),
            preview_started: None,
            handles: Vec::new(),
        }
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn segments(&self) -> &[TileSegment] {
        &self.segments
    }

    pub fn preview_complete(&self) -> bool {
        self.phase >= LoadPhase::PreviewReady
    }

    pub fn full_res_requested(&self) -> bool {
        self.phase == LoadPhase::FullResRequested
    }

    /// Previews that have arrived (successfully or not).
    pub fn preview_settled(&self) -> usize {
        self.barrier.arrived_count()
    }

    /// Issues the 8 preview fetches. Only the first call does anything.
    pub fn begin_preview(&mut self, fetcher: &mut dyn ImageFetcher, now: Instant) -> bool {
        if self.phase != LoadPhase::Unloaded {
            return false;
        }
        self.phase = LoadPhase::PreviewLoading;
        self.preview_started = Some(now);
        self.issue(fetcher, Resolution::Preview);
        info!("panorama '{}': requested {} previews", self.panorama, SEGMENT_COUNT);
        true
    }

    /// Issues the 8 full-size fetches. Only valid once, right after the
    /// previews are ready.
    pub fn request_full_res(&mut self, fetcher: &mut dyn ImageFetcher) -> bool {
        if self.phase != LoadPhase::PreviewReady {
            return false;
        }
        self.phase = LoadPhase::FullResRequested;
        self.issue(fetcher, Resolution::Full);
        info!("panorama '{}': requested full resolution", self.panorama);
        true
    }

    fn issue(&mut self, fetcher: &mut dyn ImageFetcher, resolution: Resolution) {
        for i in 0..SEGMENT_COUNT {
            let request = FetchRequest::new(&self.panorama, &self.base_path, i, resolution);
            self.handles.push(fetcher.fetch(request));
        }
    }

    /// Records a preview arrival. `image` is `None` when the fetch failed; the
    /// segment still counts as settled and keeps the untextured base colour.
    pub fn settle_preview(
        &mut self,
        segment: usize,
        image: Option<Arc<RgbaImage>>,
    ) -> Result<PreviewStep, ViewerError> {
        let arrival = self.barrier.arrive(segment).map_err(|e| match e {
            BarrierError::OutOfRange(segment) => ViewerError::SegmentOutOfRange {
                panorama: self.panorama.clone(),
                segment,
            },
            BarrierError::Duplicate(segment) => ViewerError::DuplicateCompletion {
                panorama: self.panorama.clone(),
                segment,
            },
        })?;

        if let Some(image) = image {
            if !self.segments[segment].bind(Resolution::Preview, image) {
                debug!(
                    "panorama '{}': preview {} ignored, full size already bound",
                    self.panorama, segment
                );
            }
        }

        Ok(match arrival {
            Arrival::Counted { remaining } => PreviewStep::Pending { remaining },
            Arrival::Released => {
                self.mark_ready();
                PreviewStep::Completed
            }
            Arrival::Late => PreviewStep::Late,
        })
    }

    pub fn bind_full(&mut self, segment: usize, image: Arc<RgbaImage>) -> Result<(), ViewerError> {
        let slot = self
            .segments
            .get_mut(segment)
            .ok_or_else(|| ViewerError::SegmentOutOfRange {
                panorama: self.panorama.clone(),
                segment,
            })?;
        slot.bind(Resolution::Full, image);
        debug!("panorama '{}': segment {} at full size", self.panorama, segment);
        Ok(())
    }

    /// Force-releases the preview barrier once `timeout` has passed since the
    /// previews were issued. Returns the segments that never arrived.
    pub fn expire_preview(&mut self, now: Instant, timeout: Duration) -> Option<Vec<usize>> {
        if self.phase != LoadPhase::PreviewLoading {
            return None;
        }
        let started = self.preview_started?;
        if now.saturating_duration_since(started) < timeout {
            return None;
        }
        if !self.barrier.force_release() {
            return None;
        }
        self.mark_ready();
        Some(self.barrier.missing())
    }

    fn mark_ready(&mut self) {
        if self.phase == LoadPhase::PreviewLoading {
            self.phase = LoadPhase::PreviewReady;
        }
    }

    pub fn cancel_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.cancel();
        }
    }
}
