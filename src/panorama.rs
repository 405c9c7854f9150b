// panorama.rs - 单个全景球: 加载阶段 x 激活状态

use std::time::{Duration, Instant};

use log::{info, warn};

use crate::error::ViewerError;
use crate::loader::{FetchOutcome, ImageFetcher};
use crate::tiles::{LoadPhase, PreviewStep, Resolution, TileSet, SEGMENT_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    RequestFullRes,
    Wait,
}

/// Promotion table. Evaluated after every activity or phase change, so the
/// order in which "active" and "preview ready" arrive does not matter.
fn next_action(phase: LoadPhase, activity: Activity) -> Action {
    match (phase, activity) {
        (LoadPhase::PreviewReady, Activity::Active) => Action::RequestFullRes,
        (LoadPhase::Unloaded, _)
        | (LoadPhase::PreviewLoading, _)
        | (LoadPhase::PreviewReady, Activity::Inactive)
        | (LoadPhase::FullResRequested, _) => Action::Wait,
    }
}

pub struct Panorama {
    name: String,
    source_path: String,
    tiles: TileSet,
    activity: Activity,
}

impl Panorama {
    /// Unloaded until `open` issues the previews.
    pub(crate) fn new(name: &str, source_path: &str) -> Self {
        Self {
            name: name.to_string(),
            source_path: source_path.to_string(),
            tiles: TileSet::new(name, source_path),
            activity: Activity::Inactive,
        }
    }

    /// Creates the panorama and immediately issues its preview fetches.
    pub fn open(
        name: &str,
        source_path: &str,
        fetcher: &mut dyn ImageFetcher,
        now: Instant,
    ) -> Self {
        let mut pano = Self::new(name, source_path);
        pano.tiles.begin_preview(fetcher, now);
        pano
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn tiles(&self) -> &TileSet {
        &self.tiles
    }

    pub fn is_active(&self) -> bool {
        self.activity == Activity::Active
    }

    pub fn is_ready(&self) -> bool {
        self.tiles.preview_complete()
    }

    /// The wedge group is only drawn once the previews are in.
    pub fn is_visible(&self) -> bool {
        self.is_ready()
    }

    /// (settled previews, total)
    pub fn progress(&self) -> (usize, usize) {
        (self.tiles.preview_settled().min(SEGMENT_COUNT), SEGMENT_COUNT)
    }

    pub fn activate(&mut self, fetcher: &mut dyn ImageFetcher) {
        self.activity = Activity::Active;
        self.settle(fetcher);
    }

    pub fn deactivate(&mut self) {
        self.activity = Activity::Inactive;
    }

    fn become_ready(&mut self, fetcher: &mut dyn ImageFetcher) {
        info!("panorama '{}' is ready", self.name);
        self.settle(fetcher);
    }

    fn settle(&mut self, fetcher: &mut dyn ImageFetcher) {
        match next_action(self.tiles.phase(), self.activity) {
            Action::RequestFullRes => {
                self.tiles.request_full_res(fetcher);
            }
            Action::Wait => {}
        }
    }

    /// Applies one fetch completion addressed to this panorama. A failed fetch
    /// is applied (the segment settles untextured) and then reported.
    pub fn on_fetched(
        &mut self,
        outcome: FetchOutcome,
        fetcher: &mut dyn ImageFetcher,
    ) -> Result<(), ViewerError> {
        let FetchOutcome { request, result } = outcome;
        let (image, failure) = match result {
            Ok(image) => (Some(image), None),
            Err(reason) => (None, Some(reason)),
        };

        match request.resolution {
            Resolution::Preview => {
                if let PreviewStep::Completed = self.tiles.settle_preview(request.segment, image)? {
                    self.become_ready(fetcher);
                }
            }
            Resolution::Full => {
                if let Some(image) = image {
                    self.tiles.bind_full(request.segment, image)?;
                }
            }
        }

        match failure {
            Some(reason) => Err(ViewerError::AssetLoad {
                panorama: self.name.clone(),
                segment: request.segment,
                phase: request.resolution,
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Releases a stalled preview phase once `timeout` has elapsed.
    pub fn poll_timeout(
        &mut self,
        now: Instant,
        timeout: Duration,
        fetcher: &mut dyn ImageFetcher,
    ) -> Option<Vec<usize>> {
        let missing = self.tiles.expire_preview(now, timeout)?;
        warn!(
            "panorama '{}': previews {:?} timed out after {:?}, showing without them",
            self.name, missing, timeout
        );
        self.become_ready(fetcher);
        Some(missing)
    }

    pub fn cancel_fetches(&mut self) {
        self.tiles.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::loader::testing::{ok, RecordingFetcher};
    use crate::loader::FetchRequest;

    fn deliver_previews(pano: &mut Panorama, fetcher: &mut RecordingFetcher) {
        for i in 0..SEGMENT_COUNT {
            pano.on_fetched(ok(pano.name(), i, Resolution::Preview), fetcher)
                .unwrap();
        }
    }

    #[test]
    fn table_only_promotes_ready_and_active() {
        let phases = [
            LoadPhase::Unloaded,
            LoadPhase::PreviewLoading,
            LoadPhase::PreviewReady,
            LoadPhase::FullResRequested,
        ];
        for phase in phases {
            for activity in [Activity::Active, Activity::Inactive] {
                let expected = phase == LoadPhase::PreviewReady && activity == Activity::Active;
                assert_eq!(
                    next_action(phase, activity) == Action::RequestFullRes,
                    expected,
                    "{:?} {:?}",
                    phase,
                    activity
                );
            }
        }
    }

    #[test]
    fn activate_then_ready_requests_full_res_once() {
        let mut fetcher = RecordingFetcher::default();
        let mut pano = Panorama::open("a", "img/", &mut fetcher, Instant::now());
        pano.activate(&mut fetcher);
        pano.activate(&mut fetcher);
        assert_eq!(fetcher.count(Resolution::Full), 0);
        assert!(!pano.is_visible());

        deliver_previews(&mut pano, &mut fetcher);
        assert!(pano.is_visible());
        assert_eq!(fetcher.count(Resolution::Full), 8);

        pano.deactivate();
        pano.activate(&mut fetcher);
        assert_eq!(fetcher.count(Resolution::Full), 8);
    }

    #[test]
    fn ready_then_activate_requests_full_res_once() {
        let mut fetcher = RecordingFetcher::default();
        let mut pano = Panorama::open("a", "img/", &mut fetcher, Instant::now());
        deliver_previews(&mut pano, &mut fetcher);
        assert!(pano.is_ready());
        assert_eq!(fetcher.count(Resolution::Full), 0);

        pano.activate(&mut fetcher);
        pano.deactivate();
        pano.activate(&mut fetcher);
        assert_eq!(fetcher.count(Resolution::Full), 8);
    }

    #[test]
    fn failed_fetch_is_reported_after_settling() {
        let mut fetcher = RecordingFetcher::default();
        let mut pano = Panorama::open("a", "img/", &mut fetcher, Instant::now());
        let failed = FetchOutcome {
            request: FetchRequest::new("a", "img/", 2, Resolution::Preview),
            result: Err(FetchError::Cancelled),
        };
        let err = pano.on_fetched(failed, &mut fetcher).unwrap_err();
        assert!(matches!(
            err,
            ViewerError::AssetLoad {
                segment: 2,
                phase: Resolution::Preview,
                ..
            }
        ));
        assert_eq!(pano.progress(), (1, 8));
    }

    #[test]
    fn timeout_makes_active_panorama_ready_and_promotes() {
        let mut fetcher = RecordingFetcher::default();
        let start = Instant::now();
        let mut pano = Panorama::open("a", "img/", &mut fetcher, start);
        pano.activate(&mut fetcher);
        pano.on_fetched(ok("a", 0, Resolution::Preview), &mut fetcher)
            .unwrap();

        let timeout = Duration::from_secs(10);
        let missing = pano
            .poll_timeout(start + Duration::from_secs(11), timeout, &mut fetcher)
            .unwrap();
        assert_eq!(missing, vec![1, 2, 3, 4, 5, 6, 7]);
        assert!(pano.is_visible());
        assert_eq!(fetcher.count(Resolution::Full), 8);
    }
}
