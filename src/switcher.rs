// switcher.rs - 全景切换: 同一时刻只挂载一个全景组

use std::time::{Duration, Instant};

use log::info;

use crate::config::PanoramaEntry;
use crate::error::ViewerError;
use crate::loader::{FetchOutcome, ImageFetcher};
use crate::panorama::Panorama;

/// Shared display container. Holds indices of the panorama groups that are
/// currently attached to the scene.
#[derive(Debug, Default, Clone)]
pub struct Stage {
    attached: Vec<usize>,
    revision: u64,
}

impl Stage {
    pub fn attached(&self) -> &[usize] {
        &self.attached
    }

    pub fn contains(&self, index: usize) -> bool {
        self.attached.contains(&index)
    }

    /// Incremented on every attach/detach.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn attach(&mut self, index: usize) {
        if !self.contains(index) {
            self.attached.push(index);
            self.revision += 1;
        }
    }

    fn detach(&mut self, index: usize) {
        let before = self.attached.len();
        self.attached.retain(|i| *i != index);
        if self.attached.len() != before {
            self.revision += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Unchanged,
    Switched { from: Option<usize>, to: usize },
}

pub struct PanoramaSwitcher {
    panoramas: Vec<Panorama>,
    active: Option<usize>,
    stage: Stage,
}

impl PanoramaSwitcher {
    fn new(panoramas: Vec<Panorama>) -> Self {
        Self {
            panoramas,
            active: None,
            stage: Stage::default(),
        }
    }

    /// One panorama per entry, each starting its preview load right away.
    pub fn open(entries: &[PanoramaEntry], fetcher: &mut dyn ImageFetcher, now: Instant) -> Self {
        let panoramas = entries
            .iter()
            .map(|e| Panorama::open(&e.name, &e.path, fetcher, now))
            .collect();
        Self::new(panoramas)
    }

    pub fn panoramas(&self) -> &[Panorama] {
        &self.panoramas
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active(&self) -> Option<&Panorama> {
        self.active.and_then(|i| self.panoramas.get(i))
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.panoramas.iter().position(|p| p.name() == name)
    }

    pub fn activate(
        &mut self,
        name: &str,
        fetcher: &mut dyn ImageFetcher,
    ) -> Result<Activation, ViewerError> {
        let index = self
            .find(name)
            .ok_or_else(|| ViewerError::UnknownPanorama(name.to_string()))?;
        self.activate_index(index, fetcher)
    }

    pub fn activate_index(
        &mut self,
        index: usize,
        fetcher: &mut dyn ImageFetcher,
    ) -> Result<Activation, ViewerError> {
        if index >= self.panoramas.len() {
            return Err(ViewerError::UnknownPanorama(format!("#{}", index)));
        }
        if self.active == Some(index) {
            return Ok(Activation::Unchanged);
        }

        let from = self.active.take();
        if let Some(prev) = from {
            self.stage.detach(prev);
            self.panoramas[prev].deactivate();
        }

        self.stage.attach(index);
        self.active = Some(index);
        self.panoramas[index].activate(fetcher);

        info!("switched to panorama '{}'", self.panoramas[index].name());
        Ok(Activation::Switched { from, to: index })
    }

    /// Routes a completion to the panorama it was issued for.
    pub fn dispatch(
        &mut self,
        outcome: FetchOutcome,
        fetcher: &mut dyn ImageFetcher,
    ) -> Result<(), ViewerError> {
        let index = self
            .find(&outcome.request.panorama)
            .ok_or_else(|| ViewerError::UnknownPanorama(outcome.request.panorama.clone()))?;
        self.panoramas[index].on_fetched(outcome, fetcher)
    }

    /// Names of panoramas whose previews were force-released on this call.
    pub fn poll_timeouts(
        &mut self,
        now: Instant,
        timeout: Duration,
        fetcher: &mut dyn ImageFetcher,
    ) -> Vec<String> {
        let mut expired = Vec::new();
        for pano in &mut self.panoramas {
            if pano.poll_timeout(now, timeout, fetcher).is_some() {
                expired.push(pano.name().to_string());
            }
        }
        expired
    }

    pub fn cancel_all(&mut self) {
        for pano in &mut self.panoramas {
            pano.cancel_fetches();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::testing::{ok, RecordingFetcher};
    use crate::tiles::Resolution;

    fn two_spheres(fetcher: &mut RecordingFetcher) -> PanoramaSwitcher {
        let entries = vec![
            PanoramaEntry::new("sphere1", "public/images/1/"),
            PanoramaEntry::new("sphere2", "public/images/0/"),
        ];
        PanoramaSwitcher::open(&entries, fetcher, Instant::now())
    }

    #[test]
    fn nothing_active_before_first_activate() {
        let mut fetcher = RecordingFetcher::default();
        let switcher = two_spheres(&mut fetcher);
        assert!(switcher.active().is_none());
        assert!(switcher.stage().attached().is_empty());
        assert_eq!(fetcher.count(Resolution::Preview), 16);
    }

    #[test]
    fn repeated_activate_is_a_no_op() {
        let mut fetcher = RecordingFetcher::default();
        let mut switcher = two_spheres(&mut fetcher);

        let first = switcher.activate("sphere1", &mut fetcher).unwrap();
        assert_eq!(first, Activation::Switched { from: None, to: 0 });
        let revision = switcher.stage().revision();

        let second = switcher.activate("sphere1", &mut fetcher).unwrap();
        assert_eq!(second, Activation::Unchanged);
        assert_eq!(switcher.stage().revision(), revision);
        assert_eq!(switcher.active_index(), Some(0));
    }

    #[test]
    fn unknown_name_leaves_state_alone() {
        let mut fetcher = RecordingFetcher::default();
        let mut switcher = two_spheres(&mut fetcher);
        switcher.activate("sphere2", &mut fetcher).unwrap();

        let err = switcher.activate("sphere9", &mut fetcher).unwrap_err();
        assert_eq!(err, ViewerError::UnknownPanorama("sphere9".into()));
        assert!(switcher.activate_index(5, &mut fetcher).is_err());
        assert_eq!(switcher.active_index(), Some(1));
        assert_eq!(switcher.stage().attached(), &[1]);
    }

    #[test]
    fn stalled_previews_always_release_after_timeout() {
        let mut fetcher = RecordingFetcher::default();
        let mut switcher = two_spheres(&mut fetcher);
        let later = Instant::now() + Duration::from_secs(3600);
        switcher.activate("sphere1", &mut fetcher).unwrap();

        let expired = switcher.poll_timeouts(later, Duration::from_secs(20), &mut fetcher);
        assert_eq!(expired, vec!["sphere1".to_string(), "sphere2".to_string()]);
        assert!(switcher.panoramas().iter().all(|p| p.is_ready()));
        assert_eq!(fetcher.count(Resolution::Full), 8);
        assert!(switcher
            .poll_timeouts(later, Duration::from_secs(20), &mut fetcher)
            .is_empty());
    }

    #[test]
    fn dispatch_routes_by_panorama_name() {
        let mut fetcher = RecordingFetcher::default();
        let mut switcher = two_spheres(&mut fetcher);
        switcher
            .dispatch(ok("sphere2", 4, Resolution::Preview), &mut fetcher)
            .unwrap();
        assert_eq!(switcher.panoramas()[1].progress(), (1, 8));
        assert_eq!(switcher.panoramas()[0].progress(), (0, 8));

        let stray = switcher.dispatch(ok("nope", 0, Resolution::Preview), &mut fetcher);
        assert!(matches!(stray, Err(ViewerError::UnknownPanorama(_))));
    }
}
