// navigation.rs - 每帧驱动: 动画 -> 输入融合 -> 相机; 以及把加载完成回调接回主线程

use std::time::{Duration, Instant};

use log::warn;

use crate::camera::{CameraPose, CameraRig, CameraUpdate, ZoomIntro};
use crate::config::ViewerConfig;
use crate::error::ViewerError;
use crate::input::{ControlMode, InputFusion, Zoom};
use crate::loader::ImageFetcher;
use crate::switcher::{Activation, PanoramaSwitcher};

pub struct NavigationLoop {
    input: InputFusion,
    rig: CameraRig,
    intro: ZoomIntro,
    frames: u64,
}

impl NavigationLoop {
    pub fn new(mode: ControlMode, zoom: Zoom) -> Self {
        Self {
            rig: CameraRig::new(zoom.value()),
            intro: ZoomIntro::standard(zoom.value()),
            input: InputFusion::new(mode, zoom),
            frames: 0,
        }
    }

    pub fn input(&self) -> &InputFusion {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputFusion {
        &mut self.input
    }

    pub fn pose(&self) -> CameraPose {
        self.rig.pose()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn intro_finished(&self) -> bool {
        self.intro.is_finished()
    }

    pub fn tick(&mut self, dt: Duration) -> CameraUpdate {
        self.frames += 1;
        if let Some(zoom) = self.intro.advance(dt) {
            self.input.zoom_mut().set(zoom);
        }
        let delta = self.input.frame_delta();
        self.rig.advance(delta, self.input.zoom())
    }
}

/// Everything the host drives: panoramas, navigation and the image source.
pub struct Viewer<F: ImageFetcher> {
    switcher: PanoramaSwitcher,
    navigation: NavigationLoop,
    fetcher: F,
    preview_timeout: Duration,
}

impl<F: ImageFetcher> Viewer<F> {
    /// Opens every configured panorama (previews start loading immediately).
    /// Nothing is active until the first `activate`.
    pub fn new(config: &ViewerConfig, mut fetcher: F, now: Instant) -> Self {
        let switcher = PanoramaSwitcher::open(&config.panoramas, &mut fetcher, now);
        let zoom = Zoom::new(config.zoom.initial, config.zoom.min, config.zoom.max);
        Self {
            switcher,
            navigation: NavigationLoop::new(config.control_mode, zoom),
            fetcher,
            preview_timeout: config.preview_timeout(),
        }
    }

    pub fn switcher(&self) -> &PanoramaSwitcher {
        &self.switcher
    }

    pub fn navigation(&self) -> &NavigationLoop {
        &self.navigation
    }

    pub fn navigation_mut(&mut self) -> &mut NavigationLoop {
        &mut self.navigation
    }

    pub fn input_mut(&mut self) -> &mut InputFusion {
        self.navigation.input_mut()
    }

    pub fn fetcher_mut(&mut self) -> &mut F {
        &mut self.fetcher
    }

    pub fn activate(&mut self, name: &str) -> Result<Activation, ViewerError> {
        self.switcher.activate(name, &mut self.fetcher)
    }

    pub fn activate_index(&mut self, index: usize) -> Result<Activation, ViewerError> {
        self.switcher.activate_index(index, &mut self.fetcher)
    }

    pub fn set_mode(&mut self, mode: ControlMode) {
        self.navigation.input_mut().set_mode(mode);
    }

    /// Applies completions that arrived since the last frame and releases
    /// stalled previews. Problems are logged and returned, never fatal.
    pub fn pump(&mut self, now: Instant) -> Vec<ViewerError> {
        let mut errors = Vec::new();
        for outcome in self.fetcher.poll_completed() {
            if let Err(e) = self.switcher.dispatch(outcome, &mut self.fetcher) {
                warn!("{}", e);
                errors.push(e);
            }
        }
        self.switcher
            .poll_timeouts(now, self.preview_timeout, &mut self.fetcher);
        errors
    }

    /// One frame: completions first, so anything that landed since the last
    /// frame is visible in this one.
    pub fn tick(&mut self, now: Instant, dt: Duration) -> CameraUpdate {
        self.pump(now);
        self.navigation.tick(dt)
    }

    pub fn shutdown(&mut self) {
        self.switcher.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::ORBIT_RADIUS;
    use crate::input::ArrowKey;
    use crate::loader::testing::{ok, RecordingFetcher};
    use crate::tiles::Resolution;

    const FRAME: Duration = Duration::from_millis(16);

    fn nav() -> NavigationLoop {
        NavigationLoop::new(ControlMode::Drag, Zoom::new(0.5, 0.2, 3.0))
    }

    #[test]
    fn intro_zooms_to_one() {
        let mut nav = nav();
        assert_eq!(nav.input().zoom(), 0.5);
        let mut fov_updates = 0;
        for _ in 0..200 {
            if nav.tick(FRAME).fov_changed {
                fov_updates += 1;
            }
        }
        assert!(nav.intro_finished());
        assert_eq!(nav.input().zoom(), 1.0);
        assert_eq!(nav.pose().fov_deg, 60.0);
        assert!(fov_updates > 10);
        assert_eq!(nav.frames(), 200);
    }

    #[test]
    fn held_key_turns_then_coasts_to_rest() {
        let mut nav = nav();
        nav.input_mut().key_down(ArrowKey::Right);
        for _ in 0..30 {
            nav.tick(FRAME);
        }
        nav.input_mut().key_up(ArrowKey::Right);
        let turned = nav.pose().position;
        assert!(turned.x.abs() > 0.01);

        for _ in 0..200 {
            nav.tick(FRAME);
        }
        let settled = nav.pose().position;
        nav.tick(FRAME);
        assert_eq!(nav.pose().position, settled);
        assert!((settled.length() - ORBIT_RADIUS).abs() < 1e-5);
        assert_eq!(settled.y, 0.0);
    }

    #[test]
    fn viewer_pumps_completions_and_promotes_active() {
        let config = ViewerConfig::default();
        let now = Instant::now();
        let mut viewer = Viewer::new(&config, RecordingFetcher::default(), now);
        viewer.activate("sphere1").unwrap();

        for i in 0..8 {
            viewer
                .fetcher_mut()
                .pending
                .push_back(ok("sphere1", i, Resolution::Preview));
        }
        viewer
            .fetcher_mut()
            .pending
            .push_back(ok("sphere1", 2, Resolution::Preview));

        let errors = viewer.pump(now);
        assert_eq!(
            errors,
            vec![ViewerError::DuplicateCompletion {
                panorama: "sphere1".into(),
                segment: 2
            }]
        );
        assert!(viewer.switcher().panoramas()[0].is_visible());
        assert_eq!(viewer.fetcher_mut().count(Resolution::Full), 8);
    }

    #[test]
    fn shutdown_cancels_in_flight_requests() {
        let mut viewer = Viewer::new(
            &ViewerConfig::default(),
            RecordingFetcher::default(),
            Instant::now(),
        );
        viewer.shutdown();
        assert!(viewer.fetcher_mut().handles.iter().all(|h| h.is_cancelled()));
    }
}
