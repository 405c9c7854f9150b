// camera.rs - 阻尼旋转 (绕原点轨道) + 由缩放推导视场角 + 开场缩放动画

use std::time::Duration;

use glam::{Mat4, Vec3};

/// Share of the pending rotation applied per frame.
pub const DECAY: f32 = 0.07;
/// Pending rotation below this snaps to exactly zero.
pub const REST_EPSILON: f32 = 0.001;
/// Keeps the camera off the poles, where yaw is undefined.
pub const MIN_HORIZONTAL_RADIUS: f32 = 0.001;
pub const ORBIT_RADIUS: f32 = 0.1;
pub const FOV_BASE_DEG: f32 = 75.0;
pub const FOV_PER_ZOOM_DEG: f32 = 15.0;
pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 10_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RotationDelta {
    pub yaw: f32,
    pub pitch: f32,
}

/// Rotation that has been requested but not yet applied to the camera.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RotationState {
    pub yaw: f32,
    pub pitch: f32,
}

impl RotationState {
    pub fn add(&mut self, delta: RotationDelta) {
        self.yaw += delta.yaw;
        self.pitch += delta.pitch;
    }

    pub fn is_at_rest(&self) -> bool {
        self.yaw == 0.0 && self.pitch == 0.0
    }

    /// Takes this frame's share out of the pending rotation.
    pub fn decay(&mut self) -> RotationDelta {
        let (yaw, rest_yaw) = decay_axis(self.yaw);
        let (pitch, rest_pitch) = decay_axis(self.pitch);
        self.yaw = rest_yaw;
        self.pitch = rest_pitch;
        RotationDelta { yaw, pitch }
    }
}

/// `(applied, remaining)`
pub fn decay_axis(pending: f32) -> (f32, f32) {
    let applied = pending * DECAY;
    let mut remaining = pending - applied;
    if remaining.abs() < REST_EPSILON {
        remaining = 0.0;
    }
    (applied, remaining)
}

/// Rotates `position` about the vertical axis.
pub fn orbit_yaw(position: Vec3, angle: f32) -> Vec3 {
    let (sin, cos) = angle.sin_cos();
    Vec3::new(
        cos * position.x - sin * position.z,
        position.y,
        sin * position.x + cos * position.z,
    )
}

/// Rotates `position` in the plane spanned by the up axis and its own
/// horizontal direction. The horizontal radius never drops below
/// [`MIN_HORIZONTAL_RADIUS`] and the distance to the origin is preserved.
pub fn orbit_pitch(position: Vec3, angle: f32) -> Vec3 {
    let (sin, cos) = angle.sin_cos();
    let radius = position.length();
    let xz = (position.x * position.x + position.z * position.z).sqrt();

    let mut y = cos * position.y - sin * xz;
    let mut new_xz = sin * position.y + cos * xz;
    if new_xz < MIN_HORIZONTAL_RADIUS {
        new_xz = MIN_HORIZONTAL_RADIUS;
        let vertical = (radius * radius - new_xz * new_xz).max(0.0).sqrt();
        y = vertical.copysign(y);
    }

    if xz <= f32::EPSILON {
        // 正好在极点上: 没有水平方向可用, 沿 +Z 展开
        return Vec3::new(0.0, y, new_xz);
    }
    let scale = new_xz / xz;
    Vec3::new(position.x * scale, y, position.z * scale)
}

pub fn fov_for_zoom(zoom: f32) -> f32 {
    FOV_BASE_DEG - zoom * FOV_PER_ZOOM_DEG
}

pub fn quadratic_in_out(t: f32) -> f32 {
    let k = t.clamp(0.0, 1.0) * 2.0;
    if k < 1.0 {
        0.5 * k * k
    } else {
        let k = k - 1.0;
        -0.5 * (k * (k - 2.0) - 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    pub fov_deg: f32,
}

impl CameraPose {
    /// The camera always looks at the sphere centre.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, Vec3::ZERO, Vec3::Y)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_deg.to_radians(), aspect, Z_NEAR, Z_FAR)
    }

    /// Horizontal angle of the camera position, radians.
    pub fn azimuth(&self) -> f32 {
        self.position.x.atan2(self.position.z)
    }

    /// Vertical angle of the camera position, radians.
    pub fn elevation(&self) -> f32 {
        let xz = (self.position.x * self.position.x + self.position.z * self.position.z).sqrt();
        self.position.y.atan2(xz)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraUpdate {
    pub pose: CameraPose,
    /// Only true on frames where the projection has to be rebuilt.
    pub fov_changed: bool,
}

pub struct CameraRig {
    pose: CameraPose,
    pending: RotationState,
}

impl CameraRig {
    pub fn new(zoom: f32) -> Self {
        Self {
            pose: CameraPose {
                position: Vec3::new(0.0, 0.0, ORBIT_RADIUS),
                fov_deg: fov_for_zoom(zoom),
            },
            pending: RotationState::default(),
        }
    }

    pub fn pose(&self) -> CameraPose {
        self.pose
    }

    pub fn pending(&self) -> RotationState {
        self.pending
    }

    pub fn advance(&mut self, impulse: RotationDelta, zoom: f32) -> CameraUpdate {
        self.pending.add(impulse);
        let applied = self.pending.decay();

        if applied.yaw != 0.0 {
            self.pose.position = orbit_yaw(self.pose.position, applied.yaw);
        }
        if applied.pitch != 0.0 {
            self.pose.position = orbit_pitch(self.pose.position, applied.pitch);
        }

        let fov = fov_for_zoom(zoom);
        let fov_changed = fov != self.pose.fov_deg;
        self.pose.fov_deg = fov;

        CameraUpdate {
            pose: self.pose,
            fov_changed,
        }
    }
}

/// One-shot eased zoom from `from` to `to` after a delay.
#[derive(Debug, Clone)]
pub struct ZoomIntro {
    delay: Duration,
    duration: Duration,
    from: f32,
    to: f32,
    elapsed: Duration,
    finished: bool,
}

impl ZoomIntro {
    pub const DELAY: Duration = Duration::from_millis(700);
    pub const DURATION: Duration = Duration::from_millis(1800);

    pub fn new(delay: Duration, duration: Duration, from: f32, to: f32) -> Self {
        Self {
            delay,
            duration,
            from,
            to,
            elapsed: Duration::ZERO,
            finished: false,
        }
    }

    /// 0.5 -> 1.0 over 1.8 s after 0.7 s.
    pub fn standard(from: f32) -> Self {
        Self::new(Self::DELAY, Self::DURATION, from, 1.0)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Zoom value for this frame, or `None` while waiting or once done.
    pub fn advance(&mut self, dt: Duration) -> Option<f32> {
        if self.finished {
            return None;
        }
        self.elapsed += dt;
        if self.elapsed < self.delay {
            return None;
        }

        let span = self.duration.as_secs_f32();
        let t = if span > 0.0 {
            ((self.elapsed - self.delay).as_secs_f32() / span).min(1.0)
        } else {
            1.0
        };
        if t >= 1.0 {
            self.finished = true;
        }
        Some(self.from + (self.to - self.from) * quadratic_in_out(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn decay_snaps_to_exact_zero() {
        let mut state = RotationState {
            yaw: 1.0,
            pitch: 0.0,
        };
        let mut frames = 0;
        while !state.is_at_rest() {
            state.decay();
            frames += 1;
            assert!(frames < 200, "decay never settled");
        }
        // 0.93^n < 0.001  =>  n = 96
        assert!((90..=100).contains(&frames), "settled after {} frames", frames);
        assert_eq!(state.yaw, 0.0);
    }

    #[test]
    fn tiny_pending_is_dropped_immediately() {
        let (applied, rest) = decay_axis(0.001);
        assert!((applied - 0.00007).abs() < 1e-9);
        assert_eq!(rest, 0.0);
    }

    #[test]
    fn yaw_keeps_height_and_radius() {
        let p = Vec3::new(0.0, 0.03, 0.08);
        let q = orbit_yaw(p, 1.3);
        assert!((q.y - p.y).abs() < EPS);
        assert!((q.length() - p.length()).abs() < EPS);

        let quarter = orbit_yaw(Vec3::new(0.0, 0.0, 1.0), std::f32::consts::FRAC_PI_2);
        assert!((quarter - Vec3::new(-1.0, 0.0, 0.0)).length() < EPS);
    }

    #[test]
    fn pitch_never_crosses_the_pole() {
        let mut p = Vec3::new(0.0, 0.0, ORBIT_RADIUS);
        for _ in 0..500 {
            p = orbit_pitch(p, 0.3);
            let xz = (p.x * p.x + p.z * p.z).sqrt();
            assert!(p.is_finite());
            assert!(xz >= MIN_HORIZONTAL_RADIUS - 1e-7, "xz = {}", xz);
            assert!((p.length() - ORBIT_RADIUS).abs() < 1e-4);
        }
        // 正向 pitch 让相机往下走 (视线朝上)
        assert!(p.y < 0.0);

        for _ in 0..500 {
            p = orbit_pitch(p, -0.3);
        }
        assert!(p.y > 0.0);
        assert!((p.x * p.x + p.z * p.z).sqrt() >= MIN_HORIZONTAL_RADIUS - 1e-7);
    }

    #[test]
    fn pitch_from_exact_pole_is_finite() {
        let p = orbit_pitch(Vec3::new(0.0, ORBIT_RADIUS, 0.0), 0.2);
        assert!(p.is_finite());
    }

    #[test]
    fn rig_settles_after_impulse() {
        let mut rig = CameraRig::new(0.5);
        rig.advance(RotationDelta { yaw: 1.0, pitch: 0.0 }, 0.5);
        for _ in 0..120 {
            rig.advance(RotationDelta::default(), 0.5);
        }
        assert!(rig.pending().is_at_rest());

        let before = rig.pose().position;
        for _ in 0..10 {
            rig.advance(RotationDelta::default(), 0.5);
        }
        assert_eq!(rig.pose().position, before);
        assert!((before.length() - ORBIT_RADIUS).abs() < 1e-5);
    }

    #[test]
    fn fov_only_reported_when_zoom_moves() {
        let mut rig = CameraRig::new(0.5);
        assert_eq!(rig.pose().fov_deg, 67.5);
        assert!(!rig.advance(RotationDelta::default(), 0.5).fov_changed);

        let update = rig.advance(RotationDelta::default(), 1.0);
        assert!(update.fov_changed);
        assert_eq!(update.pose.fov_deg, 60.0);
        assert!(!rig.advance(RotationDelta::default(), 1.0).fov_changed);
    }

    #[test]
    fn easing_endpoints_and_midpoint() {
        assert_eq!(quadratic_in_out(0.0), 0.0);
        assert_eq!(quadratic_in_out(0.5), 0.5);
        assert_eq!(quadratic_in_out(1.0), 1.0);
        assert!((quadratic_in_out(0.25) - 0.125).abs() < EPS);
    }

    #[test]
    fn intro_waits_then_eases_then_stops() {
        let mut intro = ZoomIntro::standard(0.5);
        assert_eq!(intro.advance(Duration::from_millis(500)), None);

        // 延迟结束后 + 一半时长
        let mid = intro.advance(Duration::from_millis(1100)).unwrap();
        assert!((mid - 0.75).abs() < EPS);

        let end = intro.advance(Duration::from_secs(5)).unwrap();
        assert_eq!(end, 1.0);
        assert!(intro.is_finished());
        assert_eq!(intro.advance(Duration::from_millis(16)), None);
    }
}
