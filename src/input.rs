// input.rs - 键盘 / 鼠标 / 触摸 / 滚轮 -> 每帧旋转增量 + 缩放值

use std::collections::BTreeMap;

use glam::Vec2;
use serde::Deserialize;

use crate::camera::RotationDelta;

/// rad / frame per held arrow key
pub const KEY_STEP: f32 = 0.04;
pub const FOLLOW_GAIN: f32 = KEY_STEP * 1.5;
/// Pointer movement (unit coords) -> rotation in drag mode.
pub const DRAG_GAIN: f32 = -0.3 * std::f32::consts::TAU;
pub const TOUCH_INERTIA_GAIN: f32 = 4.0;
/// Larger per-frame touch jumps are treated as glitches.
pub const TOUCH_GLITCH_X: f32 = 0.6;
pub const TOUCH_GLITCH_Y: f32 = 0.4;
pub const PINCH_GAIN: f32 = 0.015;
pub const WHEEL_GAIN: f32 = 0.0005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Drag,
    Follow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowKey {
    Left,
    Right,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPhase {
    Started,
    Moved,
    Ended,
}

/// Zoom scalar, always inside `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zoom {
    value: f32,
    min: f32,
    max: f32,
}

impl Zoom {
    pub fn new(initial: f32, min: f32, max: f32) -> Self {
        Self {
            value: initial.clamp(min, max),
            min,
            max,
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn bounds(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    pub fn set(&mut self, value: f32) {
        self.value = value.clamp(self.min, self.max);
    }

    pub fn nudge(&mut self, delta: f32) {
        self.set(self.value + delta);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct HeldKeys {
    left: bool,
    right: bool,
    up: bool,
    down: bool,
}

impl HeldKeys {
    fn set(&mut self, key: ArrowKey, held: bool) {
        match key {
            ArrowKey::Left => self.left = held,
            ArrowKey::Right => self.right = held,
            ArrowKey::Up => self.up = held,
            ArrowKey::Down => self.down = held,
        }
    }

    /// Opposite keys cancel out.
    fn axes(&self) -> Vec2 {
        let axis = |neg: bool, pos: bool| (pos as i8 - neg as i8) as f32;
        Vec2::new(axis(self.left, self.right), axis(self.down, self.up))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PointerState {
    press: Option<Vec2>,
    current: Vec2,
    last_sample: Option<Vec2>,
}

#[derive(Debug, Default, Clone, Copy)]
struct TouchState {
    scaling: bool,
    gesture_distance: f32,
    prev: Vec2,
    current: Vec2,
    direction: Vec2,
    inertia: bool,
}

pub struct InputFusion {
    mode: ControlMode,
    viewport: Vec2,
    keys: HeldKeys,
    pointer: PointerState,
    touch: TouchState,
    touches: BTreeMap<u64, Vec2>,
    touch_enabled: bool,
    zoom: Zoom,
}

impl InputFusion {
    pub fn new(mode: ControlMode, zoom: Zoom) -> Self {
        Self {
            mode,
            viewport: Vec2::ONE,
            keys: HeldKeys::default(),
            pointer: PointerState::default(),
            touch: TouchState::default(),
            touches: BTreeMap::new(),
            touch_enabled: false,
            zoom,
        }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ControlMode) {
        if self.mode != mode {
            self.mode = mode;
            self.pointer.last_sample = self.pointer.press.map(|_| self.pointer.current);
        }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom.value()
    }

    pub fn zoom_mut(&mut self) -> &mut Zoom {
        &mut self.zoom
    }

    /// Container size in pixels; pointer positions are normalised against it.
    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.viewport = Vec2::new(width.max(1.0), height.max(1.0));
    }

    /// Pixel position -> `[0,1]` with y pointing up.
    pub fn to_unit(&self, px: Vec2) -> Vec2 {
        Vec2::new(px.x / self.viewport.x, 1.0 - px.y / self.viewport.y)
    }

    pub fn key_down(&mut self, key: ArrowKey) {
        self.keys.set(key, true);
    }

    pub fn key_up(&mut self, key: ArrowKey) {
        self.keys.set(key, false);
    }

    pub fn pointer_down(&mut self, px: Vec2) {
        let p = self.to_unit(px);
        self.pointer = PointerState {
            press: Some(p),
            current: p,
            last_sample: Some(p),
        };
    }

    pub fn pointer_move(&mut self, px: Vec2) {
        self.pointer.current = self.to_unit(px);
    }

    pub fn pointer_up(&mut self) {
        self.pointer = PointerState::default();
    }

    pub fn is_pressed(&self) -> bool {
        self.pointer.press.is_some()
    }

    pub fn wheel(&mut self, delta_y: f32) {
        self.zoom.nudge(WHEEL_GAIN * -delta_y);
    }

    /// `points` is every finger currently down, in pixels.
    pub fn touch_start(&mut self, points: &[Vec2]) {
        self.touch_enabled = true;
        let t = &mut self.touch;
        t.scaling = points.len() == 2;
        if t.scaling {
            t.gesture_distance = points[0].distance(points[1]);
        }
        t.inertia = false;
        t.direction = Vec2::ZERO;

        let seed = match points {
            [p] => self.to_unit(*p),
            _ => Vec2::ZERO,
        };
        self.touch.prev = seed;
        self.touch.current = seed;
    }

    pub fn touch_move(&mut self, points: &[Vec2]) {
        if self.touch.scaling && points.len() == 2 {
            let dist = points[0].distance(points[1]);
            let diff = dist - self.touch.gesture_distance;
            self.touch.gesture_distance = dist;
            self.zoom.nudge(PINCH_GAIN * diff);

            self.touch.prev = Vec2::ZERO;
            self.touch.current = Vec2::ZERO;
        } else if let [p] = points {
            self.touch.current = self.to_unit(*p);
        }
    }

    pub fn touch_end(&mut self) {
        let t = &mut self.touch;
        if t.scaling {
            t.gesture_distance = 0.0;
            t.prev = Vec2::ZERO;
            t.current = Vec2::ZERO;
        } else {
            t.inertia = true;
        }
    }

    /// Per-finger events folded into the whole-gesture calls above.
    pub fn touch_event(&mut self, id: u64, phase: TouchPhase, px: Vec2) {
        match phase {
            TouchPhase::Started => {
                self.touches.insert(id, px);
                let points: Vec<Vec2> = self.touches.values().copied().collect();
                self.touch_start(&points);
            }
            TouchPhase::Moved => {
                self.touches.insert(id, px);
                let points: Vec<Vec2> = self.touches.values().copied().collect();
                self.touch_move(&points);
            }
            TouchPhase::Ended => {
                self.touches.remove(&id);
                self.touch_end();
            }
        }
    }

    /// Reduces everything held or sampled this frame into one rotation delta.
    pub fn frame_delta(&mut self) -> RotationDelta {
        let mut delta = Vec2::ZERO;

        delta += self.keys.axes() * KEY_STEP;

        if self.pointer.press.is_some() {
            match self.mode {
                ControlMode::Follow => {
                    if let Some(press) = self.pointer.press {
                        delta += (self.pointer.current - press) * FOLLOW_GAIN;
                    }
                }
                ControlMode::Drag => {
                    if let Some(last) = self.pointer.last_sample {
                        delta += (self.pointer.current - last) * DRAG_GAIN;
                    }
                    self.pointer.last_sample = Some(self.pointer.current);
                }
            }
        }

        if self.touch_enabled {
            delta += self.sample_touch();
        }

        RotationDelta {
            yaw: delta.x,
            pitch: delta.y,
        }
    }

    fn sample_touch(&mut self) -> Vec2 {
        let mut delta = Vec2::ZERO;
        let t = &mut self.touch;

        if !t.scaling && t.prev != t.current {
            t.direction = t.prev - t.current;
            t.prev = t.current;
            // 双向都过滤: 大于阈值的滑动按异常跳变丢弃, 不论方向
            if t.direction.x.abs() > TOUCH_GLITCH_X || t.direction.y.abs() > TOUCH_GLITCH_Y {
                t.direction = Vec2::ZERO;
            }
            if self.mode == ControlMode::Drag && !t.inertia {
                delta -= t.direction * DRAG_GAIN;
            }
        }

        if t.inertia {
            delta += t.direction * TOUCH_INERTIA_GAIN;
            t.direction = Vec2::ZERO;
        }
        delta
    }
}
