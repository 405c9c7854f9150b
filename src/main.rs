// main.rs - 窗口、事件映射、顶部切换栏与状态栏

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")] // 在 Release 模式下隐藏控制台窗口

mod renderer;

use renderer::Renderer;

use glam::Vec2;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tiled_panorama::config::config_path_from_args;
use tiled_panorama::i18n::{self, tr, tr_with};
use tiled_panorama::input::{ArrowKey, ControlMode, TouchPhase};
use tiled_panorama::tiles::{Resolution, SEGMENT_COUNT};
use tiled_panorama::{ThreadedFetcher, Viewer, ViewerConfig};
use winit::{
    dpi::LogicalSize,
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowBuilder},
};

/// 界面里点出来的操作, 在 egui 帧结束后再执行
enum UiAction {
    Activate(String),
    SetMode(ControlMode),
    ToggleFullscreen,
}

fn arrow_key(code: VirtualKeyCode) -> Option<ArrowKey> {
    match code {
        VirtualKeyCode::Left => Some(ArrowKey::Left),
        VirtualKeyCode::Right => Some(ArrowKey::Right),
        VirtualKeyCode::Up => Some(ArrowKey::Up),
        VirtualKeyCode::Down => Some(ArrowKey::Down),
        _ => None,
    }
}

fn touch_phase(phase: winit::event::TouchPhase) -> TouchPhase {
    match phase {
        winit::event::TouchPhase::Started => TouchPhase::Started,
        winit::event::TouchPhase::Moved => TouchPhase::Moved,
        winit::event::TouchPhase::Ended | winit::event::TouchPhase::Cancelled => {
            TouchPhase::Ended
        }
    }
}

fn set_fullscreen(window: &Window, on: bool) {
    if on {
        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
    } else {
        window.set_fullscreen(None);
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let lang = i18n::resolve_lang_from_args();
    i18n::init(lang.clone());

    let config = ViewerConfig::resolve(config_path_from_args());
    info!(
        "{} panoramas configured, preview timeout {:.1}s",
        config.panoramas.len(),
        config.preview_timeout_secs
    );

    let event_loop = EventLoop::new();
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(tr("app.title"))
            .with_inner_size(LogicalSize::new(1280, 720))
            .build(&event_loop)?,
    );

    let mut viewer = Viewer::new(&config, ThreadedFetcher::new(), Instant::now());
    if let Err(e) = viewer.activate_index(0) {
        warn!("{}", tr_with("log.switch_failed", &[("err", e.to_string())]));
    }
    let size = window.inner_size();
    viewer
        .input_mut()
        .set_viewport(size.width as f32, size.height as f32);

    let mut renderer = pollster::block_on(Renderer::new(
        window.clone(),
        viewer.navigation().pose(),
        &lang,
    ))?;

    let mut cursor = Vec2::ZERO;
    let mut last_frame = Instant::now();
    let mut is_fullscreen = false;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent { event, .. } => {
                // 先让 egui 处理事件; 松开按钮总是交给视图, 否则拖动会卡住
                let response = renderer.egui_state.on_event(&renderer.egui_ctx, &event);
                let is_release = matches!(
                    event,
                    WindowEvent::MouseInput {
                        state: ElementState::Released,
                        ..
                    }
                );
                if response.consumed && !is_release {
                    return;
                }

                match event {
                    WindowEvent::CloseRequested => {
                        viewer.shutdown();
                        *control_flow = ControlFlow::Exit;
                    }

                    WindowEvent::Resized(new_size) => {
                        renderer.resize(new_size);
                        viewer
                            .input_mut()
                            .set_viewport(new_size.width as f32, new_size.height as f32);
                    }

                    WindowEvent::KeyboardInput { input, .. } => {
                        let Some(code) = input.virtual_keycode else {
                            return;
                        };
                        let pressed = input.state == ElementState::Pressed;
                        if let Some(key) = arrow_key(code) {
                            if pressed {
                                viewer.input_mut().key_down(key);
                            } else {
                                viewer.input_mut().key_up(key);
                            }
                        } else if code == VirtualKeyCode::F11 && pressed {
                            is_fullscreen = !is_fullscreen;
                            set_fullscreen(&window, is_fullscreen);
                        }
                    }

                    WindowEvent::CursorMoved { position, .. } => {
                        cursor = Vec2::new(position.x as f32, position.y as f32);
                        viewer.input_mut().pointer_move(cursor);
                    }

                    WindowEvent::MouseInput {
                        state,
                        button: MouseButton::Left,
                        ..
                    } => match state {
                        ElementState::Pressed => viewer.input_mut().pointer_down(cursor),
                        ElementState::Released => viewer.input_mut().pointer_up(),
                    },

                    WindowEvent::MouseWheel { delta, .. } => {
                        // 与浏览器 wheel 事件同号: 向下滚为正
                        let delta_y = match delta {
                            MouseScrollDelta::LineDelta(_, y) => -y * 100.0,
                            MouseScrollDelta::PixelDelta(pos) => -pos.y as f32,
                        };
                        viewer.input_mut().wheel(delta_y);
                    }

                    WindowEvent::Touch(touch) => {
                        let px = Vec2::new(touch.location.x as f32, touch.location.y as f32);
                        viewer
                            .input_mut()
                            .touch_event(touch.id, touch_phase(touch.phase), px);
                    }

                    _ => {}
                }
            }

            Event::RedrawRequested(_) => {
                let now = Instant::now();
                let dt = now.duration_since(last_frame);
                last_frame = now;

                let update = viewer.tick(now, dt);
                renderer.update_camera(&update);
                renderer.sync_scene(viewer.switcher());

                let mut actions = Vec::new();
                let render_result = renderer.render_with_ui(&window, |ctx| {
                    draw_ui(ctx, &viewer, is_fullscreen, &mut actions);
                });

                for action in actions {
                    match action {
                        UiAction::Activate(name) => {
                            if let Err(e) = viewer.activate(&name) {
                                warn!("{}", tr_with("log.switch_failed", &[("err", e.to_string())]));
                            }
                        }
                        UiAction::SetMode(mode) => viewer.set_mode(mode),
                        UiAction::ToggleFullscreen => {
                            is_fullscreen = !is_fullscreen;
                            set_fullscreen(&window, is_fullscreen);
                        }
                    }
                }

                match render_result {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => renderer.resize(renderer.size),
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        error!("GPU out of memory");
                        viewer.shutdown();
                        *control_flow = ControlFlow::Exit;
                    }
                    Err(e) => warn!("render error: {:?}", e),
                }
            }

            // 每帧请求下一帧
            Event::MainEventsCleared => {
                window.request_redraw();
            }

            _ => {}
        }
    });
}

fn draw_ui(
    ctx: &egui::Context,
    viewer: &Viewer<ThreadedFetcher>,
    is_fullscreen: bool,
    actions: &mut Vec<UiAction>,
) {
    let switcher = viewer.switcher();
    let navigation = viewer.navigation();

    egui::TopBottomPanel::top("controls").show(ctx, |ui| {
        ui.horizontal(|ui| {
            for (i, pano) in switcher.panoramas().iter().enumerate() {
                let selected = switcher.active_index() == Some(i);
                let button = ui
                    .selectable_label(selected, pano.name())
                    .on_hover_text(pano.source_path());
                if button.clicked() && !selected {
                    actions.push(UiAction::Activate(pano.name().to_string()));
                }
            }

            ui.separator();
            let mode = navigation.input().mode();
            for (m, key) in [
                (ControlMode::Drag, "ui.mode.drag"),
                (ControlMode::Follow, "ui.mode.follow"),
            ] {
                if ui.selectable_label(mode == m, tr(key)).clicked() && mode != m {
                    actions.push(UiAction::SetMode(m));
                }
            }

            ui.separator();
            let label = if is_fullscreen {
                tr("ui.fullscreen.exit")
            } else {
                tr("ui.fullscreen.enter")
            };
            if ui.button(label).clicked() {
                actions.push(UiAction::ToggleFullscreen);
            }
        });
    });

    egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
        ui.horizontal(|ui| {
            if let Some(pano) = switcher.active() {
                let name = pano.name().to_string();
                if !pano.is_ready() {
                    let (done, total) = pano.progress();
                    ui.label(
                        egui::RichText::new(tr_with(
                            "status.loading",
                            &[
                                ("name", name),
                                ("done", done.to_string()),
                                ("total", total.to_string()),
                            ],
                        ))
                        .color(egui::Color32::YELLOW),
                    );
                    ui.label("|");
                } else {
                    let full = pano
                        .tiles()
                        .segments()
                        .iter()
                        .filter(|s| matches!(s.texture(), Some(t) if t.resolution == Resolution::Full))
                        .count();
                    if full < SEGMENT_COUNT {
                        ui.label(
                            egui::RichText::new(tr_with("status.refining", &[("name", name)]))
                                .color(egui::Color32::LIGHT_BLUE),
                        );
                        ui.label("|");
                    }
                }
            }

            let pose = navigation.pose();
            ui.label(format!("{} {:.1}°", tr("status.fov"), pose.fov_deg));
            ui.label("|");
            ui.label(format!("{} {:.2}", tr("status.zoom"), navigation.input().zoom()));
            ui.label("|");
            ui.label(format!("{} {:.1}°", tr("status.yaw"), pose.azimuth().to_degrees()));
            ui.label("|");
            ui.label(format!(
                "{} {:.1}°",
                tr("status.pitch"),
                pose.elevation().to_degrees()
            ));
        });
    });
}
