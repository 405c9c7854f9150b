// renderer.rs - 核心渲染器: 每个可见全景 8 个球面楔形 + egui 界面

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use glam::Mat4;
use image::RgbaImage;
use log::{info, warn};
use tiled_panorama::camera::{CameraPose, CameraUpdate};
use tiled_panorama::i18n::{tr, tr_with, DEFAULT_LANG};
use tiled_panorama::mesh::{build_segment_wedge, segment_model_matrix};
use tiled_panorama::switcher::PanoramaSwitcher;
use tiled_panorama::tiles::{TileSegment, SEGMENT_COUNT};
use wgpu::util::DeviceExt;
use winit::window::Window;

/// 非英文界面需要带 CJK 字形的字体; 找不到就保持 egui 内置字体
fn setup_egui_ui_fonts(ctx: &egui::Context, lang: &str) {
    if lang == DEFAULT_LANG {
        return;
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if cfg!(windows) {
        let win_fonts = PathBuf::from(r"C:\Windows\Fonts");
        for f in ["msyh.ttf", "simhei.ttf", "Deng.ttf", "malgun.ttf", "arialuni.ttf"] {
            candidates.push(win_fonts.join(f));
        }
    } else if cfg!(target_os = "macos") {
        for p in [
            "/System/Library/Fonts/PingFang.ttc",
            "/System/Library/Fonts/Hiragino Sans GB.ttc",
            "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
            "/Library/Fonts/NotoSansSC-Regular.otf",
        ] {
            candidates.push(PathBuf::from(p));
        }
    } else if cfg!(unix) {
        for p in [
            "/usr/share/fonts/opentype/noto/NotoSansSC-Regular.otf",
            "/usr/share/fonts/truetype/noto/NotoSansSC-Regular.ttf",
            "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
            "/usr/share/fonts/truetype/noto/NotoSansCJK-Regular.ttc",
            "/usr/share/fonts/truetype/wqy/wqy-microhei.ttc",
            "/usr/share/fonts/truetype/wqy/wqy-zenhei.ttc",
        ] {
            candidates.push(PathBuf::from(p));
        }
    }

    // 用户放在 assets 里的字体
    let asset_files = ["NotoSansSC-Regular.otf", "NotoSansSC-Regular.ttf", "NotoSansCJK-Regular.ttc"];
    if let Some(dir) = std::env::current_exe().ok().and_then(|e| e.parent().map(|d| d.to_path_buf())) {
        for f in asset_files {
            candidates.push(dir.join("assets").join(f));
        }
    }
    for f in asset_files {
        candidates.push(PathBuf::from("assets").join(f));
    }

    // ab_glyph 能解析才算可用, 避免 egui 在坏字体上 panic
    let chosen = candidates.into_iter().find_map(|p| {
        let bytes = std::fs::read(&p).ok()?;
        ab_glyph::FontArc::try_from_vec(bytes.clone()).ok()?;
        Some((p, bytes))
    });

    let Some((font_path, font_bytes)) = chosen else {
        warn!("{}", tr("font.not_found"));
        return;
    };
    info!(
        "{}",
        tr_with("font.using", &[("path", font_path.display().to_string())])
    );

    let mut fonts = egui::FontDefinitions::default();
    fonts
        .font_data
        .insert("ui".to_owned(), egui::FontData::from_owned(font_bytes));
    for family in [egui::FontFamily::Proportional, egui::FontFamily::Monospace] {
        if let Some(list) = fonts.families.get_mut(&family) {
            list.push("ui".to_owned());
        }
    }
    ctx.set_fonts(fonts);
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    uv: [f32; 2],
}

impl Vertex {
    const ATTRIBS: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct MatrixUniform {
    matrix: [[f32; 4]; 4],
}

impl MatrixUniform {
    fn from_mat4(m: Mat4) -> Self {
        Self {
            matrix: m.to_cols_array_2d(),
        }
    }
}

/// 一个段在 GPU 上的资源; revision 对应 TileSegment::revision
struct GpuSegment {
    revision: u64,
    model_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    _texture: Option<wgpu::Texture>,
}

fn segment_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    model_buffer: &wgpu::Buffer,
    view: &wgpu::TextureView,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: model_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
        label: Some("segment_bind_group"),
    })
}

pub struct Renderer {
    surface: wgpu::Surface,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pub size: winit::dpi::PhysicalSize<u32>,
    render_pipeline: wgpu::RenderPipeline,

    // 网格 (所有段共用)
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,

    // 相机
    pose: CameraPose,
    projection: Mat4,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,

    // 段纹理
    segment_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    _fallback_texture: wgpu::Texture,
    fallback_view: wgpu::TextureView,
    segments: HashMap<(usize, usize), GpuSegment>,
    visible: Vec<usize>,

    // UI
    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

impl Renderer {
    pub async fn new(window: Arc<Window>, pose: CameraPose, lang: &str) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = unsafe { instance.create_surface(window.as_ref()) }?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("no compatible GPU adapter"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    label: None,
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| anyhow::anyhow!("surface reports no formats"))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo, // VSync on
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        // --- 1. Mesh ---
        let wedge = build_segment_wedge();
        let vertices: Vec<Vertex> = wedge
            .positions
            .iter()
            .zip(&wedge.uvs)
            .map(|(p, uv)| Vertex {
                position: *p,
                uv: *uv,
            })
            .collect();
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Wedge Vertex Buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Wedge Index Buffer"),
            contents: bytemuck::cast_slice(&wedge.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        // --- 2. Camera ---
        let aspect = config.width as f32 / config.height as f32;
        let projection = pose.projection_matrix(aspect);
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[MatrixUniform::from_mat4(
                projection * pose.view_matrix(),
            )]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            label: Some("camera_bind_group_layout"),
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
            label: Some("camera_bind_group"),
        });

        // --- 3. Segment textures ---
        let segment_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    // Model matrix
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("segment_bind_group_layout"),
        });

        // 每段是独立纹理, 边缘不能环绕采样
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        // 还没有图片的段画成白色
        let fallback_size = wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        };
        let fallback_texture = device.create_texture(&wgpu::TextureDescriptor {
            size: fallback_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            label: Some("fallback_texture"),
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &fallback_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255, 255, 255, 255],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            fallback_size,
        );
        let fallback_view = fallback_texture.create_view(&wgpu::TextureViewDescriptor::default());

        // --- 4. Pipeline ---
        let shader = device.create_shader_module(wgpu::include_wgsl!("shader_wedge.wgsl"));
        let render_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Render Pipeline Layout"),
                bind_group_layouts: &[&camera_layout, &segment_layout],
                push_constant_ranges: &[],
            });

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Render Pipeline"),
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[Vertex::layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None, // 从球内部看, 镜像后绕序反转
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None, // 各段互不重叠
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        });

        // --- 5. Egui ---
        let egui_ctx = egui::Context::default();
        setup_egui_ui_fonts(&egui_ctx, lang);

        let mut egui_state = egui_winit::State::new(window.as_ref());
        egui_state.set_pixels_per_point(window.scale_factor() as f32);

        let egui_renderer = egui_wgpu::Renderer::new(&device, config.format, None, 1);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            size,
            render_pipeline,
            vertex_buffer,
            index_buffer,
            index_count: wedge.indices.len() as u32,
            pose,
            projection,
            camera_buffer,
            camera_bind_group,
            segment_layout,
            sampler,
            _fallback_texture: fallback_texture,
            fallback_view,
            segments: HashMap::new(),
            visible: Vec::new(),
            egui_ctx,
            egui_state,
            egui_renderer,
        })
    }

    fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height.max(1) as f32
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            self.projection = self.pose.projection_matrix(self.aspect());
            self.write_camera();
        }
    }

    /// 投影矩阵只在 FOV 变化时重算
    pub fn update_camera(&mut self, update: &CameraUpdate) {
        self.pose = update.pose;
        if update.fov_changed {
            self.projection = self.pose.projection_matrix(self.aspect());
        }
        self.write_camera();
    }

    fn write_camera(&mut self) {
        let uniform = MatrixUniform::from_mat4(self.projection * self.pose.view_matrix());
        self.queue
            .write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[uniform]));
    }

    /// 收集舞台上可见的全景, 并上传新绑定的段纹理
    pub fn sync_scene(&mut self, switcher: &PanoramaSwitcher) {
        self.visible.clear();
        for &index in switcher.stage().attached() {
            let Some(pano) = switcher.panoramas().get(index) else {
                continue;
            };
            if !pano.is_visible() {
                continue;
            }
            for segment in pano.tiles().segments() {
                self.sync_segment(index, pano.name(), segment);
            }
            self.visible.push(index);
        }
    }

    fn sync_segment(&mut self, panorama: usize, name: &str, segment: &TileSegment) {
        let key = (panorama, segment.index());
        if !self.segments.contains_key(&key) {
            let model = segment_model_matrix(segment.angular_offset());
            let model_buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Segment Model Buffer"),
                    contents: bytemuck::cast_slice(&[MatrixUniform::from_mat4(model)]),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let bind_group = segment_bind_group(
                &self.device,
                &self.segment_layout,
                &self.sampler,
                &model_buffer,
                &self.fallback_view,
            );
            self.segments.insert(
                key,
                GpuSegment {
                    revision: 0,
                    model_buffer,
                    bind_group,
                    _texture: None,
                },
            );
        }

        let Some(gpu) = self.segments.get(&key) else {
            return;
        };
        if gpu.revision == segment.revision() {
            return;
        }
        let Some(bound) = segment.texture() else {
            return;
        };

        let texture = self.upload_texture(name, segment.index(), &bound.image);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = segment_bind_group(
            &self.device,
            &self.segment_layout,
            &self.sampler,
            &gpu.model_buffer,
            &view,
        );
        if let Some(gpu) = self.segments.get_mut(&key) {
            gpu.revision = segment.revision();
            gpu.bind_group = bind_group;
            gpu._texture = Some(texture);
        }
    }

    fn upload_texture(&self, name: &str, segment: usize, image: &Arc<RgbaImage>) -> wgpu::Texture {
        let max_texture_dimension = self.device.limits().max_texture_dimension_2d;
        let (src_w, src_h) = image.dimensions();

        // 超过 GPU 纹理限制时缩放
        let scaled;
        let img: &RgbaImage = if src_w > max_texture_dimension || src_h > max_texture_dimension {
            let scale = max_texture_dimension as f32 / src_w.max(src_h) as f32;
            let new_w = ((src_w as f32 * scale) as u32).max(1);
            let new_h = ((src_h as f32 * scale) as u32).max(1);
            warn!(
                "{}",
                tr_with(
                    "log.gpu_texture_scaled",
                    &[
                        ("name", name.to_string()),
                        ("segment", segment.to_string()),
                        ("src_w", src_w.to_string()),
                        ("src_h", src_h.to_string()),
                        ("max", max_texture_dimension.to_string()),
                        ("new_w", new_w.to_string()),
                        ("new_h", new_h.to_string()),
                    ]
                )
            );
            scaled = image::imageops::resize(
                image.as_ref(),
                new_w,
                new_h,
                image::imageops::FilterType::Lanczos3,
            );
            &scaled
        } else {
            image.as_ref()
        };

        let (width, height) = img.dimensions();
        let texture_size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            size: texture_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            label: Some("segment_texture"),
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            img.as_raw(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            texture_size,
        );
        texture
    }

    pub fn render_with_ui(
        &mut self,
        window: &Window,
        run_ui: impl FnOnce(&egui::Context),
    ) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        // 1. Scene
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });

            render_pass.set_pipeline(&self.render_pipeline);
            render_pass.set_bind_group(0, &self.camera_bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            for &panorama in &self.visible {
                for segment in 0..SEGMENT_COUNT {
                    if let Some(gpu) = self.segments.get(&(panorama, segment)) {
                        render_pass.set_bind_group(1, &gpu.bind_group, &[]);
                        render_pass.draw_indexed(0..self.index_count, 0, 0..1);
                    }
                }
            }
        }

        // 2. UI
        let raw_input = self.egui_state.take_egui_input(window);
        let full_output = self.egui_ctx.run(raw_input, run_ui);

        self.egui_state
            .handle_platform_output(window, &self.egui_ctx, full_output.platform_output);
        let clipped_primitives = self.egui_ctx.tessellate(full_output.shapes);

        let screen_descriptor = egui_wgpu::renderer::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: window.scale_factor() as f32,
        };

        for (id, delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, delta);
        }

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            &mut encoder,
            &clipped_primitives,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Egui Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });
            self.egui_renderer
                .render(&mut render_pass, &clipped_primitives, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}
