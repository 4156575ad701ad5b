use anyhow::{anyhow, bail, Context, Result};
use bytemuck::{bytes_of, Pod, Zeroable};
use glam::{Mat4, Vec3};
use log::info;
use wgpu::util::DeviceExt;

use crate::camera::Camera;
use crate::mesh::{Mesh, VERTEX_STRIDE};
use crate::producer::{ChwImage, SceneRenderer};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;
const MESH_COLOR: Vec3 = Vec3::new(0.8, 0.8, 0.85);

/// Offscreen wgpu renderer that draws a single mesh and reads the pixels back.
///
/// Stands in for a splat renderer when the bridge runs on its own. The
/// scaling modifier scales the mesh about its origin.
pub struct MeshRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    mesh: MeshBuffers,
    target: Option<RenderTarget>,
}

impl MeshRenderer {
    /// Acquires a GPU device without any window surface and uploads `mesh`.
    pub async fn new(mesh: &Mesh) -> Result<Self> {
        if mesh.indices.is_empty() {
            bail!("mesh has no triangles");
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("failed to acquire GPU adapter")?;
        info!("rendering on {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("mesh-renderer-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create GPU device")?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mesh-renderer-shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let uniform_size = std::mem::size_of::<FrameUniform>() as u64;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame-bind-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(uniform_size),
                },
                count: None,
            }],
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame-uniform"),
            size: uniform_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame-bind-group"),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mesh-renderer-pipeline-layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("mesh-renderer-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: (VERTEX_STRIDE * std::mem::size_of::<f32>()) as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute {
                            format: wgpu::VertexFormat::Float32x3,
                            offset: 0,
                            shader_location: 0,
                        },
                        wgpu::VertexAttribute {
                            format: wgpu::VertexFormat::Float32x3,
                            offset: (3 * std::mem::size_of::<f32>()) as u64,
                            shader_location: 1,
                        },
                    ],
                }],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: Default::default(),
                bias: Default::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview_mask: None,
            cache: None,
        });

        let mesh = MeshBuffers::upload(&device, mesh);

        Ok(Self {
            device,
            queue,
            pipeline,
            uniform_buffer,
            bind_group,
            mesh,
            target: None,
        })
    }

    fn ensure_target(&mut self, width: u32, height: u32) {
        let stale = self
            .target
            .as_ref()
            .map_or(true, |target| target.width != width || target.height != height);
        if stale {
            self.target = Some(RenderTarget::create(&self.device, width, height));
        }
    }
}

impl SceneRenderer for MeshRenderer {
    fn render(
        &mut self,
        camera: &Camera,
        background: Vec3,
        scaling_modifier: f32,
    ) -> Result<ChwImage> {
        let (width, height) = (camera.width, camera.height);
        if width == 0 || height == 0 {
            bail!("camera image size is {width}x{height}");
        }

        let uniform = FrameUniform {
            view_proj: image_space_projection(camera).to_cols_array_2d(),
            model: Mat4::from_scale(Vec3::splat(scaling_modifier)).to_cols_array_2d(),
            light_position: camera.camera_center().extend(1.0).into(),
            color: MESH_COLOR.extend(1.0).into(),
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytes_of(&uniform));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mesh-renderer-encoder"),
            });

        self.ensure_target(width, height);
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| anyhow!("render target missing"))?;

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mesh-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: background.x as f64,
                            g: background.y as f64,
                            b: background.z as f64,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.set_vertex_buffer(0, self.mesh.vertex.slice(..));
            pass.set_index_buffer(self.mesh.index.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..self.mesh.index_count, 0, 0..1);
        }

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &target.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(target.padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = target.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .context("failed to wait for the GPU")?;
        rx.recv()
            .context("readback callback was dropped")?
            .context("failed to map readback buffer")?;

        let image = {
            let mapped = slice.get_mapped_range();
            rgba_rows_to_chw(&mapped, width as usize, height as usize, target.padded_row as usize)
        };
        target.readback.unmap();
        image
    }
}

/// Projection used on the GPU: camera space is y-down while wgpu clip space
/// is y-up, so rows come out top-first only after flipping y.
fn image_space_projection(camera: &Camera) -> Mat4 {
    Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0)) * camera.full_proj_transform()
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Converts padded RGBA8 rows into a `[3, H, W]` float image.
///
/// Values sit half a step above each 8-bit level so that scaling back by
/// 255 and truncating yields the original byte.
fn rgba_rows_to_chw(bytes: &[u8], width: usize, height: usize, row_stride: usize) -> Result<ChwImage> {
    if bytes.len() < row_stride * height || row_stride < width * 4 {
        bail!(
            "readback holds {} bytes, expected {height} rows of {row_stride}",
            bytes.len()
        );
    }
    let plane = width * height;
    let mut data = vec![0.0f32; plane * 3];
    for y in 0..height {
        let row = &bytes[y * row_stride..y * row_stride + width * 4];
        for (x, rgba) in row.chunks_exact(4).enumerate() {
            for channel in 0..3 {
                data[channel * plane + y * width + x] = (rgba[channel] as f32 + 0.5) / 255.0;
            }
        }
    }
    Ok(ChwImage::new(3, height, width, data)?)
}

struct MeshBuffers {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    index_count: u32,
}

impl MeshBuffers {
    fn upload(device: &wgpu::Device, mesh: &Mesh) -> Self {
        let vertex = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh-vertices"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh-indices"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex,
            index,
            index_count: mesh.indices.len() as u32,
        }
    }
}

struct RenderTarget {
    width: u32,
    height: u32,
    padded_row: u32,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    _depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
    readback: wgpu::Buffer,
}

impl RenderTarget {
    fn create(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("mesh-color-target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("mesh-depth-target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let padded_row = padded_bytes_per_row(width);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mesh-readback"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            width,
            height,
            padded_row,
            color_view: color.create_view(&wgpu::TextureViewDescriptor::default()),
            color,
            depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            _depth: depth,
            readback,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FrameUniform {
    view_proj: [[f32; 4]; 4],
    model: [[f32; 4]; 4],
    light_position: [f32; 4],
    color: [f32; 4],
}

const SHADER: &str = r#"
struct FrameUniform {
    view_proj: mat4x4<f32>,
    model: mat4x4<f32>,
    light_position: vec4<f32>,
    color: vec4<f32>,
}

@group(0) @binding(0)
var<uniform> frame: FrameUniform;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) normal: vec3<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world_position = frame.model * vec4<f32>(input.position, 1.0);
    out.position = frame.view_proj * world_position;
    out.world_pos = world_position.xyz;
    out.normal = (frame.model * vec4<f32>(input.normal, 0.0)).xyz;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let light_dir = normalize(frame.light_position.xyz - input.world_pos);
    let normal = normalize(input.normal);
    let diffuse = abs(dot(normal, light_dir));
    let ambient = 0.15;
    let lit_color = (ambient + (1.0 - ambient) * diffuse) * frame.color.rgb;
    return vec4<f32>(lit_color, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat3, Vec4};

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }

    #[test]
    fn readback_rows_become_planes() {
        let stride = 12;
        // 2x2 image, rows padded from 8 to 12 bytes
        let bytes = [
            255, 0, 0, 255, 0, 255, 0, 255, 9, 9, 9, 9, // row 0
            0, 0, 255, 255, 128, 64, 32, 255, 9, 9, 9, 9, // row 1
        ];
        let image = rgba_rows_to_chw(&bytes, 2, 2, stride).unwrap();
        assert_eq!((image.channels(), image.height(), image.width()), (3, 2, 2));
        let frame = image.to_frame().unwrap();
        assert_eq!(
            frame.pixels,
            vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 128, 64, 32]
        );
    }

    #[test]
    fn short_readback_is_an_error() {
        assert!(rgba_rows_to_chw(&[0; 7], 2, 1, 8).is_err());
    }

    #[test]
    fn points_below_the_camera_land_in_the_bottom_half() {
        let camera = Camera::from_vertical_fov(Mat3::IDENTITY, Vec3::new(0.0, 0.0, 4.0), 1.0, 64, 64);
        // camera space is y-down, so +Y in the world is below the image centre
        let clip = image_space_projection(&camera) * Vec4::new(0.0, 1.0, 0.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
        assert!(clip.z / clip.w > 0.0 && clip.z / clip.w < 1.0);
    }
}
