// ============================================================================
// BRUSH PIPELINE — draws triangulated stroke ribbons into layer textures
// ============================================================================
//
// Two pipelines over the same shader module:
//
//   * paint  — premultiplied src-over.  The fragment output is already
//     premultiplied, so (One, OneMinusSrcAlpha) is the exact over operator.
//   * eraser — (Zero, OneMinusSrcAlpha) on color AND alpha: the destination
//     is only ever scaled down by the stroke's coverage.  Color is never
//     written; an eraser pass cannot tint a layer.
// ============================================================================

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::stroke::{RibbonMesh, VERTEX_STRIDE};

/// Uniforms for one stroke draw.  `scale`/`offset` map layer-local display
/// pixels straight to the supersampled target's NDC.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct BrushUniforms {
    pub scale: [f32; 2],
    pub offset: [f32; 2],
    pub color: [f32; 4],
    pub params: [f32; 4],
}

impl BrushUniforms {
    /// Map display-pixel mesh coordinates to NDC of a `width × height`
    /// display-pixel target (the supersample factor cancels out).
    pub fn for_canvas(width: u32, height: u32, color: [f32; 4], tilt_fade: f32) -> Self {
        Self {
            scale: [2.0 / width as f32, -2.0 / height as f32],
            offset: [-1.0, 1.0],
            color,
            params: [tilt_fade, 0.0, 0.0, 0.0],
        }
    }
}

pub struct BrushPipeline {
    paint_pipeline: wgpu::RenderPipeline,
    eraser_pipeline: wgpu::RenderPipeline,
    uniform_bgl: wgpu::BindGroupLayout,
}

impl BrushPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("brush_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::BRUSH_SHADER.into()),
        });

        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("brush_uniform_bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("brush_pipeline_layout"),
            bind_group_layouts: &[&uniform_bgl],
            push_constant_ranges: &[],
        });

        // position, flow, tilt — must match stroke::VERTEX_STRIDE.
        const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
            wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32, 2 => Float32x2];
        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: (VERTEX_STRIDE * std::mem::size_of::<f32>()) as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        };

        let paint_blend = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
        };

        let eraser_blend = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::Zero,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::Zero,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
        };

        let make_pipeline = |label: &str, blend: wgpu::BlendState| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_brush",
                    buffers: &[vertex_layout.clone()],
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    // Hairpin overlap can flip individual triangles; both
                    // windings must rasterize.
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_brush",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                multiview: None,
            })
        };

        Self {
            paint_pipeline: make_pipeline("brush_paint_pipeline", paint_blend),
            eraser_pipeline: make_pipeline("brush_eraser_pipeline", eraser_blend),
            uniform_bgl,
        }
    }

    /// Record one stroke draw into `target`.  One draw call per mesh; the
    /// caller batches encoder submission.
    pub fn draw(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        mesh: &RibbonMesh,
        uniforms: &BrushUniforms,
        is_eraser: bool,
    ) {
        if mesh.indices.is_empty() {
            return;
        }

        let vertex_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("brush_vertices"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("brush_indices"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let uniform_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("brush_uniforms"),
            contents: bytemuck::bytes_of(uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let uniform_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("brush_uniform_bg"),
            layout: &self.uniform_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buf.as_entire_binding(),
            }],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("brush_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(if is_eraser {
            &self.eraser_pipeline
        } else {
            &self.paint_pipeline
        });
        pass.set_bind_group(0, &uniform_bg, &[]);
        pass.set_vertex_buffer(0, vertex_buf.slice(..));
        pass.set_index_buffer(index_buf.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..mesh.indices.len() as u32, 0, 0..1);
    }
}
