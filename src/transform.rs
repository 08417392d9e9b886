// ============================================================================
// LAYER TRANSFORM — interactive affine preview with commit/cancel
// ============================================================================
//
// Lifecycle:
//   begin   — clone the layer's CPU pixels once, upload them to a scratch
//             texture.  The clone is the rollback point.
//   update  — fold a delta into the affine, render scratch × matrix into the
//             layer's render target.  CPU pixels stay untouched.
//   commit  — the engine bakes the previewed texture back into the CPU
//             buffer, the transform resets to identity, history commits.
//   cancel  — the captured pixels are restored.  Every abort path runs this:
//             a layer must never be left GPU-only and invisible to undo.
// ============================================================================

use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::canvas::{Layer, LayerAffine, LayerId};
use crate::error::EngineError;
use crate::gpu::context::GpuContext;
use crate::gpu::layer_store::{premultiply_image, GpuLayerStore};

/// One interaction step, folded into the session's accumulated affine.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransformDelta {
    pub dx: f32,
    pub dy: f32,
    /// Multiplicative; 1.0 = unchanged.
    pub scale: f32,
    /// Radians, added.
    pub rotate: f32,
    pub toggle_flip_x: bool,
    pub toggle_flip_y: bool,
}

impl TransformDelta {
    pub fn translate(dx: f32, dy: f32) -> Self {
        Self {
            dx,
            dy,
            scale: 1.0,
            ..Default::default()
        }
    }
}

/// Fold a delta into an accumulated affine.
fn apply_delta(affine: &LayerAffine, delta: &TransformDelta) -> LayerAffine {
    let scale = if delta.scale == 0.0 { 1.0 } else { delta.scale };
    LayerAffine {
        tx: affine.tx + delta.dx,
        ty: affine.ty + delta.dy,
        scale: (affine.scale * scale).max(0.01),
        rotation: affine.rotation + delta.rotate,
        flip_x: affine.flip_x ^ delta.toggle_flip_x,
        flip_y: affine.flip_y ^ delta.toggle_flip_y,
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TransformUniforms {
    row0: [f32; 4],
    row1: [f32; 4],
    scale: [f32; 2],
    offset: [f32; 2],
    size: [f32; 2],
    _pad: [f32; 2],
}

struct TransformSession {
    layer_id: LayerId,
    /// Pre-transform pixels, captured exactly once at `begin`.
    captured: RgbaImage,
    scratch_bg: wgpu::BindGroup,
    _scratch: wgpu::Texture,
    affine: LayerAffine,
}

pub struct LayerTransform {
    pipeline: wgpu::RenderPipeline,
    uniform_bgl: wgpu::BindGroupLayout,
    sampler_linear: wgpu::Sampler,
    session: Option<TransformSession>,
}

impl LayerTransform {
    pub fn new(ctx: &GpuContext, layer_bgl: &wgpu::BindGroupLayout) -> Self {
        let device = &ctx.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("transform_shader"),
            source: wgpu::ShaderSource::Wgsl(crate::gpu::shaders::TRANSFORM_SHADER.into()),
        });

        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("transform_uniform_bgl"),
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
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("transform_pipeline_layout"),
            bind_group_layouts: &[&uniform_bgl, layer_bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("transform_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_transform",
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                // Flips mirror the quad; both windings must draw.
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_transform",
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
        });

        let sampler_linear = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("transform_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            pipeline,
            uniform_bgl,
            sampler_linear,
            session: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn active_layer(&self) -> Option<LayerId> {
        self.session.as_ref().map(|s| s.layer_id)
    }

    pub fn current_affine(&self) -> Option<LayerAffine> {
        self.session.as_ref().map(|s| s.affine)
    }

    /// Capture the pre-transform buffer and start a session.  Starting a
    /// new session while one is active is a caller bug the engine prevents.
    pub fn begin(
        &mut self,
        ctx: &GpuContext,
        layer_bgl: &wgpu::BindGroupLayout,
        layer: &Layer,
    ) -> Result<(), EngineError> {
        let captured = layer.pixels.clone();
        let (w, h) = (captured.width(), captured.height());

        let scratch = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("transform_capture"),
            size: wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let premul = premultiply_image(&captured);
        ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &scratch,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &premul,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * w),
                rows_per_image: Some(h),
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );

        let view = scratch.create_view(&wgpu::TextureViewDescriptor::default());
        let scratch_bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("transform_capture_bg"),
            layout: layer_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler_linear),
                },
            ],
        });

        self.session = Some(TransformSession {
            layer_id: layer.id,
            captured,
            scratch_bg,
            _scratch: scratch,
            affine: layer.transform,
        });
        Ok(())
    }

    /// Fold a delta into the session affine and render the preview into the
    /// layer's render target.  The CPU buffer is not touched.
    pub fn update(
        &mut self,
        ctx: &GpuContext,
        store: &GpuLayerStore,
        delta: &TransformDelta,
    ) -> Result<LayerAffine, EngineError> {
        let session = self.session.as_mut().ok_or(EngineError::NoActiveTransform)?;
        session.affine = apply_delta(&session.affine, delta);

        let target = store
            .texture(session.layer_id)
            .ok_or(EngineError::UnknownLayer(session.layer_id))?;

        let (w, h) = (session.captured.width(), session.captured.height());
        let m = session
            .affine
            .matrix(w as f32 * 0.5, h as f32 * 0.5);
        let uniforms = TransformUniforms {
            row0: [m[0], m[1], m[2], 0.0],
            row1: [m[3], m[4], m[5], 0.0],
            scale: [2.0 / w as f32, -2.0 / h as f32],
            offset: [-1.0, 1.0],
            size: [w as f32, h as f32],
            _pad: [0.0; 2],
        };

        let uniform_buf = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("transform_uniforms"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let uniform_bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("transform_uniform_bg"),
            layout: &self.uniform_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buf.as_entire_binding(),
            }],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("transform_preview_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("transform_preview_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &uniform_bg, &[]);
            pass.set_bind_group(1, &session.scratch_bg, &[]);
            pass.draw(0..6, 0..1);
        }
        ctx.submit_one(encoder);

        Ok(session.affine)
    }

    /// End the session for a commit: the engine takes over to bake the
    /// previewed texture into the CPU buffer and record history.
    pub fn finish(&mut self) -> Result<LayerId, EngineError> {
        self.session
            .take()
            .map(|s| s.layer_id)
            .ok_or(EngineError::NoActiveTransform)
    }

    /// End the session for an abort: hand back the captured pixels so the
    /// engine can restore the layer to its pre-transform state.
    pub fn abort(&mut self) -> Result<(LayerId, RgbaImage), EngineError> {
        self.session
            .take()
            .map(|s| (s.layer_id, s.captured))
            .ok_or(EngineError::NoActiveTransform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_accumulate() {
        let mut affine = LayerAffine::default();
        affine = apply_delta(&affine, &TransformDelta::translate(5.0, -3.0));
        affine = apply_delta(&affine, &TransformDelta::translate(2.0, 1.0));
        assert_eq!(affine.tx, 7.0);
        assert_eq!(affine.ty, -2.0);
    }

    #[test]
    fn scale_is_multiplicative_with_floor() {
        let mut affine = LayerAffine::default();
        let delta = TransformDelta {
            scale: 0.5,
            ..TransformDelta::translate(0.0, 0.0)
        };
        affine = apply_delta(&affine, &delta);
        affine = apply_delta(&affine, &delta);
        assert!((affine.scale - 0.25).abs() < 1e-6);

        // Never collapses to zero.
        for _ in 0..64 {
            affine = apply_delta(&affine, &delta);
        }
        assert!(affine.scale >= 0.01);
    }

    #[test]
    fn flips_toggle() {
        let delta = TransformDelta {
            scale: 1.0,
            toggle_flip_x: true,
            ..Default::default()
        };
        let a = apply_delta(&LayerAffine::default(), &delta);
        assert!(a.flip_x);
        let b = apply_delta(&a, &delta);
        assert!(!b.flip_x);
    }

    #[test]
    fn zero_scale_delta_means_unchanged() {
        // A default-initialized delta must not zero the scale out.
        let a = apply_delta(&LayerAffine::default(), &TransformDelta::default());
        assert_eq!(a.scale, 1.0);
    }
}
