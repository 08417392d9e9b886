// ============================================================================
// COMPOSITOR — blend-mode layer composition + downsample + readback
// ============================================================================
//
// Two render targets, both owned here:
//
//   * accumulator — supersampled, persistent between flushes.  Restricted
//     composite passes only rewrite the scissored dirty region; everything
//     outside it is guaranteed untouched.
//   * display     — logical resolution.  Filled by the downsample pass,
//     which is the single smoothing step in the pipeline.
//
// Blend modes are fixed-function: one pipeline per mode, differing only in
// the blend factor pair.  All textures carry premultiplied alpha, so the
// factor pairs are the textbook ones:
//
//   normal    color (One, 1-SrcA)    multiply  color (Dst, 1-SrcA)
//   screen    color (One, 1-Src)     add       color (One, One)
// ============================================================================

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::canvas::BlendMode;
use crate::config::EngineConfig;

use super::context::GpuContext;
use super::texture::LayerTexture;

/// Per-layer uniform: opacity only; blend math is in the pipeline state.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LayerUniforms {
    opacity: f32,
    _pad: [f32; 3],
}

pub struct Compositor {
    /// One composite pipeline per blend mode, indexed by `BlendMode::to_u8`.
    pub mode_pipelines: [wgpu::RenderPipeline; 4],
    pub layer_uniform_bgl: wgpu::BindGroupLayout,

    pub clear_pipeline: wgpu::RenderPipeline,

    pub downsample_pipeline: wgpu::RenderPipeline,
    pub downsample_bgl: wgpu::BindGroupLayout,
    downsample_bg: wgpu::BindGroup,
    pub sampler_linear: wgpu::Sampler,

    pub accumulator: wgpu::Texture,
    accumulator_view: wgpu::TextureView,
    display: wgpu::Texture,
    display_view: wgpu::TextureView,

    internal_size: (u32, u32),
    display_size: (u32, u32),

    /// Cached per-layer uniform buffers and bind groups, reused across
    /// frames via `queue.write_buffer()`.
    cached_layer_slots: Vec<(wgpu::Buffer, wgpu::BindGroup)>,
    /// Cached GPU staging buffer for readback.
    cached_staging: Option<(wgpu::Buffer, u64)>,
}

impl Compositor {
    pub fn new(ctx: &GpuContext, config: &EngineConfig, layer_bgl: &wgpu::BindGroupLayout) -> Self {
        let device = &ctx.device;
        let format = wgpu::TextureFormat::Rgba8Unorm;
        let internal_size = config.internal_size();
        let display_size = (config.canvas_width, config.canvas_height);

        // ================================================================
        // COMPOSITE PIPELINES (one per blend mode)
        // ================================================================
        let composite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("composite_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::COMPOSITE_SHADER.into()),
        });

        let layer_uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("layer_uniform_bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let composite_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("composite_pipeline_layout"),
            bind_group_layouts: &[&layer_uniform_bgl, layer_bgl],
            push_constant_ranges: &[],
        });

        let make_composite = |label: &str, blend: wgpu::BlendState| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&composite_layout),
                vertex: wgpu::VertexState {
                    module: &composite_shader,
                    entry_point: "vs_composite",
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &composite_shader,
                    entry_point: "fs_composite",
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                multiview: None,
            })
        };

        let over_alpha = wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        };

        let mode_pipelines = [
            // Normal: premultiplied src-over.
            make_composite(
                "composite_normal",
                wgpu::BlendState {
                    color: over_alpha,
                    alpha: over_alpha,
                },
            ),
            // Multiply: src*dst, with over-style alpha.
            make_composite(
                "composite_multiply",
                wgpu::BlendState {
                    color: wgpu::BlendComponent {
                        src_factor: wgpu::BlendFactor::Dst,
                        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                        operation: wgpu::BlendOperation::Add,
                    },
                    alpha: over_alpha,
                },
            ),
            // Screen: s + d(1-s).
            make_composite(
                "composite_screen",
                wgpu::BlendState {
                    color: wgpu::BlendComponent {
                        src_factor: wgpu::BlendFactor::One,
                        dst_factor: wgpu::BlendFactor::OneMinusSrc,
                        operation: wgpu::BlendOperation::Add,
                    },
                    alpha: over_alpha,
                },
            ),
            // Add: saturating sum (format clamps).
            make_composite(
                "composite_add",
                wgpu::BlendState {
                    color: wgpu::BlendComponent {
                        src_factor: wgpu::BlendFactor::One,
                        dst_factor: wgpu::BlendFactor::One,
                        operation: wgpu::BlendOperation::Add,
                    },
                    alpha: wgpu::BlendComponent {
                        src_factor: wgpu::BlendFactor::One,
                        dst_factor: wgpu::BlendFactor::One,
                        operation: wgpu::BlendOperation::Add,
                    },
                },
            ),
        ];

        // ================================================================
        // CLEAR PIPELINE (scissored region reset)
        // ================================================================
        let clear_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("clear_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::CLEAR_SHADER.into()),
        });
        let clear_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("clear_pipeline_layout"),
            bind_group_layouts: &[],
            push_constant_ranges: &[],
        });
        let clear_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("clear_pipeline"),
            layout: Some(&clear_layout),
            vertex: wgpu::VertexState {
                module: &clear_shader,
                entry_point: "vs_clear",
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &clear_shader,
                entry_point: "fs_clear",
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None, // Replace
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
        });

        // ================================================================
        // RENDER TARGETS
        // ================================================================
        let target_usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        let make_target = |label: &str, (w, h): (u32, u32)| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: w,
                    height: h,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: target_usage,
                view_formats: &[],
            })
        };
        let accumulator = make_target("composite_accumulator", internal_size);
        let accumulator_view = accumulator.create_view(&wgpu::TextureViewDescriptor::default());
        let display = make_target("display_target", display_size);
        let display_view = display.create_view(&wgpu::TextureViewDescriptor::default());

        // ================================================================
        // DOWNSAMPLE PIPELINE
        // ================================================================
        let downsample_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("downsample_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::DOWNSAMPLE_SHADER.into()),
        });

        let downsample_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("downsample_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let downsample_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("downsample_pipeline_layout"),
            bind_group_layouts: &[&downsample_bgl],
            push_constant_ranges: &[],
        });

        let downsample_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("downsample_pipeline"),
            layout: Some(&downsample_layout),
            vertex: wgpu::VertexState {
                module: &downsample_shader,
                entry_point: "vs_downsample",
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &downsample_shader,
                entry_point: "fs_downsample",
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None, // Replace: the display target mirrors the accumulator
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
        });

        let sampler_linear = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("downsample_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let downsample_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("downsample_bg"),
            layout: &downsample_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&accumulator_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler_linear),
                },
            ],
        });

        Self {
            mode_pipelines,
            layer_uniform_bgl,
            clear_pipeline,
            downsample_pipeline,
            downsample_bgl,
            downsample_bg,
            sampler_linear,
            accumulator,
            accumulator_view,
            display,
            display_view,
            internal_size,
            display_size,
            cached_layer_slots: Vec::new(),
            cached_staging: None,
        }
    }

    pub fn display_texture(&self) -> &wgpu::Texture {
        &self.display
    }

    pub fn display_view(&self) -> &wgpu::TextureView {
        &self.display_view
    }

    // ========================================================================
    // COMPOSITION
    // ========================================================================

    /// Composite `layers` (bottom→top, pre-filtered to visible ones) into
    /// the accumulator and downsample into the display target, restricted
    /// to `region` in display pixels (`None` = full canvas).
    ///
    /// Ordering is strictly the slice order.  Pixels outside the region are
    /// untouched in both targets.
    pub fn composite_all(
        &mut self,
        ctx: &GpuContext,
        layers: &[(f32, BlendMode, &LayerTexture)],
        region: Option<(u32, u32, u32, u32)>,
    ) {
        let (dw, dh) = self.display_size;
        let (rx, ry, rw, rh) = match region {
            Some(r) => r,
            None => (0, 0, dw, dh),
        };
        if rw == 0 || rh == 0 {
            return;
        }

        let device = &ctx.device;
        let queue = &ctx.queue;

        // Clamp to the canvas, then derive the supersampled scissor.
        let rx = rx.min(dw);
        let ry = ry.min(dh);
        let rw = rw.min(dw - rx);
        let rh = rh.min(dh - ry);
        let (iw, ih) = self.internal_size;
        let factor = iw as f32 / dw as f32;
        let sx = ((rx as f32 * factor).floor() as u32).min(iw);
        let sy = ((ry as f32 * factor).floor() as u32).min(ih);
        let sw = (((rx + rw) as f32 * factor).ceil() as u32)
            .min(iw)
            .saturating_sub(sx);
        let sh = (((ry + rh) as f32 * factor).ceil() as u32)
            .min(ih)
            .saturating_sub(sy);
        if rw == 0 || rh == 0 || sw == 0 || sh == 0 {
            return;
        }

        // Grow the cached uniform slot list to the layer count.
        for _ in self.cached_layer_slots.len()..layers.len() {
            let buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("layer_uniform_buf"),
                contents: bytemuck::bytes_of(&LayerUniforms {
                    opacity: 1.0,
                    _pad: [0.0; 3],
                }),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("layer_uniform_bg"),
                layout: &self.layer_uniform_bgl,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buf.as_entire_binding(),
                }],
            });
            self.cached_layer_slots.push((buf, bg));
        }
        for (i, (opacity, _, _)) in layers.iter().enumerate() {
            queue.write_buffer(
                &self.cached_layer_slots[i].0,
                0,
                bytemuck::bytes_of(&LayerUniforms {
                    opacity: opacity.clamp(0.0, 1.0),
                    _pad: [0.0; 3],
                }),
            );
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("composite_encoder"),
        });

        // ---- Pass 1: scissored composite into the accumulator ----
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.accumulator_view,
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
            pass.set_scissor_rect(sx, sy, sw, sh);

            // Region reset, then every visible layer bottom→top.
            pass.set_pipeline(&self.clear_pipeline);
            pass.draw(0..6, 0..1);

            for (i, (_, mode, tex)) in layers.iter().enumerate() {
                pass.set_pipeline(&self.mode_pipelines[mode.to_u8() as usize]);
                pass.set_bind_group(0, &self.cached_layer_slots[i].1, &[]);
                pass.set_bind_group(1, &tex.bind_group, &[]);
                pass.draw(0..6, 0..1);
            }
        }

        // ---- Pass 2: downsample the region into the display target ----
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("downsample_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.display_view,
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
            pass.set_scissor_rect(rx, ry, rw, rh);
            pass.set_pipeline(&self.downsample_pipeline);
            pass.set_bind_group(0, &self.downsample_bg, &[]);
            pass.draw(0..6, 0..1);
        }

        queue.submit(std::iter::once(encoder.finish()));
    }

    // ========================================================================
    // READBACK
    // ========================================================================

    /// Read a display-target region back as packed premultiplied RGBA.
    pub fn read_display_region(
        &mut self,
        ctx: &GpuContext,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Vec<u8> {
        let display = &self.display;
        Self::readback_texture_region(ctx, display, x, y, w, h, &mut self.cached_staging)
    }

    pub(crate) fn aligned_bytes_per_row(width: u32) -> u32 {
        let unaligned = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        unaligned.div_ceil(align) * align
    }

    /// Read back a sub-region of a texture as packed RGBA bytes.
    ///
    /// Submits the copy and blocks on the buffer map: the blocking poll is
    /// the command-queue flush that guarantees the read observes every draw
    /// submitted before it.  Reading without it returns half-rendered
    /// geometry, which shows up as visible distortion — correctness, not
    /// tuning.
    pub fn readback_texture_region(
        ctx: &GpuContext,
        texture: &wgpu::Texture,
        src_x: u32,
        src_y: u32,
        region_w: u32,
        region_h: u32,
        cached_staging: &mut Option<(wgpu::Buffer, u64)>,
    ) -> Vec<u8> {
        let device = &ctx.device;
        let queue = &ctx.queue;

        let bytes_per_row = Self::aligned_bytes_per_row(region_w);
        let buffer_size = (bytes_per_row as u64) * (region_h as u64);

        // Reuse the cached staging buffer if it is large enough.
        let need_new = match cached_staging {
            Some((_, sz)) if *sz >= buffer_size => false,
            _ => true,
        };
        if need_new {
            let new_buf = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback_staging"),
                size: buffer_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            *cached_staging = Some((new_buf, buffer_size));
        }
        let staging = &cached_staging.as_ref().expect("staging buffer just ensured").0;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_encoder"),
        });

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: src_x,
                    y: src_y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(region_h),
                },
            },
            wgpu::Extent3d {
                width: region_w,
                height: region_h,
                depth_or_array_layers: 1,
            },
        );

        queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..buffer_size);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log_err!("readback map error: {e:?}");
                return vec![];
            }
            Err(e) => {
                log_err!("readback channel error: {e:?}");
                return vec![];
            }
        }

        let mapped = slice.get_mapped_range();
        let actual_row = region_w as usize * 4;

        let mut result = Vec::with_capacity(actual_row * region_h as usize);
        for y in 0..region_h as usize {
            let start = y * bytes_per_row as usize;
            result.extend_from_slice(&mapped[start..start + actual_row]);
        }

        drop(mapped);
        staging.unmap();

        result
    }
}
