// ============================================================================
// GPU LAYER STORE — supersampled render targets, one per layer id
// ============================================================================
//
// Exclusive owner of per-layer GPU state.  Everything is keyed by LayerId,
// so stack reorders never touch GPU resources.  A layer whose allocation
// failed is quarantined in `disabled` — draw calls against it are rejected
// until `recreate_layer` succeeds — and never takes the engine down.
// ============================================================================

use std::collections::{HashMap, HashSet};

use image::RgbaImage;
use rayon::prelude::*;

use crate::canvas::{Layer, LayerId};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::stroke::RibbonMesh;

use super::brush::{BrushPipeline, BrushUniforms};
use super::context::GpuContext;
use super::pool::TexturePool;
use super::texture::LayerTexture;

/// Per-layer GPU state.
struct LayerSlot {
    texture: LayerTexture,
    /// Generation of the CPU buffer last uploaded; `u64::MAX` = never.
    uploaded_generation: u64,
}

pub struct GpuLayerStore {
    /// Texture+sampler bind group layout shared with the compositor's
    /// per-layer pipelines.
    layer_bgl: wgpu::BindGroupLayout,
    /// Per-layer sampling is nearest: smoothing is deferred entirely to the
    /// compositor's downsample pass so edges are not blurred twice.
    sampler_nearest: wgpu::Sampler,
    brush: BrushPipeline,
    pool: TexturePool,
    slots: HashMap<LayerId, LayerSlot>,
    disabled: HashSet<LayerId>,
    /// Stroke-scoped copy of the active layer's texture, taken at stroke
    /// begin so each frame can redraw the full path over clean state and a
    /// cancelled stroke can roll back without touching the CPU buffer.
    stroke_backup: Option<(LayerId, wgpu::Texture)>,
    display_size: (u32, u32),
    internal_size: (u32, u32),
    supersample_factor: f32,
    /// Reusable staging buffer for premultiply+upscale uploads.
    upload_scratch: Vec<u8>,
}

impl GpuLayerStore {
    pub fn new(ctx: &GpuContext, config: &EngineConfig) -> Self {
        let device = &ctx.device;

        let layer_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("layer_tex_bgl"),
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

        let sampler_nearest = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("layer_sampler_nearest"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            layer_bgl,
            sampler_nearest,
            brush: BrushPipeline::new(device),
            pool: TexturePool::new(),
            slots: HashMap::new(),
            disabled: HashSet::new(),
            stroke_backup: None,
            display_size: (config.canvas_width, config.canvas_height),
            internal_size: config.internal_size(),
            supersample_factor: config.supersample_factor,
            upload_scratch: Vec::new(),
        }
    }

    pub fn layer_bgl(&self) -> &wgpu::BindGroupLayout {
        &self.layer_bgl
    }

    pub fn internal_size(&self) -> (u32, u32) {
        self.internal_size
    }

    pub fn supersample_factor(&self) -> f32 {
        self.supersample_factor
    }

    pub fn texture(&self, id: LayerId) -> Option<&LayerTexture> {
        self.slots.get(&id).map(|s| &s.texture)
    }

    pub fn is_disabled(&self, id: LayerId) -> bool {
        self.disabled.contains(&id)
    }

    /// Ids of every layer currently holding GPU resources.
    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.slots.keys().copied().collect()
    }

    // ========================================================================
    // ALLOCATION
    // ========================================================================

    /// Idempotently allocate the layer's render target.  A failed allocation
    /// marks the layer disabled and reports the failure; the rest of the
    /// engine keeps running.
    pub fn ensure_layer(&mut self, ctx: &GpuContext, id: LayerId) -> Result<(), EngineError> {
        if self.slots.contains_key(&id) {
            return Ok(());
        }
        if self.disabled.contains(&id) {
            return Err(EngineError::LayerDisabled { layer: id });
        }

        let (w, h) = self.internal_size;
        if !ctx.supports_size(w, h) {
            log_err!("layer {id}: {w}x{h} exceeds device texture limit");
            self.disabled.insert(id);
            return Err(EngineError::GpuResourceFailure { layer: id });
        }

        let recycled = self.pool.acquire(w, h);
        let texture = match recycled {
            Some(t) => t,
            None => {
                // Out-of-memory here must not crash: trap it in an error
                // scope and quarantine the layer instead.
                ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
                let t = LayerTexture::create_texture(&ctx.device, w, h, "layer_target");
                if let Some(e) = pollster::block_on(ctx.device.pop_error_scope()) {
                    log_err!("layer {id}: texture allocation failed: {e}");
                    self.disabled.insert(id);
                    return Err(EngineError::GpuResourceFailure { layer: id });
                }
                t
            }
        };

        let texture = LayerTexture::from_texture(
            &ctx.device,
            &self.layer_bgl,
            &self.sampler_nearest,
            texture,
            w,
            h,
        );
        // Recycled textures carry stale pixels.
        texture.clear(&ctx.device, &ctx.queue);

        self.slots.insert(
            id,
            LayerSlot {
                texture,
                uploaded_generation: u64::MAX,
            },
        );
        Ok(())
    }

    /// Drop and re-allocate a disabled layer's resources.
    pub fn recreate_layer(&mut self, ctx: &GpuContext, id: LayerId) -> Result<(), EngineError> {
        self.delete_layer(id);
        self.disabled.remove(&id);
        self.ensure_layer(ctx, id)
    }

    /// Release the layer's GPU resources (into the pool for reuse).
    pub fn delete_layer(&mut self, id: LayerId) {
        if let Some(slot) = self.slots.remove(&id) {
            let LayerTexture { texture, width, height, .. } = slot.texture;
            self.pool.release(texture, width, height);
        }
        if self
            .stroke_backup
            .as_ref()
            .is_some_and(|(backup_id, _)| *backup_id == id)
        {
            self.stroke_backup = None;
        }
    }

    pub fn clear_layers(&mut self) {
        let ids: Vec<LayerId> = self.slots.keys().copied().collect();
        for id in ids {
            self.delete_layer(id);
        }
    }

    // ========================================================================
    // CPU → GPU SYNC
    // ========================================================================

    /// Whether the layer's texture is stale relative to its CPU buffer.
    pub fn needs_upload(&self, layer: &Layer) -> bool {
        self.slots
            .get(&layer.id)
            .map_or(true, |s| s.uploaded_generation != layer.gpu_generation)
    }

    /// Re-synchronize the GPU texture from the CPU buffer (after undo/redo,
    /// layer creation, merge-down).  Premultiplies and nearest-upscales by
    /// the supersample factor in one CPU pass.
    pub fn upload_layer(&mut self, ctx: &GpuContext, layer: &Layer) -> Result<(), EngineError> {
        self.ensure_layer(ctx, layer.id)?;

        let (iw, ih) = self.internal_size;
        let factor = self.supersample_factor;
        let src = &layer.pixels;
        let (sw, sh) = (src.width() as usize, src.height() as usize);
        let src_bytes = src.as_raw();

        self.upload_scratch.clear();
        self.upload_scratch.resize(iw as usize * ih as usize * 4, 0);
        self.upload_scratch
            .par_chunks_mut(iw as usize * 4)
            .enumerate()
            .for_each(|(y, row)| {
                let sy = ((y as f32 / factor) as usize).min(sh - 1);
                for x in 0..iw as usize {
                    let sx = ((x as f32 / factor) as usize).min(sw - 1);
                    let si = (sy * sw + sx) * 4;
                    let a = src_bytes[si + 3] as u32;
                    let o = x * 4;
                    row[o] = ((src_bytes[si] as u32 * a + 127) / 255) as u8;
                    row[o + 1] = ((src_bytes[si + 1] as u32 * a + 127) / 255) as u8;
                    row[o + 2] = ((src_bytes[si + 2] as u32 * a + 127) / 255) as u8;
                    row[o + 3] = a as u8;
                }
            });

        let slot = self
            .slots
            .get_mut(&layer.id)
            .ok_or(EngineError::UnknownLayer(layer.id))?;
        slot.texture.upload_full(&ctx.queue, &self.upload_scratch);
        slot.uploaded_generation = layer.gpu_generation;
        Ok(())
    }

    /// Record that the texture now matches the given generation (after the
    /// GPU side was the writer, e.g. a stroke synced back to the CPU).
    pub fn set_uploaded_generation(&mut self, id: LayerId, generation: u64) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.uploaded_generation = generation;
        }
    }

    // ========================================================================
    // DRAWING
    // ========================================================================

    /// Draw one stroke mesh into the layer's render target.  A single draw
    /// call; cost scales with the stroke's area.
    pub fn draw_mesh(
        &mut self,
        ctx: &GpuContext,
        id: LayerId,
        mesh: &RibbonMesh,
        color: [f32; 4],
        is_eraser: bool,
        tilt_fade: f32,
    ) -> Result<(), EngineError> {
        if self.disabled.contains(&id) {
            return Err(EngineError::LayerDisabled { layer: id });
        }
        let slot = self.slots.get(&id).ok_or(EngineError::UnknownLayer(id))?;

        let (dw, dh) = self.display_size;
        let uniforms = BrushUniforms::for_canvas(dw, dh, color, tilt_fade);

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("stroke_encoder"),
            });
        self.brush.draw(
            &ctx.device,
            &mut encoder,
            &slot.texture.view,
            mesh,
            &uniforms,
            is_eraser,
        );
        ctx.submit_one(encoder);
        Ok(())
    }

    // ========================================================================
    // STROKE SNAPSHOT — per-frame redraw base + cancel rollback
    // ========================================================================

    /// Copy the layer's current texture aside.  While a stroke is in flight
    /// the path is retessellated and redrawn over this copy every frame,
    /// which keeps flow alpha from stacking where segments overlap.
    pub fn begin_stroke_snapshot(
        &mut self,
        ctx: &GpuContext,
        id: LayerId,
    ) -> Result<(), EngineError> {
        let slot = self.slots.get(&id).ok_or(EngineError::UnknownLayer(id))?;
        let (w, h) = self.internal_size;

        let backup = self
            .pool
            .acquire(w, h)
            .unwrap_or_else(|| LayerTexture::create_texture(&ctx.device, w, h, "stroke_backup"));

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("stroke_snapshot_encoder"),
            });
        copy_full(&mut encoder, &slot.texture.texture, &backup, w, h);
        ctx.submit_one(encoder);

        self.stroke_backup = Some((id, backup));
        Ok(())
    }

    /// Restore the layer texture to its stroke-begin contents.
    pub fn restore_stroke_snapshot(&mut self, ctx: &GpuContext) -> Result<(), EngineError> {
        let Some((id, backup)) = &self.stroke_backup else {
            return Err(EngineError::NoActiveStroke);
        };
        let slot = self.slots.get(id).ok_or(EngineError::UnknownLayer(*id))?;
        let (w, h) = self.internal_size;

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("stroke_restore_encoder"),
            });
        copy_full(&mut encoder, backup, &slot.texture.texture, w, h);
        ctx.submit_one(encoder);
        Ok(())
    }

    /// Drop the snapshot (stroke committed or cancelled and restored).
    pub fn discard_stroke_snapshot(&mut self) {
        if let Some((_, backup)) = self.stroke_backup.take() {
            let (w, h) = self.internal_size;
            self.pool.release(backup, w, h);
        }
    }

    // ========================================================================
    // MEMORY / DEBUG
    // ========================================================================

    pub fn active_texture_count(&self) -> usize {
        self.slots.len()
    }

    pub fn active_texture_memory(&self) -> usize {
        let (w, h) = self.internal_size;
        self.slots.len() * w as usize * h as usize * 4
    }

    pub fn pooled_texture_memory(&self) -> usize {
        self.pool.pooled_memory_bytes()
    }
}

fn copy_full(
    encoder: &mut wgpu::CommandEncoder,
    src: &wgpu::Texture,
    dst: &wgpu::Texture,
    w: u32,
    h: u32,
) {
    encoder.copy_texture_to_texture(
        wgpu::ImageCopyTexture {
            texture: src,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyTexture {
            texture: dst,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::Extent3d {
            width: w,
            height: h,
            depth_or_array_layers: 1,
        },
    );
}

/// Premultiply a straight-alpha `RgbaImage` into packed bytes, no scaling.
/// Used for scratch textures that stay at display resolution.
pub fn premultiply_image(src: &RgbaImage) -> Vec<u8> {
    let mut out = src.as_raw().clone();
    out.par_chunks_mut(4).for_each(|px| {
        let a = px[3] as u32;
        px[0] = ((px[0] as u32 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u32 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u32 * a + 127) / 255) as u8;
    });
    out
}
