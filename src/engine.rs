// ============================================================================
// ENGINE — single-canvas coordinator
// ============================================================================
//
// Owns every component and passes them to each other explicitly; there is no
// global state, so multiple engines (multiple canvases) coexist freely.
//
// Frame model: the host calls `frame()` once per display refresh.  Between
// frames, pointer moves are coalesced to the latest sample (`stroke_to`
// overwrites the pending slot — the only batching in the system).  A frame
// then:
//   1. lazily re-uploads any layer whose CPU pixels are newer than its
//      texture (undo/redo, merge-down, cancelled transforms),
//   2. redraws the in-flight stroke: restore the stroke-begin snapshot,
//      retessellate the full path, one draw call,
//   3. flushes accumulated damage: region-restricted composite + downsample.
//
// Errors inside a frame are contained: degenerate geometry is skipped and
// counted, GPU failures disable the affected layer.  Nothing propagates out
// of the render loop.
// ============================================================================

use image::{Rgba, RgbaImage};

use crate::canvas::{BlendMode, DirtyRect, LayerId, LayerStack};
use crate::config::{BrushConfig, EngineConfig};
use crate::damage::DamageTracker;
use crate::error::EngineError;
use crate::gpu::compositor::Compositor;
use crate::gpu::context::GpuContext;
use crate::gpu::layer_store::GpuLayerStore;
use crate::history::HistoryManager;
use crate::stroke::{StrokeGeometryBuilder, StrokePath, StrokeSample};
use crate::transform::{LayerTransform, TransformDelta};

struct ActiveStroke {
    layer_id: LayerId,
    path: StrokePath,
    /// Latest pointer sample since the previous frame; newer moves replace
    /// older ones until `frame()` consumes it.
    pending: Option<StrokeSample>,
    color: [f32; 4],
    is_eraser: bool,
    /// Accumulated display-pixel bounds of everything drawn so far.
    bounds: DirtyRect,
}

pub struct Engine {
    config: EngineConfig,
    ctx: GpuContext,
    stack: LayerStack,
    store: GpuLayerStore,
    compositor: Compositor,
    damage: DamageTracker,
    history: HistoryManager,
    transform: LayerTransform,
    geometry: StrokeGeometryBuilder,
    active_stroke: Option<ActiveStroke>,
    /// Staging buffer cache for layer-texture readbacks (stroke/transform
    /// sync), separate from the compositor's display readback cache.
    sync_staging: Option<(wgpu::Buffer, u64)>,
}

impl Engine {
    pub fn new(config: EngineConfig, brush: BrushConfig) -> Result<Self, EngineError> {
        let config = config.validated()?;
        let brush = brush.validated()?;

        let ctx = GpuContext::new().ok_or(EngineError::GpuUnavailable)?;
        log_info!(
            "engine up: {}x{} @ {}x supersampling on {}",
            config.canvas_width,
            config.canvas_height,
            config.supersample_factor,
            ctx.adapter_name
        );

        let store = GpuLayerStore::new(&ctx, &config);
        let compositor = Compositor::new(&ctx, &config, store.layer_bgl());
        let transform = LayerTransform::new(&ctx, store.layer_bgl());
        let stack = LayerStack::new(config.canvas_width, config.canvas_height);
        let mut history = HistoryManager::new(config.max_snapshots);
        // Baseline snapshot: undo can always return to the blank canvas but
        // never past it.
        history.commit(&stack);

        let mut engine = Self {
            damage: DamageTracker::new(config.dirty_margin),
            geometry: StrokeGeometryBuilder::new(brush),
            config,
            ctx,
            stack,
            store,
            compositor,
            history,
            transform,
            active_stroke: None,
            sync_staging: None,
        };
        engine.mark_all_dirty();
        Ok(engine)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn brush_config(&self) -> &BrushConfig {
        self.geometry.config()
    }

    pub fn set_brush_config(&mut self, brush: BrushConfig) -> Result<(), EngineError> {
        self.geometry.set_config(brush.validated()?);
        Ok(())
    }

    pub fn layers(&self) -> &LayerStack {
        &self.stack
    }

    pub fn active_layer(&self) -> Option<LayerId> {
        self.stack.active().map(|l| l.id)
    }

    pub fn set_active_layer(&mut self, id: LayerId) -> Result<(), EngineError> {
        let idx = self.stack.index_of(id).ok_or(EngineError::UnknownLayer(id))?;
        self.stack.active_index = idx;
        Ok(())
    }

    /// Strokes skipped for degenerate geometry since engine creation.
    pub fn degenerate_stroke_count(&self) -> u64 {
        self.geometry.degenerate_count()
    }

    /// The display-resolution composite target, for host presentation.
    pub fn display_texture(&self) -> &wgpu::Texture {
        self.compositor.display_texture()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history_memory_bytes(&self) -> usize {
        self.history.memory_bytes()
    }

    // ========================================================================
    // STROKE LIFECYCLE
    // ========================================================================

    /// Start a stroke on the active layer.  An unfinished stroke or
    /// transform is rolled back first — a tool switch mid-gesture must never
    /// leak partial GPU state into what gets committed later.
    pub fn begin_stroke(
        &mut self,
        sample: StrokeSample,
        color: [f32; 4],
        is_eraser: bool,
    ) -> Result<(), EngineError> {
        if self.active_stroke.is_some() {
            self.cancel_stroke();
        }
        if self.transform.is_active() {
            self.cancel_transform()?;
        }

        let layer = self.stack.active().ok_or(EngineError::NoActiveStroke)?;
        let layer_id = layer.id;
        if self.store.is_disabled(layer_id) {
            return Err(EngineError::LayerDisabled { layer: layer_id });
        }

        // The texture must reflect the CPU buffer before we snapshot it.
        if self.store.needs_upload(layer) {
            self.store.upload_layer(&self.ctx, layer)?;
        }
        self.store.begin_stroke_snapshot(&self.ctx, layer_id)?;

        let mut path = StrokePath::new();
        path.push(sample);
        self.active_stroke = Some(ActiveStroke {
            layer_id,
            path,
            pending: None,
            color,
            is_eraser,
            bounds: DirtyRect::EMPTY,
        });
        Ok(())
    }

    /// Feed a pointer move.  Samples arriving faster than the frame rate
    /// replace each other; only the latest one is appended per frame.
    pub fn stroke_to(&mut self, sample: StrokeSample) -> Result<(), EngineError> {
        let stroke = self
            .active_stroke
            .as_mut()
            .ok_or(EngineError::NoActiveStroke)?;
        stroke.pending = Some(sample);
        Ok(())
    }

    /// Finish the stroke: final draw, GPU→CPU sync of the affected region,
    /// history commit.
    pub fn end_stroke(&mut self) -> Result<(), EngineError> {
        if self.active_stroke.is_none() {
            return Err(EngineError::NoActiveStroke);
        }
        // Fold in the last coalesced sample and draw.
        self.draw_active_stroke();

        let stroke = self
            .active_stroke
            .take()
            .expect("checked active stroke above");
        self.store.discard_stroke_snapshot();

        let margin = self.config.dirty_margin;
        let sync_rect = DirtyRect::from_bounds(
            stroke.bounds.min_x - margin,
            stroke.bounds.min_y - margin,
            stroke.bounds.max_x + margin,
            stroke.bounds.max_y + margin,
        );

        if !stroke.bounds.is_empty() {
            if let Some(layer) = self.stack.get_mut(stroke.layer_id) {
                DamageTracker::sync_to_cpu(
                    &self.ctx,
                    &self.store,
                    layer,
                    &sync_rect,
                    &mut self.sync_staging,
                );
                // CPU and GPU now agree; record that so the next frame does
                // not re-upload over the freshly drawn stroke.
                layer.invalidate_gpu();
                let generation = layer.gpu_generation;
                self.store.set_uploaded_generation(stroke.layer_id, generation);
            }
            self.damage.mark_rect(&stroke.bounds);
        }

        self.history.commit(&self.stack);
        Ok(())
    }

    /// Abort the stroke: the layer texture rolls back to its stroke-begin
    /// contents and nothing reaches the CPU buffer or history.
    pub fn cancel_stroke(&mut self) {
        let Some(stroke) = self.active_stroke.take() else {
            return;
        };
        if let Err(e) = self.store.restore_stroke_snapshot(&self.ctx) {
            log_err!("stroke rollback failed: {e}");
        }
        self.store.discard_stroke_snapshot();
        if !stroke.bounds.is_empty() {
            self.damage.mark_rect(&stroke.bounds);
        }
    }

    /// Retessellate and redraw the active stroke over its snapshot.
    /// Degenerate geometry (single sample, zero extent) is skipped silently.
    fn draw_active_stroke(&mut self) {
        let Some(stroke) = self.active_stroke.as_mut() else {
            return;
        };
        if let Some(sample) = stroke.pending.take() {
            stroke.path.push(sample);
        }
        if !stroke.path.is_drawable() {
            return;
        }

        let Some(mesh) = self.geometry.build(&stroke.path) else {
            return;
        };
        let Some((min_x, min_y, max_x, max_y)) = mesh.bounds() else {
            return;
        };

        if let Err(e) = self.store.restore_stroke_snapshot(&self.ctx) {
            log_err!("stroke redraw restore failed: {e}");
            return;
        }
        let tilt_fade = self.geometry.config().tilt_fade;
        if let Err(e) = self.store.draw_mesh(
            &self.ctx,
            stroke.layer_id,
            &mesh,
            stroke.color,
            stroke.is_eraser,
            tilt_fade,
        ) {
            log_err!("stroke draw failed: {e}");
            return;
        }

        let drawn = DirtyRect::from_bounds(min_x, min_y, max_x, max_y);
        stroke.bounds = stroke.bounds.union(&drawn);
        self.damage.mark_rect(&drawn);
    }

    // ========================================================================
    // FRAME
    // ========================================================================

    /// One display-refresh tick.  Returns the display-pixel rect that was
    /// recomposited (empty when nothing changed).
    pub fn frame(&mut self) -> DirtyRect {
        // 1. Lazy CPU→GPU re-uploads.
        let mut uploaded_any = false;
        for i in 0..self.stack.layers.len() {
            let layer = &self.stack.layers[i];
            if !layer.visible {
                continue;
            }
            if self.store.needs_upload(layer) {
                match self.store.upload_layer(&self.ctx, layer) {
                    Ok(()) => uploaded_any = true,
                    Err(e) => log_err!("layer upload failed: {e}"),
                }
            }
        }
        if uploaded_any {
            self.mark_all_dirty();
        }

        // 2. In-flight stroke redraw.
        self.draw_active_stroke();

        // 3. Restricted composite of everything marked since the last flush.
        let layers: Vec<_> = self
            .stack
            .layers
            .iter()
            .filter(|l| l.visible)
            .filter_map(|l| {
                self.store
                    .texture(l.id)
                    .map(|tex| (l.opacity, l.blend_mode, tex))
            })
            .collect();

        self.damage.flush(
            &self.ctx,
            &mut self.compositor,
            &layers,
            self.config.canvas_width,
            self.config.canvas_height,
        )
    }

    fn mark_all_dirty(&mut self) {
        self.damage.mark_rect(&DirtyRect::from_bounds(
            0.0,
            0.0,
            self.config.canvas_width as f32,
            self.config.canvas_height as f32,
        ));
    }

    // ========================================================================
    // HISTORY SURFACE
    // ========================================================================

    /// Snapshot the current canvas state.  The only producer of history.
    pub fn commit(&mut self) {
        self.history.commit(&self.stack);
    }

    /// Restore the previous snapshot.  In-flight gestures roll back first;
    /// textures re-upload lazily on the next frame.
    pub fn undo(&mut self) -> Result<(), EngineError> {
        self.cancel_stroke();
        if self.transform.is_active() {
            self.cancel_transform()?;
        }
        self.history.undo(&mut self.stack)?;
        self.prune_gpu_layers();
        self.mark_all_dirty();
        Ok(())
    }

    pub fn redo(&mut self) -> Result<(), EngineError> {
        self.cancel_stroke();
        if self.transform.is_active() {
            self.cancel_transform()?;
        }
        self.history.redo(&mut self.stack)?;
        self.prune_gpu_layers();
        self.mark_all_dirty();
        Ok(())
    }

    /// Drop GPU resources for layers that no longer exist after a restore.
    fn prune_gpu_layers(&mut self) {
        let dead: Vec<LayerId> = self
            .store
            .layer_ids()
            .into_iter()
            .filter(|id| self.stack.index_of(*id).is_none())
            .collect();
        for id in dead {
            self.store.delete_layer(id);
        }
    }

    // ========================================================================
    // LAYER CRUD
    // ========================================================================

    /// Insert a new empty layer above the active one.  Like every CRUD
    /// operation this does not commit; the host decides the undo granularity.
    pub fn add_layer(&mut self, name: impl Into<String>) -> LayerId {
        self.stack.add_layer(name)
    }

    pub fn delete_layer(&mut self, id: LayerId) -> Result<(), EngineError> {
        if self.stack.index_of(id).is_none() {
            return Err(EngineError::UnknownLayer(id));
        }
        if self.stack.layers.len() <= 1 {
            return Err(EngineError::LastLayer);
        }
        if self.active_stroke.as_ref().is_some_and(|s| s.layer_id == id) {
            self.cancel_stroke();
        }
        if self.transform.active_layer() == Some(id) {
            self.cancel_transform()?;
        }
        self.stack.remove_layer(id);
        self.store.delete_layer(id);
        self.mark_all_dirty();
        Ok(())
    }

    pub fn duplicate_layer(&mut self, id: LayerId) -> Result<LayerId, EngineError> {
        let new_id = self
            .stack
            .duplicate_layer(id)
            .ok_or(EngineError::UnknownLayer(id))?;
        self.mark_all_dirty();
        Ok(new_id)
    }

    pub fn reorder_layer(&mut self, id: LayerId, to: usize) -> Result<(), EngineError> {
        if !self.stack.reorder_layer(id, to) {
            return Err(EngineError::UnknownLayer(id));
        }
        self.mark_all_dirty();
        Ok(())
    }

    pub fn merge_down(&mut self, id: LayerId) -> Result<(), EngineError> {
        let removed = self
            .stack
            .merge_down(id)
            .ok_or(EngineError::UnknownLayer(id))?;
        self.store.delete_layer(removed);
        self.mark_all_dirty();
        Ok(())
    }

    pub fn set_layer_opacity(&mut self, id: LayerId, opacity: f32) -> Result<(), EngineError> {
        let layer = self.stack.get_mut(id).ok_or(EngineError::UnknownLayer(id))?;
        layer.opacity = opacity.clamp(0.0, 1.0);
        self.mark_all_dirty();
        Ok(())
    }

    pub fn set_layer_visible(&mut self, id: LayerId, visible: bool) -> Result<(), EngineError> {
        let layer = self.stack.get_mut(id).ok_or(EngineError::UnknownLayer(id))?;
        layer.visible = visible;
        self.mark_all_dirty();
        Ok(())
    }

    pub fn set_layer_blend_mode(&mut self, id: LayerId, mode: BlendMode) -> Result<(), EngineError> {
        let layer = self.stack.get_mut(id).ok_or(EngineError::UnknownLayer(id))?;
        layer.blend_mode = mode;
        self.mark_all_dirty();
        Ok(())
    }

    pub fn rename_layer(&mut self, id: LayerId, name: impl Into<String>) -> Result<(), EngineError> {
        let layer = self.stack.get_mut(id).ok_or(EngineError::UnknownLayer(id))?;
        layer.name = name.into();
        Ok(())
    }

    /// Replace a layer's pixels wholesale (paste, import).  Buffer must
    /// match the canvas dimensions.
    pub fn set_layer_pixels(&mut self, id: LayerId, pixels: RgbaImage) -> Result<(), EngineError> {
        if pixels.width() != self.config.canvas_width || pixels.height() != self.config.canvas_height
        {
            return Err(EngineError::SizeMismatch(format!(
                "pixel buffer is {}x{}, canvas is {}x{}",
                pixels.width(),
                pixels.height(),
                self.config.canvas_width,
                self.config.canvas_height
            )));
        }
        let layer = self.stack.get_mut(id).ok_or(EngineError::UnknownLayer(id))?;
        layer.pixels = pixels;
        layer.invalidate_gpu();
        self.mark_all_dirty();
        Ok(())
    }

    // ========================================================================
    // TRANSFORM SURFACE
    // ========================================================================

    /// Start an interactive transform of the active layer.
    pub fn begin_transform(&mut self) -> Result<(), EngineError> {
        self.cancel_stroke();
        if self.transform.is_active() {
            self.cancel_transform()?;
        }
        let layer = self.stack.active().ok_or(EngineError::NoActiveTransform)?;
        if self.store.needs_upload(layer) {
            self.store.upload_layer(&self.ctx, layer)?;
        }
        let layer = self.stack.active().ok_or(EngineError::NoActiveTransform)?;
        self.transform.begin(&self.ctx, self.store.layer_bgl(), layer)
    }

    /// Fold a delta into the preview.  CPU pixels stay untouched until
    /// commit.
    pub fn update_transform(&mut self, delta: TransformDelta) -> Result<(), EngineError> {
        self.transform.update(&self.ctx, &self.store, &delta)?;
        self.mark_all_dirty();
        Ok(())
    }

    /// Bake the previewed texture into the CPU buffer, reset the transform
    /// to identity and commit history.
    pub fn commit_transform(&mut self) -> Result<(), EngineError> {
        let layer_id = self.transform.finish()?;
        let full = DirtyRect::from_bounds(
            0.0,
            0.0,
            self.config.canvas_width as f32,
            self.config.canvas_height as f32,
        );
        if let Some(layer) = self.stack.get_mut(layer_id) {
            DamageTracker::sync_to_cpu(
                &self.ctx,
                &self.store,
                layer,
                &full,
                &mut self.sync_staging,
            );
            layer.transform = Default::default();
            layer.invalidate_gpu();
            let generation = layer.gpu_generation;
            self.store.set_uploaded_generation(layer_id, generation);
        }
        self.mark_all_dirty();
        self.history.commit(&self.stack);
        Ok(())
    }

    /// Abort the transform and restore the captured pre-transform pixels.
    pub fn cancel_transform(&mut self) -> Result<(), EngineError> {
        let (layer_id, captured) = self.transform.abort()?;
        if let Some(layer) = self.stack.get_mut(layer_id) {
            layer.pixels = captured;
            layer.invalidate_gpu();
        }
        self.mark_all_dirty();
        Ok(())
    }

    // ========================================================================
    // EXPORT SURFACE
    // ========================================================================

    /// The CPU-authoritative pixels of one layer (thumbnails, per-layer
    /// export, clipboard).
    pub fn layer_pixels(&self, id: LayerId) -> Result<&RgbaImage, EngineError> {
        self.stack
            .get(id)
            .map(|l| &l.pixels)
            .ok_or(EngineError::UnknownLayer(id))
    }

    /// Flattened composite of `region` (`None` = full canvas) as a
    /// straight-alpha image.  Forces a fresh composite of the region, so the
    /// result reflects all committed and in-flight drawing.
    pub fn composited_image(&mut self, region: Option<DirtyRect>) -> RgbaImage {
        let (dw, dh) = (self.config.canvas_width, self.config.canvas_height);
        let (x, y, w, h) = match region {
            Some(r) => r.device_bounds(dw, dh),
            None => (0, 0, dw, dh),
        };
        if w == 0 || h == 0 {
            return RgbaImage::new(0, 0);
        }

        let layers: Vec<_> = self
            .stack
            .layers
            .iter()
            .filter(|l| l.visible)
            .filter_map(|l| {
                self.store
                    .texture(l.id)
                    .map(|tex| (l.opacity, l.blend_mode, tex))
            })
            .collect();
        self.compositor
            .composite_all(&self.ctx, &layers, Some((x, y, w, h)));

        let premul = self.compositor.read_display_region(&self.ctx, x, y, w, h);
        let mut out = RgbaImage::new(w, h);
        if premul.len() == (w * h * 4) as usize {
            for (px, src) in out.pixels_mut().zip(premul.chunks_exact(4)) {
                let a = src[3] as u32;
                *px = if a > 0 {
                    Rgba([
                        ((src[0] as u32 * 255 + a / 2) / a).min(255) as u8,
                        ((src[1] as u32 * 255 + a / 2) / a).min(255) as u8,
                        ((src[2] as u32 * 255 + a / 2) / a).min(255) as u8,
                        a as u8,
                    ])
                } else {
                    Rgba([0, 0, 0, 0])
                };
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Engines in tests run on whatever adapter exists; wgpu's fallback
    /// rasterizer covers CI machines without a GPU.  No adapter at all →
    /// skip (return None).
    fn try_engine(w: u32, h: u32) -> Option<Engine> {
        let config = EngineConfig::new(w, h).expect("test config");
        Engine::new(config, BrushConfig::default()).ok()
    }

    fn sample(x: f32, y: f32, t: f64) -> StrokeSample {
        StrokeSample::new(x, y, 1.0, t)
    }

    #[test]
    fn identity_composite_reproduces_layer_pixels() {
        let Some(mut engine) = try_engine(32, 32) else {
            return;
        };
        let id = engine.active_layer().unwrap();
        let mut pixels = RgbaImage::new(32, 32);
        for (x, y, px) in pixels.enumerate_pixels_mut() {
            *px = Rgba([(x * 8) as u8, (y * 8) as u8, 7, 255]);
        }
        engine.set_layer_pixels(id, pixels.clone()).unwrap();
        engine.frame();

        let out = engine.composited_image(None);
        assert_eq!(out.dimensions(), (32, 32));
        for (a, b) in out.pixels().zip(pixels.pixels()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn half_opacity_blue_over_red_blends_per_over_math() {
        let Some(mut engine) = try_engine(8, 8) else {
            return;
        };
        let bottom = engine.active_layer().unwrap();
        engine
            .set_layer_pixels(bottom, RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255])))
            .unwrap();
        let top = engine.add_layer("blue");
        engine
            .set_layer_pixels(top, RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 255])))
            .unwrap();
        engine.set_layer_opacity(top, 0.5).unwrap();
        engine.frame();

        let out = engine.composited_image(None);
        let px = out.get_pixel(4, 4).0;
        // blend(red, blue, 0.5) — exact within u8 rounding.
        assert!((px[0] as i32 - 128).abs() <= 2, "r = {}", px[0]);
        assert!(px[1] <= 2, "g = {}", px[1]);
        assert!((px[2] as i32 - 128).abs() <= 2, "b = {}", px[2]);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn stroke_lands_in_layer_pixels_after_end() {
        let Some(mut engine) = try_engine(64, 64) else {
            return;
        };
        let id = engine.active_layer().unwrap();
        engine
            .begin_stroke(sample(10.0, 32.0, 0.0), [0.0, 0.0, 0.0, 1.0], false)
            .unwrap();
        engine.stroke_to(sample(54.0, 32.0, 16.0)).unwrap();
        engine.frame();
        engine.end_stroke().unwrap();

        let pixels = engine.layer_pixels(id).unwrap();
        // Stroke center must be fully inked; a corner must stay empty.
        assert!(pixels.get_pixel(32, 32).0[3] > 200);
        assert_eq!(pixels.get_pixel(1, 1).0[3], 0);
    }

    #[test]
    fn undo_redo_round_trip_restores_stroke_pixels() {
        let Some(mut engine) = try_engine(48, 48) else {
            return;
        };
        let id = engine.active_layer().unwrap();
        let blank: Vec<u8> = engine.layer_pixels(id).unwrap().as_raw().clone();

        engine
            .begin_stroke(sample(8.0, 24.0, 0.0), [0.1, 0.2, 0.3, 1.0], false)
            .unwrap();
        engine.stroke_to(sample(40.0, 24.0, 16.0)).unwrap();
        engine.frame();
        engine.end_stroke().unwrap();
        let inked: Vec<u8> = engine.layer_pixels(id).unwrap().as_raw().clone();
        assert_ne!(blank, inked);

        engine.undo().unwrap();
        assert_eq!(engine.layer_pixels(id).unwrap().as_raw(), &blank);

        engine.redo().unwrap();
        assert_eq!(engine.layer_pixels(id).unwrap().as_raw(), &inked);
    }

    #[test]
    fn undo_at_baseline_fails_and_leaves_state() {
        let Some(mut engine) = try_engine(16, 16) else {
            return;
        };
        assert!(!engine.can_undo());
        assert!(engine.undo().is_err());
        assert_eq!(engine.layers().layers.len(), 1);
    }

    #[test]
    fn cancelled_stroke_leaves_no_trace() {
        let Some(mut engine) = try_engine(48, 48) else {
            return;
        };
        let id = engine.active_layer().unwrap();
        let blank: Vec<u8> = engine.layer_pixels(id).unwrap().as_raw().clone();

        engine
            .begin_stroke(sample(8.0, 24.0, 0.0), [0.0, 0.0, 0.0, 1.0], false)
            .unwrap();
        engine.stroke_to(sample(40.0, 24.0, 16.0)).unwrap();
        engine.frame();
        engine.cancel_stroke();
        engine.frame();

        // CPU buffer untouched, no history entry beyond the baseline.
        assert_eq!(engine.layer_pixels(id).unwrap().as_raw(), &blank);
        assert!(!engine.can_undo());

        // And the display shows no stroke either.
        let out = engine.composited_image(None);
        assert!(out.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn eraser_reduces_alpha_without_tinting() {
        let Some(mut engine) = try_engine(48, 48) else {
            return;
        };
        let id = engine.active_layer().unwrap();
        engine
            .set_layer_pixels(id, RgbaImage::from_pixel(48, 48, Rgba([0, 200, 0, 255])))
            .unwrap();
        engine.frame();

        // Eraser color is ignored by the blend; pass something loud.
        engine
            .begin_stroke(sample(8.0, 24.0, 0.0), [1.0, 0.0, 1.0, 1.0], true)
            .unwrap();
        engine.stroke_to(sample(40.0, 24.0, 16.0)).unwrap();
        engine.frame();
        engine.end_stroke().unwrap();

        let pixels = engine.layer_pixels(id).unwrap();
        let hit = pixels.get_pixel(24, 24).0;
        assert!(hit[3] < 50, "alpha must drop, got {}", hit[3]);
        let untouched = pixels.get_pixel(24, 4).0;
        assert_eq!(untouched, [0, 200, 0, 255]);
        // No magenta bleeding anywhere.
        assert!(pixels.pixels().all(|p| p.0[0] < 50));
    }

    #[test]
    fn frame_without_marks_recomposites_nothing() {
        let Some(mut engine) = try_engine(16, 16) else {
            return;
        };
        // First frame flushes the initial full-canvas damage.
        let first = engine.frame();
        assert!(!first.is_empty());
        // Nothing marked since: the flush is a no-op.
        let second = engine.frame();
        assert!(second.is_empty());
    }

    #[test]
    fn transform_commit_bakes_and_cancel_restores() {
        let Some(mut engine) = try_engine(32, 32) else {
            return;
        };
        let id = engine.active_layer().unwrap();
        let mut pixels = RgbaImage::new(32, 32);
        // Opaque square in the top-left quadrant.
        for y in 2..10 {
            for x in 2..10 {
                pixels.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        engine.set_layer_pixels(id, pixels).unwrap();
        engine.frame();
        engine.commit();
        let before: Vec<u8> = engine.layer_pixels(id).unwrap().as_raw().clone();

        // Cancel path: translate, then abort.
        engine.begin_transform().unwrap();
        engine
            .update_transform(TransformDelta::translate(16.0, 16.0))
            .unwrap();
        engine.frame();
        engine.cancel_transform().unwrap();
        engine.frame();
        assert_eq!(engine.layer_pixels(id).unwrap().as_raw(), &before);

        // Commit path: the square moves and the move lands in CPU pixels.
        engine.begin_transform().unwrap();
        engine
            .update_transform(TransformDelta::translate(16.0, 16.0))
            .unwrap();
        engine.frame();
        engine.commit_transform().unwrap();

        let after = engine.layer_pixels(id).unwrap();
        assert!(after.get_pixel(22, 22).0[3] > 200, "square should have moved");
        assert!(after.get_pixel(6, 6).0[3] < 50, "old location should be clear");

        // And it is one undo step.
        engine.undo().unwrap();
        assert_eq!(engine.layer_pixels(id).unwrap().as_raw(), &before);
    }

    #[test]
    fn straight_full_pressure_stroke_covers_expected_width() {
        let Some(mut engine) = try_engine(128, 64) else {
            return;
        };
        let id = engine.active_layer().unwrap();
        engine
            .begin_stroke(sample(14.0, 32.0, 0.0), [0.0, 0.0, 0.0, 1.0], false)
            .unwrap();
        engine.stroke_to(sample(114.0, 32.0, 20.0)).unwrap();
        engine.frame();
        engine.end_stroke().unwrap();

        let pixels = engine.layer_pixels(id).unwrap();
        // Base diameter 10: rows 4px above and below the centerline are
        // inside the ribbon, rows 7px away are outside it.
        assert!(pixels.get_pixel(64, 28).0[3] > 128);
        assert!(pixels.get_pixel(64, 36).0[3] > 128);
        assert_eq!(pixels.get_pixel(64, 25).0[3], 0);
        assert_eq!(pixels.get_pixel(64, 39).0[3], 0);
        // Caps extend past the endpoints by about one radius.
        assert!(pixels.get_pixel(10, 32).0[3] > 0);
        assert_eq!(pixels.get_pixel(2, 32).0[3], 0);
    }
}
