// ============================================================================
// DAMAGE TRACKER — dirty-rect accumulation and GPU→CPU pixel sync
// ============================================================================
//
// One accumulating rect per canvas.  Draw calls extend it; `flush` runs a
// composite restricted to it and resets it, so a second flush with no new
// marks is a no-op.  `sync_to_cpu` pulls the affected region of a layer's
// supersampled texture back into the CPU-authoritative buffer — scoped to
// the rect, never the full canvas.
// ============================================================================

use image::RgbaImage;
use rayon::prelude::*;

use crate::canvas::{BlendMode, DirtyRect, Layer};
use crate::gpu::compositor::Compositor;
use crate::gpu::context::GpuContext;
use crate::gpu::layer_store::GpuLayerStore;
use crate::gpu::texture::LayerTexture;
use crate::gpu::align_copy_rect;

pub struct DamageTracker {
    rect: DirtyRect,
    /// Extra padding per mark, covering antialiased fringes.
    margin: f32,
}

impl DamageTracker {
    pub fn new(margin: f32) -> Self {
        Self {
            rect: DirtyRect::EMPTY,
            margin,
        }
    }

    /// Record a draw touching a disc around `(x, y)` in display pixels.
    pub fn mark(&mut self, x: f32, y: f32, radius: f32) {
        self.rect.include_circle(x, y, radius + self.margin);
    }

    /// Record a draw touching an arbitrary rect.
    pub fn mark_rect(&mut self, rect: &DirtyRect) {
        if !rect.is_empty() {
            let inflated = DirtyRect::from_bounds(
                rect.min_x - self.margin,
                rect.min_y - self.margin,
                rect.max_x + self.margin,
                rect.max_y + self.margin,
            );
            self.rect = self.rect.union(&inflated);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rect.is_empty()
    }

    pub fn peek(&self) -> &DirtyRect {
        &self.rect
    }

    /// Return the accumulated rect and reset to empty.
    pub fn take(&mut self) -> DirtyRect {
        std::mem::take(&mut self.rect)
    }

    /// Composite every draw call since the previous flush into the display
    /// target, restricted to the accumulated rect's device-pixel bounds.
    ///
    /// Idempotent: with no intervening `mark`, a second flush issues no GPU
    /// work at all.  Returns the flushed rect (empty if nothing happened).
    pub fn flush(
        &mut self,
        ctx: &GpuContext,
        compositor: &mut Compositor,
        layers: &[(f32, BlendMode, &LayerTexture)],
        canvas_width: u32,
        canvas_height: u32,
    ) -> DirtyRect {
        let rect = self.take();
        let (x, y, w, h) = rect.device_bounds(canvas_width, canvas_height);
        if w == 0 || h == 0 {
            return DirtyRect::EMPTY;
        }
        compositor.composite_all(ctx, layers, Some((x, y, w, h)));
        rect
    }

    /// Read the dirty region of a layer's supersampled texture back into
    /// its CPU pixel buffer.
    ///
    /// The readback itself performs the blocking queue flush (see
    /// `Compositor::readback_texture_region`), the downsample undoes the
    /// supersample factor on the CPU, and the straight-alpha conversion
    /// undoes the premultiply.  wgpu copies are top-row-first on both sides,
    /// so the row-order flip GL-based engines need is a deliberate no-op
    /// here.
    pub fn sync_to_cpu(
        ctx: &GpuContext,
        store: &GpuLayerStore,
        layer: &mut Layer,
        rect: &DirtyRect,
        staging: &mut Option<(wgpu::Buffer, u64)>,
    ) {
        let (dw, dh) = (layer.pixels.width(), layer.pixels.height());
        let (dx, dy, dwidth, dheight) = rect.device_bounds(dw, dh);
        if dwidth == 0 || dheight == 0 {
            return;
        }
        let Some(texture) = store.texture(layer.id) else {
            log_warn!("sync_to_cpu: layer {} has no texture", layer.id);
            return;
        };

        let factor = store.supersample_factor();
        let (iw, ih) = store.internal_size();

        // Internal-resolution footprint of the display rect, expanded to the
        // 256-byte row alignment wgpu requires for copies.
        let ix = (dx as f32 * factor).floor() as u32;
        let iy = (dy as f32 * factor).floor() as u32;
        let ix2 = (((dx + dwidth) as f32 * factor).ceil() as u32).min(iw);
        let iy2 = (((dy + dheight) as f32 * factor).ceil() as u32).min(ih);
        let (ax, ay, aw, ah) = align_copy_rect(ix, iy, ix2 - ix, iy2 - iy, iw, ih);
        if aw == 0 || ah == 0 {
            return;
        }

        let premul = Compositor::readback_texture_region(
            ctx,
            &texture.texture,
            ax,
            ay,
            aw,
            ah,
            staging,
        );
        if premul.is_empty() {
            return; // readback failed; logged downstream
        }

        box_downsample_into(
            &premul,
            (ax, ay, aw, ah),
            factor,
            &mut layer.pixels,
            (dx, dy, dwidth, dheight),
        );
    }
}

/// Average the supersampled premultiplied source block for each display
/// pixel of the target rect and store straight-alpha results.
///
/// `src_rect`/`dst_rect` are `(x, y, w, h)` in internal and display pixels
/// respectively; `src` rows are tightly packed at `src_rect.2 * 4` bytes.
pub(crate) fn box_downsample_into(
    src: &[u8],
    src_rect: (u32, u32, u32, u32),
    factor: f32,
    dst: &mut RgbaImage,
    dst_rect: (u32, u32, u32, u32),
) {
    let (sx, sy, sw, sh) = src_rect;
    let (dx, dy, dw, dh) = dst_rect;
    let dst_width = dst.width() as usize;

    let rows: Vec<(usize, &mut [u8])> = dst
        .par_chunks_mut(dst_width * 4)
        .enumerate()
        .skip(dy as usize)
        .take(dh as usize)
        .collect();

    rows.into_par_iter().for_each(|(row_y, row)| {
        let y0 = ((row_y as f32 * factor).floor() as i64 - sy as i64).max(0) as usize;
        let y1 = (((row_y + 1) as f32 * factor).ceil() as i64 - sy as i64)
            .clamp(y0 as i64 + 1, sh as i64) as usize;

        for px in dx..dx + dw {
            let x0 = ((px as f32 * factor).floor() as i64 - sx as i64).max(0) as usize;
            let x1 = (((px + 1) as f32 * factor).ceil() as i64 - sx as i64)
                .clamp(x0 as i64 + 1, sw as i64) as usize;

            let (mut r, mut g, mut b, mut a) = (0u32, 0u32, 0u32, 0u32);
            let count = ((x1 - x0) * (y1 - y0)) as u32;
            for iy in y0..y1 {
                let row_base = iy * sw as usize * 4;
                for ix in x0..x1 {
                    let i = row_base + ix * 4;
                    r += src[i] as u32;
                    g += src[i + 1] as u32;
                    b += src[i + 2] as u32;
                    a += src[i + 3] as u32;
                }
            }
            let (r, g, b, a) = (r / count, g / count, b / count, a / count);

            // Premultiplied → straight.
            let o = px as usize * 4;
            if a > 0 {
                row[o] = ((r * 255 + a / 2) / a).min(255) as u8;
                row[o + 1] = ((g * 255 + a / 2) / a).min(255) as u8;
                row[o + 2] = ((b * 255 + a / 2) / a).min(255) as u8;
            } else {
                row[o] = 0;
                row[o + 1] = 0;
                row[o + 2] = 0;
            }
            row[o + 3] = a as u8;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_resets_to_empty() {
        let mut tracker = DamageTracker::new(2.0);
        tracker.mark(50.0, 50.0, 10.0);
        assert!(!tracker.is_empty());
        let first = tracker.take();
        assert!(!first.is_empty());
        // Flush idempotence: nothing accumulated since.
        assert!(tracker.take().is_empty());
    }

    #[test]
    fn mark_inflates_by_margin() {
        let mut tracker = DamageTracker::new(3.0);
        tracker.mark(100.0, 100.0, 7.0);
        let r = tracker.peek();
        assert_eq!(r.min_x, 90.0);
        assert_eq!(r.max_x, 110.0);
    }

    #[test]
    fn marks_accumulate_via_union() {
        let mut tracker = DamageTracker::new(0.0);
        tracker.mark(10.0, 10.0, 5.0);
        tracker.mark(90.0, 40.0, 5.0);
        let r = tracker.take();
        assert_eq!(r.min_x, 5.0);
        assert_eq!(r.max_x, 95.0);
        assert_eq!(r.max_y, 45.0);
    }

    #[test]
    fn box_downsample_averages_2x2_blocks() {
        // 4×4 internal, factor 2 → 2×2 display. Solid opaque gray ramp.
        let mut src = Vec::new();
        for y in 0..4u32 {
            for x in 0..4u32 {
                let v = (x * 10 + y * 40) as u8;
                src.extend_from_slice(&[v, v, v, 255]);
            }
        }
        let mut dst = RgbaImage::new(2, 2);
        box_downsample_into(&src, (0, 0, 4, 4), 2.0, &mut dst, (0, 0, 2, 2));
        // Top-left block: values 0,10,40,50 → 25.
        assert_eq!(dst.get_pixel(0, 0).0, [25, 25, 25, 255]);
        // Bottom-right block: 100,110,140,150 → 125.
        assert_eq!(dst.get_pixel(1, 1).0, [125, 125, 125, 255]);
    }

    #[test]
    fn box_downsample_unpremultiplies() {
        // Half-transparent red, premultiplied: rgb already scaled by a.
        let src = vec![64, 0, 0, 128].repeat(4); // 2×2 block
        let mut dst = RgbaImage::new(1, 1);
        box_downsample_into(&src, (0, 0, 2, 2), 2.0, &mut dst, (0, 0, 1, 1));
        let px = dst.get_pixel(0, 0).0;
        assert_eq!(px[3], 128);
        // 64/128 ≈ 0.5 → straight red ≈ 127.
        assert!((px[0] as i32 - 127).abs() <= 1);
    }

    #[test]
    fn partial_rect_leaves_outside_pixels_alone() {
        let src = vec![255, 255, 255, 255].repeat(4); // 2×2 white block
        let mut dst = RgbaImage::new(3, 3);
        box_downsample_into(&src, (2, 2, 2, 2), 2.0, &mut dst, (1, 1, 1, 1));
        assert_eq!(dst.get_pixel(1, 1).0, [255, 255, 255, 255]);
        assert_eq!(dst.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(dst.get_pixel(2, 2).0, [0, 0, 0, 0]);
    }
}
