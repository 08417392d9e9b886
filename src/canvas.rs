// ============================================================================
// CANVAS DATA MODEL — layers, blend modes, dirty rects
// ============================================================================
//
// CPU-authoritative state. The GPU side (gpu::GpuLayerStore) keeps one
// supersampled render target per LayerId; `Layer::pixels` is the buffer that
// crosses into history snapshots and export, and `gpu_generation` tracks
// which side is stale relative to the other.
// ============================================================================

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a layer, independent of stack position.
///
/// GPU textures are keyed by id rather than index, so reordering layers is a
/// pure `Vec` move with no GPU-side bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short prefix is enough for log lines.
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Add,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Add,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Add => "Add",
        }
    }

    /// Stable u8 for host-side serialization.
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Add => 3,
        }
    }

    /// Reconstruct from a u8 (unknown values fall back to Normal).
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Add,
            _ => BlendMode::Normal,
        }
    }

    /// CPU reference blend of premultiplied `src` over premultiplied `dst`.
    ///
    /// Matches the GPU blend-state factor pairs channel for channel; used by
    /// merge-down so a merged stack composites identically to the unmerged
    /// one.
    pub fn blend_premul(&self, dst: [f32; 4], src: [f32; 4]) -> [f32; 4] {
        let [sr, sg, sb, sa] = src;
        let [dr, dg, db, da] = dst;
        match self {
            // out = src + dst * (1 - src_alpha)
            BlendMode::Normal => [
                sr + dr * (1.0 - sa),
                sg + dg * (1.0 - sa),
                sb + db * (1.0 - sa),
                sa + da * (1.0 - sa),
            ],
            // out = src * dst + dst * (1 - src_alpha)
            BlendMode::Multiply => [
                sr * dr + dr * (1.0 - sa),
                sg * dg + dg * (1.0 - sa),
                sb * db + db * (1.0 - sa),
                sa + da * (1.0 - sa),
            ],
            // out = src + dst * (1 - src)
            BlendMode::Screen => [
                sr + dr * (1.0 - sr),
                sg + dg * (1.0 - sg),
                sb + db * (1.0 - sb),
                sa + da * (1.0 - sa),
            ],
            // out = src + dst
            BlendMode::Add => [
                (sr + dr).min(1.0),
                (sg + dg).min(1.0),
                (sb + db).min(1.0),
                (sa + da).min(1.0),
            ],
        }
    }
}

/// Affine placement of a layer: translate, uniform scale, rotate, flip.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerAffine {
    pub tx: f32,
    pub ty: f32,
    pub scale: f32,
    /// Rotation about the layer center, radians, positive = clockwise in
    /// top-left-origin pixel space.
    pub rotation: f32,
    pub flip_x: bool,
    pub flip_y: bool,
}

impl Default for LayerAffine {
    fn default() -> Self {
        Self {
            tx: 0.0,
            ty: 0.0,
            scale: 1.0,
            rotation: 0.0,
            flip_x: false,
            flip_y: false,
        }
    }
}

impl LayerAffine {
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Row-major 2×3 matrix mapping layer pixel coords through flip → scale
    /// → rotate (about `(cx, cy)`) → translate.
    pub fn matrix(&self, cx: f32, cy: f32) -> [f32; 6] {
        let sx = if self.flip_x { -self.scale } else { self.scale };
        let sy = if self.flip_y { -self.scale } else { self.scale };
        let (sin, cos) = self.rotation.sin_cos();
        // p' = R * S * (p - c) + c + t
        let a = cos * sx;
        let b = -sin * sy;
        let c = sin * sx;
        let d = cos * sy;
        [
            a,
            b,
            cx - a * cx - b * cy + self.tx,
            c,
            d,
            cy - c * cx - d * cy + self.ty,
        ]
    }

    /// Apply `matrix()` to a point.
    pub fn apply(&self, cx: f32, cy: f32, x: f32, y: f32) -> (f32, f32) {
        let m = self.matrix(cx, cy);
        (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
    }
}

pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    /// CPU-authoritative RGBA8 pixels at display resolution,
    /// straight (non-premultiplied) alpha.
    pub pixels: RgbaImage,
    pub transform: LayerAffine,
    /// Bumped whenever `pixels` changes on the CPU side. The GPU store
    /// re-uploads a layer whose generation is ahead of the texture's.
    pub gpu_generation: u64,
}

impl Layer {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: LayerId::new(),
            name: name.into(),
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            pixels: RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0])),
            transform: LayerAffine::default(),
            gpu_generation: 0,
        }
    }

    /// Mark the CPU pixels as the newer side; the texture re-uploads lazily.
    pub fn invalidate_gpu(&mut self) {
        self.gpu_generation = self.gpu_generation.wrapping_add(1);
    }

    pub fn memory_bytes(&self) -> usize {
        self.pixels.as_raw().len() + self.name.len()
    }
}

impl Clone for Layer {
    fn clone(&self) -> Self {
        // A clone is a duplicate layer: new identity, fresh GPU state.
        Self {
            id: LayerId::new(),
            name: self.name.clone(),
            visible: self.visible,
            opacity: self.opacity,
            blend_mode: self.blend_mode,
            pixels: self.pixels.clone(),
            transform: self.transform,
            gpu_generation: 0,
        }
    }
}

// ============================================================================
// LAYER STACK
// ============================================================================

/// Ordered layers; index 0 paints first (bottom of the stack).
pub struct LayerStack {
    pub layers: Vec<Layer>,
    pub active_index: usize,
    pub width: u32,
    pub height: u32,
}

impl LayerStack {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            layers: vec![Layer::new("Background", width, height)],
            active_index: 0,
            width,
            height,
        }
    }

    pub fn active(&self) -> Option<&Layer> {
        self.layers.get(self.active_index)
    }

    pub fn active_mut(&mut self) -> Option<&mut Layer> {
        self.layers.get_mut(self.active_index)
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    /// Insert a new empty layer above the active one and make it active.
    pub fn add_layer(&mut self, name: impl Into<String>) -> LayerId {
        let layer = Layer::new(name, self.width, self.height);
        let id = layer.id;
        let at = (self.active_index + 1).min(self.layers.len());
        self.layers.insert(at, layer);
        self.active_index = at;
        id
    }

    /// Remove a layer. The last remaining layer cannot be removed.
    pub fn remove_layer(&mut self, id: LayerId) -> Option<Layer> {
        if self.layers.len() <= 1 {
            return None;
        }
        let idx = self.index_of(id)?;
        let layer = self.layers.remove(idx);
        if self.active_index >= self.layers.len() {
            self.active_index = self.layers.len() - 1;
        }
        Some(layer)
    }

    /// Duplicate a layer directly above the original; returns the new id.
    pub fn duplicate_layer(&mut self, id: LayerId) -> Option<LayerId> {
        let idx = self.index_of(id)?;
        let copy = {
            let src = &self.layers[idx];
            let mut copy = src.clone();
            copy.name = format!("{} copy", src.name);
            copy
        };
        let new_id = copy.id;
        self.layers.insert(idx + 1, copy);
        self.active_index = idx + 1;
        Some(new_id)
    }

    /// Move a layer to a new stack position (clamped).
    pub fn reorder_layer(&mut self, id: LayerId, to: usize) -> bool {
        let Some(from) = self.index_of(id) else {
            return false;
        };
        let to = to.min(self.layers.len() - 1);
        if from == to {
            return true;
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        self.active_index = to;
        true
    }

    /// Blend a layer into the one below it and remove it.
    ///
    /// Uses the same premultiplied per-mode math as the GPU compositor, so
    /// the merged result renders identically. Returns the removed layer's
    /// id on success.
    pub fn merge_down(&mut self, id: LayerId) -> Option<LayerId> {
        let idx = self.index_of(id)?;
        if idx == 0 {
            return None;
        }
        let top = self.layers.remove(idx);
        let mode = top.blend_mode;
        let opacity = top.opacity.clamp(0.0, 1.0);
        let below = &mut self.layers[idx - 1];

        use rayon::prelude::*;
        let w = below.pixels.width() as usize;
        below
            .pixels
            .par_chunks_mut(w * 4)
            .zip(top.pixels.par_chunks(w * 4))
            .for_each(|(dst_row, src_row)| {
                for (dst, src) in dst_row.chunks_mut(4).zip(src_row.chunks(4)) {
                    let d = premultiply(dst);
                    let mut s = premultiply(src);
                    for ch in &mut s {
                        *ch *= opacity;
                    }
                    let out = mode.blend_premul(d, s);
                    unpremultiply(out, dst);
                }
            });

        below.invalidate_gpu();
        if self.active_index >= self.layers.len() {
            self.active_index = self.layers.len() - 1;
        }
        Some(top.id)
    }

    pub fn memory_bytes(&self) -> usize {
        self.layers.iter().map(Layer::memory_bytes).sum()
    }
}

fn premultiply(px: &[u8]) -> [f32; 4] {
    let a = px[3] as f32 / 255.0;
    [
        px[0] as f32 / 255.0 * a,
        px[1] as f32 / 255.0 * a,
        px[2] as f32 / 255.0 * a,
        a,
    ]
}

fn unpremultiply(p: [f32; 4], out: &mut [u8]) {
    let a = p[3].clamp(0.0, 1.0);
    let inv = if a > 0.0 { 1.0 / a } else { 0.0 };
    out[0] = (p[0] * inv * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
    out[1] = (p[1] * inv * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
    out[2] = (p[2] * inv * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
    out[3] = (a * 255.0 + 0.5) as u8;
}

// ============================================================================
// DIRTY RECT
// ============================================================================

/// Axis-aligned f32 rect in display-pixel space. The empty state is encoded
/// as `min > max`, so a fresh rect unions cleanly with anything.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirtyRect {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Default for DirtyRect {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl DirtyRect {
    pub const EMPTY: Self = Self {
        min_x: f32::INFINITY,
        min_y: f32::INFINITY,
        max_x: f32::NEG_INFINITY,
        max_y: f32::NEG_INFINITY,
    };

    pub fn from_bounds(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Grow to include a disc of `radius` around `(x, y)`.
    pub fn include_circle(&mut self, x: f32, y: f32, radius: f32) {
        self.min_x = self.min_x.min(x - radius);
        self.min_y = self.min_y.min(y - radius);
        self.max_x = self.max_x.max(x + radius);
        self.max_y = self.max_y.max(y + radius);
    }

    pub fn union(&self, other: &DirtyRect) -> DirtyRect {
        DirtyRect {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Integer device-pixel bounds clamped to `(width, height)`.
    /// Returns `(x, y, w, h)`; `w`/`h` are 0 for an empty or off-canvas rect.
    pub fn device_bounds(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        if self.is_empty() {
            return (0, 0, 0, 0);
        }
        let x0 = self.min_x.floor().max(0.0) as u32;
        let y0 = self.min_y.floor().max(0.0) as u32;
        let x1 = (self.max_x.ceil().max(0.0) as u32).min(width);
        let y1 = (self.max_y.ceil().max(0.0) as u32).min(height);
        (
            x0.min(width),
            y0.min(height),
            x1.saturating_sub(x0),
            y1.saturating_sub(y0),
        )
    }

    /// Scale by a factor (for display → supersampled coordinates).
    pub fn scaled(&self, factor: f32) -> DirtyRect {
        if self.is_empty() {
            return *self;
        }
        DirtyRect {
            min_x: self.min_x * factor,
            min_y: self.min_y * factor,
            max_x: self.max_x * factor,
            max_y: self.max_y * factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rect_unions_cleanly() {
        let mut r = DirtyRect::EMPTY;
        assert!(r.is_empty());
        r.include_circle(10.0, 20.0, 5.0);
        assert!(!r.is_empty());
        assert_eq!(r.min_x, 5.0);
        assert_eq!(r.max_y, 25.0);
    }

    #[test]
    fn device_bounds_clamp_to_canvas() {
        let mut r = DirtyRect::EMPTY;
        r.include_circle(2.0, 2.0, 10.0);
        let (x, y, w, h) = r.device_bounds(100, 50);
        assert_eq!((x, y), (0, 0));
        assert_eq!((w, h), (12, 12));
    }

    #[test]
    fn off_canvas_rect_is_zero_sized() {
        let mut r = DirtyRect::EMPTY;
        r.include_circle(-50.0, -50.0, 5.0);
        let (_, _, w, h) = r.device_bounds(100, 100);
        assert_eq!((w, h), (0, 0));
    }

    #[test]
    fn blend_normal_matches_over_math() {
        // 50% blue over opaque red.
        let dst = [1.0, 0.0, 0.0, 1.0];
        let src = [0.0, 0.0, 0.5, 0.5]; // premultiplied
        let out = BlendMode::Normal.blend_premul(dst, src);
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[2] - 0.5).abs() < 1e-6);
        assert!((out[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn blend_mode_u8_round_trip() {
        for &m in BlendMode::all() {
            assert_eq!(BlendMode::from_u8(m.to_u8()), m);
        }
        assert_eq!(BlendMode::from_u8(200), BlendMode::Normal);
    }

    #[test]
    fn add_layer_inserts_above_active() {
        let mut stack = LayerStack::new(4, 4);
        let id = stack.add_layer("Ink");
        assert_eq!(stack.layers.len(), 2);
        assert_eq!(stack.active_index, 1);
        assert_eq!(stack.layers[1].id, id);
    }

    #[test]
    fn cannot_remove_last_layer() {
        let mut stack = LayerStack::new(4, 4);
        let id = stack.layers[0].id;
        assert!(stack.remove_layer(id).is_none());
    }

    #[test]
    fn reorder_moves_by_id() {
        let mut stack = LayerStack::new(4, 4);
        let a = stack.layers[0].id;
        let b = stack.add_layer("b");
        assert!(stack.reorder_layer(b, 0));
        assert_eq!(stack.layers[0].id, b);
        assert_eq!(stack.layers[1].id, a);
    }

    #[test]
    fn merge_down_normal_opaque_top_wins() {
        let mut stack = LayerStack::new(2, 1);
        stack.layers[0]
            .pixels
            .put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        let top = stack.add_layer("top");
        stack
            .get_mut(top)
            .unwrap()
            .pixels
            .put_pixel(0, 0, Rgba([0, 0, 255, 255]));
        stack.merge_down(top).unwrap();
        assert_eq!(stack.layers.len(), 1);
        assert_eq!(
            *stack.layers[0].pixels.get_pixel(0, 0),
            Rgba([0, 0, 255, 255])
        );
    }

    #[test]
    fn affine_identity_is_noop() {
        let t = LayerAffine::default();
        assert!(t.is_identity());
        let (x, y) = t.apply(50.0, 50.0, 12.0, 34.0);
        assert!((x - 12.0).abs() < 1e-5);
        assert!((y - 34.0).abs() < 1e-5);
    }

    #[test]
    fn affine_rotation_about_center() {
        let t = LayerAffine {
            rotation: std::f32::consts::FRAC_PI_2,
            ..Default::default()
        };
        // Quarter turn about (50, 50): (60, 50) → (50, 60).
        let (x, y) = t.apply(50.0, 50.0, 60.0, 50.0);
        assert!((x - 50.0).abs() < 1e-4);
        assert!((y - 60.0).abs() < 1e-4);
    }
}
