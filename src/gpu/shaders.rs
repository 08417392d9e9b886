// ============================================================================
// GPU SHADERS — all WGSL code kept inline for containment
// ============================================================================

// ============================================================================
// BRUSH SHADER — rasterizes one triangulated stroke ribbon
// ============================================================================
//
// The only pipeline in the engine with a real vertex buffer: position,
// per-vertex flow alpha and stylus tilt, 5 floats per vertex.  The vertex
// stage maps supersampled-canvas pixels to NDC; the fragment stage emits the
// premultiplied brush color scaled by flow (and optionally thinned by tilt).
// Cost is proportional to the stroke's triangle area, not the canvas.
pub const BRUSH_SHADER: &str = r#"
struct BrushUniforms {
    // Canvas-pixel → NDC: ndc = pos * scale + offset.
    scale: vec2<f32>,
    offset: vec2<f32>,
    // Straight-alpha brush color; premultiplied in the fragment stage.
    color: vec4<f32>,
    // x = tilt thinning strength [0,1]; yzw unused padding.
    params: vec4<f32>,
};

@group(0) @binding(0) var<uniform> u: BrushUniforms;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) flow: f32,
    @location(2) tilt: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) flow: f32,
    @location(1) tilt: vec2<f32>,
};

@vertex
fn vs_brush(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(in.position * u.scale + u.offset, 0.0, 1.0);
    out.flow = in.flow;
    out.tilt = in.tilt;
    return out;
}

@fragment
fn fs_brush(in: VertexOutput) -> @location(0) vec4<f32> {
    let thinning = 1.0 - u.params.x * clamp(length(in.tilt), 0.0, 1.0);
    let a = u.color.a * in.flow * thinning;
    return vec4<f32>(u.color.rgb * a, a);
}
"#;

// ============================================================================
// COMPOSITE SHADER — one full-quad pass per layer
// ============================================================================
//
// Blend-mode math lives in the pipeline's fixed-function blend state, not
// here: the fragment stage only samples the layer and applies its opacity.
// Layer textures hold premultiplied alpha, so scaling all four channels by
// opacity is the correct fade.  One pipeline per blend mode shares this
// module.
pub const COMPOSITE_SHADER: &str = r#"
struct LayerUniforms {
    opacity: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

@group(0) @binding(0) var<uniform> layer: LayerUniforms;
@group(1) @binding(0) var layer_texture: texture_2d<f32>;
@group(1) @binding(1) var layer_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_composite(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let pos = positions[vi];
    var out: VertexOutput;
    out.position = vec4<f32>(pos.x * 2.0 - 1.0, 1.0 - pos.y * 2.0, 0.0, 1.0);
    out.uv = pos;
    return out;
}

@fragment
fn fs_composite(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(layer_texture, layer_sampler, in.uv) * layer.opacity;
}
"#;

// ============================================================================
// CLEAR SHADER — scissored region clear
// ============================================================================
//
// `LoadOp::Clear` wipes the whole attachment; restricted composite passes
// must only reset the dirty region.  A full quad + scissor + Replace blend
// does exactly that.
pub const CLEAR_SHADER: &str = r#"
@vertex
fn vs_clear(@builtin(vertex_index) vi: u32) -> @builtin(position) vec4<f32> {
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>( 1.0, -1.0),
        vec2<f32>(-1.0,  1.0),
        vec2<f32>(-1.0,  1.0),
        vec2<f32>( 1.0, -1.0),
        vec2<f32>( 1.0,  1.0),
    );
    return vec4<f32>(positions[vi], 0.0, 1.0);
}

@fragment
fn fs_clear() -> @location(0) vec4<f32> {
    return vec4<f32>(0.0, 0.0, 0.0, 0.0);
}
"#;

// ============================================================================
// DOWNSAMPLE SHADER — supersampled accumulator → display resolution
// ============================================================================
//
// A single linear-filtered sample at the destination texel center averages
// the full source footprint exactly at integer factors (2× = a 2×2 box).
// This is the one smoothing step in the pipeline; per-layer sampling stays
// nearest so edges aren't blurred twice.
pub const DOWNSAMPLE_SHADER: &str = r#"
@group(0) @binding(0) var src_texture: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_downsample(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let pos = positions[vi];
    var out: VertexOutput;
    out.position = vec4<f32>(pos.x * 2.0 - 1.0, 1.0 - pos.y * 2.0, 0.0, 1.0);
    out.uv = pos;
    return out;
}

@fragment
fn fs_downsample(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(src_texture, src_sampler, in.uv);
}
"#;

// ============================================================================
// TRANSFORM PREVIEW SHADER — captured layer pixels × affine matrix
// ============================================================================
//
// Draws the captured (pre-transform) layer texture as a quad whose corners
// run through the interactive affine matrix.  The target is the layer's own
// render texture; the CPU buffer stays untouched until commit.
pub const TRANSFORM_SHADER: &str = r#"
struct TransformUniforms {
    // 2×3 row-major affine, padded to two vec4s:
    //   row0 = (m00, m01, m02, 0), row1 = (m10, m11, m12, 0)
    row0: vec4<f32>,
    row1: vec4<f32>,
    // Canvas-pixel → NDC of the target texture.
    scale: vec2<f32>,
    offset: vec2<f32>,
    // Quad size in canvas pixels.
    size: vec2<f32>,
    _pad: vec2<f32>,
};

@group(0) @binding(0) var<uniform> u: TransformUniforms;
@group(1) @binding(0) var src_texture: texture_2d<f32>;
@group(1) @binding(1) var src_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_transform(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let unit = positions[vi];
    let pixel = unit * u.size;
    let warped = vec2<f32>(
        u.row0.x * pixel.x + u.row0.y * pixel.y + u.row0.z,
        u.row1.x * pixel.x + u.row1.y * pixel.y + u.row1.z,
    );
    var out: VertexOutput;
    out.position = vec4<f32>(warped * u.scale + u.offset, 0.0, 1.0);
    out.uv = unit;
    return out;
}

@fragment
fn fs_transform(in: VertexOutput) -> @location(0) vec4<f32> {
    // The capture texture is premultiplied like every other layer texture.
    return textureSample(src_texture, src_sampler, in.uv);
}
"#;
