// ============================================================================
// STROKE GEOMETRY — variable-width ribbon outline from pointer samples
// ============================================================================
//
// Pipeline per stroke:
//   1. pressure response curves (width and flow decoupled)
//   2. speed-adaptive resampling of the raw samples
//   3. averaged tangents → per-sample rim offsets (miter, beveled when sharp)
//   4. rim unfold + dedup so the outline stays a simple polygon
//   5. closed-ring stitching, or round caps + ear-clipping triangulation
//
// The one invariant everything below serves: the stroke outline handed to
// the triangulator never self-intersects, whatever the turn angles are.
// ============================================================================

use crate::config::BrushConfig;

use super::triangulate::ear_clip;
use super::{RibbonMesh, StrokePath, StrokeSample, VERTEX_STRIDE};

/// Distance below which consecutive outline vertices are merged.
const DEDUP_EPSILON: f32 = 1e-3;

/// Miter length clamp: offsets never exceed this multiple of the radius.
const MITER_LIMIT: f32 = 2.0;

/// Resampling: base segment cap as a fraction of the brush radius.
const SEGMENT_CAP_RATIO: f32 = 0.6;

/// Resampling: speed (px/ms) at which the segment cap halves.
const SPEED_HALVING: f32 = 2.0;

/// Hard bound on samples inserted per raw segment.
const MAX_INSERTED: usize = 64;

/// Bevel thresholds on the corner's interior angle, radians. A corner
/// sharper than the threshold is beveled instead of mitered. Slow strokes
/// bevel earlier (denser samples make miter spikes visible), fast strokes
/// later.
const BEVEL_ANGLE_SLOW: f32 = 2.2; // ~126°
const BEVEL_ANGLE_FAST: f32 = 1.0; // ~57°

/// Speed (px/ms) treated as "fast" for threshold interpolation.
const BEVEL_SPEED_FAST: f32 = 4.0;

/// Builds ribbon meshes from stroke paths. Holds no per-stroke state beyond
/// a diagnostic counter for degenerate inputs that were skipped.
pub struct StrokeGeometryBuilder {
    config: BrushConfig,
    degenerate_count: u64,
}

/// Intermediate per-point data after resampling.
#[derive(Clone, Copy)]
struct PathPoint {
    x: f32,
    y: f32,
    radius: f32,
    flow: f32,
    tilt_x: f32,
    tilt_y: f32,
    /// Instantaneous speed at this point, px/ms.
    speed: f32,
}

impl StrokeGeometryBuilder {
    pub fn new(config: BrushConfig) -> Self {
        Self {
            config,
            degenerate_count: 0,
        }
    }

    pub fn config(&self) -> &BrushConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: BrushConfig) {
        self.config = config;
    }

    /// How many strokes were skipped as degenerate since construction.
    pub fn degenerate_count(&self) -> u64 {
        self.degenerate_count
    }

    /// Tessellate a path into a triangle mesh.
    ///
    /// Returns `None` (and counts it) for paths that cannot produce
    /// geometry: fewer than two samples, zero extent, or a triangulation
    /// failure on a degenerate outline. Never panics.
    pub fn build(&mut self, path: &StrokePath) -> Option<RibbonMesh> {
        if !path.is_drawable() {
            self.degenerate_count += 1;
            return None;
        }

        let points = self.resample(path.samples());
        if points.len() < 2 {
            self.degenerate_count += 1;
            return None;
        }

        let mesh = if self.is_closed(&points) {
            self.build_closed_ring(&points)
        } else {
            self.build_capped_ribbon(&points)
        };

        if mesh.is_none() {
            self.degenerate_count += 1;
        }
        mesh
    }

    // ------------------------------------------------------------------
    // Step 1+2: response curves and adaptive resampling
    // ------------------------------------------------------------------

    fn radius_for(&self, pressure: f32) -> f32 {
        let p = pressure.clamp(0.0, 1.0);
        let size = p.powf(self.config.size_curve_exp).max(self.config.min_radius_ratio);
        self.config.base_radius() * size
    }

    fn flow_for(&self, pressure: f32) -> f32 {
        pressure.clamp(0.0, 1.0).powf(self.config.flow_curve_exp)
    }

    /// Insert interpolated samples wherever a raw segment is longer than the
    /// speed-dependent cap. Fast segments get a shorter cap (the raw samples
    /// are sparse exactly where curvature gets lost), slow dense segments a
    /// longer one to keep the vertex count down.
    fn resample(&self, samples: &[StrokeSample]) -> Vec<PathPoint> {
        let base_cap = (self.config.base_radius() * SEGMENT_CAP_RATIO).max(0.5);
        let mut out: Vec<PathPoint> = Vec::with_capacity(samples.len() * 2);

        out.push(self.path_point(&samples[0], 0.0));
        for pair in samples.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let dist = a.distance_to(b);
            if dist < DEDUP_EPSILON {
                continue;
            }
            let dt = (b.timestamp_ms - a.timestamp_ms).abs().max(0.1) as f32;
            let speed = dist / dt;
            let cap = base_cap / (1.0 + speed / SPEED_HALVING);
            let subdivisions = ((dist / cap).ceil() as usize).clamp(1, MAX_INSERTED);
            for k in 1..=subdivisions {
                let t = k as f32 / subdivisions as f32;
                let s = a.lerp(b, t);
                out.push(self.path_point(&s, speed));
            }
        }
        out
    }

    fn path_point(&self, s: &StrokeSample, speed: f32) -> PathPoint {
        PathPoint {
            x: s.x,
            y: s.y,
            radius: self.radius_for(s.pressure),
            flow: self.flow_for(s.pressure),
            tilt_x: s.tilt_x,
            tilt_y: s.tilt_y,
            speed,
        }
    }

    fn is_closed(&self, points: &[PathPoint]) -> bool {
        if points.len() < 4 {
            return false;
        }
        let first = &points[0];
        let last = &points[points.len() - 1];
        let dx = last.x - first.x;
        let dy = last.y - first.y;
        let limit = first.radius.max(last.radius) * self.config.closed_threshold;
        dx * dx + dy * dy <= limit * limit
    }

    // ------------------------------------------------------------------
    // Step 3+4: rim offsets
    // ------------------------------------------------------------------

    /// Left/right rim points for every path point.
    ///
    /// Interior corners get a mitered offset (clamped to `MITER_LIMIT`);
    /// corners sharper than the speed-adaptive threshold fall back to the
    /// averaged normal at plain radius, cutting the spike off flat.
    fn build_rims(&self, points: &[PathPoint], wrap: bool) -> (Vec<RimVertex>, Vec<RimVertex>) {
        let n = points.len();
        let mut left = Vec::with_capacity(n);
        let mut right = Vec::with_capacity(n);

        for i in 0..n {
            let p = &points[i];
            let prev = if i > 0 {
                Some(&points[i - 1])
            } else if wrap {
                Some(&points[n - 1])
            } else {
                None
            };
            let next = if i + 1 < n {
                Some(&points[i + 1])
            } else if wrap {
                Some(&points[0])
            } else {
                None
            };

            let d_in = prev.map(|q| normalize(p.x - q.x, p.y - q.y));
            let d_out = next.map(|q| normalize(q.x - p.x, q.y - p.y));

            let (nx, ny, offset) = match (d_in, d_out) {
                (Some((ix, iy)), Some((ox, oy))) => {
                    // Averaged tangent; degenerate on a 180° reversal, where
                    // the inbound perpendicular is the only sane choice.
                    let (tx, ty) = {
                        let sx = ix + ox;
                        let sy = iy + oy;
                        let len = (sx * sx + sy * sy).sqrt();
                        if len < 1e-6 {
                            (ix, iy)
                        } else {
                            (sx / len, sy / len)
                        }
                    };
                    let (nx, ny) = (-ty, tx);

                    let interior = interior_angle(ix, iy, ox, oy);
                    let threshold = self.bevel_threshold(p.speed);
                    if interior < threshold {
                        // Bevel: averaged normal at plain radius.
                        (nx, ny, p.radius)
                    } else {
                        // Miter: scale so the rim stays parallel to both
                        // segments, clamped against spikes.
                        let cos_half = (nx * -iy + ny * ix).abs().max(1.0 / MITER_LIMIT);
                        (nx, ny, p.radius / cos_half)
                    }
                }
                (Some((ix, iy)), None) => (-iy, ix, p.radius),
                (None, Some((ox, oy))) => (-oy, ox, p.radius),
                (None, None) => (0.0, -1.0, p.radius),
            };

            left.push(RimVertex {
                x: p.x + nx * offset,
                y: p.y + ny * offset,
                flow: p.flow,
                tilt_x: p.tilt_x,
                tilt_y: p.tilt_y,
            });
            right.push(RimVertex {
                x: p.x - nx * offset,
                y: p.y - ny * offset,
                flow: p.flow,
                tilt_x: p.tilt_x,
                tilt_y: p.tilt_y,
            });
        }

        if !wrap {
            unfold_rim(&mut left, points);
            unfold_rim(&mut right, points);
        }
        (left, right)
    }

    fn bevel_threshold(&self, speed: f32) -> f32 {
        let t = (speed / BEVEL_SPEED_FAST).clamp(0.0, 1.0);
        BEVEL_ANGLE_SLOW + (BEVEL_ANGLE_FAST - BEVEL_ANGLE_SLOW) * t
    }

    // ------------------------------------------------------------------
    // Step 5a: closed ring
    // ------------------------------------------------------------------

    /// Start and end meet: stitch left and right rims into a quad ring.
    /// The annulus topology cannot be one simple polygon, so the indices
    /// are emitted directly instead of going through the ear clipper.
    fn build_closed_ring(&self, points: &[PathPoint]) -> Option<RibbonMesh> {
        // Drop the duplicated tail point so the ring does not pinch.
        let mut ring = points.to_vec();
        if ring.len() > 3 {
            let first = ring[0];
            let last = ring[ring.len() - 1];
            let dx = last.x - first.x;
            let dy = last.y - first.y;
            if (dx * dx + dy * dy).sqrt() < DEDUP_EPSILON {
                ring.pop();
            }
        }
        if ring.len() < 3 {
            return None;
        }

        let (left, right) = self.build_rims(&ring, true);
        let n = left.len();

        let mut mesh = RibbonMesh::default();
        mesh.vertices.reserve(n * 2 * VERTEX_STRIDE);
        for i in 0..n {
            push_vertex(&mut mesh.vertices, &left[i]);
            push_vertex(&mut mesh.vertices, &right[i]);
        }
        // Two triangles per ring segment, wrapping at the end.
        mesh.indices.reserve(n * 6);
        for i in 0..n {
            let j = (i + 1) % n;
            let (l0, r0) = (2 * i as u32, 2 * i as u32 + 1);
            let (l1, r1) = (2 * j as u32, 2 * j as u32 + 1);
            mesh.indices.extend_from_slice(&[l0, r0, l1, l1, r0, r1]);
        }
        Some(mesh)
    }

    // ------------------------------------------------------------------
    // Step 5b-7: open ribbon with round caps
    // ------------------------------------------------------------------

    fn build_capped_ribbon(&self, points: &[PathPoint]) -> Option<RibbonMesh> {
        let (left, right) = self.build_rims(points, false);

        // Outline: left rim forward, end cap, right rim backward, start cap.
        let mut outline: Vec<RimVertex> = Vec::with_capacity(left.len() + right.len() + 16);
        outline.extend_from_slice(&left);

        let last = points.last()?;
        let last_dir = segment_dir(points, points.len() - 1)?;
        append_cap(&mut outline, last, last_dir, self.config.cap_segments);

        outline.extend(right.iter().rev());

        let first = &points[0];
        let first_dir = segment_dir(points, 0)?;
        append_cap(
            &mut outline,
            first,
            (-first_dir.0, -first_dir.1),
            self.config.cap_segments,
        );

        dedup_outline(&mut outline);
        if outline.len() < 3 {
            return None;
        }

        // Counter-clockwise winding is what the ear clipper expects.
        if signed_area(&outline) < 0.0 {
            outline.reverse();
        }

        let positions: Vec<[f32; 2]> = outline.iter().map(|v| [v.x, v.y]).collect();
        let indices = ear_clip(&positions)?;

        let mut mesh = RibbonMesh::default();
        mesh.vertices.reserve(outline.len() * VERTEX_STRIDE);
        for v in &outline {
            push_vertex(&mut mesh.vertices, v);
        }
        mesh.indices = indices;
        Some(mesh)
    }
}

/// One outline vertex carrying the interpolated sample attributes.
#[derive(Clone, Copy, Debug)]
struct RimVertex {
    x: f32,
    y: f32,
    flow: f32,
    tilt_x: f32,
    tilt_y: f32,
}

fn push_vertex(buf: &mut Vec<f32>, v: &RimVertex) {
    buf.extend_from_slice(&[v.x, v.y, v.flow, v.tilt_x, v.tilt_y]);
}

fn normalize(x: f32, y: f32) -> (f32, f32) {
    let len = (x * x + y * y).sqrt();
    if len < 1e-9 {
        (1.0, 0.0)
    } else {
        (x / len, y / len)
    }
}

/// Interior angle between an inbound and outbound direction: π for a
/// straight continuation, approaching 0 for a full reversal.
fn interior_angle(ix: f32, iy: f32, ox: f32, oy: f32) -> f32 {
    let dot = (ix * ox + iy * oy).clamp(-1.0, 1.0);
    std::f32::consts::PI - dot.acos()
}

/// Direction of the segment leaving point `i` (or arriving, at the tail).
fn segment_dir(points: &[PathPoint], i: usize) -> Option<(f32, f32)> {
    let (a, b) = if i + 1 < points.len() {
        (&points[i], &points[i + 1])
    } else if i > 0 {
        (&points[i - 1], &points[i])
    } else {
        return None;
    };
    Some(normalize(b.x - a.x, b.y - a.y))
}

/// Drop rim vertices that step backwards against the path direction.
///
/// On the inside of a tight curve the offset points can fold over their
/// neighbours; a folded rim makes the outline self-intersect. Welding the
/// backward steps keeps each rim monotone along the path, which together
/// with the bevel clamp keeps the full outline simple.
fn unfold_rim(rim: &mut Vec<RimVertex>, points: &[PathPoint]) {
    if rim.len() != points.len() || rim.len() < 3 {
        return;
    }
    let mut kept: Vec<RimVertex> = Vec::with_capacity(rim.len());
    kept.push(rim[0]);
    for i in 1..rim.len() {
        let dir = match segment_dir(points, i - 1) {
            Some(d) => d,
            None => {
                kept.push(rim[i]);
                continue;
            }
        };
        let prev = kept.last().map(|v| (v.x, v.y)).unwrap_or((rim[i].x, rim[i].y));
        let step = (rim[i].x - prev.0, rim[i].y - prev.1);
        if step.0 * dir.0 + step.1 * dir.1 >= -DEDUP_EPSILON {
            kept.push(rim[i]);
        } else if i == rim.len() - 1 {
            // Never drop the final rim vertex; replace the fold instead.
            kept.pop();
            kept.push(rim[i]);
        }
    }
    *rim = kept;
}

/// Append a round cap: a fan of `segments` arcs sweeping a half circle
/// around `dir` (unit, pointing out of the stroke).
///
/// The sweep starts at `dir`'s left normal and ends at its right normal,
/// which lines up with the outline walk at both ends: the end cap enters
/// from the left rim and exits onto the reversed right rim, the start cap
/// (called with the negated first direction) enters from the right rim and
/// closes back to the outline's first left-rim vertex.
fn append_cap(outline: &mut Vec<RimVertex>, p: &PathPoint, dir: (f32, f32), segments: u32) {
    let (dx, dy) = dir;
    // Left normal of `dir`.
    let (nx, ny) = (-dy, dx);
    for k in 1..segments {
        let t = k as f32 / segments as f32;
        let angle = std::f32::consts::PI * t;
        let (sin, cos) = angle.sin_cos();
        let (cx, cy) = (nx * cos + dx * sin, ny * cos + dy * sin);
        outline.push(RimVertex {
            x: p.x + cx * p.radius,
            y: p.y + cy * p.radius,
            flow: p.flow,
            tilt_x: p.tilt_x,
            tilt_y: p.tilt_y,
        });
    }
}

fn dedup_outline(outline: &mut Vec<RimVertex>) {
    outline.dedup_by(|b, a| {
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        (dx * dx + dy * dy).sqrt() < DEDUP_EPSILON
    });
    // The walk is a ring: the last vertex may duplicate the first.
    while outline.len() > 1 {
        let first = outline[0];
        let last = outline[outline.len() - 1];
        let dx = last.x - first.x;
        let dy = last.y - first.y;
        if (dx * dx + dy * dy).sqrt() < DEDUP_EPSILON {
            outline.pop();
        } else {
            break;
        }
    }
}

/// Shoelace area. The sign convention only has to agree with the ear
/// clipper's convexity test; callers compare against zero and reverse.
fn signed_area(outline: &[RimVertex]) -> f32 {
    let mut area = 0.0;
    for i in 0..outline.len() {
        let a = &outline[i];
        let b = &outline[(i + 1) % outline.len()];
        area += a.x * b.y - b.x * a.y;
    }
    area * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::VERTEX_STRIDE;

    fn builder() -> StrokeGeometryBuilder {
        StrokeGeometryBuilder::new(BrushConfig::default())
    }

    fn path_from(points: &[(f32, f32)]) -> StrokePath {
        StrokePath::from_samples(
            points
                .iter()
                .enumerate()
                .map(|(i, &(x, y))| StrokeSample::new(x, y, 1.0, i as f64 * 10.0))
                .collect(),
        )
    }

    /// Outline simplicity check: no two non-adjacent mesh boundary edges may
    /// cross. Uses the raw outline re-derived from the mesh triangles'
    /// boundary (edges referenced by exactly one triangle).
    fn boundary_self_intersects(mesh: &RibbonMesh) -> bool {
        use std::collections::HashMap;
        let mut edge_use: HashMap<(u32, u32), u32> = HashMap::new();
        for tri in mesh.indices.chunks_exact(3) {
            for k in 0..3 {
                let a = tri[k];
                let b = tri[(k + 1) % 3];
                let key = (a.min(b), a.max(b));
                *edge_use.entry(key).or_insert(0) += 1;
            }
        }
        let boundary: Vec<(u32, u32)> = edge_use
            .into_iter()
            .filter(|&(_, n)| n == 1)
            .map(|(e, _)| e)
            .collect();

        let pos = |i: u32| {
            let base = i as usize * VERTEX_STRIDE;
            (mesh.vertices[base], mesh.vertices[base + 1])
        };

        for (i, &(a0, a1)) in boundary.iter().enumerate() {
            for &(b0, b1) in boundary.iter().skip(i + 1) {
                if a0 == b0 || a0 == b1 || a1 == b0 || a1 == b1 {
                    continue; // shared endpoint
                }
                if segments_cross(pos(a0), pos(a1), pos(b0), pos(b1)) {
                    return true;
                }
            }
        }
        false
    }

    fn segments_cross(p0: (f32, f32), p1: (f32, f32), q0: (f32, f32), q1: (f32, f32)) -> bool {
        fn orient(a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> f32 {
            (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
        }
        let d1 = orient(q0, q1, p0);
        let d2 = orient(q0, q1, p1);
        let d3 = orient(p0, p1, q0);
        let d4 = orient(p0, p1, q1);
        ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
            && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    }

    #[test]
    fn single_sample_is_degenerate() {
        let mut b = builder();
        let path = path_from(&[(10.0, 10.0)]);
        assert!(b.build(&path).is_none());
        assert_eq!(b.degenerate_count(), 1);
    }

    #[test]
    fn straight_stroke_bounding_box() {
        // Base diameter 10 at pressure 1 → radius 5; caps extend the length
        // by one radius at each end.
        let mut b = builder();
        let path = path_from(&[(0.0, 50.0), (100.0, 50.0)]);
        let mesh = b.build(&path).expect("straight stroke must tessellate");
        let (min_x, min_y, max_x, max_y) = mesh.bounds().unwrap();
        assert!((max_x - min_x - 110.0).abs() <= 2.0, "width {}", max_x - min_x);
        assert!((max_y - min_y - 10.0).abs() <= 1.0, "height {}", max_y - min_y);
    }

    #[test]
    fn pressure_zero_respects_width_floor() {
        let mut b = builder();
        let samples = vec![
            StrokeSample::new(0.0, 0.0, 0.0, 0.0),
            StrokeSample::new(60.0, 0.0, 0.0, 10.0),
        ];
        let mesh = b
            .build(&StrokePath::from_samples(samples))
            .expect("flat-pressure stroke must tessellate");
        let (_, min_y, _, max_y) = mesh.bounds().unwrap();
        // min_radius_ratio 0.3 on diameter 10 → width 3.
        assert!((max_y - min_y - 3.0).abs() <= 0.5, "height {}", max_y - min_y);
    }

    #[test]
    fn gentle_turn_outline_is_simple() {
        let mut b = builder();
        // 179° interior angle: almost straight.
        let path = path_from(&[(0.0, 0.0), (40.0, 0.0), (80.0, 0.7)]);
        let mesh = b.build(&path).unwrap();
        assert!(!boundary_self_intersects(&mesh));
    }

    #[test]
    fn right_angle_outline_is_simple() {
        let mut b = builder();
        let path = path_from(&[(0.0, 0.0), (40.0, 0.0), (40.0, 40.0)]);
        let mesh = b.build(&path).unwrap();
        assert!(!boundary_self_intersects(&mesh));
    }

    /// Check a single rim polyline for crossing segments.
    fn rim_self_intersects(rim: &[RimVertex]) -> bool {
        for i in 0..rim.len().saturating_sub(1) {
            for j in (i + 2)..rim.len().saturating_sub(1) {
                if segments_cross(
                    (rim[i].x, rim[i].y),
                    (rim[i + 1].x, rim[i + 1].y),
                    (rim[j].x, rim[j].y),
                    (rim[j + 1].x, rim[j + 1].y),
                ) {
                    return true;
                }
            }
        }
        false
    }

    /// Join invariant at the corner itself: across gentle, right-angle and
    /// hairpin turns, neither rim polyline may fold over and cross itself.
    #[test]
    fn rim_sides_stay_simple_across_turn_angles() {
        let b = builder();
        let corners: &[&[(f32, f32)]] = &[
            &[(0.0, 0.0), (40.0, 0.0), (80.0, 0.7)],  // ~179° interior
            &[(0.0, 0.0), (40.0, 0.0), (40.0, 40.0)], // 90°
            &[(0.0, 0.0), (40.0, 0.0), (0.15, 3.5)],  // ~5° interior (hairpin)
        ];
        for pts in corners {
            let path = path_from(pts);
            let points = b.resample(path.samples());
            let (left, right) = b.build_rims(&points, false);
            assert!(!rim_self_intersects(&left), "left rim folded for {:?}", pts);
            assert!(!rim_self_intersects(&right), "right rim folded for {:?}", pts);
        }
    }

    #[test]
    fn hairpin_still_tessellates() {
        let mut b = builder();
        // Nearly doubling back; the overlapping legs overdraw, but the
        // triangulator must still deliver a mesh rather than bail.
        let path = path_from(&[(0.0, 0.0), (40.0, 0.0), (10.0, 3.0)]);
        let mesh = b.build(&path).expect("hairpin must produce geometry");
        assert!(mesh.triangle_count() > 0);
        assert_eq!(b.degenerate_count(), 0);
    }

    #[test]
    fn noisy_curve_outline_is_simple() {
        let mut b = builder();
        let pts: Vec<(f32, f32)> = (0..24)
            .map(|i| {
                let t = i as f32 / 23.0;
                let angle = t * std::f32::consts::PI * 1.5;
                // Deterministic wobble on top of a spiral arc.
                let wobble = ((i * 7919) % 13) as f32 / 13.0 - 0.5;
                let r = 30.0 + 10.0 * t + wobble * 2.0;
                (60.0 + angle.cos() * r, 60.0 + angle.sin() * r)
            })
            .collect();
        let mesh = b.build(&path_from(&pts)).unwrap();
        assert!(!boundary_self_intersects(&mesh));
    }

    #[test]
    fn closed_path_produces_ring_without_caps() {
        let mut b = builder();
        // A loop whose endpoints coincide: vertex count stays 2 per ring
        // point, with no cap fans.
        let pts: Vec<(f32, f32)> = (0..=16)
            .map(|i| {
                let a = i as f32 / 16.0 * std::f32::consts::TAU;
                (50.0 + a.cos() * 30.0, 50.0 + a.sin() * 30.0)
            })
            .collect();
        let mesh = b.build(&path_from(&pts)).unwrap();
        // Ring topology: two vertices and two triangles per ring point, so
        // the counts come out equal — a capped ribbon never satisfies this.
        assert_eq!(mesh.triangle_count(), mesh.vertex_count());
        assert!(mesh.triangle_count() >= 32);
    }

    #[test]
    fn resampling_densifies_long_segments() {
        let mut b = builder();
        let sparse = path_from(&[(0.0, 0.0), (200.0, 0.0)]);
        let mesh = b.build(&sparse).unwrap();
        // A single 200px segment must not come out as one quad.
        assert!(mesh.vertex_count() > 20);
    }

    #[test]
    fn flow_tracks_pressure_curve() {
        let mut b = builder();
        let samples = vec![
            StrokeSample::new(0.0, 0.0, 0.25, 0.0),
            StrokeSample::new(30.0, 0.0, 0.25, 10.0),
        ];
        let mesh = b.build(&StrokePath::from_samples(samples)).unwrap();
        let expected = 0.25f32.powf(BrushConfig::default().flow_curve_exp);
        for v in mesh.vertices.chunks_exact(VERTEX_STRIDE) {
            assert!((v[2] - expected).abs() < 1e-4);
        }
    }
}
