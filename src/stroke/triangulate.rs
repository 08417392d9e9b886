// ============================================================================
// EAR CLIPPING — triangulation of the stroke outline polygon
// ============================================================================
//
// Plain O(n²) ear clipping. The outlines it sees are stroke silhouettes:
// mostly convex, with concave runs introduced by bevel joins and the odd
// overlap from a tight hairpin. Robustness beats asymptotics here — the
// clipper must terminate and produce *something* for any input the geometry
// stage hands it, and report `None` only when the polygon has no area at all.
// ============================================================================

/// Near-zero cross-product tolerance: vertices this close to collinear are
/// treated as convex so slivers don't stall the clip loop.
const COLLINEAR_EPSILON: f32 = 1e-6;

/// Triangulate a counter-clockwise polygon given as `[x, y]` points.
///
/// Returns `n - 2` triangles as an index list, or `None` for polygons with
/// fewer than three vertices or effectively zero area.
pub fn ear_clip(points: &[[f32; 2]]) -> Option<Vec<u32>> {
    let n = points.len();
    if n < 3 {
        return None;
    }
    if polygon_area(points).abs() < COLLINEAR_EPSILON {
        return None;
    }

    let mut ring: Vec<u32> = (0..n as u32).collect();
    let mut indices = Vec::with_capacity((n - 2) * 3);

    while ring.len() > 3 {
        let m = ring.len();
        let mut clipped = false;

        for i in 0..m {
            let prev = ring[(i + m - 1) % m];
            let curr = ring[i];
            let next = ring[(i + 1) % m];

            if !is_convex(points, prev, curr, next) {
                continue;
            }
            if contains_other_vertex(points, &ring, prev, curr, next) {
                continue;
            }

            indices.extend_from_slice(&[prev, curr, next]);
            ring.remove(i);
            clipped = true;
            break;
        }

        if !clipped {
            // No clean ear — the outline locally overlaps itself. Clip the
            // flattest corner anyway; the extra triangle only overdraws.
            let i = flattest_corner(points, &ring);
            let m = ring.len();
            let prev = ring[(i + m - 1) % m];
            let curr = ring[i];
            let next = ring[(i + 1) % m];
            indices.extend_from_slice(&[prev, curr, next]);
            ring.remove(i);
        }
    }

    indices.extend_from_slice(&[ring[0], ring[1], ring[2]]);
    Some(indices)
}

fn cross(points: &[[f32; 2]], a: u32, b: u32, c: u32) -> f32 {
    let [ax, ay] = points[a as usize];
    let [bx, by] = points[b as usize];
    let [cx, cy] = points[c as usize];
    (bx - ax) * (cy - ay) - (by - ay) * (cx - ax)
}

fn is_convex(points: &[[f32; 2]], prev: u32, curr: u32, next: u32) -> bool {
    cross(points, prev, curr, next) > -COLLINEAR_EPSILON
}

/// Does any other ring vertex lie strictly inside triangle (a, b, c)?
fn contains_other_vertex(points: &[[f32; 2]], ring: &[u32], a: u32, b: u32, c: u32) -> bool {
    for &p in ring {
        if p == a || p == b || p == c {
            continue;
        }
        if point_in_triangle(points, p, a, b, c) {
            return true;
        }
    }
    false
}

fn point_in_triangle(points: &[[f32; 2]], p: u32, a: u32, b: u32, c: u32) -> bool {
    let d1 = cross(points, a, b, p);
    let d2 = cross(points, b, c, p);
    let d3 = cross(points, c, a, p);
    // Strictly inside only; boundary points don't block an ear.
    d1 > COLLINEAR_EPSILON && d2 > COLLINEAR_EPSILON && d3 > COLLINEAR_EPSILON
}

/// Ring position whose corner has the smallest absolute turn — the safest
/// vertex to discard when no valid ear exists.
fn flattest_corner(points: &[[f32; 2]], ring: &[u32]) -> usize {
    let m = ring.len();
    let mut best = 0;
    let mut best_cross = f32::INFINITY;
    for i in 0..m {
        let c = cross(
            points,
            ring[(i + m - 1) % m],
            ring[i],
            ring[(i + 1) % m],
        )
        .abs();
        if c < best_cross {
            best_cross = c;
            best = i;
        }
    }
    best
}

fn polygon_area(points: &[[f32; 2]]) -> f32 {
    let n = points.len();
    let mut area = 0.0;
    for i in 0..n {
        let [ax, ay] = points[i];
        let [bx, by] = points[(i + 1) % n];
        area += ax * by - bx * ay;
    }
    area * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_passes_through() {
        let pts = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let idx = ear_clip(&pts).unwrap();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn square_yields_two_triangles() {
        let pts = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let idx = ear_clip(&pts).unwrap();
        assert_eq!(idx.len(), 6);
    }

    #[test]
    fn concave_polygon_triangulates_fully() {
        // An arrowhead with a reflex vertex at index 3.
        let pts = [
            [0.0, 0.0],
            [4.0, 0.0],
            [4.0, 4.0],
            [2.0, 1.5],
            [0.0, 4.0],
        ];
        let idx = ear_clip(&pts).unwrap();
        assert_eq!(idx.len(), (pts.len() - 2) * 3);
        // Every emitted triangle must have non-negative orientation.
        for tri in idx.chunks_exact(3) {
            assert!(cross(&pts, tri[0], tri[1], tri[2]) >= -COLLINEAR_EPSILON);
        }
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert!(ear_clip(&[[0.0, 0.0], [1.0, 1.0]]).is_none());
        // Collinear: zero area.
        assert!(ear_clip(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]]).is_none());
    }

    #[test]
    fn triangulated_area_matches_polygon_area() {
        let pts = [
            [0.0, 0.0],
            [5.0, 0.0],
            [6.0, 3.0],
            [3.0, 5.0],
            [1.0, 4.0],
        ];
        let idx = ear_clip(&pts).unwrap();
        let tri_area: f32 = idx
            .chunks_exact(3)
            .map(|t| cross(&pts, t[0], t[1], t[2]).abs() * 0.5)
            .sum();
        assert!((tri_area - polygon_area(&pts).abs()).abs() < 1e-4);
    }

    #[test]
    fn self_overlapping_outline_still_terminates() {
        // A bowtie cannot be clipped cleanly; the clipper must still
        // deliver n-2 triangles instead of spinning.
        let pts = [[0.0, 0.0], [4.0, 4.0], [4.0, 0.0], [1.0, 3.0]];
        let idx = ear_clip(&pts).unwrap();
        assert_eq!(idx.len(), 6);
    }
}
