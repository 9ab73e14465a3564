//! Per-face and per-vertex geometric quantities on flat triangle arrays.

use nalgebra::Vector3;
use rayon::prelude::*;

use super::dedge::{DirectedEdges, INVALID};

/// Unnormalized normal of a triangle (twice its area in magnitude).
#[inline]
pub fn face_cross(v: &[Vector3<f64>], f: &[usize; 3]) -> Vector3<f64> {
    (v[f[1]] - v[f[0]]).cross(&(v[f[2]] - v[f[0]]))
}

/// Unit normal of a triangle, zero for degenerate triangles.
#[inline]
pub fn face_normal(v: &[Vector3<f64>], f: &[usize; 3]) -> Vector3<f64> {
    let c = face_cross(v, f);
    let len = c.norm();
    if len > 1e-20 {
        c / len
    } else {
        Vector3::zeros()
    }
}

/// Area of a triangle.
#[inline]
pub fn face_area(v: &[Vector3<f64>], f: &[usize; 3]) -> f64 {
    0.5 * face_cross(v, f).norm()
}

/// Unit normals of all faces.
pub fn face_normals(v: &[Vector3<f64>], faces: &[[usize; 3]]) -> Vec<Vector3<f64>> {
    faces.par_iter().map(|f| face_normal(v, f)).collect()
}

/// Total surface area.
pub fn surface_area(v: &[Vector3<f64>], faces: &[[usize; 3]]) -> f64 {
    let areas: Vec<f64> = faces.par_iter().map(|f| face_area(v, f)).collect();
    areas.iter().sum()
}

/// Angle-weighted vertex normals.
///
/// Non-manifold vertices and vertices without faces get the area-weighted
/// average of their faces, or `+z` if that is also degenerate.
pub fn vertex_normals(v: &[Vector3<f64>], faces: &[[usize; 3]]) -> Vec<Vector3<f64>> {
    let mut normals = vec![Vector3::zeros(); v.len()];
    for f in faces {
        let n = face_normal(v, f);
        if n == Vector3::zeros() {
            continue;
        }
        for k in 0..3 {
            let d0 = v[f[(k + 1) % 3]] - v[f[k]];
            let d1 = v[f[(k + 2) % 3]] - v[f[k]];
            let denom = d0.norm() * d1.norm();
            if denom < 1e-30 {
                continue;
            }
            let angle = (d0.dot(&d1) / denom).clamp(-1.0, 1.0).acos();
            normals[f[k]] += n * angle;
        }
    }
    normals
        .into_par_iter()
        .map(|n| {
            let len = n.norm();
            if len > 1e-20 {
                n / len
            } else {
                Vector3::z()
            }
        })
        .collect()
}

/// Barycentric dual area of each vertex (a third of each incident face).
pub fn vertex_areas(v: &[Vector3<f64>], faces: &[[usize; 3]]) -> Vec<f64> {
    let mut areas = vec![0.0; v.len()];
    for f in faces {
        let a = face_area(v, f) / 3.0;
        for &i in f {
            areas[i] += a;
        }
    }
    areas
}

/// Mean and maximum length over all directed edges of the faces.
pub fn edge_length_stats(v: &[Vector3<f64>], faces: &[[usize; 3]]) -> (f64, f64) {
    if faces.is_empty() {
        return (0.0, 0.0);
    }
    let per_face: Vec<(f64, f64)> = faces
        .par_iter()
        .map(|f| {
            let mut sum = 0.0;
            let mut max: f64 = 0.0;
            for k in 0..3 {
                let len = (v[f[(k + 1) % 3]] - v[f[k]]).norm();
                sum += len;
                max = max.max(len);
            }
            (sum, max)
        })
        .collect();
    let (sum, max) = per_face
        .iter()
        .fold((0.0, 0.0_f64), |acc, p| (acc.0 + p.0, acc.1.max(p.1)));
    (sum / (faces.len() * 3) as f64, max)
}

/// Closest point to `p` on segment `[a, b]`.
pub fn closest_point_on_segment(p: &Vector3<f64>, a: &Vector3<f64>, b: &Vector3<f64>) -> Vector3<f64> {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 == 0.0 {
        return *a;
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    a + ab * t
}

/// Closest point to `p` over a set of segments, `None` when there are none.
pub fn closest_point_on_segments(p: &Vector3<f64>, segments: &[[Vector3<f64>; 2]]) -> Option<Vector3<f64>> {
    segments
        .iter()
        .map(|[a, b]| closest_point_on_segment(p, a, b))
        .min_by(|x, y| (x - p).norm_squared().total_cmp(&(y - p).norm_squared()))
}

/// Flag every directed edge whose dihedral angle exceeds `angle_degrees`.
///
/// Both halves of a sharp edge are flagged.
pub fn detect_sharp_edges(
    face_normals: &[Vector3<f64>],
    dedges: &DirectedEdges<3>,
    angle_degrees: f64,
) -> Vec<bool> {
    let cos_threshold = angle_degrees.to_radians().cos();
    (0..dedges.e2e.len())
        .into_par_iter()
        .map(|e| {
            let opp = dedges.e2e[e];
            if opp == INVALID {
                return false;
            }
            let n0 = &face_normals[e / 3];
            let n1 = &face_normals[opp / 3];
            n0.dot(n1) < cos_threshold
        })
        .collect()
}

/// Affine map that fits a point set into the unit box around the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    /// Bounding box center of the original points.
    pub center: Vector3<f64>,
    /// Largest bounding box extent of the original points.
    pub scale: f64,
}

impl Normalization {
    /// Compute the transform from the bounding box of `v`.
    pub fn fit(v: &[Vector3<f64>]) -> Self {
        if v.is_empty() {
            return Self::identity();
        }
        let mut lo = v[0];
        let mut hi = v[0];
        for p in v {
            lo = lo.inf(p);
            hi = hi.sup(p);
        }
        let extent = hi - lo;
        let scale = extent.x.max(extent.y).max(extent.z);
        Self {
            center: (lo + hi) * 0.5,
            scale: if scale > 0.0 { scale } else { 1.0 },
        }
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            center: Vector3::zeros(),
            scale: 1.0,
        }
    }

    /// Map points into the unit box in place.
    pub fn apply(&self, v: &mut [Vector3<f64>]) {
        let inv = 1.0 / self.scale;
        v.par_iter_mut().for_each(|p| *p = (*p - self.center) * inv);
    }

    /// Map a point from the unit box back to the original frame.
    #[inline]
    pub fn invert(&self, p: &Vector3<f64>) -> Vector3<f64> {
        p * self.scale + self.center
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square() -> (Vec<Vector3<f64>>, Vec<[usize; 3]>) {
        let v = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(2.0, 2.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
        ];
        (v, vec![[0, 1, 2], [0, 2, 3]])
    }

    #[test]
    fn test_face_quantities() {
        let (v, f) = square();
        assert_relative_eq!(face_area(&v, &f[0]), 2.0);
        assert_relative_eq!(face_normal(&v, &f[0]), Vector3::z());
        assert_relative_eq!(surface_area(&v, &f), 4.0);
    }

    #[test]
    fn test_vertex_areas_sum_to_surface() {
        let (v, f) = square();
        let total: f64 = vertex_areas(&v, &f).iter().sum();
        assert_relative_eq!(total, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_vertex_normals_planar() {
        let (v, f) = square();
        for n in vertex_normals(&v, &f) {
            assert_relative_eq!(n, Vector3::z(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_edge_length_stats() {
        let (v, f) = square();
        let (avg, max) = edge_length_stats(&v, &f);
        assert_relative_eq!(max, 8.0_f64.sqrt(), epsilon = 1e-12);
        assert!(avg > 2.0 && avg < max);
    }

    #[test]
    fn test_closest_point_on_segments() {
        let segments = [
            [Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)],
            [Vector3::new(1.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 0.0)],
        ];
        let p = closest_point_on_segments(&Vector3::new(0.4, -0.3, 0.2), &segments).unwrap();
        assert_relative_eq!(p, Vector3::new(0.4, 0.0, 0.0));
        let p = closest_point_on_segments(&Vector3::new(1.5, 0.7, 0.0), &segments).unwrap();
        assert_relative_eq!(p, Vector3::new(1.0, 0.7, 0.0));
        let p = closest_point_on_segments(&Vector3::new(3.0, -1.0, 0.0), &segments).unwrap();
        assert_relative_eq!(p, Vector3::new(1.0, 0.0, 0.0));
        assert!(closest_point_on_segments(&Vector3::zeros(), &[]).is_none());
    }

    #[test]
    fn test_sharp_edges_on_fold() {
        // Two triangles folded at 90 degrees along edge (0, 1).
        let v = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.5, 1.0, 0.0),
            Vector3::new(0.5, 0.0, 1.0),
        ];
        let f = vec![[0, 1, 2], [1, 0, 3]];
        let topo = DirectedEdges::<3>::build(4, &f);
        let normals = face_normals(&v, &f);
        let sharp = detect_sharp_edges(&normals, &topo, 60.0);
        assert!(sharp[0]);
        assert!(sharp[3]);
        assert_eq!(sharp.iter().filter(|&&s| s).count(), 2);

        let flat = detect_sharp_edges(&normals, &topo, 120.0);
        assert!(flat.iter().all(|&s| !s));
    }

    #[test]
    fn test_normalization_roundtrip() {
        let v = vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(5.0, 4.0, 3.0)];
        let t = Normalization::fit(&v);
        let mut w = v.clone();
        t.apply(&mut w);
        assert_relative_eq!(w[0], Vector3::new(-0.5, -0.25, 0.0), epsilon = 1e-12);
        assert_relative_eq!(t.invert(&w[1]), v[1], epsilon = 1e-12);
    }
}
