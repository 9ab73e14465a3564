//! Discrete curvature estimates on flat triangle arrays.
//!
//! Gaussian curvature comes from the angle defect, mean curvature from the
//! cotangent Laplacian, both normalized by the mixed Voronoi area. The adaptive
//! scale field additionally needs normal curvature along the two cross-field
//! directions, estimated from the one-ring.
//!
//! # References
//!
//! - Meyer, M., et al. (2003). "Discrete Differential-Geometry Operators for
//!   Triangulated 2-Manifolds." Visualization and Mathematics III.

use std::f64::consts::PI;

use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;

use crate::algo::adjacency::AdjacentMatrix;

/// Per-vertex curvature values.
#[derive(Debug, Clone, Default)]
pub struct CurvatureResult {
    /// Gaussian curvature.
    pub gaussian: Vec<f64>,
    /// Mean curvature.
    pub mean: Vec<f64>,
}

impl CurvatureResult {
    /// Principal curvatures `(k1, k2)` with `k1 >= k2`.
    pub fn principal(&self, v: usize) -> (f64, f64) {
        let h = self.mean[v];
        let disc = (h * h - self.gaussian[v]).max(0.0).sqrt();
        (h + disc, h - disc)
    }

    /// Largest absolute principal curvature.
    pub fn max_abs(&self, v: usize) -> f64 {
        let (k1, k2) = self.principal(v);
        k1.abs().max(k2.abs())
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.gaussian.len()
    }

    /// True if no vertex was processed.
    pub fn is_empty(&self) -> bool {
        self.gaussian.is_empty()
    }
}

fn angle_at(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> f64 {
    let ab = b - a;
    let ac = c - a;
    let denom = ab.norm() * ac.norm();
    if denom < 1e-30 {
        return 0.0;
    }
    (ab.dot(&ac) / denom).clamp(-1.0, 1.0).acos()
}

fn cotangent_at(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> f64 {
    let ab = b - a;
    let ac = c - a;
    let cross = ab.cross(&ac).norm();
    if cross < 1e-10 {
        0.0
    } else {
        ab.dot(&ac) / cross
    }
}

/// Gaussian and mean curvature of every vertex.
///
/// `boundary[v]` switches the angle defect reference from 2π to π.
pub fn compute_curvature(v: &[Vector3<f64>], faces: &[[usize; 3]], boundary: &[bool]) -> CurvatureResult {
    let nv = v.len();
    let mut area = vec![0.0; nv];
    let mut angle_sum = vec![0.0; nv];
    let mut laplacian = vec![Vector3::zeros(); nv];

    for f in faces {
        let p = [v[f[0]], v[f[1]], v[f[2]]];
        let angles = [
            angle_at(&p[0], &p[1], &p[2]),
            angle_at(&p[1], &p[2], &p[0]),
            angle_at(&p[2], &p[0], &p[1]),
        ];
        let tri_area = 0.5 * (p[1] - p[0]).cross(&(p[2] - p[0])).norm();
        let obtuse = angles.iter().position(|&a| a > PI / 2.0);

        for k in 0..3 {
            let (i, j, l) = (k, (k + 1) % 3, (k + 2) % 3);
            angle_sum[f[i]] += angles[i];

            // Edge (i, j) sees the angle at l.
            let w = cotangent_at(&p[l], &p[i], &p[j]).max(0.0);
            laplacian[f[i]] += (p[j] - p[i]) * w;
            laplacian[f[j]] += (p[i] - p[j]) * w;

            area[f[i]] += match obtuse {
                None => {
                    let cot_j = cotangent_at(&p[j], &p[i], &p[l]);
                    let cot_l = cotangent_at(&p[l], &p[i], &p[j]);
                    0.125 * ((p[l] - p[i]).norm_squared() * cot_j + (p[j] - p[i]).norm_squared() * cot_l)
                }
                Some(o) if o == i => tri_area / 2.0,
                Some(_) => tri_area / 4.0,
            };
        }
    }

    let (gaussian, mean) = (0..nv)
        .into_par_iter()
        .map(|i| {
            if area[i] < 1e-20 {
                return (0.0, 0.0);
            }
            let full = if boundary.get(i).copied().unwrap_or(false) { PI } else { 2.0 * PI };
            let k = (full - angle_sum[i]) / area[i];
            let h = 0.25 * laplacian[i].norm() / area[i];
            (k, h)
        })
        .unzip();

    CurvatureResult { gaussian, mean }
}

/// Absolute normal curvature along `q` and `n×q` at every vertex.
///
/// Each neighbour `j` contributes the curvature of the circle through `v_i`
/// tangent to the surface and through `v_j`, `2 n_i·(v_j - v_i) / |v_j - v_i|²`,
/// weighted by the squared cosine between the edge and each axis.
pub fn directional_curvature(
    v: &[Vector3<f64>],
    n: &[Vector3<f64>],
    q: &[Vector3<f64>],
    adj: &AdjacentMatrix,
) -> Vec<Vector2<f64>> {
    (0..v.len())
        .into_par_iter()
        .map(|i| {
            let t = n[i].cross(&q[i]);
            let mut num = Vector2::zeros();
            let mut den = Vector2::zeros();
            for link in &adj[i] {
                let d = v[link.id] - v[i];
                let len_sq = d.norm_squared();
                if len_sq < 1e-30 {
                    continue;
                }
                let kappa = (2.0 * n[i].dot(&d) / len_sq).abs();
                let tangent = d - n[i] * n[i].dot(&d);
                let tl = tangent.norm();
                if tl < 1e-15 {
                    continue;
                }
                let cq = q[i].dot(&tangent) / tl;
                let ct = t.dot(&tangent) / tl;
                let w = Vector2::new(cq * cq, ct * ct) * link.weight;
                num += w * kappa;
                den += w;
            }
            Vector2::new(
                if den.x > 1e-12 { num.x / den.x } else { 0.0 },
                if den.y > 1e-12 { num.y / den.y } else { 0.0 },
            )
        })
        .collect()
}
