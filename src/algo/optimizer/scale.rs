//! Adaptive lattice spacing.
//!
//! Target spacing per vertex and axis shrinks with the normal curvature along
//! that axis. Curvature is the larger of the one-ring estimate and the slope
//! found by walking one lattice step along the field. The targets are smoothed by solving `(L + λI) s = λ t` with the
//! uniform graph Laplacian `L`, once per axis.

use std::cell::Cell;

use nalgebra::{DVector, Vector2, Vector3};
use rayon::prelude::*;

use crate::algo::adjacency::AdjacentMatrix;
use crate::algo::curvature::directional_curvature;
use crate::algo::field_math::travel_along_field;
use crate::algo::hierarchy::{Hierarchy, Level};
use crate::algo::sparse::{conjugate_gradient, CsrMatrix};
use crate::error::Result;

/// Regularization weight towards the curvature target.
pub const SCALE_LAMBDA: f64 = 1.0;

/// Smallest relative spacing.
pub const MIN_RELATIVE_SCALE: f64 = 0.25;

/// Relative spacing for a normal curvature `kappa` at base spacing `scale`.
#[inline]
pub fn target_scale(kappa: f64, scale: f64) -> f64 {
    (1.0 / (1.0 + kappa * scale)).clamp(MIN_RELATIVE_SCALE, 1.0)
}

/// Steps of the field walk used for slope estimation.
const SLOPE_STEPS: usize = 4;

/// Greedy descent over the one-rings towards the vertex closest to `p`.
fn nearest_vertex(level: &Level, start: usize, p: &Vector3<f64>) -> usize {
    let mut cur = start;
    let mut best = (level.v[cur] - p).norm_squared();
    for _ in 0..level.len() {
        let next = level.adj[cur]
            .iter()
            .map(|l| (l.id, (level.v[l.id] - p).norm_squared()))
            .filter(|&(_, d)| d < best)
            .min_by(|a, b| a.1.total_cmp(&b.1));
        match next {
            Some((j, d)) => {
                cur = j;
                best = d;
            }
            None => break,
        }
    }
    cur
}

/// Normal turn per unit length when walking `distance` along each field axis.
pub fn estimate_slopes(level: &Level, distance: f64) -> Vec<Vector2<f64>> {
    if distance <= 0.0 {
        return vec![Vector2::zeros(); level.len()];
    }
    (0..level.len())
        .into_par_iter()
        .map(|i| {
            let axes = [level.q[i], level.n[i].cross(&level.q[i])];
            let mut slope: Vector2<f64> = Vector2::zeros();
            for (k, dir) in axes.iter().enumerate() {
                let at = Cell::new(i);
                let end = travel_along_field(&level.v[i], dir, distance, SLOPE_STEPS, |p| {
                    let j = nearest_vertex(level, at.get(), p);
                    at.set(j);
                    (level.q[j], level.n[j])
                });
                let j = nearest_vertex(level, at.get(), &end);
                let cos = level.n[i].dot(&level.n[j]).clamp(-1.0, 1.0);
                slope[k] = cos.acos() / distance;
            }
            slope
        })
        .collect()
}

/// `L + λI` for a weighted adjacency.
fn screened_laplacian(adj: &AdjacentMatrix, lambda: f64) -> CsrMatrix {
    let n = adj.len();
    let mut triplets = Vec::with_capacity(n + adj.iter().map(Vec::len).sum::<usize>());
    for (i, links) in adj.iter().enumerate() {
        let mut diag = lambda;
        for link in links {
            triplets.push((i, link.id, -link.weight));
            diag += link.weight;
        }
        triplets.push((i, i, diag));
    }
    CsrMatrix::from_triplets(n, n, triplets)
}

/// Smooth per-axis targets over the graph.
pub fn smooth_scales(adj: &AdjacentMatrix, targets: &[Vector2<f64>], lambda: f64) -> Result<Vec<Vector2<f64>>> {
    let a = screened_laplacian(adj, lambda);
    let mut axes = Vec::with_capacity(2);
    for axis in 0..2 {
        let t = DVector::from_iterator(targets.len(), targets.iter().map(|s| s[axis]));
        let b = &t * lambda;
        axes.push(conjugate_gradient(&a, &b, Some(&t), 500, 1e-8)?);
    }
    Ok((0..targets.len())
        .map(|i| {
            Vector2::new(
                axes[0][i].clamp(MIN_RELATIVE_SCALE, 1.0),
                axes[1][i].clamp(MIN_RELATIVE_SCALE, 1.0),
            )
        })
        .collect())
}

/// Fill the level-0 scale field from curvature and restrict it.
///
/// Needs the orientation field. A failed solve keeps the raw targets.
pub fn optimize_scale(hierarchy: &mut Hierarchy) {
    let scale = hierarchy.scale;
    let level = &hierarchy.levels[0];
    let kappa = directional_curvature(&level.v, &level.n, &level.q, &level.adj);
    let slopes = estimate_slopes(level, scale);
    let targets: Vec<Vector2<f64>> = kappa
        .iter()
        .zip(&slopes)
        .map(|(k, s)| {
            let k = k.sup(s);
            Vector2::new(target_scale(k.x, scale), target_scale(k.y, scale))
        })
        .collect();
    let smoothed = match smooth_scales(&level.adj, &targets, SCALE_LAMBDA) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("scale field solve failed ({}), using raw curvature targets", e);
            targets
        }
    };
    let (lo, hi) = smoothed
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), s| (lo.min(s.min()), hi.max(s.max())));
    log::debug!("adaptive scale range [{:.3}, {:.3}]", lo, hi);
    hierarchy.levels[0].s = smoothed;
    hierarchy.restrict_scales();
}
