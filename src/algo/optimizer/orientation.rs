//! Cross-field relaxation.

use std::time::Instant;

use nalgebra::Vector3;
use rayon::prelude::*;

use super::SWEEPS_PER_LEVEL;
use crate::algo::field_math::{
    compat_orientation_extrinsic_4, compat_orientation_extrinsic_index_4, tangential, RCPOVERFLOW,
};
use crate::algo::hierarchy::{Hierarchy, Level};

/// New orientation of vertex `i` from its neighbours and its constraint.
fn relax_orientation(level: &Level, i: usize) -> Vector3<f64> {
    let n_i = level.n[i];
    let mut sum = level.q[i];
    let mut weight_sum = 0.0;
    for link in &level.adj[i] {
        let j = link.id;
        let w = link.weight;
        if w <= 0.0 {
            continue;
        }
        let (a, b) = compat_orientation_extrinsic_4(&sum, &n_i, &level.q[j], &level.n[j]);
        sum = a * weight_sum + b * w;
        sum -= n_i * n_i.dot(&sum);
        weight_sum += w;
        let norm = sum.norm();
        if norm > RCPOVERFLOW {
            sum /= norm;
        }
    }

    let cw = level.cqw[i];
    if cw > 0.0 {
        let (a, b) = compat_orientation_extrinsic_4(&sum, &n_i, &level.cq[i], &n_i);
        sum = a * (1.0 - cw) + b * cw;
    }

    if weight_sum > 0.0 || cw > 0.0 {
        tangential(&sum, &n_i)
    } else {
        level.q[i]
    }
}

/// Gauss-Seidel sweeps over the colour phases of one level.
pub fn relax_orientation_level(level: &mut Level, sweeps: usize) {
    for _ in 0..sweeps {
        for p in 0..level.phases.len() {
            let view = &*level;
            let updates: Vec<(usize, Vector3<f64>)> = view.phases[p]
                .par_iter()
                .map(|&i| (i, relax_orientation(view, i)))
                .collect();
            for (i, q) in updates {
                level.q[i] = q;
            }
        }
    }
}

/// Copy the level-`l` orientations onto the children at level `l - 1`.
pub fn prolong_orientations(hierarchy: &mut Hierarchy, l: usize) {
    let (lower, upper) = hierarchy.levels.split_at_mut(l);
    let fine = &mut lower[l - 1];
    let coarse = &upper[0];
    let to_lower = &hierarchy.to_lower[l - 1];
    let values: Vec<Vector3<f64>> = (0..fine.len())
        .into_par_iter()
        .map(|i| tangential(&coarse.q[to_lower[i]], &fine.n[i]))
        .collect();
    fine.q = values;
}

/// Smooth the orientation field coarse-to-fine, then restrict the result
/// back up so every level holds the fine solution.
pub fn optimize_orientations(hierarchy: &mut Hierarchy) {
    let start = Instant::now();
    let depth = hierarchy.depth();
    for l in (0..depth).rev() {
        relax_orientation_level(&mut hierarchy.levels[l], SWEEPS_PER_LEVEL);
        if l > 0 {
            prolong_orientations(hierarchy, l);
        }
    }
    for l in 0..depth.saturating_sub(1) {
        hierarchy.restrict_fields(l);
    }
    log::info!("orientation field: {} levels in {:.2?}", depth, start.elapsed());
}

/// Quarter-turn index of every face: the sum of the pairwise rotation
/// indices around the face, modulo 4. Non-zero faces are singular.
pub fn orientation_singularities(
    q: &[Vector3<f64>],
    n: &[Vector3<f64>],
    faces: &[[usize; 3]],
) -> Vec<(usize, i32)> {
    faces
        .par_iter()
        .enumerate()
        .filter_map(|(f, face)| {
            let mut index = 0;
            for k in 0..3 {
                let (i, j) = (face[k], face[(k + 1) % 3]);
                let (a, b) = compat_orientation_extrinsic_index_4(&q[i], &n[i], &q[j], &n[j]);
                index += b - a;
            }
            let index = index.rem_euclid(4);
            (index != 0).then_some((f, index))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::adjacency::generate_adjacency_matrix_uniform;

    fn grid(n: usize) -> (Vec<Vector3<f64>>, Vec<[usize; 3]>) {
        let mut v = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                v.push(Vector3::new(x as f64, y as f64, 0.0));
            }
        }
        let mut f = Vec::new();
        let w = n + 1;
        for y in 0..n {
            for x in 0..n {
                let a = y * w + x;
                f.push([a, a + 1, a + w + 1]);
                f.push([a, a + w + 1, a + w]);
            }
        }
        (v, f)
    }

    fn flat_hierarchy(n: usize, seed: u64) -> (Hierarchy, Vec<[usize; 3]>) {
        let (v, f) = grid(n);
        let adj = generate_adjacency_matrix_uniform(v.len(), &f);
        let len = v.len();
        let mut h = Hierarchy::build(v, vec![Vector3::z(); len], vec![1.0; len], adj, 1.0, seed).unwrap();
        h.initialize_fields();
        (h, f)
    }

    #[test]
    fn test_flat_field_becomes_smooth() {
        let (mut h, faces) = flat_hierarchy(8, 3);
        optimize_orientations(&mut h);
        let level = &h.levels[0];
        assert!(level.q.iter().all(|q| (q.norm() - 1.0).abs() < 1e-9 && q.z.abs() < 1e-9));
        let singular = orientation_singularities(&level.q, &level.n, &faces);
        assert!(singular.is_empty(), "unexpected singular faces {:?}", singular);
    }

    #[test]
    fn test_constraint_pulls_field() {
        let (mut h, _) = flat_hierarchy(6, 5);
        let dir = Vector3::new(1.0, 1.0, 0.0).normalize();
        for i in 0..h.levels[0].len() {
            h.levels[0].cq[i] = dir;
            h.levels[0].cqw[i] = 1.0;
        }
        h.propagate_constraints();
        optimize_orientations(&mut h);
        for q in &h.levels[0].q {
            let (a, b) = compat_orientation_extrinsic_4(&dir, &Vector3::z(), q, &Vector3::z());
            assert!(a.dot(&b) > 0.999);
        }
    }

    #[test]
    fn test_optimization_is_deterministic() {
        let (mut a, _) = flat_hierarchy(5, 9);
        let (mut b, _) = flat_hierarchy(5, 9);
        optimize_orientations(&mut a);
        optimize_orientations(&mut b);
        assert_eq!(a.levels[0].q, b.levels[0].q);
    }

    #[test]
    fn test_uniform_field_has_no_singularity() {
        let n = vec![Vector3::z(); 3];
        let q = vec![Vector3::x(), Vector3::x(), Vector3::x()];
        assert!(orientation_singularities(&q, &n, &[[0, 1, 2]]).is_empty());
    }
}
