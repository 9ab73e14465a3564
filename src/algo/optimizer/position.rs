//! Position-field relaxation.

use std::time::Instant;

use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;

use super::SWEEPS_PER_LEVEL;
use crate::algo::field_math::{
    compat_orientation_extrinsic_index_4, compat_position_extrinsic_4, position_round_4, LatticeFrame,
};
use crate::algo::hierarchy::{Hierarchy, Level};

/// Lattice frame of vertex `i` with anchor `o`.
#[inline]
fn frame(level: &Level, i: usize, o: Vector3<f64>, scale: f64) -> LatticeFrame {
    LatticeFrame {
        p: level.v[i],
        n: level.n[i],
        q: level.q[i],
        o,
        scale: level.s[i] * scale,
    }
}

/// Point on the constraint of vertex `i` closest to `p`: a line when a
/// direction constraint is also set, otherwise a single point.
fn constraint_target(level: &Level, i: usize, p: &Vector3<f64>) -> Vector3<f64> {
    let co = level.co[i];
    if level.cqw[i] > 0.0 {
        let d = level.cq[i];
        co + d * d.dot(&(p - co))
    } else {
        co
    }
}

fn relax_position(level: &Level, i: usize, scale: f64) -> Vector3<f64> {
    let (v_i, n_i) = (level.v[i], level.n[i]);
    let mut sum = level.o[i];
    let mut weight_sum = 0.0;
    for link in &level.adj[i] {
        let j = link.id;
        let w = link.weight;
        if w <= 0.0 {
            continue;
        }
        let (ri, rj) = compat_orientation_extrinsic_index_4(&level.q[i], &n_i, &level.q[j], &level.n[j]);
        let fi = frame(level, i, sum, scale).rotated(ri);
        let fj = frame(level, j, level.o[j], scale).rotated(rj);
        let (pa, pb) = compat_position_extrinsic_4(&fi, &fj);
        sum = (pa * weight_sum + pb * w) / (weight_sum + w);
        weight_sum += w;
        sum -= n_i * n_i.dot(&(sum - v_i));
    }

    let cw = level.cow[i];
    if cw > 0.0 {
        let target = constraint_target(level, i, &sum);
        sum = sum * (1.0 - cw) + target * cw;
        sum -= n_i * n_i.dot(&(sum - v_i));
    }

    if weight_sum > 0.0 || cw > 0.0 {
        let s: Vector2<f64> = level.s[i] * scale;
        position_round_4(&sum, &level.q[i], &n_i, &v_i, s)
    } else {
        level.o[i]
    }
}

/// Gauss-Seidel sweeps over the colour phases of one level.
pub fn relax_position_level(level: &mut Level, scale: f64, sweeps: usize) {
    for _ in 0..sweeps {
        for p in 0..level.phases.len() {
            let view = &*level;
            let updates: Vec<(usize, Vector3<f64>)> = view.phases[p]
                .par_iter()
                .map(|&i| (i, relax_position(view, i, scale)))
                .collect();
            for (i, o) in updates {
                level.o[i] = o;
            }
        }
    }
}

/// Copy the level-`l` anchors onto the tangent planes of the level-`l - 1`
/// children.
pub fn prolong_positions(hierarchy: &mut Hierarchy, l: usize) {
    let (lower, upper) = hierarchy.levels.split_at_mut(l);
    let fine = &mut lower[l - 1];
    let coarse = &upper[0];
    let to_lower = &hierarchy.to_lower[l - 1];
    let values: Vec<Vector3<f64>> = (0..fine.len())
        .into_par_iter()
        .map(|i| {
            let o = coarse.o[to_lower[i]];
            let n = fine.n[i];
            o - n * n.dot(&(o - fine.v[i]))
        })
        .collect();
    fine.o = values;
}

/// Smooth the position field coarse-to-fine.
pub fn optimize_positions(hierarchy: &mut Hierarchy) {
    let start = Instant::now();
    let scale = hierarchy.scale;
    for l in (0..hierarchy.depth()).rev() {
        relax_position_level(&mut hierarchy.levels[l], scale, SWEEPS_PER_LEVEL);
        if l > 0 {
            prolong_positions(hierarchy, l);
        }
    }
    log::info!("position field: {} levels in {:.2?}", hierarchy.depth(), start.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::adjacency::generate_adjacency_matrix_uniform;
    use crate::algo::optimizer::optimize_orientations;

    fn plane(n: usize, spacing: f64) -> Hierarchy {
        let mut v = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                v.push(Vector3::new(x as f64 * spacing, y as f64 * spacing, 0.0));
            }
        }
        let w = n + 1;
        let mut f = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let a = y * w + x;
                f.push([a, a + 1, a + w + 1]);
                f.push([a, a + w + 1, a + w]);
            }
        }
        let adj = generate_adjacency_matrix_uniform(v.len(), &f);
        let len = v.len();
        let mut h = Hierarchy::build(v, vec![Vector3::z(); len], vec![1.0; len], adj, 1.0, 7).unwrap();
        h.initialize_fields();
        h
    }

    #[test]
    fn test_anchors_stay_near_vertices() {
        let mut h = plane(8, 0.5);
        optimize_orientations(&mut h);
        optimize_positions(&mut h);
        let level = &h.levels[0];
        for i in 0..level.len() {
            let d = level.o[i] - level.v[i];
            assert!(d.z.abs() < 1e-9);
            // Rounded to the own lattice: within half a cell diagonal.
            assert!(d.norm() <= 0.5f64.sqrt() * h.scale + 1e-9, "vertex {} off by {}", i, d.norm());
        }
    }

    #[test]
    fn test_flat_lattice_is_shared() {
        let mut h = plane(8, 0.5);
        optimize_orientations(&mut h);
        optimize_positions(&mut h);
        let level = &h.levels[0];
        // Neighbouring anchors sit on one common lattice: their offset is an
        // integer combination of the axes.
        let mut aligned = 0;
        let mut total = 0;
        for i in 0..level.len() {
            for link in &level.adj[i] {
                let j = link.id;
                let d = level.o[j] - level.o[i];
                let t = level.n[i].cross(&level.q[i]);
                let (x, y) = (level.q[i].dot(&d) / h.scale, t.dot(&d) / h.scale);
                total += 1;
                if (x - x.round()).abs() < 0.05 && (y - y.round()).abs() < 0.05 {
                    aligned += 1;
                }
            }
        }
        assert!(aligned * 10 >= total * 9, "{} of {} neighbour pairs aligned", aligned, total);
    }
}
