//! Output vertex refinement.
//!
//! Each pass solves `(L + λW) x = λW t` per coordinate, with `L` the uniform
//! Laplacian of the quad mesh, `t` the anchor target of every vertex and `W`
//! its anchor weight. Targets depend on the mode:
//!
//! - [`RefineMode::Dynamic`]: every vertex is pulled onto the tangent plane of
//!   its surface sample; the projection is redone after each solve.
//! - [`RefineMode::Sharp`]: sharp vertices additionally slide along the line
//!   through their two sharp neighbours.
//! - [`RefineMode::Fixed`]: boundary and sharp vertices are pinned to their
//!   surface sample.

use nalgebra::{DVector, Vector3};

use crate::algo::sparse::{conjugate_gradient, CsrMatrix};

/// Anchor strength relative to the Laplacian.
pub const REFINE_LAMBDA: f64 = 10.0;

const PIN_WEIGHT: f64 = 1e4;
const LINE_WEIGHT: f64 = 1e2;

/// Refinement flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineMode {
    /// Pin boundary and sharp vertices.
    Fixed,
    /// Keep sharp vertices on their feature line.
    Sharp,
    /// Re-project onto the surface every iteration.
    Dynamic,
}

/// Surface sample an output vertex is tied to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    /// Point on the input surface.
    pub point: Vector3<f64>,
    /// Surface normal at `point`.
    pub normal: Vector3<f64>,
    /// Lies on a sharp feature.
    pub sharp: bool,
    /// Lies on the input boundary.
    pub boundary: bool,
}

fn quad_neighbors(num_vertices: usize, quads: &[[usize; 4]]) -> Vec<Vec<usize>> {
    let mut adj = vec![Vec::new(); num_vertices];
    for q in quads {
        for k in 0..4 {
            let (a, b) = (q[k], q[(k + 1) % 4]);
            adj[a].push(b);
            adj[b].push(a);
        }
    }
    for list in &mut adj {
        list.sort_unstable();
        list.dedup();
    }
    adj
}

/// Feature direction of every sharp vertex with exactly two sharp neighbours.
fn feature_lines(adj: &[Vec<usize>], anchors: &[Anchor]) -> Vec<Option<Vector3<f64>>> {
    (0..anchors.len())
        .map(|i| {
            if !anchors[i].sharp {
                return None;
            }
            let sharp: Vec<usize> = adj[i].iter().copied().filter(|&j| anchors[j].sharp).collect();
            if sharp.len() != 2 {
                return None;
            }
            let d = anchors[sharp[1]].point - anchors[sharp[0]].point;
            let len = d.norm();
            (len > 1e-12).then(|| d / len)
        })
        .collect()
}

/// Target and weight of vertex `i` for one pass.
fn target(
    mode: RefineMode,
    x: &Vector3<f64>,
    anchor: &Anchor,
    line: Option<Vector3<f64>>,
) -> (Vector3<f64>, f64) {
    let on_plane = x - anchor.normal * anchor.normal.dot(&(x - anchor.point));
    match mode {
        RefineMode::Dynamic => (on_plane, 1.0),
        RefineMode::Sharp => match (anchor.sharp, line) {
            (true, Some(d)) => (anchor.point + d * d.dot(&(x - anchor.point)), LINE_WEIGHT),
            (true, None) => (anchor.point, PIN_WEIGHT),
            _ => (on_plane, 1.0),
        },
        RefineMode::Fixed => {
            if anchor.boundary || anchor.sharp {
                (anchor.point, PIN_WEIGHT)
            } else {
                (on_plane, 1.0)
            }
        }
    }
}

/// Run `iterations` refinement passes. Returns the number of passes that
/// converged; a failed pass keeps the previous positions and stops.
pub fn refine_positions(
    positions: &mut [Vector3<f64>],
    quads: &[[usize; 4]],
    anchors: &[Anchor],
    mode: RefineMode,
    iterations: usize,
) -> usize {
    let n = positions.len();
    if n == 0 || quads.is_empty() {
        return 0;
    }
    let adj = quad_neighbors(n, quads);
    let lines = if mode == RefineMode::Sharp {
        feature_lines(&adj, anchors)
    } else {
        vec![None; n]
    };

    for pass in 0..iterations {
        let goals: Vec<(Vector3<f64>, f64)> = (0..n)
            .map(|i| target(mode, &positions[i], &anchors[i], lines[i]))
            .collect();

        let mut triplets = Vec::with_capacity(n + adj.iter().map(Vec::len).sum::<usize>());
        for (i, list) in adj.iter().enumerate() {
            for &j in list {
                triplets.push((i, j, -1.0));
            }
            triplets.push((i, i, list.len() as f64 + REFINE_LAMBDA * goals[i].1));
        }
        let a = CsrMatrix::from_triplets(n, n, triplets);

        let mut solved = Vec::with_capacity(3);
        for axis in 0..3 {
            let b = DVector::from_iterator(n, goals.iter().map(|(t, w)| REFINE_LAMBDA * w * t[axis]));
            let x0 = DVector::from_iterator(n, positions.iter().map(|p| p[axis]));
            match conjugate_gradient(&a, &b, Some(&x0), 1000, 1e-9) {
                Ok(x) => solved.push(x),
                Err(e) => {
                    log::warn!("{:?} refinement pass {} failed: {}", mode, pass, e);
                    return pass;
                }
            }
        }
        for (i, p) in positions.iter_mut().enumerate() {
            *p = Vector3::new(solved[0][i], solved[1][i], solved[2][i]);
        }
    }
    log::debug!("{:?} refinement: {} passes on {} vertices", mode, iterations, n);
    iterations
}
