//! Multi-resolution pyramids.
//!
//! [`Hierarchy`] holds the vertex-graph pyramid the field solvers run on:
//! level 0 is the input mesh, each further level contracts a greedy matching
//! of the previous one. It also owns the [`EdgePyramid`] over the integer
//! jump graph that the integer constraint solver walks coarse-to-fine.
//!
//! # Example
//!
//! ```
//! use nalgebra::Vector3;
//! use quadriflow::algo::adjacency::generate_adjacency_matrix_uniform;
//! use quadriflow::algo::hierarchy::Hierarchy;
//!
//! let v = vec![
//!     Vector3::new(0.0, 0.0, 0.0),
//!     Vector3::new(1.0, 0.0, 0.0),
//!     Vector3::new(1.0, 1.0, 0.0),
//!     Vector3::new(0.0, 1.0, 0.0),
//! ];
//! let faces = vec![[0, 1, 2], [0, 2, 3]];
//! let adj = generate_adjacency_matrix_uniform(4, &faces);
//! let hierarchy = Hierarchy::build(v, vec![Vector3::z(); 4], vec![0.5; 4], adj, 0.5, 1).unwrap();
//! assert_eq!(hierarchy.levels.last().unwrap().len(), 1);
//! ```
//!
//! # References
//!
//! - Jakob, W., et al. (2015). "Instant Field-Aligned Meshes." ACM SIGGRAPH Asia.

mod edge_pyramid;

pub use edge_pyramid::{EdgeGraph, EdgePyramid};

use std::collections::BTreeMap;
use std::time::Instant;

use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::algo::adjacency::{generate_graph_coloring_deterministic, AdjacentMatrix, Link};
use crate::algo::field_math::{compat_orientation_extrinsic_4, coordinate_system, tangential};
use crate::error::Result;
use crate::mesh::INVALID;

/// Maximum number of pyramid levels.
pub const MAX_DEPTH: usize = 25;

/// One level of the vertex pyramid with its field values.
#[derive(Debug, Clone, Default)]
pub struct Level {
    /// Positions.
    pub v: Vec<Vector3<f64>>,
    /// Unit normals.
    pub n: Vec<Vector3<f64>>,
    /// Vertex areas.
    pub a: Vec<f64>,
    /// Weighted one-ring adjacency.
    pub adj: AdjacentMatrix,
    /// Independent sets for race-free parallel sweeps.
    pub phases: Vec<Vec<usize>>,
    /// Orientation field.
    pub q: Vec<Vector3<f64>>,
    /// Position field.
    pub o: Vec<Vector3<f64>>,
    /// Relative lattice spacing along `q` and `n×q`.
    pub s: Vec<Vector2<f64>>,
    /// Constraint direction.
    pub cq: Vec<Vector3<f64>>,
    /// Constraint direction weight (0 when unconstrained).
    pub cqw: Vec<f64>,
    /// Constraint position (a point on the constraint line).
    pub co: Vec<Vector3<f64>>,
    /// Constraint position weight.
    pub cow: Vec<f64>,
}

impl Level {
    fn new(v: Vec<Vector3<f64>>, n: Vec<Vector3<f64>>, a: Vec<f64>, adj: AdjacentMatrix) -> Self {
        let len = v.len();
        Self {
            q: vec![Vector3::zeros(); len],
            o: v.clone(),
            s: vec![Vector2::new(1.0, 1.0); len],
            cq: vec![Vector3::zeros(); len],
            cqw: vec![0.0; len],
            co: vec![Vector3::zeros(); len],
            cow: vec![0.0; len],
            v,
            n,
            a,
            adj,
            phases: Vec::new(),
        }
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.v.len()
    }

    /// True if the level has no vertices.
    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }
}

/// Vertex pyramid plus the integer edge pyramid.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    /// Levels, finest first.
    pub levels: Vec<Level>,
    /// `to_upper[l][c]`: the one or two level-`l` vertices merged into
    /// level-`l + 1` vertex `c` (second entry [`INVALID`] for a single child).
    pub to_upper: Vec<Vec<[usize; 2]>>,
    /// `to_lower[l][i]`: the level-`l + 1` vertex containing level-`l` vertex `i`.
    pub to_lower: Vec<Vec<usize>>,
    /// Target lattice spacing at level 0.
    pub scale: f64,
    /// Seed for colouring and field initialization.
    pub seed: u64,
    /// Pyramid over the integer jump graph.
    pub edges: EdgePyramid,
}

impl Hierarchy {
    /// Build the pyramid from level-0 geometry.
    pub fn build(
        v: Vec<Vector3<f64>>,
        n: Vec<Vector3<f64>>,
        a: Vec<f64>,
        adj: AdjacentMatrix,
        scale: f64,
        seed: u64,
    ) -> Result<Self> {
        let start = Instant::now();
        let mut level = Level::new(v, n, a, adj);
        level.phases = generate_graph_coloring_deterministic(&level.adj, level.len(), seed)?;

        let mut hierarchy = Self {
            levels: vec![level],
            to_upper: Vec::new(),
            to_lower: Vec::new(),
            scale,
            seed,
            edges: EdgePyramid::default(),
        };

        while hierarchy.levels.len() < MAX_DEPTH {
            let fine = hierarchy.levels.last().map_or(0, Level::len);
            if fine <= 1 {
                break;
            }
            let Some((mut coarse, to_upper, to_lower)) = downsample_graph(&hierarchy.levels[hierarchy.levels.len() - 1])
            else {
                break;
            };
            let depth = hierarchy.levels.len() as u64;
            coarse.phases = generate_graph_coloring_deterministic(&coarse.adj, coarse.len(), seed.wrapping_add(depth))?;
            log::debug!(
                "hierarchy level {}: {} vertices, {} phases",
                depth,
                coarse.len(),
                coarse.phases.len()
            );
            hierarchy.levels.push(coarse);
            hierarchy.to_upper.push(to_upper);
            hierarchy.to_lower.push(to_lower);
        }

        log::info!(
            "built hierarchy with {} levels in {:.2?}",
            hierarchy.levels.len(),
            start.elapsed()
        );
        Ok(hierarchy)
    }

    /// Number of levels.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Seed the level-0 fields and restrict them to every coarser level.
    ///
    /// Orientations are random tangent directions, positions are random
    /// lattice offsets within one cell of each vertex. The sequence only
    /// depends on the seed.
    pub fn initialize_fields(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let scale = self.scale;
        let level = &mut self.levels[0];
        for i in 0..level.len() {
            let (s, t) = coordinate_system(&level.n[i]);
            let angle: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
            level.q[i] = s * angle.cos() + t * angle.sin();
            let (x, y): (f64, f64) = (rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5));
            level.o[i] = level.v[i] + (s * x + t * y) * scale;
        }
        for l in 0..self.levels.len() - 1 {
            self.restrict_fields(l);
        }
    }

    /// Copy level-`l` fields onto level `l + 1`: orientations combined with
    /// the orientation symmetry, positions averaged and projected onto the
    /// coarse tangent plane, scales averaged.
    pub fn restrict_fields(&mut self, l: usize) {
        let (lower, upper) = self.levels.split_at_mut(l + 1);
        let fine = &lower[l];
        let coarse = &mut upper[0];
        let map = &self.to_upper[l];
        let values: Vec<_> = (0..coarse.len())
            .into_par_iter()
            .map(|c| {
                let [i, j] = map[c];
                let n = coarse.n[c];
                let (mut q, mut o, mut s) = (fine.q[i], fine.o[i], fine.s[i]);
                if j != INVALID {
                    let (qi, qj) = compat_orientation_extrinsic_4(&fine.q[i], &fine.n[i], &fine.q[j], &fine.n[j]);
                    q = qi * fine.a[i] + qj * fine.a[j];
                    let w = fine.a[i] + fine.a[j];
                    o = if w > 0.0 {
                        (fine.o[i] * fine.a[i] + fine.o[j] * fine.a[j]) / w
                    } else {
                        (fine.o[i] + fine.o[j]) * 0.5
                    };
                    s = (fine.s[i] + fine.s[j]) * 0.5;
                }
                let q = tangential(&q, &n);
                let o = o - n * n.dot(&(o - coarse.v[c]));
                (q, o, s)
            })
            .collect();
        for (c, (q, o, s)) in values.into_iter().enumerate() {
            coarse.q[c] = q;
            coarse.o[c] = o;
            coarse.s[c] = s;
        }
    }

    /// Restrict only the scale field, from level 0 up.
    pub fn restrict_scales(&mut self) {
        for l in 0..self.levels.len() - 1 {
            let map = &self.to_upper[l];
            let (lower, upper) = self.levels.split_at_mut(l + 1);
            let fine = &lower[l];
            let coarse = &mut upper[0];
            for (c, &[i, j]) in map.iter().enumerate() {
                coarse.s[c] = if j == INVALID { fine.s[i] } else { (fine.s[i] + fine.s[j]) * 0.5 };
            }
        }
    }

    /// Restrict orientation and position constraints to every coarser level.
    ///
    /// A coarse vertex inherits the combined constraint of its children, so
    /// feature lines stay visible to the coarse sweeps.
    pub fn propagate_constraints(&mut self) {
        for l in 0..self.levels.len() - 1 {
            let map = &self.to_upper[l];
            let (lower, upper) = self.levels.split_at_mut(l + 1);
            let fine = &lower[l];
            let coarse = &mut upper[0];
            for (c, &[i, j]) in map.iter().enumerate() {
                let n = coarse.n[c];
                let pair = [i, j];
                let children = if j == INVALID { &pair[..1] } else { &pair[..] };
                let mut cq = Vector3::zeros();
                let mut cqw = 0.0;
                let mut co = Vector3::zeros();
                let mut cow = 0.0;
                for &k in children {
                    if fine.cqw[k] > 0.0 {
                        let aligned = if cqw > 0.0 {
                            compat_orientation_extrinsic_4(&cq, &n, &fine.cq[k], &fine.n[k]).1
                        } else {
                            fine.cq[k]
                        };
                        cq += aligned * fine.cqw[k];
                        cqw += fine.cqw[k];
                    }
                    if fine.cow[k] > 0.0 {
                        co += fine.co[k] * fine.cow[k];
                        cow += fine.cow[k];
                    }
                }
                coarse.cq[c] = if cqw > 0.0 { tangential(&cq, &n) } else { Vector3::zeros() };
                coarse.cqw[c] = if children.len() > 1 { cqw / children.len() as f64 } else { cqw };
                coarse.co[c] = if cow > 0.0 { co / cow } else { Vector3::zeros() };
                coarse.cow[c] = if children.len() > 1 { cow / children.len() as f64 } else { cow };
            }
        }
    }
}

/// Contract a greedy matching of `fine`.
///
/// Edges are scored by `(n_i·n_j) × max(a_i/a_j, a_j/a_i)` and accepted in
/// descending score order while both endpoints are unmatched. Returns `None`
/// when nothing can be matched.
pub fn downsample_graph(fine: &Level) -> Option<(Level, Vec<[usize; 2]>, Vec<usize>)> {
    let mut entries: Vec<(usize, usize, f64)> = (0..fine.len())
        .into_par_iter()
        .flat_map_iter(|i| {
            fine.adj[i].iter().filter(move |l| l.id > i).map(move |l| {
                let j = l.id;
                let dp = fine.n[i].dot(&fine.n[j]);
                let (ai, aj) = (fine.a[i].max(1e-30), fine.a[j].max(1e-30));
                let ratio = if ai > aj { ai / aj } else { aj / ai };
                (i, j, dp * ratio)
            })
        })
        .collect();
    if entries.is_empty() {
        return None;
    }
    entries.par_sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
            .then(a.1.cmp(&b.1))
    });

    let mut merged = vec![false; fine.len()];
    let mut to_upper: Vec<[usize; 2]> = Vec::with_capacity(fine.len() / 2 + 1);
    for &(i, j, _) in &entries {
        if merged[i] || merged[j] {
            continue;
        }
        merged[i] = true;
        merged[j] = true;
        to_upper.push([i, j]);
    }
    let pairs = to_upper.len();
    for (i, &m) in merged.iter().enumerate() {
        if !m {
            to_upper.push([i, INVALID]);
        }
    }

    let mut to_lower = vec![INVALID; fine.len()];
    for (c, &[i, j]) in to_upper.iter().enumerate() {
        to_lower[i] = c;
        if j != INVALID {
            to_lower[j] = c;
        }
    }

    let nodes: Vec<(Vector3<f64>, Vector3<f64>, f64)> = to_upper
        .par_iter()
        .map(|&[i, j]| {
            if j == INVALID {
                return (fine.v[i], fine.n[i], fine.a[i]);
            }
            let area = fine.a[i] + fine.a[j];
            let (v, n) = if area > 0.0 {
                (
                    (fine.v[i] * fine.a[i] + fine.v[j] * fine.a[j]) / area,
                    fine.n[i] * fine.a[i] + fine.n[j] * fine.a[j],
                )
            } else {
                ((fine.v[i] + fine.v[j]) * 0.5, fine.n[i] + fine.n[j])
            };
            let len = n.norm();
            let n = if len > 1e-20 { n / len } else { fine.n[i] };
            (v, n, area)
        })
        .collect();

    let adj: AdjacentMatrix = to_upper
        .par_iter()
        .enumerate()
        .map(|(c, &[i, j])| {
            let mut acc: BTreeMap<usize, f64> = BTreeMap::new();
            for child in [i, j] {
                if child == INVALID {
                    continue;
                }
                for link in &fine.adj[child] {
                    let target = to_lower[link.id];
                    if target != c {
                        *acc.entry(target).or_insert(0.0) += link.weight;
                    }
                }
            }
            acc.into_iter().map(|(id, w)| Link::new(id, w)).collect()
        })
        .collect();

    let (v, rest): (Vec<_>, Vec<_>) = nodes.into_iter().map(|(v, n, a)| (v, (n, a))).unzip();
    let (n, a): (Vec<_>, Vec<_>) = rest.into_iter().unzip();
    log::trace!("downsample: {} -> {} vertices ({} pairs)", fine.len(), v.len(), pairs);
    Some((Level::new(v, n, a, adj), to_upper, to_lower))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::adjacency::generate_adjacency_matrix_uniform;

    fn grid(n: usize) -> (Vec<Vector3<f64>>, Vec<[usize; 3]>) {
        let mut v = Vec::new();
        for j in 0..=n {
            for i in 0..=n {
                v.push(Vector3::new(i as f64, j as f64, 0.0));
            }
        }
        let mut f = Vec::new();
        for j in 0..n {
            for i in 0..n {
                let v00 = j * (n + 1) + i;
                f.push([v00, v00 + 1, v00 + n + 2]);
                f.push([v00, v00 + n + 2, v00 + n + 1]);
            }
        }
        (v, f)
    }

    fn build_grid(n: usize) -> Hierarchy {
        let (v, f) = grid(n);
        let nv = v.len();
        let adj = generate_adjacency_matrix_uniform(nv, &f);
        let areas = crate::mesh::geometry::vertex_areas(&v, &f);
        Hierarchy::build(v, vec![Vector3::z(); nv], areas, adj, 1.0, 3).unwrap()
    }

    #[test]
    fn test_levels_shrink() {
        let h = build_grid(8);
        assert!(h.depth() > 2);
        for w in h.levels.windows(2) {
            assert!(w[1].len() < w[0].len());
        }
        assert_eq!(h.levels.last().unwrap().len(), 1);
    }

    #[test]
    fn test_area_conserved() {
        let h = build_grid(6);
        for l in 0..h.depth() - 1 {
            let fine = &h.levels[l];
            let coarse = &h.levels[l + 1];
            for (c, &[i, j]) in h.to_upper[l].iter().enumerate() {
                let mut sum = fine.a[i];
                if j != INVALID {
                    sum += fine.a[j];
                }
                assert!((coarse.a[c] - sum).abs() < 1e-12);
            }
            let total_f: f64 = fine.a.iter().sum();
            let total_c: f64 = coarse.a.iter().sum();
            assert!((total_f - total_c).abs() < 1e-9);
        }
    }

    #[test]
    fn test_upper_lower_roundtrip() {
        let h = build_grid(5);
        for l in 0..h.depth() - 1 {
            for (c, children) in h.to_upper[l].iter().enumerate() {
                for &i in children {
                    if i != INVALID {
                        assert_eq!(h.to_lower[l][i], c);
                    }
                }
            }
            assert!(h.to_lower[l].iter().all(|&c| c < h.levels[l + 1].len()));
        }
    }

    #[test]
    fn test_coarse_adjacency_symmetric() {
        let h = build_grid(5);
        for level in &h.levels {
            for (i, links) in level.adj.iter().enumerate() {
                for link in links {
                    assert_ne!(link.id, i);
                    let back = level.adj[link.id].iter().find(|l| l.id == i).unwrap();
                    assert!((back.weight - link.weight).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_initialize_is_deterministic() {
        let mut a = build_grid(4);
        let mut b = build_grid(4);
        a.initialize_fields();
        b.initialize_fields();
        for l in 0..a.depth() {
            assert_eq!(a.levels[l].q, b.levels[l].q);
            assert_eq!(a.levels[l].o, b.levels[l].o);
        }
        // Orientations are unit tangents.
        for q in &a.levels[0].q {
            assert!((q.norm() - 1.0).abs() < 1e-9);
            assert!(q.z.abs() < 1e-9);
        }
    }

    #[test]
    fn test_disconnected_vertices_stop() {
        let level = Level::new(
            vec![Vector3::zeros(), Vector3::x()],
            vec![Vector3::z(); 2],
            vec![1.0; 2],
            vec![Vec::new(), Vec::new()],
        );
        assert!(downsample_graph(&level).is_none());
    }
}
