//! Coarsening of the integer jump graph.
//!
//! A face whose jumps already close up and that has a zero-jump side can be
//! removed: the zero side is pinned to zero and the two other sides are tied
//! together by the face equation `rshift90(D1, q1) + rshift90(D2, q2) = 0`,
//! i.e. `D2 = rshift90(D1, q1 - q2 + 2)`. Tied edges become one coarse edge;
//! every coarse solution therefore prolongs to a fine solution.

use crate::algo::disjoint_tree::DisjointOrientTree;
use crate::algo::field_math::{rshift90, Vec2i};
use crate::mesh::{LatticeMesh, INVALID};

/// Integer jump graph at one pyramid level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeGraph {
    /// Jump of each edge.
    pub diff: Vec<Vec2i>,
    /// Whether each jump component may change.
    pub allow_change: Vec<[bool; 2]>,
    /// Sides of each face; [`INVALID`] for sides pinned to zero.
    pub f2e: Vec<[usize; 3]>,
    /// Quarter turns from edge frame to face frame, per side.
    pub fq: Vec<[i32; 3]>,
}

impl EdgeGraph {
    /// Copy the integer data of a lattice mesh.
    pub fn from_lattice(mesh: &LatticeMesh) -> Self {
        Self {
            diff: mesh.diff.clone(),
            allow_change: mesh.allow_change.clone(),
            f2e: mesh.f2e.clone(),
            fq: mesh.fq.clone(),
        }
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.diff.len()
    }

    /// Number of faces.
    pub fn num_faces(&self) -> usize {
        self.f2e.len()
    }

    /// Rotated jump of side `k` of face `f` (zero for pinned sides).
    #[inline]
    pub fn face_vector(&self, f: usize, k: usize) -> Vec2i {
        let e = self.f2e[f][k];
        if e == INVALID {
            Vec2i::zeros()
        } else {
            rshift90(self.diff[e], self.fq[f][k])
        }
    }

    /// Residual of the face equation.
    pub fn face_sum(&self, f: usize) -> Vec2i {
        (0..3).map(|k| self.face_vector(f, k)).fold(Vec2i::zeros(), |a, b| a + b)
    }

    /// Incident `(face, side)` pairs of every edge.
    pub fn edge_faces(&self) -> Vec<Vec<(usize, usize)>> {
        let mut e2f = vec![Vec::with_capacity(2); self.diff.len()];
        for (f, sides) in self.f2e.iter().enumerate() {
            for (k, &e) in sides.iter().enumerate() {
                if e != INVALID {
                    e2f[e].push((f, k));
                }
            }
        }
        e2f
    }
}

/// Coarse-to-fine sequence of jump graphs.
#[derive(Debug, Clone, Default)]
pub struct EdgePyramid {
    /// Graphs, finest first.
    pub levels: Vec<EdgeGraph>,
    /// `to_upper_edges[l][e]`: coarse edge of level-`l` edge `e`, or
    /// [`INVALID`] if it was pinned to zero.
    pub to_upper_edges: Vec<Vec<usize>>,
    /// `to_upper_orients[l][e]`: quarter turns with
    /// `D_fine = rshift90(D_coarse, orient)`.
    pub to_upper_orients: Vec<Vec<i32>>,
    /// `to_upper_faces[l][f]`: coarse face of level-`l` face `f`, or
    /// [`INVALID`] if it was removed.
    pub to_upper_faces: Vec<Vec<usize>>,
}

impl EdgePyramid {
    /// Coarsen `base` until a level stops shrinking noticeably or
    /// `max_levels` levels exist.
    pub fn build(base: EdgeGraph, max_levels: usize) -> Self {
        let mut pyramid = Self {
            levels: vec![base],
            ..Self::default()
        };
        while pyramid.levels.len() < max_levels.max(1) {
            let fine = &pyramid.levels[pyramid.levels.len() - 1];
            let Some((coarse, edges, orients, faces)) = coarsen(fine) else {
                break;
            };
            let shrink = coarse.num_edges() as f64 / fine.num_edges().max(1) as f64;
            log::debug!(
                "edge pyramid level {}: {} edges, {} faces",
                pyramid.levels.len(),
                coarse.num_edges(),
                coarse.num_faces()
            );
            pyramid.levels.push(coarse);
            pyramid.to_upper_edges.push(edges);
            pyramid.to_upper_orients.push(orients);
            pyramid.to_upper_faces.push(faces);
            if shrink > 0.95 {
                break;
            }
        }
        pyramid
    }

    /// Number of levels.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Overwrite the jumps of level `l` with the prolonged jumps of level `l + 1`.
    pub fn prolong(&mut self, l: usize) {
        let (lower, upper) = self.levels.split_at_mut(l + 1);
        let fine = &mut lower[l];
        let coarse = &upper[0];
        for (e, d) in fine.diff.iter_mut().enumerate() {
            let c = self.to_upper_edges[l][e];
            *d = if c == INVALID {
                Vec2i::zeros()
            } else {
                rshift90(coarse.diff[c], self.to_upper_orients[l][e])
            };
        }
    }
}

/// One coarsening step. Returns `None` when no face can be removed.
pub fn coarsen(fine: &EdgeGraph) -> Option<(EdgeGraph, Vec<usize>, Vec<i32>, Vec<usize>)> {
    let ne = fine.num_edges();
    let nf = fine.num_faces();
    let mut tree = DisjointOrientTree::new(ne);
    let mut touched = vec![false; ne];
    let mut pinned = vec![false; ne];
    let mut removed = vec![false; nf];
    let mut collapses = 0;

    for f in 0..nf {
        let sides = fine.f2e[f];
        if sides.iter().any(|&e| e == INVALID || touched[e]) {
            continue;
        }
        if sides[0] == sides[1] || sides[1] == sides[2] || sides[0] == sides[2] {
            continue;
        }
        if fine.face_sum(f) != Vec2i::zeros() {
            continue;
        }
        let Some(k) = (0..3).find(|&k| fine.diff[sides[k]] == Vec2i::zeros()) else {
            continue;
        };
        let (e1, e2) = (sides[(k + 1) % 3], sides[(k + 2) % 3]);
        let (q1, q2) = (fine.fq[f][(k + 1) % 3], fine.fq[f][(k + 2) % 3]);
        let relation = (q1 - q2 + 2).rem_euclid(4) as u8;
        if !tree.merge(e1, e2, 0, relation) {
            continue;
        }
        for &e in &sides {
            touched[e] = true;
        }
        pinned[sides[k]] = true;
        removed[f] = true;
        collapses += 1;
    }
    if collapses == 0 {
        return None;
    }

    // Number the surviving classes by their roots.
    let mut root_id = vec![INVALID; ne];
    let mut to_upper_edges = vec![INVALID; ne];
    let mut to_upper_orients = vec![0i32; ne];
    let mut diff = Vec::new();
    let mut allow_change: Vec<[bool; 2]> = Vec::new();
    for e in 0..ne {
        if pinned[e] {
            continue;
        }
        let root = tree.parent(e);
        if root_id[root] == INVALID {
            root_id[root] = diff.len();
            diff.push(fine.diff[root]);
            allow_change.push([true; 2]);
        }
        let c = root_id[root];
        let orient = i32::from(tree.orient(e));
        to_upper_edges[e] = c;
        to_upper_orients[e] = orient;
        // Odd turns swap the components.
        let swap = (orient & 1) as usize;
        for comp in 0..2 {
            allow_change[c][comp ^ swap] &= fine.allow_change[e][comp];
        }
    }

    let mut to_upper_faces = vec![INVALID; nf];
    let mut f2e = Vec::new();
    let mut fq = Vec::new();
    for f in 0..nf {
        if removed[f] {
            continue;
        }
        let mut sides = [INVALID; 3];
        let mut turns = [0i32; 3];
        for k in 0..3 {
            let e = fine.f2e[f][k];
            if e == INVALID || to_upper_edges[e] == INVALID {
                continue;
            }
            sides[k] = to_upper_edges[e];
            turns[k] = (fine.fq[f][k] + to_upper_orients[e]).rem_euclid(4);
        }
        if sides.iter().all(|&e| e == INVALID) {
            continue;
        }
        to_upper_faces[f] = f2e.len();
        f2e.push(sides);
        fq.push(turns);
    }

    let coarse = EdgeGraph {
        diff,
        allow_change,
        f2e,
        fq,
    };
    Some((coarse, to_upper_edges, to_upper_orients, to_upper_faces))
}
