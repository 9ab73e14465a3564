//! Triangle mesh annotated with integer lattice jumps.
//!
//! Every undirected edge stores a jump `diff` between the lattice points of its
//! two endpoints, expressed in a fixed per-edge frame. A face sees edge `k`
//! (from corner `k` to corner `k + 1`) as `rshift90(diff, fq[k])`; `fq` folds
//! both the frame change and the traversal direction into one quarter-turn
//! count, so a face is consistent when its three rotated jumps sum to zero.

use std::collections::HashMap;

use nalgebra::{Vector2, Vector3};

use crate::algo::field_math::{lattice_cross, rshift90, Vec2i};

/// Integer-labelled triangle mesh used from edge-info construction to quad
/// extraction.
#[derive(Debug, Clone, Default)]
pub struct LatticeMesh {
    /// Vertex positions.
    pub v: Vec<Vector3<f64>>,
    /// Vertex normals.
    pub n: Vec<Vector3<f64>>,
    /// Orientation field.
    pub q: Vec<Vector3<f64>>,
    /// Position field (lattice point of each vertex).
    pub o: Vec<Vector3<f64>>,
    /// Lattice spacing along `q` and `n×q`.
    pub scale: Vec<Vector2<f64>>,
    /// Vertex lies on the input boundary.
    pub boundary: Vec<bool>,
    /// Vertex lies on a constrained sharp edge.
    pub sharp: Vec<bool>,
    /// Triangles.
    pub faces: Vec<[usize; 3]>,
    /// Undirected edges as `[start, end]`.
    pub edges: Vec<[usize; 2]>,
    /// Edge is a constrained sharp feature.
    pub sharp_edge: Vec<bool>,
    /// Integer jump of each edge.
    pub diff: Vec<Vec2i>,
    /// Whether each component of an edge jump may be changed.
    pub allow_change: Vec<[bool; 2]>,
    /// Edge of each face side (`f2e[f][k]` joins corners `k` and `k + 1`).
    pub f2e: Vec<[usize; 3]>,
    /// Quarter turns mapping each edge jump into its face frame.
    pub fq: Vec<[i32; 3]>,
}

impl LatticeMesh {
    /// Build the edge structure of a triangle mesh with all jumps zero.
    ///
    /// Edges are stored with `start < end`.
    pub fn from_triangles(v: Vec<Vector3<f64>>, n: Vec<Vector3<f64>>, faces: Vec<[usize; 3]>) -> Self {
        let nv = v.len();
        let mut lookup: HashMap<(usize, usize), usize> = HashMap::with_capacity(faces.len() * 2);
        let mut edges = Vec::with_capacity(faces.len() * 3 / 2 + 1);
        let mut f2e = Vec::with_capacity(faces.len());
        for f in &faces {
            let mut ids = [0usize; 3];
            for k in 0..3 {
                let (a, b) = (f[k], f[(k + 1) % 3]);
                let key = (a.min(b), a.max(b));
                ids[k] = *lookup.entry(key).or_insert_with(|| {
                    edges.push([key.0, key.1]);
                    edges.len() - 1
                });
            }
            f2e.push(ids);
        }
        let ne = edges.len();
        Self {
            q: vec![Vector3::x(); nv],
            o: v.clone(),
            scale: vec![Vector2::new(1.0, 1.0); nv],
            boundary: vec![false; nv],
            sharp: vec![false; nv],
            v,
            n,
            fq: vec![[0; 3]; faces.len()],
            faces,
            edges,
            sharp_edge: vec![false; ne],
            diff: vec![Vec2i::zeros(); ne],
            allow_change: vec![[true; 2]; ne],
            f2e,
        }
    }

    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.v.len()
    }

    /// Number of faces.
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Number of undirected edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Jump along side `k` of face `f`, in the face frame.
    #[inline]
    pub fn face_vector(&self, f: usize, k: usize) -> Vec2i {
        rshift90(self.diff[self.f2e[f][k]], self.fq[f][k])
    }

    /// Sum of the three rotated jumps of a face.
    pub fn face_sum(&self, f: usize) -> Vec2i {
        (0..3).map(|k| self.face_vector(f, k)).fold(Vec2i::zeros(), |a, b| a + b)
    }

    /// Twice the signed lattice area of a face.
    #[inline]
    pub fn face_area(&self, f: usize) -> i32 {
        lattice_cross(self.face_vector(f, 0), self.face_vector(f, 1))
    }

    /// Faces whose jumps do not close up.
    pub fn inconsistent_faces(&self) -> Vec<usize> {
        (0..self.faces.len()).filter(|&f| self.face_sum(f) != Vec2i::zeros()).collect()
    }

    /// Faces with negative lattice area.
    pub fn flipped_faces(&self) -> Vec<usize> {
        (0..self.faces.len()).filter(|&f| self.face_area(f) < 0).collect()
    }

    /// Incident `(face, side)` pairs of every edge.
    pub fn edge_faces(&self) -> Vec<Vec<(usize, usize)>> {
        let mut e2f = vec![Vec::with_capacity(2); self.edges.len()];
        for (f, ids) in self.f2e.iter().enumerate() {
            for (k, &e) in ids.iter().enumerate() {
                e2f[e].push((f, k));
            }
        }
        e2f
    }

    /// Edges with a single incident face.
    pub fn boundary_edges(&self) -> Vec<bool> {
        self.edge_faces().iter().map(|l| l.len() == 1).collect()
    }
}
