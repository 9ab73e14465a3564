//! Output quad mesh.

use std::collections::{HashMap, HashSet};

use nalgebra::Point3;

use super::dedge::{DirectedEdges, INVALID};

/// A quad-dominant output mesh: positions plus 4-tuples of vertex indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuadMesh {
    /// Vertex positions.
    pub vertices: Vec<Point3<f64>>,
    /// Quads as counter-clockwise vertex indices.
    pub quads: Vec<[usize; 4]>,
}

impl QuadMesh {
    /// Create a mesh from raw arrays.
    pub fn new(vertices: Vec<Point3<f64>>, quads: Vec<[usize; 4]>) -> Self {
        Self { vertices, quads }
    }

    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of quads.
    pub fn num_faces(&self) -> usize {
        self.quads.len()
    }

    /// True if the mesh has no quads.
    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    /// Directed edges `(a, b)` of quads that have no opposite edge `(b, a)`.
    pub fn boundary_edges(&self) -> Vec<(usize, usize)> {
        let topo = DirectedEdges::<4>::build(self.vertices.len(), &self.quads);
        topo.e2e
            .iter()
            .enumerate()
            .filter(|(_, &o)| o == INVALID)
            .map(|(e, _)| {
                let q = &self.quads[e / 4];
                (q[e % 4], q[(e + 1) % 4])
            })
            .collect()
    }

    /// Number of undirected edges.
    pub fn num_edges(&self) -> usize {
        let mut edges = HashSet::new();
        for q in &self.quads {
            for k in 0..4 {
                let (a, b) = (q[k], q[(k + 1) % 4]);
                edges.insert((a.min(b), a.max(b)));
            }
        }
        edges.len()
    }

    /// Number of quads incident to each vertex.
    pub fn valences(&self) -> Vec<usize> {
        let mut valence = vec![0; self.vertices.len()];
        for q in &self.quads {
            for &v in q {
                valence[v] += 1;
            }
        }
        valence
    }

    /// Drop vertices no quad refers to and renumber the rest.
    ///
    /// Returns the number of removed vertices.
    pub fn remove_unreferenced_vertices(&mut self) -> usize {
        let before = self.vertices.len();
        let kept = self.compact_vertices();
        before - kept.len()
    }

    /// Renumber referenced vertices in order of first use and drop the rest.
    ///
    /// Returns the old index of every kept vertex.
    pub fn compact_vertices(&mut self) -> Vec<usize> {
        let mut remap: HashMap<usize, usize> = HashMap::with_capacity(self.vertices.len());
        let mut kept = Vec::with_capacity(self.vertices.len());
        for q in &mut self.quads {
            for v in q.iter_mut() {
                let next = kept.len();
                let id = *remap.entry(*v).or_insert_with(|| {
                    kept.push(*v);
                    next
                });
                *v = id;
            }
        }
        self.vertices = kept.iter().map(|&i| self.vertices[i]).collect();
        kept
    }
}
