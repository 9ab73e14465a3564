//! Directed-edge connectivity for triangle and quad meshes.
//!
//! A face with `N` corners owns directed edges `N·f .. N·f + N`; edge
//! `N·f + k` runs from corner `k` to corner `k + 1`. `e2e` maps every directed
//! edge to its opposite (or [`INVALID`] on boundaries and non-manifold edges),
//! `v2e` stores one outgoing edge per vertex. For boundary vertices that edge is
//! chosen so that rotating with [`DirectedEdges::next_around`] sweeps the whole
//! fan before running into the boundary.

use std::collections::HashMap;

/// Sentinel for "no element".
pub const INVALID: usize = usize::MAX;

/// Next directed edge inside the same face.
#[inline]
pub fn dedge_next<const N: usize>(e: usize) -> usize {
    if e % N == N - 1 {
        e + 1 - N
    } else {
        e + 1
    }
}

/// Previous directed edge inside the same face.
#[inline]
pub fn dedge_prev<const N: usize>(e: usize) -> usize {
    if e % N == 0 {
        e + N - 1
    } else {
        e - 1
    }
}

/// Directed-edge topology of a mesh whose faces all have `N` corners.
#[derive(Debug, Clone)]
pub struct DirectedEdges<const N: usize> {
    /// One outgoing directed edge per vertex ([`INVALID`] for isolated vertices).
    pub v2e: Vec<usize>,
    /// Opposite directed edge ([`INVALID`] if none).
    pub e2e: Vec<usize>,
    /// Vertex lies on an open boundary.
    pub boundary: Vec<bool>,
    /// Vertex touches a non-manifold edge or has a disconnected fan.
    pub nonmanifold: Vec<bool>,
}

impl<const N: usize> DirectedEdges<N> {
    /// Build the structure from a face list.
    pub fn build(num_vertices: usize, faces: &[[usize; N]]) -> Self {
        let num_edges = faces.len() * N;
        let mut e2e = vec![INVALID; num_edges];
        let mut v2e = vec![INVALID; num_vertices];
        let mut nonmanifold = vec![false; num_vertices];

        // Directed edges keyed by (origin, destination).
        let mut outgoing: HashMap<(usize, usize), Vec<usize>> = HashMap::with_capacity(num_edges);
        for (f, face) in faces.iter().enumerate() {
            for k in 0..N {
                let v0 = face[k];
                let v1 = face[(k + 1) % N];
                outgoing.entry((v0, v1)).or_default().push(N * f + k);
                if v2e[v0] == INVALID {
                    v2e[v0] = N * f + k;
                }
            }
        }

        for (f, face) in faces.iter().enumerate() {
            for k in 0..N {
                let e = N * f + k;
                let v0 = face[k];
                let v1 = face[(k + 1) % N];
                let same = outgoing.get(&(v0, v1)).map_or(0, |l| l.len());
                let opposite = outgoing.get(&(v1, v0));
                match opposite {
                    Some(list) if list.len() == 1 && same == 1 => {
                        e2e[e] = list[0];
                    }
                    Some(_) => {
                        nonmanifold[v0] = true;
                        nonmanifold[v1] = true;
                    }
                    None if same > 1 => {
                        nonmanifold[v0] = true;
                        nonmanifold[v1] = true;
                    }
                    None => {}
                }
            }
        }

        let mut topo = Self {
            v2e,
            e2e,
            boundary: vec![false; num_vertices],
            nonmanifold,
        };
        topo.classify_fans(faces);
        topo
    }

    /// Rotate an outgoing edge of `v` to the next outgoing edge of `v`.
    ///
    /// Returns [`INVALID`] when the rotation crosses a boundary.
    #[inline]
    pub fn next_around(&self, e: usize) -> usize {
        self.e2e[dedge_prev::<N>(e)]
    }

    /// Rotate an outgoing edge in the opposite direction.
    #[inline]
    pub fn prev_around(&self, e: usize) -> usize {
        let opp = self.e2e[e];
        if opp == INVALID {
            INVALID
        } else {
            dedge_next::<N>(opp)
        }
    }

    /// Walk each vertex fan, flag boundary vertices and re-anchor `v2e` at the
    /// boundary so a forward walk covers the fan.
    fn classify_fans(&mut self, faces: &[[usize; N]]) {
        let mut valence = vec![0usize; self.v2e.len()];
        for face in faces {
            for &v in face {
                valence[v] += 1;
            }
        }

        for v in 0..self.v2e.len() {
            let start = self.v2e[v];
            if start == INVALID {
                continue;
            }

            // Rotate backwards to the boundary, if there is one.
            let mut e = start;
            let mut anchor = start;
            let mut steps = 0;
            loop {
                let p = self.prev_around(e);
                steps += 1;
                if p == INVALID {
                    self.boundary[v] = true;
                    anchor = e;
                    break;
                }
                if p == start || steps > valence[v] {
                    break;
                }
                e = p;
            }
            self.v2e[v] = anchor;

            // Count the faces reachable by walking forward.
            let mut count = 0;
            let mut e = anchor;
            loop {
                count += 1;
                let n = self.next_around(e);
                if n == INVALID || n == anchor || count > valence[v] {
                    break;
                }
                e = n;
            }
            if count != valence[v] {
                self.nonmanifold[v] = true;
            }
        }
    }

    /// Number of directed edges without an opposite.
    pub fn num_boundary_edges(&self) -> usize {
        self.e2e.iter().filter(|&&e| e == INVALID).count()
    }

    /// Outgoing edges of `v` in fan order (stops at a boundary).
    pub fn vertex_edges(&self, v: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let start = self.v2e[v];
        if start == INVALID {
            return out;
        }
        let mut e = start;
        loop {
            out.push(e);
            let n = self.next_around(e);
            if n == INVALID || n == start || out.len() > self.e2e.len() {
                break;
            }
            e = n;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> Vec<[usize; 3]> {
        vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]]
    }

    #[test]
    fn test_closed_mesh_has_no_boundary() {
        let topo = DirectedEdges::<3>::build(4, &tetrahedron());
        assert_eq!(topo.num_boundary_edges(), 0);
        assert!(topo.boundary.iter().all(|&b| !b));
        assert!(topo.nonmanifold.iter().all(|&b| !b));
    }

    #[test]
    fn test_e2e_is_involution() {
        let topo = DirectedEdges::<3>::build(4, &tetrahedron());
        for (e, &o) in topo.e2e.iter().enumerate() {
            assert_ne!(o, INVALID);
            assert_eq!(topo.e2e[o], e);
        }
    }

    #[test]
    fn test_open_mesh_boundary() {
        // Two triangles sharing the diagonal of a square.
        let faces = vec![[0, 1, 2], [0, 2, 3]];
        let topo = DirectedEdges::<3>::build(4, &faces);
        assert_eq!(topo.num_boundary_edges(), 4);
        assert!(topo.boundary.iter().all(|&b| b));
        // Vertex 0 touches both faces; the fan walk must see both.
        assert_eq!(topo.vertex_edges(0).len(), 2);
    }

    #[test]
    fn test_nonmanifold_edge_detection() {
        // Three triangles sharing edge (0, 1).
        let faces = vec![[0, 1, 2], [1, 0, 3], [0, 1, 4]];
        let topo = DirectedEdges::<3>::build(5, &faces);
        assert!(topo.nonmanifold[0]);
        assert!(topo.nonmanifold[1]);
        assert!(!topo.nonmanifold[2]);
    }

    #[test]
    fn test_quad_dedges() {
        let quads = vec![[0, 1, 2, 3], [1, 4, 5, 2]];
        let topo = DirectedEdges::<4>::build(6, &quads);
        assert_eq!(topo.e2e[1], 7);
        assert_eq!(topo.e2e[7], 1);
        assert_eq!(dedge_next::<4>(7), 4);
        assert_eq!(dedge_prev::<4>(4), 7);
    }
}
