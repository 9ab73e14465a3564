//! Vertex one-ring adjacency and deterministic graph coloring.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{MeshError, Result};

/// A weighted neighbour entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    /// Neighbour vertex.
    pub id: usize,
    /// Symmetric edge weight.
    pub weight: f64,
}

impl Link {
    /// Create a link.
    pub fn new(id: usize, weight: f64) -> Self {
        Self { id, weight }
    }
}

/// Per-vertex list of neighbours.
pub type AdjacentMatrix = Vec<Vec<Link>>;

/// One-ring adjacency with unit weights, sorted by neighbour id.
pub fn generate_adjacency_matrix_uniform(num_vertices: usize, faces: &[[usize; 3]]) -> AdjacentMatrix {
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); num_vertices];
    for face in faces {
        for k in 0..3 {
            let a = face[k];
            let b = face[(k + 1) % 3];
            adj[a].push(b);
            adj[b].push(a);
        }
    }
    adj.into_iter()
        .enumerate()
        .map(|(i, mut list)| {
            list.sort_unstable();
            list.dedup();
            list.retain(|&j| j != i);
            list.into_iter().map(|j| Link::new(j, 1.0)).collect()
        })
        .collect()
}

/// Maximum number of colour classes.
pub const MAX_COLORS: usize = 255;

/// Partition the vertices into independent sets ("phases").
///
/// Vertices are visited in a permutation drawn from `seed`; each takes the
/// lowest colour unused by its already-coloured neighbours. The result only
/// depends on the adjacency and the seed.
pub fn generate_graph_coloring_deterministic(
    adj: &AdjacentMatrix,
    num_vertices: usize,
    seed: u64,
) -> Result<Vec<Vec<usize>>> {
    let mut perm: Vec<usize> = (0..num_vertices).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    perm.shuffle(&mut rng);

    let mut color = vec![u8::MAX; num_vertices];
    let mut phases: Vec<Vec<usize>> = Vec::new();
    let mut used = [false; MAX_COLORS + 1];

    for &i in &perm {
        for link in &adj[i] {
            let c = color[link.id];
            if c != u8::MAX {
                used[c as usize] = true;
            }
        }
        let chosen = (0..=MAX_COLORS).find(|&c| !used[c]).unwrap_or(MAX_COLORS);
        if chosen >= MAX_COLORS {
            return Err(MeshError::TooManyColors { colors: chosen + 1 });
        }
        for link in &adj[i] {
            let c = color[link.id];
            if c != u8::MAX {
                used[c as usize] = false;
            }
        }
        color[i] = chosen as u8;
        if chosen == phases.len() {
            phases.push(Vec::new());
        }
        phases[chosen].push(i);
    }

    log::debug!(
        "graph coloring: {} vertices, {} colors",
        num_vertices,
        phases.len()
    );
    Ok(phases)
}
