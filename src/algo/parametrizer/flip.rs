//! Removing flipped lattice triangles by pushing flow around short cycles.
//!
//! A cycle of equation arcs changes jumps without touching any face residual,
//! so closed faces stay closed. Cycles through the equations of a flipped
//! face are tried shortest first and kept when they lower
//! `FLIP_ENERGY_WEIGHT × flipped + Σ|jump|` over the touched faces and edges.

use std::collections::BTreeSet;

use super::constraints::EDGE_DIFF_LIMIT;
use super::Parametrizer;
use crate::algo::hierarchy::EdgeGraph;
use crate::algo::localsat::{fix_flip_sat, SatSolver};
use crate::algo::optimizer::{equation_arcs, EquationArc};
use crate::mesh::subdivide::subdivide_edges_by_diff;
use crate::mesh::LatticeMesh;

/// Weight of one flipped face against one unit of jump length.
pub const FLIP_ENERGY_WEIGHT: i64 = 1000;

/// Sweeps over the flipped faces per cycle length.
const MAX_PASSES: usize = 8;

/// Cycles collected per starting equation.
const MAX_CYCLES: usize = 64;

/// One step of a cycle: arc index and direction (`1` from → to).
type Step = (usize, i32);

struct CycleSearch<'a> {
    arcs: &'a [EquationArc],
    adj: Vec<Vec<Step>>,
    visited: Vec<bool>,
}

impl<'a> CycleSearch<'a> {
    fn new(arcs: &'a [EquationArc], num_equations: usize) -> Self {
        let mut adj = vec![Vec::new(); num_equations];
        for (i, arc) in arcs.iter().enumerate() {
            adj[arc.from].push((i, 1));
            adj[arc.to].push((i, -1));
        }
        Self {
            arcs,
            adj,
            visited: vec![false; num_equations],
        }
    }

    /// Simple cycles through `start` with at most `max_arcs` arcs.
    fn cycles(&mut self, start: usize, max_arcs: usize) -> Vec<Vec<Step>> {
        let mut found = Vec::new();
        let mut path = Vec::with_capacity(max_arcs);
        self.visited[start] = true;
        self.walk(start, start, max_arcs, &mut path, &mut found);
        self.visited[start] = false;
        found
    }

    fn walk(&mut self, start: usize, node: usize, max_arcs: usize, path: &mut Vec<Step>, found: &mut Vec<Vec<Step>>) {
        for i in 0..self.adj[node].len() {
            if found.len() >= MAX_CYCLES {
                return;
            }
            let (a, dir) = self.adj[node][i];
            if path.iter().any(|&(p, _)| p == a) {
                continue;
            }
            let arc = self.arcs[a];
            let next = if dir > 0 { arc.to } else { arc.from };
            if next == start {
                if !path.is_empty() {
                    path.push((a, dir));
                    found.push(path.clone());
                    path.pop();
                }
                continue;
            }
            if self.visited[next] || path.len() + 1 >= max_arcs {
                continue;
            }
            self.visited[next] = true;
            path.push((a, dir));
            self.walk(start, next, max_arcs, path, found);
            path.pop();
            self.visited[next] = false;
        }
    }
}

fn local_energy(mesh: &LatticeMesh, edges: &BTreeSet<usize>, faces: &BTreeSet<usize>) -> i64 {
    let flipped = faces.iter().filter(|&&f| mesh.face_area(f) < 0).count() as i64;
    let length: i64 = edges
        .iter()
        .map(|&e| i64::from(mesh.diff[e].x.abs() + mesh.diff[e].y.abs()))
        .sum();
    FLIP_ENERGY_WEIGHT * flipped + length
}

fn push_cycle(mesh: &mut LatticeMesh, arcs: &[EquationArc], cycle: &[Step], amount: i32) {
    for &(a, dir) in cycle {
        let arc = arcs[a];
        mesh.diff[arc.edge][arc.comp] -= arc.sign * dir * amount;
    }
}

/// Apply `cycle` if it lowers the local energy. Returns whether it was kept.
fn try_cycle(mesh: &mut LatticeMesh, arcs: &[EquationArc], e2f: &[Vec<(usize, usize)>], cycle: &[Step]) -> bool {
    let edges: BTreeSet<usize> = cycle.iter().map(|&(a, _)| arcs[a].edge).collect();
    let faces: BTreeSet<usize> = edges.iter().flat_map(|&e| e2f[e].iter().map(|&(f, _)| f)).collect();
    let before = local_energy(mesh, &edges, &faces);
    push_cycle(mesh, arcs, cycle, 1);
    if local_energy(mesh, &edges, &faces) < before {
        return true;
    }
    push_cycle(mesh, arcs, cycle, -1);
    false
}

/// Remove flipped faces with cycles of up to `2 + 2·len` arcs for every
/// `len` in `1..=max_len`. Returns the number of flipped faces removed.
pub fn fix_flip(mesh: &mut LatticeMesh, max_len: usize) -> usize {
    let initial = mesh.flipped_faces().len();
    if initial == 0 {
        return 0;
    }
    let arcs = equation_arcs(&EdgeGraph::from_lattice(mesh));
    let e2f = mesh.edge_faces();
    let mut search = CycleSearch::new(&arcs, mesh.num_faces() * 2);
    let mut applied = 0;

    for len in 1..=max_len {
        let max_arcs = 2 + 2 * len;
        for _ in 0..MAX_PASSES {
            let flipped = mesh.flipped_faces();
            if flipped.is_empty() {
                break;
            }
            let mut improved = false;
            for f in flipped {
                if mesh.face_area(f) >= 0 {
                    continue;
                }
                'axes: for axis in 0..2 {
                    for cycle in search.cycles(2 * f + axis, max_arcs) {
                        if try_cycle(mesh, &arcs, &e2f, &cycle) {
                            applied += 1;
                            improved = true;
                            break 'axes;
                        }
                    }
                }
            }
            if !improved {
                break;
            }
        }
    }

    let remaining = mesh.flipped_faces().len();
    log::info!(
        "flip repair: {} -> {} flipped faces with {} cycles",
        initial,
        remaining,
        applied
    );
    initial.saturating_sub(remaining)
}

impl Parametrizer {
    /// Cycle-based flip repair, then the MaxSAT repair when enabled.
    pub fn repair_flips(&mut self) {
        fix_flip(&mut self.lattice, self.options.flip_max_len);
        if self.options.aggressive_sat && !self.lattice.flipped_faces().is_empty() {
            let solver = SatSolver::new(self.options.sat_solver.clone()).with_timeout(self.options.sat_timeout);
            match fix_flip_sat(&mut self.lattice, &solver, self.options.sat_thresholds) {
                Ok(removed) => log::info!("MaxSAT repair removed {} flipped faces", removed),
                Err(e) => log::warn!("MaxSAT repair skipped: {}", e),
            }
        }
        let limit = EDGE_DIFF_LIMIT * self.lattice.num_edges();
        let splits = subdivide_edges_by_diff(&mut self.lattice, limit);
        if splits > 0 {
            log::debug!("{} edges split after flip repair", splits);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::field_math::Vec2i;
    use nalgebra::Vector3;

    /// 3×3 vertex grid whose centre sits `shift` lattice steps to the right.
    fn shifted_grid(shift: i32) -> LatticeMesh {
        let pos = |i: usize| {
            let p = Vec2i::new((i % 3) as i32, (i / 3) as i32);
            if i == 4 {
                p + Vec2i::new(shift, 0)
            } else {
                p
            }
        };
        let v = (0..9)
            .map(|i| Vector3::new((i % 3) as f64, (i / 3) as f64, 0.0))
            .collect();
        let mut faces = Vec::new();
        for y in 0..2 {
            for x in 0..2 {
                let a = y * 3 + x;
                faces.push([a, a + 1, a + 4]);
                faces.push([a, a + 4, a + 3]);
            }
        }
        let mut mesh = LatticeMesh::from_triangles(v, vec![Vector3::z(); 9], faces);
        for e in 0..mesh.num_edges() {
            let [a, b] = mesh.edges[e];
            mesh.diff[e] = pos(b) - pos(a);
        }
        for f in 0..mesh.num_faces() {
            for k in 0..3 {
                let e = mesh.f2e[f][k];
                mesh.fq[f][k] = if mesh.edges[e][0] == mesh.faces[f][k] { 0 } else { 2 };
            }
        }
        mesh
    }

    #[test]
    fn test_shifted_grid_has_flips() {
        let mesh = shifted_grid(2);
        assert!(mesh.inconsistent_faces().is_empty());
        assert_eq!(mesh.flipped_faces().len(), 2);
        assert!(shifted_grid(0).flipped_faces().is_empty());
    }

    #[test]
    fn test_fix_flip_moves_vertex_back() {
        let mut mesh = shifted_grid(2);
        let removed = fix_flip(&mut mesh, 2);
        assert_eq!(removed, 2);
        assert!(mesh.flipped_faces().is_empty());
        assert!(mesh.inconsistent_faces().is_empty());
    }

    #[test]
    fn test_short_cycles_are_not_enough() {
        let mut mesh = shifted_grid(2);
        assert_eq!(fix_flip(&mut mesh, 1), 0);
        assert_eq!(mesh.flipped_faces().len(), 2);
    }

    #[test]
    fn test_cycle_search_finds_vertex_fan() {
        let mesh = shifted_grid(0);
        let arcs = equation_arcs(&EdgeGraph::from_lattice(&mesh));
        let mut search = CycleSearch::new(&arcs, mesh.num_faces() * 2);
        let cycles = search.cycles(0, 6);
        assert!(cycles.iter().any(|c| c.len() == 6));
        assert!(search.cycles(0, 4).is_empty());
    }
}
