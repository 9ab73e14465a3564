//! Local valence repair on the extracted quads.
//!
//! Each round handles three cases on vertices that do not share a quad with
//! an already edited vertex:
//!
//! - an interior vertex of valence 2 is removed by merging its two quads;
//! - a vertex whose quads form several separate fans is split, one copy per
//!   fan;
//! - an interior vertex of valence 6 or more is split in two along a new
//!   quad, halving its fan.

use nalgebra::{Point3, Vector3};

use super::manifold::{clone_vertex, rotate_to, split_fans};
use crate::algo::optimizer::Anchor;
use crate::mesh::{dedge_next, DirectedEdges, QuadMesh};

/// Rounds before giving up on a mesh that keeps changing.
const MAX_ROUNDS: usize = 20;

/// Fraction of the way a split vertex moves towards its half's centroid.
const SPLIT_RELAX: f64 = 0.3;

/// Remove interior valence-2 vertices. Returns the number of merges.
fn merge_valence_two(mesh: &mut QuadMesh, topo: &DirectedEdges<4>, valence: &[usize], locked: &mut [bool]) -> usize {
    let mut removed = vec![false; mesh.num_faces()];
    let mut merges = 0;
    for v in 0..mesh.num_vertices() {
        if valence[v] != 2 || topo.boundary[v] || topo.nonmanifold[v] || locked[v] {
            continue;
        }
        let edges = topo.vertex_edges(v);
        let &[e0, e1] = edges.as_slice() else {
            continue;
        };
        let (f0, f1) = (e0 / 4, e1 / 4);
        if f0 == f1 || removed[f0] || removed[f1] {
            continue;
        }
        let (Some(q0), Some(q1)) = (rotate_to(mesh.quads[f0], v), rotate_to(mesh.quads[f1], v)) else {
            continue;
        };
        let [_, a, x, b] = q0;
        if q1[1] != b || q1[3] != a || q1[2] == x {
            continue;
        }
        if q0.iter().chain(q1.iter()).any(|&u| locked[u]) {
            continue;
        }
        mesh.quads[f0] = [a, x, b, q1[2]];
        removed[f1] = true;
        for u in q0.iter().chain(q1.iter()) {
            locked[*u] = true;
        }
        merges += 1;
    }
    if merges > 0 {
        let mut f = 0;
        mesh.quads.retain(|_| {
            f += 1;
            !removed[f - 1]
        });
    }
    merges
}

/// Split interior vertices of valence 6 and more. Returns the number of
/// splits.
fn split_high_valence(
    mesh: &mut QuadMesh,
    anchors: &mut Vec<Anchor>,
    topo: &DirectedEdges<4>,
    valence: &[usize],
    locked: &mut [bool],
) -> usize {
    let nv = valence.len();
    let mut splits = 0;
    for v in 0..nv {
        let m = valence[v];
        if m < 6 || topo.boundary[v] || topo.nonmanifold[v] || locked[v] || anchors[v].sharp {
            continue;
        }
        let edges = topo.vertex_edges(v);
        if edges.len() != m {
            continue;
        }
        let fan: Vec<usize> = edges.iter().map(|&e| e / 4).collect();
        let spokes: Vec<usize> = edges.iter().map(|&e| mesh.quads[e / 4][dedge_next::<4>(e) % 4]).collect();
        if fan.iter().any(|&f| mesh.quads[f].iter().any(|&u| locked[u])) {
            continue;
        }

        let h = m / 2;
        let s = (0..m)
            .min_by_key(|&s| valence[spokes[s]] + valence[spokes[(s + h) % m]])
            .unwrap_or(0);
        let (a, b) = (spokes[s], spokes[(s + h) % m]);
        if a == b {
            continue;
        }

        let w = clone_vertex(mesh, anchors, v);
        let mut moved = Vector3::zeros();
        let mut kept = Vector3::zeros();
        for i in 0..m {
            let f = fan[(s + i) % m];
            let centroid = mesh.quads[f].iter().map(|&u| mesh.vertices[u].coords).sum::<Vector3<f64>>() / 4.0;
            if i < h {
                for x in mesh.quads[f].iter_mut() {
                    if *x == v {
                        *x = w;
                    }
                }
                moved += centroid;
            } else {
                kept += centroid;
            }
        }
        mesh.quads.push([a, w, b, v]);

        let p = mesh.vertices[v].coords;
        let toward = |sum: Vector3<f64>, count: usize| p + (sum / count as f64 - p) * SPLIT_RELAX;
        mesh.vertices[w] = Point3::from(toward(moved, h));
        mesh.vertices[v] = Point3::from(toward(kept, m - h));
        for &f in &fan {
            for &u in &mesh.quads[f] {
                if u < locked.len() {
                    locked[u] = true;
                }
            }
        }
        splits += 1;
    }
    splits
}

/// Repair valences until nothing changes. `anchors` stays parallel to the
/// vertices. Returns the number of edits.
pub fn fix_valence(mesh: &mut QuadMesh, anchors: &mut Vec<Anchor>) -> usize {
    let mut total = 0;
    for round in 0..MAX_ROUNDS {
        let fans = split_fans(mesh, anchors);
        let topo = DirectedEdges::<4>::build(mesh.num_vertices(), &mesh.quads);
        let valence = mesh.valences();
        let mut locked = vec![false; mesh.num_vertices()];
        let merges = merge_valence_two(mesh, &topo, &valence, &mut locked);
        let splits = if merges == 0 {
            split_high_valence(mesh, anchors, &topo, &valence, &mut locked)
        } else {
            0
        };

        let changes = fans + merges + splits;
        if changes > 0 {
            let kept = mesh.compact_vertices();
            *anchors = kept.iter().map(|&i| anchors[i]).collect();
        }
        log::debug!(
            "valence round {}: {} fan splits, {} merges, {} splits",
            round,
            fans,
            merges,
            splits
        );
        total += changes;
        if changes == 0 {
            break;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchors(n: usize) -> Vec<Anchor> {
        vec![
            Anchor {
                point: Vector3::zeros(),
                normal: Vector3::z(),
                sharp: false,
                boundary: false,
            };
            n
        ]
    }

    fn grid(n: usize) -> QuadMesh {
        let w = n + 1;
        let vertices = (0..w * w)
            .map(|i| Point3::new((i % w) as f64, (i / w) as f64, 0.0))
            .collect();
        let mut quads = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let a = y * w + x;
                quads.push([a, a + 1, a + w + 1, a + w]);
            }
        }
        QuadMesh::new(vertices, quads)
    }

    #[test]
    fn test_regular_grid_unchanged() {
        let mut mesh = grid(3);
        let before = mesh.clone();
        let mut a = anchors(16);
        assert_eq!(fix_valence(&mut mesh, &mut a), 0);
        assert_eq!(mesh, before);
    }

    #[test]
    fn test_valence_two_vertex_removed() {
        // Square 0-1-2-3 cut through its centre 4 into two quads.
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 2.0, 0.0),
        ];
        // Ring of quads closing around vertex 4 with two quads only.
        let quads = vec![[4, 5, 1, 6], [4, 6, 3, 5]];
        let mut mesh = QuadMesh::new(vertices, quads);
        let mut a = anchors(7);
        let edits = fix_valence(&mut mesh, &mut a);
        assert!(edits >= 1);
        assert_eq!(mesh.num_faces(), 1);
        assert_eq!(a.len(), mesh.num_vertices());
        assert!(mesh.quads[0].iter().all(|&v| v < mesh.num_vertices()));
    }

    #[test]
    fn test_bowtie_vertex_split() {
        let vertices = (0..7).map(|i| Point3::new(i as f64, (i % 2) as f64, 0.0)).collect();
        let mut mesh = QuadMesh::new(vertices, vec![[0, 1, 2, 3], [0, 4, 5, 6]]);
        let mut a = anchors(7);
        fix_valence(&mut mesh, &mut a);
        assert_eq!(mesh.num_vertices(), 8);
        assert_eq!(a.len(), 8);
        assert_eq!(mesh.valences().iter().filter(|&&d| d == 0).count(), 0);
        assert!(mesh.valences().iter().all(|&d| d == 1));
    }

    #[test]
    fn test_valence_six_vertex_split() {
        let mut vertices = vec![Point3::origin()];
        for i in 0..6 {
            let t = i as f64 * std::f64::consts::TAU / 6.0;
            vertices.push(Point3::new(t.cos(), t.sin(), 0.0));
        }
        for i in 0..6 {
            let t = (i as f64 + 0.5) * std::f64::consts::TAU / 6.0;
            vertices.push(Point3::new(1.8 * t.cos(), 1.8 * t.sin(), 0.0));
        }
        let quads = (0..6).map(|i| [0, 1 + i, 7 + i, 1 + (i + 1) % 6]).collect();
        let mut mesh = QuadMesh::new(vertices, quads);
        let mut a = anchors(13);
        assert!(fix_valence(&mut mesh, &mut a) >= 1);
        assert_eq!(mesh.num_faces(), 7);
        assert_eq!(mesh.num_vertices(), 14);
        assert_eq!(a.len(), 14);
        let valence = mesh.valences();
        assert_eq!(valence.iter().filter(|&&d| d == 4).count(), 2);
        assert!(valence.iter().all(|&d| d < 6));
    }
}
