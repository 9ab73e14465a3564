//! Turning the extracted quads into an oriented 2-manifold.
//!
//! Extraction can leave quads that overlap an already accepted neighbour
//! (both claim the same directed side) and vertices where several quad fans
//! only touch at a point. The first are dropped, the second are split into
//! one vertex per fan. Both leave holes behind that hole filling closes.

use std::collections::HashSet;

use crate::algo::dset::DisjointSet;
use crate::algo::optimizer::Anchor;
use crate::mesh::{QuadMesh, INVALID};

/// Rotate `quad` so that `v` comes first.
pub(super) fn rotate_to(quad: [usize; 4], v: usize) -> Option<[usize; 4]> {
    let k = quad.iter().position(|&x| x == v)?;
    Some(std::array::from_fn(|i| quad[(k + i) % 4]))
}

/// Append a copy of vertex `v` and its anchor.
pub(super) fn clone_vertex(mesh: &mut QuadMesh, anchors: &mut Vec<Anchor>, v: usize) -> usize {
    mesh.vertices.push(mesh.vertices[v]);
    anchors.push(anchors[v]);
    mesh.vertices.len() - 1
}

/// Drop every quad that would give a directed side a second owner, keeping
/// the earlier quad. Afterwards no edge has more than two quads and the two
/// walk it in opposite directions. Returns the number of dropped quads.
pub fn drop_conflicting_quads(mesh: &mut QuadMesh) -> usize {
    let mut owned: HashSet<(usize, usize)> = HashSet::with_capacity(mesh.quads.len() * 4);
    let before = mesh.quads.len();
    mesh.quads.retain(|q| {
        let sides: [(usize, usize); 4] = std::array::from_fn(|k| (q[k], q[(k + 1) % 4]));
        if sides.iter().any(|s| owned.contains(s)) {
            return false;
        }
        owned.extend(sides);
        true
    });
    let dropped = before - mesh.quads.len();
    if dropped > 0 {
        log::debug!("dropped {} overlapping quads", dropped);
    }
    dropped
}

/// Split vertices whose quads form more than one edge-connected fan.
/// Returns the number of added vertices.
pub fn split_fans(mesh: &mut QuadMesh, anchors: &mut Vec<Anchor>) -> usize {
    let nv = mesh.num_vertices();
    let mut incident: Vec<Vec<usize>> = vec![Vec::new(); nv];
    for (f, q) in mesh.quads.iter().enumerate() {
        for &v in q {
            incident[v].push(f);
        }
    }
    let mut splits = 0;
    for v in 0..nv {
        let faces = &incident[v];
        if faces.len() < 2 {
            continue;
        }
        // Faces around v are connected when they share a spoke.
        let mut sets = DisjointSet::new(faces.len());
        let spokes: Vec<[usize; 2]> = faces
            .iter()
            .map(|&f| match rotate_to(mesh.quads[f], v) {
                Some(q) => [q[1], q[3]],
                None => [INVALID; 2],
            })
            .collect();
        for i in 0..faces.len() {
            for j in i + 1..faces.len() {
                if spokes[i].iter().any(|s| spokes[j].contains(s)) {
                    sets.union(i, j);
                }
            }
        }
        let (ids, count) = sets.compact_ids();
        if count < 2 {
            continue;
        }
        let copies: Vec<usize> = std::iter::once(v)
            .chain((1..count).map(|_| clone_vertex(mesh, anchors, v)))
            .collect();
        for (i, &f) in faces.iter().enumerate() {
            for x in mesh.quads[f].iter_mut() {
                if *x == v {
                    *x = copies[ids[i]];
                }
            }
        }
        splits += count - 1;
    }
    splits
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Point3, Vector3};

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

    fn points(n: usize) -> Vec<Point3<f64>> {
        (0..n).map(|i| Point3::new(i as f64, (i % 3) as f64, 0.0)).collect()
    }

    #[test]
    fn test_overlapping_quad_dropped() {
        // The third quad walks 1 -> 2 again.
        let quads = vec![[0, 1, 2, 3], [1, 4, 5, 2], [6, 1, 2, 7]];
        let mut mesh = QuadMesh::new(points(8), quads);
        assert_eq!(drop_conflicting_quads(&mut mesh), 1);
        assert_eq!(mesh.quads, vec![[0, 1, 2, 3], [1, 4, 5, 2]]);
    }

    #[test]
    fn test_fourth_quad_on_an_edge_dropped() {
        // Four quads on edge (0, 1), two per direction.
        let quads = vec![[0, 1, 2, 3], [1, 0, 4, 5], [0, 1, 6, 7], [1, 0, 8, 9]];
        let mut mesh = QuadMesh::new(points(10), quads);
        assert_eq!(drop_conflicting_quads(&mut mesh), 2);
        assert_eq!(mesh.num_faces(), 2);
    }

    #[test]
    fn test_bowtie_vertex_split() {
        let mut mesh = QuadMesh::new(points(7), vec![[0, 1, 2, 3], [0, 4, 5, 6]]);
        let mut a = anchors(7);
        assert_eq!(split_fans(&mut mesh, &mut a), 1);
        assert_eq!(mesh.num_vertices(), 8);
        assert_eq!(a.len(), 8);
        assert!(mesh.valences().iter().all(|&d| d == 1));
    }

    #[test]
    fn test_rotate_to() {
        assert_eq!(rotate_to([3, 4, 5, 6], 5), Some([5, 6, 3, 4]));
        assert_eq!(rotate_to([3, 4, 5, 6], 9), None);
    }
}
