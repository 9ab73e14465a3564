//! Edge splitting, with and without integer jump tracking.

use std::collections::HashMap;

use nalgebra::Vector3;

use super::lattice::LatticeMesh;
use crate::algo::field_math::{rshift90, tangential, Vec2i};

/// Split every edge longer than `max_len` at its midpoint until none remains.
///
/// Each round splits all long edges at once and re-triangulates each face
/// according to how many of its sides were split (one, two or three).
/// Returns the number of inserted vertices.
pub fn subdivide_long_edges(
    vertices: &mut Vec<Vector3<f64>>,
    faces: &mut Vec<[usize; 3]>,
    max_len: f64,
    max_rounds: usize,
) -> usize {
    let start = vertices.len();
    let max_len_sq = max_len * max_len;

    for _ in 0..max_rounds {
        let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
        for f in faces.iter() {
            for k in 0..3 {
                let (a, b) = (f[k], f[(k + 1) % 3]);
                if (vertices[a] - vertices[b]).norm_squared() > max_len_sq {
                    let key = (a.min(b), a.max(b));
                    if !midpoints.contains_key(&key) {
                        let mid = (vertices[a] + vertices[b]) * 0.5;
                        vertices.push(mid);
                        midpoints.insert(key, vertices.len() - 1);
                    }
                }
            }
        }
        if midpoints.is_empty() {
            break;
        }

        let mut next = Vec::with_capacity(faces.len() * 2);
        for f in faces.iter() {
            let mid: [Option<usize>; 3] = std::array::from_fn(|k| {
                let (a, b) = (f[k], f[(k + 1) % 3]);
                midpoints.get(&(a.min(b), a.max(b))).copied()
            });
            let count = mid.iter().filter(|m| m.is_some()).count();
            // Rotate so the split pattern starts at corner 0.
            let r = match count {
                1 => mid.iter().position(|m| m.is_some()).unwrap_or(0),
                2 => (mid.iter().position(|m| m.is_none()).unwrap_or(0) + 1) % 3,
                _ => 0,
            };
            let c = [f[r], f[(r + 1) % 3], f[(r + 2) % 3]];
            let m = [mid[r], mid[(r + 1) % 3], mid[(r + 2) % 3]];
            match (count, m) {
                (1, [Some(m0), _, _]) => {
                    next.push([c[0], m0, c[2]]);
                    next.push([m0, c[1], c[2]]);
                }
                (2, [Some(m0), Some(m1), _]) => {
                    next.push([m0, c[1], m1]);
                    next.push([c[0], m0, m1]);
                    next.push([c[0], m1, c[2]]);
                }
                (3, [Some(m0), Some(m1), Some(m2)]) => {
                    next.push([c[0], m0, m2]);
                    next.push([m0, c[1], m1]);
                    next.push([m2, m1, c[2]]);
                    next.push([m0, m1, m2]);
                }
                _ => next.push(*f),
            }
        }
        *faces = next;
    }

    vertices.len() - start
}

/// Split every edge whose jump exceeds one lattice step along either axis.
///
/// The jump `D` of a split edge is divided into `D / 2` (towards the start)
/// and the remainder, both keeping the edge frame, so each incident face keeps
/// its orientation for the two halves. The new edge to the opposite corner is
/// stored in the frame of the face it was cut from. Returns the number of
/// splits performed.
pub fn subdivide_edges_by_diff(mesh: &mut LatticeMesh, max_splits: usize) -> usize {
    let mut e2f = mesh.edge_faces();
    let mut splits = 0;
    let mut e = 0;
    while e < mesh.edges.len() {
        let d = mesh.diff[e];
        if d.x.abs() <= 1 && d.y.abs() <= 1 {
            e += 1;
            continue;
        }
        if splits >= max_splits {
            log::warn!("edge subdivision stopped after {} splits", splits);
            break;
        }
        split_edge(mesh, &mut e2f, e);
        splits += 1;
    }
    splits
}

fn split_edge(mesh: &mut LatticeMesh, e2f: &mut Vec<Vec<(usize, usize)>>, e: usize) {
    let d = mesh.diff[e];
    let d1 = Vec2i::new(d.x / 2, d.y / 2);
    let d2 = d - d1;
    let [a, b] = mesh.edges[e];
    let t = f64::from(d1.x.abs() + d1.y.abs()) / f64::from(d.x.abs() + d.y.abs());

    let m = mesh.v.len();
    let n = (mesh.n[a] * (1.0 - t) + mesh.n[b] * t).normalize();
    mesh.v.push(mesh.v[a] * (1.0 - t) + mesh.v[b] * t);
    mesh.n.push(n);
    mesh.q.push(tangential(&mesh.q[a], &n));
    mesh.o.push(mesh.o[a] * (1.0 - t) + mesh.o[b] * t);
    mesh.scale.push(mesh.scale[a] * (1.0 - t) + mesh.scale[b] * t);
    let incident = std::mem::take(&mut e2f[e]);
    mesh.boundary.push(incident.len() == 1 && mesh.boundary[a] && mesh.boundary[b]);
    mesh.sharp.push(mesh.sharp_edge[e]);

    // `e` keeps the half at `a`, `e_b` is the half at `b`.
    let e_b = mesh.edges.len();
    mesh.edges[e] = [a, m];
    mesh.diff[e] = d1;
    mesh.edges.push([m, b]);
    mesh.diff.push(d2);
    mesh.allow_change.push(mesh.allow_change[e]);
    mesh.sharp_edge.push(mesh.sharp_edge[e]);
    e2f.push(Vec::with_capacity(2));

    for (f, k) in incident {
        let face = mesh.faces[f];
        let (vk, vk1, c) = (face[k], face[(k + 1) % 3], face[(k + 2) % 3]);
        let qe = mesh.fq[f][k];
        let (half_k, half_k1) = if vk == a { (e, e_b) } else { (e_b, e) };
        let side1 = mesh.f2e[f][(k + 1) % 3];
        let side2 = mesh.f2e[f][(k + 2) % 3];
        let q1 = mesh.fq[f][(k + 1) % 3];
        let q2 = mesh.fq[f][(k + 2) % 3];

        // Jump from the new vertex to the opposite corner, in the face frame.
        let to_c = rshift90(mesh.diff[half_k1], qe) + rshift90(mesh.diff[side1], q1);
        let x = mesh.edges.len();
        mesh.edges.push([m, c]);
        mesh.diff.push(to_c);
        mesh.allow_change.push([true; 2]);
        mesh.sharp_edge.push(false);

        let f2 = mesh.faces.len();
        mesh.faces[f] = [vk, m, c];
        mesh.f2e[f] = [half_k, x, side2];
        mesh.fq[f] = [qe, 0, q2];
        mesh.faces.push([m, vk1, c]);
        mesh.f2e.push([half_k1, side1, x]);
        mesh.fq.push([qe, q1, 2]);

        relink(&mut e2f[side1], (f, (k + 1) % 3), (f2, 1));
        relink(&mut e2f[side2], (f, (k + 2) % 3), (f, 2));
        e2f[half_k].push((f, 0));
        e2f[half_k1].push((f2, 0));
        e2f.push(vec![(f, 1), (f2, 2)]);
    }
}

fn relink(list: &mut [(usize, usize)], from: (usize, usize), to: (usize, usize)) {
    if let Some(entry) = list.iter_mut().find(|entry| **entry == from) {
        *entry = to;
    }
}
