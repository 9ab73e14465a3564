//! Collapsing the lattice mesh into quads.
//!
//! Vertices joined by a zero jump share a lattice node and merge into one
//! output vertex. The remaining triangles span half a lattice cell each; two
//! of them sharing their diagonal side form one quad.
//!
//! A node whose triangles form several sheets that only touch at the node
//! (folds, pinches) is split into one vertex per sheet before pairing, so the
//! quads around every vertex form a single fan. Triangles left without a
//! diagonal partner pair up across any other shared side.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use super::Parametrizer;
use crate::algo::dset::AtomicDisjointSet;
use crate::algo::field_math::position_round_4;
use crate::algo::optimizer::Anchor;
use crate::mesh::{LatticeMesh, QuadMesh};

/// Quads over merged lattice nodes, with one surface anchor per vertex.
#[derive(Debug, Clone, Default)]
pub struct ExtractedQuads {
    /// Vertex positions (blended lattice node of the merged vertices).
    pub vertices: Vec<Vector3<f64>>,
    /// Quads.
    pub quads: Vec<[usize; 4]>,
    /// Surface sample of every vertex.
    pub anchors: Vec<Anchor>,
}

/// Cyclic rotation starting at the smallest index.
fn canonical<const N: usize>(face: [usize; N]) -> [usize; N] {
    let start = (0..N).min_by_key(|&k| face[k]).unwrap_or(0);
    std::array::from_fn(|k| face[(start + k) % N])
}

/// Same cycle walked the other way round.
fn reversed<const N: usize>(face: [usize; N]) -> [usize; N] {
    std::array::from_fn(|k| face[(N - k) % N])
}

/// Side of face `f` whose jump moves along both axes, if exactly one does.
fn diagonal_side(mesh: &LatticeMesh, f: usize) -> Option<usize> {
    let mut sides = (0..3).filter(|&k| {
        let d = mesh.face_vector(f, k);
        d.x != 0 && d.y != 0
    });
    let first = sides.next()?;
    sides.next().is_none().then_some(first)
}

/// Position and anchor of one lattice node.
///
/// Each member votes with the node of its own lattice closest to the running
/// mean, so members whose anchors sit on neighbouring nodes of rotated or
/// rescaled frames still agree on one node.
fn blend_node(mesh: &LatticeMesh, members: &[usize]) -> (Vector3<f64>, Anchor) {
    let mut sum = Vector3::zeros();
    let mut point = Vector3::zeros();
    let mut normal = Vector3::zeros();
    let (mut sharp, mut boundary) = (false, false);
    for (count, &i) in members.iter().enumerate() {
        let mean = if count == 0 { mesh.o[i] } else { sum / count as f64 };
        let s = mesh.scale[i];
        let node = if s.x > 0.0 && s.y > 0.0 && s.iter().all(|x| x.is_finite()) {
            position_round_4(&mesh.o[i], &mesh.q[i], &mesh.n[i], &mean, s)
        } else {
            mesh.o[i]
        };
        sum += node;
        point += mesh.v[i];
        normal += mesh.n[i];
        sharp |= mesh.sharp[i];
        boundary |= mesh.boundary[i];
    }
    let inv = 1.0 / members.len().max(1) as f64;
    let anchor = Anchor {
        point: point * inv,
        normal: if normal.norm() > 0.0 { normal.normalize() } else { Vector3::z() },
        sharp,
        boundary,
    };
    (sum * inv, anchor)
}

/// Triangles over lattice nodes that span half a cell, rotated so a present
/// diagonal runs from corner 0 to corner 1. Duplicates are dropped and
/// oppositely oriented copies cancel out.
fn collapsed_triangles(mesh: &LatticeMesh, ids: &[usize]) -> Vec<([usize; 3], bool)> {
    let mut kept: BTreeMap<[usize; 3], ([usize; 3], bool)> = BTreeMap::new();
    let mut order = Vec::new();
    for f in 0..mesh.num_faces() {
        let t = mesh.faces[f].map(|v| ids[v]);
        if t[0] == t[1] || t[1] == t[2] || t[2] == t[0] || mesh.face_area(f) <= 0 {
            continue;
        }
        let (t, diagonal) = match diagonal_side(mesh, f) {
            Some(k) => ([t[k], t[(k + 1) % 3], t[(k + 2) % 3]], true),
            None => (t, false),
        };
        let key = canonical(t);
        if kept.contains_key(&key) {
            continue;
        }
        kept.insert(key, (t, diagonal));
        order.push(key);
    }
    let folded: BTreeSet<[usize; 3]> = order
        .iter()
        .filter(|key| kept.contains_key(&canonical(reversed(**key))))
        .copied()
        .collect();
    order
        .into_iter()
        .filter(|key| !folded.contains(key))
        .filter_map(|key| kept.get(&key).copied())
        .collect()
}

/// Split the corners of `triangles` into sheets: corners at the same node
/// join when their triangles share a side with opposite orientation, and no
/// third triangle uses that side. Returns the sheet of every corner
/// (`3·t + k`) and the number of sheets.
fn corner_sheets(triangles: &[[usize; 3]]) -> (Vec<usize>, usize) {
    let mut sides: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
    for (i, t) in triangles.iter().enumerate() {
        for k in 0..3 {
            let (a, b) = (t[k], t[(k + 1) % 3]);
            sides.entry((a.min(b), a.max(b))).or_default().push(3 * i + k);
        }
    }
    // Corner pairs meeting at the two ends of every manifold side.
    let mut pairs = Vec::new();
    for corners in sides.values() {
        let &[c, d] = corners.as_slice() else {
            continue;
        };
        let next = |c: usize| 3 * (c / 3) + (c + 1) % 3;
        let (i, j) = (c / 3, d / 3);
        if triangles[i][c % 3] == triangles[j][d % 3] {
            continue;
        }
        pairs.push([c, next(d), next(c), d]);
    }
    let sets = AtomicDisjointSet::new(3 * triangles.len());
    pairs.par_iter().for_each(|&[a0, a1, b0, b1]| {
        sets.union_locked(a0, a1);
        sets.union_locked(b0, b1);
    });
    sets.compact_ids()
}

/// Merge zero-jump edges and pair the surviving triangles into quads.
///
/// Quads referencing a vertex twice are dropped, as are duplicates and
/// oppositely oriented copies. Vertices no quad uses are removed.
pub fn extract_quads(mesh: &LatticeMesh) -> ExtractedQuads {
    let nv = mesh.num_vertices();
    let sets = AtomicDisjointSet::new(nv);
    mesh.edges.par_iter().zip(mesh.diff.par_iter()).for_each(|(&[a, b], d)| {
        if d.x == 0 && d.y == 0 {
            sets.union(a, b);
        }
    });
    let (ids, count) = sets.compact_ids();

    let mut members = vec![Vec::new(); count];
    for (i, &c) in ids.iter().enumerate() {
        members[c].push(i);
    }
    let nodes: Vec<(Vector3<f64>, Anchor)> = members.par_iter().map(|m| blend_node(mesh, m)).collect();

    let triangles = collapsed_triangles(mesh, &ids);
    let corners: Vec<[usize; 3]> = triangles.iter().map(|(t, _)| *t).collect();
    let (sheet_of, num_sheets) = corner_sheets(&corners);
    let mut sheet_node = vec![0; num_sheets];
    for (c, &s) in sheet_of.iter().enumerate() {
        sheet_node[s] = corners[c / 3][c % 3];
    }
    let sheets: Vec<[usize; 3]> = (0..corners.len())
        .map(|i| std::array::from_fn(|k| sheet_of[3 * i + k]))
        .collect();

    let mut paired = vec![false; sheets.len()];
    let mut candidates = Vec::new();
    let mut by_diagonal: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    for (i, t) in sheets.iter().enumerate() {
        if triangles[i].1 {
            by_diagonal.insert((t[0], t[1]), i);
        }
    }
    for (i, &[a, b, c]) in sheets.iter().enumerate() {
        if !triangles[i].1 {
            continue;
        }
        let Some(&j) = by_diagonal.get(&(b, a)) else {
            continue;
        };
        if j <= i || paired[j] {
            continue;
        }
        paired[i] = true;
        paired[j] = true;
        candidates.push([a, sheets[j][2], b, c]);
    }

    // Leftovers pair across any shared side.
    let mut by_side: BTreeMap<(usize, usize), (usize, usize)> = BTreeMap::new();
    for (i, t) in sheets.iter().enumerate() {
        if !paired[i] {
            for k in 0..3 {
                by_side.insert((t[k], t[(k + 1) % 3]), (i, k));
            }
        }
    }
    let mut second = 0;
    for i in 0..sheets.len() {
        if paired[i] {
            continue;
        }
        let t = sheets[i];
        for k in 0..3 {
            let (a, b, c) = (t[k], t[(k + 1) % 3], t[(k + 2) % 3]);
            let Some(&(j, m)) = by_side.get(&(b, a)) else {
                continue;
            };
            if j == i || paired[j] {
                continue;
            }
            paired[i] = true;
            paired[j] = true;
            candidates.push([a, sheets[j][(m + 2) % 3], b, c]);
            second += 1;
            break;
        }
    }
    let unpaired = paired.iter().filter(|&&p| !p).count();

    let mut seen: BTreeSet<[usize; 4]> = BTreeSet::new();
    let mut valid = Vec::with_capacity(candidates.len());
    for q in candidates {
        let distinct: BTreeSet<usize> = q.iter().copied().collect();
        if distinct.len() == 4 && seen.insert(canonical(q)) {
            valid.push(q);
        }
    }
    let quads: Vec<[usize; 4]> = valid
        .into_iter()
        .filter(|q| !seen.contains(&canonical(reversed(*q))))
        .collect();

    let positions = sheet_node.iter().map(|&c| Point3::from(nodes[c].0)).collect();
    let mut out = QuadMesh::new(positions, quads);
    let kept = out.compact_vertices();
    log::debug!(
        "extraction: {} lattice nodes, {} sheets, {} triangles ({} paired across a side, {} unpaired), {} quads",
        count,
        num_sheets,
        sheets.len(),
        second,
        unpaired,
        out.num_faces()
    );
    ExtractedQuads {
        vertices: out.vertices.iter().map(|p| p.coords).collect(),
        quads: out.quads,
        anchors: kept.iter().map(|&i| nodes[sheet_node[i]].1).collect(),
    }
}

impl Parametrizer {
    /// Extract the quad mesh from the lattice layout.
    pub fn extract(&mut self) {
        let start = Instant::now();
        let extracted = extract_quads(&self.lattice);
        self.output = QuadMesh::new(
            extracted.vertices.into_iter().map(Point3::from).collect(),
            extracted.quads,
        );
        self.anchors = extracted.anchors;
        log::info!(
            "extracted {} quads over {} vertices in {:.2?}",
            self.output.num_faces(),
            self.output.num_vertices(),
            start.elapsed()
        );
    }
}
