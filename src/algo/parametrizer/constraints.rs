//! Feature constraints on the fields and the integer layout.

use std::time::Instant;

use nalgebra::Vector3;

use super::Parametrizer;
use crate::algo::disjoint_tree::DisjointOrientTree;
use crate::algo::field_math::{
    compat_orientation_extrinsic_index_4, compat_position_extrinsic_index_4, rotate90_by, rshift90, tangential,
    LatticeFrame, Vec2i,
};
use crate::algo::hierarchy::{EdgeGraph, EdgePyramid, MAX_DEPTH};
use crate::algo::optimizer::{optimize_integer_constraints, IntegerOptions};
use crate::mesh::subdivide::subdivide_edges_by_diff;
use crate::mesh::{LatticeMesh, INVALID};

/// Two feature directions meeting at a vertex with `|cos|` below this form a
/// corner.
const CORNER_COS: f64 = 0.95;

/// Corner directions with `|cos|` below this are treated as perpendicular.
const PERPENDICULAR_COS: f64 = 0.05;

/// Upper bound on jump-driven edge splits, per edge of the lattice mesh.
pub const EDGE_DIFF_LIMIT: usize = 4;

/// Quarter turns `r` per corner such that `rotate90_by(q[c], n[c], r)` agree
/// best over the face. Corner 0 keeps its frame.
pub fn face_orientation_ranks(q: &[Vector3<f64>], n: &[Vector3<f64>], face: &[usize; 3]) -> [i32; 3] {
    let d0 = q[face[0]];
    let mut best = (f64::NEG_INFINITY, [0; 3]);
    for r1 in 0..4 {
        let d1 = rotate90_by(&q[face[1]], &n[face[1]], r1);
        for r2 in 0..4 {
            let d2 = rotate90_by(&q[face[2]], &n[face[2]], r2);
            let score = d0.dot(&d1).min(d1.dot(&d2)).min(d2.dot(&d0));
            if score > best.0 {
                best = (score, [0, r1, r2]);
            }
        }
    }
    best.1
}

/// Jump from `a` to `b` in the unrotated frame of `a`.
fn edge_jump(mesh: &LatticeMesh, a: usize, b: usize) -> Vec2i {
    let frame = |i: usize| LatticeFrame {
        p: mesh.v[i],
        n: mesh.n[i],
        q: mesh.q[i],
        o: mesh.o[i],
        scale: mesh.scale[i],
    };
    let (ra, rb) = compat_orientation_extrinsic_index_4(&mesh.q[a], &mesh.n[a], &mesh.q[b], &mesh.n[b]);
    let (ia, ib, _) = compat_position_extrinsic_index_4(&frame(a).rotated(ra), &frame(b).rotated(rb));
    rshift90(ia - ib, ra)
}

/// Merge neighbouring face frames where the corner ranks agree and set `fq`.
fn assign_face_frames(mesh: &mut LatticeMesh, singular: &[bool]) {
    let mut ranks: Vec<[i32; 3]> = mesh
        .faces
        .iter()
        .map(|face| face_orientation_ranks(&mesh.q, &mesh.n, face))
        .collect();
    let rank_of = |ranks: &[[i32; 3]], f: usize, v: usize, faces: &[[usize; 3]]| {
        faces[f].iter().position(|&c| c == v).map(|k| ranks[f][k])
    };

    let mut tree = DisjointOrientTree::new(mesh.num_faces());
    let e2f = mesh.edge_faces();
    for (e, incident) in e2f.iter().enumerate() {
        let &[(f, _), (g, _)] = incident.as_slice() else {
            continue;
        };
        if mesh.sharp_edge[e] || singular[f] || singular[g] {
            continue;
        }
        let [a, b] = mesh.edges[e];
        let (Some(fa), Some(fb), Some(ga), Some(gb)) = (
            rank_of(&ranks, f, a, &mesh.faces),
            rank_of(&ranks, f, b, &mesh.faces),
            rank_of(&ranks, g, a, &mesh.faces),
            rank_of(&ranks, g, b, &mesh.faces),
        ) else {
            continue;
        };
        if (fb - fa - gb + ga).rem_euclid(4) != 0 {
            continue;
        }
        tree.merge(f, g, (-fa).rem_euclid(4) as u8, (-ga).rem_euclid(4) as u8);
    }

    for (f, r) in ranks.iter_mut().enumerate() {
        let turn = i32::from(tree.orient(f));
        for x in r.iter_mut() {
            *x = (*x + turn).rem_euclid(4);
        }
    }
    for f in 0..mesh.num_faces() {
        for k in 0..3 {
            let e = mesh.f2e[f][k];
            let start = mesh.faces[f][k];
            mesh.fq[f][k] = if mesh.edges[e][0] == start {
                (4 - ranks[f][k]) % 4
            } else {
                (6 - ranks[f][(k + 1) % 3]) % 4
            };
        }
    }
}

impl Parametrizer {
    /// Turn preserved boundary and sharp edges into orientation and
    /// position constraints, then restrict them up the hierarchy.
    pub fn compute_field_constraints(&mut self) {
        let (boundary, sharp) = (self.options.preserve_boundary, self.options.preserve_sharp);
        if !boundary && !sharp {
            return;
        }
        let level = &mut self.hierarchy.levels[0];
        let mut constrained = 0;
        let mut corners = 0;
        for (f, face) in self.faces.iter().enumerate() {
            for k in 0..3 {
                let e = 3 * f + k;
                let keep = (boundary && self.topology.e2e[e] == INVALID) || (sharp && self.sharp_edges[e]);
                if !keep {
                    continue;
                }
                let (a, b) = (face[k], face[(k + 1) % 3]);
                let dir = self.v[b] - self.v[a];
                for x in [a, b] {
                    let t = tangential(&dir, &level.n[x]);
                    if t.norm_squared() < 0.5 {
                        continue;
                    }
                    if level.cqw[x] == 0.0 && level.cow[x] == 0.0 {
                        level.cq[x] = t;
                        level.cqw[x] = 1.0;
                        level.co[x] = level.v[x];
                        level.cow[x] = 1.0;
                        constrained += 1;
                    } else if level.cqw[x] > 0.0 {
                        let dot = level.cq[x].dot(&t).abs();
                        if dot < CORNER_COS {
                            level.co[x] = level.v[x];
                            level.cow[x] = 1.0;
                            if dot >= PERPENDICULAR_COS {
                                level.cqw[x] = 0.0;
                            }
                            corners += 1;
                        }
                    }
                }
            }
        }
        log::info!("{} constrained vertices, {} corners", constrained, corners);
        self.hierarchy.propagate_constraints();
    }

    /// Build the lattice mesh from the fields, solve the integer jumps and
    /// split edges that jump by more than one step.
    pub fn compute_integer_layout(&mut self) {
        let start = Instant::now();
        let level = &self.hierarchy.levels[0];
        let mut mesh = LatticeMesh::from_triangles(self.v.clone(), level.n.clone(), self.faces.clone());
        mesh.q = level.q.clone();
        mesh.o = level.o.clone();
        mesh.scale = level.s.iter().map(|s| s * self.scale).collect();
        mesh.boundary = self.topology.boundary.clone();

        for (f, face) in self.faces.iter().enumerate() {
            for k in 0..3 {
                if self.options.preserve_sharp && self.sharp_edges[3 * f + k] {
                    let e = mesh.f2e[f][k];
                    mesh.sharp_edge[e] = true;
                    mesh.sharp[face[k]] = true;
                    mesh.sharp[face[(k + 1) % 3]] = true;
                }
            }
        }

        for e in 0..mesh.num_edges() {
            let [a, b] = mesh.edges[e];
            mesh.diff[e] = edge_jump(&mesh, a, b);
        }
        let mut singular = vec![false; mesh.num_faces()];
        for &f in self.singularities.keys() {
            singular[f] = true;
        }
        assign_face_frames(&mut mesh, &singular);

        let boundary_edges = mesh.boundary_edges();
        let lock_boundary = self.options.preserve_boundary;
        let mut locked = 0;
        for e in 0..mesh.num_edges() {
            if !(mesh.sharp_edge[e] || (lock_boundary && boundary_edges[e])) {
                continue;
            }
            let [a, b] = mesh.edges[e];
            let dir = mesh.v[b] - mesh.v[a];
            let t = mesh.n[a].cross(&mesh.q[a]);
            let comp = if dir.dot(&mesh.q[a]).abs() >= dir.dot(&t).abs() { 1 } else { 0 };
            mesh.diff[e][comp] = 0;
            mesh.allow_change[e][comp] = false;
            locked += 1;
        }

        let open_before = mesh.inconsistent_faces().len();
        self.hierarchy.edges = EdgePyramid::build(EdgeGraph::from_lattice(&mesh), MAX_DEPTH);
        let report = optimize_integer_constraints(
            &mut self.hierarchy.edges,
            &IntegerOptions {
                max_capacity_rounds: self.options.max_capacity_rounds,
                minimum_cost: self.options.minimum_cost_flow,
            },
        );
        mesh.diff = self.hierarchy.edges.levels[0].diff.clone();
        if !report.full_flow {
            log::warn!("integer layout needed unbounded capacity");
        }

        let max_splits = EDGE_DIFF_LIMIT * mesh.num_edges();
        let splits = subdivide_edges_by_diff(&mut mesh, max_splits);
        log::info!(
            "integer layout: {} edges ({} locked), {} -> {} open faces, {} splits in {:.2?}",
            mesh.num_edges(),
            locked,
            open_before,
            mesh.inconsistent_faces().len(),
            splits,
            start.elapsed()
        );
        self.lattice = mesh;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::parametrizer::QuadriflowOptions;
    use nalgebra::Point3;

    fn plane(n: usize) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
        let mut v = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                v.push(Point3::new(x as f64, y as f64, 0.0));
            }
        }
        let w = n + 1;
        let mut f = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let a = y * w + x;
                f.push([a, a + 1, a + w + 1]);
                f.push([a, a + w + 1, a + w]);
            }
        }
        (v, f)
    }

    #[test]
    fn test_face_ranks_align_rotated_corners() {
        let n = vec![Vector3::z(); 3];
        let q = vec![Vector3::x(), Vector3::y(), -Vector3::x()];
        let r = face_orientation_ranks(&q, &n, &[0, 1, 2]);
        assert_eq!(r[0], 0);
        for k in 1..3 {
            let d = rotate90_by(&q[k], &n[k], r[k]);
            assert!((d - Vector3::x()).norm() < 1e-12);
        }
    }

    #[test]
    fn test_boundary_constraints_follow_edges() {
        let (v, f) = plane(4);
        let mut p = Parametrizer::new(QuadriflowOptions::default().with_preserve_boundary(true));
        p.initialize(&v, &f).unwrap();
        p.compute_field_constraints();
        let level = &p.hierarchy.levels[0];
        for i in 0..level.len() {
            if p.topology.boundary[i] {
                assert!(level.cow[i] > 0.0);
            } else {
                assert_eq!(level.cqw[i], 0.0);
            }
        }
        // The four box corners become point constraints with perpendicular
        // feature directions.
        let corner = (0..level.len())
            .find(|&i| (level.v[i] - Vector3::new(-0.5, -0.5, 0.0)).norm() < 1e-9)
            .unwrap();
        assert_eq!(level.cow[corner], 1.0);
        assert!(level.cq[corner].x.abs() > 0.99 || level.cq[corner].y.abs() > 0.99);
    }

    #[test]
    fn test_integer_layout_closes_faces() {
        let (v, f) = plane(6);
        let mut p = Parametrizer::new(QuadriflowOptions::default().with_target_faces(36).with_seed(5));
        p.initialize(&v, &f).unwrap();
        p.compute_field_constraints();
        p.optimize_orientations();
        p.optimize_positions();
        p.compute_integer_layout();
        assert!(p.lattice.num_faces() >= p.faces.len());
        assert!(p.lattice.inconsistent_faces().is_empty());
        for d in &p.lattice.diff {
            assert!(d.x.abs() <= 1 && d.y.abs() <= 1);
        }
    }

    /// Octahedron subdivided `levels` times and pushed onto the unit sphere.
    fn octasphere(levels: usize) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
        let mut v: Vec<Vector3<f64>> = vec![
            Vector3::x(),
            -Vector3::x(),
            Vector3::y(),
            -Vector3::y(),
            Vector3::z(),
            -Vector3::z(),
        ];
        let mut f = vec![
            [0, 2, 4],
            [2, 1, 4],
            [1, 3, 4],
            [3, 0, 4],
            [2, 0, 5],
            [1, 2, 5],
            [3, 1, 5],
            [0, 3, 5],
        ];
        for _ in 0..levels {
            let mut mid = std::collections::HashMap::new();
            let mut next = Vec::new();
            for [a, b, c] in f {
                let mut m = |x: usize, y: usize| {
                    *mid.entry((x.min(y), x.max(y))).or_insert_with(|| {
                        v.push((v[x] + v[y]).normalize());
                        v.len() - 1
                    })
                };
                let (ab, bc, ca) = (m(a, b), m(b, c), m(c, a));
                next.extend([[a, ab, ca], [b, bc, ab], [c, ca, bc], [ab, bc, ca]]);
            }
            f = next;
        }
        (v.into_iter().map(Point3::from).collect(), f)
    }

    #[test]
    fn test_integer_layout_closes_sphere_faces() {
        let (v, f) = octasphere(3);
        for seed in [0, 7] {
            let options = QuadriflowOptions::default().with_target_faces(150).with_seed(seed);
            let mut p = Parametrizer::new(options);
            p.initialize(&v, &f).unwrap();
            p.compute_field_constraints();
            p.optimize_orientations();
            p.optimize_scale();
            p.optimize_positions();
            p.compute_integer_layout();
            let level = &p.hierarchy.edges.levels[0];
            for face in 0..level.num_faces() {
                assert_eq!(level.face_sum(face), Vec2i::zeros(), "seed {} face {}", seed, face);
            }
            assert!(p.lattice.inconsistent_faces().is_empty(), "seed {}", seed);
        }
    }
}
