//! End-to-end runs of the remeshing pipeline on generated meshes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nalgebra::Point3;
use quadriflow::mesh::build_from_triangles;
use quadriflow::prelude::*;

/// Unit icosahedron subdivided `levels` times, projected onto the sphere.
fn icosphere(levels: usize) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    let t = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let mut vertices: Vec<Point3<f64>> = [
        [-1.0, t, 0.0],
        [1.0, t, 0.0],
        [-1.0, -t, 0.0],
        [1.0, -t, 0.0],
        [0.0, -1.0, t],
        [0.0, 1.0, t],
        [0.0, -1.0, -t],
        [0.0, 1.0, -t],
        [t, 0.0, -1.0],
        [t, 0.0, 1.0],
        [-t, 0.0, -1.0],
        [-t, 0.0, 1.0],
    ]
    .iter()
    .map(|p| Point3::from(nalgebra::Vector3::new(p[0], p[1], p[2]).normalize()))
    .collect();
    let mut faces: Vec<[usize; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    for _ in 0..levels {
        let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
        let mut midpoint = |a: usize, b: usize, vertices: &mut Vec<Point3<f64>>| -> usize {
            let key = (a.min(b), a.max(b));
            *midpoints.entry(key).or_insert_with(|| {
                let m = (vertices[a].coords + vertices[b].coords).normalize();
                vertices.push(Point3::from(m));
                vertices.len() - 1
            })
        };
        let mut next = Vec::with_capacity(faces.len() * 4);
        for [a, b, c] in faces {
            let ab = midpoint(a, b, &mut vertices);
            let bc = midpoint(b, c, &mut vertices);
            let ca = midpoint(c, a, &mut vertices);
            next.push([a, ab, ca]);
            next.push([b, bc, ab]);
            next.push([c, ca, bc]);
            next.push([ab, bc, ca]);
        }
        faces = next;
    }
    (vertices, faces)
}

/// Flat `n × n` grid of unit squares on z = 0, split into triangles.
fn grid(n: usize) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    let w = n + 1;
    let mut vertices = Vec::with_capacity(w * w);
    for y in 0..w {
        for x in 0..w {
            vertices.push(Point3::new(x as f64, y as f64, 0.0));
        }
    }
    let mut faces = Vec::with_capacity(2 * n * n);
    for y in 0..n {
        for x in 0..n {
            let a = y * w + x;
            faces.push([a, a + 1, a + w + 1]);
            faces.push([a, a + w + 1, a + w]);
        }
    }
    (vertices, faces)
}

fn assert_well_formed(mesh: &QuadMesh) {
    for q in &mesh.quads {
        assert!(q.iter().all(|&v| v < mesh.num_vertices()), "index out of range in {:?}", q);
        for i in 0..4 {
            for j in (i + 1)..4 {
                assert_ne!(q[i], q[j], "repeated corner in {:?}", q);
            }
        }
    }
    assert!(mesh.vertices.iter().all(|p| p.coords.iter().all(|c| c.is_finite())));
}

/// Number of quads on each undirected edge.
fn edge_uses(mesh: &QuadMesh) -> HashMap<(usize, usize), usize> {
    let mut uses = HashMap::new();
    for q in &mesh.quads {
        for k in 0..4 {
            let (a, b) = (q[k], q[(k + 1) % 4]);
            *uses.entry((a.min(b), a.max(b))).or_insert(0) += 1;
        }
    }
    uses
}

#[test]
fn test_icosphere_becomes_quads_on_the_sphere() {
    let (vertices, faces) = icosphere(2);
    let options = QuadriflowOptions::default().with_target_faces(200).with_seed(3);
    let mesh = remesh(&vertices, &faces, &options, &Progress::none()).unwrap();

    assert!(!mesh.is_empty());
    assert_well_formed(&mesh);
    assert!(mesh.boundary_edges().is_empty(), "sphere output has holes");
    for p in &mesh.vertices {
        let r = p.coords.norm();
        assert!(r > 0.5 && r < 1.5, "vertex {:?} at radius {}", p, r);
    }
}

#[test]
fn test_grid_with_boundary_stays_flat() {
    let (vertices, faces) = grid(10);
    let options = QuadriflowOptions::default()
        .with_target_faces(64)
        .with_preserve_boundary(true)
        .with_seed(11);
    let mesh = remesh(&vertices, &faces, &options, &Progress::none()).unwrap();

    assert!(!mesh.is_empty());
    assert_well_formed(&mesh);
    assert!(!mesh.boundary_edges().is_empty(), "boundary was filled in");
    for p in &mesh.vertices {
        assert!(p.z.abs() < 1e-6, "vertex {:?} left the plane", p);
    }
}

#[test]
fn test_closed_sphere_is_two_manifold() {
    let (vertices, faces) = icosphere(3);
    let options = QuadriflowOptions::default().with_target_faces(500).with_seed(3);
    let mesh = remesh(&vertices, &faces, &options, &Progress::none()).unwrap();

    assert_well_formed(&mesh);
    assert!(mesh.boundary_edges().is_empty(), "sphere output has holes");
    for (edge, &count) in &edge_uses(&mesh) {
        assert_eq!(count, 2, "edge {:?} has {} quads", edge, count);
    }
    let nv = mesh.num_vertices();
    assert!((400..=600).contains(&nv), "{} vertices for 500 target quads", nv);
    assert_eq!(nv, mesh.num_faces() + 2, "not a sphere");

    let again = remesh(&vertices, &faces, &options, &Progress::none()).unwrap();
    assert_eq!(mesh, again);
}

#[test]
fn test_preserved_boundary_lies_on_the_border() {
    let (vertices, faces) = grid(10);
    let options = QuadriflowOptions::default()
        .with_target_faces(64)
        .with_preserve_boundary(true)
        .with_seed(11);
    let mesh = remesh(&vertices, &faces, &options, &Progress::none()).unwrap();

    let on_border = |p: &Point3<f64>| {
        let d = [p.x.abs(), (p.x - 10.0).abs(), p.y.abs(), (p.y - 10.0).abs()];
        d.iter().cloned().fold(f64::INFINITY, f64::min) < 1e-2
    };
    let boundary = mesh.boundary_edges();
    assert!(!boundary.is_empty());
    for (a, b) in boundary {
        for v in [a, b] {
            let p = &mesh.vertices[v];
            assert!(on_border(p), "boundary vertex {:?} is off the border", p);
        }
    }
}

#[test]
fn test_integer_layout_leaves_no_open_faces() {
    for (vertices, faces) in [icosphere(2), grid(10)] {
        let mut p = Parametrizer::new(QuadriflowOptions::default().with_target_faces(150).with_seed(9));
        p.initialize(&vertices, &faces).unwrap();
        p.compute_field_constraints();
        p.optimize_orientations();
        p.optimize_scale();
        p.optimize_positions();
        p.compute_integer_layout();
        assert!(p.lattice.inconsistent_faces().is_empty());
    }
}

#[test]
fn test_degenerate_faces_are_ignored() {
    let (mut vertices, mut faces) = grid(8);
    let (clean_vertices, clean_faces) = (vertices.clone(), faces.clone());
    let n = vertices.len();
    // A sliver on top of an existing edge and a face with a repeated index.
    vertices.push(Point3::new(0.5, 0.0, 0.0));
    faces.push([0, n, 1]);
    faces.push([2, 2, 3]);

    let (v, f) = build_from_triangles(&vertices, &faces).unwrap();
    assert_eq!(f.len(), clean_faces.len());
    assert_eq!(v.len(), clean_vertices.len());

    let options = QuadriflowOptions::default().with_target_faces(30).with_seed(5);
    let mesh = remesh(&vertices, &faces, &options, &Progress::none()).unwrap();
    assert_well_formed(&mesh);
    let clean = remesh(&clean_vertices, &clean_faces, &options, &Progress::none()).unwrap();
    assert_eq!(mesh, clean);
}

#[test]
fn test_all_degenerate_input_is_empty() {
    let vertices = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)];
    let faces = vec![[0, 0, 1], [1, 2, 2]];
    let result = remesh(&vertices, &faces, &QuadriflowOptions::default(), &Progress::none());
    assert!(matches!(result, Err(MeshError::EmptyMesh)));
}

#[test]
fn test_out_of_range_index_is_rejected() {
    let (vertices, mut faces) = grid(2);
    faces.push([0, 1, 99]);
    let result = remesh(&vertices, &faces, &QuadriflowOptions::default(), &Progress::none());
    assert!(matches!(result, Err(MeshError::InvalidVertexIndex { vertex: 99, .. })));
}

#[test]
fn test_cancel_on_first_report() {
    let (vertices, faces) = grid(6);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let progress = Progress::new(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        true
    });
    let result = remesh(&vertices, &faces, &QuadriflowOptions::default(), &progress);
    assert!(matches!(result, Err(MeshError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cancel_midway() {
    let (vertices, faces) = grid(6);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let progress = Progress::new(move |current, total, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        assert!(current <= total);
        current == 5
    });
    let options = QuadriflowOptions::default().with_target_faces(20);
    let result = remesh(&vertices, &faces, &options, &progress);
    assert!(matches!(result, Err(MeshError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[test]
fn test_progress_reaches_the_end() {
    let (vertices, faces) = grid(6);
    let last = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&last);
    let progress = Progress::new(move |current, total, _| {
        assert_eq!(total, 9);
        seen.store(current, Ordering::SeqCst);
        false
    });
    let options = QuadriflowOptions::default().with_target_faces(20);
    remesh(&vertices, &faces, &options, &progress).unwrap();
    assert_eq!(last.load(Ordering::SeqCst), 9);
}

#[test]
fn test_same_seed_same_mesh() {
    let (vertices, faces) = icosphere(1);
    let options = QuadriflowOptions::default().with_target_faces(60).with_seed(42);
    let a = remesh(&vertices, &faces, &options, &Progress::none()).unwrap();
    let b = remesh(&vertices, &faces, &options, &Progress::none()).unwrap();
    assert_eq!(a, b);
}
