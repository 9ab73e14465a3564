//! Benchmarks for the remeshing pipeline.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::Point3;
use quadriflow::algo::adjacency::generate_adjacency_matrix_uniform;
use quadriflow::algo::hierarchy::Hierarchy;
use quadriflow::algo::optimizer::{optimize_orientations, optimize_positions};
use quadriflow::mesh::geometry::{vertex_areas, vertex_normals};
use quadriflow::prelude::*;

fn create_grid(n: usize) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    let mut vertices = Vec::with_capacity((n + 1) * (n + 1));
    let mut faces = Vec::with_capacity(n * n * 2);

    for j in 0..=n {
        for i in 0..=n {
            vertices.push(Point3::new(i as f64, j as f64, 0.0));
        }
    }

    for j in 0..n {
        for i in 0..n {
            let v00 = j * (n + 1) + i;
            let v10 = v00 + 1;
            let v01 = v00 + (n + 1);
            let v11 = v01 + 1;

            faces.push([v00, v10, v11]);
            faces.push([v00, v11, v01]);
        }
    }

    (vertices, faces)
}

/// Latitude-longitude sphere with poles.
fn create_sphere(rings: usize, segments: usize) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    let mut vertices = vec![Point3::new(0.0, 0.0, 1.0)];
    for r in 1..rings {
        let theta = std::f64::consts::PI * r as f64 / rings as f64;
        for s in 0..segments {
            let phi = std::f64::consts::TAU * s as f64 / segments as f64;
            vertices.push(Point3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos()));
        }
    }
    vertices.push(Point3::new(0.0, 0.0, -1.0));
    let south = vertices.len() - 1;
    let ring = |r: usize, s: usize| 1 + (r - 1) * segments + s % segments;

    let mut faces = Vec::new();
    for s in 0..segments {
        faces.push([0, ring(1, s), ring(1, s + 1)]);
        faces.push([south, ring(rings - 1, s + 1), ring(rings - 1, s)]);
    }
    for r in 1..rings - 1 {
        for s in 0..segments {
            faces.push([ring(r, s), ring(r + 1, s), ring(r + 1, s + 1)]);
            faces.push([ring(r, s), ring(r + 1, s + 1), ring(r, s + 1)]);
        }
    }
    (vertices, faces)
}

fn bench_fields(c: &mut Criterion) {
    let (points, faces) = create_grid(60);
    let v: Vec<_> = points.iter().map(|p| p.coords).collect();
    let n = vertex_normals(&v, &faces);
    let a = vertex_areas(&v, &faces);
    let adj = generate_adjacency_matrix_uniform(v.len(), &faces);

    c.bench_function("hierarchy_build_grid_60", |b| {
        b.iter(|| Hierarchy::build(v.clone(), n.clone(), a.clone(), adj.clone(), 1.0, 0).unwrap())
    });

    let mut base = Hierarchy::build(v.clone(), n.clone(), a.clone(), adj.clone(), 4.0, 0).unwrap();
    base.initialize_fields();
    c.bench_function("orientation_field_grid_60", |b| {
        b.iter(|| {
            let mut h = base.clone();
            optimize_orientations(&mut h);
            h
        })
    });
    c.bench_function("position_field_grid_60", |b| {
        b.iter(|| {
            let mut h = base.clone();
            optimize_positions(&mut h);
            h
        })
    });
}

fn bench_remesh(c: &mut Criterion) {
    let mut group = c.benchmark_group("remesh");
    group.sample_size(10);

    let (grid_v, grid_f) = create_grid(30);
    let options = QuadriflowOptions::default().with_target_faces(200).with_seed(1);
    group.bench_function("grid_30", |b| {
        b.iter(|| remesh(black_box(&grid_v), black_box(&grid_f), &options, &Progress::none()).unwrap())
    });

    let (sphere_v, sphere_f) = create_sphere(24, 48);
    let options = QuadriflowOptions::default().with_target_faces(500).with_seed(1);
    group.bench_function("sphere_24x48", |b| {
        b.iter(|| remesh(black_box(&sphere_v), black_box(&sphere_f), &options, &Progress::none()).unwrap())
    });

    let options = options.with_minimum_cost_flow(true);
    group.bench_function("sphere_24x48_mcf", |b| {
        b.iter(|| remesh(black_box(&sphere_v), black_box(&sphere_f), &options, &Progress::none()).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_fields, bench_remesh);
criterion_main!(benches);
