//! Preprocessing and the continuous field phases.

use std::time::Instant;

use nalgebra::Point3;

use super::Parametrizer;
use crate::algo::adjacency::generate_adjacency_matrix_uniform;
use crate::algo::hierarchy::Hierarchy;
use crate::algo::optimizer;
use crate::error::{MeshError, Result};
use crate::mesh::geometry::{
    detect_sharp_edges, edge_length_stats, face_normals, surface_area, vertex_areas, vertex_normals,
    Normalization,
};
use crate::mesh::subdivide::subdivide_long_edges;
use crate::mesh::{build_from_triangles, DirectedEdges};

/// Rounds of long-edge splitting before the hierarchy is built.
const PRESUBDIVIDE_ROUNDS: usize = 8;

/// Lattice spacing for `target_faces` quads on a surface of `area`, falling
/// back to the mean edge length when no target is given.
pub(super) fn lattice_scale(area: f64, avg_edge: f64, target_faces: i64) -> f64 {
    if target_faces > 0 {
        (area / target_faces as f64).sqrt()
    } else {
        avg_edge
    }
}

impl Parametrizer {
    /// Clean, normalize and subdivide the input, then build the hierarchy
    /// with seeded fields.
    pub fn initialize(&mut self, vertices: &[Point3<f64>], triangles: &[[usize; 3]]) -> Result<()> {
        let start = Instant::now();
        let (mut v, mut faces) = build_from_triangles(vertices, triangles)?;
        self.normalization = Normalization::fit(&v);
        self.normalization.apply(&mut v);

        let area = surface_area(&v, &faces);
        let (avg_edge, max_edge) = edge_length_stats(&v, &faces);
        self.scale = lattice_scale(area, avg_edge, self.options.target_faces);
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(MeshError::EmptyMesh);
        }
        log::info!(
            "input: {} vertices, {} faces, area {:.4}, edges avg {:.4} max {:.4}, scale {:.4} (~{:.0} quads)",
            v.len(),
            faces.len(),
            area,
            avg_edge,
            max_edge,
            self.scale,
            area / (self.scale * self.scale)
        );

        let limit = (self.scale * 0.5).min(avg_edge * 2.0);
        let added = subdivide_long_edges(&mut v, &mut faces, limit, PRESUBDIVIDE_ROUNDS);
        if added > 0 {
            log::debug!("split long edges: {} new vertices", added);
        }

        self.topology = DirectedEdges::build(v.len(), &faces);
        self.n = vertex_normals(&v, &faces);
        self.areas = vertex_areas(&v, &faces);
        self.sharp_edges = if self.options.preserve_sharp {
            detect_sharp_edges(&face_normals(&v, &faces), &self.topology, self.options.sharp_angle_degrees)
        } else {
            vec![false; faces.len() * 3]
        };
        let sharp = self.sharp_edges.iter().filter(|&&s| s).count() / 2;
        if sharp > 0 {
            log::debug!("{} sharp edges", sharp);
        }

        let adj = generate_adjacency_matrix_uniform(v.len(), &faces);
        self.hierarchy = Hierarchy::build(
            v.clone(),
            self.n.clone(),
            self.areas.clone(),
            adj,
            self.scale,
            self.options.seed,
        )?;
        self.hierarchy.initialize_fields();
        self.v = v;
        self.faces = faces;
        log::debug!("preprocess done in {:.2?}", start.elapsed());
        Ok(())
    }

    /// Smooth the cross field and record its singular faces.
    pub fn optimize_orientations(&mut self) {
        optimizer::optimize_orientations(&mut self.hierarchy);
        let level = &self.hierarchy.levels[0];
        self.singularities = optimizer::orientation_singularities(&level.q, &level.n, &self.faces)
            .into_iter()
            .collect();
        log::info!("orientation field has {} singular faces", self.singularities.len());
    }

    /// Fit the spacing to curvature when adaptive scale is on.
    pub fn optimize_scale(&mut self) {
        if self.options.adaptive_scale {
            optimizer::optimize_scale(&mut self.hierarchy);
        }
    }

    /// Smooth the position field.
    pub fn optimize_positions(&mut self) {
        optimizer::optimize_positions(&mut self.hierarchy);
    }
}
