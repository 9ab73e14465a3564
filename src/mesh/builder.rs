//! Turning host input into a clean triangle soup.
//!
//! The pipeline accepts arbitrary triangle lists: indices are validated,
//! coincident vertices welded, degenerate and duplicate faces dropped, and
//! vertices no face uses removed.

use nalgebra::{Point3, Vector3};

use super::geometry::edge_length_stats;
use super::merge::{compact_vertices, merge_close_vertices, remove_degenerate_faces};
use crate::error::{MeshError, Result};

/// Check that every face references an existing vertex.
///
/// # Example
/// ```
/// use quadriflow::mesh::validate_triangles;
///
/// assert!(validate_triangles(3, &[[0, 1, 2]]).is_ok());
/// assert!(validate_triangles(3, &[[0, 1, 3]]).is_err());
/// ```
pub fn validate_triangles(num_vertices: usize, faces: &[[usize; 3]]) -> Result<()> {
    if faces.is_empty() {
        return Err(MeshError::EmptyMesh);
    }
    for (fi, face) in faces.iter().enumerate() {
        for &vi in face {
            if vi >= num_vertices {
                return Err(MeshError::InvalidVertexIndex { face: fi, vertex: vi });
            }
        }
    }
    Ok(())
}

/// Validate and clean an input triangle mesh.
///
/// Vertices closer than a millionth of the mean edge length are welded.
/// Fails with [`MeshError::EmptyMesh`] when nothing usable remains.
pub fn build_from_triangles(
    vertices: &[Point3<f64>],
    faces: &[[usize; 3]],
) -> Result<(Vec<Vector3<f64>>, Vec<[usize; 3]>)> {
    validate_triangles(vertices.len(), faces)?;

    let v: Vec<Vector3<f64>> = vertices.iter().map(|p| p.coords).collect();
    let (avg_edge, _) = edge_length_stats(&v, faces);
    let eps = (avg_edge * 1e-6).max(1e-12);

    let (mut v, mut f) = merge_close_vertices(&v, faces, eps);
    remove_degenerate_faces(&v, &mut f, eps * eps);
    if f.is_empty() {
        return Err(MeshError::EmptyMesh);
    }
    compact_vertices(&mut v, &mut f);
    Ok((v, f))
}
