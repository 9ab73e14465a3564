//! # QuadriFlow
//!
//! Field-aligned quad remeshing of triangle meshes.
//!
//! A smooth 4-fold orientation field and a position field are optimized on a
//! multi-resolution hierarchy, integer jumps between lattice points are made
//! consistent with max-flow, flipped lattice triangles are repaired, and the
//! lattice is collapsed into a quad mesh that is finally cleaned up.
//!
//! ## Features
//!
//! - **Multigrid field solvers**: orientation, adaptive scale and position
//!   fields on a vertex pyramid, with parallel colour-phase sweeps
//! - **Guaranteed layout repair**: integer constraints solved coarse-to-fine
//!   by max-flow or minimum-cost flow
//! - **Feature preservation**: sharp creases and open boundaries become
//!   field constraints and stay in the output
//! - **Flip repair**: short flow cycles, optionally followed by an external
//!   MaxSAT solver on local patches
//! - **Cleanup**: hole filling, valence repair and surface-aware smoothing
//!
//! ## Quick Start
//!
//! ```
//! use quadriflow::prelude::*;
//! use nalgebra::Point3;
//!
//! // A flat 8 × 8 grid of squares, split into triangles.
//! let mut vertices = Vec::new();
//! for y in 0..=8 {
//!     for x in 0..=8 {
//!         vertices.push(Point3::new(x as f64, y as f64, 0.0));
//!     }
//! }
//! let mut triangles = Vec::new();
//! for y in 0..8 {
//!     for x in 0..8 {
//!         let a = y * 9 + x;
//!         triangles.push([a, a + 1, a + 10]);
//!         triangles.push([a, a + 10, a + 9]);
//!     }
//! }
//!
//! let options = QuadriflowOptions::default()
//!     .with_target_faces(16)
//!     .with_preserve_boundary(true)
//!     .with_seed(7);
//! let quads = remesh(&vertices, &triangles, &options, &Progress::none()).unwrap();
//! for q in &quads.quads {
//!     assert!(q.iter().all(|&v| v < quads.num_vertices()));
//! }
//! ```
//!
//! ## Cancellation
//!
//! The progress callback runs after every pipeline phase; returning `true`
//! stops the run:
//!
//! ```
//! use quadriflow::prelude::*;
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//! ];
//! let cancel = Progress::new(|_, _, _| true);
//! let result = remesh(&vertices, &[[0, 1, 2]], &QuadriflowOptions::default(), &cancel);
//! assert!(matches!(result, Err(MeshError::Cancelled)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algo;
pub mod error;
pub mod io;
pub mod mesh;

/// Prelude module for convenient imports.
///
/// ```
/// use quadriflow::prelude::*;
/// ```
pub mod prelude {
    pub use crate::algo::parametrizer::{remesh, Parametrizer, QuadriflowOptions};
    pub use crate::algo::progress::Progress;
    pub use crate::error::{MeshError, Result};
    pub use crate::mesh::{LatticeMesh, QuadMesh};
}

pub use algo::parametrizer::{remesh, QuadriflowOptions};
pub use error::{MeshError, Result};
pub use mesh::QuadMesh;

// Re-export nalgebra types for convenience
pub use nalgebra;

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use nalgebra::Point3;

    #[test]
    fn test_tetrahedron_remesh_runs() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];

        let options = QuadriflowOptions::default().with_target_faces(50).with_seed(1);
        let mesh = remesh(&vertices, &faces, &options, &Progress::none()).unwrap();
        assert_eq!(mesh.quads.is_empty(), mesh.vertices.is_empty());
        for q in &mesh.quads {
            assert!(q.iter().all(|&v| v < mesh.num_vertices()));
        }
    }
}
