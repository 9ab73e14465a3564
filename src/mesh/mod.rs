//! Mesh data structures and topology utilities.
//!
//! The pipeline works on flat arrays rather than a linked structure:
//!
//! - [`DirectedEdges`] derives vertex-to-edge and opposite-edge maps for
//!   triangle or quad index lists (directed edge `N·f + k` leaves corner `k`
//!   of face `f`).
//! - [`LatticeMesh`] carries the integer jump labels between the field
//!   solve and quad extraction.
//! - [`QuadMesh`] is the output.
//!
//! # Example
//!
//! ```
//! use quadriflow::mesh::DirectedEdges;
//!
//! let faces = vec![[0, 1, 2], [0, 2, 3]];
//! let topo = DirectedEdges::<3>::build(4, &faces);
//! assert_eq!(topo.num_boundary_edges(), 4);
//! ```

mod builder;
pub mod dedge;
pub mod geometry;
pub mod lattice;
pub mod merge;
mod quad;
pub mod subdivide;

pub use builder::{build_from_triangles, validate_triangles};
pub use dedge::{dedge_next, dedge_prev, DirectedEdges, INVALID};
pub use lattice::LatticeMesh;
pub use quad::QuadMesh;
