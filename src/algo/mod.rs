//! Remeshing algorithms.
//!
//! The pipeline in [`parametrizer`] is assembled from these building blocks:
//!
//! - **Fields**: [`hierarchy`] builds the multigrid pyramid, [`optimizer`]
//!   relaxes the orientation, scale and position fields on it.
//! - **Integer layout**: [`flow`] provides the max-flow and min-cost flow
//!   solvers behind the jump repair, [`localsat`] the MaxSAT patch repair.
//! - **Support**: graph adjacency and colouring, curvature, union-find
//!   variants, sparse linear algebra and progress reporting.

pub mod adjacency;
pub mod curvature;
pub mod disjoint_tree;
pub mod dset;
pub mod field_math;
pub mod flow;
pub mod hierarchy;
pub mod localsat;
pub mod optimizer;
pub mod parametrizer;
pub mod progress;
pub mod sparse;
