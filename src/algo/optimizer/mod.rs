//! Field and integer solvers.
//!
//! The continuous solvers ([`optimize_orientations`], [`optimize_scale`],
//! [`optimize_positions`]) relax the fields stored in a
//! [`Hierarchy`](crate::algo::hierarchy::Hierarchy) with colour-phased
//! Gauss-Seidel sweeps, coarsest level first. [`optimize_integer_constraints`]
//! repairs the integer jumps on the edge pyramid, and [`refine_positions`]
//! polishes the extracted quad vertices.

mod closure;
mod integer;
mod orientation;
mod position;
mod refine;
mod scale;

pub use closure::close_faces;
pub use integer::{
    coefficient, equation_arcs, equation_values, optimize_integer_constraints, solve_level, EquationArc,
    IntegerOptions, IntegerReport,
};
pub use orientation::{optimize_orientations, orientation_singularities, relax_orientation_level};
pub use position::{optimize_positions, relax_position_level};
pub use refine::{refine_positions, Anchor, RefineMode, REFINE_LAMBDA};
pub use scale::{optimize_scale, smooth_scales, target_scale};

/// Gauss-Seidel sweeps per level and field.
pub const SWEEPS_PER_LEVEL: usize = 6;
