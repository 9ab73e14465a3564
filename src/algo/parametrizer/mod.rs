//! The remeshing pipeline.
//!
//! [`Parametrizer`] owns every intermediate of one remeshing run and exposes
//! the phases as methods, so they can be driven and inspected one at a time.
//! [`remesh`] runs them in order:
//!
//! 1. **Preprocess**: clean and normalize the input, pick the lattice
//!    spacing, subdivide long edges, build the hierarchy.
//! 2. **Constraints**: boundary and sharp edges become direction and line
//!    constraints.
//! 3. **Orientation field**, 4. **Scale field** (adaptive only),
//!    5. **Position field**: multigrid relaxation.
//! 6. **Integer constraints**: per-edge lattice jumps, repaired by max-flow so
//!    every face closes.
//! 7. **Flip repair**: short flow cycles, then optionally MaxSAT patches.
//! 8. **Extraction**: zero jumps collapse, unit triangles pair into quads.
//! 9. **Cleanup**: overlapping quads, fans, holes, valence, vertex refinement.
//!
//! # Example
//!
//! ```
//! use nalgebra::Point3;
//! use quadriflow::algo::parametrizer::{remesh, QuadriflowOptions};
//! use quadriflow::algo::progress::Progress;
//!
//! let mut vertices = Vec::new();
//! let mut faces = Vec::new();
//! for y in 0..=10 {
//!     for x in 0..=10 {
//!         vertices.push(Point3::new(x as f64 * 0.1, y as f64 * 0.1, 0.0));
//!     }
//! }
//! for y in 0..10 {
//!     for x in 0..10 {
//!         let a = y * 11 + x;
//!         faces.push([a, a + 1, a + 12]);
//!         faces.push([a, a + 12, a + 11]);
//!     }
//! }
//! let options = QuadriflowOptions::default().with_target_faces(40).with_seed(1);
//! let quads = remesh(&vertices, &faces, &options, &Progress::none()).unwrap();
//! assert!(quads.quads.iter().flatten().all(|&v| v < quads.vertices.len()));
//! ```
//!
//! # References
//!
//! - Huang, J., et al. (2018). "QuadriFlow: A Scalable and Robust Method for
//!   Quadrangulation." Computer Graphics Forum (SGP).
//! - Jakob, W., et al. (2015). "Instant Field-Aligned Meshes." ACM SIGGRAPH Asia.

mod constraints;
mod extract;
mod flip;
mod holes;
mod init;
mod manifold;
mod valence;

pub use constraints::{face_orientation_ranks, EDGE_DIFF_LIMIT};
pub use extract::{extract_quads, ExtractedQuads};
pub use flip::{fix_flip, FLIP_ENERGY_WEIGHT};
pub use holes::{boundary_loops, fill_hole, fill_holes, MAX_HOLE_EDGES};
pub use manifold::{drop_conflicting_quads, split_fans};
pub use valence::fix_valence;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use nalgebra::{Point3, Vector3};

use crate::algo::hierarchy::Hierarchy;
use crate::algo::optimizer::{refine_positions, Anchor, RefineMode};
use crate::algo::progress::Progress;
use crate::error::{MeshError, Result};
use crate::mesh::geometry::{closest_point_on_segments, Normalization};
use crate::mesh::{DirectedEdges, LatticeMesh, QuadMesh, INVALID};

/// Number of pipeline phases reported to the progress callback.
pub const NUM_PHASES: usize = 9;

/// Passes of each vertex refinement mode.
const REFINE_PASSES: usize = 3;

/// Options for quad remeshing.
#[derive(Debug, Clone)]
pub struct QuadriflowOptions {
    /// Desired number of output quads; `<= 0` derives it from the mean edge
    /// length.
    pub target_faces: i64,

    /// Align the field with sharp creases and keep them in the output.
    pub preserve_sharp: bool,

    /// Align the field with open boundaries and keep them in the output.
    pub preserve_boundary: bool,

    /// Shrink the lattice spacing in curved regions.
    pub adaptive_scale: bool,

    /// Route integer corrections by minimum-cost flow on the finest level.
    pub minimum_cost_flow: bool,

    /// Run the MaxSAT repair on faces that stay flipped.
    pub aggressive_sat: bool,

    /// Seed for colouring and field initialization.
    pub seed: u64,

    /// MaxSAT solver executable used by the aggressive repair.
    pub sat_solver: PathBuf,

    /// Wall-clock limit of one solver run.
    pub sat_timeout: Duration,

    /// Capacity growth rounds of the integer solve.
    pub max_capacity_rounds: usize,

    /// Longest flow cycle half-length tried by the flip repair.
    pub flip_max_len: usize,

    /// Patch sizes tried by the MaxSAT repair.
    pub sat_thresholds: usize,

    /// Dihedral angle above which an edge counts as sharp.
    pub sharp_angle_degrees: f64,
}

impl Default for QuadriflowOptions {
    fn default() -> Self {
        Self {
            target_faces: -1,
            preserve_sharp: false,
            preserve_boundary: false,
            adaptive_scale: false,
            minimum_cost_flow: false,
            aggressive_sat: false,
            seed: 0,
            sat_solver: PathBuf::from("open-wbo"),
            sat_timeout: Duration::from_secs(60),
            max_capacity_rounds: 10,
            flip_max_len: 2,
            sat_thresholds: 4,
            sharp_angle_degrees: 60.0,
        }
    }
}

impl QuadriflowOptions {
    /// Set the desired number of output quads.
    pub fn with_target_faces(mut self, faces: i64) -> Self {
        self.target_faces = faces;
        self
    }

    /// Set whether sharp creases are preserved.
    pub fn with_preserve_sharp(mut self, preserve: bool) -> Self {
        self.preserve_sharp = preserve;
        self
    }

    /// Set whether open boundaries are preserved.
    pub fn with_preserve_boundary(mut self, preserve: bool) -> Self {
        self.preserve_boundary = preserve;
        self
    }

    /// Set whether the lattice spacing adapts to curvature.
    pub fn with_adaptive_scale(mut self, adaptive: bool) -> Self {
        self.adaptive_scale = adaptive;
        self
    }

    /// Set whether the finest integer level uses minimum-cost flow.
    pub fn with_minimum_cost_flow(mut self, enabled: bool) -> Self {
        self.minimum_cost_flow = enabled;
        self
    }

    /// Set whether the MaxSAT repair runs.
    pub fn with_aggressive_sat(mut self, enabled: bool) -> Self {
        self.aggressive_sat = enabled;
        self
    }

    /// Set the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the MaxSAT solver executable.
    pub fn with_sat_solver(mut self, path: impl Into<PathBuf>) -> Self {
        self.sat_solver = path.into();
        self
    }

    /// Check option ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.sharp_angle_degrees > 0.0 && self.sharp_angle_degrees < 180.0) {
            return Err(MeshError::invalid_param(
                "sharp_angle_degrees",
                self.sharp_angle_degrees,
                "must lie strictly between 0 and 180",
            ));
        }
        if self.max_capacity_rounds == 0 {
            return Err(MeshError::invalid_param(
                "max_capacity_rounds",
                self.max_capacity_rounds,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// State of one remeshing run.
#[derive(Debug, Clone)]
pub struct Parametrizer {
    /// Options of the run.
    pub options: QuadriflowOptions,
    /// Transform from input to unit-box coordinates.
    pub normalization: Normalization,
    /// Cleaned, normalized and subdivided vertex positions.
    pub v: Vec<Vector3<f64>>,
    /// Triangles over `v`.
    pub faces: Vec<[usize; 3]>,
    /// Vertex normals.
    pub n: Vec<Vector3<f64>>,
    /// Vertex areas.
    pub areas: Vec<f64>,
    /// Directed-edge topology of the triangles.
    pub topology: DirectedEdges<3>,
    /// Per directed edge: crease sharper than the threshold.
    pub sharp_edges: Vec<bool>,
    /// Lattice spacing in normalized units.
    pub scale: f64,
    /// Vertex and edge pyramids with the field values.
    pub hierarchy: Hierarchy,
    /// Orientation singularities: face to quarter-turn index.
    pub singularities: BTreeMap<usize, i32>,
    /// Integer layout.
    pub lattice: LatticeMesh,
    /// Extracted quads (normalized coordinates until [`Self::finish`]).
    pub output: QuadMesh,
    /// Surface sample of every output vertex.
    pub anchors: Vec<Anchor>,
}

impl Parametrizer {
    /// Empty state for `options`.
    pub fn new(options: QuadriflowOptions) -> Self {
        Self {
            options,
            normalization: Normalization::identity(),
            v: Vec::new(),
            faces: Vec::new(),
            n: Vec::new(),
            areas: Vec::new(),
            topology: DirectedEdges::build(0, &[]),
            sharp_edges: Vec::new(),
            scale: 1.0,
            hierarchy: Hierarchy::default(),
            singularities: BTreeMap::new(),
            lattice: LatticeMesh::default(),
            output: QuadMesh::default(),
            anchors: Vec::new(),
        }
    }

    /// Make the output manifold, fill holes, repair valences and relax the
    /// output vertices onto the input surface.
    pub fn cleanup(&mut self) {
        let start = Instant::now();
        let preserve_boundary = self.options.preserve_boundary;
        let dropped = drop_conflicting_quads(&mut self.output);
        let fans = split_fans(&mut self.output, &mut self.anchors);
        let filled = fill_holes(&mut self.output, &mut self.anchors, preserve_boundary);
        let edits = fix_valence(&mut self.output, &mut self.anchors);
        let pinned = if preserve_boundary { self.project_boundary() } else { Vec::new() };

        let mut modes = vec![RefineMode::Dynamic];
        if self.options.preserve_sharp {
            modes.push(RefineMode::Sharp);
        }
        if preserve_boundary {
            modes.push(RefineMode::Fixed);
        }
        let mut positions: Vec<Vector3<f64>> = self.output.vertices.iter().map(|p| p.coords).collect();
        for mode in modes {
            let done = refine_positions(&mut positions, &self.output.quads, &self.anchors, mode, REFINE_PASSES);
            log::debug!("{:?} refinement: {} of {} passes", mode, done, REFINE_PASSES);
        }
        for &v in &pinned {
            positions[v] = self.anchors[v].point;
        }
        self.output.vertices = positions.into_iter().map(Point3::from).collect();

        let kept = self.output.compact_vertices();
        self.anchors = kept.iter().map(|&i| self.anchors[i]).collect();
        log::info!(
            "cleanup: {} overlaps dropped, {} fans split, {} holes filled, {} valence edits, {} boundary vertices in {:.2?}",
            dropped,
            fans,
            filled,
            edits,
            pinned.len(),
            start.elapsed()
        );
    }

    /// Anchor every output vertex on a kept boundary loop to its closest
    /// point on the input boundary. Returns those vertices.
    fn project_boundary(&mut self) -> Vec<usize> {
        let segments: Vec<[Vector3<f64>; 2]> = self
            .topology
            .e2e
            .iter()
            .enumerate()
            .filter(|(_, &opp)| opp == INVALID)
            .map(|(e, _)| {
                let f = &self.faces[e / 3];
                [self.v[f[e % 3]], self.v[f[(e + 1) % 3]]]
            })
            .collect();
        if segments.is_empty() {
            return Vec::new();
        }

        let mut on_border: Vec<bool> = self.anchors.iter().map(|a| a.boundary).collect();
        for hole in boundary_loops(&self.output) {
            if hole.iter().any(|&v| self.anchors[v].boundary) {
                for v in hole {
                    on_border[v] = true;
                }
            }
        }
        let mut pinned = Vec::new();
        for (v, anchor) in self.anchors.iter_mut().enumerate() {
            if !on_border[v] {
                continue;
            }
            if let Some(q) = closest_point_on_segments(&self.output.vertices[v].coords, &segments) {
                anchor.point = q;
                anchor.boundary = true;
                pinned.push(v);
            }
        }
        pinned
    }

    /// Map the output back to input coordinates and hand it over.
    pub fn finish(mut self) -> QuadMesh {
        for p in &mut self.output.vertices {
            *p = Point3::from(self.normalization.invert(&p.coords));
        }
        self.output
    }
}

/// Remesh a triangle mesh into quads.
///
/// The callback is asked after each of the [`NUM_PHASES`] phases; a `true`
/// answer stops the run with [`MeshError::Cancelled`] and no output.
pub fn remesh(
    vertices: &[Point3<f64>],
    triangles: &[[usize; 3]],
    options: &QuadriflowOptions,
    progress: &Progress,
) -> Result<QuadMesh> {
    options.validate()?;
    let start = Instant::now();
    let mut p = Parametrizer::new(options.clone());
    let mut step = 0;
    let mut checkpoint = |message: &str| -> Result<()> {
        step += 1;
        log::info!("[{}/{}] {} ({:.2?})", step, NUM_PHASES, message, start.elapsed());
        if progress.report(step, NUM_PHASES, message) {
            log::info!("cancelled after {}", message);
            return Err(MeshError::Cancelled);
        }
        Ok(())
    };

    p.initialize(vertices, triangles)?;
    checkpoint("Preprocess")?;
    p.compute_field_constraints();
    checkpoint("Constraints")?;
    p.optimize_orientations();
    checkpoint("Orientation field")?;
    p.optimize_scale();
    checkpoint("Scale field")?;
    p.optimize_positions();
    checkpoint("Position field")?;
    p.compute_integer_layout();
    checkpoint("Integer constraints")?;
    p.repair_flips();
    checkpoint("Flip repair")?;
    p.extract();
    checkpoint("Quad extraction")?;
    p.cleanup();
    checkpoint("Cleanup")?;

    let out = p.finish();
    log::info!(
        "remeshed into {} quads, {} vertices in {:.2?}",
        out.num_faces(),
        out.num_vertices(),
        start.elapsed()
    );
    Ok(out)
}
