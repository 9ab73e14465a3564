//! QuadriFlow CLI - quad remeshing command-line tool.
//!
//! Usage: quadriflow <COMMAND> [OPTIONS] <INPUT> [OUTPUT]
//!
//! Run `quadriflow --help` for available commands. Set `RUST_LOG=debug` for
//! per-phase details.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use quadriflow::algo::curvature::compute_curvature;
use quadriflow::algo::parametrizer::{boundary_loops, remesh, QuadriflowOptions};
use quadriflow::algo::progress::Progress;
use quadriflow::io;
use quadriflow::mesh::geometry::{edge_length_stats, surface_area};
use quadriflow::mesh::{build_from_triangles, DirectedEdges};

#[derive(Parser)]
#[command(name = "quadriflow")]
#[command(author, version, about = "Field-aligned quad remeshing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display mesh information
    Info {
        /// Input mesh file
        input: PathBuf,

        /// Show curvature statistics
        #[arg(long)]
        curvature: bool,
    },

    /// Remesh a triangle mesh into quads
    Remesh {
        /// Input triangle mesh
        input: PathBuf,

        /// Output quad mesh
        output: PathBuf,

        /// Target number of quads (default: from the mean edge length)
        #[arg(short = 'f', long, default_value = "-1", allow_hyphen_values = true)]
        faces: i64,

        /// Keep sharp creases
        #[arg(long)]
        sharp: bool,

        /// Keep open boundaries
        #[arg(long)]
        boundary: bool,

        /// Adapt the quad size to curvature
        #[arg(long)]
        adaptive: bool,

        /// Use minimum-cost flow for the integer layout
        #[arg(long)]
        mcf: bool,

        /// Repair remaining flips with a MaxSAT solver
        #[arg(long)]
        sat: bool,

        /// MaxSAT solver executable
        #[arg(long, default_value = "open-wbo")]
        sat_solver: PathBuf,

        /// Solver time limit in seconds
        #[arg(long, default_value = "60")]
        sat_timeout: u64,

        /// Random seed
        #[arg(short, long, default_value = "0")]
        seed: u64,

        /// Dihedral angle in degrees above which an edge is sharp
        #[arg(long, default_value = "60")]
        sharp_angle: f64,

        /// Use single-threaded execution (for benchmarking)
        #[arg(long)]
        sequential: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Info { input, curvature } => cmd_info(&input, curvature)?,
        Commands::Remesh {
            input,
            output,
            faces,
            sharp,
            boundary,
            adaptive,
            mcf,
            sat,
            sat_solver,
            sat_timeout,
            seed,
            sharp_angle,
            sequential,
        } => {
            let mut options = QuadriflowOptions::default()
                .with_target_faces(faces)
                .with_preserve_sharp(sharp)
                .with_preserve_boundary(boundary)
                .with_adaptive_scale(adaptive)
                .with_minimum_cost_flow(mcf)
                .with_aggressive_sat(sat)
                .with_sat_solver(sat_solver)
                .with_seed(seed);
            options.sat_timeout = Duration::from_secs(sat_timeout);
            options.sharp_angle_degrees = sharp_angle;
            if sequential {
                rayon::ThreadPoolBuilder::new().num_threads(1).build_global()?;
            }
            cmd_remesh(&input, &output, &options)?;
        }
    }
    Ok(())
}

fn create_progress() -> Progress {
    let max_percent = Arc::new(AtomicUsize::new(0)); // Track highest percent seen (monotonic)

    Progress::new(move |current, total, message| {
        if total == 0 {
            return false;
        }
        let percent = (Progress::fraction(current, total) * 100.0).round() as usize;
        if max_percent.fetch_max(percent, Ordering::Relaxed) > percent {
            return false;
        }

        let bar_width = 30;
        let filled = (percent * bar_width) / 100;
        let bar = "=".repeat(filled);
        let space = " ".repeat(bar_width - filled);
        eprint!("\r[{}{}] {:3}% {:<24}", bar, space, percent, message);
        let _ = std::io::stderr().flush();
        if current >= total {
            eprintln!();
        }
        false
    })
}

fn cmd_info(input: &PathBuf, show_curvature: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (points, triangles) = io::load(input)?;
    let (v, faces) = build_from_triangles(&points, &triangles)?;
    let topo = DirectedEdges::<3>::build(v.len(), &faces);

    println!("File: {}", input.display());
    println!("Vertices: {} ({} after welding)", points.len(), v.len());
    println!("Triangles: {} ({} after cleanup)", triangles.len(), faces.len());
    println!("Surface area: {:.6}", surface_area(&v, &faces));
    let (avg_edge, max_edge) = edge_length_stats(&v, &faces);
    println!("Edge length: avg {:.6}, max {:.6}", avg_edge, max_edge);

    let boundary = topo.boundary.iter().filter(|&&b| b).count();
    let nonmanifold = topo.nonmanifold.iter().filter(|&&b| b).count();
    if boundary == 0 {
        println!("Topology: Closed (no boundary)");
    } else {
        println!("Topology: Open ({} boundary vertices)", boundary);
    }
    if nonmanifold > 0 {
        println!("Non-manifold vertices: {}", nonmanifold);
    }

    if show_curvature {
        let curv = compute_curvature(&v, &faces, &topo.boundary);
        let max_abs: Vec<f64> = (0..curv.len()).map(|i| curv.max_abs(i)).collect();
        let g_min = curv.gaussian.iter().cloned().fold(f64::INFINITY, f64::min);
        let g_max = curv.gaussian.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let k_max = max_abs.iter().cloned().fold(0.0, f64::max);
        let k_avg = max_abs.iter().sum::<f64>() / max_abs.len().max(1) as f64;
        println!("\nCurvature:");
        println!("  Gaussian: min={:.4}, max={:.4}", g_min, g_max);
        println!("  Max |principal|: max={:.4}, avg={:.4}", k_max, k_avg);
    }
    Ok(())
}

fn cmd_remesh(
    input: &PathBuf,
    output: &PathBuf,
    options: &QuadriflowOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let (vertices, triangles) = io::load(input)?;
    println!("Input: {} vertices, {} triangles", vertices.len(), triangles.len());

    let start = Instant::now();
    let quads = remesh(&vertices, &triangles, options, &create_progress())?;
    let elapsed = start.elapsed();

    let valence = quads.valences();
    let irregular = valence.iter().filter(|&&d| d != 4).count();
    println!(
        "Output: {} vertices, {} quads ({} irregular vertices, {} open loops)",
        quads.num_vertices(),
        quads.num_faces(),
        irregular,
        boundary_loops(&quads).len()
    );
    println!("Time: {:.2?}", elapsed);

    io::save(&quads, output)?;
    println!("Saved to {}", output.display());
    Ok(())
}
