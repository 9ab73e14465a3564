//! Closing small holes left by extraction.
//!
//! An even boundary loop can be split into quads; the split minimizing the
//! squared deviation of the corner angles from 90° is found by interval
//! dynamic programming over the loop.
//!
//! Odd loops cannot be quadded on their own. Since every quad mesh has an
//! even total boundary length, odd loops come in pairs: the quad strip
//! running from one to the other is cut lengthwise, which adds one edge to
//! each end and makes both loops even.

use std::collections::{HashMap, HashSet};

use nalgebra::Vector3;

use crate::algo::optimizer::Anchor;
use crate::mesh::{DirectedEdges, QuadMesh, INVALID};

/// Loops with this many edges or more stay open.
pub const MAX_HOLE_EDGES: usize = 25;

/// Boundary loops of a quad mesh, each following the direction of its
/// boundary edges.
pub fn boundary_loops(mesh: &QuadMesh) -> Vec<Vec<usize>> {
    let topo = DirectedEdges::<4>::build(mesh.num_vertices(), &mesh.quads);
    let mut next: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut starts = Vec::new();
    for (e, &opp) in topo.e2e.iter().enumerate() {
        if opp != INVALID {
            continue;
        }
        let q = &mesh.quads[e / 4];
        let (a, b) = (q[e % 4], q[(e + 1) % 4]);
        next.entry(a).or_default().push(b);
        starts.push(a);
    }

    let mut loops = Vec::new();
    for s in starts {
        let mut path = vec![s];
        let mut cur = s;
        loop {
            let Some(b) = next.get_mut(&cur).and_then(Vec::pop) else {
                break;
            };
            if b == s {
                loops.push(path);
                break;
            }
            path.push(b);
            cur = b;
        }
    }
    loops
}

fn corner_energy(prev: &Vector3<f64>, p: &Vector3<f64>, next: &Vector3<f64>) -> f64 {
    let (a, b) = (prev - p, next - p);
    let (la, lb) = (a.norm(), b.norm());
    if la == 0.0 || lb == 0.0 {
        return std::f64::consts::PI * std::f64::consts::PI;
    }
    let angle = (a.dot(&b) / (la * lb)).clamp(-1.0, 1.0).acos();
    let d = angle - std::f64::consts::FRAC_PI_2;
    d * d
}

fn quad_energy(p: [&Vector3<f64>; 4]) -> f64 {
    (0..4).map(|k| corner_energy(p[(k + 3) % 4], p[k], p[(k + 1) % 4])).sum()
}

/// Split a closed polygon into quads. Returns quads over polygon indices
/// `0..len`, following the polygon's orientation, or `None` for odd or
/// too-short polygons.
pub fn fill_hole(points: &[Vector3<f64>]) -> Option<Vec<[usize; 4]>> {
    let m = points.len();
    if m < 4 || m % 2 != 0 {
        return None;
    }
    // cost[i][j]: best split of the sub-polygon i..=j closed by the chord j→i.
    let mut cost = vec![vec![f64::INFINITY; m]; m];
    let mut choice = vec![vec![(0, 0); m]; m];
    for i in 0..m - 1 {
        cost[i][i + 1] = 0.0;
    }
    for span in (3..m).step_by(2) {
        for i in 0..m - span {
            let j = i + span;
            let mut best = (f64::INFINITY, (0, 0));
            for a in (i + 1..j).step_by(2) {
                for b in (a + 1..j).step_by(2) {
                    let c = quad_energy([&points[i], &points[a], &points[b], &points[j]])
                        + cost[i][a]
                        + cost[a][b]
                        + cost[b][j];
                    if c < best.0 {
                        best = (c, (a, b));
                    }
                }
            }
            cost[i][j] = best.0;
            choice[i][j] = best.1;
        }
    }

    let mut quads = Vec::with_capacity(m / 2 - 1);
    let mut stack = vec![(0, m - 1)];
    while let Some((i, j)) = stack.pop() {
        if j == i + 1 {
            continue;
        }
        let (a, b) = choice[i][j];
        quads.push([i, a, b, j]);
        stack.extend([(i, a), (a, b), (b, j)]);
    }
    Some(quads)
}

/// Whether `hole` is a simple loop that [`fill_holes`] may close once it is
/// even.
fn fillable(hole: &[usize], anchors: &[Anchor], preserve_boundary: bool) -> bool {
    if hole.len() >= MAX_HOLE_EDGES {
        return false;
    }
    if preserve_boundary && hole.iter().any(|&v| anchors[v].boundary) {
        return false;
    }
    let mut unique = hole.to_vec();
    unique.sort_unstable();
    unique.dedup();
    unique.len() == hole.len()
}

/// Directed quad side `(a, b)` to `(quad, side index)`.
fn quad_sides(mesh: &QuadMesh) -> HashMap<(usize, usize), (usize, usize)> {
    let mut sides = HashMap::with_capacity(mesh.quads.len() * 4);
    for (f, q) in mesh.quads.iter().enumerate() {
        for k in 0..4 {
            sides.insert((q[k], q[(k + 1) % 4]), (f, k));
        }
    }
    sides
}

/// Walk the quad strip entered through side `side` of quad `face` until it
/// leaves the mesh. Returns the crossed `(quad, entry side)` pairs and the
/// boundary side it leaves through, or `None` when the strip meets itself.
fn trace_strip(
    mesh: &QuadMesh,
    sides: &HashMap<(usize, usize), (usize, usize)>,
    face: usize,
    side: usize,
) -> Option<(Vec<(usize, usize)>, (usize, usize))> {
    let mut seen = HashSet::new();
    let mut strip = Vec::new();
    let (mut f, mut s) = (face, side);
    loop {
        if !seen.insert(f) {
            return None;
        }
        strip.push((f, s));
        let q = mesh.quads[f];
        let exit = (s + 2) % 4;
        let (a, b) = (q[exit], q[(exit + 1) % 4]);
        match sides.get(&(b, a)) {
            Some(&(g, t)) => (f, s) = (g, t),
            None => return Some((strip, (a, b))),
        }
    }
}

/// Add the midpoint of edge `(a, b)`, shared between both directions.
fn midpoint(
    mesh: &mut QuadMesh,
    anchors: &mut Vec<Anchor>,
    mids: &mut HashMap<(usize, usize), usize>,
    (a, b): (usize, usize),
    on_boundary: bool,
) -> usize {
    let key = (a.min(b), a.max(b));
    if let Some(&m) = mids.get(&key) {
        return m;
    }
    let (pa, pb) = (&anchors[a], &anchors[b]);
    let normal = (pa.normal + pb.normal).try_normalize(1e-12).unwrap_or(pa.normal);
    let anchor = Anchor {
        point: (pa.point + pb.point) * 0.5,
        normal,
        sharp: pa.sharp && pb.sharp,
        boundary: on_boundary && pa.boundary && pb.boundary,
    };
    mesh.vertices.push(nalgebra::center(&mesh.vertices[a], &mesh.vertices[b]));
    anchors.push(anchor);
    let m = mesh.vertices.len() - 1;
    mids.insert(key, m);
    m
}

/// Cut every quad of `strip` in two along its length.
fn split_strip(mesh: &mut QuadMesh, anchors: &mut Vec<Anchor>, strip: &[(usize, usize)]) {
    let mut mids = HashMap::new();
    let last = strip.len() - 1;
    for (i, &(f, s)) in strip.iter().enumerate() {
        let q = mesh.quads[f];
        let c: [usize; 4] = std::array::from_fn(|k| q[(s + k) % 4]);
        let m1 = midpoint(mesh, anchors, &mut mids, (c[0], c[1]), i == 0);
        let m2 = midpoint(mesh, anchors, &mut mids, (c[2], c[3]), i == last);
        mesh.quads[f] = [c[0], m1, m2, c[3]];
        mesh.quads.push([m1, c[1], c[2], m2]);
    }
}

/// Pair up odd loops, at least one of them fillable, by splitting the quad
/// strip between them. Returns the number of split strips.
fn even_out_loops(mesh: &mut QuadMesh, anchors: &mut Vec<Anchor>, preserve_boundary: bool) -> usize {
    let mut strips = 0;
    'search: loop {
        let loops = boundary_loops(mesh);
        let odd: Vec<usize> = (0..loops.len()).filter(|&l| loops[l].len() % 2 == 1).collect();
        if odd.len() < 2 {
            break;
        }
        let mut owner = HashMap::new();
        for &l in &odd {
            let hole = &loops[l];
            for i in 0..hole.len() {
                owner.insert((hole[i], hole[(i + 1) % hole.len()]), l);
            }
        }
        let sides = quad_sides(mesh);
        for &l in &odd {
            let hole = &loops[l];
            if !fillable(hole, anchors, preserve_boundary) {
                continue;
            }
            for i in 0..hole.len() {
                let Some(&(f, s)) = sides.get(&(hole[i], hole[(i + 1) % hole.len()])) else {
                    continue;
                };
                let Some((strip, exit)) = trace_strip(mesh, &sides, f, s) else {
                    continue;
                };
                if owner.get(&exit).is_some_and(|&m| m != l) {
                    split_strip(mesh, anchors, &strip);
                    strips += 1;
                    continue 'search;
                }
            }
        }
        break;
    }
    if strips > 0 {
        log::debug!("split {} quad strips to pair odd holes", strips);
    }
    strips
}

/// Fill every boundary loop shorter than [`MAX_HOLE_EDGES`], first pairing
/// up odd loops. With `preserve_boundary`, loops touching an input-boundary
/// vertex stay open. `anchors` stays parallel to the vertices. Returns the
/// number of filled loops.
pub fn fill_holes(mesh: &mut QuadMesh, anchors: &mut Vec<Anchor>, preserve_boundary: bool) -> usize {
    even_out_loops(mesh, anchors, preserve_boundary);
    let mut filled = 0;
    for hole in boundary_loops(mesh) {
        if hole.len() % 2 != 0 || !fillable(&hole, anchors, preserve_boundary) {
            continue;
        }
        let ring: Vec<usize> = hole.into_iter().rev().collect();
        let points: Vec<Vector3<f64>> = ring.iter().map(|&v| mesh.vertices[v].coords).collect();
        if let Some(quads) = fill_hole(&points) {
            mesh.quads.extend(quads.iter().map(|q| q.map(|k| ring[k])));
            filled += 1;
        }
    }
    if filled > 0 {
        log::debug!("filled {} holes", filled);
    }
    filled
}
