//! Exact closure of the face equations.
//!
//! The flow solve leaves residuals behind when an equation set cannot be
//! balanced or the capacity budget runs out. This pass removes them without
//! a budget. A spanning forest over the faces, linked through edges whose
//! jumps may change freely, carries every residual to the root of its tree:
//! a face is closed by adjusting the edge to its parent, which hands the
//! residual on in the parent's frame. What arrives at a root is an integer
//! combination of the jump components outside the forest, so it is cleared
//! beforehand by solving a small lattice problem over those components.
//!
//! Locked components are kept whenever the residual can be cleared without
//! them; otherwise a second pass releases them.

use std::collections::{BTreeMap, VecDeque};

use crate::algo::field_math::{rshift90, Vec2i};
use crate::algo::hierarchy::EdgeGraph;
use crate::mesh::INVALID;

/// Link of a face to its parent in the forest.
#[derive(Debug, Clone, Copy)]
struct ParentLink {
    edge: usize,
    side: usize,
}

/// Breadth-first spanning forest of the face graph.
#[derive(Debug)]
struct FaceForest {
    /// Root face of the tree of every face.
    root: Vec<usize>,
    /// Quarter turns that carry a residual of the face into its root frame.
    turns: Vec<i32>,
    parent: Vec<Option<ParentLink>>,
    /// Edge links a parent to a child.
    tree_edge: Vec<bool>,
    /// Faces in visiting order; parents come before their children.
    order: Vec<usize>,
}

impl FaceForest {
    fn build(graph: &EdgeGraph, e2f: &[Vec<(usize, usize)>], respect_locks: bool) -> Self {
        let nf = graph.num_faces();
        let free = |e: usize| !respect_locks || graph.allow_change[e] == [true, true];
        let link = |e: usize| e2f[e].len() == 2 && e2f[e][0].0 != e2f[e][1].0 && free(e);
        // Faces with a fully free open side root their trees first, so the
        // residual ends up next to a component that can absorb anything.
        let sink = |f: usize| {
            graph.f2e[f]
                .iter()
                .any(|&e| e != INVALID && e2f[e].len() == 1 && free(e))
        };

        let mut forest = Self {
            root: vec![INVALID; nf],
            turns: vec![0; nf],
            parent: vec![None; nf],
            tree_edge: vec![false; graph.num_edges()],
            order: Vec::with_capacity(nf),
        };
        let mut queue = VecDeque::new();
        for seed in (0..nf).filter(|&f| sink(f)).chain(0..nf) {
            if forest.root[seed] != INVALID {
                continue;
            }
            forest.root[seed] = seed;
            queue.push_back(seed);
            while let Some(f) = queue.pop_front() {
                forest.order.push(f);
                for (k, &e) in graph.f2e[f].iter().enumerate() {
                    if e == INVALID || !link(e) {
                        continue;
                    }
                    for &(g, side) in &e2f[e] {
                        if g == f || forest.root[g] != INVALID {
                            continue;
                        }
                        forest.root[g] = seed;
                        // Closing g by changing e adds the negated residual of g,
                        // seen from f's side of e, to f.
                        forest.turns[g] = (forest.turns[f] + graph.fq[f][k] - graph.fq[g][side] + 2).rem_euclid(4);
                        forest.parent[g] = Some(ParentLink { edge: e, side });
                        forest.tree_edge[e] = true;
                        queue.push_back(g);
                    }
                }
            }
        }
        forest
    }

    /// Residual every root would collect.
    fn root_residuals(&self, graph: &EdgeGraph) -> BTreeMap<usize, Vec2i> {
        let mut residuals = BTreeMap::new();
        for &f in &self.order {
            let s = graph.face_sum(f);
            if s != Vec2i::zeros() {
                *residuals.entry(self.root[f]).or_insert_with(Vec2i::zeros) += rshift90(s, self.turns[f]);
            }
        }
        residuals.retain(|_, r| *r != Vec2i::zeros());
        residuals
    }

    /// Effect on the root residual of a unit change of every jump component
    /// outside the forest, grouped by tree.
    fn generators(
        &self,
        graph: &EdgeGraph,
        e2f: &[Vec<(usize, usize)>],
        respect_locks: bool,
    ) -> BTreeMap<usize, Vec<(usize, usize, Vec2i)>> {
        let mut out: BTreeMap<usize, Vec<(usize, usize, Vec2i)>> = BTreeMap::new();
        for (e, incident) in e2f.iter().enumerate() {
            let Some(&(f0, _)) = incident.first() else {
                continue;
            };
            let tree = self.root[f0];
            if self.tree_edge[e] || incident.iter().any(|&(f, _)| self.root[f] != tree) {
                continue;
            }
            for comp in 0..2 {
                if respect_locks && !graph.allow_change[e][comp] {
                    continue;
                }
                let mut unit = Vec2i::zeros();
                unit[comp] = 1;
                let column = incident
                    .iter()
                    .map(|&(f, k)| rshift90(unit, graph.fq[f][k] + self.turns[f]))
                    .fold(Vec2i::zeros(), |a, b| a + b);
                if column != Vec2i::zeros() {
                    out.entry(tree).or_default().push((e, comp, column));
                }
            }
        }
        out
    }

    /// Close every non-root face by adjusting its parent edge, children first.
    fn push_to_roots(&self, graph: &mut EdgeGraph) {
        for &f in self.order.iter().rev() {
            let Some(ParentLink { edge, side }) = self.parent[f] else {
                continue;
            };
            let s = graph.face_sum(f);
            if s != Vec2i::zeros() {
                graph.diff[edge] -= rshift90(s, -graph.fq[f][side]);
            }
        }
    }
}

/// Extended Euclid: `(g, s, t)` with `s·a + t·b = g >= 0`.
fn extended_gcd(a: i64, b: i64) -> (i64, i64, i64) {
    let (mut r0, mut r1) = (a, b);
    let (mut s0, mut s1) = (1, 0);
    let (mut t0, mut t1) = (0, 1);
    while r1 != 0 {
        let q = r0.div_euclid(r1);
        (r0, r1) = (r1, r0 - q * r1);
        (s0, s1) = (s1, s0 - q * s1);
        (t0, t1) = (t1, t0 - q * t1);
    }
    if r0 < 0 {
        (-r0, -s0, -t0)
    } else {
        (r0, s0, t0)
    }
}

/// Lattice vector with its integer combination of generators.
#[derive(Debug, Clone)]
struct Combination {
    v: [i64; 2],
    coef: Vec<i64>,
}

impl Combination {
    fn unit(v: Vec2i, index: usize, len: usize) -> Self {
        let mut coef = vec![0; len];
        coef[index] = 1;
        Self {
            v: [i64::from(v.x), i64::from(v.y)],
            coef,
        }
    }

    /// `a·self + b·other`.
    fn mix(&self, a: i64, other: &Self, b: i64) -> Self {
        Self {
            v: [a * self.v[0] + b * other.v[0], a * self.v[1] + b * other.v[1]],
            coef: self.coef.iter().zip(&other.coef).map(|(x, y)| a * x + b * y).collect(),
        }
    }

    fn negated(&self) -> Self {
        self.mix(-1, self, 0)
    }
}

/// Hermite basis of the lattice spanned by `columns`: a vector with positive
/// first coordinate (if any has one) and a vector `(0, c)` with `c > 0`.
fn hermite_basis(columns: &[Vec2i]) -> (Option<Combination>, Option<Combination>) {
    let mut first: Option<Combination> = None;
    let mut second: Option<Combination> = None;
    for (i, &c) in columns.iter().enumerate() {
        let mut w = Combination::unit(c, i, columns.len());
        if w.v[0] != 0 {
            match first.take() {
                None => {
                    first = Some(if w.v[0] < 0 { w.negated() } else { w });
                    continue;
                }
                Some(b) => {
                    let (g, s, t) = extended_gcd(b.v[0], w.v[0]);
                    let reduced = b.mix(w.v[0] / g, &w, -(b.v[0] / g));
                    first = Some(b.mix(s, &w, t));
                    w = reduced;
                }
            }
        }
        if w.v[1] == 0 {
            continue;
        }
        second = Some(match second.take() {
            None if w.v[1] < 0 => w.negated(),
            None => w,
            Some(b) => {
                let (_, s, t) = extended_gcd(b.v[1], w.v[1]);
                b.mix(s, &w, t)
            }
        });
    }
    (first, second)
}

/// Integer coefficients with `Σ coef[i]·columns[i] = target`, if the target
/// lies in the lattice.
fn solve_lattice(columns: &[Vec2i], target: Vec2i) -> Option<Vec<i64>> {
    let (first, second) = hermite_basis(columns);
    let mut rest = [i64::from(target.x), i64::from(target.y)];
    let mut coef = vec![0i64; columns.len()];
    if rest[0] != 0 {
        let b = first?;
        if rest[0] % b.v[0] != 0 {
            return None;
        }
        let k = rest[0] / b.v[0];
        rest = [rest[0] - k * b.v[0], rest[1] - k * b.v[1]];
        for (c, x) in coef.iter_mut().zip(&b.coef) {
            *c += k * x;
        }
    }
    if rest[1] != 0 {
        let b = second?;
        if rest[1] % b.v[1] != 0 {
            return None;
        }
        let k = rest[1] / b.v[1];
        for (c, x) in coef.iter_mut().zip(&b.coef) {
            *c += k * x;
        }
    }
    Some(coef)
}

fn open_faces(graph: &EdgeGraph) -> usize {
    (0..graph.num_faces())
        .filter(|&f| graph.face_sum(f) != Vec2i::zeros())
        .count()
}

/// One closing pass. Returns the number of faces left open.
fn close_pass(graph: &mut EdgeGraph, e2f: &[Vec<(usize, usize)>], respect_locks: bool) -> usize {
    let forest = FaceForest::build(graph, e2f, respect_locks);
    let residuals = forest.root_residuals(graph);
    if !residuals.is_empty() {
        let generators = forest.generators(graph, e2f, respect_locks);
        for (root, r) in residuals {
            // One generator per distinct column spans the same lattice.
            let mut distinct: BTreeMap<(i32, i32), (usize, usize)> = BTreeMap::new();
            for &(e, comp, column) in generators.get(&root).map_or(&[][..], Vec::as_slice) {
                distinct.entry((column.x, column.y)).or_insert((e, comp));
            }
            let columns: Vec<Vec2i> = distinct.keys().map(|&(x, y)| Vec2i::new(x, y)).collect();
            let Some(coef) = solve_lattice(&columns, -r) else {
                log::debug!("residual {:?} at face {} is outside the free lattice", r, root);
                continue;
            };
            for (&(e, comp), k) in distinct.values().zip(coef) {
                graph.diff[e][comp] += k as i32;
            }
        }
    }
    forest.push_to_roots(graph);
    open_faces(graph)
}

/// Make every face equation of `graph` hold exactly. Returns the number of
/// faces still open, which is zero unless a residual sits on a component
/// joined to the rest only through non-manifold edges.
pub fn close_faces(graph: &mut EdgeGraph) -> usize {
    if open_faces(graph) == 0 {
        return 0;
    }
    let e2f = graph.edge_faces();
    let open = close_pass(graph, &e2f, true);
    if open == 0 {
        return 0;
    }
    log::warn!("{} faces only close by changing locked jumps", open);
    let open = close_pass(graph, &e2f, false);
    if open > 0 {
        log::warn!("{} faces stay open", open);
    }
    open
}
