//! Integer jump repair by max-flow.
//!
//! Every face contributes two equations (one per lattice axis) stating that
//! its rotated jumps sum to zero. A jump component that appears in two
//! equations with opposite signs is an arc between them: pushing one unit of
//! flow along the arc moves one unit of residual from one equation to the
//! other. Residuals enter from the source and leave through the sink, so a
//! full flow zeroes every equation. Components touching a single equation
//! (boundary edges) or two equations with equal signs (cuts between face
//! frames) are not arcs; they first balance each connected set of equations
//! so a full flow exists. Sets that cannot be balanced and flows that fall
//! short leave residuals behind, which [`close_faces`] then clears.

use std::collections::BTreeMap;
use std::time::Instant;

use super::closure::close_faces;
use crate::algo::dset::DisjointSet;
use crate::algo::field_math::Vec2i;
use crate::algo::flow::{FlowBackend, FlowSolver, FlowVariable};
use crate::algo::hierarchy::{EdgeGraph, EdgePyramid};

/// Capacity of the final round after the growth budget is exhausted.
const UNBOUNDED_CAPACITY: i32 = 1 << 20;

/// Capacity of the first round.
const INITIAL_CAPACITY: i32 = 2;

/// Options for the integer solve.
#[derive(Debug, Clone)]
pub struct IntegerOptions {
    /// Rounds of capacity growth before giving up on bounded jumps.
    pub max_capacity_rounds: usize,
    /// Use min-cost flow on the finest level.
    pub minimum_cost: bool,
}

impl Default for IntegerOptions {
    fn default() -> Self {
        Self {
            max_capacity_rounds: 10,
            minimum_cost: false,
        }
    }
}

/// Outcome of [`optimize_integer_constraints`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegerReport {
    /// Faces that did not close before the solve.
    pub inconsistent_before: usize,
    /// Faces that do not close after the solve.
    pub inconsistent_after: usize,
    /// Every level reached full flow within the capacity budget.
    pub full_flow: bool,
}

/// Equation axis and sign that component `comp` of a jump lands on after
/// `turns` quarter turns.
#[inline]
pub fn coefficient(turns: i32, comp: usize) -> (usize, i32) {
    let q = turns.rem_euclid(4);
    if comp == 0 {
        ((q & 1) as usize, if q < 2 { 1 } else { -1 })
    } else {
        let axis = if q & 1 == 1 { 0 } else { 1 };
        let sign = if q == 0 || q == 3 { 1 } else { -1 };
        (axis, sign)
    }
}

/// Residual of every equation; equation `2f + axis`.
pub fn equation_values(graph: &EdgeGraph) -> Vec<i32> {
    let mut values = vec![0; graph.num_faces() * 2];
    for f in 0..graph.num_faces() {
        let s = graph.face_sum(f);
        values[2 * f] = s.x;
        values[2 * f + 1] = s.y;
    }
    values
}

/// A jump component shared by two equations with opposite signs.
///
/// Adding `-sign` to the component moves one unit of residual from `from`
/// to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EquationArc {
    /// First equation.
    pub from: usize,
    /// Second equation.
    pub to: usize,
    /// Coefficient in `from`; `to` carries the negation.
    pub sign: i32,
    /// Edge of the component.
    pub edge: usize,
    /// Component index.
    pub comp: usize,
}

#[derive(Debug, Clone)]
struct FreeVariable {
    edge: usize,
    comp: usize,
    terms: Vec<(usize, i32)>,
}

/// Equation graph of one pyramid level.
#[derive(Debug, Clone)]
struct EquationNetwork {
    num_equations: usize,
    arcs: Vec<EquationArc>,
    free: Vec<FreeVariable>,
    component: Vec<usize>,
}

impl EquationNetwork {
    fn build(graph: &EdgeGraph) -> Self {
        let num_equations = graph.num_faces() * 2;
        let e2f = graph.edge_faces();
        let mut arcs = Vec::new();
        let mut free = Vec::new();
        for (e, incident) in e2f.iter().enumerate() {
            for comp in 0..2 {
                if !graph.allow_change[e][comp] {
                    continue;
                }
                let mut terms: BTreeMap<usize, i32> = BTreeMap::new();
                for &(f, k) in incident {
                    let (axis, sign) = coefficient(graph.fq[f][k], comp);
                    *terms.entry(2 * f + axis).or_insert(0) += sign;
                }
                let terms: Vec<(usize, i32)> = terms.into_iter().filter(|&(_, s)| s != 0).collect();
                let pair = match terms.as_slice() {
                    &[(a, sa), (b, sb)] if sa == -sb && sa.abs() == 1 => Some((a, b, sa)),
                    _ => None,
                };
                if let Some((from, to, sign)) = pair {
                    arcs.push(EquationArc {
                        from,
                        to,
                        sign,
                        edge: e,
                        comp,
                    });
                } else if !terms.is_empty() {
                    free.push(FreeVariable { edge: e, comp, terms });
                }
            }
        }

        let mut sets = DisjointSet::new(num_equations);
        for arc in &arcs {
            sets.union(arc.from, arc.to);
        }
        let component = (0..num_equations).map(|v| sets.find(v)).collect();
        Self {
            num_equations,
            arcs,
            free,
            component,
        }
    }

    /// Nudge free variables until every arc-connected set of equations sums
    /// to zero. Returns the number of unit changes.
    fn balance(&self, graph: &mut EdgeGraph) -> usize {
        let values = equation_values(graph);
        let mut totals: BTreeMap<usize, i64> = BTreeMap::new();
        for (v, &x) in values.iter().enumerate() {
            *totals.entry(self.component[v]).or_insert(0) += i64::from(x);
        }

        // Free variables that only touch one set, with their net effect on it.
        let mut candidates: BTreeMap<usize, Vec<(usize, i64)>> = BTreeMap::new();
        for (idx, var) in self.free.iter().enumerate() {
            let c = self.component[var.terms[0].0];
            if var.terms.iter().any(|&(v, _)| self.component[v] != c) {
                continue;
            }
            let gain: i64 = var.terms.iter().map(|&(_, s)| i64::from(s)).sum();
            if gain != 0 {
                candidates.entry(c).or_default().push((idx, gain));
            }
        }

        let mut nudges = 0;
        for (c, mut total) in totals {
            let Some(list) = candidates.get(&c) else {
                if total != 0 {
                    log::debug!("equation set {} is off by {} and has no free jumps", c, total);
                }
                continue;
            };
            while total != 0 {
                // Smallest resulting jump wins; ties by variable order.
                let best = list
                    .iter()
                    .filter(|&&(_, gain)| gain.abs() <= total.abs())
                    .map(|&(idx, gain)| {
                        let step = -(total.signum() * gain.signum()) as i32;
                        let var = &self.free[idx];
                        let value = graph.diff[var.edge][var.comp] + step;
                        (value.abs(), idx, gain, step)
                    })
                    .min();
                let Some((_, idx, gain, step)) = best else {
                    log::debug!("equation set {} stays off by {}", c, total);
                    break;
                };
                let var = &self.free[idx];
                graph.diff[var.edge][var.comp] += step;
                total += gain * i64::from(step);
                nudges += 1;
            }
        }
        nudges
    }

    /// Load the network with capacity bound `cap` on every jump component.
    fn fill(&self, solver: &mut dyn FlowSolver, graph: &EdgeGraph, values: &[i32], cap: i32) {
        let source = self.num_equations;
        let sink = source + 1;
        solver.resize(self.num_equations + 2, self.arcs.len() + self.num_equations);
        for arc in &self.arcs {
            let c = graph.diff[arc.edge][arc.comp];
            let (up, down) = ((c + cap).max(0), (cap - c).max(0));
            let (forward, reverse) = if arc.sign > 0 { (up, down) } else { (down, up) };
            if forward == 0 && reverse == 0 {
                continue;
            }
            let var = FlowVariable::new(arc.edge, arc.comp, -arc.sign);
            solver.add_edge(arc.from, arc.to, forward, reverse, Some(var), 1);
        }
        for (v, &x) in values.iter().enumerate() {
            if x > 0 {
                solver.add_edge(source, v, x, 0, None, 0);
            } else if x < 0 {
                solver.add_edge(v, sink, -x, 0, None, 0);
            }
        }
    }
}

/// Changeable jump components that link exactly two equations.
pub fn equation_arcs(graph: &EdgeGraph) -> Vec<EquationArc> {
    EquationNetwork::build(graph).arcs
}

/// Route the residuals of `graph` through the flow network. Returns `true`
/// on full flow within the capacity budget.
fn route_residuals(graph: &mut EdgeGraph, network: &EquationNetwork, level: usize, options: &IntegerOptions) -> bool {
    let values = equation_values(graph);
    let supply: i64 = values.iter().filter(|&&x| x > 0).map(|&x| i64::from(x)).sum();
    if supply == 0 {
        return true;
    }

    let backend = FlowBackend::select(level, supply, options.minimum_cost);
    let source = network.num_equations;
    let sink = source + 1;
    let mut cap = INITIAL_CAPACITY;
    for round in 0..options.max_capacity_rounds {
        let mut solver = backend.solver();
        network.fill(solver.as_mut(), graph, &values, cap);
        let flow = solver.compute(source, sink);
        if flow == supply {
            solver.apply_to(&mut graph.diff);
            log::debug!("integer level {}: full flow {} at capacity {} (round {})", level, flow, cap, round);
            return true;
        }
        cap += 1;
    }

    log::warn!(
        "integer level {}: no full flow within {} capacity rounds, retrying unbounded",
        level,
        options.max_capacity_rounds
    );
    let mut solver = backend.solver();
    network.fill(solver.as_mut(), graph, &values, UNBOUNDED_CAPACITY);
    let flow = solver.compute(source, sink);
    solver.apply_to(&mut graph.diff);
    if flow != supply {
        log::warn!("integer level {}: flow {} of {}", level, flow, supply);
    }
    false
}

/// Make every face of `graph` close up.
///
/// Returns `true` on full flow within the capacity budget. Whatever the flow
/// leaves open is closed afterwards by [`close_faces`], so the face equations
/// hold on return either way.
pub fn solve_level(graph: &mut EdgeGraph, level: usize, options: &IntegerOptions) -> bool {
    let network = EquationNetwork::build(graph);
    let nudges = network.balance(graph);
    log::debug!(
        "integer level {}: {} equations, {} arcs, {} free, {} nudges",
        level,
        network.num_equations,
        network.arcs.len(),
        network.free.len(),
        nudges
    );
    let full = route_residuals(graph, &network, level, options);
    let open = close_faces(graph);
    if open > 0 {
        log::warn!("integer level {}: {} faces left open", level, open);
    }
    full
}

fn count_inconsistent(graph: &EdgeGraph) -> usize {
    (0..graph.num_faces())
        .filter(|&f| graph.face_sum(f) != Vec2i::zeros())
        .count()
}

/// Solve the jump pyramid coarse-to-fine.
///
/// The coarsest level is repaired first; each finer level starts from the
/// prolonged coarse jumps and is repaired again.
pub fn optimize_integer_constraints(pyramid: &mut EdgePyramid, options: &IntegerOptions) -> IntegerReport {
    let start = Instant::now();
    let mut report = IntegerReport {
        inconsistent_before: pyramid.levels.first().map_or(0, count_inconsistent),
        full_flow: true,
        ..IntegerReport::default()
    };
    let depth = pyramid.depth();
    for l in (0..depth).rev() {
        if l + 1 < depth {
            pyramid.prolong(l);
        }
        report.full_flow &= solve_level(&mut pyramid.levels[l], l, options);
    }
    report.inconsistent_after = pyramid.levels.first().map_or(0, count_inconsistent);
    log::info!(
        "integer constraints: {} -> {} open faces over {} levels in {:.2?}",
        report.inconsistent_before,
        report.inconsistent_after,
        depth,
        start.elapsed()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Triangulated `n × n` grid with exact lattice jumps.
    fn lattice_grid(n: i32) -> EdgeGraph {
        let w = n + 1;
        let id = |x: i32, y: i32| (y * w + x) as usize;
        let pos = |v: usize| Vec2i::new(v as i32 % w, v as i32 / w);
        let mut faces = Vec::new();
        for y in 0..n {
            for x in 0..n {
                faces.push([id(x, y), id(x + 1, y), id(x + 1, y + 1)]);
                faces.push([id(x, y), id(x + 1, y + 1), id(x, y + 1)]);
            }
        }
        let mut lookup: HashMap<(usize, usize), usize> = HashMap::new();
        let mut diff = Vec::new();
        let mut f2e = Vec::new();
        let mut fq = Vec::new();
        for face in &faces {
            let mut sides = [0; 3];
            let mut turns = [0; 3];
            for k in 0..3 {
                let (a, b) = (face[k], face[(k + 1) % 3]);
                let key = (a.min(b), a.max(b));
                sides[k] = *lookup.entry(key).or_insert_with(|| {
                    diff.push(pos(key.1) - pos(key.0));
                    diff.len() - 1
                });
                turns[k] = if a < b { 0 } else { 2 };
            }
            f2e.push(sides);
            fq.push(turns);
        }
        EdgeGraph {
            allow_change: vec![[true; 2]; diff.len()],
            diff,
            f2e,
            fq,
        }
    }

    fn assert_closed(graph: &EdgeGraph) {
        for f in 0..graph.num_faces() {
            assert_eq!(graph.face_sum(f), Vec2i::zeros(), "face {}", f);
        }
    }

    #[test]
    fn test_coefficients_match_rotation() {
        use crate::algo::field_math::rshift90;
        for q in 0..4 {
            for comp in 0..2 {
                let mut d = Vec2i::zeros();
                d[comp] = 1;
                let r = rshift90(d, q);
                let (axis, sign) = coefficient(q, comp);
                assert_eq!(r[axis], sign);
                assert_eq!(r[1 - axis], 0);
            }
        }
    }

    #[test]
    fn test_lattice_grid_is_closed() {
        assert_closed(&lattice_grid(3));
    }

    #[test]
    fn test_interior_perturbation_repaired() {
        let mut g = lattice_grid(4);
        let e2f = g.edge_faces();
        let interior: Vec<usize> = (0..g.num_edges()).filter(|&e| e2f[e].len() == 2).collect();
        let original = g.diff.clone();
        g.diff[interior[3]] += Vec2i::new(1, 0);
        g.diff[interior[10]] += Vec2i::new(0, -2);
        assert!(solve_level(&mut g, 0, &IntegerOptions::default()));
        assert_closed(&g);
        // Unit costs: cheapest fix undoes the perturbation.
        let changed = (0..g.num_edges()).filter(|&e| g.diff[e] != original[e]).count();
        assert!(changed <= 2 * g.num_edges() / 3);
    }

    #[test]
    fn test_boundary_perturbation_balanced() {
        let mut g = lattice_grid(3);
        let e2f = g.edge_faces();
        let border = (0..g.num_edges()).find(|&e| e2f[e].len() == 1).unwrap();
        g.diff[border] += Vec2i::new(2, 1);
        for backend_min_cost in [false, true] {
            let mut h = g.clone();
            let options = IntegerOptions {
                minimum_cost: backend_min_cost,
                ..IntegerOptions::default()
            };
            solve_level(&mut h, 0, &options);
            assert_closed(&h);
        }
    }

    #[test]
    fn test_locked_components_are_untouched() {
        let mut g = lattice_grid(3);
        let e2f = g.edge_faces();
        let target = (0..g.num_edges()).find(|&e| e2f[e].len() == 2).unwrap();
        g.diff[target].x += 1;
        for e in 0..g.num_edges() {
            if e != target {
                g.allow_change[e][1] = false;
            }
        }
        let before: Vec<i32> = g.diff.iter().map(|d| d.y).collect();
        solve_level(&mut g, 0, &IntegerOptions::default());
        assert_closed(&g);
        for e in 0..g.num_edges() {
            if e != target {
                assert_eq!(g.diff[e].y, before[e]);
            }
        }
    }

    #[test]
    fn test_unbalanced_locked_set_still_closes() {
        let mut g = lattice_grid(3);
        let e2f = g.edge_faces();
        let border: Vec<usize> = (0..g.num_edges()).filter(|&e| e2f[e].len() == 1).collect();
        for &e in &border {
            g.allow_change[e] = [false, false];
        }
        // No free component can absorb this offset.
        g.diff[border[0]] += Vec2i::new(1, 0);
        solve_level(&mut g, 0, &IntegerOptions::default());
        assert_closed(&g);
    }

    #[test]
    fn test_pyramid_solve_closes_fine_level() {
        let mut g = lattice_grid(6);
        let e2f = g.edge_faces();
        let interior: Vec<usize> = (0..g.num_edges()).filter(|&e| e2f[e].len() == 2).collect();
        for (i, &e) in interior.iter().enumerate().step_by(7) {
            g.diff[e][i % 2] += if i % 3 == 0 { 1 } else { -1 };
        }
        let mut pyramid = EdgePyramid::build(g, 8);
        let report = optimize_integer_constraints(&mut pyramid, &IntegerOptions::default());
        assert!(report.inconsistent_before > 0);
        assert_eq!(report.inconsistent_after, 0);
        assert_closed(&pyramid.levels[0]);
    }
}
