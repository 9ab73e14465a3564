//! Max-flow backends for the integer constraint solver.
//!
//! All backends implement [`FlowSolver`]: the caller sizes the network, adds
//! bidirectional arcs (optionally tagged with the jump component they stand
//! for), computes the flow and scatters it back into the jumps. Which backend
//! runs is decided by [`FlowBackend::select`].
//!
//! # Example
//!
//! ```
//! use quadriflow::algo::flow::{FlowBackend, FlowSolver};
//!
//! // Diamond: s -> a, s -> b, a -> t, b -> t.
//! let mut solver = FlowBackend::BoykovKolmogorov.solver();
//! solver.resize(4, 4);
//! solver.add_edge(0, 1, 3, 0, None, 1);
//! solver.add_edge(0, 2, 2, 0, None, 1);
//! solver.add_edge(1, 3, 2, 0, None, 1);
//! solver.add_edge(2, 3, 3, 0, None, 1);
//! assert_eq!(solver.compute(0, 3), 4);
//! ```

mod bfs;
mod boykov;
mod simplex;

pub use bfs::BfsMaxFlow;
pub use boykov::BoykovKolmogorov;
pub use simplex::NetworkSimplex;

use crate::algo::field_math::Vec2i;

/// Networks with a total supply below this use the BFS backend.
pub const SMALL_SUPPLY: i64 = 20;

/// A jump component an arc stands for.
///
/// One unit of flow along the arc changes `diff[edge][component]` by `sign`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowVariable {
    /// Edge index.
    pub edge: usize,
    /// Component (0 or 1).
    pub component: usize,
    /// Change of the component per unit of forward flow.
    pub sign: i32,
}

impl FlowVariable {
    /// Create a variable tag.
    pub fn new(edge: usize, component: usize, sign: i32) -> Self {
        Self { edge, component, sign }
    }
}

/// Common contract of the max-flow backends.
pub trait FlowSolver: Send {
    /// Reset to an empty network with `num_nodes` nodes, reserving room for
    /// `num_edges` arcs.
    fn resize(&mut self, num_nodes: usize, num_edges: usize);

    /// Add an arc with capacity `cap` from `src` to `dst` and `rev_cap` back.
    fn add_edge(&mut self, src: usize, dst: usize, cap: i32, rev_cap: i32, var: Option<FlowVariable>, cost: i32);

    /// Compute a maximum flow and return its value.
    fn compute(&mut self, source: usize, sink: usize) -> i64;

    /// Add the realized flow of every tagged arc to its jump component.
    fn apply_to(&self, diff: &mut [Vec2i]);
}

/// Available backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowBackend {
    /// Search-tree max-flow; the default for large networks.
    BoykovKolmogorov,
    /// Shortest augmenting paths; for small networks.
    Bfs,
    /// Minimum-cost maximum flow.
    NetworkSimplex,
}

impl FlowBackend {
    /// Pick the backend for a pyramid level (0 is the finest) and supply.
    pub fn select(level: usize, supply: i64, minimum_cost: bool) -> Self {
        if minimum_cost && level == 0 {
            FlowBackend::NetworkSimplex
        } else if supply < SMALL_SUPPLY {
            FlowBackend::Bfs
        } else {
            FlowBackend::BoykovKolmogorov
        }
    }

    /// A fresh solver of this kind.
    pub fn solver(self) -> Box<dyn FlowSolver> {
        match self {
            FlowBackend::BoykovKolmogorov => Box::new(BoykovKolmogorov::default()),
            FlowBackend::Bfs => Box::new(BfsMaxFlow::default()),
            FlowBackend::NetworkSimplex => Box::new(NetworkSimplex::default()),
        }
    }
}

/// Residual network stored as arc pairs: arc `2k` is the forward arc of the
/// `k`-th added edge and `2k + 1` its reverse, so `rev(a) == a ^ 1`.
#[derive(Debug, Clone, Default)]
pub struct ResidualGraph {
    /// Head node of each arc.
    pub to: Vec<usize>,
    /// Residual capacity of each arc.
    pub cap: Vec<i32>,
    /// Capacity each forward arc was added with.
    pub initial: Vec<i32>,
    /// Outgoing arcs of each node.
    pub adj: Vec<Vec<usize>>,
    /// Cost per unit of flow of each added edge.
    pub cost: Vec<i32>,
    /// Variable tag of each added edge.
    pub vars: Vec<Option<FlowVariable>>,
}

impl ResidualGraph {
    /// Reset to `num_nodes` isolated nodes.
    pub fn resize(&mut self, num_nodes: usize, num_edges: usize) {
        self.to.clear();
        self.cap.clear();
        self.initial.clear();
        self.cost.clear();
        self.vars.clear();
        self.to.reserve(num_edges * 2);
        self.cap.reserve(num_edges * 2);
        self.adj = vec![Vec::new(); num_nodes];
    }

    /// Add an edge pair.
    pub fn add_edge(&mut self, src: usize, dst: usize, cap: i32, rev_cap: i32, var: Option<FlowVariable>, cost: i32) {
        let a = self.to.len();
        self.to.push(dst);
        self.cap.push(cap);
        self.to.push(src);
        self.cap.push(rev_cap);
        self.adj[src].push(a);
        self.adj[dst].push(a + 1);
        self.initial.push(cap);
        self.cost.push(cost);
        self.vars.push(var);
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.adj.len()
    }

    /// Number of added edges.
    pub fn num_edges(&self) -> usize {
        self.initial.len()
    }

    /// Tail node of an arc.
    #[inline]
    pub fn from(&self, a: usize) -> usize {
        self.to[a ^ 1]
    }

    /// Net flow from `src` to `dst` on added edge `k`.
    #[inline]
    pub fn flow(&self, k: usize) -> i32 {
        self.initial[k] - self.cap[2 * k]
    }

    /// Scatter edge flows into jump components.
    pub fn apply_flows(&self, flows: impl Iterator<Item = (usize, i32)>, diff: &mut [Vec2i]) {
        for (k, f) in flows {
            if f == 0 {
                continue;
            }
            if let Some(var) = self.vars[k] {
                diff[var.edge][var.component] += var.sign * f;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(super) fn diamond(solver: &mut dyn FlowSolver) -> i64 {
        solver.resize(4, 4);
        solver.add_edge(0, 1, 3, 0, None, 1);
        solver.add_edge(0, 2, 2, 0, None, 1);
        solver.add_edge(1, 3, 2, 0, None, 1);
        solver.add_edge(2, 3, 3, 0, None, 1);
        solver.compute(0, 3)
    }

    /// A layered network with bidirectional middle arcs; max flow 7.
    pub(super) fn layered(solver: &mut dyn FlowSolver) -> i64 {
        solver.resize(6, 9);
        solver.add_edge(0, 1, 4, 0, None, 1);
        solver.add_edge(0, 2, 5, 0, None, 1);
        solver.add_edge(1, 2, 2, 2, None, 1);
        solver.add_edge(1, 3, 3, 0, None, 1);
        solver.add_edge(2, 4, 3, 0, None, 1);
        solver.add_edge(3, 4, 1, 1, None, 1);
        solver.add_edge(3, 5, 4, 0, None, 1);
        solver.add_edge(4, 5, 4, 0, None, 1);
        solver.add_edge(2, 3, 1, 0, None, 1);
        solver.compute(0, 5)
    }

    #[test]
    fn test_backends_agree_on_diamond() {
        for backend in [FlowBackend::BoykovKolmogorov, FlowBackend::Bfs, FlowBackend::NetworkSimplex] {
            let mut solver = backend.solver();
            assert_eq!(diamond(solver.as_mut()), 4, "{:?}", backend);
        }
    }

    #[test]
    fn test_backends_agree_on_layered() {
        for backend in [FlowBackend::BoykovKolmogorov, FlowBackend::Bfs, FlowBackend::NetworkSimplex] {
            let mut solver = backend.solver();
            assert_eq!(layered(solver.as_mut()), 7, "{:?}", backend);
        }
    }

    #[test]
    fn test_apply_to_scatters_flow() {
        for backend in [FlowBackend::BoykovKolmogorov, FlowBackend::Bfs, FlowBackend::NetworkSimplex] {
            let mut solver = backend.solver();
            solver.resize(3, 2);
            solver.add_edge(0, 1, 2, 0, None, 0);
            solver.add_edge(1, 2, 5, 5, Some(FlowVariable::new(0, 1, -1)), 1);
            assert_eq!(solver.compute(0, 2), 2);
            let mut diff = vec![Vec2i::new(1, 1)];
            solver.apply_to(&mut diff);
            assert_eq!(diff[0], Vec2i::new(1, -1), "{:?}", backend);
        }
    }

    #[test]
    fn test_select_policy() {
        assert_eq!(FlowBackend::select(0, 100, true), FlowBackend::NetworkSimplex);
        assert_eq!(FlowBackend::select(1, 100, true), FlowBackend::BoykovKolmogorov);
        assert_eq!(FlowBackend::select(0, 5, false), FlowBackend::Bfs);
        assert_eq!(FlowBackend::select(0, 20, false), FlowBackend::BoykovKolmogorov);
    }
}
