//! Minimum-cost maximum flow.
//!
//! The flow value is found first with a FIFO push-relabel preflow. A primal
//! network simplex then routes exactly that value from source to sink at
//! minimum cost. The initial basis hangs every node from an artificial root
//! with big-M arcs oriented so the tree is strongly feasible; entering arcs
//! are picked by block search and the leaving arc is the last blocking arc of
//! the cycle counted from its apex.

use std::collections::VecDeque;

use super::{FlowSolver, FlowVariable, ResidualGraph};
use crate::algo::field_math::Vec2i;

const NONE: usize = usize::MAX;

/// FIFO push-relabel max-flow on a copy of the residual network.
pub fn push_relabel_max_flow(graph: &ResidualGraph, source: usize, sink: usize) -> i64 {
    let n = graph.num_nodes();
    if source == sink || n == 0 {
        return 0;
    }
    let mut cap = graph.cap.clone();
    let mut height = vec![0usize; n];
    let mut excess = vec![0i64; n];
    let mut current = vec![0usize; n];
    let mut queue = VecDeque::new();
    let mut queued = vec![false; n];

    height[source] = n;
    for &a in &graph.adj[source] {
        let c = cap[a];
        if c > 0 {
            let v = graph.to[a];
            cap[a] -= c;
            cap[a ^ 1] += c;
            excess[v] += i64::from(c);
            excess[source] -= i64::from(c);
            if v != sink && !queued[v] {
                queued[v] = true;
                queue.push_back(v);
            }
        }
    }

    while let Some(u) = queue.pop_front() {
        queued[u] = false;
        while excess[u] > 0 {
            if current[u] == graph.adj[u].len() {
                // Relabel to one above the lowest admissible neighbour.
                let mut min_h = usize::MAX;
                for &a in &graph.adj[u] {
                    if cap[a] > 0 {
                        min_h = min_h.min(height[graph.to[a]]);
                    }
                }
                if min_h == usize::MAX || min_h >= 2 * n {
                    break;
                }
                height[u] = min_h + 1;
                current[u] = 0;
                continue;
            }
            let a = graph.adj[u][current[u]];
            let v = graph.to[a];
            if cap[a] > 0 && height[u] == height[v] + 1 {
                let push = excess[u].min(i64::from(cap[a]));
                let push32 = push as i32;
                cap[a] -= push32;
                cap[a ^ 1] += push32;
                excess[u] -= push;
                excess[v] += push;
                if v != source && v != sink && !queued[v] {
                    queued[v] = true;
                    queue.push_back(v);
                }
            } else {
                current[u] += 1;
            }
        }
    }
    excess[sink]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArcState {
    Tree,
    Lower,
    Upper,
}

/// Network simplex min-cost flow with a push-relabel max-flow value.
#[derive(Debug, Clone, Default)]
pub struct NetworkSimplex {
    graph: ResidualGraph,
    /// Net flow of each added edge after [`FlowSolver::compute`].
    flows: Vec<i32>,
    /// Total cost of the computed flow.
    cost: i64,
}

impl NetworkSimplex {
    /// Cost of the last computed flow.
    pub fn total_cost(&self) -> i64 {
        self.cost
    }

    /// Net flow of each added edge.
    pub fn flows(&self) -> &[i32] {
        &self.flows
    }
}

/// Working state of one simplex solve.
struct Simplex {
    from: Vec<usize>,
    to: Vec<usize>,
    cap: Vec<i64>,
    cost: Vec<i64>,
    flow: Vec<i64>,
    state: Vec<ArcState>,
    parent: Vec<usize>,
    pred: Vec<usize>,
    children: Vec<Vec<usize>>,
    depth: Vec<usize>,
    pi: Vec<i64>,
    next_arc: usize,
}

impl Simplex {
    fn new(n: usize, arcs: &[(usize, usize, i64, i64)], supply: &[i64]) -> Self {
        let root = n;
        let total_cost: i64 = arcs.iter().map(|a| a.3.abs()).sum();
        let big_m = total_cost + 1;
        let total_supply: i64 = supply.iter().map(|s| s.abs()).sum();
        let inf = total_supply + arcs.iter().map(|a| a.2).sum::<i64>() + 1;

        let m = arcs.len();
        let mut s = Self {
            from: arcs.iter().map(|a| a.0).collect(),
            to: arcs.iter().map(|a| a.1).collect(),
            cap: arcs.iter().map(|a| a.2).collect(),
            cost: arcs.iter().map(|a| a.3).collect(),
            flow: vec![0; m],
            state: vec![ArcState::Lower; m],
            parent: vec![NONE; n + 1],
            pred: vec![NONE; n + 1],
            children: vec![Vec::new(); n + 1],
            depth: vec![0; n + 1],
            pi: vec![0; n + 1],
            next_arc: 0,
        };
        for v in 0..n {
            let j = s.from.len();
            if supply[v] >= 0 {
                s.from.push(v);
                s.to.push(root);
                s.flow.push(supply[v]);
                s.pi[v] = -big_m;
            } else {
                s.from.push(root);
                s.to.push(v);
                s.flow.push(-supply[v]);
                s.pi[v] = big_m;
            }
            s.cap.push(inf);
            s.cost.push(big_m);
            s.state.push(ArcState::Tree);
            s.parent[v] = root;
            s.pred[v] = j;
            s.depth[v] = 1;
            s.children[root].push(v);
        }
        s
    }

    #[inline]
    fn reduced_cost(&self, j: usize) -> i64 {
        self.cost[j] + self.pi[self.from[j]] - self.pi[self.to[j]]
    }

    #[inline]
    fn violation(&self, j: usize) -> i64 {
        match self.state[j] {
            ArcState::Lower => self.reduced_cost(j),
            ArcState::Upper => -self.reduced_cost(j),
            ArcState::Tree => 0,
        }
    }

    /// Block search for the most violating non-tree arc.
    fn find_entering(&mut self) -> Option<usize> {
        let m = self.from.len();
        let block = ((m as f64).sqrt().ceil() as usize).max(10);
        let mut best = None;
        let mut best_v = 0;
        let mut scanned = 0;
        let mut j = self.next_arc;
        while scanned < m {
            let v = self.violation(j);
            if v < best_v {
                best_v = v;
                best = Some(j);
            }
            scanned += 1;
            j = (j + 1) % m;
            if scanned % block == 0 && best.is_some() {
                break;
            }
        }
        self.next_arc = j;
        best
    }

    /// Residual capacity of tree arc `pred[v]` when moving from `v` to its
    /// parent (`up == true`) or from the parent to `v`.
    fn tree_residual(&self, v: usize, up: bool) -> i64 {
        let j = self.pred[v];
        let forward = (self.from[j] == v) == up;
        if forward {
            self.cap[j] - self.flow[j]
        } else {
            self.flow[j]
        }
    }

    fn push_tree(&mut self, v: usize, up: bool, delta: i64) {
        let j = self.pred[v];
        if (self.from[j] == v) == up {
            self.flow[j] += delta;
        } else {
            self.flow[j] -= delta;
        }
    }

    fn pivot(&mut self, entering: usize) {
        let (first, second) = match self.state[entering] {
            ArcState::Lower => (self.from[entering], self.to[entering]),
            _ => (self.to[entering], self.from[entering]),
        };
        let entering_res = match self.state[entering] {
            ArcState::Lower => self.cap[entering] - self.flow[entering],
            _ => self.flow[entering],
        };

        // Apex of the cycle.
        let (mut a, mut b) = (first, second);
        while a != b {
            if self.depth[a] > self.depth[b] {
                a = self.parent[a];
            } else if self.depth[b] > self.depth[a] {
                b = self.parent[b];
            } else {
                a = self.parent[a];
                b = self.parent[b];
            }
        }
        let apex = a;

        // Cycle order from the apex: down to `first`, the entering arc, then
        // up from `second`. Keep the last minimum.
        let mut down = Vec::new();
        let mut v = first;
        while v != apex {
            down.push(v);
            v = self.parent[v];
        }
        down.reverse();

        let mut delta = i64::MAX;
        // (node whose pred arc leaves, lies on first's side)
        let mut leaving: Option<(usize, bool)> = None;
        for &v in &down {
            let r = self.tree_residual(v, false);
            if r <= delta {
                delta = r;
                leaving = Some((v, true));
            }
        }
        if entering_res <= delta {
            delta = entering_res;
            leaving = None;
        }
        let mut v = second;
        while v != apex {
            let r = self.tree_residual(v, true);
            if r <= delta {
                delta = r;
                leaving = Some((v, false));
            }
            v = self.parent[v];
        }

        // Push delta around the cycle.
        if delta > 0 {
            match self.state[entering] {
                ArcState::Lower => self.flow[entering] += delta,
                _ => self.flow[entering] -= delta,
            }
            for &v in &down {
                self.push_tree(v, false, delta);
            }
            let mut v = second;
            while v != apex {
                self.push_tree(v, true, delta);
                v = self.parent[v];
            }
        }

        let Some((w, first_side)) = leaving else {
            self.state[entering] = match self.state[entering] {
                ArcState::Lower => ArcState::Upper,
                _ => ArcState::Lower,
            };
            return;
        };

        // Remove the leaving arc (w, parent[w]); re-hang w's subtree at the
        // entering arc's endpoint inside it.
        let leaving_arc = self.pred[w];
        self.state[leaving_arc] = if self.flow[leaving_arc] == 0 {
            ArcState::Lower
        } else {
            ArcState::Upper
        };
        let (inside, outside) = if first_side { (first, second) } else { (second, first) };

        let old_parent = self.parent[w];
        self.children[old_parent].retain(|&c| c != w);

        // Reverse the path inside -> w.
        let mut path = vec![inside];
        let mut v = inside;
        while v != w {
            v = self.parent[v];
            path.push(v);
        }
        for i in (1..path.len()).rev() {
            let (child, up) = (path[i - 1], path[i]);
            let arc = self.pred[child];
            self.children[up].retain(|&c| c != child);
            self.children[child].push(up);
            self.parent[up] = child;
            self.pred[up] = arc;
        }
        self.parent[inside] = outside;
        self.pred[inside] = entering;
        self.children[outside].push(inside);
        self.state[entering] = ArcState::Tree;

        // Refresh depth and potentials of the moved subtree.
        let mut stack = vec![inside];
        while let Some(u) = stack.pop() {
            let p = self.parent[u];
            let j = self.pred[u];
            self.depth[u] = self.depth[p] + 1;
            self.pi[u] = if self.from[j] == p {
                self.pi[p] + self.cost[j]
            } else {
                self.pi[p] - self.cost[j]
            };
            stack.extend(self.children[u].iter().copied());
        }
    }

    fn solve(&mut self, max_pivots: usize) -> bool {
        for _ in 0..max_pivots {
            match self.find_entering() {
                Some(j) => self.pivot(j),
                None => return true,
            }
        }
        false
    }
}

impl FlowSolver for NetworkSimplex {
    fn resize(&mut self, num_nodes: usize, num_edges: usize) {
        self.graph.resize(num_nodes, num_edges);
        self.flows.clear();
        self.cost = 0;
    }

    fn add_edge(&mut self, src: usize, dst: usize, cap: i32, rev_cap: i32, var: Option<FlowVariable>, cost: i32) {
        self.graph.add_edge(src, dst, cap, rev_cap, var, cost);
    }

    fn compute(&mut self, source: usize, sink: usize) -> i64 {
        let g = &self.graph;
        let n = g.num_nodes();
        let value = push_relabel_max_flow(g, source, sink);
        self.flows = vec![0; g.num_edges()];
        self.cost = 0;
        if value == 0 {
            return 0;
        }

        // Each added edge becomes up to two simplex arcs.
        let mut arcs = Vec::with_capacity(g.num_edges() * 2);
        let mut owner = Vec::with_capacity(g.num_edges() * 2);
        for k in 0..g.num_edges() {
            let (src, dst) = (g.to[2 * k + 1], g.to[2 * k]);
            let c = i64::from(g.cost[k]);
            if g.initial[k] > 0 {
                arcs.push((src, dst, i64::from(g.initial[k]), c));
                owner.push((k, 1));
            }
            let rev = g.cap[2 * k + 1];
            if rev > 0 {
                arcs.push((dst, src, i64::from(rev), c));
                owner.push((k, -1));
            }
        }
        let mut supply = vec![0i64; n];
        supply[source] = value;
        supply[sink] = -value;

        let mut simplex = Simplex::new(n, &arcs, &supply);
        let max_pivots = 100 * (arcs.len() + n) + 1000;
        if !simplex.solve(max_pivots) {
            log::warn!("network simplex stopped after {} pivots", max_pivots);
        }
        let artificial: i64 = simplex.flow[arcs.len()..].iter().sum();
        if artificial != 0 {
            log::warn!("network simplex left {} units on artificial arcs", artificial);
        }

        for (j, &(k, sign)) in owner.iter().enumerate() {
            let f = simplex.flow[j];
            self.flows[k] += (sign * f) as i32;
            self.cost += f * arcs[j].3;
        }
        value
    }

    fn apply_to(&self, diff: &mut [Vec2i]) {
        self.graph
            .apply_flows(self.flows.iter().copied().enumerate(), diff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::flow::tests::{diamond, layered};

    #[test]
    fn test_push_relabel_diamond() {
        let mut g = ResidualGraph::default();
        g.resize(4, 4);
        g.add_edge(0, 1, 3, 0, None, 1);
        g.add_edge(0, 2, 2, 0, None, 1);
        g.add_edge(1, 3, 2, 0, None, 1);
        g.add_edge(2, 3, 3, 0, None, 1);
        assert_eq!(push_relabel_max_flow(&g, 0, 3), 4);
    }

    #[test]
    fn test_simplex_diamond_and_layered() {
        let mut solver = NetworkSimplex::default();
        assert_eq!(diamond(&mut solver), 4);
        // Every unit crosses two unit-cost arcs.
        assert_eq!(solver.total_cost(), 8);
        let mut solver = NetworkSimplex::default();
        assert_eq!(layered(&mut solver), 7);
    }

    #[test]
    fn test_simplex_prefers_cheap_path() {
        // Two parallel routes of capacity 2; only 2 units are available.
        let mut solver = NetworkSimplex::default();
        solver.resize(4, 5);
        solver.add_edge(0, 1, 2, 0, None, 0);
        solver.add_edge(1, 2, 2, 0, None, 5);
        solver.add_edge(2, 3, 2, 0, None, 0);
        solver.add_edge(1, 3, 2, 0, None, 1);
        solver.add_edge(0, 2, 0, 0, None, 0);
        assert_eq!(solver.compute(0, 3), 2);
        assert_eq!(solver.total_cost(), 2);
        assert_eq!(solver.flows()[3], 2);
        assert_eq!(solver.flows()[1], 0);
    }

    #[test]
    fn test_flow_conservation() {
        let mut solver = NetworkSimplex::default();
        layered(&mut solver);
        let g = &solver.graph;
        let mut balance = vec![0i32; g.num_nodes()];
        for (k, &f) in solver.flows().iter().enumerate() {
            balance[g.to[2 * k + 1]] -= f;
            balance[g.to[2 * k]] += f;
        }
        assert_eq!(balance[0], -7);
        assert_eq!(balance[5], 7);
        assert!(balance[1..5].iter().all(|&b| b == 0));
        for (k, &f) in solver.flows().iter().enumerate() {
            assert!(f <= g.initial[k]);
            assert!(-f <= g.cap[2 * k + 1]);
        }
    }
}
