//! Boykov-Kolmogorov max-flow.
//!
//! Two search trees grow from the source and the sink over residual arcs.
//! When they touch, the bottleneck is pushed along the joined path; nodes
//! whose parent arc saturates become orphans and are either re-attached to a
//! same-tree neighbour still rooted at the terminal or freed. Distances to the
//! terminal are cached per augmentation with time stamps so re-attachment
//! prefers short paths without rescanning them.
//!
//! # References
//!
//! - Boykov, Y., Kolmogorov, V. (2004). "An Experimental Comparison of
//!   Min-Cut/Max-Flow Algorithms for Energy Minimization in Vision." IEEE PAMI.

use std::collections::VecDeque;

use super::{FlowSolver, FlowVariable, ResidualGraph};
use crate::algo::field_math::Vec2i;

const NO_PARENT: usize = usize::MAX;
const TERMINAL: usize = usize::MAX - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tree {
    Free,
    Source,
    Sink,
}

/// Boykov-Kolmogorov max-flow over a [`ResidualGraph`].
#[derive(Debug, Clone, Default)]
pub struct BoykovKolmogorov {
    graph: ResidualGraph,
    tree: Vec<Tree>,
    /// Arc linking each node to its tree parent: parent→node in the source
    /// tree, node→parent in the sink tree.
    parent: Vec<usize>,
    active: VecDeque<usize>,
    is_active: Vec<bool>,
    orphans: VecDeque<usize>,
    stamp: Vec<u64>,
    dist: Vec<u32>,
    time: u64,
}

impl BoykovKolmogorov {
    /// Residual network after [`FlowSolver::compute`].
    pub fn graph(&self) -> &ResidualGraph {
        &self.graph
    }

    /// Whether `v` ended on the source side of the minimum cut.
    pub fn in_source_set(&self, v: usize) -> bool {
        self.tree.get(v) == Some(&Tree::Source)
    }

    fn activate(&mut self, v: usize) {
        if !self.is_active[v] {
            self.is_active[v] = true;
            self.active.push_back(v);
        }
    }

    /// Residual capacity usable by tree `t` on arc `a` leaving a member of `t`.
    #[inline]
    fn grow_cap(&self, t: Tree, a: usize) -> i32 {
        match t {
            Tree::Source => self.graph.cap[a],
            _ => self.graph.cap[a ^ 1],
        }
    }

    /// Grow the trees until they touch; returns the joining arc oriented
    /// from the source tree to the sink tree.
    fn grow(&mut self) -> Option<usize> {
        while let Some(&p) = self.active.front() {
            let t = self.tree[p];
            if t == Tree::Free {
                self.active.pop_front();
                self.is_active[p] = false;
                continue;
            }
            for i in 0..self.graph.adj[p].len() {
                let a = self.graph.adj[p][i];
                if self.grow_cap(t, a) <= 0 {
                    continue;
                }
                let q = self.graph.to[a];
                match self.tree[q] {
                    Tree::Free => {
                        self.tree[q] = t;
                        self.parent[q] = if t == Tree::Source { a } else { a ^ 1 };
                        self.stamp[q] = self.stamp[p];
                        self.dist[q] = self.dist[p] + 1;
                        self.activate(q);
                    }
                    other if other != t => {
                        return Some(if t == Tree::Source { a } else { a ^ 1 });
                    }
                    _ => {}
                }
            }
            self.active.pop_front();
            self.is_active[p] = false;
        }
        None
    }

    fn augment(&mut self, joint: usize) -> i32 {
        let g = &self.graph;
        let mut bottleneck = g.cap[joint];
        let mut v = g.from(joint);
        while self.parent[v] != TERMINAL {
            let a = self.parent[v];
            bottleneck = bottleneck.min(g.cap[a]);
            v = g.from(a);
        }
        let mut v = g.to[joint];
        while self.parent[v] != TERMINAL {
            let a = self.parent[v];
            bottleneck = bottleneck.min(g.cap[a]);
            v = g.to[a];
        }

        let g = &mut self.graph;
        g.cap[joint] -= bottleneck;
        g.cap[joint ^ 1] += bottleneck;
        let mut v = g.from(joint);
        while self.parent[v] != TERMINAL {
            let a = self.parent[v];
            g.cap[a] -= bottleneck;
            g.cap[a ^ 1] += bottleneck;
            let up = g.from(a);
            if g.cap[a] == 0 {
                self.parent[v] = NO_PARENT;
                self.orphans.push_back(v);
            }
            v = up;
        }
        let mut v = g.to[joint];
        while self.parent[v] != TERMINAL {
            let a = self.parent[v];
            g.cap[a] -= bottleneck;
            g.cap[a ^ 1] += bottleneck;
            let up = g.to[a];
            if g.cap[a] == 0 {
                self.parent[v] = NO_PARENT;
                self.orphans.push_back(v);
            }
            v = up;
        }
        bottleneck
    }

    /// Tree parent of `v` through its parent arc.
    #[inline]
    fn parent_node(&self, v: usize) -> usize {
        let a = self.parent[v];
        match self.tree[v] {
            Tree::Source => self.graph.from(a),
            _ => self.graph.to[a],
        }
    }

    /// Distance from `v` to its terminal, or `None` if the path is broken.
    fn origin_distance(&mut self, v: usize) -> Option<u32> {
        let mut d = 0u32;
        let mut j = v;
        loop {
            if self.stamp[j] == self.time {
                d += self.dist[j];
                break;
            }
            match self.parent[j] {
                NO_PARENT => return None,
                TERMINAL => {
                    self.stamp[j] = self.time;
                    self.dist[j] = 0;
                    break;
                }
                _ => {
                    d += 1;
                    j = self.parent_node(j);
                }
            }
        }
        // Cache distances along the walked path.
        let mut j = v;
        let mut dj = d;
        while self.stamp[j] != self.time {
            self.stamp[j] = self.time;
            self.dist[j] = dj;
            dj = dj.saturating_sub(1);
            j = self.parent_node(j);
        }
        Some(d)
    }

    fn adopt(&mut self) {
        while let Some(o) = self.orphans.pop_front() {
            let t = self.tree[o];
            let mut best: Option<(usize, u32)> = None;
            for i in 0..self.graph.adj[o].len() {
                let a = self.graph.adj[o][i];
                let p = self.graph.to[a];
                if self.tree[p] != t {
                    continue;
                }
                // Residual arc from the candidate parent towards the orphan
                // (source tree) or from the orphan to the parent (sink tree).
                let cap = if t == Tree::Source { self.graph.cap[a ^ 1] } else { self.graph.cap[a] };
                if cap <= 0 {
                    continue;
                }
                if let Some(d) = self.origin_distance(p) {
                    if best.map_or(true, |(_, bd)| d < bd) {
                        best = Some((a, d));
                    }
                }
            }

            if let Some((a, d)) = best {
                self.parent[o] = if t == Tree::Source { a ^ 1 } else { a };
                self.stamp[o] = self.time;
                self.dist[o] = d + 1;
                continue;
            }

            // No valid parent: free the orphan and re-examine its neighbours.
            for i in 0..self.graph.adj[o].len() {
                let a = self.graph.adj[o][i];
                let p = self.graph.to[a];
                if self.tree[p] != t {
                    continue;
                }
                let cap = if t == Tree::Source { self.graph.cap[a ^ 1] } else { self.graph.cap[a] };
                if cap > 0 {
                    self.activate(p);
                }
                let pa = self.parent[p];
                if pa != NO_PARENT && pa != TERMINAL && self.parent_node(p) == o {
                    self.parent[p] = NO_PARENT;
                    self.orphans.push_back(p);
                }
            }
            self.tree[o] = Tree::Free;
        }
    }
}

impl FlowSolver for BoykovKolmogorov {
    fn resize(&mut self, num_nodes: usize, num_edges: usize) {
        self.graph.resize(num_nodes, num_edges);
    }

    fn add_edge(&mut self, src: usize, dst: usize, cap: i32, rev_cap: i32, var: Option<FlowVariable>, cost: i32) {
        self.graph.add_edge(src, dst, cap, rev_cap, var, cost);
    }

    fn compute(&mut self, source: usize, sink: usize) -> i64 {
        let n = self.graph.num_nodes();
        self.tree = vec![Tree::Free; n];
        self.parent = vec![NO_PARENT; n];
        self.is_active = vec![false; n];
        self.stamp = vec![0; n];
        self.dist = vec![0; n];
        self.active.clear();
        self.orphans.clear();
        self.time = 0;
        if source == sink {
            return 0;
        }

        self.tree[source] = Tree::Source;
        self.tree[sink] = Tree::Sink;
        self.parent[source] = TERMINAL;
        self.parent[sink] = TERMINAL;
        self.activate(source);
        self.activate(sink);

        let mut total = 0i64;
        while let Some(joint) = self.grow() {
            self.time += 1;
            total += i64::from(self.augment(joint));
            self.adopt();
        }
        total
    }

    fn apply_to(&self, diff: &mut [Vec2i]) {
        let g = &self.graph;
        g.apply_flows((0..g.num_edges()).map(|k| (k, g.flow(k))), diff);
    }
}
