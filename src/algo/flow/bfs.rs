//! Shortest-augmenting-path max-flow (Edmonds-Karp).

use std::collections::VecDeque;

use super::{FlowSolver, FlowVariable, ResidualGraph};
use crate::algo::field_math::Vec2i;

const NONE: usize = usize::MAX;

/// Edmonds-Karp max-flow over a [`ResidualGraph`].
#[derive(Debug, Clone, Default)]
pub struct BfsMaxFlow {
    graph: ResidualGraph,
}

impl BfsMaxFlow {
    /// Residual network after [`FlowSolver::compute`].
    pub fn graph(&self) -> &ResidualGraph {
        &self.graph
    }
}

impl FlowSolver for BfsMaxFlow {
    fn resize(&mut self, num_nodes: usize, num_edges: usize) {
        self.graph.resize(num_nodes, num_edges);
    }

    fn add_edge(&mut self, src: usize, dst: usize, cap: i32, rev_cap: i32, var: Option<FlowVariable>, cost: i32) {
        self.graph.add_edge(src, dst, cap, rev_cap, var, cost);
    }

    fn compute(&mut self, source: usize, sink: usize) -> i64 {
        let g = &mut self.graph;
        let n = g.num_nodes();
        let mut total = 0i64;
        let mut pred = vec![NONE; n];
        let mut queue = VecDeque::new();

        loop {
            pred.iter_mut().for_each(|p| *p = NONE);
            queue.clear();
            queue.push_back(source);
            let mut reached = false;
            while let Some(u) = queue.pop_front() {
                for &a in &g.adj[u] {
                    let v = g.to[a];
                    if g.cap[a] > 0 && pred[v] == NONE && v != source {
                        pred[v] = a;
                        if v == sink {
                            reached = true;
                            break;
                        }
                        queue.push_back(v);
                    }
                }
                if reached {
                    break;
                }
            }
            if !reached {
                break;
            }

            let mut bottleneck = i32::MAX;
            let mut v = sink;
            while v != source {
                let a = pred[v];
                bottleneck = bottleneck.min(g.cap[a]);
                v = g.from(a);
            }
            let mut v = sink;
            while v != source {
                let a = pred[v];
                g.cap[a] -= bottleneck;
                g.cap[a ^ 1] += bottleneck;
                v = g.from(a);
            }
            total += i64::from(bottleneck);
        }
        total
    }

    fn apply_to(&self, diff: &mut [Vec2i]) {
        let g = &self.graph;
        g.apply_flows((0..g.num_edges()).map(|k| (k, g.flow(k))), diff);
    }
}
