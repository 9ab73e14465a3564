//! Disjoint trees with quarter-turn bookkeeping.
//!
//! [`DisjointOrientTree`] stores on every parent link the quarter turn that
//! maps the child's local frame into the parent's frame, so
//! [`DisjointOrientTree::orient`] yields the rotation into the root frame.

/// Union-find over elements carrying a 4-fold rotational frame.
#[derive(Debug, Clone)]
pub struct DisjointOrientTree {
    parent: Vec<(usize, u8)>,
    rank: Vec<u32>,
}

impl DisjointOrientTree {
    /// Create `n` singleton sets, each in its own frame.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).map(|i| (i, 0)).collect(),
            rank: vec![1; n],
        }
    }

    /// Root of `x`, compressing the path while composing rotations.
    pub fn parent(&mut self, x: usize) -> usize {
        let (p, _) = self.parent[x];
        if p == x {
            return x;
        }
        let root = self.parent(p);
        if root != p {
            let orient = (self.parent[x].1 + self.parent[p].1) % 4;
            self.parent[x] = (root, orient);
        }
        root
    }

    /// Quarter turns mapping `x`'s frame into its root's frame.
    pub fn orient(&mut self, x: usize) -> u8 {
        let root = self.parent(x);
        if root == x {
            0
        } else {
            self.parent[x].1
        }
    }

    /// Record that `a`'s frame turned by `orient_a` equals `b`'s frame turned by
    /// `orient_b`, merging the two sets.
    ///
    /// Returns `false` (and changes nothing) if `a` and `b` are already in the
    /// same set.
    pub fn merge(&mut self, a: usize, b: usize, orient_a: u8, orient_b: u8) -> bool {
        let (pa, pb) = (self.parent(a), self.parent(b));
        if pa == pb {
            return false;
        }
        // Rotation from each root frame to the shared frame.
        let oa = (orient_a as i32 - self.orient(a) as i32).rem_euclid(4);
        let ob = (orient_b as i32 - self.orient(b) as i32).rem_euclid(4);
        // root_child frame turned by (o_child - o_root) equals root frame.
        if self.rank[pa] < self.rank[pb] {
            self.parent[pa] = (pb, (oa - ob).rem_euclid(4) as u8);
            self.rank[pb] += self.rank[pa];
        } else {
            self.parent[pb] = (pa, (ob - oa).rem_euclid(4) as u8);
            self.rank[pa] += self.rank[pb];
        }
        true
    }

    /// Whether `a` turned by `orient_a` already agrees with `b` turned by
    /// `orient_b`. Only meaningful when both are in the same set.
    pub fn consistent(&mut self, a: usize, b: usize, orient_a: u8, orient_b: u8) -> bool {
        let lhs = (orient_a as i32 - self.orient(a) as i32).rem_euclid(4);
        let rhs = (orient_b as i32 - self.orient(b) as i32).rem_euclid(4);
        lhs == rhs
    }
}
