//! Union-find over dense index ranges.
//!
//! [`DisjointSet`] is the sequential structure used by the pipeline's
//! single-threaded passes. [`AtomicDisjointSet`] packs `(rank, parent)` into a
//! single `AtomicU64` so that unions can be issued from a rayon loop without
//! locks, and exposes an optimistic lock bit for pairing unions with other
//! per-root updates.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sequential union-find with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u32>,
}

impl DisjointSet {
    /// Create `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Representative of `x`'s set.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Merge the sets of `x` and `y`. Returns the surviving root.
    pub fn union(&mut self, x: usize, y: usize) -> usize {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return rx;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => {
                self.parent[rx] = ry;
                ry
            }
            std::cmp::Ordering::Greater => {
                self.parent[ry] = rx;
                rx
            }
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
                rx
            }
        }
    }

    /// Whether `x` and `y` are in the same set.
    pub fn same(&mut self, x: usize, y: usize) -> bool {
        self.find(x) == self.find(y)
    }

    /// Map every element to a dense id `0..k` of its set, returning the map and `k`.
    ///
    /// Ids are assigned in increasing order of the smallest member index.
    pub fn compact_ids(&mut self) -> (Vec<usize>, usize) {
        let n = self.parent.len();
        let mut root_id = vec![usize::MAX; n];
        let mut ids = vec![0; n];
        let mut count = 0;
        for i in 0..n {
            let r = self.find(i);
            if root_id[r] == usize::MAX {
                root_id[r] = count;
                count += 1;
            }
            ids[i] = root_id[r];
        }
        (ids, count)
    }
}

const PARENT_MASK: u64 = 0x7FFF_FFFF;
const LOCK_BIT: u64 = 0x8000_0000;

/// Lock-free union-find for concurrent unions.
///
/// Each word stores `rank << 32 | lock << 31 | parent`. Element count must fit
/// in 31 bits.
#[derive(Debug)]
pub struct AtomicDisjointSet {
    data: Vec<AtomicU64>,
}

impl AtomicDisjointSet {
    /// Create `n` singleton sets.
    pub fn new(n: usize) -> Self {
        assert!((n as u64) <= PARENT_MASK, "too many elements for AtomicDisjointSet");
        Self {
            data: (0..n as u64).map(AtomicU64::new).collect(),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn parent(&self, x: usize) -> usize {
        (self.data[x].load(Ordering::Acquire) & PARENT_MASK) as usize
    }

    #[inline]
    fn rank(&self, x: usize) -> u64 {
        self.data[x].load(Ordering::Acquire) >> 32
    }

    /// Representative of `x`'s set, halving the path on the way.
    pub fn find(&self, mut x: usize) -> usize {
        while x != self.parent(x) {
            let p = self.parent(x);
            let gp = self.parent(p);
            let old = self.data[x].load(Ordering::Acquire);
            if (old & PARENT_MASK) as usize == p {
                let new = (old & !PARENT_MASK) | gp as u64;
                let _ = self.data[x].compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed);
            }
            x = gp;
        }
        x
    }

    /// Whether `x` and `y` are in the same set.
    pub fn same(&self, mut x: usize, mut y: usize) -> bool {
        loop {
            x = self.find(x);
            y = self.find(y);
            if x == y {
                return true;
            }
            if self.parent(x) == x {
                return false;
            }
        }
    }

    /// Merge the sets of `x` and `y`. Returns the surviving root.
    pub fn union(&self, x: usize, y: usize) -> usize {
        loop {
            let mut rx = self.find(x);
            let mut ry = self.find(y);
            if rx == ry {
                return rx;
            }
            let (mut rank_x, mut rank_y) = (self.rank(rx), self.rank(ry));
            if rank_x > rank_y || (rank_x == rank_y && rx < ry) {
                std::mem::swap(&mut rx, &mut ry);
                std::mem::swap(&mut rank_x, &mut rank_y);
            }
            // Attach rx below ry.
            let old = (rank_x << 32) | rx as u64;
            let new = (rank_x << 32) | ry as u64;
            if self.data[rx]
                .compare_exchange(old, new, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }
            if rank_x == rank_y {
                // A lost race leaves the rank low; ranks only steer attachment.
                let old = (rank_y << 32) | ry as u64;
                let new = ((rank_y + 1) << 32) | ry as u64;
                let _ = self.data[ry].compare_exchange(old, new, Ordering::AcqRel, Ordering::Relaxed);
            }
            return ry;
        }
    }

    /// Try to set the lock bit on a root. Fails if `x` is not a root or is locked.
    fn try_lock(&self, x: usize) -> bool {
        let old = self.data[x].load(Ordering::Acquire);
        if (old & PARENT_MASK) as usize != x || old & LOCK_BIT != 0 {
            return false;
        }
        self.data[x]
            .compare_exchange(old, old | LOCK_BIT, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Clear the lock bit.
    fn unlock(&self, x: usize) {
        self.data[x].fetch_and(!LOCK_BIT, Ordering::AcqRel);
    }

    /// Merge two locked roots and release both locks. Returns the surviving root.
    fn unite_locked(&self, x: usize, y: usize) -> usize {
        debug_assert!(self.data[x].load(Ordering::Acquire) & LOCK_BIT != 0);
        debug_assert!(self.data[y].load(Ordering::Acquire) & LOCK_BIT != 0);
        let (rank_x, rank_y) = (self.rank(x), self.rank(y));
        let (child, root, rank_root, bump) = if rank_x < rank_y || (rank_x == rank_y && x > y) {
            (x, y, rank_y, rank_x == rank_y)
        } else {
            (y, x, rank_x, rank_x == rank_y)
        };
        let rank_child = self.rank(child);
        self.data[child].store((rank_child << 32) | root as u64, Ordering::Release);
        let rank_root = if bump { rank_root + 1 } else { rank_root };
        self.data[root].store((rank_root << 32) | root as u64, Ordering::Release);
        root
    }

    /// Merge the sets of `x` and `y` under locks on both roots, taken in id
    /// order. Returns the surviving root.
    pub fn union_locked(&self, x: usize, y: usize) -> usize {
        loop {
            let (rx, ry) = (self.find(x), self.find(y));
            if rx == ry {
                return rx;
            }
            let (lo, hi) = (rx.min(ry), rx.max(ry));
            if !self.try_lock(lo) {
                std::hint::spin_loop();
                continue;
            }
            if !self.try_lock(hi) {
                self.unlock(lo);
                std::hint::spin_loop();
                continue;
            }
            return self.unite_locked(lo, hi);
        }
    }

    /// Snapshot into dense ids like [`DisjointSet::compact_ids`].
    pub fn compact_ids(&self) -> (Vec<usize>, usize) {
        let n = self.data.len();
        let mut root_id = vec![usize::MAX; n];
        let mut ids = vec![0; n];
        let mut count = 0;
        for i in 0..n {
            let r = self.find(i);
            if root_id[r] == usize::MAX {
                root_id[r] = count;
                count += 1;
            }
            ids[i] = root_id[r];
        }
        (ids, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rayon::prelude::*;

    #[test]
    fn test_union_find_basic() {
        let mut ds = DisjointSet::new(6);
        ds.union(0, 1);
        ds.union(2, 3);
        ds.union(1, 3);
        assert!(ds.same(0, 2));
        assert!(!ds.same(0, 4));
        for x in 0..6 {
            let r = ds.find(x);
            assert_eq!(ds.find(r), r);
        }
    }

    #[test]
    fn test_union_find_matches_connectivity() {
        let n = 60;
        let mut rng = StdRng::seed_from_u64(7);
        let mut ds = DisjointSet::new(n);
        let mut label: Vec<usize> = (0..n).collect();
        for _ in 0..40 {
            let a = rng.gen_range(0..n);
            let b = rng.gen_range(0..n);
            ds.union(a, b);
            let (la, lb) = (label[a], label[b]);
            for l in label.iter_mut() {
                if *l == lb {
                    *l = la;
                }
            }
        }
        for x in 0..n {
            for y in 0..n {
                assert_eq!(ds.same(x, y), label[x] == label[y]);
            }
        }
    }

    #[test]
    fn test_compact_ids_dense() {
        let mut ds = DisjointSet::new(5);
        ds.union(3, 4);
        ds.union(0, 2);
        let (ids, count) = ds.compact_ids();
        assert_eq!(count, 3);
        assert_eq!(ids, vec![0, 1, 0, 2, 2]);
    }

    #[test]
    fn test_atomic_parallel_unions() {
        let n = 1000;
        let ds = AtomicDisjointSet::new(n);
        (0..n - 1).into_par_iter().filter(|i| i % 10 != 9).for_each(|i| {
            ds.union(i, i + 1);
        });
        assert!(ds.same(0, 9));
        assert!(!ds.same(9, 10));
        let (_, count) = ds.compact_ids();
        assert_eq!(count, 100);
    }

    #[test]
    fn test_atomic_parallel_locked_unions() {
        let n = 1000;
        let ds = AtomicDisjointSet::new(n);
        let mut rng = StdRng::seed_from_u64(3);
        let pairs: Vec<(usize, usize)> = (0..4000)
            .map(|_| {
                let a = rng.gen_range(0..n);
                let b = rng.gen_range(0..n);
                // Stay within blocks of 50.
                (a, a - a % 50 + b % 50)
            })
            .collect();
        pairs.par_iter().for_each(|&(a, b)| {
            ds.union_locked(a, b);
        });
        let mut serial = DisjointSet::new(n);
        for &(a, b) in &pairs {
            serial.union(a, b);
        }
        for i in 0..n {
            for j in [i / 50 * 50, (i + 1) % n] {
                assert_eq!(ds.same(i, j), serial.find(i) == serial.find(j));
            }
        }
        // Every lock was released.
        for i in 0..n {
            let r = ds.find(i);
            assert!(ds.try_lock(r));
            ds.unlock(r);
        }
    }

    #[test]
    fn test_atomic_lock_unite() {
        let ds = AtomicDisjointSet::new(4);
        assert!(ds.try_lock(1));
        assert!(!ds.try_lock(1));
        assert!(ds.try_lock(2));
        let root = ds.unite_locked(1, 2);
        assert!(ds.same(1, 2));
        assert!(ds.try_lock(root));
        ds.unlock(root);
    }
}
