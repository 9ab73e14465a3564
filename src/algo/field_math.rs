//! Vector helpers for 4-RoSy orientation fields and 4-PoSy position fields.
//!
//! A cross field stores one tangent direction `q` per vertex; the four
//! directions `q, n×q, -q, -n×q` are equivalent. A position field stores one
//! lattice anchor `o` per vertex; the lattice spanned by `q·sx` and `(n×q)·sy`
//! around `o` is equivalent under integer translations. The functions here pick
//! the representatives that agree best between two neighbouring vertices.

use nalgebra::{Vector2, Vector3};

/// Guard against division by values that would overflow the reciprocal.
pub const RCPOVERFLOW: f64 = 2.93873587705571876e-39;

/// Integer 2-vector used for lattice jumps.
pub type Vec2i = Vector2<i32>;

/// Rotate an integer lattice vector by `amount` quarter turns.
#[inline]
pub fn rshift90(v: Vec2i, amount: i32) -> Vec2i {
    let amount = amount.rem_euclid(4);
    let v = if amount & 1 == 1 { Vec2i::new(-v.y, v.x) } else { v };
    if amount >= 2 {
        -v
    } else {
        v
    }
}

/// Rotate a tangent direction by `amount` quarter turns about `n`.
#[inline]
pub fn rotate90_by(q: &Vector3<f64>, n: &Vector3<f64>, amount: i32) -> Vector3<f64> {
    let amount = amount.rem_euclid(4);
    let r = if amount & 1 == 1 { n.cross(q) } else { *q };
    if amount < 2 {
        r
    } else {
        -r
    }
}

/// Any unit vector orthogonal to `n`, with its completion to a frame.
pub fn coordinate_system(n: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let s = if n.x.abs() > n.y.abs() {
        let inv = 1.0 / (n.x * n.x + n.z * n.z).sqrt();
        Vector3::new(n.z * inv, 0.0, -n.x * inv)
    } else {
        let inv = 1.0 / (n.y * n.y + n.z * n.z).sqrt();
        Vector3::new(0.0, n.z * inv, -n.y * inv)
    };
    let t = n.cross(&s);
    (s, t)
}

/// Remove the normal component of `v` and renormalize.
#[inline]
pub fn tangential(v: &Vector3<f64>, n: &Vector3<f64>) -> Vector3<f64> {
    let t = v - n * n.dot(v);
    let norm = t.norm();
    if norm > RCPOVERFLOW {
        t / norm
    } else {
        t
    }
}

/// Representatives of `q0` and `q1` (up to quarter turns) that agree best.
pub fn compat_orientation_extrinsic_4(
    q0: &Vector3<f64>,
    n0: &Vector3<f64>,
    q1: &Vector3<f64>,
    n1: &Vector3<f64>,
) -> (Vector3<f64>, Vector3<f64>) {
    let a = [*q0, n0.cross(q0)];
    let b = [*q1, n1.cross(q1)];

    let mut best_score = f64::NEG_INFINITY;
    let (mut best_a, mut best_b) = (0, 0);
    for (i, ai) in a.iter().enumerate() {
        for (j, bj) in b.iter().enumerate() {
            let score = ai.dot(bj).abs();
            if score > best_score {
                best_score = score;
                best_a = i;
                best_b = j;
            }
        }
    }

    let dp = a[best_a].dot(&b[best_b]);
    let sign = if dp < 0.0 { -1.0 } else { 1.0 };
    (a[best_a], b[best_b] * sign)
}

/// Quarter-turn indices `(i, j)` such that `rotate90_by(q0, n0, i)` and
/// `rotate90_by(q1, n1, j)` agree best.
pub fn compat_orientation_extrinsic_index_4(
    q0: &Vector3<f64>,
    n0: &Vector3<f64>,
    q1: &Vector3<f64>,
    n1: &Vector3<f64>,
) -> (i32, i32) {
    let a = [*q0, n0.cross(q0)];
    let b = [*q1, n1.cross(q1)];

    let mut best_score = f64::NEG_INFINITY;
    let (mut best_a, mut best_b) = (0i32, 0i32);
    for (i, ai) in a.iter().enumerate() {
        for (j, bj) in b.iter().enumerate() {
            let score = ai.dot(bj).abs();
            if score > best_score {
                best_score = score;
                best_a = i as i32;
                best_b = j as i32;
            }
        }
    }
    if a[best_a as usize].dot(&b[best_b as usize]) < 0.0 {
        best_b += 2;
    }
    (best_a, best_b)
}

/// Point halfway between two tangent planes.
pub fn middle_point(
    p0: &Vector3<f64>,
    n0: &Vector3<f64>,
    p1: &Vector3<f64>,
    n1: &Vector3<f64>,
) -> Vector3<f64> {
    let n0p0 = n0.dot(p0);
    let n0p1 = n0.dot(p1);
    let n1p0 = n1.dot(p0);
    let n1p1 = n1.dot(p1);
    let n0n1 = n0.dot(n1);
    let denom = 1.0 / (1.0 - n0n1 * n0n1 + 1e-4);
    let lambda_0 = 2.0 * (n0p1 - n0p0 - n0n1 * (n1p0 - n1p1)) * denom;
    let lambda_1 = 2.0 * (n1p0 - n1p1 - n0n1 * (n0p1 - n0p0)) * denom;
    0.5 * (p0 + p1) - 0.25 * (n0 * lambda_0 + n1 * lambda_1)
}

/// Local frame of a position-field sample.
#[derive(Debug, Clone, Copy)]
pub struct LatticeFrame {
    /// Vertex position.
    pub p: Vector3<f64>,
    /// Unit normal.
    pub n: Vector3<f64>,
    /// Orientation representative.
    pub q: Vector3<f64>,
    /// Lattice anchor.
    pub o: Vector3<f64>,
    /// Lattice spacing along `q` and `n×q`.
    pub scale: Vector2<f64>,
}

impl LatticeFrame {
    /// Second tangent axis.
    #[inline]
    pub fn t(&self) -> Vector3<f64> {
        self.n.cross(&self.q)
    }

    /// Lattice node with integer coordinates `idx` relative to the anchor.
    #[inline]
    pub fn node(&self, idx: Vec2i) -> Vector3<f64> {
        self.o + self.q * (idx.x as f64 * self.scale.x) + self.t() * (idx.y as f64 * self.scale.y)
    }

    /// Integer coordinates of the lattice cell containing `p`.
    #[inline]
    pub fn floor_index(&self, p: &Vector3<f64>) -> Vec2i {
        let d = p - self.o;
        Vec2i::new(
            (self.q.dot(&d) / self.scale.x).floor() as i32,
            (self.t().dot(&d) / self.scale.y).floor() as i32,
        )
    }

    /// Same frame with `q` turned by `amount` quarter turns.
    pub fn rotated(&self, amount: i32) -> Self {
        let scale = if amount.rem_euclid(2) == 1 {
            Vector2::new(self.scale.y, self.scale.x)
        } else {
            self.scale
        };
        Self {
            q: rotate90_by(&self.q, &self.n, amount),
            scale,
            ..*self
        }
    }
}

/// Lattice nodes of two neighbouring samples that lie closest to each other.
///
/// Both frames must already use agreeing orientation representatives.
pub fn compat_position_extrinsic_4(a: &LatticeFrame, b: &LatticeFrame) -> (Vector3<f64>, Vector3<f64>) {
    let (ia, ib, _) = compat_position_extrinsic_index_4(a, b);
    (a.node(ia), b.node(ib))
}

/// Integer lattice coordinates of the closest pair of nodes, with their
/// squared distance.
pub fn compat_position_extrinsic_index_4(a: &LatticeFrame, b: &LatticeFrame) -> (Vec2i, Vec2i, f64) {
    let middle = middle_point(&a.p, &a.n, &b.p, &b.n);
    let base_a = a.floor_index(&middle);
    let base_b = b.floor_index(&middle);

    let mut best_cost = f64::INFINITY;
    let mut best = (base_a, base_b);
    for i in 0..4 {
        let ia = base_a + Vec2i::new(i & 1, (i & 2) >> 1);
        let pa = a.node(ia);
        for j in 0..4 {
            let ib = base_b + Vec2i::new(j & 1, (j & 2) >> 1);
            let cost = (pa - b.node(ib)).norm_squared();
            if cost < best_cost {
                best_cost = cost;
                best = (ia, ib);
            }
        }
    }
    (best.0, best.1, best_cost)
}

/// Snap the anchor `o` to the lattice node of its own frame closest to `p`.
pub fn position_round_4(
    o: &Vector3<f64>,
    q: &Vector3<f64>,
    n: &Vector3<f64>,
    p: &Vector3<f64>,
    scale: Vector2<f64>,
) -> Vector3<f64> {
    let t = n.cross(q);
    let d = p - o;
    o + q * ((q.dot(&d) / scale.x).round() * scale.x) + t * ((t.dot(&d) / scale.y).round() * scale.y)
}

/// Signed area (times two) of the lattice triangle spanned by two jumps.
#[inline]
pub fn lattice_cross(d0: Vec2i, d1: Vec2i) -> i32 {
    d0.x * d1.y - d0.y * d1.x
}

/// Follow the cross field from `p` along direction `dir` for `distance`,
/// returning the end point. The walk re-projects onto each visited vertex's
/// tangent plane, so it marches along the surface approximately.
pub fn travel_along_field(
    p: &Vector3<f64>,
    dir: &Vector3<f64>,
    distance: f64,
    steps: usize,
    sample: impl Fn(&Vector3<f64>) -> (Vector3<f64>, Vector3<f64>),
) -> Vector3<f64> {
    let steps = steps.max(1);
    let h = distance / steps as f64;
    let mut pos = *p;
    let mut heading = *dir;
    for _ in 0..steps {
        let (q, n) = sample(&pos);
        let (_, aligned) = compat_orientation_extrinsic_4(&heading, &n, &q, &n);
        heading = tangential(&aligned, &n);
        pos += heading * h;
    }
    pos
}
