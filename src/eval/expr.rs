//! A minimal arithmetic expression tree plus a reference
//! [`Evaluator`](crate::eval::Evaluator) implementation over it.
//!
//! The core is generic over any evaluator; this tree exists only so the
//! core has something concrete to exercise in tests and demos, playing
//! the role of the "front-end's" expression representation described in
//! spec §4.2. It is deliberately small: no parser, just a tree a
//! front-end builds programmatically or via the operator overloads
//! below.

use std::ops::{Add, Div, Mul, Neg, Sub};

use nalgebra::Vector3;

use super::Evaluator;
use crate::interval::Interval;
use crate::region::Subregion;

/// A node in an arithmetic expression over the coordinates `x, y, z`.
#[derive(Clone, Debug)]
pub enum Expr {
    X,
    Y,
    Z,
    Const(f64),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Abs(Box<Expr>),
    Sqrt(Box<Expr>),
    Square(Box<Expr>),
    Min(Box<Expr>, Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn x() -> Expr {
        Expr::X
    }
    pub fn y() -> Expr {
        Expr::Y
    }
    pub fn z() -> Expr {
        Expr::Z
    }
    pub fn constant(v: f64) -> Expr {
        Expr::Const(v)
    }
    pub fn abs(self) -> Expr {
        Expr::Abs(Box::new(self))
    }
    pub fn sqrt(self) -> Expr {
        Expr::Sqrt(Box::new(self))
    }
    pub fn square(self) -> Expr {
        Expr::Square(Box::new(self))
    }
    pub fn min(self, other: Expr) -> Expr {
        Expr::Min(Box::new(self), Box::new(other))
    }
    pub fn max(self, other: Expr) -> Expr {
        Expr::Max(Box::new(self), Box::new(other))
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::Add(Box::new(self), Box::new(rhs))
    }
}
impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::Sub(Box::new(self), Box::new(rhs))
    }
}
impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::Mul(Box::new(self), Box::new(rhs))
    }
}
impl Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::Div(Box::new(self), Box::new(rhs))
    }
}
impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

/// A tape op: children are indices of already-flattened nodes (always
/// `< index of this node`, since the tree is flattened post-order).
#[derive(Clone, Copy, Debug)]
enum Op {
    X,
    Y,
    Z,
    Const(f64),
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Div(usize, usize),
    Neg(usize),
    Abs(usize),
    Sqrt(usize),
    Square(usize),
    Min(usize, usize),
    Max(usize, usize),
}

fn flatten(expr: &Expr, tape: &mut Vec<Op>) -> usize {
    let op = match expr {
        Expr::X => Op::X,
        Expr::Y => Op::Y,
        Expr::Z => Op::Z,
        Expr::Const(v) => Op::Const(*v),
        Expr::Add(a, b) => Op::Add(flatten(a, tape), flatten(b, tape)),
        Expr::Sub(a, b) => Op::Sub(flatten(a, tape), flatten(b, tape)),
        Expr::Mul(a, b) => Op::Mul(flatten(a, tape), flatten(b, tape)),
        Expr::Div(a, b) => Op::Div(flatten(a, tape), flatten(b, tape)),
        Expr::Neg(a) => Op::Neg(flatten(a, tape)),
        Expr::Abs(a) => Op::Abs(flatten(a, tape)),
        Expr::Sqrt(a) => Op::Sqrt(flatten(a, tape)),
        Expr::Square(a) => Op::Square(flatten(a, tape)),
        Expr::Min(a, b) => Op::Min(flatten(a, tape), flatten(b, tape)),
        Expr::Max(a, b) => Op::Max(flatten(a, tape), flatten(b, tape)),
    };
    tape.push(op);
    tape.len() - 1
}

/// Reference [`Evaluator`] over an [`Expr`] tree.
///
/// Keeps a flat post-order tape plus per-node value/gradient buffers
/// sized for a batch of up to `n` points, and a stack of `min`/`max`
/// pruning decisions made by [`Evaluator::push`].
pub struct TreeEvaluator {
    tape: Vec<Op>,
    n: usize,
    points: Vec<Vector3<f64>>,
    value_buf: Vec<f32>,
    dx_buf: Vec<f32>,
    dy_buf: Vec<f32>,
    dz_buf: Vec<f32>,
    interval_cache: Vec<Interval>,
    forced: Vec<Option<bool>>,
    push_stack: Vec<Vec<usize>>,
}

impl TreeEvaluator {
    pub fn new(expr: &Expr, n: usize) -> TreeEvaluator {
        let mut tape = Vec::new();
        flatten(expr, &mut tape);
        let len = tape.len();
        TreeEvaluator {
            tape,
            n,
            points: vec![Vector3::new(0.0, 0.0, 0.0); n],
            value_buf: vec![0.0; len * n],
            dx_buf: vec![0.0; len * n],
            dy_buf: vec![0.0; len * n],
            dz_buf: vec![0.0; len * n],
            interval_cache: vec![Interval::point(0.0); len],
            forced: vec![None; len],
            push_stack: Vec::new(),
        }
    }

    fn root(&self) -> usize {
        self.tape.len() - 1
    }
}

impl Evaluator for TreeEvaluator {
    fn eval_interval(&mut self, region: &Subregion) -> Interval {
        let x = Interval::new(region.corner.x, region.corner.x + region.size_world().x);
        let y = Interval::new(region.corner.y, region.corner.y + region.size_world().y);
        let z = Interval::new(region.corner.z, region.corner.z + region.size_world().z);
        for i in 0..self.tape.len() {
            let v = match self.tape[i] {
                Op::X => x,
                Op::Y => y,
                Op::Z => z,
                Op::Const(c) => Interval::point(c),
                Op::Add(a, b) => self.interval_cache[a] + self.interval_cache[b],
                Op::Sub(a, b) => self.interval_cache[a] - self.interval_cache[b],
                Op::Mul(a, b) => self.interval_cache[a] * self.interval_cache[b],
                Op::Div(a, b) => self.interval_cache[a].div(self.interval_cache[b]),
                Op::Neg(a) => -self.interval_cache[a],
                Op::Abs(a) => self.interval_cache[a].abs(),
                Op::Sqrt(a) => self.interval_cache[a].sqrt(),
                Op::Square(a) => self.interval_cache[a].square(),
                Op::Min(a, b) => self.interval_cache[a].min(self.interval_cache[b]),
                Op::Max(a, b) => self.interval_cache[a].max(self.interval_cache[b]),
            };
            self.interval_cache[i] = v;
        }
        self.interval_cache[self.root()]
    }

    fn push(&mut self) {
        let mut forced_here = Vec::new();
        for i in 0..self.tape.len() {
            if self.forced[i].is_some() {
                continue;
            }
            match self.tape[i] {
                Op::Min(a, b) => {
                    let (ia, ib) = (self.interval_cache[a], self.interval_cache[b]);
                    if ia.dominates_min(ib) {
                        self.forced[i] = Some(true);
                        forced_here.push(i);
                    } else if ib.dominates_min(ia) {
                        self.forced[i] = Some(false);
                        forced_here.push(i);
                    }
                }
                Op::Max(a, b) => {
                    let (ia, ib) = (self.interval_cache[a], self.interval_cache[b]);
                    if ia.dominates_max(ib) {
                        self.forced[i] = Some(true);
                        forced_here.push(i);
                    } else if ib.dominates_max(ia) {
                        self.forced[i] = Some(false);
                        forced_here.push(i);
                    }
                }
                _ => {}
            }
        }
        self.push_stack.push(forced_here);
    }

    fn pop(&mut self) {
        let forced_here = self
            .push_stack
            .pop()
            .expect("pop() called without a matching push()");
        for i in forced_here {
            self.forced[i] = None;
        }
    }

    fn set(&mut self, p: Vector3<f64>, i: usize) {
        self.points[i] = p;
    }

    fn set_raw(&mut self, p: Vector3<f64>, i: usize) {
        // This evaluator performs no affine region normalization, so
        // `set` and `set_raw` coincide.
        self.points[i] = p;
    }

    fn values(&mut self, count: usize) -> &[f32] {
        debug_assert!(count <= self.n);
        let n = self.n;
        for i in 0..self.tape.len() {
            for j in 0..count {
                let v = match self.tape[i] {
                    Op::X => self.points[j].x as f32,
                    Op::Y => self.points[j].y as f32,
                    Op::Z => self.points[j].z as f32,
                    Op::Const(c) => c as f32,
                    Op::Add(a, b) => self.value_buf[a * n + j] + self.value_buf[b * n + j],
                    Op::Sub(a, b) => self.value_buf[a * n + j] - self.value_buf[b * n + j],
                    Op::Mul(a, b) => self.value_buf[a * n + j] * self.value_buf[b * n + j],
                    Op::Div(a, b) => self.value_buf[a * n + j] / self.value_buf[b * n + j],
                    Op::Neg(a) => -self.value_buf[a * n + j],
                    Op::Abs(a) => self.value_buf[a * n + j].abs(),
                    Op::Sqrt(a) => self.value_buf[a * n + j].max(0.0).sqrt(),
                    Op::Square(a) => {
                        let v = self.value_buf[a * n + j];
                        v * v
                    }
                    Op::Min(a, b) => match self.forced[i] {
                        Some(true) => self.value_buf[a * n + j],
                        Some(false) => self.value_buf[b * n + j],
                        None => self.value_buf[a * n + j].min(self.value_buf[b * n + j]),
                    },
                    Op::Max(a, b) => match self.forced[i] {
                        Some(true) => self.value_buf[a * n + j],
                        Some(false) => self.value_buf[b * n + j],
                        None => self.value_buf[a * n + j].max(self.value_buf[b * n + j]),
                    },
                };
                self.value_buf[i * n + j] = v;
            }
        }
        let root = self.root();
        &self.value_buf[root * n..root * n + count]
    }

    fn derivs(&mut self, count: usize) -> (&[f32], &[f32], &[f32], &[f32]) {
        debug_assert!(count <= self.n);
        let n = self.n;
        for i in 0..self.tape.len() {
            for j in 0..count {
                let idx = i * n + j;
                let (v, dx, dy, dz) = match self.tape[i] {
                    Op::X => (self.points[j].x as f32, 1.0, 0.0, 0.0),
                    Op::Y => (self.points[j].y as f32, 0.0, 1.0, 0.0),
                    Op::Z => (self.points[j].z as f32, 0.0, 0.0, 1.0),
                    Op::Const(c) => (c as f32, 0.0, 0.0, 0.0),
                    Op::Add(a, b) => (
                        self.value_buf[a * n + j] + self.value_buf[b * n + j],
                        self.dx_buf[a * n + j] + self.dx_buf[b * n + j],
                        self.dy_buf[a * n + j] + self.dy_buf[b * n + j],
                        self.dz_buf[a * n + j] + self.dz_buf[b * n + j],
                    ),
                    Op::Sub(a, b) => (
                        self.value_buf[a * n + j] - self.value_buf[b * n + j],
                        self.dx_buf[a * n + j] - self.dx_buf[b * n + j],
                        self.dy_buf[a * n + j] - self.dy_buf[b * n + j],
                        self.dz_buf[a * n + j] - self.dz_buf[b * n + j],
                    ),
                    Op::Mul(a, b) => {
                        let (va, vb) = (self.value_buf[a * n + j], self.value_buf[b * n + j]);
                        (
                            va * vb,
                            va * self.dx_buf[b * n + j] + vb * self.dx_buf[a * n + j],
                            va * self.dy_buf[b * n + j] + vb * self.dy_buf[a * n + j],
                            va * self.dz_buf[b * n + j] + vb * self.dz_buf[a * n + j],
                        )
                    }
                    Op::Div(a, b) => {
                        let (va, vb) = (self.value_buf[a * n + j], self.value_buf[b * n + j]);
                        let inv = 1.0 / (vb * vb);
                        (
                            va / vb,
                            (self.dx_buf[a * n + j] * vb - va * self.dx_buf[b * n + j]) * inv,
                            (self.dy_buf[a * n + j] * vb - va * self.dy_buf[b * n + j]) * inv,
                            (self.dz_buf[a * n + j] * vb - va * self.dz_buf[b * n + j]) * inv,
                        )
                    }
                    Op::Neg(a) => (
                        -self.value_buf[a * n + j],
                        -self.dx_buf[a * n + j],
                        -self.dy_buf[a * n + j],
                        -self.dz_buf[a * n + j],
                    ),
                    Op::Abs(a) => {
                        let va = self.value_buf[a * n + j];
                        let s = if va < 0.0 { -1.0 } else { 1.0 };
                        (
                            va.abs(),
                            s * self.dx_buf[a * n + j],
                            s * self.dy_buf[a * n + j],
                            s * self.dz_buf[a * n + j],
                        )
                    }
                    Op::Sqrt(a) => {
                        let va = self.value_buf[a * n + j].max(0.0);
                        let root = va.sqrt();
                        let denom = if root > 1e-12 { 2.0 * root } else { 1e-12 };
                        (
                            root,
                            self.dx_buf[a * n + j] / denom,
                            self.dy_buf[a * n + j] / denom,
                            self.dz_buf[a * n + j] / denom,
                        )
                    }
                    Op::Square(a) => {
                        let va = self.value_buf[a * n + j];
                        (
                            va * va,
                            2.0 * va * self.dx_buf[a * n + j],
                            2.0 * va * self.dy_buf[a * n + j],
                            2.0 * va * self.dz_buf[a * n + j],
                        )
                    }
                    Op::Min(a, b) => {
                        let pick_a = match self.forced[i] {
                            Some(choice) => choice,
                            None => self.value_buf[a * n + j] <= self.value_buf[b * n + j],
                        };
                        let src = if pick_a { a } else { b };
                        (
                            self.value_buf[src * n + j],
                            self.dx_buf[src * n + j],
                            self.dy_buf[src * n + j],
                            self.dz_buf[src * n + j],
                        )
                    }
                    Op::Max(a, b) => {
                        let pick_a = match self.forced[i] {
                            Some(choice) => choice,
                            None => self.value_buf[a * n + j] >= self.value_buf[b * n + j],
                        };
                        let src = if pick_a { a } else { b };
                        (
                            self.value_buf[src * n + j],
                            self.dx_buf[src * n + j],
                            self.dy_buf[src * n + j],
                            self.dz_buf[src * n + j],
                        )
                    }
                };
                self.value_buf[idx] = v;
                self.dx_buf[idx] = dx;
                self.dy_buf[idx] = dy;
                self.dz_buf[idx] = dz;
            }
        }
        let root = self.root();
        let lo = root * n;
        let hi = lo + count;
        (
            &self.value_buf[lo..hi],
            &self.dx_buf[lo..hi],
            &self.dy_buf[lo..hi],
            &self.dz_buf[lo..hi],
        )
    }

    fn capacity(&self) -> usize {
        self.n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    #[test]
    fn sphere_interval_classifies_corners() {
        let expr = Expr::x().square() + Expr::y().square() + Expr::z().square()
            - Expr::constant(0.5);
        let mut e = TreeEvaluator::new(&expr, 8);
        let region = Region::new(-0.1, 0.1, -0.1, 0.1, -0.1, 0.1, 4.0)
            .unwrap()
            .to_subregion(3);
        let iv = e.eval_interval(&region);
        assert!(iv.is_all_inside());
    }

    #[test]
    fn values_match_direct_evaluation() {
        let expr = Expr::x() * Expr::x() + Expr::y();
        let mut e = TreeEvaluator::new(&expr, 2);
        e.set(Vector3::new(2.0, 3.0, 0.0), 0);
        e.set(Vector3::new(-1.0, 0.0, 0.0), 1);
        let values = e.values(2);
        assert!((values[0] - 7.0).abs() < 1e-5);
        assert!((values[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn derivs_match_analytic_gradient() {
        let expr = Expr::x().square() + Expr::y().square() + Expr::z().square();
        let mut e = TreeEvaluator::new(&expr, 1);
        e.set(Vector3::new(1.0, 2.0, 3.0), 0);
        let (v, dx, dy, dz) = e.derivs(1);
        assert!((v[0] - 14.0).abs() < 1e-4);
        assert!((dx[0] - 2.0).abs() < 1e-4);
        assert!((dy[0] - 4.0).abs() < 1e-4);
        assert!((dz[0] - 6.0).abs() < 1e-4);
    }
}
