//! The evaluator contract consumed by the core (spec §4.2).
//!
//! Anything implementing [`Evaluator`] can be handed to
//! [`crate::driver::render_mesh`]/[`crate::driver::render_contours`].
//! The core never inspects an expression tree
//! directly; it only ever calls through this trait, which keeps the
//! octree/quadtree construction in `xtree.rs` independent from whatever
//! concrete expression representation a front-end chooses.

mod expr;

pub use expr::{Expr, TreeEvaluator};

use nalgebra::Vector3;

use crate::interval::Interval;
use crate::region::Subregion;

/// A handle a front-end can push batches of points through and pull
/// values/derivatives back out of.
///
/// Not thread-safe: the core creates one evaluator per worker (§5) and
/// never shares one across threads.
pub trait Evaluator {
    /// Evaluate the expression over the box described by `region`.
    /// `upper < 0` proves the box is entirely inside; `lower >= 0`
    /// proves it is entirely outside.
    fn eval_interval(&mut self, region: &Subregion) -> Interval;

    /// Push a scoped sub-evaluator. Pruning decisions are based on the
    /// most recent [`Evaluator::eval_interval`] call. Every `push` must
    /// be matched by exactly one `pop`, including on error paths.
    fn push(&mut self);

    /// Pop the most recently pushed sub-evaluator scope.
    fn pop(&mut self);

    /// Load slot `i` of the input buffer with a point in world space,
    /// after the region's affine normalization (if any) is applied.
    fn set(&mut self, p: Vector3<f64>, i: usize);

    /// Like [`Evaluator::set`], but bypasses any affine region
    /// normalization.
    fn set_raw(&mut self, p: Vector3<f64>, i: usize);

    /// Evaluate the first `count` loaded points and return their
    /// values.
    fn values(&mut self, count: usize) -> &[f32];

    /// Evaluate the first `count` loaded points and return values plus
    /// the gradient components `d/dx, d/dy, d/dz`.
    fn derivs(&mut self, count: usize) -> (&[f32], &[f32], &[f32], &[f32]);

    /// Batch width `N`: the maximum number of points `set`/`set_raw`
    /// can stage before a `values`/`derivs` call.
    fn capacity(&self) -> usize;
}

/// RAII guard around [`Evaluator::push`]/[`Evaluator::pop`], so every
/// exit path (including `?`-propagated errors) pops exactly once.
pub struct PushGuard<'a, E: Evaluator + ?Sized> {
    eval: &'a mut E,
}

impl<'a, E: Evaluator + ?Sized> PushGuard<'a, E> {
    pub fn new(eval: &'a mut E) -> PushGuard<'a, E> {
        eval.push();
        PushGuard { eval }
    }

    pub fn get_mut(&mut self) -> &mut E {
        self.eval
    }
}

impl<'a, E: Evaluator + ?Sized> Drop for PushGuard<'a, E> {
    fn drop(&mut self) {
        self.eval.pop();
    }
}
