use std::ops::{Add, Mul, Neg, Sub};

/// A bound `[lower, upper]` on the value of a subexpression over some
/// box, used to prune parts of the tree that are provably active or
/// inactive on a given [`crate::Subregion`].
///
/// `upper < 0` proves the box is entirely inside the surface (value is
/// negative everywhere); `lower >= 0` proves it is entirely outside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

impl Interval {
    pub fn new(lower: f64, upper: f64) -> Interval {
        debug_assert!(lower <= upper, "interval lower > upper: {} > {}", lower, upper);
        Interval { lower, upper }
    }

    pub fn point(v: f64) -> Interval {
        Interval { lower: v, upper: v }
    }

    /// True if every value in the interval is strictly negative, i.e.
    /// the box is entirely inside the surface.
    pub fn is_all_inside(&self) -> bool {
        self.upper < 0.0
    }

    /// True if every value in the interval is non-negative, i.e. the
    /// box is entirely outside the surface.
    pub fn is_all_outside(&self) -> bool {
        self.lower >= 0.0
    }

    pub fn abs(&self) -> Interval {
        if self.lower >= 0.0 {
            *self
        } else if self.upper <= 0.0 {
            Interval::new(-self.upper, -self.lower)
        } else {
            Interval::new(0.0, self.lower.abs().max(self.upper.abs()))
        }
    }

    pub fn sqrt(&self) -> Interval {
        let lower = if self.lower <= 0.0 { 0.0 } else { self.lower.sqrt() };
        let upper = if self.upper <= 0.0 { 0.0 } else { self.upper.sqrt() };
        Interval::new(lower, upper)
    }

    pub fn square(&self) -> Interval {
        let a = self.lower * self.lower;
        let b = self.upper * self.upper;
        if self.lower <= 0.0 && self.upper >= 0.0 {
            Interval::new(0.0, a.max(b))
        } else {
            Interval::new(a.min(b), a.max(b))
        }
    }

    pub fn min(&self, other: Interval) -> Interval {
        Interval::new(self.lower.min(other.lower), self.upper.min(other.upper))
    }

    pub fn max(&self, other: Interval) -> Interval {
        Interval::new(self.lower.max(other.lower), self.upper.max(other.upper))
    }

    /// Does this interval's winning branch against `other` dominate
    /// for a `min`? I.e. is `self` provably `<= other` everywhere.
    pub fn dominates_min(&self, other: Interval) -> bool {
        self.upper <= other.lower
    }

    /// Does this interval's winning branch against `other` dominate
    /// for a `max`? I.e. is `self` provably `>= other` everywhere.
    pub fn dominates_max(&self, other: Interval) -> bool {
        self.lower >= other.upper
    }
}

impl Add for Interval {
    type Output = Interval;
    fn add(self, rhs: Interval) -> Interval {
        Interval::new(self.lower + rhs.lower, self.upper + rhs.upper)
    }
}

impl Sub for Interval {
    type Output = Interval;
    fn sub(self, rhs: Interval) -> Interval {
        Interval::new(self.lower - rhs.upper, self.upper - rhs.lower)
    }
}

impl Neg for Interval {
    type Output = Interval;
    fn neg(self) -> Interval {
        Interval::new(-self.upper, -self.lower)
    }
}

impl Mul for Interval {
    type Output = Interval;
    fn mul(self, rhs: Interval) -> Interval {
        let candidates = [
            self.lower * rhs.lower,
            self.lower * rhs.upper,
            self.upper * rhs.lower,
            self.upper * rhs.upper,
        ];
        let lower = candidates.iter().cloned().fold(f64::INFINITY, f64::min);
        let upper = candidates.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Interval::new(lower, upper)
    }
}

/// Division is a partial operation: dividing by an interval that
/// straddles zero yields an unbounded interval, since the core only
/// uses division away from singularities in practice.
impl Interval {
    pub fn div(self, rhs: Interval) -> Interval {
        if rhs.lower > 0.0 || rhs.upper < 0.0 {
            let candidates = [
                self.lower / rhs.lower,
                self.lower / rhs.upper,
                self.upper / rhs.lower,
                self.upper / rhs.upper,
            ];
            let lower = candidates.iter().cloned().fold(f64::INFINITY, f64::min);
            let upper = candidates.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            Interval::new(lower, upper)
        } else {
            Interval::new(f64::NEG_INFINITY, f64::INFINITY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Interval::new(-2.0, -1.0).is_all_inside());
        assert!(Interval::new(1.0, 2.0).is_all_outside());
        assert!(!Interval::new(-1.0, 1.0).is_all_inside());
        assert!(!Interval::new(-1.0, 1.0).is_all_outside());
    }

    #[test]
    fn arithmetic() {
        let a = Interval::new(-1.0, 2.0);
        let b = Interval::new(3.0, 4.0);
        assert_eq!(a + b, Interval::new(2.0, 6.0));
        assert_eq!(a - b, Interval::new(-5.0, -1.0));
        assert_eq!(-a, Interval::new(-2.0, 1.0));
        assert_eq!(a.square(), Interval::new(0.0, 4.0));
    }
}
