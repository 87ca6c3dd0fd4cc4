//! Intersection Hermite data (spec §3 C3) and the per-cell quadratic
//! error function accumulator (spec §3 C4, §4.6).

use nalgebra::{Matrix3, Vector3};

/// A point on a cell edge plus the unit gradient there: a piece of
/// Hermite data `(p, n)`.
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub p: Vector3<f64>,
    pub n: Vector3<f64>,
}

/// Relative eigenvalue threshold below which a direction is considered
/// insignificant, both for rank estimation and for the pseudo-inverse
/// used to solve the QEF (spec §4.6).
pub const RANK_EPSILON: f64 = 0.1;

/// The symmetric `AtA`, vector `AtB`, scalar `BtB`, mass-point
/// accumulator, plus the solved vertex/rank/error once [`Qef::solve`]
/// has run.
///
/// Fields are public because branch collapse (spec §4.7) needs to
/// combine `AtA`/`AtB`/`BtB` from every child while combining the mass
/// point from only the max-rank children — a rule that does not fit a
/// single opaque `merge`.
#[derive(Clone, Copy, Debug)]
pub struct Qef {
    pub at_a: Matrix3<f64>,
    pub at_b: Vector3<f64>,
    pub bt_b: f64,
    pub mass_sum: Vector3<f64>,
    pub mass_count: f64,
    pub rank: u8,
    pub error: f64,
    pub solution: Vector3<f64>,
}

impl Qef {
    pub fn zero() -> Qef {
        Qef {
            at_a: Matrix3::zeros(),
            at_b: Vector3::zeros(),
            bt_b: 0.0,
            mass_sum: Vector3::zeros(),
            mass_count: 0.0,
            rank: 0,
            error: f64::NAN,
            solution: Vector3::zeros(),
        }
    }

    /// Fold one piece of Hermite data into `AtA`/`AtB`/`BtB`.
    pub fn add_intersection(&mut self, plane: &Plane) {
        let n = plane.n;
        let b = n.dot(&plane.p);
        self.at_a += n * n.transpose();
        self.at_b += n * b;
        self.bt_b += b * b;
    }

    /// Fold one sampled position into the mass-point accumulator.
    pub fn add_mass_sample(&mut self, p: Vector3<f64>) {
        self.mass_sum += p;
        self.mass_count += 1.0;
    }

    /// Add only the `AtA`/`AtB`/`BtB` contribution of `other` (used by
    /// branch collapse, which aggregates the mass point separately).
    pub fn add_matrices_from(&mut self, other: &Qef) {
        self.at_a += other.at_a;
        self.at_b += other.at_b;
        self.bt_b += other.bt_b;
    }

    /// Add only the mass-point contribution of `other`.
    pub fn add_mass_from(&mut self, other: &Qef) {
        self.mass_sum += other.mass_sum;
        self.mass_count += other.mass_count;
    }

    /// Fold every field of `other` into `self` (plain sibling-pair
    /// merge, used outside branch collapse's rank-preserving rule).
    pub fn merge(&mut self, other: &Qef) {
        self.add_matrices_from(other);
        self.add_mass_from(other);
    }

    pub fn mass_point(&self) -> Option<Vector3<f64>> {
        if self.mass_count > 0.0 {
            Some(self.mass_sum / self.mass_count)
        } else {
            None
        }
    }

    /// Solve for the dual vertex (spec §4.6).
    ///
    /// `manifold` is the cell's corner-topology check result. When
    /// false, the QEF solution is abandoned in favor of the mass point
    /// (or `fallback_center` if there is no mass point at all, i.e. a
    /// leaf with mixed corners but zero edge crossings — spec §7) and
    /// the error is reported as `+inf` so branch collapse always
    /// rejects merging through this cell.
    ///
    /// Returns the residual error.
    pub fn solve(&mut self, manifold: bool, fallback_center: Vector3<f64>) -> f64 {
        let p_bar = self.mass_point().unwrap_or(fallback_center);

        if !manifold {
            self.rank = 0;
            self.solution = p_bar;
            self.error = f64::INFINITY;
            return self.error;
        }

        let eigen = nalgebra::linalg::SymmetricEigen::new(self.at_a);
        let eigenvalues = eigen.eigenvalues;
        let eigenvectors = eigen.eigenvectors;
        let s_max = eigenvalues.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));

        if s_max <= 0.0 {
            // All gradients were zero: there is no well-defined normal
            // direction to fit against. Treated as non-manifold per
            // the resolved Open Question in spec §9/DESIGN.md.
            self.rank = 0;
            self.solution = p_bar;
            self.error = f64::INFINITY;
            return self.error;
        }

        let mut rank = 0u8;
        let mut d = Matrix3::zeros();
        for i in 0..3 {
            let lambda = eigenvalues[i];
            if (lambda / s_max).abs() >= RANK_EPSILON {
                d[(i, i)] = 1.0 / lambda;
                rank += 1;
            }
        }
        self.rank = rank;

        let at_a_pinv = eigenvectors * d * eigenvectors.transpose();
        let v = at_a_pinv * (self.at_b - self.at_a * p_bar) + p_bar;

        let error = v.dot(&(self.at_a * v)) - 2.0 * v.dot(&self.at_b) + self.bt_b;

        self.solution = v;
        self.error = error;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_plane_pulls_vertex_onto_it() {
        let mut qef = Qef::zero();
        qef.add_mass_sample(Vector3::new(0.0, 0.0, 0.5));
        qef.add_intersection(&Plane {
            p: Vector3::new(0.0, 0.0, 0.5),
            n: Vector3::new(0.0, 0.0, 1.0),
        });
        let error = qef.solve(true, Vector3::zeros());
        assert_eq!(qef.rank, 1);
        assert!(error.abs() < 1e-9);
        assert!((qef.solution.z - 0.5).abs() < 1e-9);
    }

    #[test]
    fn three_orthogonal_planes_pin_a_corner() {
        let mut qef = Qef::zero();
        let corner = Vector3::new(1.0, 1.0, 1.0);
        qef.add_mass_sample(corner);
        for n in &[
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ] {
            qef.add_intersection(&Plane { p: corner, n: *n });
        }
        let error = qef.solve(true, Vector3::zeros());
        assert_eq!(qef.rank, 3);
        assert!(error.abs() < 1e-9);
        assert!((qef.solution - corner).norm() < 1e-9);
    }

    #[test]
    fn non_manifold_falls_back_to_mass_point() {
        let mut qef = Qef::zero();
        qef.add_mass_sample(Vector3::new(0.2, 0.3, 0.4));
        qef.add_intersection(&Plane {
            p: Vector3::new(0.0, 0.0, 0.0),
            n: Vector3::new(1.0, 0.0, 0.0),
        });
        let error = qef.solve(false, Vector3::zeros());
        assert!(error.is_infinite());
        assert_eq!(qef.rank, 0);
        assert!((qef.solution - Vector3::new(0.2, 0.3, 0.4)).norm() < 1e-9);
    }

    #[test]
    fn zero_gradients_treated_as_non_manifold() {
        let mut qef = Qef::zero();
        qef.add_mass_sample(Vector3::new(0.1, 0.1, 0.1));
        qef.add_intersection(&Plane {
            p: Vector3::new(0.1, 0.1, 0.1),
            n: Vector3::zeros(),
        });
        let error = qef.solve(true, Vector3::zeros());
        assert!(error.is_infinite());
        assert_eq!(qef.rank, 0);
    }
}
