//! Integration tests against the seed scenarios and cross-cutting
//! invariants: sphere/plane/circle extraction, empty/full regions,
//! monotonic refinement, and `NO_JITTER` determinism.

use xtree_dc::eval::{Expr, TreeEvaluator};
use xtree_dc::{driver, Config, Flags, Region};

fn sphere(radius_sq: f64) -> Expr {
    Expr::x().square() + Expr::y().square() + Expr::z().square() - Expr::constant(radius_sq)
}

fn axis_plane(axis: usize, offset: f64, negate: bool) -> Expr {
    let coord = match axis {
        0 => Expr::x(),
        1 => Expr::y(),
        _ => Expr::z(),
    };
    let e = coord - Expr::constant(offset);
    if negate {
        -e
    } else {
        e
    }
}

#[test]
fn small_sphere_produces_twelve_triangles() {
    let region = Region::new(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 1.0).unwrap();
    let flags = Flags {
        no_jitter: true,
        collapse: false,
    };
    let config = Config::default();
    let expr = sphere(0.5);
    let mesh = driver::render_mesh(&region, flags, &config, || TreeEvaluator::new(&expr, 16))
        .unwrap();
    let tri = mesh.to_triangle_mesh();
    assert_eq!(tri.faces.len(), 12);
}

#[test]
fn axis_aligned_plane_normals_point_outward() {
    let region = Region::new(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 2.0).unwrap();
    let flags = Flags {
        no_jitter: true,
        collapse: false,
    };
    let config = Config::default();

    for axis in 0..3 {
        for negate in [false, true] {
            let expr = axis_plane(axis, 0.05, negate);
            let mesh =
                driver::render_mesh(&region, flags, &config, || TreeEvaluator::new(&expr, 16))
                    .unwrap();
            assert!(!mesh.faces.is_empty());
            let tri = mesh.to_triangle_mesh();
            let mut expected = [0.0f32; 3];
            expected[axis] = if negate { -1.0 } else { 1.0 };
            for f in 0..tri.faces.len() {
                let n = tri.normal(f);
                for a in 0..3 {
                    assert!(
                        (n[a] - expected[a]).abs() < 1e-3,
                        "axis {} negate {}: face {} normal {:?}, expected {:?}",
                        axis,
                        negate,
                        f,
                        n,
                        expected
                    );
                }
            }
        }
    }
}

#[test]
fn coarse_circle_is_one_closed_loop() {
    let region = Region::new(-1.0, 1.0, -1.0, 1.0, 0.0, 0.0, 1.0).unwrap();
    let flags = Flags {
        no_jitter: true,
        collapse: false,
    };
    let config = Config::default();
    let expr = Expr::x().square() + Expr::y().square() - Expr::constant(0.5);
    let contours =
        driver::render_contours(&region, flags, &config, || TreeEvaluator::new(&expr, 16))
            .unwrap();
    let lines = contours.polylines();
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert_eq!(line.first(), line.last());
}

#[test]
fn fine_circle_vertices_are_close_to_the_analytic_radius() {
    let region = Region::new(-1.0, 1.0, -1.0, 1.0, 0.0, 0.0, 10.0).unwrap();
    let flags = Flags {
        no_jitter: true,
        collapse: false,
    };
    let config = Config::default();
    let expr = Expr::x().square() + Expr::y().square() - Expr::constant(0.5);
    let contours =
        driver::render_contours(&region, flags, &config, || TreeEvaluator::new(&expr, 16))
            .unwrap();
    let lines = contours.polylines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].first(), lines[0].last());

    for v in &contours.vertices {
        let r2 = (v[0] * v[0] + v[1] * v[1]) as f64;
        assert!(r2 > 0.45 && r2 < 0.55, "vertex {:?} has r^2 = {}", v, r2);
    }
}

#[test]
fn constant_positive_tree_is_empty() {
    let region = Region::new(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 1.0).unwrap();
    let flags = Flags::default();
    let config = Config::default();
    let expr = Expr::constant(1.0);
    let mesh = driver::render_mesh(&region, flags, &config, || TreeEvaluator::new(&expr, 16))
        .unwrap();
    assert!(mesh.vertices.is_empty());
    assert!(mesh.faces.is_empty());
}

#[test]
fn constant_negative_tree_is_empty() {
    let region = Region::new(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 1.0).unwrap();
    let flags = Flags::default();
    let config = Config::default();
    let expr = Expr::constant(-1.0);
    let mesh = driver::render_mesh(&region, flags, &config, || TreeEvaluator::new(&expr, 16))
        .unwrap();
    assert!(mesh.vertices.is_empty());
    assert!(mesh.faces.is_empty());
}

#[test]
fn no_jitter_rendering_is_deterministic() {
    let region = Region::new(-1.3, 1.3, -1.3, 1.3, -1.3, 1.3, 3.0).unwrap();
    let flags = Flags {
        no_jitter: true,
        collapse: true,
    };
    let config = Config::default();
    let expr = sphere(1.0);

    let a = driver::render_mesh(&region, flags, &config, || TreeEvaluator::new(&expr, 16))
        .unwrap();
    let b = driver::render_mesh(&region, flags, &config, || TreeEvaluator::new(&expr, 16))
        .unwrap();
    assert_eq!(a, b);
}

mod monotonic_refinement {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn triangle_count_does_not_shrink_with_resolution(
            a in 0.5f64..2.0,
            b in 0.5f64..2.0,
            c in 0.5f64..2.0,
            r in 0.3f64..0.8,
        ) {
            let expr = Expr::constant(a) * Expr::x().square()
                + Expr::constant(b) * Expr::y().square()
                + Expr::constant(c) * Expr::z().square()
                - Expr::constant(r);
            let region = Region::new(-2.0, 2.0, -2.0, 2.0, -2.0, 2.0, 1.0).unwrap();
            let fine_region = Region::new(-2.0, 2.0, -2.0, 2.0, -2.0, 2.0, 2.0).unwrap();
            let flags = Flags {
                no_jitter: true,
                collapse: false,
            };
            let config = Config::default();

            let coarse = driver::render_mesh(&region, flags, &config, || {
                TreeEvaluator::new(&expr, 16)
            })
            .unwrap();
            let fine = driver::render_mesh(&fine_region, flags, &config, || {
                TreeEvaluator::new(&expr, 16)
            })
            .unwrap();

            prop_assert!(fine.faces.len() >= coarse.faces.len());
        }
    }
}
