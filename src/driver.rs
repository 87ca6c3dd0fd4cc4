//! Parallel top-level driver (spec §3 C8, §5): the crate's public
//! entry point, wiring `Region` → `XTree` construction/finalization →
//! `walker` → `Mesh`/`Contours`.
//!
//! Construction and finalization recurse single-threaded within one
//! subtree — an [`Evaluator`] is never shared across threads (its own
//! doc comment says as much). The only parallelism is across the
//! `2^D::DIMS` top-level octants/quadrants: each gets its own evaluator
//! from `new_evaluator` and runs on its own `rayon` task, and the
//! results are stitched back into one tree by [`XTree::join`].

use std::time::Instant;

use rayon::prelude::*;

use crate::error::Result;
use crate::eval::Evaluator;
use crate::mesh::{Contours, Mesh};
use crate::region::Region;
use crate::walker::{walk_2d, walk_3d};
use crate::xtree::XTree;
use crate::{Config, Dim2, Dim3, Dims, Flags};

fn build_top_level<D, E, F>(
    region: &Region,
    flags: Flags,
    config: &Config,
    new_evaluator: &F,
) -> XTree<D>
where
    D: Dims,
    E: Evaluator,
    F: Fn() -> E + Sync,
{
    let subregion = region.to_subregion(D::DIMS);
    log::debug!(
        "building {}D tree over {:?} voxels at 1/{} per unit",
        D::DIMS,
        &subregion.voxels[..D::DIMS],
        subregion.voxel_size.recip()
    );

    if !subregion.can_split_even(D::DIMS) {
        let mut evaluator = new_evaluator();
        let mut root = XTree::<D>::populate_children(&mut evaluator, subregion, flags, config);
        root.finalize(&mut evaluator, flags, config);
        return root;
    }

    let pieces = subregion.split_even(D::DIMS);
    log::debug!("splitting across {} top-level workers", pieces.len());
    let children: Vec<XTree<D>> = pieces
        .into_par_iter()
        .map(|sub| {
            let mut evaluator = new_evaluator();
            let mut tree = XTree::<D>::populate_children(&mut evaluator, sub, flags, config);
            tree.finalize(&mut evaluator, flags, config);
            tree
        })
        .collect();
    XTree::<D>::join(subregion, children, flags, config)
}

/// Render `region` into a triangle/quad mesh using the 3D (octree)
/// instantiation (spec §5's top-level entry point). `new_evaluator` is
/// called once per worker thread to build an independent evaluator, so
/// it should be cheap to construct (e.g. cloning a compiled expression
/// tape) and free of shared mutable state.
pub fn render_mesh<E, F>(
    region: &Region,
    flags: Flags,
    config: &Config,
    new_evaluator: F,
) -> Result<Mesh>
where
    E: Evaluator,
    F: Fn() -> E + Sync,
{
    let build_start = Instant::now();
    let root = build_top_level::<Dim3, E, F>(region, flags, config, &new_evaluator);
    log::debug!("tree build took {:?}", build_start.elapsed());

    let walk_start = Instant::now();
    let mut evaluator = new_evaluator();
    let mesh = walk_3d(&root, &mut evaluator);
    log::debug!(
        "walked tree into {} vertices, {} faces in {:?}",
        mesh.vertices.len(),
        mesh.faces.len(),
        walk_start.elapsed(),
    );
    Ok(mesh)
}

/// Render `region` into a set of 2D contours using the quadtree
/// instantiation.
pub fn render_contours<E, F>(
    region: &Region,
    flags: Flags,
    config: &Config,
    new_evaluator: F,
) -> Result<Contours>
where
    E: Evaluator,
    F: Fn() -> E + Sync,
{
    let build_start = Instant::now();
    let root = build_top_level::<Dim2, E, F>(region, flags, config, &new_evaluator);
    log::debug!("tree build took {:?}", build_start.elapsed());

    let walk_start = Instant::now();
    let mut evaluator = new_evaluator();
    let contours = walk_2d(&root, &mut evaluator);
    log::debug!(
        "walked tree into {} vertices, {} segments in {:?}",
        contours.vertices.len(),
        contours.segments.len(),
        walk_start.elapsed(),
    );
    Ok(contours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{Expr, TreeEvaluator};

    fn sphere() -> Expr {
        (Expr::x().square() + Expr::y().square() + Expr::z().square()).sqrt() - Expr::constant(1.0)
    }

    #[test]
    fn renders_a_sphere_mesh() {
        let region = Region::new(-1.5, 1.5, -1.5, 1.5, -1.5, 1.5, 8.0).unwrap();
        let flags = Flags {
            no_jitter: true,
            collapse: false,
        };
        let config = Config::default();
        let expr = sphere();
        let mesh = render_mesh(&region, flags, &config, || TreeEvaluator::new(&expr, 32)).unwrap();
        assert!(!mesh.vertices.is_empty());
        assert!(!mesh.faces.is_empty());
    }

    #[test]
    fn renders_a_circle_contour() {
        let region = Region::new(-1.5, 1.5, -1.5, 1.5, 0.0, 0.0, 8.0).unwrap();
        let flags = Flags {
            no_jitter: true,
            collapse: false,
        };
        let config = Config::default();
        let expr = Expr::x().square() + Expr::y().square() - Expr::constant(1.0);
        let contours =
            render_contours(&region, flags, &config, || TreeEvaluator::new(&expr, 32)).unwrap();
        assert!(!contours.vertices.is_empty());
        assert!(!contours.segments.is_empty());
        let lines = contours.polylines();
        assert!(!lines.is_empty());
    }
}
