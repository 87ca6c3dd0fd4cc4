//! The octree/quadtree cell (spec §3 C5): construction, finalization,
//! and branch collapse.

use std::cell::Cell;
use std::marker::PhantomData;

use nalgebra::Vector3;
use rand::Rng;

use crate::eval::{Evaluator, PushGuard};
use crate::qef::{Plane, Qef};
use crate::region::Subregion;
use crate::topology::{cell_edges, corner_table, leaf_topology, CornerMask};
use crate::{Config, Dims, Flags};

/// A cell's classification (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellKind {
    /// All corners outside; `type == EMPTY ⇔ all corners false`.
    Empty,
    /// All corners inside; `type == FULL ⇔ all corners true`.
    Full,
    /// Mixed corners with a placed dual vertex.
    Leaf,
    /// Owns `2^D::DIMS` children.
    Branch,
}

/// One node of the recursive spatial decomposition.
///
/// Cells are immovable after construction: a cell exclusively owns its
/// children and is mutated only during construction/finalization,
/// which happen single-threaded per subtree (spec §5).
pub struct XTree<D: Dims> {
    pub kind: CellKind,
    /// Bit `i` set means corner `i` is inside (value < 0).
    pub corners: CornerMask,
    /// Owned children, `D::CORNERS` long, only when `kind == Branch`.
    pub children: Vec<XTree<D>>,
    /// The dual vertex in world coordinates; only meaningful for `Leaf`.
    pub vertex: Vector3<f64>,
    pub rank: u8,
    /// Whether this cell's own corner pattern is in the manifold
    /// corner table.
    pub manifold: bool,
    /// Height in the tree; leaves (and Empty/Full) are `0`.
    pub level: u32,
    pub qef: Qef,
    pub region: Subregion,
    /// Cache of this cell's index in the walker's deduplicated vertex
    /// list, assigned the first time a neighbor references it.
    pub mesh_index: Cell<Option<usize>>,
    _dims: PhantomData<D>,
}

fn full_mask(corners: usize) -> CornerMask {
    ((1u16 << corners) - 1) as CornerMask
}

fn random_point_in_ball(rng: &mut impl Rng, dims: usize, radius: f64) -> Vector3<f64> {
    loop {
        let x = rng.gen_range(-1.0, 1.0);
        let y = rng.gen_range(-1.0, 1.0);
        let z = if dims == 3 { rng.gen_range(-1.0, 1.0) } else { 0.0 };
        let v = Vector3::new(x, y, z);
        let n2 = v.norm_squared();
        if n2 > 1e-9 && n2 <= 1.0 {
            return v * (radius / n2.sqrt());
        }
    }
}

impl<D: Dims> XTree<D> {
    /// Recursively construct a subtree over `region` (spec §4.3).
    /// Single-threaded: the parallel driver only parallelizes the
    /// top-level split (spec §5).
    pub fn populate_children<E: Evaluator>(
        evaluator: &mut E,
        region: Subregion,
        flags: Flags,
        config: &Config,
    ) -> XTree<D> {
        let mut kind = CellKind::Leaf;
        let mut corners: CornerMask = 0;
        let mut children = Vec::new();

        if region.can_split() {
            let interval = evaluator.eval_interval(&region);
            if interval.is_all_inside() {
                kind = CellKind::Full;
                corners = full_mask(D::CORNERS);
            } else if interval.is_all_outside() {
                kind = CellKind::Empty;
            } else {
                let mut guard = PushGuard::new(evaluator);
                children = region
                    .split_even(D::DIMS)
                    .into_iter()
                    .map(|sub| XTree::<D>::populate_children(guard.get_mut(), sub, flags, config))
                    .collect();
                kind = CellKind::Branch;
            }
        }

        if kind == CellKind::Leaf {
            debug_assert!(
                D::CORNERS <= evaluator.capacity(),
                "evaluator batch width must cover a cell's {} corners",
                D::CORNERS
            );
            for i in 0..D::CORNERS {
                evaluator.set(region.corner_position(i), i);
            }
            let values = evaluator.values(D::CORNERS);
            for i in 0..D::CORNERS {
                if values[i] < 0.0 {
                    corners |= 1 << i;
                }
            }
        }

        XTree {
            kind,
            corners,
            children,
            vertex: Vector3::zeros(),
            rank: 0,
            manifold: false,
            level: 0,
            qef: Qef::zero(),
            region,
            mesh_index: Cell::new(None),
            _dims: PhantomData,
        }
    }

    fn cell_center(&self) -> Vector3<f64> {
        self.region.corner + self.region.size_world() * 0.5
    }

    /// Bottom-up finalization (spec §4.4): lift corners from children,
    /// solve leaf QEFs, and (if requested) attempt branch collapse.
    pub fn finalize<E: Evaluator>(&mut self, evaluator: &mut E, flags: Flags, config: &Config) {
        match self.kind {
            CellKind::Branch => {
                for child in self.children.iter_mut() {
                    child.finalize(evaluator, flags, config);
                }
                self.level = 1 + self.children.iter().map(|c| c.level).max().unwrap_or(0);

                let mut corners: CornerMask = 0;
                for i in 0..D::CORNERS {
                    if (self.children[i].corners as usize >> i) & 1 == 1 {
                        corners |= 1 << i;
                    }
                }
                self.corners = corners;

                if flags.collapse {
                    self.collapse_branch(config);
                }
            }
            CellKind::Leaf => {
                let full = full_mask(D::CORNERS);
                if self.corners == 0 {
                    self.kind = CellKind::Empty;
                } else if self.corners == full {
                    self.kind = CellKind::Full;
                } else {
                    self.find_intersections(evaluator, flags, config);
                    self.manifold = corner_table(D::DIMS)[self.corners as usize];
                    let center = self.cell_center();
                    self.qef.solve(self.manifold, center);
                    self.vertex = self.qef.solution;
                    self.rank = self.qef.rank;
                }
            }
            CellKind::Empty | CellKind::Full => {}
        }
    }

    /// Edge intersections for every cell edge whose endpoints have
    /// differing signs (spec §4.5). Only called on `Leaf` cells with
    /// mixed corners.
    fn find_intersections<E: Evaluator>(&mut self, evaluator: &mut E, flags: Flags, config: &Config) {
        debug_assert_eq!(self.kind, CellKind::Leaf);
        for &(a, b, _axis) in cell_edges(D::DIMS) {
            let (a, b) = (a as usize, b as usize);
            let a_in = (self.corners >> a) & 1 == 1;
            let b_in = (self.corners >> b) & 1 == 1;
            if a_in == b_in {
                continue;
            }
            let pa = self.region.corner_position(a);
            let pb = self.region.corner_position(b);
            let (inside, outside) = if a_in { (pa, pb) } else { (pb, pa) };
            self.search_edge(evaluator, inside, outside, flags, config);
        }
    }

    /// Binary search for the zero crossing on `(inside, outside)`,
    /// followed by optional jitter, accumulating mass-point samples
    /// for every position visited and Hermite planes for the final
    /// sample set (spec §4.5).
    fn search_edge<E: Evaluator>(
        &mut self,
        evaluator: &mut E,
        mut inside: Vector3<f64>,
        mut outside: Vector3<f64>,
        flags: Flags,
        config: &Config,
    ) {
        let n = config.n.max(2);
        let iterations = (config.search_count / 4).max(1);

        for _ in 0..iterations {
            for i in 0..n {
                let t = i as f64 / (n - 1) as f64;
                evaluator.set(inside + (outside - inside) * t, i);
            }
            let values = evaluator.values(n);

            for i in 0..n {
                let t = i as f64 / (n - 1) as f64;
                self.qef.add_mass_sample(inside + (outside - inside) * t);
            }

            let mut crossing = n - 1;
            for (i, v) in values.iter().enumerate() {
                if *v >= 0.0 {
                    crossing = i;
                    break;
                }
            }
            if crossing == 0 {
                // The "inside" endpoint itself read as outside this
                // round (extreme undersampling); stop narrowing and
                // use the bracket as-is.
                break;
            }
            let t_prev = (crossing - 1) as f64 / (n - 1) as f64;
            let t_cur = crossing as f64 / (n - 1) as f64;
            let new_inside = inside + (outside - inside) * t_prev;
            let new_outside = inside + (outside - inside) * t_cur;
            inside = new_inside;
            outside = new_outside;
        }

        let mut samples = vec![inside];
        if !flags.no_jitter {
            let radius = (outside - inside).norm() / 10.0;
            let mut rng = rand::thread_rng();
            let extra = config.jitter_count.min(config.n).max(1) - 1;
            for _ in 0..extra {
                samples.push(inside + random_point_in_ball(&mut rng, D::DIMS, radius));
            }
        }

        for p in &samples {
            self.qef.add_mass_sample(*p);
        }

        for (i, p) in samples.iter().enumerate() {
            evaluator.set(*p, i);
        }
        let (_, dx, dy, dz) = evaluator.derivs(samples.len());
        for (i, p) in samples.iter().enumerate() {
            let grad = Vector3::new(dx[i] as f64, dy[i] as f64, dz[i] as f64);
            let normal = if grad.norm() > 1e-12 {
                grad.normalize()
            } else {
                Vector3::zeros()
            };
            self.qef.add_intersection(&Plane { p: *p, n: normal });
        }
    }

    /// Compose already-finalized top-level subtrees into one parent
    /// branch (spec §5): each subtree is built and finalized by its own
    /// worker/evaluator, and this stitches the `2^D::DIMS` results back
    /// into a single tree, attempting the same collapse a sequential
    /// build would have tried at this level.
    pub fn join(region: Subregion, children: Vec<XTree<D>>, flags: Flags, config: &Config) -> XTree<D> {
        debug_assert_eq!(children.len(), D::CORNERS);
        let level = 1 + children.iter().map(|c| c.level).max().unwrap_or(0);
        let mut corners: CornerMask = 0;
        for i in 0..D::CORNERS {
            if (children[i].corners as usize >> i) & 1 == 1 {
                corners |= 1 << i;
            }
        }
        let mut node = XTree {
            kind: CellKind::Branch,
            corners,
            children,
            vertex: Vector3::zeros(),
            rank: 0,
            manifold: false,
            level,
            qef: Qef::zero(),
            region,
            mesh_index: Cell::new(None),
            _dims: PhantomData,
        };
        if flags.collapse {
            node.collapse_branch(config);
        }
        node
    }

    /// Branch simplification (spec §4.7): collapses a branch into a
    /// leaf when all three safety conditions hold and the aggregated
    /// QEF's residual is below `config.collapse_error_threshold`.
    fn collapse_branch(&mut self, config: &Config) {
        debug_assert_eq!(self.kind, CellKind::Branch);

        if self.children.iter().all(|c| c.kind == CellKind::Empty) {
            self.kind = CellKind::Empty;
            self.children.clear();
            return;
        }
        if self.children.iter().all(|c| c.kind == CellKind::Full) {
            self.kind = CellKind::Full;
            self.children.clear();
            return;
        }
        if self.children.iter().any(|c| c.kind == CellKind::Branch) {
            return;
        }
        if !corner_table(D::DIMS)[self.corners as usize] {
            return;
        }
        if self
            .children
            .iter()
            .any(|c| c.kind == CellKind::Leaf && !c.manifold)
        {
            return;
        }

        let masks: Vec<CornerMask> = self
            .children
            .iter()
            .map(|c| match c.kind {
                CellKind::Empty => 0,
                CellKind::Full => full_mask(D::CORNERS),
                _ => c.corners,
            })
            .collect();
        if !leaf_topology(D::DIMS, &masks) {
            return;
        }

        let max_rank = self.children.iter().map(|c| c.rank).max().unwrap_or(0);
        let mut merged = Qef::zero();
        for child in &self.children {
            merged.add_matrices_from(&child.qef);
            if child.rank == max_rank {
                merged.add_mass_from(&child.qef);
            }
        }
        let center = self.cell_center();
        let error = merged.solve(true, center);
        if error.abs() < config.collapse_error_threshold {
            log::trace!("collapsed level-{} branch, residual {:.2e}", self.level, error);
            self.vertex = merged.solution;
            self.rank = merged.rank;
            self.manifold = true;
            self.qef = merged;
            self.kind = CellKind::Leaf;
            self.children.clear();
        }
    }
}
