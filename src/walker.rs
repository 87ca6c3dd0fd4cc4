//! Dual contour walk (spec §3 C7, §4.8): turns a finalized [`XTree`]
//! into a [`Mesh`] (3D) or [`Contours`] (2D).
//!
//! Follows the Ju/Losasso/Schaefer/Hoppe cell/face/edge recursion:
//! `cell_proc` fans a branch out into its own face- and edge-adjacent
//! child pairs/quadruples, `face_proc`/`edge_proc` keep narrowing as
//! long as any participant is still a branch, and a quad (3D) or
//! segment (2D) is emitted once every participant has become a leaf.
//! Leaves of different depths are handled correctly because a
//! non-branch cell simply stands in for itself at every recursion
//! depth a finer neighbor still needs (`child_or_self`).
//!
//! The sign test at the final, fully-narrowed edge is re-evaluated
//! fresh through the [`Evaluator`] rather than trusting a possibly
//! much coarser leaf's own corner bits, since a collapsed leaf spans
//! more than one of the original finest voxels and its corner mask
//! only describes its own (large) box, not an interior point a finer
//! neighbor narrowed down to.

use nalgebra::Vector3;

use crate::eval::Evaluator;
use crate::mesh::{Contours, Mesh};
use crate::xtree::{CellKind, XTree};
use crate::{Dim2, Dim3};

fn child_or_self<'t, D: crate::Dims>(node: &'t XTree<D>, index: usize) -> &'t XTree<D> {
    if node.kind == CellKind::Branch {
        &node.children[index]
    } else {
        node
    }
}

fn build_index3(bits: [u8; 3]) -> usize {
    bits[0] as usize | ((bits[1] as usize) << 1) | ((bits[2] as usize) << 2)
}

fn other_axes(axis: usize) -> [usize; 2] {
    let mut out = [0usize; 2];
    let mut k = 0;
    for a in 0..3 {
        if a != axis {
            out[k] = a;
            k += 1;
        }
    }
    out
}

/// The plane perpendicular to a running axis `r`, ordered so that
/// `p x q == +r` (a cyclic permutation of x,y,z) for every `r`. Plain
/// index order (`other_axes`) only has this property for `r == 0` and
/// `r == 2`; `r == 1` comes out parity-flipped, which would otherwise
/// wind that axis's quads backwards relative to the other two.
fn running_plane_axes(r: usize) -> [usize; 2] {
    [(r + 1) % 3, (r + 2) % 3]
}

/// Gray-code order of (bit_a, bit_b) so that emitting the 4 slots in
/// this order walks around the shared edge consistently.
const GRAY4: [(u8, u8); 4] = [(0, 0), (1, 0), (1, 1), (0, 1)];

struct MeshBuilder {
    mesh: Mesh,
}

impl MeshBuilder {
    fn vertex_index(&mut self, cell: &XTree<Dim3>) -> Option<usize> {
        if cell.kind != CellKind::Leaf {
            return None;
        }
        if let Some(i) = cell.mesh_index.get() {
            return Some(i);
        }
        let v = cell.vertex;
        let i = self.mesh.vertices.len();
        self.mesh
            .vertices
            .push([v.x as f32, v.y as f32, v.z as f32]);
        cell.mesh_index.set(Some(i));
        Some(i)
    }

    fn emit_quad(&mut self, cells: [&XTree<Dim3>; 4], reverse: bool) {
        let mut indices = smallvec::SmallVec::<[usize; 4]>::new();
        for &c in &cells {
            let idx = match self.vertex_index(c) {
                Some(i) => i,
                None => return,
            };
            if !indices.contains(&idx) {
                indices.push(idx);
            }
        }
        if indices.len() < 3 {
            return;
        }
        if reverse {
            indices.reverse();
        }
        self.mesh.faces.push(indices);
    }
}

/// Walk a finalized 3D tree into a triangle/quad [`Mesh`].
pub fn walk_3d<E: Evaluator>(root: &XTree<Dim3>, evaluator: &mut E) -> Mesh {
    let mut builder = MeshBuilder { mesh: Mesh::new() };
    cell_proc_3d(root, evaluator, &mut builder);
    builder.mesh
}

fn cell_proc_3d<E: Evaluator>(node: &XTree<Dim3>, evaluator: &mut E, builder: &mut MeshBuilder) {
    if node.kind != CellKind::Branch {
        return;
    }
    for child in &node.children {
        cell_proc_3d(child, evaluator, builder);
    }

    for f in 0..3 {
        for i in 0..8 {
            if (i >> f) & 1 == 0 {
                let c0 = &node.children[i];
                let c1 = &node.children[i | (1 << f)];
                if c0.kind == CellKind::Branch || c1.kind == CellKind::Branch {
                    let face_lo = shared_face_bounds(c0, f);
                    face_proc_3d(c0, c1, f, face_lo, evaluator, builder);
                }
            }
        }
    }

    for r in 0..3 {
        let [p, q] = running_plane_axes(r);
        for h in 0..2u8 {
            let mut cells = [node; 4];
            let mut bits = [[0u8; 3]; 4];
            for (slot, &(pb, qb)) in GRAY4.iter().enumerate() {
                let mut b = [0u8; 3];
                b[r] = h;
                b[p] = pb;
                b[q] = qb;
                bits[slot] = b;
                cells[slot] = &node.children[build_index3(b)];
            }
            let (lo, hi) = running_edge_bounds(node.region.corner, node.region.size_world(), r, p, q, h);
            edge_proc_3d(cells, bits, r, lo, hi, evaluator, builder);
        }
    }
}

fn shared_face_bounds(low_side: &XTree<Dim3>, f: usize) -> Vector3<f64> {
    let corner = low_side.region.corner;
    let size = low_side.region.size_world();
    let mut lo = corner;
    lo[f] += size[f];
    lo
}

fn running_edge_bounds(
    corner: Vector3<f64>,
    size: Vector3<f64>,
    r: usize,
    p: usize,
    q: usize,
    h: u8,
) -> (Vector3<f64>, Vector3<f64>) {
    let mut lo = corner;
    lo[p] += size[p] * 0.5;
    lo[q] += size[q] * 0.5;
    let mut hi = lo;
    lo[r] += size[r] * 0.5 * h as f64;
    hi[r] += size[r] * 0.5 * (h as f64 + 1.0);
    (lo, hi)
}

#[allow(clippy::too_many_arguments)]
fn face_proc_3d<E: Evaluator>(
    c0: &XTree<Dim3>,
    c1: &XTree<Dim3>,
    f: usize,
    face_lo: Vector3<f64>,
    evaluator: &mut E,
    builder: &mut MeshBuilder,
) {
    let others = other_axes(f);
    let size0 = c0.region.size_world();

    for &(o1, o2) in GRAY4.iter() {
        let mut idx0 = [0u8; 3];
        idx0[f] = 1;
        idx0[others[0]] = o1;
        idx0[others[1]] = o2;
        let mut idx1 = idx0;
        idx1[f] = 0;
        let n0 = child_or_self(c0, build_index3(idx0));
        let n1 = child_or_self(c1, build_index3(idx1));
        if n0.kind == CellKind::Branch || n1.kind == CellKind::Branch {
            face_proc_3d(n0, n1, f, face_lo, evaluator, builder);
        }
    }

    for &r in &others {
        let b = others.iter().copied().find(|&a| a != r).unwrap();
        // `f` and `b` are the edge's two straddling axes; swap which
        // GRAY4 component drives which one so that, combined with `r`,
        // the triple keeps the same cyclic (+r) handedness as
        // `running_plane_axes` uses for a plain interior edge.
        let swap = f != (r + 1) % 3;
        for h in 0..2u8 {
            let mut cells = [c0; 4];
            let mut bits = [[0u8; 3]; 4];
            for (slot, &gray) in GRAY4.iter().enumerate() {
                let (side_bit, b_bit) = if swap { (gray.1, gray.0) } else { gray };
                let side_is_c1 = side_bit == 1;
                let mut bit = [0u8; 3];
                bit[f] = if side_is_c1 { 0 } else { 1 };
                bit[r] = h;
                bit[b] = b_bit;
                bits[slot] = bit;
                let side_cell = if side_is_c1 { c1 } else { c0 };
                cells[slot] = child_or_self(side_cell, build_index3(bit));
            }
            let mut lo = face_lo;
            lo[b] = c0.region.corner[b] + size0[b] * 0.5;
            let mut hi = lo;
            lo[r] = c0.region.corner[r] + size0[r] * 0.5 * h as f64;
            hi[r] = c0.region.corner[r] + size0[r] * 0.5 * (h as f64 + 1.0);
            edge_proc_3d(cells, bits, r, lo, hi, evaluator, builder);
        }
    }
}

fn edge_proc_3d<E: Evaluator>(
    cells: [&XTree<Dim3>; 4],
    bits: [[u8; 3]; 4],
    r: usize,
    lo: Vector3<f64>,
    hi: Vector3<f64>,
    evaluator: &mut E,
    builder: &mut MeshBuilder,
) {
    if cells.iter().all(|c| c.kind != CellKind::Branch) {
        evaluator.set(lo, 0);
        evaluator.set(hi, 1);
        let values = evaluator.values(2);
        let (lo_inside, hi_inside) = (values[0] < 0.0, values[1] < 0.0);
        if lo_inside == hi_inside {
            return;
        }
        // The (p, q) slot order is built so the unreversed winding's
        // normal (e1 x e2) points along +r; that is the outward normal
        // exactly when the field is increasing along +r, i.e. when hi
        // (not lo) is the inside endpoint.
        builder.emit_quad(cells, hi_inside);
        return;
    }

    for h in 0..2u8 {
        let mut new_cells = cells;
        for slot in 0..4 {
            let mut b = bits[slot];
            b[r] = h;
            new_cells[slot] = child_or_self(cells[slot], build_index3(b));
        }
        let mid = lo + (hi - lo) * 0.5;
        let (new_lo, new_hi) = if h == 0 { (lo, mid) } else { (mid, hi) };
        edge_proc_3d(new_cells, bits, r, new_lo, new_hi, evaluator, builder);
    }
}

struct ContourBuilder {
    contours: Contours,
}

impl ContourBuilder {
    fn vertex_index(&mut self, cell: &XTree<Dim2>) -> Option<usize> {
        if cell.kind != CellKind::Leaf {
            return None;
        }
        if let Some(i) = cell.mesh_index.get() {
            return Some(i);
        }
        let v = cell.vertex;
        let i = self.contours.vertices.len();
        self.contours.vertices.push([v.x as f32, v.y as f32]);
        cell.mesh_index.set(Some(i));
        Some(i)
    }
}

/// Walk a finalized 2D tree into a set of [`Contours`].
pub fn walk_2d<E: Evaluator>(root: &XTree<Dim2>, evaluator: &mut E) -> Contours {
    let mut builder = ContourBuilder {
        contours: Contours::new(),
    };
    cell_proc_2d(root, evaluator, &mut builder);
    builder.contours
}

fn cell_proc_2d<E: Evaluator>(node: &XTree<Dim2>, evaluator: &mut E, builder: &mut ContourBuilder) {
    if node.kind != CellKind::Branch {
        return;
    }
    for child in &node.children {
        cell_proc_2d(child, evaluator, builder);
    }
    for axis in 0..2 {
        for i in 0..4 {
            if (i >> axis) & 1 == 0 {
                let c0 = &node.children[i];
                let c1 = &node.children[i | (1 << axis)];
                if c0.kind == CellKind::Branch || c1.kind == CellKind::Branch {
                    let size = c0.region.size_world();
                    let r = 1 - axis;
                    let mut lo = c0.region.corner;
                    lo[axis] += size[axis];
                    let mut hi = lo;
                    hi[r] += size[r];
                    edge_proc_2d([c0, c1], axis, lo, hi, evaluator, builder);
                }
            }
        }
    }
}

fn edge_proc_2d<E: Evaluator>(
    cells: [&XTree<Dim2>; 2],
    axis: usize,
    lo: Vector3<f64>,
    hi: Vector3<f64>,
    evaluator: &mut E,
    builder: &mut ContourBuilder,
) {
    if cells.iter().all(|c| c.kind != CellKind::Branch) {
        evaluator.set(lo, 0);
        evaluator.set(hi, 1);
        let values = evaluator.values(2);
        let (lo_inside, hi_inside) = (values[0] < 0.0, values[1] < 0.0);
        if lo_inside == hi_inside {
            return;
        }
        let i0 = builder.vertex_index(cells[0]);
        let i1 = builder.vertex_index(cells[1]);
        if let (Some(mut a), Some(mut b)) = (i0, i1) {
            if a == b {
                return;
            }
            if !lo_inside {
                std::mem::swap(&mut a, &mut b);
            }
            builder.contours.segments.push([a, b]);
        }
        return;
    }

    let r = 1 - axis;
    for h in 0..2u8 {
        let build = |side_bit: u8| -> usize {
            let mut b = [0u8; 3];
            b[axis] = side_bit;
            b[r] = h;
            build_index3(b)
        };
        let n0 = child_or_self(cells[0], build(1));
        let n1 = child_or_self(cells[1], build(0));
        let mid = lo + (hi - lo) * 0.5;
        let (new_lo, new_hi) = if h == 0 { (lo, mid) } else { (mid, hi) };
        edge_proc_2d([n0, n1], axis, new_lo, new_hi, evaluator, builder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{Expr, TreeEvaluator};
    use crate::region::Region;
    use crate::xtree::XTree;
    use crate::{Config, Dim3, Flags};

    #[test]
    fn sphere_produces_a_closed_mesh() {
        let expr = (Expr::x().square() + Expr::y().square() + Expr::z().square()).sqrt()
            - Expr::constant(1.0);
        let mut evaluator = TreeEvaluator::new(&expr, 32);
        let region = Region::new(-1.5, 1.5, -1.5, 1.5, -1.5, 1.5, 8.0).unwrap();
        let sub = region.to_subregion(3);
        let config = Config::default();
        let flags = Flags {
            no_jitter: true,
            collapse: false,
        };
        let mut root = XTree::<Dim3>::populate_children(&mut evaluator, sub, flags, &config);
        root.finalize(&mut evaluator, flags, &config);

        let mesh = walk_3d(&root, &mut evaluator);
        assert!(!mesh.vertices.is_empty());
        assert!(!mesh.faces.is_empty());
        for face in &mesh.faces {
            assert!(face.len() >= 3);
        }
    }

    #[test]
    fn plane_produces_axis_aligned_quads() {
        let expr = Expr::z();
        let mut evaluator = TreeEvaluator::new(&expr, 32);
        let region = Region::new(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 4.0).unwrap();
        let sub = region.to_subregion(3);
        let config = Config::default();
        let flags = Flags {
            no_jitter: true,
            collapse: false,
        };
        let mut root = XTree::<Dim3>::populate_children(&mut evaluator, sub, flags, &config);
        root.finalize(&mut evaluator, flags, &config);
        let mesh = walk_3d(&root, &mut evaluator);
        assert!(!mesh.vertices.is_empty());
        for v in &mesh.vertices {
            assert!(v[2].abs() < 1e-3);
        }
    }
}
