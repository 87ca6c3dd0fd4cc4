//! Region / Subregion (spec §3, §4.1 — component C1).

use nalgebra::Vector3;

use crate::error::{Error, Result};

fn pow2_roundup(mut x: u32) -> u32 {
    if x <= 1 {
        return 1;
    }
    x -= 1;
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    x |= x >> 8;
    x |= x >> 16;
    x + 1
}

/// The bounded region a front-end asks the core to tessellate:
/// an axis-aligned box plus a uniform voxel resolution.
#[derive(Clone, Copy, Debug)]
pub struct Region {
    pub lower: Vector3<f64>,
    pub upper: Vector3<f64>,
    /// Voxels per unit length.
    pub res: f64,
}

impl Region {
    /// Validate and build a region. Rejects non-positive resolution and
    /// any axis with `lower > upper`, per spec §7.
    pub fn new(
        x_lo: f64,
        x_hi: f64,
        y_lo: f64,
        y_hi: f64,
        z_lo: f64,
        z_hi: f64,
        res: f64,
    ) -> Result<Region> {
        if !(res > 0.0) {
            return Err(Error::InvalidRegion(format!(
                "resolution must be positive, got {}",
                res
            )));
        }
        if x_lo > x_hi || y_lo > y_hi || z_lo > z_hi {
            return Err(Error::InvalidRegion(format!(
                "inverted interval: x=[{}, {}] y=[{}, {}] z=[{}, {}]",
                x_lo, x_hi, y_lo, y_hi, z_lo, z_hi
            )));
        }
        Ok(Region {
            lower: Vector3::new(x_lo, y_lo, z_lo),
            upper: Vector3::new(x_hi, y_hi, z_hi),
            res,
        })
    }

    /// Pad the first `dims` axes to a common power-of-two voxel count,
    /// anchored at `lower`, so recursive even splits terminate exactly
    /// at single voxels (spec §4.1).
    pub fn to_subregion(&self, dims: usize) -> Subregion {
        debug_assert!(dims == 2 || dims == 3);
        let voxel_size = 1.0 / self.res;
        let raw: Vec<u32> = (0..dims)
            .map(|a| {
                let span = self.upper[a] - self.lower[a];
                ((span * self.res).ceil() as i64).max(1) as u32
            })
            .collect();
        let padded = pow2_roundup(*raw.iter().max().unwrap_or(&1));

        let mut voxels = [1u32, 1, 1];
        for a in 0..dims {
            voxels[a] = padded;
        }
        Subregion {
            corner: self.lower,
            voxels,
            voxel_size,
            dims,
        }
    }
}

/// A node's extent in the recursive subdivision: a world-space corner
/// plus per-axis discretized voxel counts. All axes that participate in
/// subdivision (the first `dims` axes) have equal power-of-two lengths
/// at the root, which is why `split_even` can always bisect exactly.
#[derive(Clone, Copy, Debug)]
pub struct Subregion {
    pub corner: Vector3<f64>,
    pub voxels: [u32; 3],
    pub voxel_size: f64,
    pub dims: usize,
}

impl Subregion {
    pub fn size_world(&self) -> Vector3<f64> {
        Vector3::new(
            self.voxels[0] as f64 * self.voxel_size,
            self.voxels[1] as f64 * self.voxel_size,
            if self.dims == 3 {
                self.voxels[2] as f64 * self.voxel_size
            } else {
                0.0
            },
        )
    }

    /// True when any subdividing axis still spans more than one voxel.
    pub fn can_split(&self) -> bool {
        (0..self.dims).any(|a| self.voxels[a] > 1)
    }

    /// True when all `dims` subdivision axes span more than one voxel,
    /// i.e. an even split across all of them is possible.
    pub fn can_split_even(&self, dims: usize) -> bool {
        (0..dims).all(|a| self.voxels[a] > 1)
    }

    /// Split into `2^dims` subregions indexed by the same corner
    /// numbering used for cell corners (spec §3): bit `i` of the index
    /// picks the high half of axis `i`.
    pub fn split_even(&self, dims: usize) -> Vec<Subregion> {
        debug_assert!(self.can_split_even(dims));
        let mut half = self.voxels;
        for a in 0..dims {
            half[a] = self.voxels[a] / 2;
        }
        let count = 1usize << dims;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let mut corner = self.corner;
            for a in 0..dims {
                if (i >> a) & 1 == 1 {
                    corner[a] += half[a] as f64 * self.voxel_size;
                }
            }
            out.push(Subregion {
                corner,
                voxels: half,
                voxel_size: self.voxel_size,
                dims: self.dims,
            });
        }
        out
    }

    /// World-space position of cell corner `corner_index` (spec §3's
    /// fixed corner numbering: bit `i` selects the high side of axis
    /// `i`; `0` = low side).
    pub fn corner_position(&self, corner_index: usize) -> Vector3<f64> {
        let mut p = self.corner;
        for a in 0..self.dims {
            if (corner_index >> a) & 1 == 1 {
                p[a] += self.voxels[a] as f64 * self.voxel_size;
            }
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_input() {
        assert!(Region::new(0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0).is_err());
        assert!(Region::new(0.0, 1.0, 0.0, 1.0, 0.0, 1.0, -1.0).is_err());
        assert!(Region::new(1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0).is_err());
        assert!(Region::new(0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0).is_ok());
    }

    #[test]
    fn pads_to_power_of_two() {
        let r = Region::new(0.0, 3.0, 0.0, 3.0, 0.0, 3.0, 1.0).unwrap();
        let s = r.to_subregion(3);
        assert_eq!(s.voxels, [4, 4, 4]);
        assert!(s.can_split_even(3));
    }

    #[test]
    fn split_even_preserves_total_extent() {
        let r = Region::new(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 1.0).unwrap();
        let s = r.to_subregion(3);
        let children = s.split_even(3);
        assert_eq!(children.len(), 8);
        for c in &children {
            assert_eq!(c.voxels[0], s.voxels[0] / 2);
        }
    }

    #[test]
    fn degenerate_2d_axis_has_single_voxel() {
        let r = Region::new(-1.0, 1.0, -1.0, 1.0, 0.0, 0.0, 1.0).unwrap();
        let s = r.to_subregion(2);
        assert_eq!(s.voxels[2], 1);
        assert_eq!(s.size_world().z, 0.0);
    }
}
