//! Mesh and contour output types (spec §3 C9, §4.8).

use smallvec::SmallVec;

#[cfg(feature = "obj")]
use std::{error::Error, fs::File, io::Write, path::Path};

/// A polygon mesh of (mostly) quads and triangles, produced by walking
/// a finalized 3D [`crate::xtree::XTree`] (spec §4.8). Each face is a
/// CCW loop of distinct vertex indices around one sign-changing edge of
/// the tree; quads arise when all four cells bordering that edge carry
/// a vertex, triangles when two of them have collapsed to the same
/// cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f32; 3]>,
    pub faces: Vec<SmallVec<[usize; 4]>>,
}

impl Mesh {
    pub fn new() -> Mesh {
        Mesh {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Tessellates every face into triangles.
    pub fn to_triangle_mesh(&self) -> TriangleMesh {
        TriangleMesh {
            vertices: self.vertices.clone(),
            faces: self
                .faces
                .iter()
                .flat_map(|face| {
                    if face.len() == 4 {
                        vec![[face[0], face[1], face[2]], [face[2], face[3], face[0]]]
                    } else {
                        vec![[face[0], face[1], face[2]]]
                    }
                })
                .collect(),
        }
    }

    /// The mesh's topology as two flat buffers: per-face arity, then
    /// the concatenated vertex indices.
    pub fn flat_topology(&self) -> (Vec<usize>, Vec<usize>) {
        let mut face_arities = Vec::with_capacity(self.faces.len());
        let faces = self
            .faces
            .iter()
            .flat_map(|face| {
                face_arities.push(face.len());
                face.clone()
            })
            .collect();
        (face_arities, faces)
    }

    /// Renders the mesh as a
    /// [Wavefront OBJ](https://en.wikipedia.org/wiki/Wavefront_.obj_file)
    /// buffer. `reverse_face_winding` flips every face for use in a
    /// left-handed target coordinate system.
    #[cfg(feature = "obj")]
    pub fn to_obj(&self, reverse_face_winding: bool) -> Result<Vec<u8>, Box<dyn Error>> {
        let mut file = Vec::new();
        writeln!(file, "o xtree_dc")?;
        for v in &self.vertices {
            writeln!(file, "v {} {} {}", v[0], v[1], v[2])?;
        }
        for face in &self.faces {
            write!(file, "f")?;
            if reverse_face_winding {
                for i in face.iter().rev() {
                    write!(file, " {}", i + 1)?;
                }
            } else {
                for i in face.iter() {
                    write!(file, " {}", i + 1)?;
                }
            }
            writeln!(file)?;
        }
        Ok(file)
    }

    #[cfg(feature = "obj")]
    pub fn export_as_obj(
        &self,
        destination: &Path,
        reverse_face_winding: bool,
    ) -> Result<(), Box<dyn Error>> {
        let mut file = File::create(destination)?;
        file.write_all(&self.to_obj(reverse_face_winding)?)?;
        file.flush()?;
        Ok(())
    }
}

impl Default for Mesh {
    fn default() -> Mesh {
        Mesh::new()
    }
}

/// A pure-triangle mesh, as produced by [`Mesh::to_triangle_mesh`].
#[derive(Clone, Debug, PartialEq)]
pub struct TriangleMesh {
    pub vertices: Vec<[f32; 3]>,
    pub faces: Vec<[usize; 3]>,
}

impl From<Mesh> for TriangleMesh {
    fn from(mesh: Mesh) -> Self {
        mesh.to_triangle_mesh()
    }
}

impl TriangleMesh {
    pub fn flat_topology(&self) -> Vec<usize> {
        self.faces.iter().flat_map(|f| f.to_vec()).collect()
    }

    pub fn normal(&self, face: usize) -> [f32; 3] {
        let v: Vec<[f32; 3]> = self.faces[face].iter().map(|&i| self.vertices[i]).collect();
        let e1 = [v[1][0] - v[0][0], v[1][1] - v[0][1], v[1][2] - v[0][2]];
        let e2 = [v[2][0] - v[0][0], v[2][1] - v[0][1], v[2][2] - v[0][2]];
        let cross = [
            e1[1] * e2[2] - e1[2] * e2[1],
            e1[2] * e2[0] - e1[0] * e2[2],
            e1[0] * e2[1] - e1[1] * e2[0],
        ];
        let len = (cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2]).sqrt();
        if len > 0.0 {
            [cross[0] / len, cross[1] / len, cross[2] / len]
        } else {
            [0.0, 0.0, 0.0]
        }
    }
}

/// Output of walking a finalized 2D [`crate::xtree::XTree`] (spec
/// §4.8): a set of polylines, each an ordered run of distinct vertex
/// indices, open or closed depending on whether the contour exits the
/// sampled region.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Contours {
    pub vertices: Vec<[f32; 2]>,
    pub segments: Vec<[usize; 2]>,
}

impl Contours {
    pub fn new() -> Contours {
        Contours::default()
    }

    /// Chain the unordered `segments` into polylines of consecutive
    /// vertex indices. A polyline is closed when its last vertex equals
    /// its first.
    pub fn polylines(&self) -> Vec<Vec<usize>> {
        let mut adjacency: std::collections::HashMap<usize, Vec<usize>> =
            std::collections::HashMap::new();
        for &[a, b] in &self.segments {
            adjacency.entry(a).or_default().push(b);
            adjacency.entry(b).or_default().push(a);
        }
        let mut visited_edges: std::collections::HashSet<(usize, usize)> = Default::default();
        let mut lines = Vec::new();

        for &[start_a, start_b] in &self.segments {
            if visited_edges.contains(&(start_a, start_b)) || visited_edges.contains(&(start_b, start_a)) {
                continue;
            }
            let mut line = vec![start_a, start_b];
            visited_edges.insert((start_a, start_b));
            loop {
                let last = *line.last().unwrap();
                let prev = line[line.len() - 2];
                let next = adjacency
                    .get(&last)
                    .into_iter()
                    .flatten()
                    .find(|&&n| n != prev && !visited_edges.contains(&(last, n)) && !visited_edges.contains(&(n, last)));
                match next {
                    Some(&n) => {
                        visited_edges.insert((last, n));
                        line.push(n);
                        if n == line[0] {
                            break;
                        }
                    }
                    None => break,
                }
            }
            lines.push(line);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_triangulates_into_two_triangles() {
        let mut m = Mesh::new();
        m.vertices = vec![[0., 0., 0.], [1., 0., 0.], [1., 1., 0.], [0., 1., 0.]];
        m.faces.push(SmallVec::from_slice(&[0, 1, 2, 3]));
        let tri = m.to_triangle_mesh();
        assert_eq!(tri.faces.len(), 2);
    }

    #[test]
    fn triangle_normal_points_along_z() {
        let tri = TriangleMesh {
            vertices: vec![[0., 0., 0.], [1., 0., 0.], [0., 1., 0.]],
            faces: vec![[0, 1, 2]],
        };
        let n = tri.normal(0);
        assert!((n[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn closed_square_chains_into_one_loop() {
        let mut c = Contours::new();
        c.vertices = vec![[0., 0.], [1., 0.], [1., 1.], [0., 1.]];
        c.segments = vec![[0, 1], [1, 2], [2, 3], [3, 0]];
        let lines = c.polylines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 5);
        assert_eq!(lines[0].first(), lines[0].last());
    }
}
