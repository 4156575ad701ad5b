use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use glam::Vec3;

/// Floats per interleaved vertex: position followed by normal.
pub const VERTEX_STRIDE: usize = 6;

/// Indexed triangle mesh with interleaved `position.xyz, normal.xyz` vertices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / VERTEX_STRIDE
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Reads an OBJ file from disk.
    pub fn load_obj(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read {}", path.display()))?;
        Self::parse_obj(&text).with_context(|| format!("failed to parse OBJ mesh {}", path.display()))
    }

    /// Parses the `v`, `vn` and `f` records of an OBJ document.
    ///
    /// Polygons are fan-triangulated. Texture coordinates and every other
    /// record type are ignored. Vertices without a normal get a smooth one
    /// generated from their faces; normals from the file are kept.
    pub fn parse_obj(text: &str) -> Result<Self> {
        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut corners: Vec<Corner> = Vec::new();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            let mut fields = line.split_whitespace();
            let record = match fields.next() {
                Some(record) if !record.starts_with('#') => record,
                _ => continue,
            };
            let line_no = number + 1;
            match record {
                "v" => positions.push(
                    parse_vec3(fields).with_context(|| format!("bad vertex on line {line_no}"))?,
                ),
                "vn" => normals.push(
                    parse_vec3(fields).with_context(|| format!("bad normal on line {line_no}"))?,
                ),
                "f" => {
                    let polygon = fields
                        .map(|field| parse_corner(field, positions.len(), normals.len()))
                        .collect::<Result<Vec<_>>>()
                        .with_context(|| format!("bad face on line {line_no}"))?;
                    if polygon.len() < 3 {
                        bail!("face on line {line_no} has fewer than 3 corners");
                    }
                    for i in 1..polygon.len() - 1 {
                        corners.extend_from_slice(&[polygon[0], polygon[i], polygon[i + 1]]);
                    }
                }
                _ => {}
            }
        }

        if positions.is_empty() {
            bail!("OBJ document defines no vertices");
        }

        let mut mesh = Mesh::default();
        let mut seen: HashMap<Corner, u32> = HashMap::new();
        let mut missing = Vec::new();
        for corner in corners {
            let next = mesh.vertex_count() as u32;
            let index = *seen.entry(corner).or_insert_with(|| {
                let position = positions[corner.position];
                missing.push(corner.normal.is_none());
                let normal = corner.normal.map_or(Vec3::ZERO, |i| normals[i]);
                mesh.vertices.extend_from_slice(&position.to_array());
                mesh.vertices.extend_from_slice(&normal.to_array());
                next
            });
            mesh.indices.push(index);
        }

        if missing.contains(&true) {
            mesh.smooth_normals_where(&missing);
        }
        Ok(mesh)
    }

    /// Replaces every normal with the area-weighted average of its faces.
    pub fn smooth_normals(&mut self) {
        let all = vec![true; self.vertex_count()];
        self.smooth_normals_where(&all);
    }

    /// Like [`Mesh::smooth_normals`], but only vertices flagged in `targets`
    /// are rewritten.
    fn smooth_normals_where(&mut self, targets: &[bool]) {
        let mut sums = vec![Vec3::ZERO; self.vertex_count()];
        for triangle in self.indices.chunks_exact(3) {
            let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
            if !(targets[a] || targets[b] || targets[c]) {
                continue;
            }
            let face = (self.position(b) - self.position(a)).cross(self.position(c) - self.position(a));
            for vertex in [a, b, c] {
                sums[vertex] += face;
            }
        }
        let vertices = self.vertices.chunks_exact_mut(VERTEX_STRIDE);
        for ((vertex, sum), &target) in vertices.zip(sums).zip(targets) {
            if target {
                vertex[3..6].copy_from_slice(&sum.normalize_or_zero().to_array());
            }
        }
    }

    fn position(&self, index: usize) -> Vec3 {
        let start = index * VERTEX_STRIDE;
        Vec3::from_slice(&self.vertices[start..start + 3])
    }

    /// Unit cube centred on the origin with per-face normals.
    pub fn cube() -> Self {
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        ];
        let mut mesh = Mesh::default();
        for (normal, right, up) in faces {
            let base = mesh.vertex_count() as u32;
            let center = normal * 0.5;
            for (u, v) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
                let position = center + right * u + up * v;
                mesh.vertices.extend_from_slice(&position.to_array());
                mesh.vertices.extend_from_slice(&normal.to_array());
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Corner {
    position: usize,
    normal: Option<usize>,
}

fn parse_vec3<'a>(mut fields: impl Iterator<Item = &'a str>) -> Result<Vec3> {
    let mut component = || -> Result<f32> {
        let field = fields.next().ok_or_else(|| anyhow!("expected 3 components"))?;
        field
            .parse::<f32>()
            .with_context(|| format!("{field:?} is not a number"))
    };
    Ok(Vec3::new(component()?, component()?, component()?))
}

/// Parses `v`, `v/vt`, `v//vn` or `v/vt/vn`.
fn parse_corner(field: &str, position_count: usize, normal_count: usize) -> Result<Corner> {
    let mut parts = field.split('/');
    let position = parts
        .next()
        .filter(|part| !part.is_empty())
        .ok_or_else(|| anyhow!("corner {field:?} has no vertex index"))?;
    let position = resolve_index(position, position_count)?;
    let normal = match parts.nth(1) {
        Some(part) if !part.is_empty() => Some(resolve_index(part, normal_count)?),
        _ => None,
    };
    Ok(Corner { position, normal })
}

/// OBJ indices are 1-based; negative ones count back from the latest element.
fn resolve_index(raw: &str, count: usize) -> Result<usize> {
    let value: i64 = raw
        .parse()
        .with_context(|| format!("{raw:?} is not an index"))?;
    let resolved = match value {
        v if v > 0 => v - 1,
        v if v < 0 => count as i64 + v,
        _ => bail!("OBJ indices start at 1"),
    };
    if resolved < 0 || resolved >= count as i64 {
        bail!("index {value} is out of range for {count} elements");
    }
    Ok(resolved as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use tempfile::NamedTempFile;

    #[test]
    fn triangle_gets_generated_normals() {
        let mesh = Mesh::parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.vertex_count(), 3);
        for vertex in mesh.vertices.chunks_exact(VERTEX_STRIDE) {
            assert_eq!(&vertex[3..6], &[0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn file_normals_survive_next_to_generated_ones() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 1 1 0\nvn 0 0 -1\nf 1//1 2//1 3//1\nf 2 4 3\n";
        let mesh = Mesh::parse_obj(obj).unwrap();
        assert_eq!(mesh.vertex_count(), 6);
        for vertex in mesh.vertices.chunks_exact(VERTEX_STRIDE).take(3) {
            assert_eq!(&vertex[3..6], &[0.0, 0.0, -1.0]);
        }
        for vertex in mesh.vertices.chunks_exact(VERTEX_STRIDE).skip(3) {
            assert_eq!(&vertex[3..6], &[0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn quads_are_fan_triangulated_and_shared_corners_reused() {
        let obj = "# quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1 4//1\n";
        let mesh = Mesh::parse_obj(obj).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.vertex_count(), 4);
    }

    #[test]
    fn negative_indices_are_relative() {
        let mesh = Mesh::parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3/1 -2/2 -1/3\n").unwrap();
        assert_eq!(mesh.triangle_count(), 1);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(Mesh::parse_obj("").is_err());
        assert!(Mesh::parse_obj("v 0 0\n").is_err());
        assert!(Mesh::parse_obj("v 0 0 0\nv 1 0 0\nf 1 2\n").is_err());
        assert!(Mesh::parse_obj("v 0 0 0\nf 1 2 3\n").is_err());
        assert!(Mesh::parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 0 1 2\n").is_err());
    }

    #[test]
    fn cube_is_closed_with_outward_normals() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        for vertex in cube.vertices.chunks_exact(VERTEX_STRIDE) {
            let position = Vec3::from_slice(&vertex[0..3]);
            let normal = Vec3::from_slice(&vertex[3..6]);
            assert!(position.dot(normal) > 0.0);
        }
    }

    #[test]
    fn loads_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        let mesh = Mesh::load_obj(file.path()).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
        assert!(Mesh::load_obj(file.path().with_extension("missing")).is_err());
    }
}
