//! AC3D (v11 ASCII) tile model emitter.
//!
//! The tile's instanced primitives merge into one `OBJECT world` with one
//! `OBJECT poly` child per primitive instantiation. Vertex pools are
//! deduplicated by 0.1 mm quantization, materials by a canonical
//! component key with `DefaultWhite` pinned at index 0. PBR inputs map
//! lossily onto AC3D's fixed-function material model.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use glam::{DMat4, DVec3};
use thiserror::Error;

use crate::export::texture::TextureCopier;
use crate::models::scene::{MaterialRef, MeshBuilder};

#[derive(Debug, Error)]
pub enum AcError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Fixed-function AC3D material.
#[derive(Debug, Clone, PartialEq)]
pub struct AcMaterial {
    pub name: String,
    pub diffuse: [f32; 3],
    pub ambient: [f32; 3],
    pub emissive: [f32; 3],
    pub specular: [f32; 3],
    pub shininess: i32,
    pub transparency: f32,
}

impl AcMaterial {
    /// The implicit material every AC3D model starts with.
    pub fn default_white() -> Self {
        AcMaterial {
            name: "DefaultWhite".to_string(),
            diffuse: [1.0, 1.0, 1.0],
            ambient: [0.2, 0.2, 0.2],
            emissive: [0.0, 0.0, 0.0],
            specular: [0.04, 0.04, 0.04],
            shininess: 0,
            transparency: 0.0,
        }
    }

    /// Lossy PBR → fixed-function mapping.
    pub fn from_pbr(material: &MaterialRef) -> Self {
        let [r, g, b, a] = material.base_color_factor;
        let diffuse = [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)];
        let specular = 0.04 + material.metallic_factor * 0.5;
        let shininess = (((1.0 - material.roughness_factor) * 128.0).round() as i32).clamp(0, 128);
        AcMaterial {
            name: if material.name.is_empty() {
                "material".to_string()
            } else {
                material.name.replace('"', "")
            },
            diffuse,
            ambient: [diffuse[0] * 0.2, diffuse[1] * 0.2, diffuse[2] * 0.2],
            emissive: material.emissive_factor,
            specular: [specular, specular, specular],
            shininess,
            transparency: 1.0 - a.clamp(0.0, 1.0),
        }
    }

    /// Canonical key over the numeric components (3 decimals).
    fn dedup_key(&self) -> String {
        let mut key = String::new();
        for group in [&self.diffuse, &self.ambient, &self.emissive, &self.specular] {
            for v in *group {
                let _ = write!(key, "{v:.3};");
            }
        }
        let _ = write!(key, "{};{:.3}", self.shininess, self.transparency);
        key
    }
}

/// One triangle with per-corner texture coordinates.
#[derive(Debug, Clone, Copy)]
struct AcSurface {
    refs: [u32; 3],
    uvs: [[f32; 2]; 3],
}

/// One `OBJECT poly`: a deduplicated vertex pool plus its surfaces.
#[derive(Debug)]
pub struct AcPoly {
    name: String,
    texture: Option<String>,
    texrep: Option<[f32; 2]>,
    material_index: usize,
    double_sided: bool,
    vertices: Vec<DVec3>,
    vertex_index: HashMap<(i64, i64, i64), u32>,
    surfaces: Vec<AcSurface>,
}

impl AcPoly {
    /// Quantization for vertex dedup keys: 1/10000 m.
    fn quantize(v: DVec3) -> (i64, i64, i64) {
        (
            (v.x * 10_000.0).round() as i64,
            (v.y * 10_000.0).round() as i64,
            (v.z * 10_000.0).round() as i64,
        )
    }

    fn vertex(&mut self, v: DVec3) -> u32 {
        let key = Self::quantize(v);
        if let Some(&index) = self.vertex_index.get(&key) {
            return index;
        }
        let index = self.vertices.len() as u32;
        self.vertices.push(v);
        self.vertex_index.insert(key, index);
        index
    }
}

/// Composite AC3D model for one tile.
pub struct AcModel {
    materials: Vec<AcMaterial>,
    material_index: HashMap<String, usize>,
    polys: Vec<AcPoly>,
    pub textures: TextureCopier,
}

impl Default for AcModel {
    fn default() -> Self {
        Self::new()
    }
}

impl AcModel {
    pub fn new() -> Self {
        let default_white = AcMaterial::default_white();
        let mut material_index = HashMap::new();
        material_index.insert(default_white.dedup_key(), 0);
        AcModel {
            materials: vec![default_white],
            material_index,
            polys: Vec::new(),
            textures: TextureCopier::new(),
        }
    }

    fn material(&mut self, material: &MaterialRef) -> usize {
        let mapped = AcMaterial::from_pbr(material);
        let key = mapped.dedup_key();
        if let Some(&index) = self.material_index.get(&key) {
            return index;
        }
        let index = self.materials.len();
        self.materials.push(mapped);
        self.material_index.insert(key, index);
        index
    }

    pub fn is_empty(&self) -> bool {
        self.polys.is_empty()
    }

    /// Merge one primitive instance transformed into the AC3D frame.
    ///
    /// `transform` is the flip-sandwiched placement * node transform; the
    /// writer's X negation happens at serialization time.
    pub fn add_mesh(&mut self, mesh: &MeshBuilder, transform: DMat4) {
        if mesh.indices.len() < 3 {
            return;
        }
        let material_index = self.material(&mesh.material);
        let texture = mesh
            .material
            .base_color_texture
            .as_deref()
            .map(|path| self.textures.register(path));
        let repeat = mesh.material.uv_repeat;
        let texrep = (repeat != [1.0, 1.0]).then_some(repeat);

        let mut poly = AcPoly {
            name: mesh.name.replace('"', ""),
            texture,
            texrep,
            material_index,
            double_sided: mesh.material.double_sided,
            vertices: Vec::new(),
            vertex_index: HashMap::new(),
            surfaces: Vec::new(),
        };

        let uv_of = |index: u32| -> [f32; 2] {
            mesh.uvs
                .get(index as usize)
                .map(|uv| [uv[0], 1.0 - uv[1]])
                .unwrap_or([0.0, 0.0])
        };

        for tri in mesh.indices.chunks_exact(3) {
            let mut refs = [0u32; 3];
            let mut uvs = [[0.0f32; 2]; 3];
            for (slot, &index) in refs.iter_mut().zip(tri) {
                let p = mesh.positions[index as usize];
                let world =
                    transform.transform_point3(DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64));
                *slot = poly.vertex(world);
            }
            for (slot, &index) in uvs.iter_mut().zip(tri) {
                *slot = uv_of(index);
            }
            poly.surfaces.push(AcSurface { refs, uvs });
        }

        self.polys.push(poly);
    }

    /// Serialize to AC3D text.
    pub fn to_string(&self) -> String {
        let mut out = String::new();
        out.push_str("AC3Db\n");
        for m in &self.materials {
            let _ = writeln!(
                out,
                "MATERIAL \"{}\" rgb {:.3} {:.3} {:.3}  amb {:.3} {:.3} {:.3}  emis {:.3} {:.3} {:.3}  spec {:.3} {:.3} {:.3}  shi {}  trans {:.3}",
                m.name,
                m.diffuse[0], m.diffuse[1], m.diffuse[2],
                m.ambient[0], m.ambient[1], m.ambient[2],
                m.emissive[0], m.emissive[1], m.emissive[2],
                m.specular[0], m.specular[1], m.specular[2],
                m.shininess,
                m.transparency,
            );
        }
        out.push_str("OBJECT world\nname \"world\"\n");
        let _ = writeln!(out, "kids {}", self.polys.len());
        for poly in &self.polys {
            out.push_str("OBJECT poly\n");
            let _ = writeln!(out, "name \"{}\"", poly.name);
            if let Some(texture) = &poly.texture {
                let _ = writeln!(out, "texture \"{texture}\"");
            }
            if let Some([u, v]) = poly.texrep {
                let _ = writeln!(out, "texrep {u} {v}");
            }
            out.push_str("crease 30.0\n");
            let _ = writeln!(out, "numvert {}", poly.vertices.len());
            for v in &poly.vertices {
                // AC3D expects the X axis mirrored relative to the tile
                // frame the vertices were baked in.
                let _ = writeln!(out, "{:.4} {:.4} {:.4}", -v.x, v.y, v.z);
            }
            let _ = writeln!(out, "numsurf {}", poly.surfaces.len());
            let flags = if poly.double_sided { 0x30 } else { 0x10 };
            for surface in &poly.surfaces {
                let _ = writeln!(out, "SURF {flags:#x}");
                let _ = writeln!(out, "mat {}", poly.material_index);
                out.push_str("refs 3\n");
                for (r, uv) in surface.refs.iter().zip(&surface.uvs) {
                    let _ = writeln!(out, "{} {:.6} {:.6}", r, uv[0], uv[1]);
                }
            }
            out.push_str("kids 0\n");
        }
        out
    }

    /// Write the `.ac` file and copy its textures next to it.
    pub fn write_to_file(&self, path: &Path) -> Result<(), AcError> {
        let io_err = |source: std::io::Error| AcError::Io {
            path: path.display().to_string(),
            source,
        };
        let mut file = std::fs::File::create(path).map_err(io_err)?;
        file.write_all(self.to_string().as_bytes()).map_err(io_err)?;
        if let Some(dir) = path.parent() {
            self.textures.copy_all(dir);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn triangle_mesh() -> MeshBuilder {
        MeshBuilder {
            name: "tri".to_string(),
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            uvs: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            indices: vec![0, 1, 2],
            ..MeshBuilder::default()
        }
    }

    #[test]
    fn default_white_is_index_zero() {
        let model = AcModel::new();
        assert_eq!(model.materials[0].name, "DefaultWhite");
        let text = model.to_string();
        assert!(text.starts_with("AC3Db\n"));
        assert!(text.contains("MATERIAL \"DefaultWhite\""));
    }

    #[test]
    fn vertex_pool_dedup_is_exact_at_quantization() {
        let mut model = AcModel::new();
        let mut mesh = triangle_mesh();
        // Second triangle shares an edge; one vertex differs by less than
        // the quantization step.
        mesh.positions.push([1.000_04, 0.0, 0.000_02]);
        mesh.positions.push([1.0, 1.0, 0.0]);
        mesh.indices.extend_from_slice(&[3, 4, 2]);
        model.add_mesh(&mesh, DMat4::IDENTITY);
        let poly = &model.polys[0];
        // 5 positions, but index 3 quantizes onto index 1.
        assert_eq!(poly.vertices.len(), 4);
        assert_eq!(poly.surfaces[1].refs[0], poly.surfaces[0].refs[1]);
    }

    #[test]
    fn materials_dedup_by_component_key() {
        let mut model = AcModel::new();
        let mut mesh_a = triangle_mesh();
        mesh_a.material.metallic_factor = 0.0;
        mesh_a.material.roughness_factor = 0.5;
        let mut mesh_b = triangle_mesh();
        mesh_b.material.metallic_factor = 0.0;
        mesh_b.material.roughness_factor = 0.5;
        mesh_b.material.name = "differently named".to_string();
        model.add_mesh(&mesh_a, DMat4::IDENTITY);
        model.add_mesh(&mesh_b, DMat4::IDENTITY);
        assert_eq!(model.materials.len(), 2); // DefaultWhite + one shared
        assert_eq!(model.polys[0].material_index, model.polys[1].material_index);
    }

    #[test]
    fn writer_negates_x_and_inverts_v() {
        let mut model = AcModel::new();
        model.add_mesh(&triangle_mesh(), DMat4::IDENTITY);
        let text = model.to_string();
        assert!(text.contains("-1.0000 0.0000 0.0000"), "{text}");
        // UV (0,1) with import-flipped V emits V inverted again: 0.
        assert!(text.contains("2 0.000000 0.000000"), "{text}");
        assert!(text.contains("OBJECT world"));
        assert!(text.contains("kids 1\n"));
        assert!(text.contains("SURF 0x10"));
    }

    #[test]
    fn pbr_material_mapping() {
        let mut material = MaterialRef::default();
        material.base_color_factor = [0.5, 0.25, 1.5, 0.8];
        material.metallic_factor = 1.0;
        material.roughness_factor = 0.25;
        material.emissive_factor = [0.1, 0.2, 0.3];
        let ac = AcMaterial::from_pbr(&material);
        assert_eq!(ac.diffuse, [0.5, 0.25, 1.0]);
        assert_eq!(ac.ambient, [0.1, 0.05, 0.2]);
        assert!((ac.specular[0] - 0.54).abs() < 1e-6);
        assert_eq!(ac.shininess, 96);
        assert!((ac.transparency - 0.2).abs() < 1e-6);
        assert_eq!(ac.emissive, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn double_sided_sets_surface_flag() {
        let mut model = AcModel::new();
        let mut mesh = triangle_mesh();
        mesh.material.double_sided = true;
        model.add_mesh(&mesh, DMat4::IDENTITY);
        assert!(model.to_string().contains("SURF 0x30"));
    }

    #[test]
    fn texture_registration_writes_texture_line() {
        let mut model = AcModel::new();
        let mut mesh = triangle_mesh();
        mesh.material.base_color_texture = Some(PathBuf::from("/assets/roof.dds"));
        model.add_mesh(&mesh, DMat4::IDENTITY);
        assert!(model.to_string().contains("texture \"roof.dds\""));
    }
}
