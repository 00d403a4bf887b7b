//! Neutral in-memory scene representation.
//!
//! The glTF importer produces this; both emitters consume it. One
//! [`MeshBuilder`] per imported primitive, paired with the world transform
//! of the node that instanced it.

use std::fmt::Write as _;
use std::path::PathBuf;

use glam::DMat4;

/// PBR metallic-roughness material bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialRef {
    pub name: String,
    /// RGBA, each clamped to [0, 1].
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: [f32; 3],
    pub double_sided: bool,
    pub base_color_texture: Option<PathBuf>,
    pub metallic_roughness_texture: Option<PathBuf>,
    pub normal_texture: Option<PathBuf>,
    pub occlusion_texture: Option<PathBuf>,
    pub emissive_texture: Option<PathBuf>,
    /// UV tiling, `(1, 1)` when untiled.
    pub uv_repeat: [f32; 2],
}

impl Default for MaterialRef {
    fn default() -> Self {
        MaterialRef {
            name: String::new(),
            base_color_factor: [1.0, 1.0, 1.0, 1.0],
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            emissive_factor: [0.0, 0.0, 0.0],
            double_sided: false,
            base_color_texture: None,
            metallic_roughness_texture: None,
            normal_texture: None,
            occlusion_texture: None,
            emissive_texture: None,
            uv_repeat: [1.0, 1.0],
        }
    }
}

impl MaterialRef {
    /// Canonical key over every component; used to deduplicate materials
    /// in both emitters.
    pub fn dedup_key(&self) -> String {
        let mut key = String::new();
        for v in self.base_color_factor {
            let _ = write!(key, "{v:.3};");
        }
        let _ = write!(key, "{:.3};{:.3};", self.metallic_factor, self.roughness_factor);
        for v in self.emissive_factor {
            let _ = write!(key, "{v:.3};");
        }
        let _ = write!(key, "{};", self.double_sided);
        for tex in [
            &self.base_color_texture,
            &self.metallic_roughness_texture,
            &self.normal_texture,
            &self.occlusion_texture,
            &self.emissive_texture,
        ] {
            match tex {
                Some(path) => {
                    let _ = write!(key, "{};", path.display());
                }
                None => key.push(';'),
            }
        }
        let _ = write!(key, "{:.3};{:.3}", self.uv_repeat[0], self.uv_repeat[1]);
        key
    }
}

/// Triangle geometry for one imported primitive.
#[derive(Debug, Clone, Default)]
pub struct MeshBuilder {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tangents: Vec<[f32; 4]>,
    /// glTF-convention texture coordinates (V already flipped on import).
    pub uvs: Vec<[f32; 2]>,
    /// Triangle list indices into the vertex arrays.
    pub indices: Vec<u32>,
    pub material: MaterialRef,
}

impl MeshBuilder {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// An imported model: primitive builders with their node world transforms.
#[derive(Debug, Default)]
pub struct NeutralScene {
    pub name: String,
    pub meshes: Vec<(MeshBuilder, DMat4)>,
}

impl NeutralScene {
    pub fn is_empty(&self) -> bool {
        self.meshes.iter().all(|(m, _)| m.triangle_count() == 0)
    }
}

/// Maps a texture uri from model metadata to a file on disk.
///
/// Implemented by the exporter's texture index; a no-op resolver is useful
/// in tests.
pub trait TextureResolver {
    fn resolve(&self, uri: &str) -> Option<PathBuf>;
}

/// Resolver that never finds anything.
pub struct NullResolver;

impl TextureResolver for NullResolver {
    fn resolve(&self, _uri: &str) -> Option<PathBuf> {
        None
    }
}
