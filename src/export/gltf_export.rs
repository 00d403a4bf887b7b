//! Composite glTF 2.0 tile emitter.
//!
//! Each imported model's primitives are written once (accessors into a
//! shared satellite `.bin`), then instanced per placement as nodes with
//! baked matrices. Images live as sibling files: the images array is
//! rebuilt deduplicated by resolved source path, every texture is
//! re-threaded through `MSFT_texture_dds`, and the referenced DDS files
//! are copied next to the output.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use glam::DMat4;
use gltf_json as json;
use json::validation::Checked::Valid;
use json::validation::USize64;
use serde_json::Value;

use crate::export::ExportError;
use crate::export::texture::TextureCopier;
use crate::models::scene::{MaterialRef, MeshBuilder, NeutralScene};

/// A model registered with the builder: one glTF mesh per primitive, each
/// with the node world transform it was authored under.
pub struct ModelHandle {
    parts: Vec<(json::Index<json::Mesh>, DMat4)>,
}

/// Builder for one tile's composite glTF.
pub struct GltfTileModel {
    tile: u32,
    root: json::Root,
    bin: Vec<u8>,
    scene_nodes: Vec<json::Index<json::Node>>,
    material_cache: HashMap<String, json::Index<json::Material>>,
    image_cache: HashMap<PathBuf, json::Index<json::Image>>,
    sampler: Option<json::Index<json::texture::Sampler>>,
    instanced: usize,
    pub textures: TextureCopier,
}

fn pad_to_4(data: &mut Vec<u8>) {
    while data.len() % 4 != 0 {
        data.push(0);
    }
}

fn bounding_coords(points: &[[f32; 3]]) -> ([f32; 3], [f32; 3]) {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for p in points {
        for i in 0..3 {
            min[i] = f32::min(min[i], p[i]);
            max[i] = f32::max(max[i], p[i]);
        }
    }
    (min, max)
}

impl GltfTileModel {
    pub fn new(tile: u32) -> Self {
        let mut root = json::Root::default();
        root.asset = json::Asset {
            version: "2.0".to_string(),
            generator: Some("msfs2fg".to_string()),
            ..Default::default()
        };
        GltfTileModel {
            tile,
            root,
            bin: Vec::new(),
            scene_nodes: Vec::new(),
            material_cache: HashMap::new(),
            image_cache: HashMap::new(),
            sampler: None,
            instanced: 0,
            textures: TextureCopier::new(),
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instanced
    }

    fn push_view(
        &mut self,
        byte_offset: usize,
        byte_length: usize,
        target: Option<json::buffer::Target>,
    ) -> json::Index<json::buffer::View> {
        self.root.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: USize64::from(byte_length),
            byte_offset: Some(USize64::from(byte_offset)),
            byte_stride: None,
            target: target.map(Valid),
            name: None,
            extensions: Default::default(),
            extras: Default::default(),
        })
    }

    fn push_f32_accessor(
        &mut self,
        data: &[f32],
        components: usize,
        count: usize,
        type_: json::accessor::Type,
        min_max: Option<([f32; 3], [f32; 3])>,
    ) -> json::Index<json::Accessor> {
        let byte_offset = self.bin.len();
        for v in data {
            self.bin.extend_from_slice(&v.to_le_bytes());
        }
        pad_to_4(&mut self.bin);
        let byte_length = count * components * 4;
        let view = self.push_view(
            byte_offset,
            byte_length,
            Some(json::buffer::Target::ArrayBuffer),
        );
        self.root.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64(0)),
            count: USize64::from(count),
            component_type: Valid(json::accessor::GenericComponentType(
                json::accessor::ComponentType::F32,
            )),
            type_: Valid(type_),
            min: min_max.map(|(min, _)| json::Value::from(min.to_vec())),
            max: min_max.map(|(_, max)| json::Value::from(max.to_vec())),
            name: None,
            normalized: false,
            sparse: None,
            extensions: Default::default(),
            extras: Default::default(),
        })
    }

    fn push_index_accessor(&mut self, indices: &[u32]) -> json::Index<json::Accessor> {
        let byte_offset = self.bin.len();
        for &i in indices {
            self.bin.extend_from_slice(&i.to_le_bytes());
        }
        pad_to_4(&mut self.bin);
        let view = self.push_view(
            byte_offset,
            indices.len() * 4,
            Some(json::buffer::Target::ElementArrayBuffer),
        );
        self.root.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64(0)),
            count: USize64::from(indices.len()),
            component_type: Valid(json::accessor::GenericComponentType(
                json::accessor::ComponentType::U32,
            )),
            type_: Valid(json::accessor::Type::Scalar),
            min: None,
            max: None,
            name: None,
            normalized: false,
            sparse: None,
            extensions: Default::default(),
            extras: Default::default(),
        })
    }

    fn sampler(&mut self) -> json::Index<json::texture::Sampler> {
        if let Some(sampler) = self.sampler {
            return sampler;
        }
        let sampler = self.root.push(json::texture::Sampler {
            mag_filter: Some(Valid(json::texture::MagFilter::Linear)),
            min_filter: Some(Valid(json::texture::MinFilter::LinearMipmapLinear)),
            wrap_s: Valid(json::texture::WrappingMode::Repeat),
            wrap_t: Valid(json::texture::WrappingMode::Repeat),
            name: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
        self.sampler = Some(sampler);
        sampler
    }

    /// Image for a source path, deduplicated; its uri is the copied
    /// filename next to the tile output.
    fn image(&mut self, source: &Path) -> json::Index<json::Image> {
        if let Some(&image) = self.image_cache.get(source) {
            return image;
        }
        let filename = self.textures.register(source);
        let image = self.root.push(json::Image {
            buffer_view: None,
            mime_type: None,
            uri: Some(filename),
            name: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
        self.image_cache.insert(source.to_path_buf(), image);
        image
    }

    fn texture_info(&mut self, source: &Path) -> json::texture::Info {
        let image = self.image(source);
        let sampler = self.sampler();
        let texture = self.root.push(json::Texture {
            source: image,
            sampler: Some(sampler),
            name: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
        json::texture::Info {
            index: texture,
            tex_coord: 0,
            extensions: Default::default(),
            extras: Default::default(),
        }
    }

    fn material(&mut self, material: &MaterialRef) -> json::Index<json::Material> {
        let key = material.dedup_key();
        if let Some(&cached) = self.material_cache.get(&key) {
            return cached;
        }

        let base_color_texture = material
            .base_color_texture
            .clone()
            .map(|p| self.texture_info(&p));
        let metallic_roughness_texture = material
            .metallic_roughness_texture
            .clone()
            .map(|p| self.texture_info(&p));
        let emissive_texture = material
            .emissive_texture
            .clone()
            .map(|p| self.texture_info(&p));
        let normal_texture = material.normal_texture.clone().map(|p| {
            let info = self.texture_info(&p);
            json::material::NormalTexture {
                index: info.index,
                scale: 1.0,
                tex_coord: 0,
                extensions: Default::default(),
                extras: Default::default(),
            }
        });
        let occlusion_texture = material.occlusion_texture.clone().map(|p| {
            let info = self.texture_info(&p);
            json::material::OcclusionTexture {
                index: info.index,
                strength: json::material::StrengthFactor(1.0),
                tex_coord: 0,
                extensions: Default::default(),
                extras: Default::default(),
            }
        });

        let index = self.root.push(json::Material {
            name: (!material.name.is_empty()).then(|| material.name.clone()),
            double_sided: material.double_sided,
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                base_color_factor: json::material::PbrBaseColorFactor(material.base_color_factor),
                base_color_texture,
                metallic_factor: json::material::StrengthFactor(material.metallic_factor),
                roughness_factor: json::material::StrengthFactor(material.roughness_factor),
                metallic_roughness_texture,
                ..Default::default()
            },
            emissive_factor: json::material::EmissiveFactor(material.emissive_factor),
            emissive_texture,
            normal_texture,
            occlusion_texture,
            ..Default::default()
        });
        self.material_cache.insert(key, index);
        index
    }

    fn push_mesh(&mut self, mesh: &MeshBuilder) -> json::Index<json::Mesh> {
        let mut attributes = BTreeMap::new();

        let flat_positions: Vec<f32> = mesh.positions.iter().flatten().copied().collect();
        let positions = self.push_f32_accessor(
            &flat_positions,
            3,
            mesh.positions.len(),
            json::accessor::Type::Vec3,
            Some(bounding_coords(&mesh.positions)),
        );
        attributes.insert(Valid(json::mesh::Semantic::Positions), positions);

        if !mesh.normals.is_empty() {
            let flat: Vec<f32> = mesh.normals.iter().flatten().copied().collect();
            let normals =
                self.push_f32_accessor(&flat, 3, mesh.normals.len(), json::accessor::Type::Vec3, None);
            attributes.insert(Valid(json::mesh::Semantic::Normals), normals);
        }
        if !mesh.tangents.is_empty() {
            let flat: Vec<f32> = mesh.tangents.iter().flatten().copied().collect();
            let tangents =
                self.push_f32_accessor(&flat, 4, mesh.tangents.len(), json::accessor::Type::Vec4, None);
            attributes.insert(Valid(json::mesh::Semantic::Tangents), tangents);
        }
        if !mesh.uvs.is_empty() {
            let flat: Vec<f32> = mesh.uvs.iter().flatten().copied().collect();
            let uvs =
                self.push_f32_accessor(&flat, 2, mesh.uvs.len(), json::accessor::Type::Vec2, None);
            attributes.insert(Valid(json::mesh::Semantic::TexCoords(0)), uvs);
        }

        let indices = self.push_index_accessor(&mesh.indices);
        let material = self.material(&mesh.material);

        self.root.push(json::Mesh {
            primitives: vec![json::mesh::Primitive {
                attributes,
                indices: Some(indices),
                material: Some(material),
                mode: Valid(json::mesh::Mode::Triangles),
                targets: None,
                extensions: Default::default(),
                extras: Default::default(),
            }],
            weights: None,
            name: Some(mesh.name.clone()),
            extensions: Default::default(),
            extras: Default::default(),
        })
    }

    /// Register a model's geometry once; instances reference it by handle.
    pub fn add_model(&mut self, scene: &NeutralScene) -> ModelHandle {
        let parts = scene
            .meshes
            .iter()
            .filter(|(mesh, _)| mesh.triangle_count() > 0)
            .map(|(mesh, world)| (self.push_mesh(mesh), *world))
            .collect();
        ModelHandle { parts }
    }

    /// Instance a registered model under a placement transform.
    pub fn instance(&mut self, handle: &ModelHandle, placement: DMat4) {
        for (mesh, world) in &handle.parts {
            let matrix = placement * *world;
            let matrix_f32: Vec<f32> = matrix.to_cols_array().iter().map(|&v| v as f32).collect();
            let matrix_arr: [f32; 16] = matrix_f32.try_into().unwrap();
            let node = self.root.push(json::Node {
                mesh: Some(*mesh),
                matrix: (matrix != DMat4::IDENTITY).then_some(matrix_arr),
                ..Default::default()
            });
            self.scene_nodes.push(node);
        }
        if !handle.parts.is_empty() {
            self.instanced += 1;
        }
    }

    /// Attach `extensions.MSFT_texture_dds.source` mirroring each
    /// texture's plain `source`.
    fn rethread_dds(document: &mut Value) {
        let Some(textures) = document.get_mut("textures").and_then(Value::as_array_mut) else {
            return;
        };
        let mut any = false;
        for texture in textures.iter_mut() {
            let Some(source) = texture.get("source").cloned() else {
                continue;
            };
            texture["extensions"]["MSFT_texture_dds"]["source"] = source;
            any = true;
        }
        if any {
            let used = document
                .as_object_mut()
                .expect("glTF root is an object")
                .entry("extensionsUsed")
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Some(arr) = used.as_array_mut() {
                if !arr.iter().any(|v| v == "MSFT_texture_dds") {
                    arr.push(Value::String("MSFT_texture_dds".to_string()));
                }
            }
        }
    }

    /// Write `<tile>.gltf` + `<tile>.bin` and copy referenced textures.
    pub fn write_to_file(mut self, path: &Path) -> Result<(), ExportError> {
        let io_err = |path: &Path| {
            let display = path.display().to_string();
            move |source: std::io::Error| ExportError::Io {
                path: display.clone(),
                source,
            }
        };

        let bin_name = format!("{}.bin", self.tile);
        pad_to_4(&mut self.bin);
        if !self.bin.is_empty() {
            let buffer = self.root.push(json::Buffer {
                byte_length: USize64::from(self.bin.len()),
                uri: Some(bin_name.clone()),
                name: None,
                extensions: Default::default(),
                extras: Default::default(),
            });
            for view in self.root.buffer_views.iter_mut() {
                view.buffer = buffer;
            }
        }

        let scene = self.root.push(json::Scene {
            nodes: std::mem::take(&mut self.scene_nodes),
            name: Some(self.tile.to_string()),
            extensions: Default::default(),
            extras: Default::default(),
        });
        self.root.scene = Some(scene);

        let serialized = json::serialize::to_string(&self.root)
            .map_err(|e| ExportError::Serialize(e.to_string()))?;
        let mut document: Value = serde_json::from_str(&serialized)
            .map_err(|e| ExportError::Serialize(e.to_string()))?;
        Self::rethread_dds(&mut document);
        let text = serde_json::to_string_pretty(&document)
            .map_err(|e| ExportError::Serialize(e.to_string()))?;

        std::fs::write(path, text).map_err(io_err(path))?;
        if let Some(dir) = path.parent() {
            if !self.bin.is_empty() {
                let bin_path = dir.join(&bin_name);
                std::fs::write(&bin_path, &self.bin).map_err(io_err(&bin_path))?;
            }
            self.textures.copy_all(dir);
        }
        Ok(())
    }
}
