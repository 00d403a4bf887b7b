//! Import a GLB into the neutral scene representation.
//!
//! Reads nodes, resolves world transforms through an index-based parent
//! map, extracts triangle primitives (positions, indices, UVs, normals,
//! tangents) and maps PBR materials. MSFS re-uses one accessor across
//! primitives via `extras.ASOBO_primitive`, which is honored here.

use glam::{DMat4, DQuat, DVec3};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::models::glb::{self, GlbError};
use crate::models::scene::{MaterialRef, MeshBuilder, NeutralScene, TextureResolver};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Glb(#[from] GlbError),
}

// glTF component types.
const COMP_U8: u64 = 5121;
const COMP_U16: u64 = 5123;
const COMP_U32: u64 = 5125;
const COMP_F32: u64 = 5126;
/// Half floats appear in MSFS assets via quantization extensions.
const COMP_F16: u64 = 5131;

const MODE_TRIANGLES: u64 = 4;

struct Doc<'a> {
    json: &'a Value,
    bin: &'a [u8],
}

fn empty_array() -> &'static Vec<Value> {
    static EMPTY: std::sync::OnceLock<Vec<Value>> = std::sync::OnceLock::new();
    EMPTY.get_or_init(Vec::new)
}

impl<'a> Doc<'a> {
    fn array(&self, key: &str) -> &'a Vec<Value> {
        let json: &'a Value = self.json;
        match json.get(key).and_then(Value::as_array) {
            Some(arr) => arr,
            None => empty_array(),
        }
    }

    /// Raw bytes + stride for an accessor, bounds-checked against the BIN
    /// chunk. `elem_size` is the tightly-packed element size.
    fn accessor_data(&self, accessor: &Value, elem_size: usize) -> Option<(&'a [u8], usize, usize)> {
        let count = accessor.get("count")?.as_u64()? as usize;
        let view_index = accessor.get("bufferView")?.as_u64()? as usize;
        let view = self.array("bufferViews").get(view_index)?;
        let view_offset = view.get("byteOffset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let acc_offset = accessor
            .get("byteOffset")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let stride = view
            .get("byteStride")
            .and_then(Value::as_u64)
            .map(|s| s as usize)
            .unwrap_or(elem_size);
        if stride < elem_size || count == 0 {
            return None;
        }
        let start = view_offset + acc_offset;
        let needed = (count - 1) * stride + elem_size;
        let data = self.bin.get(start..start + needed)?;
        Some((data, stride, count))
    }
}

fn f32_at(data: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

/// Decode a VEC3 f32 accessor (positions, normals).
fn read_vec3(doc: &Doc, accessor: &Value) -> Option<Vec<[f32; 3]>> {
    if accessor.get("componentType")?.as_u64()? != COMP_F32 {
        return None;
    }
    let (data, stride, count) = doc.accessor_data(accessor, 12)?;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let base = i * stride;
        out.push([
            f32_at(data, base),
            f32_at(data, base + 4),
            f32_at(data, base + 8),
        ]);
    }
    Some(out)
}

/// Decode a VEC4 f32 accessor (tangents).
fn read_vec4(doc: &Doc, accessor: &Value) -> Option<Vec<[f32; 4]>> {
    if accessor.get("componentType")?.as_u64()? != COMP_F32 {
        return None;
    }
    let (data, stride, count) = doc.accessor_data(accessor, 16)?;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let base = i * stride;
        out.push([
            f32_at(data, base),
            f32_at(data, base + 4),
            f32_at(data, base + 8),
            f32_at(data, base + 12),
        ]);
    }
    Some(out)
}

/// Decode a VEC2 texture-coordinate accessor and invert V.
///
/// f32, half-float, and normalized u16/u8 layouts all occur in the wild.
fn read_uvs(doc: &Doc, accessor: &Value) -> Option<Vec<[f32; 2]>> {
    let comp = accessor.get("componentType")?.as_u64()?;
    let comp_size = match comp {
        COMP_F32 => 4,
        COMP_F16 | COMP_U16 => 2,
        COMP_U8 => 1,
        _ => return None,
    };
    let (data, stride, count) = doc.accessor_data(accessor, comp_size * 2)?;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let base = i * stride;
        let decode = |offset: usize| -> f32 {
            match comp {
                COMP_F32 => f32_at(data, base + offset * 4),
                COMP_F16 => {
                    let bits =
                        u16::from_le_bytes([data[base + offset * 2], data[base + offset * 2 + 1]]);
                    half::f16::from_bits(bits).to_f32()
                }
                COMP_U16 => {
                    let v =
                        u16::from_le_bytes([data[base + offset * 2], data[base + offset * 2 + 1]]);
                    v as f32 / u16::MAX as f32
                }
                _ => data[base + offset] as f32 / u8::MAX as f32,
            }
        };
        let u = decode(0);
        let v = decode(1);
        out.push([u, 1.0 - v]);
    }
    Some(out)
}

/// Decode a SCALAR index accessor (u8/u16/u32).
fn read_indices(doc: &Doc, accessor: &Value) -> Option<Vec<u32>> {
    let comp = accessor.get("componentType")?.as_u64()?;
    let comp_size = match comp {
        COMP_U8 => 1,
        COMP_U16 => 2,
        COMP_U32 => 4,
        _ => return None,
    };
    let (data, stride, count) = doc.accessor_data(accessor, comp_size)?;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let base = i * stride;
        let value = match comp {
            COMP_U8 => data[base] as u32,
            COMP_U16 => u16::from_le_bytes([data[base], data[base + 1]]) as u32,
            _ => u32::from_le_bytes(data[base..base + 4].try_into().unwrap()),
        };
        out.push(value);
    }
    Some(out)
}

fn vec3_from(value: Option<&Value>, default: DVec3) -> DVec3 {
    let Some(arr) = value.and_then(Value::as_array) else {
        return default;
    };
    if arr.len() != 3 {
        return default;
    }
    DVec3::new(
        arr[0].as_f64().unwrap_or(default.x),
        arr[1].as_f64().unwrap_or(default.y),
        arr[2].as_f64().unwrap_or(default.z),
    )
}

/// Local transform of a node: either a direct matrix or TRS.
fn node_local_transform(node: &Value) -> DMat4 {
    if let Some(matrix) = node.get("matrix").and_then(Value::as_array) {
        if matrix.len() == 16 {
            let mut cols = [0.0f64; 16];
            for (slot, v) in cols.iter_mut().zip(matrix) {
                *slot = v.as_f64().unwrap_or(0.0);
            }
            return DMat4::from_cols_array(&cols);
        }
    }

    let translation = vec3_from(node.get("translation"), DVec3::ZERO);
    let mut scale = vec3_from(node.get("scale"), DVec3::ONE);

    // Degenerate scales get replaced by their uniform average.
    if !scale.is_finite() || scale.min_element() <= 0.0 {
        let avg = (scale.x + scale.y + scale.z) / 3.0;
        let avg = if avg.is_finite() && avg > 0.0 { avg } else { 1.0 };
        scale = DVec3::splat(avg);
    }

    let rotation = node
        .get("rotation")
        .and_then(Value::as_array)
        .filter(|arr| arr.len() == 4)
        .map(|arr| {
            DQuat::from_xyzw(
                arr[0].as_f64().unwrap_or(0.0),
                arr[1].as_f64().unwrap_or(0.0),
                arr[2].as_f64().unwrap_or(0.0),
                arr[3].as_f64().unwrap_or(1.0),
            )
        })
        .unwrap_or(DQuat::IDENTITY);
    let rotation = if rotation.length_squared() > 0.0 {
        rotation.normalize()
    } else {
        DQuat::IDENTITY
    };

    DMat4::from_scale_rotation_translation(scale, rotation, translation)
}

/// World transform per node via the parent map.
fn world_transforms(nodes: &[Value]) -> Vec<DMat4> {
    let mut parents = vec![-1i64; nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        if let Some(children) = node.get("children").and_then(Value::as_array) {
            for child in children {
                if let Some(c) = child.as_u64() {
                    if (c as usize) < parents.len() {
                        parents[c as usize] = i as i64;
                    }
                }
            }
        }
    }

    let locals: Vec<DMat4> = nodes.iter().map(node_local_transform).collect();
    let mut worlds = Vec::with_capacity(nodes.len());
    for i in 0..nodes.len() {
        let mut world = locals[i];
        let mut parent = parents[i];
        let mut hops = 0;
        while parent >= 0 && hops < nodes.len() {
            world = locals[parent as usize] * world;
            parent = parents[parent as usize];
            hops += 1;
        }
        worlds.push(world);
    }
    worlds
}

fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Resolve a texture index to a file on disk.
///
/// MSFS routes the real image through `extensions.MSFT_texture_dds.source`;
/// the plain `source` is the fallback.
fn texture_path(
    textures: &[Value],
    images: &[Value],
    index: usize,
    resolver: &dyn TextureResolver,
) -> Option<std::path::PathBuf> {
    let texture = textures.get(index)?;
    let image_index = texture
        .pointer("/extensions/MSFT_texture_dds/source")
        .and_then(Value::as_u64)
        .or_else(|| texture.get("source").and_then(Value::as_u64))?
        as usize;
    let uri = images.get(image_index)?.get("uri")?.as_str()?;
    let resolved = resolver.resolve(uri);
    if resolved.is_none() {
        warn!(uri, "texture not found under asset root; dropping binding");
    }
    resolved
}

fn texture_index_of(info: Option<&Value>) -> Option<usize> {
    info?.get("index")?.as_u64().map(|v| v as usize)
}

fn parse_materials(doc: &Doc, resolver: &dyn TextureResolver) -> Vec<MaterialRef> {
    let textures = doc.array("textures");
    let images = doc.array("images");
    doc.array("materials")
        .iter()
        .enumerate()
        .map(|(i, material)| {
            let mut out = MaterialRef::default();
            out.name = material
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("material_{i}"));

            let pbr = material.get("pbrMetallicRoughness");
            if let Some(pbr) = pbr {
                if let Some(factor) = pbr.get("baseColorFactor").and_then(Value::as_array) {
                    for (slot, v) in out.base_color_factor.iter_mut().zip(factor) {
                        *slot = clamp01(v.as_f64().unwrap_or(1.0) as f32);
                    }
                }
                if let Some(v) = pbr.get("metallicFactor").and_then(Value::as_f64) {
                    out.metallic_factor = v as f32;
                }
                if let Some(v) = pbr.get("roughnessFactor").and_then(Value::as_f64) {
                    out.roughness_factor = v as f32;
                }
                if let Some(tex) = texture_index_of(pbr.get("baseColorTexture")) {
                    out.base_color_texture = texture_path(textures, images, tex, resolver);
                }
                if let Some(tex) = texture_index_of(pbr.get("metallicRoughnessTexture")) {
                    out.metallic_roughness_texture =
                        texture_path(textures, images, tex, resolver);
                }
                if let Some(scale) = pbr
                    .pointer("/baseColorTexture/extensions/KHR_texture_transform/scale")
                    .and_then(Value::as_array)
                {
                    if scale.len() == 2 {
                        out.uv_repeat = [
                            scale[0].as_f64().unwrap_or(1.0) as f32,
                            scale[1].as_f64().unwrap_or(1.0) as f32,
                        ];
                    }
                }
            }

            if let Some(factor) = material.get("emissiveFactor").and_then(Value::as_array) {
                for (slot, v) in out.emissive_factor.iter_mut().zip(factor) {
                    *slot = v.as_f64().unwrap_or(0.0) as f32;
                }
            }
            if let Some(tex) = texture_index_of(material.get("normalTexture")) {
                out.normal_texture = texture_path(textures, images, tex, resolver);
            }
            if let Some(tex) = texture_index_of(material.get("occlusionTexture")) {
                out.occlusion_texture = texture_path(textures, images, tex, resolver);
            }
            if let Some(tex) = texture_index_of(material.get("emissiveTexture")) {
                out.emissive_texture = texture_path(textures, images, tex, resolver);
            }
            out.double_sided = material
                .get("doubleSided")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            out
        })
        .collect()
}

/// `extras.ASOBO_primitive` accessor-window fields.
struct AsoboWindow {
    base_vertex_index: u32,
    start_index: usize,
    primitive_count: usize,
}

fn asobo_window(primitive: &Value) -> Option<AsoboWindow> {
    let extra = primitive.pointer("/extras/ASOBO_primitive")?;
    Some(AsoboWindow {
        base_vertex_index: extra
            .get("BaseVertexIndex")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        start_index: extra.get("StartIndex").and_then(Value::as_u64).unwrap_or(0) as usize,
        primitive_count: extra
            .get("PrimitiveCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize,
    })
}

fn import_primitive(
    doc: &Doc,
    primitive: &Value,
    materials: &[MaterialRef],
    name: String,
) -> Option<MeshBuilder> {
    let mode = primitive
        .get("mode")
        .and_then(Value::as_u64)
        .unwrap_or(MODE_TRIANGLES);
    if mode != MODE_TRIANGLES {
        return None;
    }

    let accessors = doc.array("accessors");
    let attributes = primitive.get("attributes")?;
    let accessor_of = |index: &Value| accessors.get(index.as_u64()? as usize);

    let positions = attributes
        .get("POSITION")
        .and_then(accessor_of)
        .and_then(|a| read_vec3(doc, a))?;
    if positions.is_empty() {
        return None;
    }

    let normals = attributes
        .get("NORMAL")
        .and_then(accessor_of)
        .and_then(|a| read_vec3(doc, a))
        .unwrap_or_default();
    let tangents = attributes
        .get("TANGENT")
        .and_then(accessor_of)
        .and_then(|a| read_vec4(doc, a))
        .unwrap_or_default();
    let uvs = attributes
        .get("TEXCOORD_0")
        .and_then(accessor_of)
        .and_then(|a| read_uvs(doc, a))
        .unwrap_or_default();

    let mut indices = match primitive.get("indices").and_then(accessor_of) {
        Some(accessor) => read_indices(doc, accessor)?,
        None => (0..positions.len() as u32).collect(),
    };

    if let Some(window) = asobo_window(primitive) {
        let end = window.start_index + window.primitive_count * 3;
        if window.primitive_count > 0 && end <= indices.len() {
            indices = indices[window.start_index..end]
                .iter()
                .map(|&i| i + window.base_vertex_index)
                .collect();
        } else if window.primitive_count > 0 {
            warn!(
                start = window.start_index,
                count = window.primitive_count,
                available = indices.len(),
                "ASOBO primitive window out of range; using full accessor"
            );
        }
    }

    // Truncate to whole triangles and drop out-of-pool indices.
    indices.truncate(indices.len() - indices.len() % 3);
    let max = positions.len() as u32;
    if indices.iter().any(|&i| i >= max) {
        warn!("primitive indices exceed vertex pool; dropping primitive");
        return None;
    }
    if indices.is_empty() {
        return None;
    }

    let material = primitive
        .get("material")
        .and_then(Value::as_u64)
        .and_then(|i| materials.get(i as usize))
        .cloned()
        .unwrap_or_default();

    Some(MeshBuilder {
        name,
        positions,
        normals,
        tangents,
        uvs,
        indices,
        material,
    })
}

/// Import the first scene of a GLB into a [`NeutralScene`].
///
/// Nodes with non-finite world transforms are skipped; primitives that
/// fail to decode are dropped individually.
pub fn import_glb(
    data: &[u8],
    resolver: &dyn TextureResolver,
    model_name: &str,
) -> Result<NeutralScene, ImportError> {
    let glb = glb::split(data)?;
    let doc = Doc {
        json: &glb.json,
        bin: glb.bin,
    };

    let nodes = doc.array("nodes");
    let meshes = doc.array("meshes");
    let materials = parse_materials(&doc, resolver);
    let worlds = world_transforms(nodes);

    let mut scene = NeutralScene {
        name: model_name.to_string(),
        meshes: Vec::new(),
    };

    for (node_index, node) in nodes.iter().enumerate() {
        let Some(mesh_index) = node.get("mesh").and_then(Value::as_u64) else {
            continue;
        };
        let Some(mesh) = meshes.get(mesh_index as usize) else {
            continue;
        };
        let world = worlds[node_index];
        if !world.to_cols_array().iter().all(|v| v.is_finite()) {
            warn!(node = node_index, "skipping mesh with non-finite transform");
            continue;
        }

        let mesh_name = mesh
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{model_name}_mesh{mesh_index}"));

        let primitives = mesh
            .get("primitives")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for (prim_index, primitive) in primitives.iter().enumerate() {
            let name = if primitives.len() > 1 {
                format!("{mesh_name}_{prim_index}")
            } else {
                mesh_name.clone()
            };
            if let Some(builder) = import_primitive(&doc, primitive, &materials, name) {
                scene.meshes.push((builder, world));
            }
        }
    }

    Ok(scene)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scene::NullResolver;
    use serde_json::json;

    #[test]
    fn imports_single_triangle() {
        let data = test_support::triangle_glb();
        let scene = import_glb(&data, &NullResolver, "model").unwrap();
        assert_eq!(scene.meshes.len(), 1);
        let (mesh, world) = &scene.meshes[0];
        assert_eq!(mesh.positions.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(*world, DMat4::IDENTITY);
        assert_eq!(mesh.material.name, "white");
        assert_eq!(mesh.material.metallic_factor, 0.0);
    }

    #[test]
    fn world_transform_walks_parent_chain() {
        let nodes = vec![
            json!({"children": [1], "translation": [1.0, 0.0, 0.0]}),
            json!({"translation": [0.0, 2.0, 0.0]}),
        ];
        let worlds = world_transforms(&nodes);
        let p = worlds[1].transform_point3(DVec3::ZERO);
        assert_eq!(p, DVec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn degenerate_scale_is_averaged() {
        let node = json!({"scale": [2.0, 0.0, 4.0]});
        let m = node_local_transform(&node);
        let p = m.transform_point3(DVec3::ONE);
        // Average scale (2+0+4)/3 = 2.
        assert!((p - DVec3::splat(2.0)).length() < 1e-12);
    }

    #[test]
    fn uv_v_inversion() {
        let mut bin = Vec::new();
        for v in [0.25f32, 0.25] {
            bin.extend_from_slice(&v.to_le_bytes());
        }
        let doc_json = json!({
            "accessors": [{"bufferView": 0, "componentType": 5126, "count": 1, "type": "VEC2"}],
            "bufferViews": [{"buffer": 0, "byteOffset": 0, "byteLength": 8}]
        });
        let doc = Doc {
            json: &doc_json,
            bin: &bin,
        };
        let uvs = read_uvs(&doc, &doc_json["accessors"][0]).unwrap();
        assert_eq!(uvs[0], [0.25, 0.75]);
    }

    #[test]
    fn half_float_uvs_decode() {
        let mut bin = Vec::new();
        for v in [half::f16::from_f32(0.5), half::f16::from_f32(1.0)] {
            bin.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        let doc_json = json!({
            "accessors": [{"bufferView": 0, "componentType": 5131, "count": 1, "type": "VEC2"}],
            "bufferViews": [{"buffer": 0, "byteOffset": 0, "byteLength": 4}]
        });
        let doc = Doc {
            json: &doc_json,
            bin: &bin,
        };
        let uvs = read_uvs(&doc, &doc_json["accessors"][0]).unwrap();
        assert_eq!(uvs[0], [0.5, 0.0]);
    }

    #[test]
    fn asobo_window_slices_shared_accessor() {
        // 6 indices; the ASOBO window selects the second triangle with a
        // base vertex offset of 1.
        let positions: Vec<f32> = (0..5).flat_map(|i| [i as f32, 0.0, 0.0]).collect();
        let mut bin = Vec::new();
        for p in &positions {
            bin.extend_from_slice(&p.to_le_bytes());
        }
        let index_offset = bin.len();
        for i in [0u16, 1, 2, 0, 2, 3] {
            bin.extend_from_slice(&i.to_le_bytes());
        }
        let doc_json = json!({
            "accessors": [
                {"bufferView": 0, "componentType": 5126, "count": 5, "type": "VEC3"},
                {"bufferView": 1, "componentType": 5123, "count": 6, "type": "SCALAR"}
            ],
            "bufferViews": [
                {"buffer": 0, "byteOffset": 0, "byteLength": 60},
                {"buffer": 0, "byteOffset": index_offset, "byteLength": 12}
            ]
        });
        let doc = Doc {
            json: &doc_json,
            bin: &bin,
        };
        let primitive = json!({
            "attributes": {"POSITION": 0},
            "indices": 1,
            "extras": {"ASOBO_primitive": {
                "StartIndex": 3, "PrimitiveCount": 1, "BaseVertexIndex": 1
            }}
        });
        let mesh = import_primitive(&doc, &primitive, &[], "m".into()).unwrap();
        assert_eq!(mesh.indices, vec![1, 3, 4]);
    }

    #[test]
    fn non_finite_transform_skips_mesh() {
        // Two stacked 1e308 scales overflow to infinity in the world
        // transform even though each local matrix is finite JSON.
        let data = {
            let positions: [f32; 9] = [0.0; 9];
            let mut bin = Vec::new();
            for p in positions {
                bin.extend_from_slice(&p.to_le_bytes());
            }
            let json = r#"{
                "asset": {"version": "2.0"},
                "nodes": [
                    {"children": [1], "matrix": [
                        1e308, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1
                    ]},
                    {"mesh": 0, "matrix": [
                        1e308, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1
                    ]}
                ],
                "meshes": [{"primitives": [{"attributes": {"POSITION": 0}}]}],
                "accessors": [{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3"}],
                "bufferViews": [{"buffer": 0, "byteOffset": 0, "byteLength": 36}],
                "buffers": [{"byteLength": 36}]
            }"#;
            crate::models::glb::test_support::glb_bytes(json, &bin)
        };
        let scene = import_glb(&data, &NullResolver, "model").unwrap();
        assert!(scene.meshes.is_empty());
    }
}
