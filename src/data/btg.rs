//! Decoder for FlightGear BTG (binary terrain geometry) meshes.
//!
//! BTG is a sequence of typed objects, each carrying properties and
//! elements. The terrain sampler only needs the triangle geometry and the
//! bounding sphere, so normals/colors/texcoords are skipped. Corruption is
//! handled by bounded resync: every property/element is reseeked to its
//! declared end, and absurd sizes abort the file with the partial mesh.

use thiserror::Error;
use tracing::warn;
use winnow::Parser;
use winnow::binary::{le_f32, le_f64, le_u16, le_u32, u8 as any_u8};
use winnow::token::take;

use crate::data::parser_utils::WResult;

#[derive(Debug, Error)]
pub enum BtgError {
    #[error("not a BTG stream (magic {0:#06x})")]
    BadMagic(u16),
    #[error("nonsense object count {0}")]
    NonsenseObjectCount(u16),
    #[error("stream too small for a BTG header ({0} bytes)")]
    FileTooSmall(usize),
}

const BTG_MAGIC: u16 = 0x5347;
/// Object counts above this are treated as corruption, not data.
const MAX_OBJECT_COUNT: u16 = 10_000;
/// Declared property/element sizes above this are treated as corruption.
const MAX_DECLARED_SIZE: usize = 100_000_000;

// Object type codes.
const OBJ_BOUNDING_SPHERE: u8 = 0;
const OBJ_VERTEX_LIST: u8 = 1;
const OBJ_POINTS: u8 = 9;
const OBJ_TRIANGLES: u8 = 10;
const OBJ_TRIANGLE_STRIP: u8 = 11;
const OBJ_TRIANGLE_FAN: u8 = 12;

/// Decoded terrain mesh: triangle soup over a shared vertex pool, with the
/// bounding sphere the vertices are relative to.
#[derive(Debug, Default, Clone)]
pub struct BtgMesh {
    pub bounding_center: [f64; 3],
    pub bounding_radius: f32,
    /// Cartesian vertices relative to the bounding-sphere center.
    pub vertices: Vec<[f32; 3]>,
    /// Indices into `vertices`.
    pub triangles: Vec<[u32; 3]>,
}

/// Bytes per vertex tuple in an index element.
///
/// With an explicit flag byte each enabled index slot (vertex, normal,
/// color, texcoord) contributes one u16. With no flags the legacy default
/// is vertex + texcoord, except point objects which carry vertex only.
fn tuple_bytes(obj_type: u8, flags: u8) -> usize {
    if flags != 0 {
        (flags & 0x0F).count_ones() as usize * 2
    } else if obj_type == OBJ_POINTS {
        2
    } else {
        4
    }
}

/// Vertex indices from an index element: the vertex slot is the first u16
/// of each tuple; the remaining enabled slots are skipped.
fn read_vertex_indices(elem: &[u8], obj_type: u8, flags: u8) -> Vec<u32> {
    let stride = tuple_bytes(obj_type, flags);
    if stride < 2 {
        return Vec::new();
    }
    let count = elem.len() / stride;
    let input = &mut &elem[..];
    let mut out = Vec::with_capacity(count);
    let parsed: WResult<()> = (|| {
        for _ in 0..count {
            let vertex = le_u16.parse_next(input)?;
            let _other_slots = take(stride - 2).parse_next(input)?;
            out.push(vertex as u32);
        }
        Ok(())
    })();
    debug_assert!(parsed.is_ok(), "tuple count bounded by element length");
    out
}

fn push_triangles(mesh: &mut BtgMesh, obj_type: u8, indices: &[u32]) {
    match obj_type {
        OBJ_TRIANGLES => {
            for tri in indices.chunks_exact(3) {
                // Winding is inverted on import.
                mesh.triangles.push([tri[0], tri[2], tri[1]]);
            }
        }
        OBJ_TRIANGLE_STRIP => {
            for i in 0..indices.len().saturating_sub(2) {
                let tri = if i % 2 == 0 {
                    [indices[i], indices[i + 1], indices[i + 2]]
                } else {
                    [indices[i + 1], indices[i], indices[i + 2]]
                };
                mesh.triangles.push(tri);
            }
        }
        OBJ_TRIANGLE_FAN => {
            for i in 1..indices.len().saturating_sub(1) {
                mesh.triangles.push([indices[0], indices[i], indices[i + 1]]);
            }
        }
        _ => {}
    }
}

/// Decode one element body per its object type.
fn decode_element(mesh: &mut BtgMesh, obj_type: u8, flags: u8, elem: &[u8]) {
    let input = &mut &elem[..];
    match obj_type {
        OBJ_BOUNDING_SPHERE => {
            // 3 x f64 center + f32 radius; the last sphere wins.
            let parsed: WResult<([f64; 3], f32)> = (|| {
                let x = le_f64.parse_next(input)?;
                let y = le_f64.parse_next(input)?;
                let z = le_f64.parse_next(input)?;
                let radius = le_f32.parse_next(input)?;
                Ok(([x, y, z], radius))
            })();
            if let Ok((center, radius)) = parsed {
                mesh.bounding_center = center;
                mesh.bounding_radius = radius;
            }
        }
        OBJ_VERTEX_LIST => {
            let parsed: WResult<()> = (|| {
                for _ in 0..elem.len() / 12 {
                    let x = le_f32.parse_next(input)?;
                    let y = le_f32.parse_next(input)?;
                    let z = le_f32.parse_next(input)?;
                    mesh.vertices.push([x, y, z]);
                }
                Ok(())
            })();
            debug_assert!(parsed.is_ok(), "vertex count bounded by element length");
        }
        OBJ_TRIANGLES | OBJ_TRIANGLE_STRIP | OBJ_TRIANGLE_FAN => {
            let indices = read_vertex_indices(elem, obj_type, flags);
            push_triangles(mesh, obj_type, &indices);
        }
        _ => {}
    }
}

/// Walk the object stream. An `Err` means the stream ran out mid-object;
/// the caller keeps whatever was decoded. Absurd declared sizes end the
/// walk early the same way (partial mesh, never a hard failure).
fn decode_objects(input: &mut &[u8], object_count: u16, mesh: &mut BtgMesh) -> WResult<()> {
    for _ in 0..object_count {
        let obj_type = any_u8.parse_next(input)?;
        let prop_count = le_u16.parse_next(input)?;
        let elem_count = le_u16.parse_next(input)?;

        let mut flags = 0u8;
        for _ in 0..prop_count {
            let prop_type = any_u8.parse_next(input)?;
            let prop_size = le_u32.parse_next(input)? as usize;
            if prop_size > MAX_DECLARED_SIZE {
                warn!(prop_size, "corrupt BTG property size; keeping partial mesh");
                return Ok(());
            }
            // Consuming the declared length reseeks past anything the
            // property parse leaves unread.
            let prop = take(prop_size).parse_next(input)?;
            if prop_type == 1 {
                flags = prop.first().copied().unwrap_or(0);
            }
        }

        for _ in 0..elem_count {
            let elem_size = le_u32.parse_next(input)? as usize;
            if elem_size > MAX_DECLARED_SIZE {
                warn!(elem_size, "corrupt BTG element size; keeping partial mesh");
                return Ok(());
            }
            let elem = take(elem_size).parse_next(input)?;
            decode_element(mesh, obj_type, flags, elem);
        }
    }
    Ok(())
}

/// Decode a BTG byte stream into a triangle mesh.
///
/// Mid-stream corruption logs and returns the partial mesh; only header
/// level nonsense is an error.
pub fn decode(data: &[u8]) -> Result<BtgMesh, BtgError> {
    let input = &mut &data[..];
    let header: WResult<(u16, u16)> = (|| {
        let _version = le_u16.parse_next(input)?;
        let magic = le_u16.parse_next(input)?;
        let _creation_time = le_u32.parse_next(input)?;
        let object_count = le_u16.parse_next(input)?;
        Ok((magic, object_count))
    })();
    let Ok((magic, object_count)) = header else {
        return Err(BtgError::FileTooSmall(data.len()));
    };
    if magic != BTG_MAGIC {
        return Err(BtgError::BadMagic(magic));
    }
    if object_count > MAX_OBJECT_COUNT {
        return Err(BtgError::NonsenseObjectCount(object_count));
    }

    let mut mesh = BtgMesh::default();
    if decode_objects(input, object_count, &mut mesh).is_err() {
        warn!(
            remaining = input.len(),
            "truncated BTG object stream; keeping partial mesh"
        );
    }

    // Drop triangles referencing out-of-pool vertices (corrupt indices).
    let vertex_count = mesh.vertices.len() as u32;
    mesh.triangles
        .retain(|tri| tri.iter().all(|&i| i < vertex_count));

    Ok(mesh)
}
