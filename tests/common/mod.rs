//! Synthetic scenery-package fixtures: BGL containers with placement and
//! model records, RIFF model packages, and GLB payloads, built byte by
//! byte the way the decoders expect to find them.

use uuid::Uuid;

const MAGIC1: [u8; 4] = [0x01, 0x02, 0x92, 0x19];
const MAGIC2: [u8; 4] = [0x03, 0x18, 0x05, 0x08];

pub const REC_SCENERY_OBJECT: u32 = 0x0025;
pub const REC_MODEL_DATA: u32 = 0x002B;

/// Raw angle constants for the (0, 0) anchor.
pub const LON_RAW_ZERO: u32 = 402_653_184;
pub const LAT_RAW_ZERO: u32 = 268_435_456;

/// Serialize a library-object placement record (id 0x0B, 64 bytes).
pub fn library_placement_record(
    lon_raw: u32,
    lat_raw: u32,
    alt_milli: i32,
    flags: u16,
    heading_raw: u16,
    guid: Uuid,
    scale: f32,
) -> Vec<u8> {
    let mut rec = Vec::new();
    rec.extend_from_slice(&0x000Bu16.to_le_bytes());
    rec.extend_from_slice(&64u16.to_le_bytes());
    rec.extend_from_slice(&lon_raw.to_le_bytes());
    rec.extend_from_slice(&lat_raw.to_le_bytes());
    rec.extend_from_slice(&alt_milli.to_le_bytes());
    rec.extend_from_slice(&flags.to_le_bytes());
    rec.extend_from_slice(&0u16.to_le_bytes()); // pitch
    rec.extend_from_slice(&0u16.to_le_bytes()); // bank
    rec.extend_from_slice(&heading_raw.to_le_bytes());
    rec.extend_from_slice(&0i16.to_le_bytes()); // image complexity
    rec.extend_from_slice(&0u16.to_le_bytes()); // reserved
    rec.extend_from_slice(&[0u8; 16]); // empty guid
    rec.extend_from_slice(&guid.to_bytes_le());
    rec.extend_from_slice(&scale.to_le_bytes());
    assert_eq!(rec.len(), 64);
    rec
}

/// A minimal single-triangle GLB with a white material.
/// Triangle: `(0,0,0), (1,0,0), (0,1,0)`.
pub fn triangle_glb() -> Vec<u8> {
    let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let indices: [u16; 3] = [0, 1, 2];
    let mut bin = Vec::new();
    for p in positions {
        bin.extend_from_slice(&p.to_le_bytes());
    }
    for i in indices {
        bin.extend_from_slice(&i.to_le_bytes());
    }
    let json = r#"{
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"mesh": 0, "name": "tri"}],
        "meshes": [{"name": "tri", "primitives": [{
            "attributes": {"POSITION": 0},
            "indices": 1,
            "material": 0
        }]}],
        "materials": [{"name": "white", "pbrMetallicRoughness": {
            "baseColorFactor": [1.0, 1.0, 1.0, 1.0],
            "metallicFactor": 0.0,
            "roughnessFactor": 1.0
        }}],
        "accessors": [
            {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
             "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]},
            {"bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR"}
        ],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 36, "byteLength": 6}
        ],
        "buffers": [{"byteLength": 44}]
    }"#;
    glb_bytes(json, &bin)
}

/// Assemble a standard GLB container from JSON text and a BIN payload.
pub fn glb_bytes(json: &str, bin: &[u8]) -> Vec<u8> {
    let mut json_bytes = json.as_bytes().to_vec();
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }
    let mut bin_bytes = bin.to_vec();
    while bin_bytes.len() % 4 != 0 {
        bin_bytes.push(0);
    }
    let total = 12 + 8 + json_bytes.len() + if bin.is_empty() { 0 } else { 8 + bin_bytes.len() };
    let mut data = Vec::with_capacity(total);
    data.extend_from_slice(b"glTF");
    data.extend_from_slice(&2u32.to_le_bytes());
    data.extend_from_slice(&(total as u32).to_le_bytes());
    data.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    data.extend_from_slice(&0x4E4F534Au32.to_le_bytes());
    data.extend_from_slice(&json_bytes);
    if !bin.is_empty() {
        data.extend_from_slice(&(bin_bytes.len() as u32).to_le_bytes());
        data.extend_from_slice(&0x004E4942u32.to_le_bytes());
        data.extend_from_slice(&bin_bytes);
    }
    data
}

/// Wrap GLB payloads in a RIFF container with GXML metadata.
pub fn riff_package(model_name: &str, glbs: &[&[u8]]) -> Vec<u8> {
    let xml = format!(
        r#"<ModelInfo name="{model_name}"><LODS><LOD ModelFile="{model_name}" minSize="0"/></LODS></ModelInfo>"#
    );

    let mut glbd = Vec::new();
    for glb in glbs {
        glbd.extend_from_slice(b"GLB\0");
        glbd.extend_from_slice(&(glb.len() as u32).to_le_bytes());
        glbd.extend_from_slice(glb);
        while glbd.len() % 4 != 0 {
            glbd.push(0);
        }
    }

    let mut data = Vec::new();
    data.extend_from_slice(b"RIFF");
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(b"GXML");
    data.extend_from_slice(&(xml.len() as u32).to_le_bytes());
    data.extend_from_slice(xml.as_bytes());
    while data.len() % 4 != 0 {
        data.push(0);
    }
    data.extend_from_slice(b"GLBD");
    data.extend_from_slice(&(glbd.len() as u32).to_le_bytes());
    data.extend_from_slice(&glbd);
    data
}

/// A ModelData subrecord payload: GUID, an opaque header gap, then the
/// RIFF container (located by scanning, as in real packages).
pub fn model_subrecord(guid: Uuid, riff: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&guid.to_bytes_le());
    payload.extend_from_slice(&[0u8; 0x10]);
    payload.extend_from_slice(riff);
    payload
}

/// Builder assembling a complete BGL image from subrecord payloads.
#[derive(Default)]
pub struct BglBuilder {
    scenery: Vec<Vec<u8>>,
    models: Vec<Vec<u8>>,
}

impl BglBuilder {
    pub fn new() -> Self {
        BglBuilder::default()
    }

    /// Add a SceneryObject subrecord (a sequence of placement frames).
    pub fn scenery_subrecord(&mut self, payload: Vec<u8>) -> &mut Self {
        self.scenery.push(payload);
        self
    }

    /// Add a ModelData subrecord.
    pub fn model_subrecord(&mut self, payload: Vec<u8>) -> &mut Self {
        self.models.push(payload);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut records: Vec<(u32, &[Vec<u8>])> = Vec::new();
        if !self.scenery.is_empty() {
            records.push((REC_SCENERY_OBJECT, &self.scenery));
        }
        if !self.models.is_empty() {
            records.push((REC_MODEL_DATA, &self.models));
        }

        let record_table_len = records.len() * 16;
        let mut data = vec![0u8; 0x38];
        data[0..4].copy_from_slice(&MAGIC1);
        data[0x10..0x14].copy_from_slice(&MAGIC2);
        data[0x14..0x18].copy_from_slice(&(records.len() as u32).to_le_bytes());

        // Layout: record table, then per record its subrecord section,
        // then all payloads.
        let mut section_offset = 0x38 + record_table_len;
        let mut sections = Vec::new();
        let mut payload_offset = section_offset
            + records
                .iter()
                .map(|(_, subs)| subs.len() * 16)
                .sum::<usize>();
        let mut payloads = Vec::new();

        for (rec_type, subs) in &records {
            let record_size: usize = subs.iter().map(Vec::len).sum();
            data.extend_from_slice(&rec_type.to_le_bytes());
            data.extend_from_slice(&(subs.len() as u32).to_le_bytes());
            data.extend_from_slice(&(section_offset as u32).to_le_bytes());
            data.extend_from_slice(&(record_size as u32).to_le_bytes());

            for sub in *subs {
                let mut entry = [0u8; 16];
                entry[8..12].copy_from_slice(&(payload_offset as u32).to_le_bytes());
                entry[12..16].copy_from_slice(&(sub.len() as u32).to_le_bytes());
                sections.extend_from_slice(&entry);
                payloads.extend_from_slice(sub);
                payload_offset += sub.len();
            }
            section_offset += subs.len() * 16;
        }

        data.extend_from_slice(&sections);
        data.extend_from_slice(&payloads);
        data
    }
}

pub fn guid(n: u8) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[15] = n;
    Uuid::from_bytes(bytes)
}
