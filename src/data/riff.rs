//! Walker for the RIFF wrapper around embedded model packages.
//!
//! A ModelData subrecord embeds a RIFF container holding two chunk kinds:
//! `GXML` (XML metadata: model name and LOD list) and `GLBD` (one or more
//! GLB payloads, highest LOD first). Chunk ids appear on 4-byte alignment;
//! the empirical header offset between subrecord start and the container
//! varies, so the container is located by scanning, never assumed.

use thiserror::Error;
use tracing::warn;
use winnow::Parser;
use winnow::binary::le_u32;
use winnow::token::take;

use crate::data::parser_utils::WResult;

const RIFF_TAG: &[u8; 4] = b"RIFF";
const GXML_TAG: &[u8; 4] = b"GXML";
const GLBD_TAG: &[u8; 4] = b"GLBD";
const GLB_MARKER: &[u8; 4] = b"GLB\0";

#[derive(Debug, Error)]
pub enum RiffError {
    #[error("no RIFF container found in model payload")]
    NotRiff,
    #[error("GXML chunk is not valid XML: {0}")]
    BadXml(String),
}

/// One `<LOD ModelFile=... minSize=.../>` entry from the GXML metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LodDescriptor {
    pub model_file: String,
    pub min_size: u32,
}

/// Decoded model package: metadata plus the retained GLB payload.
#[derive(Debug)]
pub struct ModelPackage<'a> {
    /// Model name from GXML, with `.gltf` stripped and spaces mapped to
    /// underscores. Empty when the container carries no GXML chunk.
    pub name: String,
    pub lods: Vec<LodDescriptor>,
    /// First (highest-LOD) GLB blob in the GLBD chunk.
    pub glb: Option<&'a [u8]>,
    /// Total GLB blobs seen, retained or not.
    pub glb_count: usize,
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// A `(fourcc, declared size)` chunk header.
fn parse_chunk_header<'a>(input: &mut &'a [u8]) -> WResult<(&'a [u8], usize)> {
    let tag = take(4usize).parse_next(input)?;
    let size = le_u32.parse_next(input)? as usize;
    Ok((tag, size))
}

/// Locate the RIFF container within a ModelData subrecord payload.
///
/// Scans 4-byte aligned; returns the offset of the `RIFF` tag.
pub fn find_riff(payload: &[u8]) -> Option<usize> {
    (0..payload.len().saturating_sub(3)).step_by(4).find(|&off| {
        let input = &mut &payload[off..];
        let tag: WResult<&[u8]> = take(4usize).parse_next(input);
        matches!(tag, Ok(tag) if tag == RIFF_TAG)
    })
}

/// Sanitize a GXML model name: drop the `.gltf` suffix, map spaces to `_`.
fn sanitize_name(raw: &str) -> String {
    let stem = raw.strip_suffix(".gltf").unwrap_or(raw);
    stem.replace(' ', "_")
}

fn parse_gxml(xml: &str) -> Result<(String, Vec<LodDescriptor>), RiffError> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| RiffError::BadXml(e.to_string()))?;
    let mut name = String::new();
    let mut lods = Vec::new();
    for node in doc.descendants() {
        if node.has_tag_name("ModelInfo") {
            if let Some(raw) = node.attribute("name") {
                name = sanitize_name(raw);
            }
        } else if node.has_tag_name("LOD") {
            let model_file = node.attribute("ModelFile").unwrap_or_default().to_string();
            let min_size = node
                .attribute("minSize")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            lods.push(LodDescriptor {
                model_file,
                min_size,
            });
        }
    }
    Ok((name, lods))
}

/// Extract the GLB blobs from a GLBD chunk.
///
/// Returns `(first_glb, total_count)`. Each blob is framed by a `GLB\0`
/// marker followed by a u32 byte length.
fn scan_glbd(chunk: &[u8]) -> (Option<&[u8]>, usize) {
    let mut first = None;
    let mut count = 0usize;
    let mut pos = 0usize;
    while pos + 8 <= chunk.len() {
        let input = &mut &chunk[pos..];
        let (marker, size) = parse_chunk_header(input).expect("marker frame bounds checked");
        if marker != GLB_MARKER {
            pos += 4;
            continue;
        }
        let glb: WResult<&[u8]> = take(size).parse_next(input);
        let Ok(glb) = glb else {
            warn!(
                offset = pos,
                size,
                chunk_len = chunk.len(),
                "GLB blob overruns GLBD chunk; stopping scan"
            );
            break;
        };
        if first.is_none() {
            first = Some(glb);
        }
        count += 1;
        pos = align4(pos + 8 + size);
    }
    (first, count)
}

/// Decode the model package embedded in a ModelData subrecord payload.
pub fn decode_model_package(payload: &[u8]) -> Result<ModelPackage<'_>, RiffError> {
    let riff_start = find_riff(payload).ok_or(RiffError::NotRiff)?;
    let container = &payload[riff_start..];

    let mut package = ModelPackage {
        name: String::new(),
        lods: Vec::new(),
        glb: None,
        glb_count: 0,
    };

    let mut pos = 8usize;
    while pos + 8 <= container.len() {
        let input = &mut &container[pos..];
        let (tag, size) = parse_chunk_header(input).expect("chunk frame bounds checked");
        if tag != GXML_TAG && tag != GLBD_TAG {
            pos += 4;
            continue;
        }
        let chunk: WResult<&[u8]> = take(size).parse_next(input);
        let Ok(chunk) = chunk else {
            warn!(
                tag = %String::from_utf8_lossy(tag),
                offset = pos,
                size,
                "chunk overruns container; stopping walk"
            );
            break;
        };
        if tag == GXML_TAG {
            let xml = String::from_utf8_lossy(chunk);
            match parse_gxml(&xml) {
                Ok((name, lods)) => {
                    package.name = name;
                    package.lods = lods;
                }
                Err(err) => warn!(%err, "ignoring malformed GXML chunk"),
            }
        } else {
            let (glb, count) = scan_glbd(chunk);
            if package.glb.is_none() {
                package.glb = glb;
            }
            package.glb_count += count;
        }
        pos = align4(pos + 8 + size);
    }

    Ok(package)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Assemble a RIFF container with a GXML chunk and one or more GLBs.
    pub fn riff_bytes(model_name: &str, glbs: &[&[u8]]) -> Vec<u8> {
        let xml = format!(
            r#"<ModelInfo name="{model_name}" guid="{{0}}"><LODS><LOD ModelFile="{model_name}" minSize="0"/></LODS></ModelInfo>"#
        );

        let mut glbd = Vec::new();
        for glb in glbs {
            glbd.extend_from_slice(GLB_MARKER);
            glbd.extend_from_slice(&(glb.len() as u32).to_le_bytes());
            glbd.extend_from_slice(glb);
            while glbd.len() % 4 != 0 {
                glbd.push(0);
            }
        }

        let mut data = Vec::new();
        data.extend_from_slice(RIFF_TAG);
        data.extend_from_slice(&0u32.to_le_bytes()); // container size, unused by the walker
        data.extend_from_slice(GXML_TAG);
        data.extend_from_slice(&(xml.len() as u32).to_le_bytes());
        data.extend_from_slice(xml.as_bytes());
        while data.len() % 4 != 0 {
            data.push(0);
        }
        data.extend_from_slice(GLBD_TAG);
        data.extend_from_slice(&(glbd.len() as u32).to_le_bytes());
        data.extend_from_slice(&glbd);
        data
    }
}
