//! GLB (binary glTF) container split.
//!
//! A GLB is a 12-byte header followed by a JSON chunk and an optional BIN
//! chunk, each framed by `(length:u32, type:u32)`. MSFS pads the JSON
//! chunk irregularly, so non-printable bytes are scrubbed to spaces before
//! the parse.

use serde_json::Value;
use thiserror::Error;
use winnow::Parser;
use winnow::binary::le_u32;
use winnow::token::take;

use crate::data::parser_utils::WResult;

const GLB_MAGIC: &[u8; 4] = b"glTF";
const CHUNK_TYPE_BIN: u32 = 0x004E4942;

#[derive(Debug, Error)]
pub enum GlbError {
    #[error("not a GLB stream")]
    BadHeader,
    #[error("JSON chunk out of bounds (len {len}, stream {stream})")]
    JsonOutOfBounds { len: usize, stream: usize },
    #[error("JSON chunk is not valid glTF JSON: {0}")]
    BadJson(String),
}

/// A split GLB: parsed JSON root plus the BIN chunk bytes.
#[derive(Debug)]
pub struct Glb<'a> {
    pub json: Value,
    pub bin: &'a [u8],
}

fn scrub_to_json(raw: &[u8]) -> String {
    let mut bytes = raw.to_vec();
    for b in &mut bytes {
        if *b < 0x20 || *b == 0x7F {
            *b = b' ';
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Split and parse a GLB byte stream.
pub fn split(data: &[u8]) -> Result<Glb<'_>, GlbError> {
    let input = &mut &data[..];

    // 12-byte file header plus the JSON chunk frame.
    let header: WResult<(&[u8], usize)> = (|| {
        let magic = take(4usize).parse_next(input)?;
        let _version = le_u32.parse_next(input)?;
        let _total_length = le_u32.parse_next(input)?;
        let json_len = le_u32.parse_next(input)? as usize;
        let _json_chunk_type = le_u32.parse_next(input)?;
        Ok((magic, json_len))
    })();
    let Ok((magic, json_len)) = header else {
        return Err(GlbError::BadHeader);
    };
    if magic != GLB_MAGIC {
        return Err(GlbError::BadHeader);
    }

    let json_raw: WResult<&[u8]> = take(json_len).parse_next(input);
    let Ok(json_raw) = json_raw else {
        return Err(GlbError::JsonOutOfBounds {
            len: json_len,
            stream: data.len(),
        });
    };

    let json_text = scrub_to_json(json_raw);
    let json: Value =
        serde_json::from_str(&json_text).map_err(|e| GlbError::BadJson(e.to_string()))?;

    // Optional BIN chunk: length, type, payload. A truncated or foreign
    // trailing chunk means no binary data.
    let bin_chunk: WResult<(u32, &[u8])> = (|| {
        let bin_len = le_u32.parse_next(input)? as usize;
        let bin_type = le_u32.parse_next(input)?;
        let payload = take(bin_len).parse_next(input)?;
        Ok((bin_type, payload))
    })();
    let bin = match bin_chunk {
        Ok((CHUNK_TYPE_BIN, payload)) => payload,
        _ => &[],
    };

    Ok(Glb { json, bin })
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Assemble a standard GLB from JSON text and a BIN payload.
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
        data.extend_from_slice(&0x4E4F534Au32.to_le_bytes()); // "JSON"
        data.extend_from_slice(&json_bytes);
        if !bin.is_empty() {
            data.extend_from_slice(&(bin_bytes.len() as u32).to_le_bytes());
            data.extend_from_slice(&super::CHUNK_TYPE_BIN.to_le_bytes());
            data.extend_from_slice(&bin_bytes);
        }
        data
    }
}
