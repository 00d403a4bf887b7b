//! Decoder for SceneryObject subrecords: library-object and sim-object
//! placements.
//!
//! Both record kinds share a 44-byte header carrying the geographic anchor,
//! orientation and flag set; they differ in the tail (GUID + scale for
//! library objects, scale + title/path strings for sim objects).

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;
use winnow::Parser;
use winnow::binary::{le_f32, le_i16, le_i32, le_u16};
use winnow::token::take;

use crate::data::parser_utils::{
    WResult, angle_from_raw, parse_guid, parse_lon_lat, parse_utf8, round3,
};
use crate::terrain::TerrainSampler;

/// Record id of a library-object placement.
pub const ID_LIBRARY_OBJECT: u16 = 0x000B;
/// Record id of a sim-object placement.
pub const ID_SIM_OBJECT: u16 = 0x0019;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("record truncated: declared {declared} bytes, {available} available")]
    TruncatedRecord { declared: usize, available: usize },
}

/// Per-placement flag set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectFlags(pub u16);

impl ObjectFlags {
    pub const IS_ABOVE_AGL: u16 = 1 << 0;
    pub const NO_AUTOGEN_SUPPRESSION: u16 = 1 << 1;
    pub const NO_CRASH: u16 = 1 << 2;
    pub const NO_FOG: u16 = 1 << 3;
    pub const NO_SHADOW: u16 = 1 << 4;
    pub const NO_Z_WRITE: u16 = 1 << 5;
    pub const NO_Z_TEST: u16 = 1 << 6;

    pub fn is_above_agl(self) -> bool {
        self.0 & Self::IS_ABOVE_AGL != 0
    }
    pub fn no_shadow(self) -> bool {
        self.0 & Self::NO_SHADOW != 0
    }
}

/// Fields shared by both placement kinds.
#[derive(Debug, Clone)]
pub struct PlacementHeader {
    pub longitude: f64,
    pub latitude: f64,
    /// Meters. Already terrain-adjusted when [`ObjectFlags::IS_ABOVE_AGL`]
    /// was set at decode time; the adjustment is final.
    pub altitude: f64,
    pub pitch: f64,
    pub bank: f64,
    pub heading: f64,
    pub image_complexity: i16,
    pub flags: ObjectFlags,
}

/// A placement of a library model identified by GUID.
#[derive(Debug, Clone)]
pub struct LibraryPlacement {
    pub guid: Uuid,
    pub header: PlacementHeader,
    pub scale: f64,
}

/// A placement of a sim object identified by (title, path).
#[derive(Debug, Clone)]
pub struct SimObjectPlacement {
    pub title: String,
    pub path: String,
    pub header: PlacementHeader,
    pub scale: f64,
}

/// Outcome of decoding one record frame.
#[derive(Debug, Clone)]
pub enum DecodedPlacement {
    Library(LibraryPlacement),
    SimObject(SimObjectPlacement),
}

fn parse_header(
    input: &mut &[u8],
    terrain: &dyn TerrainSampler,
) -> WResult<PlacementHeader> {
    let (longitude, latitude) = parse_lon_lat(input)?;
    let altitude_milli = le_i32.parse_next(input)?;
    let flags = ObjectFlags(le_u16.parse_next(input)?);
    let pitch = angle_from_raw(le_u16.parse_next(input)?);
    let bank = angle_from_raw(le_u16.parse_next(input)?);
    let heading = angle_from_raw(le_u16.parse_next(input)?);
    let image_complexity = le_i16.parse_next(input)?;
    let _reserved = le_u16.parse_next(input)?;
    let _empty_guid = take(16usize).parse_next(input)?;

    let mut altitude = altitude_milli as f64 / 1000.0;
    if flags.is_above_agl() {
        altitude += terrain.elevation_m(latitude, longitude);
    }

    Ok(PlacementHeader {
        longitude,
        latitude,
        altitude,
        pitch,
        bank,
        heading,
        image_complexity,
        flags,
    })
}

fn parse_record_body(
    id: u16,
    input: &mut &[u8],
    terrain: &dyn TerrainSampler,
) -> WResult<DecodedPlacement> {
    let header = parse_header(input, terrain)?;
    match id {
        ID_LIBRARY_OBJECT => {
            let guid = parse_guid(input)?;
            let scale = le_f32.parse_next(input)? as f64;
            Ok(DecodedPlacement::Library(LibraryPlacement {
                guid,
                header,
                scale: round3(scale),
            }))
        }
        _ => {
            let scale = le_f32.parse_next(input)? as f64;
            let title_len = le_u16.parse_next(input)? as usize;
            let path_len = le_u16.parse_next(input)? as usize;
            let title = parse_utf8(input, title_len)?;
            let path = parse_utf8(input, path_len)?;
            Ok(DecodedPlacement::SimObject(SimObjectPlacement {
                title,
                path,
                header,
                scale: round3(scale),
            }))
        }
    }
}

/// Decode one `(id, size)`-framed scenery-object record.
///
/// `frame` covers the whole record including the 4 framing bytes, as
/// yielded by [`crate::data::bgl::FrameWalker`]. Records with an id outside
/// the scenery-object set return `Ok(None)` so the caller can resync.
pub fn decode_scenery_record(
    frame: &[u8],
    terrain: &dyn TerrainSampler,
) -> Result<Option<DecodedPlacement>, PlacementError> {
    let Some((id, size)) = crate::data::parser_utils::peek_record_frame(frame) else {
        return Err(PlacementError::TruncatedRecord {
            declared: 4,
            available: frame.len(),
        });
    };
    if id != ID_LIBRARY_OBJECT && id != ID_SIM_OBJECT {
        return Ok(None);
    }
    if size as usize > frame.len() {
        return Err(PlacementError::TruncatedRecord {
            declared: size as usize,
            available: frame.len(),
        });
    }

    let input = &mut &frame[4..];
    parse_record_body(id, input, terrain)
        .map(Some)
        .map_err(|_| PlacementError::TruncatedRecord {
            declared: size as usize,
            available: frame.len(),
        })
}

/// Decode every placement found in a SceneryObject subrecord payload.
///
/// Unknown frames are skipped by their declared length; decode failures on
/// individual frames are logged and dropped (lossy tolerance).
pub fn decode_subrecord(
    payload: &[u8],
    terrain: &dyn TerrainSampler,
    out: &mut Vec<DecodedPlacement>,
) {
    for (id, frame) in crate::data::bgl::FrameWalker::new(payload) {
        if id != ID_LIBRARY_OBJECT && id != ID_SIM_OBJECT {
            continue;
        }
        match decode_scenery_record(frame, terrain) {
            Ok(Some(placement)) => out.push(placement),
            Ok(None) => {}
            Err(err) => warn!(%err, "dropping malformed placement record"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::{FixedElevation, ZeroTerrain};

    fn test_guid() -> Uuid {
        Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap()
    }

    #[test]
    fn decodes_library_placement_at_origin() {
        let rec = test_support::library_record_bytes(
            402_653_184,
            268_435_456,
            0,
            0,
            0,
            test_guid(),
            1.0,
        );
        let decoded = decode_scenery_record(&rec, &ZeroTerrain).unwrap().unwrap();
        let DecodedPlacement::Library(lib) = decoded else {
            panic!("expected library placement");
        };
        assert_eq!(lib.guid, test_guid());
        assert_eq!(lib.header.longitude, 0.0);
        assert_eq!(lib.header.latitude, 0.0);
        assert_eq!(lib.header.altitude, 0.0);
        assert_eq!(lib.scale, 1.0);
    }

    #[test]
    fn agl_flag_adds_terrain_elevation() {
        let rec = test_support::library_record_bytes(
            402_653_184,
            268_435_456,
            2000,
            ObjectFlags::IS_ABOVE_AGL,
            0,
            test_guid(),
            1.0,
        );
        let terrain = FixedElevation(100.5);
        let decoded = decode_scenery_record(&rec, &terrain).unwrap().unwrap();
        let DecodedPlacement::Library(lib) = decoded else {
            panic!("expected library placement");
        };
        assert_eq!(lib.header.altitude, 102.5);
    }

    #[test]
    fn agl_flag_with_zero_terrain_is_identity() {
        let rec = test_support::library_record_bytes(
            402_653_184,
            268_435_456,
            2000,
            ObjectFlags::IS_ABOVE_AGL,
            0,
            test_guid(),
            1.0,
        );
        let decoded = decode_scenery_record(&rec, &ZeroTerrain).unwrap().unwrap();
        let DecodedPlacement::Library(lib) = decoded else {
            panic!("expected library placement");
        };
        assert_eq!(lib.header.altitude, 2.0);
    }

    #[test]
    fn decodes_sim_object_strings() {
        let mut rec = Vec::new();
        rec.extend_from_slice(&ID_SIM_OBJECT.to_le_bytes());
        rec.extend_from_slice(&0u16.to_le_bytes()); // patched below
        rec.extend_from_slice(&402_653_184u32.to_le_bytes());
        rec.extend_from_slice(&268_435_456u32.to_le_bytes());
        rec.extend_from_slice(&0i32.to_le_bytes());
        rec.extend_from_slice(&0u16.to_le_bytes());
        rec.extend_from_slice(&[0u8; 6]); // pitch/bank/heading
        rec.extend_from_slice(&0i16.to_le_bytes());
        rec.extend_from_slice(&0u16.to_le_bytes());
        rec.extend_from_slice(&[0u8; 16]);
        rec.extend_from_slice(&2.0f32.to_le_bytes());
        let title = b"Windsock";
        let path = b"Assets\\windsock";
        rec.extend_from_slice(&(title.len() as u16).to_le_bytes());
        rec.extend_from_slice(&(path.len() as u16).to_le_bytes());
        rec.extend_from_slice(title);
        rec.extend_from_slice(path);
        let size = rec.len() as u16;
        rec[2..4].copy_from_slice(&size.to_le_bytes());

        let decoded = decode_scenery_record(&rec, &ZeroTerrain).unwrap().unwrap();
        let DecodedPlacement::SimObject(sim) = decoded else {
            panic!("expected sim object");
        };
        assert_eq!(sim.title, "Windsock");
        assert_eq!(sim.path, "Assets\\windsock");
        assert_eq!(sim.scale, 2.0);
    }

    #[test]
    fn oversized_declared_length_is_truncated_record() {
        let mut rec = test_support::library_record_bytes(
            0, 0, 0, 0, 0, test_guid(), 1.0,
        );
        rec[2..4].copy_from_slice(&500u16.to_le_bytes());
        assert!(matches!(
            decode_scenery_record(&rec, &ZeroTerrain),
            Err(PlacementError::TruncatedRecord { .. })
        ));
    }
}
