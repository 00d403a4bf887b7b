//! Decoder for Airport subrecords.
//!
//! An airport record is a 0x44-byte header followed by a sequence of
//! `(id:u16, size:u32)`-framed child records (runways, starts, taxiway
//! network, aprons, signage, jetways, ...). The conversion pipeline only
//! consumes the library/sim-object placements embedded in jetway and
//! projected-mesh records; the rest of the aggregate is decoded for
//! completeness and exposed to callers.

use thiserror::Error;
use tracing::{debug, warn};
use winnow::Parser;
use winnow::binary::{le_f32, le_i32, le_u16, le_u32, u8 as any_u8};
use winnow::token::take;

use crate::data::parser_utils::{
    WResult, decode_base38, latitude_from_raw, longitude_from_raw, parse_lon_lat,
    peek_record_frame,
};
use crate::data::placement::{self, DecodedPlacement};
use crate::terrain::TerrainSampler;

/// Record id of an airport aggregate.
pub const ID_AIRPORT: u16 = 0x0056;

// Child record ids.
const ID_NAME: u16 = 0x0019;
const ID_RUNWAY: u16 = 0x00CE;
const ID_START: u16 = 0x0011;
const ID_TAXIWAY_POINT: u16 = 0x001A;
const ID_TAXIWAY_PARKING: u16 = 0x00E7;
const ID_TAXIWAY_PATH: u16 = 0x00D4;
const ID_TAXIWAY_PATH_MATERIAL: u16 = 0x00D5;
const ID_TAXI_NAME: u16 = 0x001D;
const ID_APRON: u16 = 0x00D3;
const ID_TAXIWAY_SIGN: u16 = 0x00D9;
const ID_PAINTED_LINE: u16 = 0x00CF;
const ID_PAINTED_HATCHED: u16 = 0x00D8;
const ID_JETWAY: u16 = 0x00DE;
const ID_LIGHT_SUPPORT: u16 = 0x0057;
const ID_APPROACH: u16 = 0x0024;
const ID_APRON_EDGE_LIGHTS: u16 = 0x0031;
const ID_HELIPAD: u16 = 0x0026;
const ID_PROJECTED_MESH: u16 = 0x00E8;

// Runway-nested record ids.
const ID_OFFSET_THRESHOLD: u16 = 0x0005;
const ID_BLAST_PAD_PRIMARY: u16 = 0x0007;
const ID_BLAST_PAD_SECONDARY: u16 = 0x0008;
const ID_VASI_FIRST: u16 = 0x000B;
const ID_VASI_LAST: u16 = 0x000E;
const ID_OVERRUN_PRIMARY: u16 = 0x0065;
const ID_OVERRUN_SECONDARY: u16 = 0x0066;
const ID_APPROACH_LIGHTS_PRIMARY: u16 = 0x00DF;
const ID_APPROACH_LIGHTS_SECONDARY: u16 = 0x00E0;
const ID_FACILITY_MATERIAL: u16 = 0x00CB;

/// Offset of the first child record within the airport payload.
const BODY_OFFSET: usize = 0x44;

#[derive(Debug, Error)]
pub enum AirportError {
    #[error("airport record truncated: {available} bytes, header needs {needed}")]
    TruncatedRecord { needed: usize, available: usize },
    #[error("record id {0:#06x} is not an airport record")]
    NotAnAirport(u16),
}

/// Counts declared in the airport header. Child records found while walking
/// the body may be fewer when the record is truncated.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredCounts {
    pub runways: u8,
    pub coms: u8,
    pub starts: u8,
    pub approaches: u8,
    pub legacy_aprons: u8,
    pub helipads: u8,
    pub departures: u8,
    pub arrivals: u8,
    pub aprons: u16,
    pub painted_lines: u16,
    pub painted_polygons: u16,
    pub painted_hatched_areas: u16,
}

/// A strip of pavement attached to a runway end (offset threshold, blast
/// pad, overrun).
#[derive(Debug, Clone, Copy)]
pub struct RunwayPad {
    pub surface: u16,
    pub length_m: f32,
    pub width_m: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Runway {
    pub surface: u16,
    pub primary_number: u8,
    pub primary_designator: u8,
    pub secondary_number: u8,
    pub secondary_designator: u8,
    pub primary_ils_ident: String,
    pub secondary_ils_ident: String,
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    pub length_m: f32,
    pub width_m: f32,
    pub heading: f32,
    pub pattern_altitude: f32,
    pub offset_thresholds: Vec<RunwayPad>,
    pub blast_pads: Vec<RunwayPad>,
    pub overruns: Vec<RunwayPad>,
    /// VASI / approach-light / facility-material records present but not
    /// decoded beyond their ids.
    pub lighting_record_ids: Vec<u16>,
}

#[derive(Debug, Clone, Copy)]
pub struct RunwayStart {
    pub runway_number: u8,
    pub designator_and_type: u8,
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    pub heading: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct TaxiwayPoint {
    pub kind: u8,
    pub orientation: u8,
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Helipad {
    pub surface: u16,
    pub kind: u8,
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    pub length_m: f32,
    pub width_m: f32,
    pub heading: f32,
}

/// A paved apron polygon.
#[derive(Debug, Clone, Default)]
pub struct Apron {
    pub surface: u16,
    /// Polygon outline as `(longitude, latitude)` pairs.
    pub vertices: Vec<(f64, f64)>,
}

/// One parking spot of a taxiway-parking record.
#[derive(Debug, Clone, Copy)]
pub struct ParkingSpot {
    pub flags: u32,
    pub radius_m: f32,
    pub heading: f32,
    pub longitude: f64,
    pub latitude: f64,
}

/// One edge of the taxiway network.
#[derive(Debug, Clone, Copy)]
pub struct TaxiwayPath {
    /// Index of the start point in [`Airport::taxiway_points`].
    pub start: u16,
    /// End point index in the low 12 bits, designator in the high 4.
    pub end_and_designator: u16,
    pub kind: u8,
    pub name_index: u8,
    pub marking_flags: u8,
    pub light_flags: u8,
    pub width_m: f32,
}

/// A jetway and the scenery objects it embeds.
#[derive(Debug, Clone, Default)]
pub struct Jetway {
    pub parking_number: u16,
    pub parking_gate: u16,
    /// Indices into [`Airport::embedded_placements`].
    pub placement_indices: Vec<usize>,
}

/// Decoded airport aggregate.
#[derive(Debug, Default)]
pub struct Airport {
    pub icao: String,
    pub region: String,
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    pub tower_longitude: f64,
    pub tower_latitude: f64,
    pub tower_altitude: f64,
    pub magnetic_variation: f32,
    pub declared: DeclaredCounts,
    pub runways: Vec<Runway>,
    pub starts: Vec<RunwayStart>,
    pub taxiway_points: Vec<TaxiwayPoint>,
    pub parking_spots: Vec<ParkingSpot>,
    pub taxiway_paths: Vec<TaxiwayPath>,
    /// Count of nested taxiway-path material records.
    pub taxiway_path_materials: u16,
    pub taxi_names: Vec<String>,
    pub taxiway_signs: u16,
    pub aprons: Vec<Apron>,
    pub painted_line_records: u16,
    pub helipads: Vec<Helipad>,
    pub jetways: Vec<Jetway>,
    /// Placements embedded in jetway / projected-mesh records. Routed into
    /// the same pass-1 collections as top-level SceneryObject subrecords.
    pub embedded_placements: Vec<DecodedPlacement>,
}

fn parse_header(payload: &[u8]) -> Result<Airport, AirportError> {
    if payload.len() < BODY_OFFSET {
        return Err(AirportError::TruncatedRecord {
            needed: BODY_OFFSET,
            available: payload.len(),
        });
    }

    let input = &mut &payload[..];
    let parsed: WResult<(u16, Airport)> = (|| {
        let id = le_u16.parse_next(input)?;
        let _record_size = le_u32.parse_next(input)?;

        let mut airport = Airport::default();
        let mut counts = DeclaredCounts::default();
        counts.runways = any_u8.parse_next(input)?;
        counts.coms = any_u8.parse_next(input)?;
        counts.starts = any_u8.parse_next(input)?;
        counts.approaches = any_u8.parse_next(input)?;
        counts.legacy_aprons = any_u8.parse_next(input)?;
        counts.helipads = any_u8.parse_next(input)?;
        let (lon, lat) = parse_lon_lat(input)?;
        airport.longitude = lon;
        airport.latitude = lat;
        airport.altitude = le_i32.parse_next(input)? as f64 / 1000.0;
        airport.tower_latitude = latitude_from_raw(le_u32.parse_next(input)?);
        airport.tower_longitude = longitude_from_raw(le_u32.parse_next(input)?);
        airport.tower_altitude = le_i32.parse_next(input)? as f64 / 1000.0;
        airport.magnetic_variation = le_f32.parse_next(input)?;
        airport.icao = decode_base38(le_u32.parse_next(input)?);
        airport.region = decode_base38(le_u32.parse_next(input)?);

        // Sparse late-header fields between the idents and the body.
        let _ = take(7usize).parse_next(input)?; // 0x30..0x37
        counts.departures = any_u8.parse_next(input)?;
        let _ = any_u8.parse_next(input)?; // 0x38
        counts.arrivals = any_u8.parse_next(input)?;
        let _ = take(2usize).parse_next(input)?; // 0x3A..0x3C
        counts.aprons = le_u16.parse_next(input)?;
        counts.painted_lines = le_u16.parse_next(input)?;
        counts.painted_polygons = le_u16.parse_next(input)?;
        counts.painted_hatched_areas = le_u16.parse_next(input)?;

        airport.declared = counts;
        Ok((id, airport))
    })();
    let (id, airport) = parsed.expect("header bounds checked against BODY_OFFSET");
    if id != ID_AIRPORT {
        return Err(AirportError::NotAnAirport(id));
    }
    Ok(airport)
}

/// Walker over `(id:u16, size:u32)`-framed records.
///
/// `size` covers the whole frame including the 6 header bytes; the walker
/// always seeks to `start + size`, so a child decoder that reads less (or
/// more) cannot desynchronize the stream.
struct RecordWalker<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> RecordWalker<'a> {
    fn new(payload: &'a [u8]) -> Self {
        RecordWalker { payload, pos: 0 }
    }
}

impl<'a> Iterator for RecordWalker<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.payload.get(self.pos..)?;
        let mut frame_input = remaining;
        let frame: WResult<(u16, usize)> = (|| {
            let id = le_u16.parse_next(&mut frame_input)?;
            let size = le_u32.parse_next(&mut frame_input)? as usize;
            Ok((id, size))
        })();
        let Ok((id, size)) = frame else {
            return None;
        };
        if size < 6 || size > remaining.len() {
            warn!(
                id = format_args!("{id:#06x}"),
                size,
                remaining = remaining.len(),
                "truncated airport child record; ending walk"
            );
            return None;
        }
        let body = &remaining[6..size];
        self.pos += size;
        Some((id, body))
    }
}

fn parse_pad(input: &mut &[u8]) -> WResult<RunwayPad> {
    let surface = le_u16.parse_next(input)?;
    let _pad = le_u16.parse_next(input)?;
    let length_m = le_f32.parse_next(input)?;
    let width_m = le_f32.parse_next(input)?;
    Ok(RunwayPad {
        surface,
        length_m,
        width_m,
    })
}

fn parse_runway(body: &[u8]) -> WResult<Runway> {
    let input = &mut &body[..];
    let mut rw = Runway {
        surface: le_u16.parse_next(input)?,
        primary_number: any_u8.parse_next(input)?,
        primary_designator: any_u8.parse_next(input)?,
        secondary_number: any_u8.parse_next(input)?,
        secondary_designator: any_u8.parse_next(input)?,
        primary_ils_ident: decode_base38(le_u32.parse_next(input)?),
        secondary_ils_ident: decode_base38(le_u32.parse_next(input)?),
        ..Runway::default()
    };
    let (lon, lat) = parse_lon_lat(input)?;
    rw.longitude = lon;
    rw.latitude = lat;
    rw.altitude = le_i32.parse_next(input)? as f64 / 1000.0;
    rw.length_m = le_f32.parse_next(input)?;
    rw.width_m = le_f32.parse_next(input)?;
    rw.heading = le_f32.parse_next(input)?;
    rw.pattern_altitude = le_f32.parse_next(input)?;
    let _marking_flags = le_u16.parse_next(input)?;
    let _light_flags = any_u8.parse_next(input)?;
    let _pattern_flags = any_u8.parse_next(input)?;

    // Nested records to the end of the runway body.
    for (id, nested) in RecordWalker::new(*input) {
        match id {
            ID_OFFSET_THRESHOLD => {
                if let Ok(pad) = parse_pad(&mut &nested[..]) {
                    rw.offset_thresholds.push(pad);
                }
            }
            ID_BLAST_PAD_PRIMARY | ID_BLAST_PAD_SECONDARY => {
                if let Ok(pad) = parse_pad(&mut &nested[..]) {
                    rw.blast_pads.push(pad);
                }
            }
            ID_OVERRUN_PRIMARY | ID_OVERRUN_SECONDARY => {
                if let Ok(pad) = parse_pad(&mut &nested[..]) {
                    rw.overruns.push(pad);
                }
            }
            ID_VASI_FIRST..=ID_VASI_LAST
            | ID_APPROACH_LIGHTS_PRIMARY
            | ID_APPROACH_LIGHTS_SECONDARY
            | ID_FACILITY_MATERIAL => {
                rw.lighting_record_ids.push(id);
            }
            other => {
                debug!(id = format_args!("{other:#06x}"), "unknown runway child record");
            }
        }
    }
    Ok(rw)
}

fn parse_start(body: &[u8]) -> WResult<RunwayStart> {
    let input = &mut &body[..];
    let runway_number = any_u8.parse_next(input)?;
    let designator_and_type = any_u8.parse_next(input)?;
    let (longitude, latitude) = parse_lon_lat(input)?;
    let altitude = le_i32.parse_next(input)? as f64 / 1000.0;
    let heading = le_f32.parse_next(input)?;
    Ok(RunwayStart {
        runway_number,
        designator_and_type,
        longitude,
        latitude,
        altitude,
        heading,
    })
}

fn parse_taxiway_points(body: &[u8], out: &mut Vec<TaxiwayPoint>) -> WResult<()> {
    let input = &mut &body[..];
    let count = le_u16.parse_next(input)? as usize;
    for _ in 0..count {
        let kind = any_u8.parse_next(input)?;
        let orientation = any_u8.parse_next(input)?;
        let _reserved = le_u16.parse_next(input)?;
        let (longitude, latitude) = parse_lon_lat(input)?;
        out.push(TaxiwayPoint {
            kind,
            orientation,
            longitude,
            latitude,
        });
    }
    Ok(())
}

fn parse_taxi_names(body: &[u8], out: &mut Vec<String>) -> WResult<()> {
    let input = &mut &body[..];
    let count = le_u16.parse_next(input)? as usize;
    for _ in 0..count {
        let raw = take(8usize).parse_next(input)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        out.push(String::from_utf8_lossy(&raw[..end]).into_owned());
    }
    Ok(())
}

fn parse_apron(body: &[u8]) -> WResult<Apron> {
    let input = &mut &body[..];
    let surface = le_u16.parse_next(input)?;
    let vertex_count = le_u16.parse_next(input)? as usize;
    let mut vertices = Vec::with_capacity(vertex_count);
    for _ in 0..vertex_count {
        vertices.push(parse_lon_lat(input)?);
    }
    Ok(Apron { surface, vertices })
}

fn parse_parking_spots(body: &[u8], out: &mut Vec<ParkingSpot>) -> WResult<()> {
    let input = &mut &body[..];
    let count = le_u16.parse_next(input)? as usize;
    for _ in 0..count {
        let flags = le_u32.parse_next(input)?;
        let radius_m = le_f32.parse_next(input)?;
        let heading = le_f32.parse_next(input)?;
        let (longitude, latitude) = parse_lon_lat(input)?;
        out.push(ParkingSpot {
            flags,
            radius_m,
            heading,
            longitude,
            latitude,
        });
    }
    Ok(())
}

/// Taxiway paths: a run of fixed 12-byte edges, then nested records
/// (facility materials, id 0x00D5) to the end of the body.
fn parse_taxiway_paths(
    body: &[u8],
    out: &mut Vec<TaxiwayPath>,
    material_count: &mut u16,
) -> WResult<()> {
    let input = &mut &body[..];
    let count = le_u16.parse_next(input)? as usize;
    for _ in 0..count {
        let start = le_u16.parse_next(input)?;
        let end_and_designator = le_u16.parse_next(input)?;
        let kind = any_u8.parse_next(input)?;
        let name_index = any_u8.parse_next(input)?;
        let marking_flags = any_u8.parse_next(input)?;
        let light_flags = any_u8.parse_next(input)?;
        let width_m = le_f32.parse_next(input)?;
        out.push(TaxiwayPath {
            start,
            end_and_designator,
            kind,
            name_index,
            marking_flags,
            light_flags,
            width_m,
        });
    }
    for (id, _) in RecordWalker::new(*input) {
        if id == ID_TAXIWAY_PATH_MATERIAL {
            *material_count += 1;
        }
    }
    Ok(())
}

fn parse_helipad(body: &[u8]) -> WResult<Helipad> {
    let input = &mut &body[..];
    let surface = le_u16.parse_next(input)?;
    let kind = any_u8.parse_next(input)?;
    let _color = any_u8.parse_next(input)?;
    let (longitude, latitude) = parse_lon_lat(input)?;
    let altitude = le_i32.parse_next(input)? as f64 / 1000.0;
    let length_m = le_f32.parse_next(input)?;
    let width_m = le_f32.parse_next(input)?;
    let heading = le_f32.parse_next(input)?;
    Ok(Helipad {
        surface,
        kind,
        longitude,
        latitude,
        altitude,
        length_m,
        width_m,
        heading,
    })
}

/// Scan a record body for embedded scenery-object records.
///
/// Jetway and projected-mesh bodies interleave fixed fields and full
/// scenery-object records; the exact prefix layout varies between format
/// revisions, so the scan walks 2-byte aligned looking for a plausible
/// `(id, size)` frame and validates by decoding.
fn scan_embedded_placements(
    body: &[u8],
    terrain: &dyn TerrainSampler,
    out: &mut Vec<DecodedPlacement>,
) -> Vec<usize> {
    let mut indices = Vec::new();
    let mut pos = 0usize;
    while pos + 4 <= body.len() {
        let Some((id, size)) = peek_record_frame(&body[pos..]) else {
            break;
        };
        let size = size as usize;
        let plausible = match id {
            placement::ID_LIBRARY_OBJECT => size == 64,
            placement::ID_SIM_OBJECT => (48..=1024).contains(&size),
            _ => false,
        };
        if plausible && pos + size <= body.len() {
            match placement::decode_scenery_record(&body[pos..pos + size], terrain) {
                Ok(Some(decoded)) => {
                    indices.push(out.len());
                    out.push(decoded);
                    pos += size;
                    continue;
                }
                Ok(None) | Err(_) => {}
            }
        }
        pos += 2;
    }
    indices
}

/// Decode an Airport subrecord payload.
///
/// Header corruption is fatal for the record; body corruption ends the
/// child walk early and returns the partial aggregate (lossy tolerance).
pub fn decode_airport(
    payload: &[u8],
    terrain: &dyn TerrainSampler,
) -> Result<Airport, AirportError> {
    let mut airport = parse_header(payload)?;

    for (id, body) in RecordWalker::new(&payload[BODY_OFFSET..]) {
        match id {
            ID_NAME => {
                let raw = body.strip_suffix(&[0]).unwrap_or(body);
                airport.name = String::from_utf8_lossy(raw).into_owned();
            }
            ID_RUNWAY => match parse_runway(body) {
                Ok(rw) => airport.runways.push(rw),
                Err(_) => warn!(icao = %airport.icao, "dropping malformed runway record"),
            },
            ID_START => match parse_start(body) {
                Ok(start) => airport.starts.push(start),
                Err(_) => warn!(icao = %airport.icao, "dropping malformed start record"),
            },
            ID_TAXIWAY_POINT => {
                if parse_taxiway_points(body, &mut airport.taxiway_points).is_err() {
                    warn!(icao = %airport.icao, "taxiway point list truncated");
                }
            }
            ID_TAXIWAY_PARKING => {
                if parse_parking_spots(body, &mut airport.parking_spots).is_err() {
                    warn!(icao = %airport.icao, "parking spot list truncated");
                }
            }
            ID_TAXIWAY_PATH => {
                if parse_taxiway_paths(
                    body,
                    &mut airport.taxiway_paths,
                    &mut airport.taxiway_path_materials,
                )
                .is_err()
                {
                    warn!(icao = %airport.icao, "taxiway path list truncated");
                }
            }
            ID_TAXI_NAME => {
                if parse_taxi_names(body, &mut airport.taxi_names).is_err() {
                    warn!(icao = %airport.icao, "taxi name list truncated");
                }
            }
            ID_TAXIWAY_SIGN => {
                let count: WResult<u16> = le_u16.parse_next(&mut &body[..]);
                if let Ok(count) = count {
                    airport.taxiway_signs += count;
                }
            }
            ID_HELIPAD => match parse_helipad(body) {
                Ok(pad) => airport.helipads.push(pad),
                Err(_) => warn!(icao = %airport.icao, "dropping malformed helipad record"),
            },
            ID_APRON => match parse_apron(body) {
                Ok(apron) => airport.aprons.push(apron),
                Err(_) => warn!(icao = %airport.icao, "dropping malformed apron record"),
            },
            ID_PAINTED_LINE => airport.painted_line_records += 1,
            ID_JETWAY => {
                let mut jetway = Jetway::default();
                let mut prefix_input = body;
                let prefix: WResult<(u16, u16)> = (|| {
                    let number = le_u16.parse_next(&mut prefix_input)?;
                    let gate = le_u16.parse_next(&mut prefix_input)?;
                    Ok((number, gate))
                })();
                if let Ok((number, gate)) = prefix {
                    jetway.parking_number = number;
                    jetway.parking_gate = gate;
                }
                jetway.placement_indices = scan_embedded_placements(
                    body.get(4..).unwrap_or(&[]),
                    terrain,
                    &mut airport.embedded_placements,
                );
                airport.jetways.push(jetway);
            }
            ID_PROJECTED_MESH => {
                scan_embedded_placements(body, terrain, &mut airport.embedded_placements);
            }
            // Recognized but intentionally not decoded further.
            ID_PAINTED_HATCHED | ID_LIGHT_SUPPORT | ID_APPROACH | ID_APRON_EDGE_LIGHTS => {}
            other => {
                debug!(
                    id = format_args!("{other:#06x}"),
                    icao = %airport.icao,
                    "skipping unknown airport child record"
                );
            }
        }
    }

    Ok(airport)
}
