//! Placement transforms.
//!
//! Three coordinate conventions meet here: the geographic anchor from the
//! BGL placement, the glTF frame the composite tile model is built in
//! (X east, Y up, Z south), and the AC3D frame FlightGear expects (the
//! glTF transform sandwiched between Z flips, plus an X negation applied
//! by the writer).

use glam::{DMat4, DQuat, DVec3, EulerRot};

use crate::data::placement::LibraryPlacement;

/// Meters per degree of latitude.
const METERS_PER_DEG_LAT: f64 = 110_540.0;
/// Meters per degree of longitude at the equator.
const METERS_PER_DEG_LON: f64 = 111_320.0;

/// Geographic anchor a tile's model is built around.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TileOrigin {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Transform placing one library object into the tile's glTF frame.
///
/// The longitude offset is negated: MSFS measures it east-positive while
/// the tile frame's Z axis points south, and the composite is later
/// rotated into place by the STG heading.
pub fn placement_transform(placement: &LibraryPlacement, origin: &TileOrigin) -> DMat4 {
    let header = &placement.header;
    let lon_offset = -(header.longitude - origin.longitude)
        * METERS_PER_DEG_LON
        * origin.latitude.to_radians().cos();
    let lat_offset = (header.latitude - origin.latitude) * METERS_PER_DEG_LAT;
    let alt_offset = header.altitude - origin.altitude;

    let translation = DVec3::new(lon_offset, alt_offset, lat_offset);
    let rotation = DQuat::from_euler(
        EulerRot::YXZ,
        -header.heading.to_radians(),
        header.pitch.to_radians(),
        header.bank.to_radians(),
    );
    DMat4::from_scale_rotation_translation(DVec3::splat(placement.scale), rotation, translation)
}

/// Sandwich a glTF-frame transform between Z flips for the AC3D frame.
pub fn flip_z_sandwich(gltf_transform: DMat4) -> DMat4 {
    let flip = DMat4::from_scale(DVec3::new(1.0, 1.0, -1.0));
    flip * gltf_transform * flip
}
