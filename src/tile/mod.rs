//! FlightGear tile indexing.
//!
//! A tile index packs `(baseX, baseY, x, y)` into 32 bits: bits 0–2 `x`
//! within the tile band, bits 3–5 `y` within the 1° cell, bits 6–13
//! `baseY + 90`, bits 14+ `baseX + 180`. Tile widths vary by latitude
//! band so tiles stay roughly square on the ground.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TileError {
    #[error("coordinates out of range: lat {lat}, lon {lon}")]
    OutOfRange { lat: f64, lon: f64 },
}

/// Degrees of longitude per tile for the band containing `lat`.
pub fn tile_width_deg(lat: f64) -> f64 {
    if lat >= 89.0 {
        12.0
    } else if lat >= 86.0 {
        4.0
    } else if lat >= 83.0 {
        2.0
    } else if lat >= 76.0 {
        1.0
    } else if lat >= 62.0 {
        0.5
    } else if lat >= 22.0 {
        0.25
    } else {
        0.125
    }
}

/// Pack `(lat, lon)` into a tile index.
pub fn tile_index(lat: f64, lon: f64) -> Result<u32, TileError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(TileError::OutOfRange { lat, lon });
    }
    // The antimeridian belongs to the -180 side.
    let lon = if lon == 180.0 { -180.0 } else { lon };

    let base_y = lat.floor();
    let y = ((lat - base_y) * 8.0).floor() as u32;
    let width = tile_width_deg(lat);
    let base_x = ((lon / width).floor() * width).floor();
    let x = ((lon - base_x) / width).floor() as u32;

    let base_x = base_x as i32;
    let base_y = base_y as i32;
    Ok((((base_x + 180) as u32) << 14)
        | (((base_y + 90) as u32) << 6)
        | (y << 3)
        | x)
}

/// Unpack a tile index into the tile's south-west corner `(lat, lon)`.
pub fn tile_sw_corner(index: u32) -> (f64, f64) {
    let base_x = (index >> 14) as i32 - 180;
    let base_y = ((index >> 6) & 0xFF) as i32 - 90;
    let y = (index >> 3) & 0x7;
    let x = index & 0x7;

    let lat = base_y as f64 + y as f64 / 8.0;
    let lon = base_x as f64 + x as f64 * tile_width_deg(lat);
    (lat, lon)
}

/// Scenery directory pair for a coordinate: the 10x10-degree bucket and
/// the 1x1-degree bucket (e.g. `("w090n40", "w088n41")`).
pub fn bucket_dirs(lat: f64, lon: f64) -> (String, String) {
    let ew = if lon >= 0.0 { 'e' } else { 'w' };
    let ns = if lat >= 0.0 { 'n' } else { 's' };
    let lon10 = ((lon.abs() / 10.0).floor() * 10.0) as u32;
    let lat10 = ((lat.abs() / 10.0).floor() * 10.0) as u32;
    let lon1 = lon.abs().floor() as u32;
    let lat1 = lat.abs().floor() as u32;
    (
        format!("{ew}{lon10:03}{ns}{lat10:02}"),
        format!("{ew}{lon1:03}{ns}{lat1:02}"),
    )
}
