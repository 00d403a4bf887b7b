//! Shared winnow-based parsing utilities and types used across all binary
//! decoders.
//!
//! Every format this crate consumes (BGL, BTG, the RIFF model wrapper, GLB)
//! is little-endian throughout, so the helpers here are all `le_*` based.

use uuid::Uuid;
use winnow::Parser;
use winnow::binary::{le_u16, le_u32};
use winnow::error::ContextError;
use winnow::token::take;

/// Common result type for winnow parsers.
pub type WResult<T> = Result<T, winnow::error::ErrMode<ContextError>>;

/// Parse a 16-byte GUID in the BGL on-disk layout.
///
/// The first three fields are little-endian, matching the Windows `GUID`
/// struct the format was written with.
pub fn parse_guid(input: &mut &[u8]) -> WResult<Uuid> {
    let raw = take(16usize).parse_next(input)?;
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(raw);
    Ok(Uuid::from_bytes_le(bytes))
}

/// Parse a fixed-length UTF-8 string, trimming trailing NULs.
pub fn parse_utf8(input: &mut &[u8], len: usize) -> WResult<String> {
    let raw = take(len).parse_next(input)?;
    let raw = raw.strip_suffix(&[0]).unwrap_or(raw);
    Ok(String::from_utf8_lossy(raw).into_owned())
}

// ── Quantized-angle conversions ─────────────────────────────────────────────
//
// BGL stores geographic angles as fixed-point integers over the full
// coordinate range. The divisors are format constants, not tunables.

/// Longitude stored as a u32 over 805,306,368 counts per 360 degrees.
pub fn longitude_from_raw(raw: u32) -> f64 {
    raw as f64 * 360.0 / 805_306_368.0 - 180.0
}

/// Latitude stored as a u32 over 536,870,912 counts per 180 degrees,
/// counted down from the north pole.
pub fn latitude_from_raw(raw: u32) -> f64 {
    90.0 - raw as f64 * 180.0 / 536_870_912.0
}

/// Heading/pitch/bank stored as a u16 over the full circle.
/// Rounded to 3 decimals like the placement records expect downstream.
pub fn angle_from_raw(raw: u16) -> f64 {
    round3(raw as f64 * 360.0 / 65_536.0)
}

/// Round to 3 decimal places.
pub fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Parse a `(longitude, latitude)` pair of raw u32 angles.
pub fn parse_lon_lat(input: &mut &[u8]) -> WResult<(f64, f64)> {
    let lon_raw = le_u32.parse_next(input)?;
    let lat_raw = le_u32.parse_next(input)?;
    Ok((longitude_from_raw(lon_raw), latitude_from_raw(lat_raw)))
}

/// Decode a base-38 packed identifier (ICAO / region codes).
///
/// The low 5 bits of the stored u32 are a coded-field tag and are shifted
/// off before unpacking. Digits come out least-significant first and are
/// prepended.
pub fn decode_base38(packed: u32) -> String {
    let mut value = packed >> 5;
    let mut out = String::new();
    while value != 0 {
        let digit = (value % 38) as u8;
        let ch = match digit {
            0 => b' ',
            2..=11 => b'0' + (digit - 2),
            12..=37 => b'A' + (digit - 12),
            // 1 is unused in the encoding; map it to space like 0.
            _ => b' ',
        };
        out.insert(0, ch as char);
        value /= 38;
    }
    out.trim().to_string()
}

/// Peek the `(id, size)` u16 pair that frames scenery-object subrecords
/// without consuming input.
pub fn peek_record_frame(input: &[u8]) -> Option<(u16, u16)> {
    let probe = &mut &input[..];
    let frame: WResult<(u16, u16)> = (|| {
        let id = le_u16.parse_next(probe)?;
        let size = le_u16.parse_next(probe)?;
        Ok((id, size))
    })();
    frame.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longitude_midpoint_is_zero() {
        // 0x18000000 counts = half the range = the prime meridian.
        assert_eq!(longitude_from_raw(402_653_184), 0.0);
        assert_eq!(longitude_from_raw(0), -180.0);
    }

    #[test]
    fn latitude_midpoint_is_zero() {
        assert_eq!(latitude_from_raw(268_435_456), 0.0);
        assert_eq!(latitude_from_raw(0), 90.0);
    }

    #[test]
    fn angle_rounding() {
        assert_eq!(angle_from_raw(0), 0.0);
        assert_eq!(angle_from_raw(16384), 90.0);
        // 1 count = 360/65536 = 0.0054931640625 -> 0.005
        assert_eq!(angle_from_raw(1), 0.005);
    }

    #[test]
    fn longitude_matches_formula_across_range() {
        for raw in (0..=805_306_368u32).step_by(7_919_333) {
            let expected = raw as f64 * 360.0 / 805_306_368.0 - 180.0;
            assert!((longitude_from_raw(raw) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn guid_little_endian_fields() {
        let mut bytes = [0u8; 16];
        bytes[0] = 1; // lowest byte of the first (LE) field
        let input = &mut &bytes[..];
        let guid = parse_guid(input).unwrap();
        assert_eq!(
            guid,
            Uuid::parse_str("00000001-0000-0000-0000-000000000000").unwrap()
        );
    }

    #[test]
    fn base38_roundtrip_ksea() {
        // Encode "KSEA" manually: K=12+10=22? K is 'A'+10 -> digit 22.
        let digits = [
            12 + (b'K' - b'A') as u32,
            12 + (b'S' - b'A') as u32,
            12 + (b'E' - b'A') as u32,
            12 + (b'A' - b'A') as u32,
        ];
        let mut packed = 0u32;
        for d in digits {
            packed = packed * 38 + d;
        }
        assert_eq!(decode_base38(packed << 5), "KSEA");
    }
}
