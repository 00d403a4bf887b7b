//! Convert Microsoft Flight Simulator scenery packages into FlightGear tile
//! scenery.
//!
//! The pipeline scans a directory tree of `.bgl` container files, decodes
//! library/sim-object placements and airport records, indexes the embedded
//! model payloads, and emits one merged model per FlightGear tile (glTF,
//! AC3D, or both) together with an `.stg` placement line.
//!
//! ## Quick start
//!
//! ```ignore
//! use msfs2fg::convert::{ConvertOptions, Converter};
//!
//! let converter = Converter::new(ConvertOptions {
//!     emit_gltf: true,
//!     emit_ac3d: false,
//! });
//! let summary = converter.convert("path/to/Community/my-scenery", "out/scenery")?;
//! println!("{} tiles written", summary.tiles_written);
//! ```
//!
//! Terrain elevation lookups (used for AGL-relative placements) go through
//! the [`terrain::TerrainSampler`] trait; without a configured terrain
//! source the converter falls back to a zero-elevation stub.

/// Binary decoders for the game's container formats (BGL, RIFF, BTG).
pub mod data;
/// Error definitions.
pub mod error;
/// Intermediate scene graph and glTF (GLB) import.
pub mod models;
/// FlightGear tile indexing.
pub mod tile;
/// Terrain elevation sampling.
pub mod terrain;
/// The two-pass conversion pipeline.
pub mod convert;
/// Tile model emitters (glTF, AC3D, STG, XML selector).
pub mod export;

pub use convert::{ConvertOptions, ConvertSummary, Converter};
pub use error::ConvertError;
