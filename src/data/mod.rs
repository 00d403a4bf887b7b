/// Airport record decoder (runways, taxiways, parking, jetways, ...).
pub mod airport;
/// BGL container walker.
pub mod bgl;
/// BTG terrain mesh decoder.
pub mod btg;
/// SceneryObject placement decoder.
pub mod placement;
/// RIFF model-package walker (GXML metadata + embedded GLB payloads).
pub mod riff;
/// Shared winnow-based parsing utilities used across all binary decoders.
pub mod parser_utils;
