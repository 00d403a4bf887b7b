//! Tile artifact providers for the terrain service.
//!
//! A provider hands the service the two artifacts a tile is made of: the
//! `<tile>.stg` index (one `OBJECT <name>.btg` line per mesh) and the
//! gzipped BTG meshes it lists. The shipped implementation reads a local
//! TerraSync-layout directory; remote transports are an embedder concern
//! behind the same trait.

use std::io::Read;
use std::path::PathBuf;

use flate2::read::GzDecoder;
use thiserror::Error;

use crate::tile::bucket_dirs;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("tile artifact not found: {0}")]
    NotFound(String),
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Source of terrain tile artifacts.
pub trait TileArtifactProvider: Send + Sync {
    /// Fetch the `<tile>.stg` index text for a tile.
    fn fetch_tile_stg(&self, tile: u32, lat: f64, lon: f64) -> Result<String, ProviderError>;

    /// Fetch and decompress one `<name>.btg.gz` mesh for a tile.
    fn fetch_btg(&self, lat: f64, lon: f64, name: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Mesh names listed in a tile `.stg` index.
///
/// Both `OBJECT` and `OBJECT_BASE` lines reference terrain meshes; all
/// other line kinds (static models, signs) are ignored.
pub fn btg_names_from_stg(stg: &str) -> Vec<String> {
    stg.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let kind = parts.next()?;
            if kind != "OBJECT" && kind != "OBJECT_BASE" {
                return None;
            }
            let name = parts.next()?;
            name.ends_with(".btg").then(|| name.to_string())
        })
        .collect()
}

/// Provider backed by a local TerraSync-layout directory
/// (`<root>/Terrain/<d10>/<d1>/...`).
pub struct TerraSyncDir {
    root: PathBuf,
}

impl TerraSyncDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TerraSyncDir { root: root.into() }
    }

    fn tile_dir(&self, lat: f64, lon: f64) -> PathBuf {
        let (d10, d1) = bucket_dirs(lat, lon);
        self.root.join("Terrain").join(d10).join(d1)
    }
}

impl TileArtifactProvider for TerraSyncDir {
    fn fetch_tile_stg(&self, tile: u32, lat: f64, lon: f64) -> Result<String, ProviderError> {
        let path = self.tile_dir(lat, lon).join(format!("{tile}.stg"));
        if !path.exists() {
            return Err(ProviderError::NotFound(path.display().to_string()));
        }
        std::fs::read_to_string(&path).map_err(|source| ProviderError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn fetch_btg(&self, lat: f64, lon: f64, name: &str) -> Result<Vec<u8>, ProviderError> {
        let path = self.tile_dir(lat, lon).join(format!("{name}.gz"));
        if !path.exists() {
            return Err(ProviderError::NotFound(path.display().to_string()));
        }
        let file = std::fs::File::open(&path).map_err(|source| ProviderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut decoder = GzDecoder::new(file);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|source| ProviderError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stg_index_parsing() {
        let stg = "OBJECT 2949120.btg\nOBJECT_BASE base.btg\nOBJECT_STATIC tower.ac 0 0 0 0\n\n";
        assert_eq!(btg_names_from_stg(stg), vec!["2949120.btg", "base.btg"]);
    }

    #[test]
    fn ignores_non_btg_objects() {
        assert!(btg_names_from_stg("OBJECT model.xml\n").is_empty());
    }
}
