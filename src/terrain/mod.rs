//! Terrain elevation sampling.
//!
//! Placements flagged AGL-relative need the ground elevation at their
//! anchor. The [`TerrainSampler`] trait abstracts that lookup; the default
//! [`TerrainService`] resolves the FlightGear tile, pulls its BTG meshes
//! through a [`provider::TileArtifactProvider`], lifts the mesh into
//! geodetic space and interpolates the altitude barycentrically.

pub mod geodesy;
pub mod provider;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use glam::{DVec2, DVec3};
use tracing::{debug, warn};

use crate::data::btg::{self, BtgMesh};
use crate::terrain::geodesy::{barycentric, ecef_to_geodetic};
use crate::terrain::provider::{TileArtifactProvider, btg_names_from_stg};

/// Ground elevation lookup in meters.
pub trait TerrainSampler: Send + Sync {
    fn elevation_m(&self, lat: f64, lon: f64) -> f64;
}

/// Stub sampler for conversions without a terrain source.
pub struct ZeroTerrain;

impl TerrainSampler for ZeroTerrain {
    fn elevation_m(&self, _lat: f64, _lon: f64) -> f64 {
        0.0
    }
}

/// Fixed-elevation sampler, mainly for tests.
pub struct FixedElevation(pub f64);

impl TerrainSampler for FixedElevation {
    fn elevation_m(&self, _lat: f64, _lon: f64) -> f64 {
        self.0
    }
}

/// A BTG mesh lifted into geodetic space: per-vertex `(lon, lat)` degrees
/// plus altitude in meters, sharing the source mesh's triangle list.
struct GeodeticMesh {
    /// Per-vertex horizontal position, x = lon, y = lat (degrees).
    positions: Vec<DVec2>,
    altitudes: Vec<f64>,
    triangles: Vec<[u32; 3]>,
}

impl GeodeticMesh {
    fn from_btg(mesh: &BtgMesh) -> Self {
        let center = DVec3::from_array(mesh.bounding_center);
        let mut positions = Vec::with_capacity(mesh.vertices.len());
        let mut altitudes = Vec::with_capacity(mesh.vertices.len());
        for v in &mesh.vertices {
            let ecef = center + DVec3::new(v[0] as f64, v[1] as f64, v[2] as f64);
            let (lat, lon, alt) = ecef_to_geodetic(ecef);
            positions.push(DVec2::new(lon, lat));
            altitudes.push(alt);
        }
        GeodeticMesh {
            positions,
            altitudes,
            triangles: mesh.triangles.clone(),
        }
    }

    /// Altitude at the query point: barycentric within the containing
    /// triangle, else the nearest vertex.
    fn sample(&self, lat: f64, lon: f64) -> Option<f64> {
        if self.positions.is_empty() {
            return None;
        }
        let p = DVec2::new(lon, lat);
        for tri in &self.triangles {
            let a = self.positions[tri[0] as usize];
            let b = self.positions[tri[1] as usize];
            let c = self.positions[tri[2] as usize];
            if let Some((u, v, w)) = barycentric(p, a, b, c) {
                return Some(
                    u * self.altitudes[tri[0] as usize]
                        + v * self.altitudes[tri[1] as usize]
                        + w * self.altitudes[tri[2] as usize],
                );
            }
        }
        // Outside every triangle: nearest vertex.
        let mut best = 0usize;
        let mut best_dist = f64::INFINITY;
        for (i, pos) in self.positions.iter().enumerate() {
            let d = pos.distance_squared(p);
            if d < best_dist {
                best_dist = d;
                best = i;
            }
        }
        Some(self.altitudes[best])
    }
}

/// Cached meshes for one tile.
struct TileTerrain {
    meshes: Vec<GeodeticMesh>,
    fetched_at: Instant,
    /// Set while a sampler is reading the entry; the pressure sweep skips
    /// locked entries.
    locked: AtomicBool,
}

/// Soft cap on cached tiles before the pressure sweep runs.
const CACHE_SOFT_CAP: usize = 16;

/// Default terrain sampler: tile-cached BTG meshes from a provider.
pub struct TerrainService<P> {
    provider: P,
    cache: RwLock<HashMap<u32, Arc<TileTerrain>>>,
}

impl<P: TileArtifactProvider> TerrainService<P> {
    pub fn new(provider: P) -> Self {
        TerrainService {
            provider,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn load_tile(&self, tile: u32, lat: f64, lon: f64) -> Arc<TileTerrain> {
        let mut meshes = Vec::new();
        match self.provider.fetch_tile_stg(tile, lat, lon) {
            Ok(stg) => {
                for name in btg_names_from_stg(&stg) {
                    match self.provider.fetch_btg(lat, lon, &name) {
                        Ok(bytes) => match btg::decode(&bytes) {
                            Ok(mesh) => meshes.push(GeodeticMesh::from_btg(&mesh)),
                            Err(err) => {
                                warn!(%err, name, tile, "skipping undecodable BTG mesh");
                            }
                        },
                        Err(err) => warn!(%err, name, tile, "skipping unfetchable BTG mesh"),
                    }
                }
            }
            Err(err) => debug!(%err, tile, "no terrain index for tile"),
        }
        Arc::new(TileTerrain {
            meshes,
            fetched_at: Instant::now(),
            locked: AtomicBool::new(false),
        })
    }

    fn tile_terrain(&self, tile: u32, lat: f64, lon: f64) -> Arc<TileTerrain> {
        if let Some(entry) = self.cache.read().expect("terrain cache poisoned").get(&tile) {
            return Arc::clone(entry);
        }
        let loaded = self.load_tile(tile, lat, lon);
        let mut cache = self.cache.write().expect("terrain cache poisoned");
        let entry = cache.entry(tile).or_insert_with(|| Arc::clone(&loaded));
        let entry = Arc::clone(entry);
        if cache.len() > CACHE_SOFT_CAP {
            // Release unlocked entries oldest-first until under the cap.
            let mut ages: Vec<(u32, Instant)> = cache
                .iter()
                .filter(|(_, t)| !t.locked.load(Ordering::Acquire))
                .map(|(k, t)| (*k, t.fetched_at))
                .collect();
            ages.sort_by_key(|&(_, at)| at);
            let excess = cache.len().saturating_sub(CACHE_SOFT_CAP);
            for (key, _) in ages.into_iter().take(excess) {
                if key != tile {
                    cache.remove(&key);
                }
            }
        }
        entry
    }
}

impl<P: TileArtifactProvider> TerrainSampler for TerrainService<P> {
    fn elevation_m(&self, lat: f64, lon: f64) -> f64 {
        let Ok(tile) = crate::tile::tile_index(lat, lon) else {
            return 0.0;
        };
        let terrain = self.tile_terrain(tile, lat, lon);
        terrain.locked.store(true, Ordering::Release);
        let elevation = terrain
            .meshes
            .iter()
            .filter_map(|m| m.sample(lat, lon))
            .fold(f64::NEG_INFINITY, f64::max);
        terrain.locked.store(false, Ordering::Release);
        if elevation.is_finite() { elevation } else { 0.0 }
    }
}
