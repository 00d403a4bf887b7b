//! The two-pass conversion pipeline.
//!
//! Pass 1 decodes every placement (SceneryObject subrecords plus the ones
//! embedded in airport jetways and projected meshes). Pass 2 indexes the
//! model payloads by GUID, keeping only GUIDs that something actually
//! places. Tiles are then assembled in ascending index order: models
//! imported largest-first, instanced per placement into the requested
//! builders, and emitted together with the STG placement line.

pub mod transform;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use itertools::Itertools;
use memmap2::Mmap;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::data::airport::{self, Airport};
use crate::data::bgl::{BglFile, RecordType};
use crate::data::parser_utils::{WResult, parse_guid};
use crate::data::placement::{self, DecodedPlacement, LibraryPlacement, SimObjectPlacement};
use crate::data::riff;
use crate::error::ConvertError;
use crate::export::ac3d::AcModel;
use crate::export::gltf_export::GltfTileModel;
use crate::export::stg;
use crate::export::texture::{NearestTextureResolver, TextureIndex};
use crate::models::gltf_import;
use crate::terrain::{TerrainSampler, ZeroTerrain};
use crate::tile;
use transform::{TileOrigin, flip_z_sandwich, placement_transform};

/// Which tile artifacts to emit.
#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    pub emit_gltf: bool,
    pub emit_ac3d: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            emit_gltf: true,
            emit_ac3d: true,
        }
    }
}

/// Out-of-band progress reporting.
pub trait StatusObserver: Send + Sync {
    fn status(&self, message: &str);
}

/// Observer that discards everything.
pub struct NopObserver;

impl StatusObserver for NopObserver {
    fn status(&self, _message: &str) {}
}

/// Observer that forwards progress to the tracing subscriber.
pub struct TracingObserver;

impl StatusObserver for TracingObserver {
    fn status(&self, message: &str) {
        info!("{message}");
    }
}

/// Pointer to a model payload inside a BGL file.
#[derive(Debug, Clone)]
pub struct ModelReference {
    pub guid: Uuid,
    pub source: PathBuf,
    pub offset: usize,
    pub size: usize,
}

/// Counters reported after a conversion run.
#[derive(Debug, Default, Clone)]
pub struct ConvertSummary {
    pub bgl_files: usize,
    pub library_placements: usize,
    pub sim_object_placements: usize,
    pub airports: usize,
    pub model_references: usize,
    pub tiles_written: usize,
}

/// The conversion pipeline.
pub struct Converter {
    options: ConvertOptions,
    terrain: Arc<dyn TerrainSampler>,
    observer: Arc<dyn StatusObserver>,
    abort_and_cancel: Arc<AtomicBool>,
    abort_and_save: Arc<AtomicBool>,
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        Converter {
            options,
            terrain: Arc::new(ZeroTerrain),
            observer: Arc::new(NopObserver),
            abort_and_cancel: Arc::new(AtomicBool::new(false)),
            abort_and_save: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use a terrain source for AGL-relative placements.
    pub fn with_terrain(mut self, terrain: Arc<dyn TerrainSampler>) -> Self {
        self.terrain = terrain;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Flag a controller sets to stop with no further writes.
    pub fn abort_and_cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort_and_cancel)
    }

    /// Flag a controller sets to finish the current tile, then stop.
    pub fn abort_and_save_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort_and_save)
    }

    /// Run the conversion.
    pub fn convert(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<ConvertSummary, ConvertError> {
        let input = input.as_ref();
        let output = output.as_ref();
        if !input.exists() {
            return Err(ConvertError::InputPathMissing(input.to_path_buf()));
        }

        let bgl_files = find_bgl_files(input);
        let mut summary = ConvertSummary {
            bgl_files: bgl_files.len(),
            ..ConvertSummary::default()
        };
        self.observer
            .status(&format!("Scanning {} BGL files", bgl_files.len()));

        let mut mmaps: HashMap<PathBuf, Mmap> = HashMap::new();

        // Pass 1: placements and airports.
        let mut placements_by_guid: HashMap<Uuid, Vec<LibraryPlacement>> = HashMap::new();
        let mut sim_objects: Vec<SimObjectPlacement> = Vec::new();
        let mut airports: Vec<Airport> = Vec::new();

        for path in &bgl_files {
            let Some(data) = mapped(&mut mmaps, path) else {
                continue;
            };
            let bgl = match BglFile::parse(data) {
                Ok(bgl) => bgl,
                Err(err) => {
                    warn!(%err, path = %path.display(), "skipping unparseable BGL");
                    continue;
                }
            };

            let mut decoded = Vec::new();
            for record in bgl.records_of(RecordType::SceneryObject) {
                for sub in bgl.subrecords(record) {
                    placement::decode_subrecord(sub.payload, self.terrain.as_ref(), &mut decoded);
                }
            }
            for record in bgl.records_of(RecordType::Airport) {
                for sub in bgl.subrecords(record) {
                    match airport::decode_airport(sub.payload, self.terrain.as_ref()) {
                        Ok(mut decoded_airport) => {
                            decoded.append(&mut decoded_airport.embedded_placements);
                            airports.push(decoded_airport);
                        }
                        Err(err) => {
                            warn!(%err, path = %path.display(), "skipping malformed airport record");
                        }
                    }
                }
            }

            for placement in decoded {
                match placement {
                    DecodedPlacement::Library(lib) => {
                        placements_by_guid.entry(lib.guid).or_default().push(lib);
                    }
                    DecodedPlacement::SimObject(sim) => sim_objects.push(sim),
                }
            }
            debug!(path = %path.display(), "pass 1 complete for file");
        }

        summary.library_placements = placements_by_guid.values().map(Vec::len).sum();
        summary.sim_object_placements = sim_objects.len();
        summary.airports = airports.len();
        self.observer.status(&format!(
            "Pass 1: {} library placements, {} sim objects, {} airports",
            summary.library_placements, summary.sim_object_placements, summary.airports
        ));

        // Pass 2: model index, grouped per tile of each model's placements.
        let mut model_refs_by_tile: BTreeMap<u32, Vec<ModelReference>> = BTreeMap::new();
        for path in &bgl_files {
            let Some(data) = mapped(&mut mmaps, path) else {
                continue;
            };
            let Ok(bgl) = BglFile::parse(data) else {
                continue;
            };
            for record in bgl.records_of(RecordType::ModelData) {
                for sub in bgl.subrecords(record) {
                    // The subrecord leads with the model's GUID.
                    let guid: WResult<Uuid> = parse_guid(&mut &sub.payload[..]);
                    let Ok(guid) = guid else {
                        continue;
                    };
                    let Some(placements) = placements_by_guid.get(&guid) else {
                        continue;
                    };
                    let tiles: BTreeSet<u32> = placements
                        .iter()
                        .filter_map(|p| {
                            tile::tile_index(p.header.latitude, p.header.longitude).ok()
                        })
                        .collect();
                    for t in tiles {
                        model_refs_by_tile.entry(t).or_default().push(ModelReference {
                            guid,
                            source: path.clone(),
                            offset: sub.offset,
                            size: sub.payload.len(),
                        });
                        summary.model_references += 1;
                    }
                }
            }
        }
        self.observer.status(&format!(
            "Pass 2: {} model references across {} tiles",
            summary.model_references,
            model_refs_by_tile.len()
        ));

        // Pass 3: tile assembly and emission.
        let texture_index = TextureIndex::build(input);
        let tile_count = model_refs_by_tile.len();
        for (i, (tile_index, refs)) in model_refs_by_tile.iter().enumerate() {
            if self.abort_and_cancel.load(Ordering::Relaxed) {
                self.observer.status("Conversion cancelled");
                return Ok(summary);
            }
            self.observer.status(&format!(
                "Tile {} ({}/{})",
                tile_index,
                i + 1,
                tile_count
            ));
            let saved = self.assemble_tile(
                *tile_index,
                refs,
                &placements_by_guid,
                &texture_index,
                &mut mmaps,
                output,
                &mut summary,
            )?;
            match saved {
                TileOutcome::Cancelled => {
                    self.observer.status("Conversion cancelled");
                    return Ok(summary);
                }
                TileOutcome::SavedAndStop => {
                    self.observer.status("Conversion stopped after saving tile");
                    break;
                }
                TileOutcome::Done => {}
            }
        }

        self.observer.status(&format!(
            "Done: {} tiles written",
            summary.tiles_written
        ));
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_tile(
        &self,
        tile_index: u32,
        refs: &[ModelReference],
        placements_by_guid: &HashMap<Uuid, Vec<LibraryPlacement>>,
        texture_index: &TextureIndex,
        mmaps: &mut HashMap<PathBuf, Mmap>,
        output: &Path,
        summary: &mut ConvertSummary,
    ) -> Result<TileOutcome, ConvertError> {
        // Heavier models first; a GUID sliced across files keeps only its
        // largest payload (the highest LOD).
        let ordered: Vec<&ModelReference> = refs
            .iter()
            .sorted_by_key(|r| std::cmp::Reverse(r.size))
            .unique_by(|r| r.guid)
            .collect();

        let origin = tile_center(tile_index, placements_by_guid);

        let mut gltf = self
            .options
            .emit_gltf
            .then(|| GltfTileModel::new(tile_index));
        let mut ac = self.options.emit_ac3d.then(AcModel::new);

        let mut stop_after_save = false;
        for model_ref in &ordered {
            if self.abort_and_cancel.load(Ordering::Relaxed) {
                return Ok(TileOutcome::Cancelled);
            }
            if self.abort_and_save.load(Ordering::Relaxed) {
                stop_after_save = true;
                break;
            }
            self.observer
                .status(&format!("Tile {}: model {}", tile_index, model_ref.guid));

            let Some(data) = mapped(mmaps, &model_ref.source) else {
                continue;
            };
            let Some(payload) = data.get(model_ref.offset..model_ref.offset + model_ref.size)
            else {
                continue;
            };
            let package = match riff::decode_model_package(payload) {
                Ok(package) => package,
                Err(err) => {
                    debug!(%err, guid = %model_ref.guid, "skipping model without RIFF payload");
                    continue;
                }
            };
            let Some(glb) = package.glb else {
                debug!(guid = %model_ref.guid, "model package has no GLB payload");
                continue;
            };

            let model_name = if package.name.is_empty() {
                format!("model_{}", model_ref.guid.simple())
            } else {
                package.name.clone()
            };
            let resolver = NearestTextureResolver {
                index: texture_index,
                source: &model_ref.source,
            };
            let scene = match gltf_import::import_glb(glb, &resolver, &model_name) {
                Ok(scene) => scene,
                Err(err) => {
                    warn!(%err, guid = %model_ref.guid, "skipping undecodable GLB");
                    continue;
                }
            };
            if scene.is_empty() {
                continue;
            }

            let handle = gltf.as_mut().map(|builder| builder.add_model(&scene));

            let Some(placements) = placements_by_guid.get(&model_ref.guid) else {
                continue;
            };
            for placement in placements {
                let Ok(placement_tile) =
                    tile::tile_index(placement.header.latitude, placement.header.longitude)
                else {
                    continue;
                };
                if placement_tile != tile_index {
                    continue;
                }
                let p = placement_transform(placement, &origin);
                if let (Some(builder), Some(handle)) = (gltf.as_mut(), handle.as_ref()) {
                    builder.instance(handle, p);
                }
                if let Some(builder) = ac.as_mut() {
                    for (mesh, world) in &scene.meshes {
                        builder.add_mesh(mesh, flip_z_sandwich(p * *world));
                    }
                }
            }
        }

        let has_geometry = gltf.as_ref().is_some_and(|b| b.instance_count() > 0)
            || ac.as_ref().is_some_and(|b| !b.is_empty());
        if has_geometry {
            let (d10, d1) = tile::bucket_dirs(origin.latitude, origin.longitude);
            let dir = output.join("Objects").join(d10).join(d1);
            std::fs::create_dir_all(&dir)?;

            if let Some(builder) = gltf {
                builder.write_to_file(&dir.join(format!("{tile_index}.gltf")))?;
            }
            if let Some(builder) = ac {
                builder
                    .write_to_file(&dir.join(format!("{tile_index}.ac")))
                    .map_err(crate::export::ExportError::from)?;
            }
            if self.options.emit_gltf && self.options.emit_ac3d {
                stg::write_xml_selector(&dir.join(format!("{tile_index}.xml")), tile_index)?;
            }
            let filename = stg::artifact_filename(
                tile_index,
                self.options.emit_gltf,
                self.options.emit_ac3d,
            );
            let angles = stg::stg_angles(self.options.emit_gltf, self.options.emit_ac3d);
            stg::write_stg(
                &dir.join(format!("{tile_index}.stg")),
                &filename,
                &origin,
                angles,
            )?;
            summary.tiles_written += 1;
        }

        if stop_after_save {
            Ok(TileOutcome::SavedAndStop)
        } else {
            Ok(TileOutcome::Done)
        }
    }
}

enum TileOutcome {
    Done,
    SavedAndStop,
    Cancelled,
}

/// Mean of (lat, lon, alt) over every library placement in the tile.
fn tile_center(
    tile_index: u32,
    placements_by_guid: &HashMap<Uuid, Vec<LibraryPlacement>>,
) -> TileOrigin {
    let mut sum = TileOrigin::default();
    let mut count = 0usize;
    for placement in placements_by_guid.values().flatten() {
        let Ok(t) = tile::tile_index(placement.header.latitude, placement.header.longitude)
        else {
            continue;
        };
        if t != tile_index {
            continue;
        }
        sum.latitude += placement.header.latitude;
        sum.longitude += placement.header.longitude;
        sum.altitude += placement.header.altitude;
        count += 1;
    }
    if count == 0 {
        return TileOrigin::default();
    }
    TileOrigin {
        latitude: sum.latitude / count as f64,
        longitude: sum.longitude / count as f64,
        altitude: sum.altitude / count as f64,
    }
}

/// Recursive, case-insensitive `*.bgl` enumeration in deterministic order.
fn find_bgl_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("bgl"))
        })
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Memory-map a file once per conversion.
fn mapped<'a>(cache: &'a mut HashMap<PathBuf, Mmap>, path: &Path) -> Option<&'a [u8]> {
    if !cache.contains_key(path) {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                warn!(%err, path = %path.display(), "cannot open file");
                return None;
            }
        };
        // Safety: the scenery package is treated as read-only input for
        // the lifetime of the conversion.
        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(err) => {
                warn!(%err, path = %path.display(), "cannot map file");
                return None;
            }
        };
        cache.insert(path.to_path_buf(), mmap);
    }
    cache.get(path).map(|m| &m[..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.BGL"), b"").unwrap();
        std::fs::write(dir.path().join("b.bgl"), b"").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"").unwrap();
        let files = find_bgl_files(dir.path());
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn missing_input_is_fatal() {
        let converter = Converter::new(ConvertOptions::default());
        let result = converter.convert("/definitely/not/here", "/tmp/out");
        assert!(matches!(result, Err(ConvertError::InputPathMissing(_))));
    }

    #[test]
    fn empty_input_produces_no_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let converter = Converter::new(ConvertOptions::default());
        let summary = converter.convert(dir.path(), out.path()).unwrap();
        assert_eq!(summary.bgl_files, 0);
        assert_eq!(summary.tiles_written, 0);
        assert!(!out.path().join("Objects").exists());
    }
}
