//! Texture resolution and copying.
//!
//! Model metadata references textures by bare uri; the actual files live
//! somewhere under the scenery package, with inconsistent casing. The
//! [`TextureIndex`] maps lowercase filenames to candidate paths once per
//! conversion; the [`TextureCopier`] tracks which sources land next to a
//! tile's model under which (disambiguated) filename and copies them
//! idempotently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::models::scene::TextureResolver;

/// Case-insensitive filename index over a scenery package tree.
pub struct TextureIndex {
    by_lower_name: HashMap<String, Vec<PathBuf>>,
}

impl TextureIndex {
    /// Walk `root` once and index every file by lowercase filename.
    pub fn build(root: &Path) -> Self {
        let mut by_lower_name: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for entry in WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_lowercase();
            by_lower_name
                .entry(name)
                .or_default()
                .push(entry.into_path());
        }
        TextureIndex { by_lower_name }
    }

    /// Resolve a texture uri to a file, preferring candidates sharing the
    /// longest path prefix with `hint` (usually the source BGL).
    pub fn resolve_near(&self, uri: &str, hint: &Path) -> Option<PathBuf> {
        let name = Path::new(uri).file_name()?.to_string_lossy().to_lowercase();
        let candidates = self.by_lower_name.get(&name)?;
        candidates
            .iter()
            .max_by_key(|c| common_prefix_len(c, hint))
            .cloned()
    }
}

fn common_prefix_len(a: &Path, b: &Path) -> usize {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Resolver bound to one source BGL for prefix tie-breaking.
pub struct NearestTextureResolver<'a> {
    pub index: &'a TextureIndex,
    pub source: &'a Path,
}

impl TextureResolver for NearestTextureResolver<'_> {
    fn resolve(&self, uri: &str) -> Option<PathBuf> {
        self.index.resolve_near(uri, self.source)
    }
}

/// Tracks texture files to copy next to an emitted tile model.
///
/// Output filenames are unique: a second distinct source with the same
/// filename gets a numeric suffix.
#[derive(Debug, Default)]
pub struct TextureCopier {
    by_source: HashMap<PathBuf, String>,
    taken_names: HashMap<String, PathBuf>,
}

impl TextureCopier {
    pub fn new() -> Self {
        TextureCopier::default()
    }

    /// Register a source file; returns the output filename it will copy to.
    pub fn register(&mut self, source: &Path) -> String {
        if let Some(name) = self.by_source.get(source) {
            return name.clone();
        }
        let base = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "texture".to_string());

        let mut name = base.clone();
        let mut suffix = 1;
        while self
            .taken_names
            .get(&name)
            .is_some_and(|taken| taken != source)
        {
            let stem = Path::new(&base)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| base.clone());
            let ext = Path::new(&base)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            name = format!("{stem}_{suffix}{ext}");
            suffix += 1;
        }

        self.taken_names.insert(name.clone(), source.to_path_buf());
        self.by_source.insert(source.to_path_buf(), name.clone());
        name
    }

    /// Output filenames registered so far, in no particular order.
    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    /// Copy every registered file into `dest_dir`.
    ///
    /// Copies are idempotent (existing destinations are kept) and copy
    /// failures are logged, not raised.
    pub fn copy_all(&self, dest_dir: &Path) {
        for (source, name) in &self.by_source {
            let dest = dest_dir.join(name);
            if dest.exists() {
                debug!(dest = %dest.display(), "texture already copied");
                continue;
            }
            if let Err(err) = std::fs::copy(source, &dest) {
                warn!(
                    %err,
                    source = %source.display(),
                    dest = %dest.display(),
                    "texture copy failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_case_insensitive_and_prefers_near_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("pkg-a").join("texture");
        let b = dir.path().join("pkg-b").join("texture");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(a.join("Roof.DDS"), b"a").unwrap();
        std::fs::write(b.join("roof.dds"), b"b").unwrap();

        let index = TextureIndex::build(dir.path());
        let hint = dir.path().join("pkg-b").join("scenery").join("objects.bgl");
        let resolved = index.resolve_near("ROOF.dds", &hint).unwrap();
        assert_eq!(resolved, b.join("roof.dds"));
    }

    #[test]
    fn copier_disambiguates_name_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(a.join("wall.dds"), b"a").unwrap();
        std::fs::write(b.join("wall.dds"), b"b").unwrap();

        let mut copier = TextureCopier::new();
        let first = copier.register(&a.join("wall.dds"));
        let second = copier.register(&b.join("wall.dds"));
        let again = copier.register(&a.join("wall.dds"));
        assert_eq!(first, "wall.dds");
        assert_eq!(second, "wall_1.dds");
        assert_eq!(again, first);

        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        copier.copy_all(&out);
        assert_eq!(std::fs::read(out.join("wall.dds")).unwrap(), b"a");
        assert_eq!(std::fs::read(out.join("wall_1.dds")).unwrap(), b"b");
        // Idempotent re-copy keeps the existing files.
        copier.copy_all(&out);
    }

    #[test]
    fn copy_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut copier = TextureCopier::new();
        copier.register(&dir.path().join("missing.dds"));
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        copier.copy_all(&out); // must not panic
    }
}
