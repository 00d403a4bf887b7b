use thiserror::Error;

/// AC3D tile model emitter.
pub mod ac3d;
/// Composite glTF tile emitter.
pub mod gltf_export;
/// STG placement line + XML model selector.
pub mod stg;
/// Texture resolution and copying.
pub mod texture;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("glTF serialization error: {0}")]
    Serialize(String),
    #[error(transparent)]
    Ac(#[from] ac3d::AcError),
}
