use std::path::PathBuf;

use thiserror::Error;

/// Top-level error for a conversion run.
///
/// Most decode-level corruption is handled by the lossy-tolerance policy
/// (log, skip, keep going) and never surfaces here; this enum covers the
/// conditions that abort the run.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("input path does not exist: {0}")]
    InputPathMissing(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Bgl(#[from] crate::data::bgl::BglError),
    #[error(transparent)]
    Export(#[from] crate::export::ExportError),
}
