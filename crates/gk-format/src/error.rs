use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GgufError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid GGUF file: {0}")]
    Invalid(String),
    #[error("refusing to overwrite existing file: {0}")]
    Exists(PathBuf),
    #[error("operation out of order: {0}")]
    Precondition(String),
    #[error(transparent)]
    Quant(#[from] gk_quant::QuantError),
}

impl GgufError {
    /// Attach the file path to a raw I/O error.
    pub(crate) fn io(path: &Path, source: io::Error) -> GgufError {
        GgufError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, GgufError>;
