use thiserror::Error;

use crate::dtype::TensorType;

#[derive(Error, Debug)]
pub enum QuantError {
    #[error("no dequantizer for tensor type {0}")]
    Unsupported(TensorType),
    #[error("out of memory allocating a {0}-element dequantization buffer")]
    OutOfMemory(usize),
    #[error("tensor data truncated: need {expected} bytes, have {got}")]
    Truncated { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, QuantError>;
