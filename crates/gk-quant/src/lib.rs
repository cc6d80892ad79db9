//! `gk-quant` - Tensor-type registry, half-precision codecs, and block
//! dequantizers for gguf-kit.
//!
//! This crate provides:
//! - A `TensorType` registry mapping GGUF tensor type ids to their block
//!   geometry (items per block, bytes per block)
//! - Bit-exact bf16 encoding (AMD VCVTNEPS2BF16 semantics) on top of the
//!   `half` crate's types
//! - Dequantizers decoding packed quantization blocks into f32, f16, or
//!   bf16 arrays

pub mod bf16;
pub mod dequant;
pub mod dtype;
pub mod error;

// Re-export primary types at the crate root for convenience.
pub use bf16::bf16_from_f32;
pub use dequant::{dequantize, Scalar};
pub use dtype::TensorType;
pub use error::{QuantError, Result};
