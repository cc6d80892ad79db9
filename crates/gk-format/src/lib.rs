//! `gk-format` - Memory-mapped GGUF container parsing and streaming append
//! for gguf-kit.
//!
//! This crate provides:
//! - A `GgufFile` session owning an open file and a memory mapping of it,
//!   doubling as a parse cursor over the metadata and tensor sections
//! - A visitor-based value walker for metadata values (observe or skip)
//! - Zero-copy tensor payload access through the mapping
//! - A streaming append API (key-values, then descriptors, then payloads)
//!   that keeps the data section aligned
//! - A Mixtral MoE single-expert extractor built on the above
//!
//! Sessions release their mapping and file descriptor on drop. Payload
//! slices borrow the session, so the borrow checker rules out views that
//! would dangle across a remapping append.

mod append;
pub mod error;
pub mod moe;
pub mod session;
pub mod tensor;
pub mod value;

// Re-export primary types at the crate root for convenience.
pub use error::{GgufError, Result};
pub use session::{
    alignment_padding, GgufFile, OpenMode, GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION,
};
pub use tensor::{TensorInfo, MAX_DIMS};
pub use value::{Key, ScalarValue, SkipValues, ValueType, ValueVisitor, ALIGNMENT_KEY};
