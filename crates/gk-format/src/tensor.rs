use gk_quant::TensorType;

use crate::error::{GgufError, Result};
use crate::session::{alignment_padding, GgufFile};

/// Maximum number of dimensions a tensor descriptor may declare.
pub const MAX_DIMS: usize = 4;

/// Describes one tensor stored in a GGUF file.
///
/// The descriptor is owned; the payload stays in the mapping and is reached
/// through [`GgufFile::tensor_data`].
#[derive(Debug, Clone)]
pub struct TensorInfo {
    /// Tensor name (e.g. "blk.0.attn_q.weight").
    pub name: String,
    /// Number of dimensions declared on disk.
    pub ndim: u32,
    /// Dimension sizes; unused trailing dimensions are 1.
    pub dims: [u64; MAX_DIMS],
    /// Storage type of the payload.
    pub dtype: TensorType,
    /// Product of all dimensions.
    pub num_weights: u64,
    /// Payload offset relative to the start of the data section.
    pub rel_offset: u64,
    /// Payload offset from the start of the file.
    pub abs_offset: u64,
}

impl TensorInfo {
    /// Payload size in bytes: whole blocks covering `num_weights`.
    pub fn data_size(&self) -> u64 {
        self.dtype.data_size(self.num_weights)
    }
}

impl GgufFile {
    /// Compute the absolute data-section offset by scanning the remaining
    /// descriptor bytes without moving the cursor, then padding to the
    /// session alignment. Only valid with the cursor at the first
    /// descriptor.
    fn compute_data_offset(&mut self) -> Result<()> {
        let mut off = self.off as u64;
        for _ in 0..self.left_tensors {
            let name_len = self.u64_at(off)?;
            off += 8 + name_len;
            let ndim = self.u32_at(off)?;
            off += 4; // dimension count
            off += 8 * ndim as u64; // dimensions
            off += 4; // tensor type
            off += 8; // relative offset
        }
        self.data_off = off + alignment_padding(self.alignment, off);
        Ok(())
    }

    /// Parse the next tensor descriptor, or `None` once the section is
    /// exhausted.
    ///
    /// The first call computes the data-section offset from a second pass
    /// over all descriptors, so every returned tensor carries its absolute
    /// payload position.
    ///
    /// # Errors
    /// `Precondition` when metadata values remain unread (the documented
    /// behavior for this cursor: metadata must be fully consumed first);
    /// `Invalid` for malformed descriptors, unknown tensor types, or
    /// payloads extending past the end of the file.
    pub fn next_tensor(&mut self) -> Result<Option<TensorInfo>> {
        if self.left_tensors == 0 {
            return Ok(None);
        }
        if self.left_kv != 0 {
            return Err(GgufError::Precondition(format!(
                "{} metadata values remain before the tensor section",
                self.left_kv
            )));
        }
        if self.data_off == 0 {
            self.compute_data_offset()?;
        }
        self.left_tensors -= 1;

        let name = self.read_string()?;
        let ndim = self.read_u32()?;
        if ndim as usize > MAX_DIMS {
            return Err(GgufError::Invalid(format!(
                "tensor {} declares {} dimensions (max {})",
                name, ndim, MAX_DIMS
            )));
        }
        let mut dims = [1u64; MAX_DIMS];
        let mut num_weights = 1u64;
        for dim in dims.iter_mut().take(ndim as usize) {
            *dim = self.read_u64()?;
            num_weights = num_weights.checked_mul(*dim).ok_or_else(|| {
                GgufError::Invalid(format!("tensor {} dimension product overflows", name))
            })?;
        }
        let raw_type = self.read_u32()?;
        let dtype = TensorType::from_gguf_type(raw_type).ok_or_else(|| {
            GgufError::Invalid(format!(
                "tensor {} has unknown or deprecated type id {}",
                name, raw_type
            ))
        })?;
        let rel_offset = self.read_u64()?;

        let info = TensorInfo {
            name,
            ndim,
            dims,
            dtype,
            num_weights,
            rel_offset,
            abs_offset: self.data_off + rel_offset,
        };
        if info.abs_offset + info.data_size() > self.file_size() {
            return Err(GgufError::Invalid(format!(
                "tensor {} extends past the end of the file",
                info.name
            )));
        }
        Ok(Some(info))
    }

    /// Raw payload bytes of a tensor parsed from this session.
    pub fn tensor_data(&self, info: &TensorInfo) -> &[u8] {
        let start = info.abs_offset as usize;
        &self.mmap[start..start + info.data_size() as usize]
    }

    /// Dequantize a tensor's payload into a fresh f32 buffer.
    pub fn dequantize_f32(&self, info: &TensorInfo) -> Result<Vec<f32>> {
        let out = gk_quant::dequantize(info.dtype, self.tensor_data(info), info.num_weights as usize)?;
        Ok(out)
    }
}
