use half::{bf16, f16};

use crate::bf16::bf16_from_f32;
use crate::dtype::TensorType;
use crate::error::{QuantError, Result};

/// Weights per block for the classic quantization formats.
const QK: usize = 32;
/// Weights per super-block for the K-quant formats.
const QK_K: usize = 256;

/// Destination scalar for dequantization.
///
/// The decoders are generic over the output element so the same block walk
/// can fill f32, f16, or bf16 buffers; the conversion monomorphizes away.
pub trait Scalar: Copy {
    fn from_f32(v: f32) -> Self;
}

impl Scalar for f32 {
    #[inline]
    fn from_f32(v: f32) -> f32 {
        v
    }
}

impl Scalar for f16 {
    #[inline]
    fn from_f32(v: f32) -> f16 {
        f16::from_f32(v)
    }
}

impl Scalar for bf16 {
    #[inline]
    fn from_f32(v: f32) -> bf16 {
        bf16_from_f32(v)
    }
}

/// Decode `numel` weights of type `dtype` from packed block data.
///
/// `data` must hold at least the whole blocks covering `numel` weights; a
/// trailing partial block is decoded in full and truncated to `numel`.
///
/// # Errors
/// - `Unsupported` when this crate has no decoder for `dtype`
///   (Q5_0/Q5_1/Q8_1/Q3_K/Q5_K/Q8_K, the IQ family, and integer types).
/// - `Truncated` when `data` is shorter than the required block bytes.
/// - `OutOfMemory` when the output buffer cannot be allocated.
pub fn dequantize<S: Scalar>(dtype: TensorType, data: &[u8], numel: usize) -> Result<Vec<S>> {
    let expected = dtype.data_size(numel as u64) as usize;
    if data.len() < expected {
        return Err(QuantError::Truncated {
            expected,
            got: data.len(),
        });
    }

    let mut out: Vec<S> = Vec::new();
    out.try_reserve_exact(numel)
        .map_err(|_| QuantError::OutOfMemory(numel))?;

    match dtype {
        TensorType::F32 => dequantize_f32_data(data, &mut out, numel),
        TensorType::F16 => dequantize_f16_data(data, &mut out, numel),
        TensorType::BF16 => dequantize_bf16_data(data, &mut out, numel),
        TensorType::Q4_0 => dequantize_q4_0(data, &mut out, numel),
        TensorType::Q4_1 => dequantize_q4_1(data, &mut out, numel),
        TensorType::Q8_0 => dequantize_q8_0(data, &mut out, numel),
        TensorType::Q2K => dequantize_q2_k(data, &mut out, numel),
        TensorType::Q4K => dequantize_q4_k(data, &mut out, numel),
        TensorType::Q6K => dequantize_q6_k(data, &mut out, numel),
        other => return Err(QuantError::Unsupported(other)),
    }
    Ok(out)
}

/// Read a little-endian f16 at `off` and widen it to f32.
#[inline]
fn f16_at(block: &[u8], off: usize) -> f32 {
    f16::from_le_bytes([block[off], block[off + 1]]).to_f32()
}

/// Reinterpret raw bytes as little-endian f32 values.
fn dequantize_f32_data<S: Scalar>(data: &[u8], out: &mut Vec<S>, numel: usize) {
    for chunk in data.chunks_exact(4).take(numel) {
        let v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        out.push(S::from_f32(v));
    }
}

/// Widen f16 values.
fn dequantize_f16_data<S: Scalar>(data: &[u8], out: &mut Vec<S>, numel: usize) {
    for chunk in data.chunks_exact(2).take(numel) {
        let v = f16::from_le_bytes([chunk[0], chunk[1]]).to_f32();
        out.push(S::from_f32(v));
    }
}

/// Widen bf16 values.
fn dequantize_bf16_data<S: Scalar>(data: &[u8], out: &mut Vec<S>, numel: usize) {
    for chunk in data.chunks_exact(2).take(numel) {
        let v = bf16::from_le_bytes([chunk[0], chunk[1]]).to_f32();
        out.push(S::from_f32(v));
    }
}

/// Dequantize Q8_0 blocks.
///
/// Block layout (34 bytes, 32 weights): f16 scale, then 32 signed bytes.
/// Weight = quant * scale.
fn dequantize_q8_0<S: Scalar>(data: &[u8], out: &mut Vec<S>, numel: usize) {
    const BLOCK_BYTES: usize = 34;
    let n_blocks = numel.div_ceil(QK);
    for b in 0..n_blocks {
        let block = &data[b * BLOCK_BYTES..][..BLOCK_BYTES];
        let scale = f16_at(block, 0);
        for i in 0..QK {
            out.push(S::from_f32(block[2 + i] as i8 as f32 * scale));
        }
    }
    out.truncate(numel);
}

/// Dequantize Q4_0 blocks.
///
/// Block layout (18 bytes, 32 weights): f16 scale, then 16 bytes of packed
/// nibbles. The low nibbles of bytes 0..16 are weights 0..15, the high
/// nibbles are weights 16..31. Weight = (nibble - 8) * scale.
fn dequantize_q4_0<S: Scalar>(data: &[u8], out: &mut Vec<S>, numel: usize) {
    const BLOCK_BYTES: usize = 18;
    let n_blocks = numel.div_ceil(QK);
    for b in 0..n_blocks {
        let block = &data[b * BLOCK_BYTES..][..BLOCK_BYTES];
        let scale = f16_at(block, 0);
        for i in 0..QK / 2 {
            let q = (block[2 + i] & 0x0F) as i32 - 8;
            out.push(S::from_f32(q as f32 * scale));
        }
        for i in 0..QK / 2 {
            let q = (block[2 + i] >> 4) as i32 - 8;
            out.push(S::from_f32(q as f32 * scale));
        }
    }
    out.truncate(numel);
}

/// Dequantize Q4_1 blocks.
///
/// Block layout (20 bytes, 32 weights): f16 scale, f16 bias, then 16 bytes
/// of packed nibbles in the same low-then-high order as Q4_0.
/// Weight = nibble * scale + bias.
fn dequantize_q4_1<S: Scalar>(data: &[u8], out: &mut Vec<S>, numel: usize) {
    const BLOCK_BYTES: usize = 20;
    let n_blocks = numel.div_ceil(QK);
    for b in 0..n_blocks {
        let block = &data[b * BLOCK_BYTES..][..BLOCK_BYTES];
        let scale = f16_at(block, 0);
        let bias = f16_at(block, 2);
        for i in 0..QK / 2 {
            let q = (block[4 + i] & 0x0F) as f32;
            out.push(S::from_f32(q * scale + bias));
        }
        for i in 0..QK / 2 {
            let q = (block[4 + i] >> 4) as f32;
            out.push(S::from_f32(q * scale + bias));
        }
    }
    out.truncate(numel);
}

/// Dequantize Q2_K super-blocks.
///
/// Block layout (84 bytes, 256 weights):
/// - bytes 0..16: one (4-bit scale, 4-bit min) pair per 16-weight sub-block,
///   scale in the low nibble
/// - bytes 16..80: 256 2-bit quants in two 128-weight halves; within a half,
///   bit pair (0,1) of the 32 bytes holds weights 0..31, pair (2,3) holds
///   32..63, and so on
/// - bytes 80..84: f16 scale-of-scales, f16 scale-of-mins
///
/// Weight = quant * (sub_scale * d) - (sub_min * dmin).
fn dequantize_q2_k<S: Scalar>(data: &[u8], out: &mut Vec<S>, numel: usize) {
    const BLOCK_BYTES: usize = 84;
    let n_blocks = numel.div_ceil(QK_K);
    for b in 0..n_blocks {
        let block = &data[b * BLOCK_BYTES..][..BLOCK_BYTES];
        let scales = &block[0..16];
        let d = f16_at(block, 80);
        let dmin = f16_at(block, 82);
        for half_idx in 0..2 {
            let quants = &block[16 + half_idx * 32..][..32];
            for pair in 0..4 {
                let shift = pair * 2;
                for i in 0..32 {
                    let widx = half_idx * 128 + pair * 32 + i;
                    let sc = scales[widx / 16];
                    let sub_scale = (sc & 0x0F) as f32 * d;
                    let sub_min = (sc >> 4) as f32 * dmin;
                    let q = ((quants[i] >> shift) & 0x03) as f32;
                    out.push(S::from_f32(q * sub_scale - sub_min));
                }
            }
        }
    }
    out.truncate(numel);
}

/// Unpack the j-th 6-bit (scale, min) pair from the 12 packed bytes of a
/// Q4_K super-block.
#[inline]
fn unpack_scale_min(j: usize, sc: &[u8]) -> (u8, u8) {
    if j < 4 {
        (sc[j] & 0x3F, sc[j + 4] & 0x3F)
    } else {
        (
            (sc[j + 4] & 0x0F) | ((sc[j - 4] >> 6) << 4),
            (sc[j + 4] >> 4) | ((sc[j] >> 6) << 4),
        )
    }
}

/// Dequantize Q4_K super-blocks.
///
/// Block layout (144 bytes, 256 weights):
/// - bytes 0..4: f16 scale-of-scales, f16 scale-of-mins
/// - bytes 4..16: eight 6-bit (scale, min) pairs, packed K-quant style
/// - bytes 16..144: 256 4-bit quants in four 32-byte segments; each segment
///   holds two consecutive 32-weight sub-blocks, low nibbles first
///
/// Weight = nibble * (scale_j * d) - (min_j * dmin).
fn dequantize_q4_k<S: Scalar>(data: &[u8], out: &mut Vec<S>, numel: usize) {
    const BLOCK_BYTES: usize = 144;
    let n_blocks = numel.div_ceil(QK_K);
    for b in 0..n_blocks {
        let block = &data[b * BLOCK_BYTES..][..BLOCK_BYTES];
        let d = f16_at(block, 0);
        let dmin = f16_at(block, 2);
        let sc = &block[4..16];
        for seg in 0..4 {
            let quants = &block[16 + seg * 32..][..32];
            let (s0, m0) = unpack_scale_min(seg * 2, sc);
            let (s1, m1) = unpack_scale_min(seg * 2 + 1, sc);
            let scale0 = s0 as f32 * d;
            let min0 = m0 as f32 * dmin;
            let scale1 = s1 as f32 * d;
            let min1 = m1 as f32 * dmin;
            for &q in quants.iter() {
                out.push(S::from_f32((q & 0x0F) as f32 * scale0 - min0));
            }
            for &q in quants.iter() {
                out.push(S::from_f32((q >> 4) as f32 * scale1 - min1));
            }
        }
    }
    out.truncate(numel);
}

/// Dequantize Q6_K super-blocks.
///
/// Block layout (210 bytes, 256 weights):
/// - bytes 0..128: low 4 bits of the quants, two 64-byte halves
/// - bytes 128..192: high 2 bits of the quants, two 32-byte halves
/// - bytes 192..208: sixteen signed 8-bit sub-block scales
/// - bytes 208..210: f16 scale-of-scales
///
/// Each 6-bit quant is biased by 32; weight = (quant - 32) * scale.
fn dequantize_q6_k<S: Scalar>(data: &[u8], out: &mut Vec<S>, numel: usize) {
    const BLOCK_BYTES: usize = 210;
    let n_blocks = numel.div_ceil(QK_K);
    for b in 0..n_blocks {
        let block = &data[b * BLOCK_BYTES..][..BLOCK_BYTES];
        let d = f16_at(block, 208);
        for half_idx in 0..2 {
            let ql = &block[half_idx * 64..][..64];
            let qh = &block[128 + half_idx * 32..][..32];
            let scales = &block[192 + half_idx * 8..][..8];
            for i in 0..128 {
                let lo = (ql[i % 64] >> ((i / 64) * 4)) & 0x0F;
                let hi = (qh[i % 32] >> ((i / 32) * 2)) & 0x03;
                let q = (lo | (hi << 4)) as i32 - 32;
                let scale = scales[i / 16] as i8 as f32 * d;
                out.push(S::from_f32(q as f32 * scale));
            }
        }
    }
    out.truncate(numel);
}
