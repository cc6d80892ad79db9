use half::bf16;

/// Converts f32 to bf16, binary identical to AMD Zen4 VCVTNEPS2BF16.
///
/// NaNs are made quiet (bit 6 of the truncated pattern is forced on),
/// subnormal inputs flush to signed zero, and everything else rounds to
/// nearest-even by adding `0x7FFF` plus the lowest surviving mantissa bit
/// before the 16-bit shift.
///
/// `half::bf16::from_f32` is not used here: it keeps subnormals, which
/// breaks bit-for-bit compatibility with hardware converters.
pub fn bf16_from_f32(s: f32) -> bf16 {
    let u = s.to_bits();
    if (u & 0x7fff_ffff) > 0x7f80_0000 {
        // NaN: truncate and force quiet.
        return bf16::from_bits(((u >> 16) as u16) | 64);
    }
    if u & 0x7f80_0000 == 0 {
        // Subnormal: flush to signed zero.
        return bf16::from_bits(((u & 0x8000_0000) >> 16) as u16);
    }
    bf16::from_bits(((u + (0x7fff + ((u >> 16) & 1))) >> 16) as u16)
}
