use std::fmt;

/// Tensor storage types defined by the GGUF format.
///
/// Quantized types store weights in fixed-size packed blocks sharing one or
/// more scaling factors; scalar types store one weight per "block". The type
/// ids 4 and 5 (q4_2/q4_3) were removed from the format and are treated as
/// unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorType {
    F32,
    F16,
    Q4_0,
    Q4_1,
    Q5_0,
    Q5_1,
    Q8_0,
    Q8_1,
    Q2K,
    Q3K,
    Q4K,
    Q5K,
    Q6K,
    Q8K,
    Iq2Xxs,
    Iq2Xs,
    Iq3Xxs,
    Iq1S,
    Iq4Nl,
    Iq3S,
    Iq2S,
    Iq4Xs,
    I8,
    I16,
    I32,
    I64,
    F64,
    Iq1M,
    BF16,
}

impl TensorType {
    /// Converts a GGUF tensor type id to a `TensorType`.
    ///
    /// Returns `None` for the deprecated ids 4 and 5 and for any id outside
    /// the table.
    pub fn from_gguf_type(id: u32) -> Option<TensorType> {
        match id {
            0 => Some(TensorType::F32),
            1 => Some(TensorType::F16),
            2 => Some(TensorType::Q4_0),
            3 => Some(TensorType::Q4_1),
            6 => Some(TensorType::Q5_0),
            7 => Some(TensorType::Q5_1),
            8 => Some(TensorType::Q8_0),
            9 => Some(TensorType::Q8_1),
            10 => Some(TensorType::Q2K),
            11 => Some(TensorType::Q3K),
            12 => Some(TensorType::Q4K),
            13 => Some(TensorType::Q5K),
            14 => Some(TensorType::Q6K),
            15 => Some(TensorType::Q8K),
            16 => Some(TensorType::Iq2Xxs),
            17 => Some(TensorType::Iq2Xs),
            18 => Some(TensorType::Iq3Xxs),
            19 => Some(TensorType::Iq1S),
            20 => Some(TensorType::Iq4Nl),
            21 => Some(TensorType::Iq3S),
            22 => Some(TensorType::Iq2S),
            23 => Some(TensorType::Iq4Xs),
            24 => Some(TensorType::I8),
            25 => Some(TensorType::I16),
            26 => Some(TensorType::I32),
            27 => Some(TensorType::I64),
            28 => Some(TensorType::F64),
            29 => Some(TensorType::Iq1M),
            30 => Some(TensorType::BF16),
            _ => None,
        }
    }

    /// Returns the GGUF tensor type id for this `TensorType`.
    pub fn to_gguf_type(self) -> u32 {
        match self {
            TensorType::F32 => 0,
            TensorType::F16 => 1,
            TensorType::Q4_0 => 2,
            TensorType::Q4_1 => 3,
            TensorType::Q5_0 => 6,
            TensorType::Q5_1 => 7,
            TensorType::Q8_0 => 8,
            TensorType::Q8_1 => 9,
            TensorType::Q2K => 10,
            TensorType::Q3K => 11,
            TensorType::Q4K => 12,
            TensorType::Q5K => 13,
            TensorType::Q6K => 14,
            TensorType::Q8K => 15,
            TensorType::Iq2Xxs => 16,
            TensorType::Iq2Xs => 17,
            TensorType::Iq3Xxs => 18,
            TensorType::Iq1S => 19,
            TensorType::Iq4Nl => 20,
            TensorType::Iq3S => 21,
            TensorType::Iq2S => 22,
            TensorType::Iq4Xs => 23,
            TensorType::I8 => 24,
            TensorType::I16 => 25,
            TensorType::I32 => 26,
            TensorType::I64 => 27,
            TensorType::F64 => 28,
            TensorType::Iq1M => 29,
            TensorType::BF16 => 30,
        }
    }

    /// Number of weights encoded by one block of this type.
    ///
    /// Scalar types have one weight per block; the classic quantized types
    /// pack 32, the K-quant and IQ super-block types pack 256.
    pub fn items_per_block(self) -> u64 {
        match self {
            TensorType::F32
            | TensorType::F16
            | TensorType::I8
            | TensorType::I16
            | TensorType::I32
            | TensorType::I64
            | TensorType::F64
            | TensorType::BF16 => 1,
            TensorType::Q4_0
            | TensorType::Q4_1
            | TensorType::Q5_0
            | TensorType::Q5_1
            | TensorType::Q8_0
            | TensorType::Q8_1
            | TensorType::Iq4Nl => 32,
            TensorType::Q2K
            | TensorType::Q3K
            | TensorType::Q4K
            | TensorType::Q5K
            | TensorType::Q6K
            | TensorType::Q8K
            | TensorType::Iq2Xxs
            | TensorType::Iq2Xs
            | TensorType::Iq3Xxs
            | TensorType::Iq1S
            | TensorType::Iq3S
            | TensorType::Iq2S
            | TensorType::Iq4Xs
            | TensorType::Iq1M => 256,
        }
    }

    /// Size in bytes of one block of this type.
    pub fn bytes_per_block(self) -> u64 {
        match self {
            TensorType::I8 => 1,
            TensorType::F16 | TensorType::I16 | TensorType::BF16 => 2,
            TensorType::F32 | TensorType::I32 => 4,
            TensorType::I64 | TensorType::F64 => 8,
            TensorType::Q4_0 | TensorType::Iq4Nl => 18,
            TensorType::Q4_1 => 20,
            TensorType::Q5_0 => 22,
            TensorType::Q5_1 => 24,
            TensorType::Q8_0 => 34,
            TensorType::Q8_1 => 40,
            TensorType::Q2K => 84,
            TensorType::Q3K | TensorType::Iq3S => 110,
            TensorType::Q4K => 144,
            TensorType::Q5K => 176,
            TensorType::Q6K => 210,
            TensorType::Q8K => 292,
            TensorType::Iq2Xxs => 66,
            TensorType::Iq2Xs => 74,
            TensorType::Iq3Xxs => 98,
            TensorType::Iq1S => 50,
            TensorType::Iq2S => 82,
            TensorType::Iq4Xs => 136,
            TensorType::Iq1M => 56,
        }
    }

    /// Total byte size of a tensor holding `numel` weights of this type.
    ///
    /// A trailing partial block still occupies a whole block on disk, so the
    /// block count rounds up.
    pub fn data_size(self, numel: u64) -> u64 {
        numel.div_ceil(self.items_per_block()) * self.bytes_per_block()
    }

    /// Returns true if this type packs multiple weights per block.
    pub fn is_quantized(self) -> bool {
        self.items_per_block() > 1
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TensorType::F32 => "f32",
            TensorType::F16 => "f16",
            TensorType::Q4_0 => "q4_0",
            TensorType::Q4_1 => "q4_1",
            TensorType::Q5_0 => "q5_0",
            TensorType::Q5_1 => "q5_1",
            TensorType::Q8_0 => "q8_0",
            TensorType::Q8_1 => "q8_1",
            TensorType::Q2K => "q2_k",
            TensorType::Q3K => "q3_k",
            TensorType::Q4K => "q4_k",
            TensorType::Q5K => "q5_k",
            TensorType::Q6K => "q6_k",
            TensorType::Q8K => "q8_k",
            TensorType::Iq2Xxs => "iq2_xxs",
            TensorType::Iq2Xs => "iq2_xs",
            TensorType::Iq3Xxs => "iq3_xxs",
            TensorType::Iq1S => "iq1_s",
            TensorType::Iq4Nl => "iq4_nl",
            TensorType::Iq3S => "iq3_s",
            TensorType::Iq2S => "iq2_s",
            TensorType::Iq4Xs => "iq4_xs",
            TensorType::I8 => "i8",
            TensorType::I16 => "i16",
            TensorType::I32 => "i32",
            TensorType::I64 => "i64",
            TensorType::F64 => "f64",
            TensorType::Iq1M => "iq1_m",
            TensorType::BF16 => "bf16",
        };
        write!(f, "{}", name)
    }
}
