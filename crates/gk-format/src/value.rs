use tracing::warn;

use crate::error::{GgufError, Result};
use crate::session::GgufFile;

/// Metadata key overriding the data-section alignment for the rest of the
/// file.
pub const ALIGNMENT_KEY: &str = "general.alignment";

/// Misspelling of [`ALIGNMENT_KEY`] emitted by some older writers; honoured
/// for compatibility but flagged with a warning.
pub(crate) const ALIGNMENT_KEY_MISSPELLED: &str = "general.alignmnet";

/// Metadata value type ids as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    Bool,
    String,
    Array,
    U64,
    I64,
    F64,
}

impl ValueType {
    /// Converts an on-disk type id to a `ValueType`.
    pub fn from_u32(id: u32) -> Option<ValueType> {
        match id {
            0 => Some(ValueType::U8),
            1 => Some(ValueType::I8),
            2 => Some(ValueType::U16),
            3 => Some(ValueType::I16),
            4 => Some(ValueType::U32),
            5 => Some(ValueType::I32),
            6 => Some(ValueType::F32),
            7 => Some(ValueType::Bool),
            8 => Some(ValueType::String),
            9 => Some(ValueType::Array),
            10 => Some(ValueType::U64),
            11 => Some(ValueType::I64),
            12 => Some(ValueType::F64),
            _ => None,
        }
    }

    /// Returns the on-disk type id.
    pub fn to_u32(self) -> u32 {
        match self {
            ValueType::U8 => 0,
            ValueType::I8 => 1,
            ValueType::U16 => 2,
            ValueType::I16 => 3,
            ValueType::U32 => 4,
            ValueType::I32 => 5,
            ValueType::F32 => 6,
            ValueType::Bool => 7,
            ValueType::String => 8,
            ValueType::Array => 9,
            ValueType::U64 => 10,
            ValueType::I64 => 11,
            ValueType::F64 => 12,
        }
    }

    /// Printable type name, matching the names GGUF tooling uses.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::U8 => "uint8",
            ValueType::I8 => "int8",
            ValueType::U16 => "uint16",
            ValueType::I16 => "int16",
            ValueType::U32 => "uint32",
            ValueType::I32 => "int32",
            ValueType::F32 => "float32",
            ValueType::Bool => "bool",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::U64 => "uint64",
            ValueType::I64 => "int64",
            ValueType::F64 => "float64",
        }
    }
}

/// One scalar metadata value, borrowed from the mapping where possible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue<'a> {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    /// A bool whose stored byte was neither 0 nor 1; the raw byte is kept so
    /// tooling can report the corruption.
    InvalidBool(u8),
    Str(&'a str),
    U64(u64),
    I64(i64),
    F64(f64),
}

/// Observer invoked by [`GgufFile::walk_value`] for each element of a value.
///
/// `in_array` is the 1-based index of the element inside its array, or 0 for
/// a value that is not an array element.
pub trait ValueVisitor {
    fn scalar(&mut self, value: ScalarValue<'_>, in_array: u64, array_len: u64);
    fn array_start(&mut self, len: u64);
    fn array_end(&mut self, len: u64);
}

/// Visitor that observes nothing; walking with it just consumes the value.
pub struct SkipValues;

impl ValueVisitor for SkipValues {
    fn scalar(&mut self, _value: ScalarValue<'_>, _in_array: u64, _array_len: u64) {}
    fn array_start(&mut self, _len: u64) {}
    fn array_end(&mut self, _len: u64) {}
}

/// A metadata key header: the cursor is left at the value payload, which the
/// caller must walk or skip before advancing further.
#[derive(Debug, Clone)]
pub struct Key {
    pub name: String,
    pub value_type: ValueType,
}

impl GgufFile {
    /// Parse the next metadata key, or `None` once the section is exhausted.
    ///
    /// The cursor stops at the start of the value; the caller is obligated to
    /// consume it with [`walk_value`](Self::walk_value) or
    /// [`skip_value`](Self::skip_value) before the next `next_key` call.
    ///
    /// A `general.alignment` key of type uint32 updates the session alignment
    /// as a side effect (without consuming the value).
    pub fn next_key(&mut self) -> Result<Option<Key>> {
        if self.left_kv == 0 {
            return Ok(None);
        }
        self.left_kv -= 1;
        let name = self.read_string()?;
        let raw = self.read_u32()?;
        let value_type = ValueType::from_u32(raw).ok_or_else(|| {
            GgufError::Invalid(format!("unknown value type id {} for key {}", raw, name))
        })?;

        if value_type == ValueType::U32
            && (name == ALIGNMENT_KEY || name == ALIGNMENT_KEY_MISSPELLED)
        {
            if name == ALIGNMENT_KEY_MISSPELLED {
                warn!(
                    path = %self.path.display(),
                    "file uses the misspelled '{}' key", ALIGNMENT_KEY_MISSPELLED
                );
            }
            let alignment = self.peek_u32()? as u64;
            if alignment == 0 {
                warn!(path = %self.path.display(), "ignoring zero data alignment");
            } else {
                self.alignment = alignment;
            }
        }
        Ok(Some(Key { name, value_type }))
    }

    /// Consume one value at the cursor, reporting every element to `visitor`.
    ///
    /// Array values produce an `array_start` / per-element / `array_end`
    /// sequence. Nested arrays are rejected as `Invalid`.
    pub fn walk_value(&mut self, ty: ValueType, visitor: &mut dyn ValueVisitor) -> Result<()> {
        self.walk_value_at(ty, visitor, 0, 0, false)
    }

    /// Consume one value at the cursor without observing it.
    pub fn skip_value(&mut self, ty: ValueType) -> Result<()> {
        self.walk_value(ty, &mut SkipValues)
    }

    /// Drain the remaining metadata section, skipping every value.
    pub fn skip_metadata(&mut self) -> Result<()> {
        while let Some(key) = self.next_key()? {
            self.skip_value(key.value_type)?;
        }
        Ok(())
    }

    fn walk_value_at(
        &mut self,
        ty: ValueType,
        visitor: &mut dyn ValueVisitor,
        in_array: u64,
        array_len: u64,
        nested: bool,
    ) -> Result<()> {
        let value = match ty {
            ValueType::Array => {
                if nested {
                    return Err(GgufError::Invalid("nested arrays are not supported".into()));
                }
                let raw = self.read_u32()?;
                let elem = ValueType::from_u32(raw).ok_or_else(|| {
                    GgufError::Invalid(format!("unknown array element type id {}", raw))
                })?;
                let len = self.read_u64()?;
                visitor.array_start(len);
                for j in 0..len {
                    self.walk_value_at(elem, visitor, j + 1, len, true)?;
                }
                visitor.array_end(len);
                return Ok(());
            }
            ValueType::String => {
                let s = self.read_str()?;
                ScalarValue::Str(s)
            }
            ValueType::U8 => ScalarValue::U8(self.read_u8()?),
            ValueType::I8 => ScalarValue::I8(self.read_u8()? as i8),
            ValueType::U16 => ScalarValue::U16(self.read_u16()?),
            ValueType::I16 => ScalarValue::I16(self.read_u16()? as i16),
            ValueType::U32 => ScalarValue::U32(self.read_u32()?),
            ValueType::I32 => ScalarValue::I32(self.read_u32()? as i32),
            ValueType::F32 => ScalarValue::F32(f32::from_bits(self.read_u32()?)),
            ValueType::Bool => match self.read_u8()? {
                0 => ScalarValue::Bool(false),
                1 => ScalarValue::Bool(true),
                b => ScalarValue::InvalidBool(b),
            },
            ValueType::U64 => ScalarValue::U64(self.read_u64()?),
            ValueType::I64 => ScalarValue::I64(self.read_u64()? as i64),
            ValueType::F64 => ScalarValue::F64(f64::from_bits(self.read_u64()?)),
        };
        visitor.scalar(value, in_array, array_len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Visitor that records every callback as a printable event.
    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ValueVisitor for Recorder {
        fn scalar(&mut self, value: ScalarValue<'_>, in_array: u64, _array_len: u64) {
            self.events.push(format!("{:?}@{}", value, in_array));
        }
        fn array_start(&mut self, len: u64) {
            self.events.push(format!("start:{}", len));
        }
        fn array_end(&mut self, len: u64) {
            self.events.push(format!("end:{}", len));
        }
    }

    fn scratch() -> (tempfile::TempDir, GgufFile) {
        let dir = tempfile::tempdir().unwrap();
        let session = GgufFile::create(dir.path().join("t.gguf"), true).unwrap();
        (dir, session)
    }

    #[test]
    fn test_value_type_ids() {
        for id in 0..13u32 {
            assert_eq!(ValueType::from_u32(id).unwrap().to_u32(), id);
        }
        assert!(ValueType::from_u32(13).is_none());
        assert_eq!(ValueType::U32.name(), "uint32");
        assert_eq!(ValueType::F64.name(), "float64");
    }

    #[test]
    fn test_walk_scalar_values() {
        let (_dir, mut w) = scratch();
        w.append_kv("answer", ValueType::U32, &42u32.to_le_bytes())
            .unwrap();
        w.append_kv("pi", ValueType::F32, &3.5f32.to_le_bytes())
            .unwrap();
        w.append_kv("on", ValueType::Bool, &[1]).unwrap();
        w.rewind();

        let mut rec = Recorder::default();
        while let Some(key) = w.next_key().unwrap() {
            w.walk_value(key.value_type, &mut rec).unwrap();
        }
        assert_eq!(rec.events, vec!["U32(42)@0", "F32(3.5)@0", "Bool(true)@0"]);
    }

    #[test]
    fn test_walk_string_and_array() {
        let (_dir, mut w) = scratch();
        let mut arr = Vec::new();
        arr.extend_from_slice(&8u32.to_le_bytes()); // element type: string
        arr.extend_from_slice(&2u64.to_le_bytes()); // length
        for s in ["ab", "c"] {
            arr.extend_from_slice(&(s.len() as u64).to_le_bytes());
            arr.extend_from_slice(s.as_bytes());
        }
        w.append_kv("names", ValueType::Array, &arr).unwrap();
        w.rewind();

        let key = w.next_key().unwrap().unwrap();
        assert_eq!(key.name, "names");
        let mut rec = Recorder::default();
        w.walk_value(key.value_type, &mut rec).unwrap();
        assert_eq!(
            rec.events,
            vec!["start:2", "Str(\"ab\")@1", "Str(\"c\")@2", "end:2"]
        );
        // The whole value was consumed.
        assert!(w.next_key().unwrap().is_none());
    }

    #[test]
    fn test_skip_is_walk_without_callbacks() {
        let (_dir, mut w) = scratch();
        w.append_kv_string("a", "hello").unwrap();
        w.append_kv_u32("b", 7).unwrap();
        w.rewind();

        let key = w.next_key().unwrap().unwrap();
        w.skip_value(key.value_type).unwrap();
        let key = w.next_key().unwrap().unwrap();
        assert_eq!(key.name, "b");
    }

    #[test]
    fn test_alignment_interception() {
        let (_dir, mut w) = scratch();
        w.append_kv_u32(ALIGNMENT_KEY, 64).unwrap();
        assert_eq!(w.alignment(), 64); // writer side tracks it too
        w.rewind();
        w.skip_metadata().unwrap();
        assert_eq!(w.alignment(), 64);
    }

    #[test]
    fn test_rewind_resets_alignment() {
        let (_dir, mut w) = scratch();
        w.append_kv_u32(ALIGNMENT_KEY, 128).unwrap();
        w.rewind();
        assert_eq!(w.alignment(), 32);
        w.skip_metadata().unwrap();
        assert_eq!(w.alignment(), 128);
    }

    #[test]
    fn test_misspelled_alignment_key_still_applies() {
        let (_dir, mut w) = scratch();
        w.append_kv(ALIGNMENT_KEY_MISSPELLED, ValueType::U32, &64u32.to_le_bytes())
            .unwrap();
        // The write path must track it too, so padding emitted later in this
        // same session uses the just-declared alignment.
        assert_eq!(w.alignment(), 64);
        w.rewind();
        w.skip_metadata().unwrap();
        assert_eq!(w.alignment(), 64);
    }

    #[test]
    fn test_zero_alignment_is_ignored() {
        let (_dir, mut w) = scratch();
        w.append_kv_u32(ALIGNMENT_KEY, 0).unwrap();
        assert_eq!(w.alignment(), 32); // write path ignores it too
        w.rewind();
        w.skip_metadata().unwrap();
        assert_eq!(w.alignment(), 32);
    }

    #[test]
    fn test_out_of_range_bool_byte_is_preserved() {
        let (_dir, mut w) = scratch();
        w.append_kv("ok", ValueType::Bool, &[1]).unwrap();
        w.append_kv("corrupt", ValueType::Bool, &[5]).unwrap();
        w.rewind();

        let mut rec = Recorder::default();
        while let Some(key) = w.next_key().unwrap() {
            w.walk_value(key.value_type, &mut rec).unwrap();
        }
        assert_eq!(rec.events, vec!["Bool(true)@0", "InvalidBool(5)@0"]);
    }

    #[test]
    fn test_nested_array_is_invalid() {
        let (_dir, mut w) = scratch();
        let mut arr = Vec::new();
        arr.extend_from_slice(&9u32.to_le_bytes()); // element type: array
        arr.extend_from_slice(&1u64.to_le_bytes());
        arr.extend_from_slice(&0u32.to_le_bytes()); // inner element type
        arr.extend_from_slice(&0u64.to_le_bytes()); // inner length
        w.append_kv("nested", ValueType::Array, &arr).unwrap();
        w.rewind();

        let key = w.next_key().unwrap().unwrap();
        let err = w.skip_value(key.value_type).unwrap_err();
        assert!(matches!(err, GgufError::Invalid(_)));
    }
}
