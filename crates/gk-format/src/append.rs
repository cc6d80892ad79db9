use gk_quant::TensorType;
use tracing::warn;

use crate::error::{GgufError, Result};
use crate::session::{alignment_padding, GgufFile};
use crate::tensor::MAX_DIMS;
use crate::value::{ValueType, ALIGNMENT_KEY, ALIGNMENT_KEY_MISSPELLED};

/// Header field offsets for the two counters bumped by the append API.
const TENSOR_COUNT_OFFSET: u64 = 8;
const KV_COUNT_OFFSET: u64 = 16;

/// Streaming append API.
///
/// A writer produces a valid file by emitting, in order: every key-value
/// pair, every tensor descriptor (with relative offsets computed up front),
/// then every tensor payload in descriptor order. Each append grows the
/// file, bumps the corresponding header counter, and remaps, so the new
/// bytes are immediately observable through the session.
impl GgufFile {
    /// Append one metadata key-value pair. `value` is the raw on-disk
    /// payload for `value_type`.
    ///
    /// Appending a `general.alignment` key updates the session alignment the
    /// same way reading one does, so subsequent payload padding matches the
    /// declared value.
    ///
    /// # Errors
    /// `Invalid` once any tensor descriptor has been written: the metadata
    /// section is frozen from that point on.
    pub fn append_kv(&mut self, key: &str, value_type: ValueType, value: &[u8]) -> Result<()> {
        self.require_writable("append_kv")?;
        if self.tensor_count() != 0 {
            return Err(GgufError::Invalid(
                "cannot append metadata after tensor descriptors".into(),
            ));
        }
        let mut buf = Vec::with_capacity(8 + key.len() + 4 + value.len());
        buf.extend_from_slice(&(key.len() as u64).to_le_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(&value_type.to_u32().to_le_bytes());
        buf.extend_from_slice(value);

        let new_count = self.metadata_kv_count() + 1;
        self.write_at_end(&buf)?;
        self.write_header_u64(KV_COUNT_OFFSET, new_count)?;
        self.remap()?;

        if value_type == ValueType::U32
            && (key == ALIGNMENT_KEY || key == ALIGNMENT_KEY_MISSPELLED)
            && value.len() == 4
        {
            if key == ALIGNMENT_KEY_MISSPELLED {
                warn!(
                    path = %self.path.display(),
                    "appending the misspelled '{}' key", ALIGNMENT_KEY_MISSPELLED
                );
            }
            let alignment = u32::from_le_bytes([value[0], value[1], value[2], value[3]]) as u64;
            if alignment == 0 {
                warn!(path = %self.path.display(), "ignoring zero data alignment");
            } else {
                self.alignment = alignment;
            }
        }
        Ok(())
    }

    /// Append a uint32 key-value pair.
    pub fn append_kv_u32(&mut self, key: &str, value: u32) -> Result<()> {
        self.append_kv(key, ValueType::U32, &value.to_le_bytes())
    }

    /// Append a string key-value pair.
    pub fn append_kv_string(&mut self, key: &str, value: &str) -> Result<()> {
        let mut buf = Vec::with_capacity(8 + value.len());
        buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
        buf.extend_from_slice(value.as_bytes());
        self.append_kv(key, ValueType::String, &buf)
    }

    /// Append one tensor descriptor.
    ///
    /// `rel_offset` is the payload position relative to the start of the
    /// data section; the caller must keep it aligned and consistent with the
    /// sizes of the previously declared tensors.
    pub fn append_tensor_info(
        &mut self,
        name: &str,
        dims: &[u64],
        dtype: TensorType,
        rel_offset: u64,
    ) -> Result<()> {
        self.require_writable("append_tensor_info")?;
        if dims.len() > MAX_DIMS {
            return Err(GgufError::Invalid(format!(
                "tensor {} declares {} dimensions (max {})",
                name,
                dims.len(),
                MAX_DIMS
            )));
        }
        let mut buf = Vec::with_capacity(8 + name.len() + 4 + 8 * dims.len() + 4 + 8);
        buf.extend_from_slice(&(name.len() as u64).to_le_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&(dims.len() as u32).to_le_bytes());
        for dim in dims {
            buf.extend_from_slice(&dim.to_le_bytes());
        }
        buf.extend_from_slice(&dtype.to_gguf_type().to_le_bytes());
        buf.extend_from_slice(&rel_offset.to_le_bytes());

        let new_count = self.tensor_count() + 1;
        self.write_at_end(&buf)?;
        self.write_header_u64(TENSOR_COUNT_OFFSET, new_count)?;
        self.remap()
    }

    /// Append one tensor payload, padding the file up to the session
    /// alignment first. Payloads must arrive in descriptor order.
    pub fn append_tensor_data(&mut self, data: &[u8]) -> Result<()> {
        self.require_writable("append_tensor_data")?;
        let padding = alignment_padding(self.alignment, self.file_size());
        if padding > 0 {
            self.write_at_end(&vec![0u8; padding as usize])?;
        }
        self.write_at_end(data)?;
        self.remap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OpenMode;
    use crate::value::{ScalarValue, ValueVisitor};

    /// Collects scalar values as debug strings.
    #[derive(Default)]
    struct Collect {
        values: Vec<String>,
    }

    impl ValueVisitor for Collect {
        fn scalar(&mut self, value: ScalarValue<'_>, _in_array: u64, _array_len: u64) {
            self.values.push(format!("{:?}", value));
        }
        fn array_start(&mut self, _len: u64) {}
        fn array_end(&mut self, _len: u64) {}
    }

    #[test]
    fn test_kv_roundtrip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.gguf");
        let mut w = GgufFile::create(&path, true).unwrap();
        w.append_kv_u32("foo", 0xCAFEBABE).unwrap();
        w.append_kv_string("bar", "hello").unwrap();
        drop(w);

        let mut r = GgufFile::open(&path, OpenMode::Read).unwrap();
        assert_eq!(r.metadata_kv_count(), 2);

        let mut names = Vec::new();
        let mut collect = Collect::default();
        while let Some(key) = r.next_key().unwrap() {
            names.push(key.name.clone());
            r.walk_value(key.value_type, &mut collect).unwrap();
        }
        assert_eq!(names, vec!["foo", "bar"]);
        assert_eq!(collect.values, vec!["U32(3405691582)", "Str(\"hello\")"]);
    }

    #[test]
    fn test_append_kv_after_tensor_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frozen.gguf");
        let mut w = GgufFile::create(&path, true).unwrap();
        w.append_kv_u32("early", 1).unwrap();
        w.append_tensor_info("t", &[1], TensorType::F32, 0).unwrap();

        let err = w.append_kv_u32("late", 2).unwrap_err();
        assert!(matches!(err, GgufError::Invalid(_)));
    }

    #[test]
    fn test_append_requires_writable_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.gguf");
        GgufFile::create(&path, true).unwrap();

        let mut r = GgufFile::open(&path, OpenMode::Read).unwrap();
        let err = r.append_kv_u32("k", 1).unwrap_err();
        assert!(matches!(err, GgufError::Precondition(_)));
        let err = r.append_tensor_data(&[0]).unwrap_err();
        assert!(matches!(err, GgufError::Precondition(_)));
    }

    #[test]
    fn test_too_many_dimensions_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dims.gguf");
        let mut w = GgufFile::create(&path, true).unwrap();
        let err = w
            .append_tensor_info("t", &[1, 2, 3, 4, 5], TensorType::F32, 0)
            .unwrap_err();
        assert!(matches!(err, GgufError::Invalid(_)));
    }

    #[test]
    fn test_file_bytes_are_deterministic() {
        // The append API must produce exactly the bytes the format
        // prescribes, with no slack between sections.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exact.gguf");
        let mut w = GgufFile::create(&path, true).unwrap();
        w.append_kv_u32("n", 7).unwrap();
        w.append_tensor_info("t", &[2], TensorType::F32, 0).unwrap();
        w.append_tensor_data(&[0, 0, 128, 63, 0, 0, 0, 64]).unwrap(); // 1.0, 2.0
        drop(w);

        let mut expected: Vec<u8> = Vec::new();
        expected.extend_from_slice(b"GGUF");
        expected.extend_from_slice(&3u32.to_le_bytes());
        expected.extend_from_slice(&1u64.to_le_bytes()); // tensors
        expected.extend_from_slice(&1u64.to_le_bytes()); // kvs
        expected.extend_from_slice(&1u64.to_le_bytes()); // key length
        expected.extend_from_slice(b"n");
        expected.extend_from_slice(&4u32.to_le_bytes()); // uint32
        expected.extend_from_slice(&7u32.to_le_bytes());
        expected.extend_from_slice(&1u64.to_le_bytes()); // name length
        expected.extend_from_slice(b"t");
        expected.extend_from_slice(&1u32.to_le_bytes()); // ndim
        expected.extend_from_slice(&2u64.to_le_bytes()); // dim[0]
        expected.extend_from_slice(&0u32.to_le_bytes()); // f32
        expected.extend_from_slice(&0u64.to_le_bytes()); // rel offset
        while expected.len() % 32 != 0 {
            expected.push(0);
        }
        expected.extend_from_slice(&[0, 0, 128, 63, 0, 0, 0, 64]);

        assert_eq!(std::fs::read(&path).unwrap(), expected);
    }
}
