use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{GgufError, Result};

/// The four-byte magic number identifying a GGUF file: ASCII "GGUF".
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// GGUF format version written by this crate.
pub const GGUF_VERSION: u32 = 3;

/// Default alignment (in bytes) of the tensor data section, used until a
/// `general.alignment` metadata key overrides it.
pub const GGUF_DEFAULT_ALIGNMENT: u64 = 32;

/// On-disk header size: magic, u32 version, u64 tensor count, u64 kv count.
pub(crate) const HEADER_SIZE: usize = 24;

/// Zero bytes needed to bring `offset` up to a multiple of `alignment`.
pub fn alignment_padding(alignment: u64, offset: u64) -> u64 {
    (alignment - (offset % alignment)) % alignment
}

/// How a [`GgufFile`] session may touch the underlying file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    ReadWrite,
}

/// A GGUF file session: the open file plus a read-only memory mapping of it.
///
/// The session doubles as a parse cursor over the metadata and tensor
/// sections. All mutation (the append API) goes through the file handle and
/// is followed by a remap, so the mapping always reflects the file on disk.
///
/// Tensor payloads are handed out as slices borrowing the session
/// (`tensor_data`), which statically prevents a view from surviving an
/// append: appends need `&mut self` and would invalidate the mapping.
/// Resources are released on drop.
#[derive(Debug)]
pub struct GgufFile {
    pub(crate) file: File,
    pub(crate) mmap: Mmap,
    pub(crate) path: PathBuf,
    pub(crate) writable: bool,
    /// Byte offset of the next item to parse.
    pub(crate) off: usize,
    /// Key-value pairs left to read before the tensor section.
    pub(crate) left_kv: u64,
    /// Tensor descriptors left to read.
    pub(crate) left_tensors: u64,
    /// Current data-section alignment.
    pub(crate) alignment: u64,
    /// Absolute offset of the tensor data section; 0 until computed.
    pub(crate) data_off: u64,
}

impl GgufFile {
    /// Open an existing GGUF file and position the cursor after the header.
    ///
    /// # Errors
    /// `Invalid` when the file is shorter than a header or does not start
    /// with the GGUF magic; `Io` for system-level failures.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<GgufFile> {
        let path = path.as_ref();
        let writable = mode == OpenMode::ReadWrite;
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|e| GgufError::io(path, e))?;
        let len = file.metadata().map_err(|e| GgufError::io(path, e))?.len();
        if len < HEADER_SIZE as u64 {
            return Err(GgufError::Invalid(format!(
                "{} is {} bytes, shorter than a GGUF header",
                path.display(),
                len
            )));
        }
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| GgufError::io(path, e))?;
        if mmap[0..4] != GGUF_MAGIC {
            return Err(GgufError::Invalid(format!(
                "{} does not start with the GGUF magic",
                path.display()
            )));
        }
        let mut session = GgufFile {
            file,
            mmap,
            path: path.to_path_buf(),
            writable,
            off: HEADER_SIZE,
            left_kv: 0,
            left_tensors: 0,
            alignment: GGUF_DEFAULT_ALIGNMENT,
            data_off: 0,
        };
        session.rewind();
        Ok(session)
    }

    /// Create a fresh GGUF file holding an empty (zero-count) header and
    /// return a read-write session over it.
    ///
    /// # Errors
    /// `Exists` when the file is already present and `overwrite` is false;
    /// an existing file is truncated when `overwrite` is true.
    pub fn create(path: impl AsRef<Path>, overwrite: bool) -> Result<GgufFile> {
        let path = path.as_ref();
        let mut opts = OpenOptions::new();
        opts.read(true).write(true);
        if overwrite {
            opts.create(true).truncate(true);
        } else {
            opts.create_new(true);
        }
        let mut file = opts.open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                GgufError::Exists(path.to_path_buf())
            } else {
                GgufError::io(path, e)
            }
        })?;

        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(&GGUF_MAGIC);
        header.extend_from_slice(&GGUF_VERSION.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes()); // tensor count
        header.extend_from_slice(&0u64.to_le_bytes()); // kv count
        file.write_all(&header).map_err(|e| GgufError::io(path, e))?;

        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| GgufError::io(path, e))?;
        Ok(GgufFile {
            file,
            mmap,
            path: path.to_path_buf(),
            writable: true,
            off: HEADER_SIZE,
            left_kv: 0,
            left_tensors: 0,
            alignment: GGUF_DEFAULT_ALIGNMENT,
            data_off: 0,
        })
    }

    /// GGUF format version from the header.
    pub fn version(&self) -> u32 {
        u32::from_le_bytes(self.mmap[4..8].try_into().unwrap())
    }

    /// Number of tensor descriptors in the file.
    pub fn tensor_count(&self) -> u64 {
        u64::from_le_bytes(self.mmap[8..16].try_into().unwrap())
    }

    /// Number of metadata key-value pairs in the file.
    pub fn metadata_kv_count(&self) -> u64 {
        u64::from_le_bytes(self.mmap[16..24].try_into().unwrap())
    }

    /// Data-section alignment currently in effect for this session.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Total size of the mapped file in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Path this session was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reset the parse cursor to just past the header and reload the
    /// remaining-item counters from the current header.
    pub fn rewind(&mut self) {
        self.off = HEADER_SIZE;
        self.left_kv = self.metadata_kv_count();
        self.left_tensors = self.tensor_count();
        self.alignment = GGUF_DEFAULT_ALIGNMENT;
        self.data_off = 0;
    }

    /// Re-create the mapping after the file grew.
    pub(crate) fn remap(&mut self) -> Result<()> {
        let mmap = unsafe { Mmap::map(&self.file) }.map_err(|e| GgufError::io(&self.path, e))?;
        self.mmap = mmap;
        Ok(())
    }

    pub(crate) fn require_writable(&self, what: &str) -> Result<()> {
        if !self.writable {
            return Err(GgufError::Precondition(format!(
                "{} requires a read-write session",
                what
            )));
        }
        Ok(())
    }

    /// Current cursor position.
    pub(crate) fn offset(&self) -> usize {
        self.off
    }

    pub(crate) fn bytes_between(&self, start: usize, end: usize) -> &[u8] {
        &self.mmap[start..end]
    }

    /// Consume `n` bytes at the cursor, failing on truncation.
    pub(crate) fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.mmap.len() - self.off < n {
            return Err(GgufError::Invalid(format!(
                "truncated file: need {} bytes at offset {}, file is {} bytes",
                n,
                self.off,
                self.mmap.len()
            )));
        }
        let start = self.off;
        self.off += n;
        Ok(&self.mmap[start..start + n])
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a u32 at the cursor without consuming it.
    pub(crate) fn peek_u32(&self) -> Result<u32> {
        let off = self.off;
        self.u32_at(off as u64)
    }

    /// Bounds-checked u32 load at an absolute offset.
    pub(crate) fn u32_at(&self, off: u64) -> Result<u32> {
        let off = off as usize;
        if self.mmap.len() < off + 4 {
            return Err(GgufError::Invalid(format!(
                "truncated file: u32 at offset {} is past the end",
                off
            )));
        }
        Ok(u32::from_le_bytes(self.mmap[off..off + 4].try_into().unwrap()))
    }

    /// Bounds-checked u64 load at an absolute offset.
    pub(crate) fn u64_at(&self, off: u64) -> Result<u64> {
        let off = off as usize;
        if self.mmap.len() < off + 8 {
            return Err(GgufError::Invalid(format!(
                "truncated file: u64 at offset {} is past the end",
                off
            )));
        }
        Ok(u64::from_le_bytes(self.mmap[off..off + 8].try_into().unwrap()))
    }

    /// Read a GGUF string (u64 length + raw bytes) into an owned `String`.
    pub(crate) fn read_string(&mut self) -> Result<String> {
        let len = self.read_u64()? as usize;
        let bytes = self.take(len)?.to_vec();
        String::from_utf8(bytes)
            .map_err(|_| GgufError::Invalid("string is not valid UTF-8".into()))
    }

    /// Read a GGUF string as a borrowed slice of the mapping.
    pub(crate) fn read_str(&mut self) -> Result<&str> {
        let len = self.read_u64()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map_err(|_| GgufError::Invalid("string is not valid UTF-8".into()))
    }

    /// Append raw bytes at the current end of the file.
    pub(crate) fn write_at_end(&mut self, buf: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::End(0))
            .and_then(|_| self.file.write_all(buf))
            .map_err(|e| GgufError::io(&self.path, e))
    }

    /// Overwrite one u64 header field in place.
    pub(crate) fn write_header_u64(&mut self, field_offset: u64, value: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(field_offset))
            .and_then(|_| self.file.write_all(&value.to_le_bytes()))
            .map_err(|e| GgufError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_padding() {
        assert_eq!(alignment_padding(32, 0), 0);
        assert_eq!(alignment_padding(32, 1), 31);
        assert_eq!(alignment_padding(32, 32), 0);
        assert_eq!(alignment_padding(32, 33), 31);
        assert_eq!(alignment_padding(64, 24), 40);
    }

    #[test]
    fn test_create_then_open_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.gguf");
        GgufFile::create(&path, true).unwrap();

        let session = GgufFile::open(&path, OpenMode::Read).unwrap();
        assert_eq!(session.version(), 3);
        assert_eq!(session.tensor_count(), 0);
        assert_eq!(session.metadata_kv_count(), 0);
        assert_eq!(session.file_size(), 24);
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.gguf");
        GgufFile::create(&path, false).unwrap();
        let err = GgufFile::create(&path, false).unwrap_err();
        assert!(matches!(err, GgufError::Exists(_)));
        // With overwrite the second create truncates and succeeds.
        GgufFile::create(&path, true).unwrap();
    }

    #[test]
    fn test_open_short_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.gguf");
        std::fs::write(&path, b"GGUF").unwrap();
        let err = GgufFile::open(&path, OpenMode::Read).unwrap_err();
        assert!(matches!(err, GgufError::Invalid(_)));
    }

    #[test]
    fn test_open_bad_magic_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.gguf");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&[0u8; 24]).unwrap();
        drop(f);
        let err = GgufFile::open(&path, OpenMode::Read).unwrap_err();
        assert!(matches!(err, GgufError::Invalid(_)));
    }

    #[test]
    fn test_open_missing_file_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.gguf");
        let err = GgufFile::open(&path, OpenMode::Read).unwrap_err();
        assert!(matches!(err, GgufError::Io { .. }));
    }
}
