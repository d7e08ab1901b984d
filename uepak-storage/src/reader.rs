//! Little-endian binary readers over buffers and container files.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{ReadBytesExt, LE};
use memmap2::Mmap;
use parking_lot::Mutex;
use tracing::debug;
use uepak_crypto::Guid;

use crate::error::{ArchiveError, Result};

/// Bounds-checked cursor over an in-memory buffer.
///
/// Every primitive is strictly little-endian; signed reads are
/// two's-complement. Out-of-bounds access fails fast with
/// [`ArchiveError::ShortRead`] carrying the cursor offset — no partial
/// reads are ever surfaced.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Wrap a buffer with the cursor at offset 0.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read exactly `n` bytes, advancing the cursor.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ArchiveError::ShortRead {
                offset: self.pos as u64,
                want: n as u64,
                got: self.remaining() as u64,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Advance the cursor by `n` bytes without looking at them.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut slice = self.read_bytes(2)?;
        Ok(slice.read_u16::<LE>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut slice = self.read_bytes(4)?;
        Ok(slice.read_u32::<LE>()?)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut slice = self.read_bytes(8)?;
        Ok(slice.read_u64::<LE>()?)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let mut slice = self.read_bytes(4)?;
        Ok(slice.read_i32::<LE>()?)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let mut slice = self.read_bytes(8)?;
        Ok(slice.read_i64::<LE>()?)
    }

    /// Read a 40-bit little-endian integer zero-extended to 64 bits.
    pub fn read_u40(&mut self) -> Result<u64> {
        let b = self.read_bytes(5)?;
        Ok(u64::from(b[0])
            | u64::from(b[1]) << 8
            | u64::from(b[2]) << 16
            | u64::from(b[3]) << 24
            | u64::from(b[4]) << 32)
    }

    /// Read a 16-byte GUID (`u32 | u16 | u16 | u8[8]`, little-endian
    /// integer fields).
    pub fn read_guid(&mut self) -> Result<Guid> {
        let bytes = self.read_bytes(16)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(bytes);
        Ok(Guid::from_bytes(&arr))
    }

    /// Read an Unreal length-prefixed string.
    ///
    /// The i32 prefix counts characters including the terminating NUL;
    /// positive means UTF-8 bytes, negative means UTF-16LE code units.
    pub fn read_unreal_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len == 0 {
            return Ok(String::new());
        }
        if len > 0 {
            let bytes = self.read_bytes(len as usize)?;
            let text = &bytes[..bytes.len() - 1];
            String::from_utf8(text.to_vec())
                .map_err(|_| ArchiveError::corrupt("string is not valid UTF-8"))
        } else {
            let units = (-(len as i64)) as usize;
            let bytes = self.read_bytes(units * 2)?;
            let mut code_units = Vec::with_capacity(units - 1);
            for pair in bytes.chunks_exact(2).take(units - 1) {
                code_units.push(u16::from_le_bytes([pair[0], pair[1]]));
            }
            String::from_utf16(&code_units)
                .map_err(|_| ArchiveError::corrupt("string is not valid UTF-16"))
        }
    }
}

#[derive(Debug)]
enum Backend {
    Mmap(Mmap),
    File(Mutex<File>),
    Memory(Vec<u8>),
}

/// Read-only random access over a container file.
///
/// Memory-maps the file when possible and falls back to a lock-guarded
/// positional reader otherwise, so concurrent `read_at` calls on a
/// shared handle are always safe. A `Memory` variant backs tests and
/// whole-file loads.
#[derive(Debug)]
pub struct ContainerFile {
    backend: Backend,
    len: u64,
    reads: AtomicU64,
}

impl ContainerFile {
    /// Open a file for random access.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        // SAFETY: the mapping is read-only and the archive contract is
        // that container files do not change while open.
        #[allow(unsafe_code)]
        let backend = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => {
                debug!("Memory-mapped {:?} ({} bytes)", path, len);
                Backend::Mmap(mmap)
            }
            Err(e) => {
                debug!("mmap of {:?} failed ({e}), using positional reads", path);
                Backend::File(Mutex::new(file))
            }
        };

        Ok(Self {
            backend,
            len,
            reads: AtomicU64::new(0),
        })
    }

    /// Wrap an in-memory buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        Self {
            backend: Backend::Memory(data),
            len,
            reads: AtomicU64::new(0),
        }
    }

    /// File length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of `read_at` calls served so far.
    pub fn read_ops(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Read exactly `len` bytes at `offset` into a fresh buffer.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| ArchiveError::corrupt("read range overflows u64"))?;
        if end > self.len {
            return Err(ArchiveError::ShortRead {
                offset,
                want: len as u64,
                got: self.len.saturating_sub(offset),
            });
        }

        self.reads.fetch_add(1, Ordering::Relaxed);

        match &self.backend {
            Backend::Mmap(mmap) => Ok(mmap[offset as usize..end as usize].to_vec()),
            Backend::Memory(data) => Ok(data[offset as usize..end as usize].to_vec()),
            Backend::File(file) => {
                let mut guard = file.lock();
                guard.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; len];
                guard.read_exact(&mut buf)?;
                Ok(buf)
            }
        }
    }
}
