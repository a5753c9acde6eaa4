// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    cmp::Ordering,
    fmt,
    fs::OpenOptions,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use enum_dispatch::enum_dispatch;
use memmap2::{Mmap, MmapMut};
use tracing::debug;

use crate::core::{
    errors::{Error, Result},
    unique_hash::{BLOB_AS_FILE, BLOB_INLINE, TAG_BLOB, UniqueHasher, UpdateUniqueHash},
};

/// Something that keeps a blob's bytes alive and address-stable for as long
/// as the blob is reachable.
#[enum_dispatch]
pub trait BlobOwnerIntf {
    /// The full byte region this owner backs.
    fn region(&self) -> &[u8];

    /// The path of the backing file, for file-backed owners.
    fn mapped_file(&self) -> Option<&Path>;
}

/// Owner over a heap byte buffer.
#[derive(Clone, Debug)]
pub struct ByteVectorOwner {
    data: Bytes,
}

impl BlobOwnerIntf for ByteVectorOwner {
    fn region(&self) -> &[u8] {
        &self.data
    }

    fn mapped_file(&self) -> Option<&Path> {
        None
    }
}

/// Owner over a heap string.
#[derive(Clone, Debug)]
pub struct StringOwner {
    data: Arc<String>,
}

impl BlobOwnerIntf for StringOwner {
    fn region(&self) -> &[u8] {
        self.data.as_bytes()
    }

    fn mapped_file(&self) -> Option<&Path> {
        None
    }
}

/// Owner over a static region; dropping it is a no-op.
#[derive(Clone, Debug)]
pub struct StaticRegionOwner {
    data: &'static [u8],
}

impl BlobOwnerIntf for StaticRegionOwner {
    fn region(&self) -> &[u8] {
        self.data
    }

    fn mapped_file(&self) -> Option<&Path> {
        None
    }
}

/// A read-only memory mapping of a blob file. Shared by reader and
/// completed-writer owners.
#[derive(Debug)]
pub struct MappedBlobFile {
    path: PathBuf,
    map: Mmap,
}

/// Owner created by opening an existing blob file.
#[derive(Clone, Debug)]
pub struct BlobFileReaderOwner {
    inner: Arc<MappedBlobFile>,
}

impl BlobOwnerIntf for BlobFileReaderOwner {
    fn region(&self) -> &[u8] {
        &self.inner.map
    }

    fn mapped_file(&self) -> Option<&Path> {
        Some(&self.inner.path)
    }
}

/// Owner left behind by a completed [`BlobFileWriter`].
#[derive(Clone, Debug)]
pub struct BlobFileWriterOwner {
    inner: Arc<MappedBlobFile>,
}

impl BlobOwnerIntf for BlobFileWriterOwner {
    fn region(&self) -> &[u8] {
        &self.inner.map
    }

    fn mapped_file(&self) -> Option<&Path> {
        Some(&self.inner.path)
    }
}

/// The polymorphic ownership handle inside a [`Blob`].
#[enum_dispatch(BlobOwnerIntf)]
#[derive(Clone, Debug)]
pub enum BlobOwner {
    ByteVector(ByteVectorOwner),
    Str(StringOwner),
    StaticRegion(StaticRegionOwner),
    FileReader(BlobFileReaderOwner),
    FileWriter(BlobFileWriterOwner),
}

/// A byte sequence with pluggable ownership.
///
/// Blobs compare by length and bytewise content, never by owner identity.
/// File-backed blobs serialize by (path, offset) rather than by contents.
#[derive(Clone, Debug)]
pub struct Blob {
    owner: BlobOwner,
    offset: usize,
    size: usize,
}

impl Blob {
    /// Moves a byte vector into a heap owner.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = data.len();
        Self {
            owner: BlobOwner::ByteVector(ByteVectorOwner { data }),
            offset: 0,
            size,
        }
    }

    /// Moves a string into a heap owner without copying its contents.
    pub fn from_string(s: String) -> Self {
        let size = s.len();
        Self {
            owner: BlobOwner::Str(StringOwner { data: Arc::new(s) }),
            offset: 0,
            size,
        }
    }

    /// Zero-copy blob over a static region.
    pub fn from_static(data: &'static [u8]) -> Self {
        Self {
            owner: BlobOwner::StaticRegion(StaticRegionOwner { data }),
            offset: 0,
            size: data.len(),
        }
    }

    /// Maps an existing blob file read-only, viewing it from `offset` to the
    /// end of the file.
    pub fn open_file_at(path: impl Into<PathBuf>, offset: u64) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().read(true).open(&path)?;
        // SAFETY: the mapping is read-only and blob files are never modified
        // after their writer has completed.
        let map = unsafe { Mmap::map(&file)? };
        let total = map.len();
        let offset = usize::try_from(offset)
            .map_err(|_| Error::Io(format!("blob offset out of range: {offset}")))?;
        if offset > total {
            return Err(Error::Io(format!(
                "blob offset {offset} beyond file size {total} in {}",
                path.display()
            )));
        }
        debug!("mapped blob file {} ({} bytes)", path.display(), total);
        Ok(Self {
            owner: BlobOwner::FileReader(BlobFileReaderOwner {
                inner: Arc::new(MappedBlobFile { path, map }),
            }),
            offset,
            size: total - offset,
        })
    }

    pub fn open_file(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_file_at(path, 0)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.owner.region()[self.offset..self.offset + self.size]
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// For file-backed blobs, the (path, offset) pair they serialize as.
    pub fn mapped_file(&self) -> Option<(&Path, u64)> {
        self.owner.mapped_file().map(|p| (p, self.offset as u64))
    }
}

impl Default for Blob {
    fn default() -> Self {
        Self::from_static(&[])
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Blob {}

impl PartialOrd for Blob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Blob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Length first, contents only between equal-length blobs.
        self.size
            .cmp(&other.size)
            .then_with(|| self.as_slice().cmp(other.as_slice()))
    }
}

impl Hash for Blob {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl UpdateUniqueHash for Blob {
    fn update_unique_hash(&self, hasher: &mut UniqueHasher) {
        hasher.encode_type_tag(TAG_BLOB);
        // Provenance byte keeps inline and file-backed blobs from colliding.
        match self.mapped_file() {
            Some((path, offset)) => {
                hasher.encode_type_tag(BLOB_AS_FILE);
                hasher.encode_bytes(path.to_string_lossy().as_bytes());
                hasher.encode_bytes(&offset.to_le_bytes());
            }
            None => {
                hasher.encode_type_tag(BLOB_INLINE);
                hasher.encode_bytes(self.as_slice());
            }
        }
    }
}

// Decides whether a blob renders as text in the summary format.
fn is_printable(bytes: &[u8]) -> bool {
    bytes.len() <= 1024 && bytes.iter().all(|&b| b.is_ascii() && !b.is_ascii_control())
}

fn write_hex_range(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for (i, b) in bytes.iter().enumerate() {
        if i != 0 {
            write!(f, " ")?;
        }
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.as_slice();
        if bytes.len() == 1 {
            write!(f, "1-byte blob")?;
        } else {
            write!(f, "{}-bytes blob", bytes.len())?;
        }
        if bytes.is_empty() {
            return Ok(());
        }
        write!(f, ": ")?;
        if is_printable(bytes) {
            f.write_str(&String::from_utf8_lossy(bytes))
        } else if bytes.len() <= 20 {
            write_hex_range(f, bytes)
        } else {
            write_hex_range(f, &bytes[..15])?;
            write!(f, " ... ")?;
            write_hex_range(f, &bytes[bytes.len() - 4..])
        }
    }
}

/// Writable memory mapping of a fresh blob file.
///
/// The writer fills the region, then calls [`BlobFileWriter::on_write_completed`]
/// which flushes the mapping and freezes it into an immutable blob. The bytes
/// must not change afterwards; the type system enforces this by consuming the
/// writer.
#[derive(Debug)]
pub struct BlobFileWriter {
    path: PathBuf,
    map: MmapMut,
}

impl BlobFileWriter {
    /// Creates `path` with the given size and maps it read-write.
    pub fn create(path: impl Into<PathBuf>, size: usize) -> Result<Self> {
        let path = path.into();
        debug!("creating blob file {} ({} bytes)", path.display(), size);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size as u64)?;
        // SAFETY: the file was just created and is exclusively owned by this
        // writer until the mapping is frozen.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { path, map })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Flushes the mapping and freezes the file into an immutable blob.
    pub fn on_write_completed(self) -> Result<Blob> {
        self.map.flush()?;
        let map = self.map.make_read_only()?;
        let size = map.len();
        Ok(Blob {
            owner: BlobOwner::FileWriter(BlobFileWriterOwner {
                inner: Arc::new(MappedBlobFile {
                    path: self.path,
                    map,
                }),
            }),
            offset: 0,
            size,
        })
    }
}
