//! Multi-volume support.
//!
//! A segmented archive is split across several physical sources. Parsers
//! ask a [`VolumeProvider`] for the other segments by name and join them
//! with a [`SpannedSource`], which presents the concatenation as one
//! logical byte source.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::ArchiveError;
use crate::Result;
use crate::io::ByteSource;
use crate::io::FileSource;

/// Resolves sibling volumes of a segmented archive by name.
pub trait VolumeProvider: Send + Sync {
    /// Returns the volume called `name` (a bare file name such as
    /// `"backup.z01"`), or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the volume exists but cannot be opened.
    fn volume(&self, name: &str) -> Result<Option<Arc<dyn ByteSource>>>;
}

/// Volumes held in memory, keyed by name.
#[derive(Default, Clone)]
pub struct MemoryVolumes {
    volumes: HashMap<String, Arc<dyn ByteSource>>,
}

impl MemoryVolumes {
    /// An empty set of volumes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the volume called `name`.
    pub fn insert(&mut self, name: impl Into<String>, source: Arc<dyn ByteSource>) -> &mut Self {
        self.volumes.insert(name.into(), source);
        self
    }

    /// Number of volumes.
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Returns `true` if there are no volumes.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

impl VolumeProvider for MemoryVolumes {
    fn volume(&self, name: &str) -> Result<Option<Arc<dyn ByteSource>>> {
        Ok(self.volumes.get(name).cloned())
    }
}

/// Volumes stored as files in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryVolumes {
    dir: PathBuf,
}

impl DirectoryVolumes {
    /// Looks volumes up in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Uses the directory containing `path`.
    pub fn beside(path: &Path) -> Self {
        Self::new(path.parent().unwrap_or_else(|| Path::new(".")))
    }

    /// The directory searched.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl VolumeProvider for DirectoryVolumes {
    fn volume(&self, name: &str) -> Result<Option<Arc<dyn ByteSource>>> {
        // names come from archive metadata; never leave the directory
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Ok(None);
        }
        match FileSource::open(&self.dir.join(name)) {
            Ok(source) => Ok(Some(Arc::new(source))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArchiveError::Io(e)),
        }
    }
}

/// Several sources read back to back as one.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use decant_core::io::{read_up_to, ByteSource, MemorySource};
/// use decant_core::volume::SpannedSource;
///
/// # fn main() -> decant_core::Result<()> {
/// let spanned = SpannedSource::new(vec![
///     Arc::new(MemorySource::new(b"hello ".to_vec())) as Arc<dyn ByteSource>,
///     Arc::new(MemorySource::new(b"world".to_vec())),
/// ])?;
/// assert_eq!(spanned.size(), Some(11));
/// assert_eq!(read_up_to(&spanned, 4, 4)?, b"o wo");
/// assert_eq!(spanned.logical_offset(1, 2), Some(8));
/// # Ok(())
/// # }
/// ```
pub struct SpannedSource {
    segments: Vec<Arc<dyn ByteSource>>,
    starts: Vec<u64>,
    total: u64,
}

impl SpannedSource {
    /// Joins `segments` in order.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFeature` if a segment does not know its size,
    /// since segment boundaries could not be located.
    pub fn new(segments: Vec<Arc<dyn ByteSource>>) -> Result<Self> {
        let mut starts = Vec::with_capacity(segments.len());
        let mut total: u64 = 0;
        for segment in &segments {
            starts.push(total);
            let size = segment
                .size()
                .ok_or_else(|| ArchiveError::unsupported("volume of unknown size"))?;
            total = total
                .checked_add(size)
                .ok_or_else(|| ArchiveError::corrupt("combined volume size overflows"))?;
        }
        Ok(Self {
            segments,
            starts,
            total,
        })
    }

    /// Number of joined segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Maps an offset inside segment `disk` to the joined offset.
    pub fn logical_offset(&self, disk: usize, local: u64) -> Option<u64> {
        let start = *self.starts.get(disk)?;
        let size = self.segments[disk].size()?;
        (local <= size).then(|| start + local)
    }
}

impl ByteSource for SpannedSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.total || buf.is_empty() {
            return Ok(0);
        }
        // last segment starting at or before `offset`; empty segments are
        // skipped because a later one shares their start
        let index = self.starts.partition_point(|&start| start <= offset) - 1;
        let local = offset - self.starts[index];
        self.segments[index].read_at(local, buf)
    }

    fn size(&self) -> Option<u64> {
        Some(self.total)
    }

    fn name(&self) -> Option<&str> {
        self.segments.last().and_then(|s| s.name())
    }
}
