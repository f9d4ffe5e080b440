//! Positional byte sources.
//!
//! A [`ByteSource`] is the only way the engine reads archive bytes. It is
//! addressed by absolute offset, so detection and parsing never move a
//! shared cursor and any number of reads can be replayed.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Random-access provider of archive bytes.
///
/// Implementations must tolerate reads at any offset. A read at or past the
/// end returns `Ok(0)`. Sources whose total size is not known report `None`
/// from [`size`](ByteSource::size).
///
/// The engine only reads through `&self`. When an implementation wraps a
/// handle that cannot serve concurrent positional reads, it must serialize
/// access internally or the caller must give each parse or decode operation
/// its own source.
pub trait ByteSource: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total size in bytes, if known.
    fn size(&self) -> Option<u64>;

    /// Name hint (usually a file name) used for volume lookup and for naming
    /// the payload of single-stream formats.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Returns `true` if reads far from the previous one are expensive,
    /// as with decoded content that can only be produced front to back.
    /// Detection skips structural probes that read the tail of such sources.
    fn is_sequential(&self) -> bool {
        false
    }
}

impl<T: ByteSource + ?Sized> ByteSource for Arc<T> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> Option<u64> {
        (**self).size()
    }

    fn name(&self) -> Option<&str> {
        (**self).name()
    }

    fn is_sequential(&self) -> bool {
        (**self).is_sequential()
    }
}

/// Fills `buf` completely from `offset`, failing with `UnexpectedEof` if the
/// source ends first.
pub fn read_exact_at(source: &dyn ByteSource, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match source.read_at(offset, buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended before offset {}", offset + buf.len() as u64),
                ));
            }
            Ok(n) => {
                offset += n as u64;
                buf = &mut buf[n..];
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Reads at most `len` bytes from `offset`, stopping early at end of source.
pub fn read_up_to(source: &dyn ByteSource, mut offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match source.read_at(offset, &mut out[filled..]) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    out.truncate(filled);
    Ok(out)
}

/// Returns the size of `source`, reading it to the end when it does not
/// report one.
pub fn measured_size(source: &dyn ByteSource) -> io::Result<u64> {
    if let Some(size) = source.size() {
        return Ok(size);
    }
    let mut buf = vec![0u8; 64 * 1024];
    let mut offset = 0u64;
    loop {
        match source.read_at(offset, &mut buf) {
            Ok(0) => return Ok(offset),
            Ok(n) => offset += n as u64,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// Byte source backed by a file on disk.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    size: u64,
    name: Option<String>,
    #[cfg(not(any(unix, windows)))]
    lock: std::sync::Mutex<()>,
}

impl FileSource {
    /// Opens `path` for positional reads. The file name becomes the name hint.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Ok(Self {
            file,
            size,
            name,
            #[cfg(not(any(unix, windows)))]
            lock: std::sync::Mutex::new(()),
        })
    }
}

impl ByteSource for FileSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, offset)
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            self.file.seek_read(buf, offset)
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let _guard = self
                .lock
                .lock()
                .map_err(|_| io::Error::other("file source lock poisoned"))?;
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            file.read(buf)
        }
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Byte source over an in-memory buffer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
    name: Option<String>,
}

impl MemorySource {
    /// Wraps `data` without a name hint.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            name: None,
        }
    }

    /// Wraps `data` with a name hint.
    pub fn with_name(data: impl Into<Arc<[u8]>>, name: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            name: Some(name.into()),
        }
    }

    /// The underlying bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_source_reads() {
        let source = MemorySource::new(b"hello world".to_vec());
        let mut buf = [0u8; 5];
        assert_eq!(source.read_at(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(source.read_at(11, &mut buf).unwrap(), 0);
        assert_eq!(source.read_at(u64::MAX, &mut buf).unwrap(), 0);
        assert_eq!(source.size(), Some(11));
    }

    #[test]
    fn test_memory_source_short_read() {
        let source = MemorySource::new(b"abc".to_vec());
        let mut buf = [0u8; 8];
        assert_eq!(source.read_at(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
    }

    #[test]
    fn test_read_exact_at_eof() {
        let source = MemorySource::new(b"abc".to_vec());
        let mut buf = [0u8; 4];
        let err = read_exact_at(&source, 0, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_up_to_truncates() {
        let source = MemorySource::new(b"abcdef".to_vec());
        assert_eq!(read_up_to(&source, 4, 10).unwrap(), b"ef");
        assert!(read_up_to(&source, 10, 10).unwrap().is_empty());
    }

    #[test]
    fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        file.flush().unwrap();

        let source = FileSource::open(file.path()).unwrap();
        assert_eq!(source.size(), Some(10));
        assert!(source.name().is_some());

        let mut buf = [0u8; 3];
        read_exact_at(&source, 7, &mut buf).unwrap();
        assert_eq!(&buf, b"789");
        assert_eq!(source.read_at(10, &mut buf).unwrap(), 0);
    }

    struct Unsized(MemorySource);

    impl ByteSource for Unsized {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read_at(offset, buf)
        }

        fn size(&self) -> Option<u64> {
            None
        }
    }

    #[test]
    fn test_measured_size() {
        let source = Unsized(MemorySource::new(vec![7u8; 100_000]));
        assert_eq!(measured_size(&source).unwrap(), 100_000);
        assert_eq!(measured_size(&MemorySource::new(b"abc".to_vec())).unwrap(), 3);
        assert!(!source.is_sequential());
    }

    #[test]
    fn test_arc_source_delegates() {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::with_name(b"xy".to_vec(), "n.gz"));
        assert_eq!(source.size(), Some(2));
        assert_eq!(ByteSource::name(&source), Some("n.gz"));
    }
}
