//! Sequential reads over a window of a [`ByteSource`].

use std::io;
use std::io::Read;
use std::sync::Arc;

use super::ByteSource;
use crate::ArchiveError;

/// `std::io::Read` adapter over `[offset, offset + length)` of a byte source.
///
/// Each reader keeps its own cursor, so many readers can share one source.
/// When `length` is known and the source ends early, reading fails with a
/// `CorruptArchive` error instead of reporting a clean end of stream.
pub struct SourceReader {
    source: Arc<dyn ByteSource>,
    position: u64,
    remaining: Option<u64>,
}

impl SourceReader {
    /// Creates a reader starting at `offset`, bounded by `length` if given.
    pub fn new(source: Arc<dyn ByteSource>, offset: u64, length: Option<u64>) -> Self {
        Self {
            source,
            position: offset,
            remaining: length,
        }
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = match self.remaining {
            Some(0) => return Ok(0),
            Some(remaining) => buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX)),
            None => buf.len(),
        };
        if want == 0 {
            return Ok(0);
        }

        // Tag source failures so decoder layers do not mistake them for
        // corrupt data.
        let n = self
            .source
            .read_at(self.position, &mut buf[..want])
            .map_err(tag_source_error)?;
        if n == 0 {
            if let Some(remaining) = self.remaining {
                return Err(ArchiveError::corrupt(format!(
                    "data truncated: {remaining} bytes missing at offset {}",
                    self.position
                ))
                .into_io());
            }
            return Ok(0);
        }

        self.position += n as u64;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= n as u64;
        }
        Ok(n)
    }
}

fn tag_source_error(e: io::Error) -> io::Error {
    let tagged = e
        .get_ref()
        .is_some_and(|inner| inner.is::<ArchiveError>());
    if tagged || e.kind() == io::ErrorKind::Interrupted {
        e
    } else {
        io::Error::other(ArchiveError::Io(e))
    }
}
