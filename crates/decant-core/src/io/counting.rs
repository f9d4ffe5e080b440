//! Counting reader for tracking bytes consumed.
//!
//! This module provides a `CountingReader` that wraps any `Read`
//! implementation and tracks the total number of bytes read through it.

use std::io::Read;

/// Wrapper reader that tracks total bytes read.
///
/// Verification wraps each decode session in this reader to learn how many
/// content bytes an entry produced before it finished or failed.
///
/// # Examples
///
/// ```
/// use decant_core::io::CountingReader;
/// use std::io::Read;
///
/// let mut reader = CountingReader::new(&b"Hello, World!"[..]);
/// let mut buf = [0u8; 5];
/// reader.read_exact(&mut buf)?;
///
/// assert_eq!(reader.total_bytes(), 5);
/// assert_eq!(&buf, b"Hello");
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct CountingReader<R> {
    /// Inner reader being wrapped
    inner: R,
    /// Total bytes successfully read
    bytes_read: u64,
}

impl<R> CountingReader<R> {
    /// Creates a new counting reader.
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
        }
    }

    /// Returns the total number of bytes successfully read.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.bytes_read
    }

    /// Consumes the counting reader and returns the inner reader.
    #[must_use]
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Returns a reference to the inner reader.
    #[must_use]
    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes = self.inner.read(buf)?;
        self.bytes_read += bytes as u64;
        Ok(bytes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_reader_basic() {
        let mut reader = CountingReader::new(&b"Hello, World!"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(reader.total_bytes(), 13);
        assert_eq!(out, b"Hello, World!");
    }

    #[test]
    fn test_counting_reader_empty() {
        let reader = CountingReader::new(&b""[..]);
        assert_eq!(reader.total_bytes(), 0);
    }

    #[test]
    fn test_counting_reader_partial_read() {
        // Reader that hands out at most 3 bytes per call
        struct LimitedReader {
            data: Vec<u8>,
            pos: usize,
        }

        impl Read for LimitedReader {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let n = buf.len().min(3).min(self.data.len() - self.pos);
                buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
                self.pos += n;
                Ok(n)
            }
        }

        let limited = LimitedReader {
            data: b"hello".to_vec(),
            pos: 0,
        };
        let mut reader = CountingReader::new(limited);

        let mut buf = [0u8; 5];
        let read = reader.read(&mut buf).unwrap();
        assert_eq!(read, 3);
        assert_eq!(reader.total_bytes(), 3);
        assert_eq!(reader.get_ref().pos, 3);
    }

    #[test]
    fn test_counting_reader_into_inner() {
        let mut reader = CountingReader::new(std::io::Cursor::new(b"abc".to_vec()));
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).unwrap();
        let cursor = reader.into_inner();
        assert_eq!(cursor.position(), 2);
    }
}
