//! Trailing checksum and size verification.

use std::io;
use std::io::Read;

use flate2::Crc;

use crate::ArchiveError;
use crate::error::Mismatch;
use crate::recipe::Verification;

/// Passes bytes through unchanged while accumulating a CRC-32 and a byte
/// count. When the inner reader reports end of stream, the accumulated
/// values are compared with the stored ones and a mismatch is returned in
/// place of the end of stream.
pub(crate) struct VerifyReader<R> {
    inner: R,
    expected: Verification,
    entry: String,
    crc: Crc,
    count: u64,
    checked: bool,
}

impl<R: Read> VerifyReader<R> {
    pub(crate) fn new(inner: R, expected: Verification, entry: String) -> Self {
        Self {
            inner,
            expected,
            entry,
            crc: Crc::new(),
            count: 0,
            checked: false,
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.checked {
            return Ok(());
        }
        self.checked = true;

        if let Some(expected) = self.expected.size
            && expected != self.count
        {
            return Err(self.mismatch(Mismatch::Size {
                expected,
                actual: self.count,
            }));
        }
        if let Some(expected) = self.expected.crc32 {
            let actual = self.crc.sum();
            if actual != expected {
                return Err(self.mismatch(Mismatch::Crc32 { expected, actual }));
            }
        }
        Ok(())
    }

    fn mismatch(&self, mismatch: Mismatch) -> io::Error {
        ArchiveError::IntegrityMismatch {
            entry: self.entry.clone(),
            mismatch,
        }
        .into_io()
    }
}

impl<R: Read> Read for VerifyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.finish()?;
            return Ok(0);
        }
        self.crc.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn crc_of(data: &[u8]) -> u32 {
        let mut crc = Crc::new();
        crc.update(data);
        crc.sum()
    }

    fn verify(data: &[u8], expected: Verification) -> Result<Vec<u8>, ArchiveError> {
        let mut reader = VerifyReader::new(data, expected, "e".into());
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_matching_content() {
        let expected = Verification {
            crc32: Some(crc_of(b"hello world")),
            size: Some(11),
        };
        assert_eq!(verify(b"hello world", expected).unwrap(), b"hello world");
    }

    #[test]
    fn test_crc_mismatch() {
        let expected = Verification {
            crc32: Some(crc_of(b"hello world")),
            size: None,
        };
        let err = verify(b"hello worle", expected).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::IntegrityMismatch {
                mismatch: Mismatch::Crc32 { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_size_mismatch() {
        let expected = Verification {
            crc32: None,
            size: Some(12),
        };
        let err = verify(b"hello world", expected).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::IntegrityMismatch {
                mismatch: Mismatch::Size {
                    expected: 12,
                    actual: 11
                },
                ..
            }
        ));
    }

    #[test]
    fn test_bytes_before_mismatch_are_delivered() {
        let expected = Verification {
            crc32: Some(0),
            size: None,
        };
        let mut reader = VerifyReader::new(&b"abc"[..], expected, "e".into());
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert!(reader.read(&mut buf).is_err());
    }
}
