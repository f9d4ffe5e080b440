//! Gzip member framing.
//!
//! A gzip file is a sequence of members, each a header, a raw deflate
//! stream and an 8-byte trailer (CRC-32 and size modulo 2^32). Members are
//! inflated one after the other and every trailer is checked.

use std::io;
use std::io::BufRead;
use std::io::Read;

use flate2::Crc;
use flate2::bufread::DeflateDecoder;

use crate::ArchiveError;
use crate::error::Mismatch;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const RESERVED: u8 = 0xE0;

/// Fixed part of a member header.
pub const GZIP_HEADER_LEN: u64 = 10;

/// Fields of a gzip member header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GzipHeader {
    /// Modification time in Unix seconds, 0 if not recorded.
    pub mtime: u32,
    /// Original file name (ISO 8859-1).
    pub name: Option<String>,
    /// Free-form comment (ISO 8859-1).
    pub comment: Option<String>,
    /// Originating operating system code.
    pub os: u8,
    /// Total header length in bytes.
    pub len: u64,
}

fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

fn read_zero_terminated<R: Read>(reader: &mut R, limit: u64, len: &mut u64) -> io::Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = read_u8(reader)?;
        *len += 1;
        if byte == 0 {
            break;
        }
        if *len > limit {
            return Err(ArchiveError::corrupt("gzip header exceeds size limit").into_io());
        }
        bytes.push(byte);
    }
    // ISO 8859-1 maps one-to-one onto the first 256 code points
    Ok(bytes.into_iter().map(char::from).collect())
}

/// Parses a member header, reading at most `limit` bytes.
///
/// # Errors
///
/// Returns `CorruptArchive` (wrapped in `io::Error`) for a bad magic,
/// method or flag byte, or a header longer than `limit`.
pub fn read_gzip_header<R: Read>(reader: &mut R, limit: u64) -> io::Result<GzipHeader> {
    let mut fixed = [0u8; GZIP_HEADER_LEN as usize];
    reader.read_exact(&mut fixed).map_err(|e| truncated(e, "gzip header"))?;
    if fixed[0] != 0x1F || fixed[1] != 0x8B {
        return Err(ArchiveError::corrupt("bad gzip magic").into_io());
    }
    if fixed[2] != 8 {
        return Err(ArchiveError::unsupported(format!("gzip method {}", fixed[2])).into_io());
    }
    let flags = fixed[3];
    if flags & RESERVED != 0 {
        return Err(ArchiveError::corrupt("reserved gzip flags set").into_io());
    }

    let mut header = GzipHeader {
        mtime: u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]),
        os: fixed[9],
        len: GZIP_HEADER_LEN,
        ..GzipHeader::default()
    };

    if flags & FEXTRA != 0 {
        let mut xlen = [0u8; 2];
        reader.read_exact(&mut xlen).map_err(|e| truncated(e, "gzip extra field"))?;
        let xlen = u64::from(u16::from_le_bytes(xlen));
        header.len += 2 + xlen;
        if header.len > limit {
            return Err(ArchiveError::corrupt("gzip header exceeds size limit").into_io());
        }
        let skipped = io::copy(&mut reader.by_ref().take(xlen), &mut io::sink())?;
        if skipped != xlen {
            return Err(ArchiveError::corrupt("gzip extra field truncated").into_io());
        }
    }
    if flags & FNAME != 0 {
        header.name = Some(
            read_zero_terminated(reader, limit, &mut header.len)
                .map_err(|e| truncated(e, "gzip file name"))?,
        );
    }
    if flags & FCOMMENT != 0 {
        header.comment = Some(
            read_zero_terminated(reader, limit, &mut header.len)
                .map_err(|e| truncated(e, "gzip comment"))?,
        );
    }
    if flags & FHCRC != 0 {
        let mut crc16 = [0u8; 2];
        reader.read_exact(&mut crc16).map_err(|e| truncated(e, "gzip header"))?;
        header.len += 2;
    }
    Ok(header)
}

fn truncated(e: io::Error, what: &str) -> io::Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ArchiveError::corrupt(format!("{what} truncated")).into_io()
    } else {
        e
    }
}

/// Inflates every member of a gzip stream and verifies its trailer.
///
/// Bytes after the last member that do not start a new member are
/// ignored, as gzip(1) does with trailing padding.
pub(crate) struct GzipMembers<R: BufRead> {
    idle: Option<R>,
    body: Option<DeflateDecoder<R>>,
    crc: Crc,
    size: u64,
    members: usize,
    entry: String,
    header_limit: u64,
}

impl<R: BufRead> GzipMembers<R> {
    pub(crate) fn new(inner: R, entry: String, header_limit: u64) -> Self {
        Self {
            idle: Some(inner),
            body: None,
            crc: Crc::new(),
            size: 0,
            members: 0,
            entry,
            header_limit,
        }
    }

    fn finish_member(&mut self, mut input: R) -> io::Result<R> {
        let mut trailer = [0u8; 8];
        input
            .read_exact(&mut trailer)
            .map_err(|e| truncated(e, "gzip trailer"))?;
        let expected_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let expected_size = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);

        let actual_crc = self.crc.sum();
        if actual_crc != expected_crc {
            return Err(self.mismatch(Mismatch::Crc32 {
                expected: expected_crc,
                actual: actual_crc,
            }));
        }
        if u64::from(expected_size) != self.size & 0xFFFF_FFFF {
            return Err(self.mismatch(Mismatch::Size {
                expected: u64::from(expected_size),
                actual: self.size,
            }));
        }
        Ok(input)
    }

    fn mismatch(&self, mismatch: Mismatch) -> io::Error {
        ArchiveError::IntegrityMismatch {
            entry: self.entry.clone(),
            mismatch,
        }
        .into_io()
    }
}

impl<R: BufRead> Read for GzipMembers<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(body) = self.body.as_mut() {
                let n = body.read(buf)?;
                if n > 0 {
                    self.crc.update(&buf[..n]);
                    self.size += n as u64;
                    return Ok(n);
                }
                let Some(body) = self.body.take() else {
                    return Ok(0);
                };
                let input = self.finish_member(body.into_inner())?;
                self.idle = Some(input);
                continue;
            }

            let Some(mut input) = self.idle.take() else {
                return Ok(0);
            };
            let next = input.fill_buf()?;
            if next.is_empty() {
                return Ok(0);
            }
            if self.members > 0 && !next.starts_with(&[0x1F]) {
                tracing::debug!(entry = %self.entry, "ignoring bytes after last gzip member");
                return Ok(0);
            }

            read_gzip_header(&mut input, self.header_limit)?;
            self.crc.reset();
            self.size = 0;
            self.members += 1;
            self.body = Some(DeflateDecoder::new(input));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    fn gzip(data: &[u8], name: Option<&str>) -> Vec<u8> {
        let mut builder = flate2::GzBuilder::new().mtime(1_700_000_000);
        if let Some(name) = name {
            builder = builder.filename(name);
        }
        let mut encoder = builder.write(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn gunzip(data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        let mut reader = GzipMembers::new(io::BufReader::new(data), "e".into(), 1024);
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_header_fields() {
        let data = gzip(b"x", Some("hello.txt"));
        let header = read_gzip_header(&mut &data[..], 1024).unwrap();
        assert_eq!(header.name.as_deref(), Some("hello.txt"));
        assert_eq!(header.mtime, 1_700_000_000);
        assert_eq!(header.len, GZIP_HEADER_LEN + 10);
    }

    #[test]
    fn test_header_limit() {
        let data = gzip(b"x", Some("a-rather-long-name.txt"));
        let err = ArchiveError::from(read_gzip_header(&mut &data[..], 16).unwrap_err());
        assert!(matches!(err, ArchiveError::CorruptArchive { .. }));
    }

    #[test]
    fn test_single_member() {
        assert_eq!(gunzip(&gzip(b"hello world", None)).unwrap(), b"hello world");
    }

    #[test]
    fn test_multiple_members() {
        let mut data = gzip(b"hello ", None);
        data.extend(gzip(b"world", Some("ignored")));
        assert_eq!(gunzip(&data).unwrap(), b"hello world");
    }

    #[test]
    fn test_trailing_padding_ignored() {
        let mut data = gzip(b"padded", None);
        data.extend([0u8; 32]);
        assert_eq!(gunzip(&data).unwrap(), b"padded");
    }

    #[test]
    fn test_trailer_crc_mismatch() {
        let mut data = gzip(b"hello world", None);
        let crc_at = data.len() - 8;
        data[crc_at] ^= 0xFF;
        let err = gunzip(&data).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::IntegrityMismatch {
                mismatch: Mismatch::Crc32 { .. },
                ..
            }
        ));
    }
}
