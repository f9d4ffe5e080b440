//! Test utilities for synthesizing archives in memory.
//!
//! The builders here write just enough of each format to exercise the
//! readers: ZIP (stored, deflate, bzip2, zstd, xz, ZipCrypto, ZIP64,
//! prepended stubs, spanned segments), ustar TAR with GNU and PAX records,
//! and the single-stream compressors.
//!
//! # Panics
//!
//! All functions in this module may panic on encoder errors since they are
//! designed for test use only where panics are acceptable.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::io::Write;

use crate::pipeline::cipher::ZipCryptoKeys;

/// DOS date of every ZIP entry written here: 2024-01-15.
pub const DOS_DATE: u16 = ((2024 - 1980) << 9) | (1 << 5) | 15;
/// DOS time of every ZIP entry written here: 12:30:00.
pub const DOS_TIME: u16 = (12 << 11) | (30 << 5);

fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

/// Compresses `data` as a single gzip member without a stored name.
///
/// # Examples
///
/// ```
/// let gz = decant_core::test_utils::gzip(b"hello world");
/// assert_eq!(&gz[..3], &[0x1F, 0x8B, 0x08]);
/// ```
#[must_use]
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Compresses `data` as a gzip member storing `name` and `mtime`.
#[must_use]
pub fn gzip_named(data: &[u8], name: &str, mtime: u32) -> Vec<u8> {
    let mut encoder = flate2::GzBuilder::new()
        .filename(name)
        .mtime(mtime)
        .write(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Compresses `data` as one bzip2 stream.
#[must_use]
pub fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Compresses `data` as one xz stream.
#[must_use]
pub fn xz(data: &[u8]) -> Vec<u8> {
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Compresses `data` as one zstd frame that records its content size.
#[must_use]
pub fn zstd(data: &[u8]) -> Vec<u8> {
    zstd::bulk::compress(data, 3).unwrap()
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Compression method of a ZIP entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZipMethod {
    /// Method 0.
    Stored,
    /// Method 8.
    Deflate,
    /// Method 12.
    Bzip2,
    /// Method 93.
    Zstd,
    /// Method 95.
    Xz,
    /// Any other method code; the content is written as given.
    Raw(u16),
}

impl ZipMethod {
    const fn code(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflate => 8,
            Self::Bzip2 => 12,
            Self::Zstd => 93,
            Self::Xz => 95,
            Self::Raw(code) => code,
        }
    }

    fn compress(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Stored | Self::Raw(_) => data.to_vec(),
            Self::Deflate => deflate(data),
            Self::Bzip2 => bzip2(data),
            Self::Zstd => zstd(data),
            Self::Xz => xz(data),
        }
    }
}

struct ZipEntrySpec {
    name: Vec<u8>,
    data: Vec<u8>,
    method: ZipMethod,
    mode: u32,
    password: Option<Vec<u8>>,
    utf8: bool,
    comment: Vec<u8>,
    extra: Vec<u8>,
}

struct WrittenEntry {
    crc: u32,
    compressed: u64,
    uncompressed: u64,
    offset: u64,
}

/// Builder for ZIP test archives.
///
/// # Examples
///
/// ```
/// use decant_core::test_utils::{ZipBuilder, ZipMethod};
///
/// let zip = ZipBuilder::new()
///     .file("doc.txt", b"deflated")
///     .entry("raw.bin", b"stored", ZipMethod::Stored)
///     .directory("dir/")
///     .symlink("link", "doc.txt")
///     .build();
/// assert_eq!(&zip[..4], b"PK\x03\x04");
/// ```
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<ZipEntrySpec>,
    comment: Vec<u8>,
    prefix: Vec<u8>,
    zip64: bool,
}

impl ZipBuilder {
    /// Creates a new ZIP test builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a deflated file.
    #[must_use]
    pub fn file(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, data, ZipMethod::Deflate)
    }

    /// Adds a stored file.
    #[must_use]
    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, data, ZipMethod::Stored)
    }

    /// Adds a file compressed with `method`.
    #[must_use]
    pub fn entry(mut self, name: &str, data: &[u8], method: ZipMethod) -> Self {
        self.entries.push(ZipEntrySpec {
            name: name.as_bytes().to_vec(),
            data: data.to_vec(),
            method,
            mode: 0o100_644,
            password: None,
            utf8: !name.is_ascii(),
            comment: Vec::new(),
            extra: Vec::new(),
        });
        self
    }

    /// Adds a stored file whose name is written as raw bytes with the
    /// UTF-8 flag clear.
    #[must_use]
    pub fn raw_name(mut self, name: &[u8], data: &[u8]) -> Self {
        self.entries.push(ZipEntrySpec {
            name: name.to_vec(),
            data: data.to_vec(),
            method: ZipMethod::Stored,
            mode: 0o100_644,
            password: None,
            utf8: false,
            comment: Vec::new(),
            extra: Vec::new(),
        });
        self
    }

    /// Adds a directory. `name` should end in `/`.
    #[must_use]
    pub fn directory(mut self, name: &str) -> Self {
        self = self.entry(name, b"", ZipMethod::Stored);
        self.last().mode = 0o040_755;
        self
    }

    /// Adds a Unix symlink whose content is `target`.
    #[must_use]
    pub fn symlink(mut self, name: &str, target: &str) -> Self {
        self = self.entry(name, target.as_bytes(), ZipMethod::Stored);
        self.last().mode = 0o120_777;
        self
    }

    /// Adds a deflated file encrypted with ZipCrypto.
    #[must_use]
    pub fn encrypted(mut self, name: &str, data: &[u8], password: &str) -> Self {
        self = self.file(name, data);
        self.last().password = Some(password.as_bytes().to_vec());
        self
    }

    /// Sets the comment of the most recently added entry.
    #[must_use]
    pub fn entry_comment(mut self, comment: &str) -> Self {
        self.last().comment = comment.as_bytes().to_vec();
        self
    }

    /// Appends an Info-ZIP extended timestamp and Unix owner extra field
    /// to the most recently added entry.
    #[must_use]
    pub fn unix_extras(mut self, mtime: i32, uid: u32, gid: u32) -> Self {
        let extra = &mut self.last().extra;
        extra.extend(0x5455u16.to_le_bytes());
        extra.extend(5u16.to_le_bytes());
        extra.push(0x01);
        extra.extend(mtime.to_le_bytes());
        extra.extend(0x7875u16.to_le_bytes());
        extra.extend(11u16.to_le_bytes());
        extra.extend([1, 4]);
        extra.extend(uid.to_le_bytes());
        extra.push(4);
        extra.extend(gid.to_le_bytes());
        self
    }

    /// Sets the archive comment.
    #[must_use]
    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.as_bytes().to_vec();
        self
    }

    /// Prepends `stub` without adjusting any offset, the way a
    /// self-extracting executable is assembled.
    #[must_use]
    pub fn prefix(mut self, stub: &[u8]) -> Self {
        self.prefix = stub.to_vec();
        self
    }

    /// Writes ZIP64 records even though nothing needs them.
    #[must_use]
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    fn last(&mut self) -> &mut ZipEntrySpec {
        self.entries.last_mut().unwrap()
    }

    /// Builds a single-file archive.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let (mut body, written) = self.write_entries(Vec::new());
        let cd_offset = body.len() as u64;
        let cd = self.central_directory(&written, |offset| (0, offset));
        body.extend_from_slice(&cd);
        self.write_end(&mut body, cd_offset, cd.len() as u64, 0);

        let mut out = self.prefix;
        out.extend(body);
        out
    }

    /// Builds a spanned archive cut into segments of `segment_size` bytes.
    ///
    /// Returns the segments in order; the last one holds the central
    /// directory and is the `.zip` file, the others are `.z01`, `.z02`...
    #[must_use]
    pub fn build_spanned(self, segment_size: usize) -> Vec<Vec<u8>> {
        assert!(segment_size > 0);
        let (body, written) = self.write_entries(b"PK\x07\x08".to_vec());
        let mut segments: Vec<Vec<u8>> = body.chunks(segment_size).map(<[u8]>::to_vec).collect();
        let last_disk = segments.len() - 1;

        let size = segment_size as u64;
        let cd = self.central_directory(&written, |offset| {
            ((offset / size) as u32, offset % size)
        });
        let last = &mut segments[last_disk];
        let cd_offset = last.len() as u64;
        last.extend_from_slice(&cd);
        self.write_end(last, cd_offset, cd.len() as u64, last_disk as u32);
        segments
    }

    fn write_entries(&self, mut body: Vec<u8>) -> (Vec<u8>, Vec<WrittenEntry>) {
        let mut written = Vec::with_capacity(self.entries.len());
        for spec in &self.entries {
            let crc = crc32(&spec.data);
            let mut stored = spec.method.compress(&spec.data);
            if let Some(password) = &spec.password {
                let mut keys = ZipCryptoKeys::new(password);
                let mut header = [0x5Au8; 12];
                header[11] = (crc >> 24) as u8;
                keys.encrypt(&mut header);
                keys.encrypt(&mut stored);
                let mut sealed = header.to_vec();
                sealed.extend(stored);
                stored = sealed;
            }

            let offset = body.len() as u64;
            let (size32, csize32) = if self.zip64 {
                (u32::MAX, u32::MAX)
            } else {
                (spec.data.len() as u32, stored.len() as u32)
            };
            body.extend(b"PK\x03\x04");
            body.extend(if self.zip64 { 45u16 } else { 20u16 }.to_le_bytes());
            body.extend(Self::flags(spec).to_le_bytes());
            body.extend(spec.method.code().to_le_bytes());
            body.extend(DOS_TIME.to_le_bytes());
            body.extend(DOS_DATE.to_le_bytes());
            body.extend(crc.to_le_bytes());
            body.extend(csize32.to_le_bytes());
            body.extend(size32.to_le_bytes());
            body.extend((spec.name.len() as u16).to_le_bytes());
            let local_extra = if self.zip64 {
                let mut extra = vec![0x01, 0x00, 16, 0];
                extra.extend((spec.data.len() as u64).to_le_bytes());
                extra.extend((stored.len() as u64).to_le_bytes());
                extra
            } else {
                Vec::new()
            };
            body.extend((local_extra.len() as u16).to_le_bytes());
            body.extend(&spec.name);
            body.extend(local_extra);
            body.extend(&stored);

            written.push(WrittenEntry {
                crc,
                compressed: stored.len() as u64,
                uncompressed: spec.data.len() as u64,
                offset,
            });
        }
        (body, written)
    }

    fn flags(spec: &ZipEntrySpec) -> u16 {
        let mut flags = 0;
        if spec.password.is_some() {
            flags |= 0x0001;
        }
        if spec.utf8 {
            flags |= 0x0800;
        }
        flags
    }

    fn central_directory(
        &self,
        written: &[WrittenEntry],
        locate: impl Fn(u64) -> (u32, u64),
    ) -> Vec<u8> {
        let mut cd = Vec::new();
        for (spec, entry) in self.entries.iter().zip(written) {
            let (disk, offset) = locate(entry.offset);
            let mut extra = Vec::new();
            if self.zip64 {
                extra.extend([0x01, 0x00, 24, 0]);
                extra.extend(entry.uncompressed.to_le_bytes());
                extra.extend(entry.compressed.to_le_bytes());
                extra.extend(offset.to_le_bytes());
            }
            extra.extend(&spec.extra);
            let (usize32, csize32, offset32) = if self.zip64 {
                (u32::MAX, u32::MAX, u32::MAX)
            } else {
                (entry.uncompressed as u32, entry.compressed as u32, offset as u32)
            };

            cd.extend(b"PK\x01\x02");
            cd.extend(((3u16 << 8) | 45).to_le_bytes());
            cd.extend(if self.zip64 { 45u16 } else { 20u16 }.to_le_bytes());
            cd.extend(Self::flags(spec).to_le_bytes());
            cd.extend(spec.method.code().to_le_bytes());
            cd.extend(DOS_TIME.to_le_bytes());
            cd.extend(DOS_DATE.to_le_bytes());
            cd.extend(entry.crc.to_le_bytes());
            cd.extend(csize32.to_le_bytes());
            cd.extend(usize32.to_le_bytes());
            cd.extend((spec.name.len() as u16).to_le_bytes());
            cd.extend((extra.len() as u16).to_le_bytes());
            cd.extend((spec.comment.len() as u16).to_le_bytes());
            cd.extend((disk as u16).to_le_bytes());
            cd.extend(0u16.to_le_bytes());
            cd.extend((spec.mode << 16).to_le_bytes());
            cd.extend(offset32.to_le_bytes());
            cd.extend(&spec.name);
            cd.extend(extra);
            cd.extend(&spec.comment);
        }
        cd
    }

    fn write_end(&self, out: &mut Vec<u8>, cd_offset: u64, cd_size: u64, disk: u32) {
        let count = self.entries.len() as u64;
        if self.zip64 {
            let record_offset = out.len() as u64;
            out.extend(b"PK\x06\x06");
            out.extend(44u64.to_le_bytes());
            out.extend(45u16.to_le_bytes());
            out.extend(45u16.to_le_bytes());
            out.extend(disk.to_le_bytes());
            out.extend(disk.to_le_bytes());
            out.extend(count.to_le_bytes());
            out.extend(count.to_le_bytes());
            out.extend(cd_size.to_le_bytes());
            out.extend(cd_offset.to_le_bytes());

            out.extend(b"PK\x06\x07");
            out.extend(disk.to_le_bytes());
            out.extend(record_offset.to_le_bytes());
            out.extend((disk + 1).to_le_bytes());
        }

        let (count16, size32, offset32) = if self.zip64 {
            (u16::MAX, u32::MAX, u32::MAX)
        } else {
            (count as u16, cd_size as u32, cd_offset as u32)
        };
        out.extend(b"PK\x05\x06");
        out.extend((disk as u16).to_le_bytes());
        out.extend((disk as u16).to_le_bytes());
        out.extend(count16.to_le_bytes());
        out.extend(count16.to_le_bytes());
        out.extend(size32.to_le_bytes());
        out.extend(offset32.to_le_bytes());
        out.extend((self.comment.len() as u16).to_le_bytes());
        out.extend(&self.comment);
    }
}

const BLOCK: usize = 512;

/// Builder for ustar TAR test archives.
///
/// Names longer than 100 bytes get a GNU `L` record first.
///
/// # Examples
///
/// ```
/// use decant_core::test_utils::TarBuilder;
///
/// let tar = TarBuilder::new()
///     .file("file.txt", b"content")
///     .directory("dir/")
///     .symlink("link", "file.txt")
///     .build();
/// assert_eq!(&tar[257..262], b"ustar");
/// assert_eq!(tar.len() % 512, 0);
/// ```
#[derive(Default)]
pub struct TarBuilder {
    out: Vec<u8>,
}

impl TarBuilder {
    /// Creates a new TAR test builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a regular file.
    #[must_use]
    pub fn file(self, name: &str, data: &[u8]) -> Self {
        self.record(name, b'0', 0o644, "", data)
    }

    /// Adds a regular file with a custom mode.
    #[must_use]
    pub fn file_with_mode(self, name: &str, data: &[u8], mode: u32) -> Self {
        self.record(name, b'0', mode, "", data)
    }

    /// Adds a directory.
    #[must_use]
    pub fn directory(self, name: &str) -> Self {
        self.record(name, b'5', 0o755, "", b"")
    }

    /// Adds a symbolic link.
    #[must_use]
    pub fn symlink(self, name: &str, target: &str) -> Self {
        self.record(name, b'2', 0o777, target, b"")
    }

    /// Adds a hard link.
    #[must_use]
    pub fn hardlink(self, name: &str, target: &str) -> Self {
        self.record(name, b'1', 0o644, target, b"")
    }

    /// Adds a header with an arbitrary type flag and no content.
    #[must_use]
    pub fn special(self, name: &str, typeflag: u8) -> Self {
        self.record(name, typeflag, 0o644, "", b"")
    }

    /// Adds a PAX extended header carrying `records`, then a file.
    #[must_use]
    pub fn pax_file(mut self, name: &str, data: &[u8], records: &[(&str, &str)]) -> Self {
        let mut body = Vec::new();
        for (key, value) in records {
            body.extend(pax_record(key, value.as_bytes()));
        }
        self.push_header("././@PaxHeader", b'x', 0o644, "", body.len() as u64);
        self.push_data(&body);
        self.file(name, data)
    }

    /// Adds a PAX global header carrying `records`.
    #[must_use]
    pub fn pax_global(mut self, records: &[(&str, &str)]) -> Self {
        let mut body = Vec::new();
        for (key, value) in records {
            body.extend(pax_record(key, value.as_bytes()));
        }
        self.push_header("pax_global_header", b'g', 0o644, "", body.len() as u64);
        self.push_data(&body);
        self
    }

    fn record(mut self, name: &str, typeflag: u8, mode: u32, link: &str, data: &[u8]) -> Self {
        if name.len() > 100 {
            let mut long = name.as_bytes().to_vec();
            long.push(0);
            self.push_header("././@LongLink", b'L', 0o644, "", long.len() as u64);
            self.push_data(&long);
        }
        self.push_header(name, typeflag, mode, link, data.len() as u64);
        self.push_data(data);
        self
    }

    fn push_header(&mut self, name: &str, typeflag: u8, mode: u32, link: &str, size: u64) {
        let mut block = [0u8; BLOCK];
        let name = name.as_bytes();
        let n = name.len().min(100);
        block[..n].copy_from_slice(&name[..n]);
        octal(&mut block[100..108], u64::from(mode));
        octal(&mut block[108..116], 1000);
        octal(&mut block[116..124], 1000);
        octal(&mut block[124..136], size);
        octal(&mut block[136..148], 1_700_000_000);
        block[156] = typeflag;
        let link = link.as_bytes();
        let n = link.len().min(100);
        block[157..157 + n].copy_from_slice(&link[..n]);
        block[257..263].copy_from_slice(b"ustar\0");
        block[263..265].copy_from_slice(b"00");
        block[265..269].copy_from_slice(b"user");
        block[297..302].copy_from_slice(b"group");

        block[148..156].fill(b' ');
        let sum: u32 = block.iter().map(|&b| u32::from(b)).sum();
        let checksum = format!("{sum:06o}\0 ");
        block[148..156].copy_from_slice(checksum.as_bytes());
        self.out.extend_from_slice(&block);
    }

    fn push_data(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
        let pad = (BLOCK - data.len() % BLOCK) % BLOCK;
        self.out.extend(std::iter::repeat_n(0u8, pad));
    }

    /// Builds the archive with its two-block end marker.
    #[must_use]
    pub fn build(mut self) -> Vec<u8> {
        self.out.extend([0u8; 2 * BLOCK]);
        self.out
    }

    /// Builds the archive without an end marker.
    #[must_use]
    pub fn build_unterminated(self) -> Vec<u8> {
        self.out
    }
}

/// Writes `value` as zero-padded octal, leaving room for a NUL.
fn octal(field: &mut [u8], value: u64) {
    let width = field.len() - 1;
    let text = format!("{value:0width$o}");
    field[..width].copy_from_slice(&text.as_bytes()[text.len() - width..]);
    field[width] = 0;
}

/// Encodes one `"<len> <key>=<value>\n"` PAX record.
#[must_use]
pub fn pax_record(key: &str, value: &[u8]) -> Vec<u8> {
    let body_len = key.len() + value.len() + 3;
    // the length prefix counts its own digits
    let mut len = body_len + 1;
    while len != body_len + len.to_string().len() {
        len = body_len + len.to_string().len();
    }
    let mut record = format!("{len} {key}=").into_bytes();
    record.extend_from_slice(value);
    record.push(b'\n');
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pax_record_length() {
        let record = pax_record("path", b"a");
        assert_eq!(record, b"9 path=a\n");
        let long = pax_record("path", &[b'x'; 95]);
        assert_eq!(long.len(), 105);
        assert!(long.starts_with(b"105 "));
    }

    #[test]
    fn test_spanned_segments() {
        let segments = ZipBuilder::new()
            .stored("a.bin", &[7u8; 300])
            .build_spanned(128);
        assert!(segments.len() > 2);
        assert_eq!(&segments[0][..4], b"PK\x07\x08");
        assert!(segments[..segments.len() - 1].iter().all(|s| s.len() == 128));
    }

    #[test]
    fn test_octal_field() {
        let mut field = [0xFFu8; 8];
        octal(&mut field, 0o644);
        assert_eq!(&field, b"0000644\0");
    }
}
