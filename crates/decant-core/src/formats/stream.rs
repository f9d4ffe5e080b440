//! Single-stream compressed files (gzip, bzip2, xz, zstd).
//!
//! Each file becomes an archive holding exactly one entry: the
//! decompressed payload. The payload is always marked for re-detection,
//! since it is commonly a tar archive or another container.
//!
//! The declared uncompressed size is recovered from the format's own
//! framing where one exists:
//!
//! - gzip: `ISIZE` field of the final member trailer
//! - xz: sum of the block records in every stream index
//! - zstd: sum of the frame content sizes, if every frame declares one
//! - bzip2: unknown

use std::sync::Arc;

use byteorder::ByteOrder;
use byteorder::LittleEndian;

use super::ArchiveFormat;
use super::ParseContext;
use super::common;
use super::compression::CompressionCodec;
use crate::Archive;
use crate::ArchiveBuilder;
use crate::ArchiveError;
use crate::ReaderConfig;
use crate::Result;
use crate::entry::Entry;
use crate::entry::EntryAttributes;
use crate::io::ByteSource;
use crate::io::SourceReader;
use crate::io::read_up_to;
use crate::pipeline::gzip::GzipHeader;
use crate::pipeline::gzip::read_gzip_header;
use crate::recipe::Codec;
use crate::recipe::DataRange;
use crate::recipe::DecodeRecipe;
use crate::recipe::DecodeStep;
use crate::recipe::Verification;
use crate::types::EntryKind;
use crate::types::EntryPath;
use crate::types::PathRejection;

/// Payload name used when neither the stream nor the source names one.
const FALLBACK_NAME: &str = "data";

/// Format family for one compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    codec: CompressionCodec,
}

impl StreamFormat {
    /// Detection priority shared by every single-stream format.
    pub const PRIORITY: i32 = 90;

    /// Creates the format for `codec`.
    pub const fn new(codec: CompressionCodec) -> Self {
        Self { codec }
    }

    /// The compression codec.
    pub const fn codec(&self) -> CompressionCodec {
        self.codec
    }

    fn payload_name(
        &self,
        stored: Option<&str>,
        source_name: Option<&str>,
    ) -> std::result::Result<EntryPath, PathRejection> {
        if let Some(path) = stored.and_then(|name| EntryPath::parse(name).ok()) {
            return Ok(path);
        }
        source_name
            .and_then(|name| {
                // a name hint may be a full path
                let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
                let derived = self.codec.strip_suffix(base).or_else(|| {
                    base.rsplit_once('.')
                        .map(|(stem, _)| stem.to_string())
                        .filter(|stem| !stem.is_empty())
                })?;
                EntryPath::parse(&derived).ok()
            })
            .map_or_else(|| EntryPath::parse(FALLBACK_NAME), Ok)
    }
}

impl ArchiveFormat for StreamFormat {
    fn name(&self) -> &str {
        self.codec.name()
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn matches_signature(&self, header: &[u8]) -> bool {
        self.codec.matches_magic(header)
    }

    fn parse(&self, ctx: &ParseContext<'_>) -> Result<Archive> {
        let source: &dyn ByteSource = &**ctx.source;
        let mut attributes = EntryAttributes::default();
        let mut stored_name = None;

        let (codec, size) = match self.codec {
            CompressionCodec::Gzip => {
                let header = gzip_header(ctx.source, ctx.config)?;
                let size = gzip_declared_size(source, &header)?;
                if header.mtime != 0 {
                    attributes.modified = common::unix_time(i64::from(header.mtime));
                }
                attributes.comment = header.comment.filter(|c| !c.is_empty());
                stored_name = header.name;
                (Codec::Gzip, size)
            }
            CompressionCodec::Bzip2 => (Codec::Bzip2, None),
            CompressionCodec::Xz => (Codec::Xz, xz_uncompressed_size(source, ctx.config)?),
            CompressionCodec::Zstd => (Codec::Zstd, zstd_content_size(source, ctx.config)?),
        };

        let mut recipe = DecodeRecipe::new(DataRange::to_end(0)).then(DecodeStep::Decompress(codec));
        // gzip checks its own trailers; its ISIZE is only a hint for
        // multi-member files
        if self.codec != CompressionCodec::Gzip && size.is_some() {
            recipe = recipe.then(DecodeStep::Verify(Verification { crc32: None, size }));
        }

        let path = self
            .payload_name(stored_name.as_deref(), ctx.source_name())
            .map_err(|e| ArchiveError::corrupt(format!("payload name: {e}")))?;
        let entry = Entry::new(path, EntryKind::File, recipe)
            .with_size(size)
            .with_compressed_size(source.size())
            .with_attributes(attributes)
            .with_redetect(true);

        let mut builder =
            ArchiveBuilder::new(self.name(), Arc::clone(ctx.source)).entry_limit(ctx.config.max_entries);
        builder.push(entry)?;
        Ok(builder.build())
    }
}

fn gzip_header(source: &Arc<dyn ByteSource>, config: &ReaderConfig) -> Result<GzipHeader> {
    let mut reader = SourceReader::new(Arc::clone(source), 0, None);
    Ok(read_gzip_header(&mut reader, config.max_header_size)?)
}

fn gzip_declared_size(source: &dyn ByteSource, header: &GzipHeader) -> Result<Option<u64>> {
    let Some(total) = source.size() else {
        return Ok(None);
    };
    if total < header.len + 8 {
        return Err(ArchiveError::corrupt("gzip stream truncated"));
    }
    let mut isize = [0u8; 4];
    common::read_structure(source, total - 4, &mut isize, "gzip trailer")?;
    Ok(Some(u64::from(LittleEndian::read_u32(&isize))))
}

const XZ_HEADER_MAGIC: &[u8] = &[0xFD, b'7', b'z', b'X', b'Z', 0x00];
const XZ_FOOTER_MAGIC: &[u8] = b"YZ";
const XZ_HEADER_LEN: u64 = 12;
const XZ_FOOTER_LEN: u64 = 12;

/// Walks the xz streams from the end of the source and sums the
/// uncompressed sizes recorded in their indexes.
///
/// Returns `None` when the source size is unknown or an index is larger
/// than `max_header_size`.
fn xz_uncompressed_size(source: &dyn ByteSource, config: &ReaderConfig) -> Result<Option<u64>> {
    let Some(mut end) = source.size() else {
        return Ok(None);
    };
    let mut total: u64 = 0;
    let mut streams = 0usize;

    while end > 0 {
        end = skip_stream_padding(source, end, config)?;
        if end == 0 {
            break;
        }
        if end < XZ_HEADER_LEN + XZ_FOOTER_LEN {
            return Err(ArchiveError::corrupt("xz stream truncated"));
        }

        let mut footer = [0u8; XZ_FOOTER_LEN as usize];
        common::read_structure(source, end - XZ_FOOTER_LEN, &mut footer, "xz stream footer")?;
        if &footer[10..12] != XZ_FOOTER_MAGIC {
            return Err(ArchiveError::corrupt("xz stream footer magic not found"));
        }
        let index_size = (u64::from(LittleEndian::read_u32(&footer[4..8])) + 1) * 4;
        if index_size > config.max_header_size {
            tracing::debug!(index_size, "xz index too large, size left unknown");
            return Ok(None);
        }
        let index_offset = (end - XZ_FOOTER_LEN)
            .checked_sub(index_size)
            .ok_or_else(|| ArchiveError::corrupt("xz index extends before start of file"))?;

        let mut index = vec![0u8; index_size as usize];
        common::read_structure(source, index_offset, &mut index, "xz index")?;
        let (uncompressed, blocks) = parse_xz_index(&index)?;

        let stream_start = index_offset
            .checked_sub(blocks)
            .and_then(|o| o.checked_sub(XZ_HEADER_LEN))
            .ok_or_else(|| ArchiveError::corrupt("xz blocks extend before start of file"))?;
        let mut magic = [0u8; 6];
        common::read_structure(source, stream_start, &mut magic, "xz stream header")?;
        if magic != XZ_HEADER_MAGIC {
            return Err(ArchiveError::corrupt(format!(
                "xz stream header not found at offset {stream_start}"
            )));
        }

        total = total
            .checked_add(uncompressed)
            .ok_or_else(|| ArchiveError::corrupt("xz uncompressed size overflows"))?;
        streams += 1;
        if streams > config.max_entries {
            return Err(ArchiveError::corrupt("too many xz streams"));
        }
        end = stream_start;
    }

    tracing::trace!(streams, total, "xz index walk");
    Ok(Some(total))
}

/// Steps backward over stream padding (zero bytes in multiples of four).
fn skip_stream_padding(source: &dyn ByteSource, mut end: u64, config: &ReaderConfig) -> Result<u64> {
    let floor = end.saturating_sub(config.max_header_size);
    while end >= 4 {
        let mut word = [0u8; 4];
        common::read_structure(source, end - 4, &mut word, "xz stream padding")?;
        if word != [0; 4] {
            return Ok(end);
        }
        end -= 4;
        if end < floor {
            return Err(ArchiveError::corrupt("xz stream padding too long"));
        }
    }
    if end == 0 {
        Ok(0)
    } else {
        Err(ArchiveError::corrupt("xz stream padding misaligned"))
    }
}

/// Parses one index. Returns the summed uncompressed size and the padded
/// size of all blocks.
fn parse_xz_index(index: &[u8]) -> Result<(u64, u64)> {
    // indicator, records, padding, CRC-32
    let body = index
        .len()
        .checked_sub(4)
        .filter(|_| index.first() == Some(&0))
        .ok_or_else(|| ArchiveError::corrupt("bad xz index indicator"))?;
    let mut pos = 1;
    let records = read_multibyte(index, &mut pos, body)?;

    let mut uncompressed: u64 = 0;
    let mut blocks: u64 = 0;
    for _ in 0..records {
        let unpadded = read_multibyte(index, &mut pos, body)?;
        let size = read_multibyte(index, &mut pos, body)?;
        let padded = unpadded
            .checked_add(3)
            .map(|n| n & !3)
            .ok_or_else(|| ArchiveError::corrupt("xz block size overflows"))?;
        blocks = blocks
            .checked_add(padded)
            .ok_or_else(|| ArchiveError::corrupt("xz block size overflows"))?;
        uncompressed = uncompressed
            .checked_add(size)
            .ok_or_else(|| ArchiveError::corrupt("xz uncompressed size overflows"))?;
    }
    if index[pos..body].iter().any(|&b| b != 0) {
        return Err(ArchiveError::corrupt("xz index padding is not zero"));
    }
    Ok((uncompressed, blocks))
}

fn read_multibyte(buf: &[u8], pos: &mut usize, end: usize) -> Result<u64> {
    let mut value: u64 = 0;
    for i in 0..9 {
        if *pos >= end {
            return Err(ArchiveError::corrupt("xz index truncated"));
        }
        let byte = buf[*pos];
        *pos += 1;
        value |= u64::from(byte & 0x7F) << (i * 7);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(ArchiveError::corrupt("xz integer too long"))
}

const ZSTD_FRAME_MAGIC: u32 = 0xFD2F_B528;
const ZSTD_SKIPPABLE_MASK: u32 = 0xFFFF_FFF0;
const ZSTD_SKIPPABLE_MAGIC: u32 = 0x184D_2A50;

/// Walks the zstd frames and sums their declared content sizes.
///
/// Returns `None` if any frame omits its content size.
fn zstd_content_size(source: &dyn ByteSource, config: &ReaderConfig) -> Result<Option<u64>> {
    let mut offset: u64 = 0;
    let mut total: Option<u64> = Some(0);
    let mut frames = 0usize;

    loop {
        let head = read_up_to(source, offset, 4)?;
        if head.is_empty() {
            break;
        }
        if head.len() < 4 {
            return Err(ArchiveError::corrupt("zstd frame truncated"));
        }
        let magic = LittleEndian::read_u32(&head);

        if magic & ZSTD_SKIPPABLE_MASK == ZSTD_SKIPPABLE_MAGIC {
            let mut len = [0u8; 4];
            common::read_structure(source, offset + 4, &mut len, "zstd skippable frame")?;
            offset += 8 + u64::from(LittleEndian::read_u32(&len));
        } else if magic == ZSTD_FRAME_MAGIC {
            let (content_size, next) = zstd_frame(source, offset)?;
            total = total.zip(content_size).map(|(a, b)| a.saturating_add(b));
            offset = next;
        } else {
            return Err(ArchiveError::corrupt(format!(
                "unknown zstd frame magic {magic:#010x} at offset {offset}"
            )));
        }

        frames += 1;
        if frames > config.max_entries {
            return Err(ArchiveError::corrupt("too many zstd frames"));
        }
    }

    tracing::trace!(frames, ?total, "zstd frame walk");
    Ok(total)
}

/// Reads one frame starting at `offset`. Returns its declared content size
/// and the offset just past it.
fn zstd_frame(source: &dyn ByteSource, offset: u64) -> Result<(Option<u64>, u64)> {
    let mut descriptor = [0u8; 1];
    common::read_structure(source, offset + 4, &mut descriptor, "zstd frame header")?;
    let descriptor = descriptor[0];
    if descriptor & 0x08 != 0 {
        return Err(ArchiveError::corrupt("reserved zstd frame header bit set"));
    }
    let single_segment = descriptor & 0x20 != 0;
    let has_checksum = descriptor & 0x04 != 0;
    let dictionary_len: u64 = [0, 1, 2, 4][usize::from(descriptor & 0x03)];
    let size_len: usize = match descriptor >> 6 {
        0 if single_segment => 1,
        0 => 0,
        1 => 2,
        2 => 4,
        _ => 8,
    };

    let size_at = offset + 5 + u64::from(!single_segment) + dictionary_len;
    let content_size = if size_len == 0 {
        None
    } else {
        let mut field = [0u8; 8];
        common::read_structure(source, size_at, &mut field[..size_len], "zstd frame header")?;
        Some(match size_len {
            1 => u64::from(field[0]),
            2 => u64::from(LittleEndian::read_u16(&field)) + 256,
            4 => u64::from(LittleEndian::read_u32(&field)),
            _ => LittleEndian::read_u64(&field),
        })
    };

    let mut pos = size_at + size_len as u64;
    loop {
        let mut block = [0u8; 3];
        common::read_structure(source, pos, &mut block, "zstd block header")?;
        let header = LittleEndian::read_u24(&block);
        let last = header & 1 != 0;
        let stored = match (header >> 1) & 3 {
            // raw and compressed blocks store their size, RLE one byte
            0 | 2 => u64::from(header >> 3),
            1 => 1,
            _ => return Err(ArchiveError::corrupt("reserved zstd block type")),
        };
        pos += 3 + stored;
        if last {
            break;
        }
    }
    if has_checksum {
        pos += 4;
    }
    if source.size().is_some_and(|size| pos > size) {
        return Err(ArchiveError::corrupt("zstd frame truncated"));
    }
    Ok((content_size, pos))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::io::MemorySource;

    fn parse(codec: CompressionCodec, data: Vec<u8>, name: Option<&str>) -> Result<Archive> {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(data));
        let config = ReaderConfig::default();
        let ctx = ParseContext {
            source: &source,
            name,
            volumes: None,
            config: &config,
        };
        StreamFormat::new(codec).parse(&ctx)
    }

    fn gzip(data: &[u8], name: Option<&str>) -> Vec<u8> {
        let mut builder = flate2::GzBuilder::new().mtime(86_400);
        if let Some(name) = name {
            builder = builder.filename(name);
        }
        let mut encoder = builder.write(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn xz(data: &[u8]) -> Vec<u8> {
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_gzip_entry() {
        let archive = parse(CompressionCodec::Gzip, gzip(b"hello world", None), Some("hello.txt.gz"))
            .unwrap();
        assert_eq!(archive.format(), "gzip");
        let entry = &archive.entries()[0];
        assert_eq!(entry.path().to_string(), "hello.txt");
        assert_eq!(entry.size(), Some(11));
        assert!(entry.redetect());
        assert_eq!(entry.recipe().to_string(), "[gunzip]");
        assert!(entry.attributes().modified.is_some());
    }

    #[test]
    fn test_gzip_stored_name_wins() {
        let archive =
            parse(CompressionCodec::Gzip, gzip(b"x", Some("inner.tar")), Some("outer.tgz")).unwrap();
        assert_eq!(archive.entries()[0].path().to_string(), "inner.tar");
    }

    #[test]
    fn test_payload_name_fallbacks() {
        let format = StreamFormat::new(CompressionCodec::Bzip2);
        let name = |stored, source| format.payload_name(stored, source).unwrap().to_string();
        assert_eq!(name(None, Some("dir/a.tbz2")), "a.tar");
        assert_eq!(name(None, Some("notes.bin")), "notes");
        assert_eq!(name(None, None), "data");
        assert_eq!(name(Some("../evil"), None), "data");
    }

    #[test]
    fn test_gzip_header_only_is_corrupt() {
        let data = gzip(b"hello", None);
        let err = parse(CompressionCodec::Gzip, data[..12].to_vec(), None).unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptArchive { .. }));
    }

    #[test]
    fn test_xz_size_from_index() {
        let archive = parse(CompressionCodec::Xz, xz(b"xz payload"), Some("p.xz")).unwrap();
        let entry = &archive.entries()[0];
        assert_eq!(entry.size(), Some(10));
        assert_eq!(entry.recipe().to_string(), "[unxz, verify(size=10)]");
    }

    #[test]
    fn test_xz_multiple_streams_with_padding() {
        let mut data = xz(b"first ");
        data.extend([0u8; 8]);
        data.extend(xz(b"second"));
        let archive = parse(CompressionCodec::Xz, data, None).unwrap();
        assert_eq!(archive.entries()[0].size(), Some(12));
    }

    #[test]
    fn test_xz_damaged_footer() {
        let mut data = xz(b"payload");
        let last = data.len() - 1;
        data[last] = b'Q';
        let err = parse(CompressionCodec::Xz, data, None).unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptArchive { .. }));
    }

    #[test]
    fn test_zstd_content_size() {
        // one-shot compression records the content size in the frame header
        let mut data = zstd::bulk::compress(b"one ", 3).unwrap();
        data.extend(zstd::bulk::compress(b"two", 3).unwrap());
        let archive = parse(CompressionCodec::Zstd, data, Some("x.zst")).unwrap();
        let entry = &archive.entries()[0];
        assert_eq!(entry.path().to_string(), "x");
        assert_eq!(entry.size(), Some(7));
    }

    #[test]
    fn test_zstd_skippable_frame() {
        let mut data = vec![0x50, 0x2A, 0x4D, 0x18, 3, 0, 0, 0, 1, 2, 3];
        data.extend(zstd::bulk::compress(b"abc", 1).unwrap());
        let archive = parse(CompressionCodec::Zstd, data, None).unwrap();
        assert_eq!(archive.entries()[0].size(), Some(3));
    }

    #[test]
    fn test_zstd_trailing_garbage() {
        let mut data = zstd::bulk::compress(b"abc", 1).unwrap();
        data.extend(b"garbage!");
        let err = parse(CompressionCodec::Zstd, data, None).unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptArchive { .. }));
    }

    #[test]
    fn test_bzip2_size_unknown() {
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(b"bz").unwrap();
        let archive =
            parse(CompressionCodec::Bzip2, encoder.finish().unwrap(), Some("b.bz2")).unwrap();
        let entry = &archive.entries()[0];
        assert_eq!(entry.size(), None);
        assert!(!entry.recipe().is_verifiable());
    }
}
