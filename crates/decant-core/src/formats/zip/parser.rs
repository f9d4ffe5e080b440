//! Central-directory driven ZIP parsing.
//!
//! The end of central directory record is located by scanning backward
//! from the end of the source. Its offsets are trusted only after a
//! central directory signature is found where they point; archives with a
//! prepended stub (self-extractors) are recovered by shifting every offset
//! by the stub length.

use std::io::BufReader;
use std::sync::Arc;

use super::cp437;
use super::structures::CENTRAL_HEADER_SIGNATURE;
use super::structures::CentralHeader;
use super::structures::EndOfCentralDirectory;
use super::structures::LOCAL_HEADER_LEN;
use super::structures::Zip64EndOfCentralDirectory;
use super::structures::Zip64Locator;
use super::structures::flags;
use super::structures::local_data_start;
use crate::Archive;
use crate::ArchiveBuilder;
use crate::ArchiveError;
use crate::Credentials;
use crate::ReaderConfig;
use crate::Result;
use crate::entry::Entry;
use crate::entry::EntryAttributes;
use crate::formats::ParseContext;
use crate::formats::common;
use crate::io::ByteSource;
use crate::io::SourceReader;
use crate::io::measured_size;
use crate::io::read_up_to;
use crate::pipeline::DecodeSession;
use crate::pipeline::open_decode_session;
use crate::recipe::Cipher;
use crate::recipe::Codec;
use crate::recipe::DataRange;
use crate::recipe::DecodeRecipe;
use crate::recipe::DecodeStep;
use crate::recipe::Verification;
use crate::types::EntryKind;
use crate::types::EntryPath;
use crate::volume::SpannedSource;

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;
const S_IFDIR: u32 = 0o040_000;

/// Name used for segment lookups when the source has no name.
const FALLBACK_BASE: &str = "archive";

/// Position and contents of the end of central directory record.
#[derive(Debug, Clone)]
pub(super) struct EndRecord {
    pub offset: u64,
    pub eocd: EndOfCentralDirectory,
    pub comment: Vec<u8>,
}

/// Scans the tail of `source` for the end of central directory record.
///
/// Returns `None` if no plausible record lies within
/// `config.max_probe_window` bytes of the end.
pub(super) fn find_end_record(
    source: &dyn ByteSource,
    config: &ReaderConfig,
) -> Result<Option<EndRecord>> {
    let size = measured_size(source)?;
    let window = size.min(config.max_probe_window);
    if window < EndOfCentralDirectory::SIZE as u64 {
        return Ok(None);
    }
    let start = size - window;
    let tail = read_up_to(source, start, window as usize)?;

    let last = tail.len() - EndOfCentralDirectory::SIZE;
    for at in (0..=last).rev() {
        if &tail[at..at + 4] != EndOfCentralDirectory::SIGNATURE {
            continue;
        }
        let Ok(eocd) = EndOfCentralDirectory::from_bytes(&tail[at..]) else {
            continue;
        };
        let comment_start = at + EndOfCentralDirectory::SIZE;
        let remaining = tail.len() - comment_start;
        if usize::from(eocd.comment_len) > remaining {
            continue;
        }
        let comment = tail[comment_start..comment_start + usize::from(eocd.comment_len)].to_vec();
        return Ok(Some(EndRecord {
            offset: start + at as u64,
            eocd,
            comment,
        }));
    }
    Ok(None)
}

/// Reads the ZIP64 locator preceding the end record, if present.
fn find_locator(source: &dyn ByteSource, end: &EndRecord) -> Result<Option<Zip64Locator>> {
    let Some(at) = end.offset.checked_sub(Zip64Locator::SIZE as u64) else {
        return Ok(None);
    };
    let mut buf = [0u8; Zip64Locator::SIZE];
    common::read_structure(source, at, &mut buf, "zip64 locator")?;
    Ok(Zip64Locator::from_bytes(&buf))
}

/// Directory location after ZIP64 and segment resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Directory {
    total_entries: u64,
    cd_size: u64,
    /// Offset of the central directory in the joined source.
    cd_offset: u64,
    /// Where the central directory should end: the ZIP64 record if any,
    /// else the end record.
    cd_end: u64,
}

/// The source entries live in, plus how stored offsets map onto it.
enum Layout {
    /// One physical file. Stored offsets are shifted by `delta`.
    Single { delta: u64 },
    /// Several segments joined back to back.
    Spanned(Arc<SpannedSource>),
}

impl Layout {
    fn locate(&self, disk: u32, offset: u64) -> Result<u64> {
        match self {
            Self::Single { delta } => offset
                .checked_add(*delta)
                .ok_or_else(|| ArchiveError::corrupt("zip offset overflows")),
            Self::Spanned(spanned) => spanned
                .logical_offset(disk as usize, offset)
                .ok_or_else(|| {
                    ArchiveError::corrupt(format!("offset {offset} outside segment {disk}"))
                }),
        }
    }
}

/// Parses the archive described by `ctx`.
pub(super) fn parse(format: &str, ctx: &ParseContext<'_>) -> Result<Archive> {
    let source: &dyn ByteSource = &**ctx.source;
    let end = find_end_record(source, ctx.config)?
        .ok_or_else(|| ArchiveError::corrupt("end of central directory record not found"))?;
    let locator = if end.eocd.needs_zip64() {
        find_locator(source, &end)?
    } else {
        None
    };

    let last_disk = match &locator {
        Some(locator) if end.eocd.disk_number == 0xFFFF => locator.total_disks.saturating_sub(1),
        _ => u32::from(end.eocd.disk_number),
    };

    let (data_source, layout, volumes) = if last_disk > 0 {
        let spanned = Arc::new(join_segments(ctx, last_disk)?);
        let data_source: Arc<dyn ByteSource> = spanned.clone();
        (data_source, Layout::Spanned(spanned), last_disk as usize + 1)
    } else {
        (Arc::clone(ctx.source), Layout::Single { delta: 0 }, 1)
    };

    let mut directory = read_directory(&*data_source, &end, locator.as_ref(), &layout)?;
    let layout = match layout {
        Layout::Single { .. } => {
            let delta = sfx_delta(&*data_source, &directory)?;
            directory.cd_offset += delta;
            Layout::Single { delta }
        }
        spanned => spanned,
    };

    if directory.total_entries > ctx.config.max_entries as u64 {
        return Err(ArchiveError::corrupt(format!(
            "archive declares {} entries, limit is {}",
            directory.total_entries, ctx.config.max_entries
        )));
    }
    if directory
        .total_entries
        .checked_mul(CentralHeader::FIXED_LEN as u64)
        .is_none_or(|min| min > directory.cd_size)
    {
        return Err(ArchiveError::corrupt(
            "central directory too small for its entry count",
        ));
    }

    let mut builder =
        ArchiveBuilder::new(format, Arc::clone(&data_source)).entry_limit(ctx.config.max_entries);
    builder.volume_count(volumes);
    builder.comment(Some(cp437::decode(&end.comment)));

    let reader = SourceReader::new(
        Arc::clone(&data_source),
        directory.cd_offset,
        Some(directory.cd_size),
    );
    let mut reader = BufReader::with_capacity(ctx.config.effective_chunk_size(), reader);
    for _ in 0..directory.total_entries {
        let header = CentralHeader::read(&mut reader)?;
        add_entry(&mut builder, &data_source, &layout, header, ctx.config)?;
    }

    Ok(builder.build())
}

/// Collects `name.z01 ... name.zNN` from the volume provider and appends
/// the source itself as the final segment.
fn join_segments(ctx: &ParseContext<'_>, last_disk: u32) -> Result<SpannedSource> {
    let base = segment_base(ctx.source_name());
    let mut segments = Vec::with_capacity(last_disk as usize + 1);
    for disk in 1..=last_disk {
        let volume = format!("{base}.z{disk:02}");
        let found = match ctx.volumes {
            Some(provider) => provider.volume(&volume)?,
            None => None,
        };
        let Some(segment) = found else {
            return Err(ArchiveError::MissingVolume { volume });
        };
        tracing::trace!(volume = %volume, "zip segment found");
        segments.push(segment);
    }
    segments.push(Arc::clone(ctx.source));
    SpannedSource::new(segments)
}

/// Base name segments share: the final segment's file name without its
/// `.zip` extension.
pub(super) fn segment_base(name: Option<&str>) -> String {
    let Some(name) = name else {
        return FALLBACK_BASE.to_string();
    };
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let base = match file_name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("zip") => stem,
        _ => file_name,
    };
    if base.is_empty() {
        FALLBACK_BASE.to_string()
    } else {
        base.to_string()
    }
}

fn read_directory(
    source: &dyn ByteSource,
    end: &EndRecord,
    locator: Option<&Zip64Locator>,
    layout: &Layout,
) -> Result<Directory> {
    let eocd = &end.eocd;
    if let Some(locator) = locator {
        let zip64_offset = layout.locate(locator.disk_with_eocd64, locator.eocd64_offset)?;
        let record = read_zip64_record(source, zip64_offset).or_else(|e| {
            // a prepended stub shifts the record too; it sits right before
            // the locator when it has no extensible data
            let fallback = end
                .offset
                .checked_sub((Zip64Locator::SIZE + Zip64EndOfCentralDirectory::MIN_SIZE) as u64);
            match fallback {
                Some(at) if at != zip64_offset => read_zip64_record(source, at),
                _ => Err(e),
            }
        })?;
        let (at, zip64) = record;
        return Ok(Directory {
            total_entries: zip64.total_entries,
            cd_size: zip64.cd_size,
            cd_offset: layout.locate(zip64.disk_with_cd, zip64.cd_offset)?,
            cd_end: at,
        });
    }

    if eocd.needs_zip64() {
        return Err(ArchiveError::corrupt("zip64 locator missing"));
    }
    Ok(Directory {
        total_entries: u64::from(eocd.total_entries),
        cd_size: u64::from(eocd.cd_size),
        cd_offset: layout.locate(u32::from(eocd.disk_with_cd), u64::from(eocd.cd_offset))?,
        cd_end: end.offset,
    })
}

fn read_zip64_record(source: &dyn ByteSource, at: u64) -> Result<(u64, Zip64EndOfCentralDirectory)> {
    let mut buf = [0u8; Zip64EndOfCentralDirectory::MIN_SIZE];
    common::read_structure(source, at, &mut buf, "zip64 end of central directory")?;
    Ok((at, Zip64EndOfCentralDirectory::from_bytes(&buf)?))
}

/// Length of any data prepended to the archive after it was written.
///
/// Zero when the central directory sits where the end record says it does.
fn sfx_delta(source: &dyn ByteSource, directory: &Directory) -> Result<u64> {
    if directory.total_entries == 0 || has_central_signature(source, directory.cd_offset)? {
        return Ok(0);
    }
    let expected_end = directory.cd_offset.saturating_add(directory.cd_size);
    if let Some(delta) = directory.cd_end.checked_sub(expected_end)
        && delta > 0
        && has_central_signature(source, directory.cd_offset + delta)?
    {
        tracing::warn!(delta, "zip offsets shifted by prepended data");
        return Ok(delta);
    }
    Err(ArchiveError::corrupt(format!(
        "central directory not found at offset {}",
        directory.cd_offset
    )))
}

fn has_central_signature(source: &dyn ByteSource, offset: u64) -> Result<bool> {
    Ok(read_up_to(source, offset, 4)? == CENTRAL_HEADER_SIGNATURE)
}

/// Structural check used by detection: an end record that closes the
/// source and whose directory can be found, possibly after a stub.
///
/// A ZIP stored inside another container is followed by the container's
/// own bytes, so its end record does not count.
pub(super) fn looks_like_zip(source: &dyn ByteSource, config: &ReaderConfig) -> Result<bool> {
    let Some(size) = source.size() else {
        return Ok(false);
    };
    if source.is_sequential() {
        return Ok(false);
    }
    let Some(end) = find_end_record(source, config)? else {
        return Ok(false);
    };
    let record_end = end.offset + EndOfCentralDirectory::SIZE as u64 + end.comment.len() as u64;
    if record_end != size {
        tracing::trace!(record_end, size, "zip end record does not close the source");
        return Ok(false);
    }
    if end.eocd.total_entries == 0 || end.eocd.disk_number > 0 {
        return Ok(true);
    }
    let locator = if end.eocd.needs_zip64() {
        find_locator(source, &end)?
    } else {
        None
    };
    let Ok(directory) = read_directory(source, &end, locator.as_ref(), &Layout::Single { delta: 0 })
    else {
        return Ok(false);
    };
    Ok(sfx_delta(source, &directory).is_ok())
}

/// Turns one central header into an entry, or a rejection.
fn add_entry(
    builder: &mut ArchiveBuilder,
    source: &Arc<dyn ByteSource>,
    layout: &Layout,
    header: CentralHeader,
    config: &ReaderConfig,
) -> Result<()> {
    let raw_name = header.decoded_name();
    let path = match EntryPath::parse(&raw_name) {
        Ok(path) => path,
        Err(rejection) => {
            builder.reject(raw_name, rejection.to_string());
            return Ok(());
        }
    };

    let header_offset = layout.locate(header.disk_start, header.local_offset)?;
    let mut local = [0u8; LOCAL_HEADER_LEN as usize];
    common::read_structure(&**source, header_offset, &mut local, "local file header")?;
    let data_offset = header_offset + local_data_start(&local)?;
    if let Some(total) = source.size()
        && data_offset.saturating_add(header.compressed_size) > total
    {
        return Err(ArchiveError::corrupt(format!(
            "data of {raw_name} extends past end of archive"
        )));
    }

    let recipe = recipe_for(&header, data_offset);
    let kind = kind_of(&header, &raw_name);
    let attributes = EntryAttributes {
        modified: header.modified(),
        unix_mode: header.unix_mode(),
        uid: header.extras.uid,
        gid: header.extras.gid,
        dos_attributes: Some(header.external_attrs & 0xFF),
        comment: Some(cp437::decode_name(
            &header.comment,
            header.flags & flags::UTF8 != 0,
        ))
        .filter(|c| !c.is_empty()),
        ..EntryAttributes::default()
    };

    let redetect = kind.is_file() && common::has_container_extension(&path);
    let mut entry = Entry::new(path, kind, recipe)
        .with_size(Some(header.uncompressed_size))
        .with_compressed_size(Some(header.compressed_size))
        .with_attributes(attributes)
        .with_redetect(redetect);

    if matches!(entry.kind(), EntryKind::Symlink { .. }) {
        if header.uncompressed_size > config.max_link_target {
            builder.reject(
                raw_name,
                format!("link target longer than {} bytes", config.max_link_target),
            );
            return Ok(());
        }
        let target = read_link_target(source, &entry, config);
        entry.set_kind(EntryKind::Symlink { target });
    }

    builder.push(entry)
}

/// Decodes a symlink's content. Encrypted or undecodable targets stay
/// unknown; the entry content still holds them.
fn read_link_target(source: &Arc<dyn ByteSource>, entry: &Entry, config: &ReaderConfig) -> Option<String> {
    if entry.is_encrypted() {
        return None;
    }
    let decoded = open_decode_session(source, entry, &Credentials::none(), config)
        .and_then(DecodeSession::read_all);
    match decoded {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::warn!(entry = %entry.path(), error = %e, "symlink target unreadable");
            None
        }
    }
}

fn kind_of(header: &CentralHeader, raw_name: &str) -> EntryKind {
    if raw_name.ends_with(['/', '\\']) {
        return EntryKind::Directory;
    }
    match header.unix_mode().map(|mode| mode & S_IFMT) {
        Some(S_IFLNK) => EntryKind::Symlink { target: None },
        Some(S_IFDIR) => EntryKind::Directory,
        _ => EntryKind::File,
    }
}

/// Maps header fields to the decode steps.
fn recipe_for(header: &CentralHeader, data_offset: u64) -> DecodeRecipe {
    let mut recipe = DecodeRecipe::new(DataRange::new(data_offset, header.compressed_size));

    if header.is_encrypted() {
        let cipher = if header.flags & flags::STRONG_ENCRYPTION != 0 {
            Cipher::Unsupported("pkware strong encryption".into())
        } else if header.method == 99 || header.extras.aes {
            Cipher::Unsupported("winzip-aes".into())
        } else {
            // with a data descriptor the CRC is not known when the
            // encryption header is written, so the time stands in for it
            let check_byte = if header.flags & flags::DATA_DESCRIPTOR != 0 {
                (header.dos_time >> 8) as u8
            } else {
                (header.crc32 >> 24) as u8
            };
            Cipher::ZipCrypto { check_byte }
        };
        recipe = recipe.then(DecodeStep::Decrypt(cipher));
        if header.method == 99 {
            // AES wraps the real method; nothing more to add
            return recipe;
        }
    }

    let codec = match header.method {
        0 => Codec::Store,
        8 => Codec::Deflate,
        12 => Codec::Bzip2,
        93 => Codec::Zstd,
        95 => Codec::Xz,
        9 => Codec::Unsupported("deflate64".into()),
        14 => Codec::Unsupported("lzma".into()),
        98 => Codec::Unsupported("ppmd".into()),
        other => Codec::Unsupported(format!("zip method {other}")),
    };
    recipe
        .then(DecodeStep::Decompress(codec))
        .then(DecodeStep::Verify(Verification {
            crc32: Some(header.crc32),
            size: Some(header.uncompressed_size),
        }))
}
