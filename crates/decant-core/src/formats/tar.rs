//! Tar archives: v7, ustar, GNU and PAX.
//!
//! A tar archive is a sequence of 512-byte header blocks, each followed by
//! the entry data padded to a block boundary. Metadata records (GNU long
//! names and links, PAX extended headers) modify the entry that follows
//! them; PAX global headers modify every following entry.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::ArchiveFormat;
use super::ParseContext;
use super::common;
use crate::Archive;
use crate::ArchiveBuilder;
use crate::ArchiveError;
use crate::ReaderConfig;
use crate::Result;
use crate::entry::Entry;
use crate::entry::EntryAttributes;
use crate::io::ByteSource;
use crate::io::read_up_to;
use crate::recipe::Codec;
use crate::recipe::DataRange;
use crate::recipe::DecodeRecipe;
use crate::recipe::DecodeStep;
use crate::types::EntryKind;
use crate::types::EntryPath;

const BLOCK_LEN: usize = 512;
const BLOCK: u64 = BLOCK_LEN as u64;

const USTAR_MAGIC: &[u8] = b"ustar";
const USTAR_MAGIC_OFFSET: usize = 257;
const POSIX_MAGIC: &[u8] = b"ustar\0";
const CHECKSUM_FIELD: std::ops::Range<usize> = 148..156;

const PAX_XATTR_PREFIX: &str = "SCHILY.xattr.";

/// Tar format family.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarFormat;

impl TarFormat {
    /// Detection priority.
    pub const PRIORITY: i32 = 80;
}

impl ArchiveFormat for TarFormat {
    fn name(&self) -> &str {
        "tar"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn matches_signature(&self, header: &[u8]) -> bool {
        header.len() >= BLOCK_LEN
            && &header[USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + USTAR_MAGIC.len()] == USTAR_MAGIC
            && checksum_matches(&header[..BLOCK_LEN])
    }

    fn has_probe(&self) -> bool {
        true
    }

    /// Pre-POSIX archives carry no magic. The first block must be a
    /// plausible header: a name, numeric size field and a valid checksum.
    fn probe(&self, source: &dyn ByteSource, _config: &ReaderConfig) -> Result<bool> {
        let block = read_up_to(source, 0, BLOCK_LEN)?;
        if block.len() < BLOCK_LEN || block[0] == 0 {
            return Ok(false);
        }
        Ok(checksum_matches(&block) && parse_numeric(&block[124..136]).is_ok())
    }

    fn parse(&self, ctx: &ParseContext<'_>) -> Result<Archive> {
        TarParser::new(ctx).run()
    }
}

/// Computes the header checksum with the checksum field read as spaces.
/// Old writers summed signed bytes, so both sums are accepted.
fn checksum_matches(block: &[u8]) -> bool {
    let Ok(stored) = parse_numeric(&block[CHECKSUM_FIELD]) else {
        return false;
    };
    let (unsigned, signed) = block.iter().enumerate().fold((0u64, 0i64), |(u, s), (i, &b)| {
        let b = if CHECKSUM_FIELD.contains(&i) { b' ' } else { b };
        (u + u64::from(b), s + i64::from(i8::from_ne_bytes([b])))
    });
    stored == unsigned || i64::try_from(stored).is_ok_and(|stored| stored == signed)
}

/// Parses an octal field, or a base-256 field when the high bit of the
/// first byte is set (GNU extension for values that do not fit).
fn parse_numeric(field: &[u8]) -> Result<u64> {
    if let Some(&first) = field.first()
        && first & 0x80 != 0
    {
        if first & 0x40 != 0 {
            return Err(ArchiveError::corrupt("negative tar numeric field"));
        }
        return field[1..]
            .iter()
            .try_fold(u64::from(first & 0x3F), |acc, &b| {
                acc.checked_mul(256).map(|v| v | u64::from(b))
            })
            .ok_or_else(|| ArchiveError::corrupt("tar numeric field overflows"));
    }

    let digits = field
        .iter()
        .copied()
        .skip_while(|&b| b == b' ')
        .take_while(|&b| b != 0 && b != b' ');
    let mut value: u64 = 0;
    for b in digits {
        if !(b'0'..=b'7').contains(&b) {
            return Err(ArchiveError::corrupt(format!(
                "invalid octal digit {:?} in tar header",
                char::from(b)
            )));
        }
        value = value
            .checked_mul(8)
            .map(|v| v | u64::from(b - b'0'))
            .ok_or_else(|| ArchiveError::corrupt("tar numeric field overflows"))?;
    }
    Ok(value)
}

fn field_bytes(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

fn field_string(field: &[u8]) -> String {
    String::from_utf8_lossy(field_bytes(field)).into_owned()
}

/// Parses PAX records of the form `"<len> <key>=<value>\n"`.
fn parse_pax_records(data: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut records = BTreeMap::new();
    let mut rest = data;
    while !rest.is_empty() {
        // trailing NUL padding written by some archivers
        if rest.iter().all(|&b| b == 0) {
            break;
        }
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| ArchiveError::corrupt("malformed PAX record length"))?;
        let len: usize = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&len| len > space + 1 && len <= rest.len())
            .ok_or_else(|| ArchiveError::corrupt("malformed PAX record length"))?;
        let record = &rest[space + 1..len];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        let eq = record
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| ArchiveError::corrupt("PAX record without '='"))?;
        let key = String::from_utf8_lossy(&record[..eq]).into_owned();
        records.insert(key, record[eq + 1..].to_vec());
        rest = &rest[len..];
    }
    Ok(records)
}

fn pax_number(records: &BTreeMap<String, Vec<u8>>, key: &str) -> Option<u64> {
    std::str::from_utf8(records.get(key)?).ok()?.trim().parse().ok()
}

/// PAX times are decimal seconds with an optional fraction.
fn pax_time(records: &BTreeMap<String, Vec<u8>>, key: &str) -> Option<i64> {
    let text = std::str::from_utf8(records.get(key)?).ok()?;
    let whole = text.split('.').next()?;
    whole.trim().parse().ok()
}

/// Metadata waiting to be applied to the next real entry.
#[derive(Default)]
struct Pending {
    long_name: Option<String>,
    long_link: Option<String>,
    pax: BTreeMap<String, Vec<u8>>,
}

struct TarParser<'a> {
    source: &'a Arc<dyn ByteSource>,
    config: &'a ReaderConfig,
    builder: ArchiveBuilder,
    pending: Pending,
    global: BTreeMap<String, Vec<u8>>,
    offset: u64,
}

impl<'a> TarParser<'a> {
    fn new(ctx: &'a ParseContext<'a>) -> Self {
        Self {
            source: ctx.source,
            config: ctx.config,
            builder: ArchiveBuilder::new("tar", Arc::clone(ctx.source))
                .entry_limit(ctx.config.max_entries),
            pending: Pending::default(),
            global: BTreeMap::new(),
            offset: 0,
        }
    }

    fn run(mut self) -> Result<Archive> {
        let total = self.source.size();
        loop {
            let block = read_up_to(&**self.source, self.offset, BLOCK_LEN)?;
            if block.is_empty() {
                if self.offset == 0 {
                    return Err(ArchiveError::corrupt("empty tar archive"));
                }
                tracing::warn!(offset = self.offset, "tar archive has no end-of-archive marker");
                break;
            }
            if block.iter().all(|&b| b == 0) {
                break;
            }
            if block.len() < BLOCK_LEN {
                return Err(ArchiveError::corrupt(format!(
                    "tar header truncated at offset {}",
                    self.offset
                )));
            }
            if !checksum_matches(&block) {
                return Err(ArchiveError::corrupt(format!(
                    "tar header checksum mismatch at offset {}",
                    self.offset
                )));
            }

            let header_offset = self.offset;
            let data_offset = header_offset + BLOCK;
            let mut size = parse_numeric(&block[124..136])?;
            let typeflag = block[156];

            match typeflag {
                b'L' | b'K' | b'x' | b'g' => {
                    let data = self.read_metadata(data_offset, size)?;
                    self.absorb_metadata(typeflag, &data)?;
                }
                _ => {
                    let pax = self.effective_pax();
                    if let Some(pax_size) = pax_number(&pax, "size") {
                        size = pax_size;
                    }
                    self.emit(&block, data_offset, size, &pax)?;
                }
            }

            let padded = size
                .checked_add(BLOCK - 1)
                .map(|n| n / BLOCK * BLOCK)
                .ok_or_else(|| ArchiveError::corrupt("tar entry size overflows"))?;
            let next = data_offset
                .checked_add(padded)
                .ok_or_else(|| ArchiveError::corrupt("tar entry size overflows"))?;
            if let Some(total) = total
                && data_offset + size > total
            {
                return Err(ArchiveError::corrupt(format!(
                    "tar entry data at offset {data_offset} runs past end of archive"
                )));
            }
            self.offset = next;
        }

        Ok(self.builder.build())
    }

    fn read_metadata(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        if size > self.config.max_header_size {
            return Err(ArchiveError::corrupt(format!(
                "tar metadata record of {size} bytes exceeds limit"
            )));
        }
        let mut data = vec![0u8; size as usize];
        common::read_structure(&**self.source, offset, &mut data, "tar metadata record")?;
        Ok(data)
    }

    fn absorb_metadata(&mut self, typeflag: u8, data: &[u8]) -> Result<()> {
        match typeflag {
            b'L' => self.pending.long_name = Some(field_string(data)),
            b'K' => self.pending.long_link = Some(field_string(data)),
            b'x' => self.pending.pax.extend(parse_pax_records(data)?),
            _ => {
                let mut records = parse_pax_records(data)?;
                // per-entry keys make no sense archive-wide
                for key in ["path", "linkpath", "size"] {
                    records.remove(key);
                }
                self.global.extend(records);
            }
        }
        Ok(())
    }

    fn effective_pax(&self) -> BTreeMap<String, Vec<u8>> {
        let mut pax = self.global.clone();
        pax.extend(self.pending.pax.iter().map(|(k, v)| (k.clone(), v.clone())));
        pax
    }

    fn emit(
        &mut self,
        block: &[u8],
        data_offset: u64,
        size: u64,
        pax: &BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let typeflag = block[156];

        let name = pax
            .get("path")
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .or(pending.long_name)
            .unwrap_or_else(|| {
                let name = field_string(&block[..100]);
                let prefix = field_string(&block[345..500]);
                if &block[USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + 6] == POSIX_MAGIC
                    && !prefix.is_empty()
                {
                    format!("{prefix}/{name}")
                } else {
                    name
                }
            });
        let link = pax
            .get("linkpath")
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .or(pending.long_link)
            .unwrap_or_else(|| field_string(&block[157..257]));

        let kind = match typeflag {
            b'0' | 0 | b'7' if name.ends_with('/') => EntryKind::Directory,
            b'1' => EntryKind::Hardlink { target: link.clone() },
            b'2' => EntryKind::Symlink {
                target: Some(link.clone()),
            },
            b'5' | b'D' => EntryKind::Directory,
            b'3' => return self.reject(name, "character device"),
            b'4' => return self.reject(name, "block device"),
            b'6' => return self.reject(name, "fifo"),
            b'S' => return self.reject(name, "sparse file"),
            b'M' => return self.reject(name, "multi-volume continuation"),
            b'V' => {
                tracing::trace!(label = %name, "tar volume label");
                return Ok(());
            }
            // unknown types are read as regular files
            _ => EntryKind::File,
        };

        if (kind.is_symlink() || kind.is_hardlink())
            && link.len() as u64 > self.config.max_link_target
        {
            return self.reject(name, "link target exceeds limit");
        }

        let path = match EntryPath::parse(&name) {
            Ok(path) => path,
            Err(rejection) => return self.reject(name, rejection.to_string()),
        };

        let content_len = if kind.is_file() { size } else { 0 };
        let recipe = DecodeRecipe::new(DataRange::new(data_offset, content_len))
            .then(DecodeStep::Decompress(Codec::Store));
        let redetect = kind.is_file() && common::has_container_extension(&path);
        let entry = Entry::new(path, kind, recipe)
            .with_size(Some(content_len))
            .with_compressed_size(Some(content_len))
            .with_attributes(attributes(block, pax)?)
            .with_redetect(redetect);
        self.builder.push(entry)
    }

    fn reject(&mut self, name: String, reason: impl Into<String>) -> Result<()> {
        self.builder.reject(name, reason);
        Ok(())
    }
}

fn attributes(block: &[u8], pax: &BTreeMap<String, Vec<u8>>) -> Result<EntryAttributes> {
    let mtime = pax_time(pax, "mtime")
        .or_else(|| parse_numeric(&block[136..148]).ok().and_then(|t| i64::try_from(t).ok()));
    let uname = pax
        .get("uname")
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .or_else(|| Some(field_string(&block[265..297])).filter(|s| !s.is_empty()));
    let gname = pax
        .get("gname")
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .or_else(|| Some(field_string(&block[297..329])).filter(|s| !s.is_empty()));

    let xattrs = pax
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(PAX_XATTR_PREFIX)
                .map(|name| (name.to_string(), value.clone()))
        })
        .collect();

    Ok(EntryAttributes {
        modified: mtime.and_then(common::unix_time),
        unix_mode: Some(parse_numeric(&block[100..108])? as u32),
        uid: pax_number(pax, "uid").or(Some(parse_numeric(&block[108..116])?)),
        gid: pax_number(pax, "gid").or(Some(parse_numeric(&block[116..124])?)),
        user_name: uname,
        group_name: gname,
        xattrs,
        ..EntryAttributes::default()
    })
}
