//! Single-stream compression codecs.
//!
//! # Supported Codecs
//!
//! - **Gzip** (.gz, .tgz): deflate with a CRC-32 and size trailer
//! - **Bzip2** (.bz2, .tbz2): Burrows-Wheeler, possibly multi-stream
//! - **Xz** (.xz, .txz): LZMA2 with an index recording sizes
//! - **Zstd** (.zst, .tzst): Zstandard frames

use crate::recipe::Codec;

/// Compression codec of a single-stream compressed file.
///
/// # Examples
///
/// ```
/// use decant_core::formats::compression::CompressionCodec;
///
/// assert_eq!(CompressionCodec::Gzip.name(), "gzip");
/// assert!(CompressionCodec::Xz.matches_magic(&[0xFD, b'7', b'z', b'X', b'Z', 0x00]));
/// assert_eq!(CompressionCodec::Zstd.strip_suffix("data.tzst"), Some("data.tar".to_string()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionCodec {
    /// Gzip compression (deflate algorithm).
    Gzip,

    /// Bzip2 compression (Burrows-Wheeler algorithm).
    Bzip2,

    /// Xz compression (LZMA2 algorithm).
    Xz,

    /// Zstd compression (Zstandard algorithm).
    Zstd,
}

const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B, 0x08];
const XZ_MAGIC: &[u8] = &[0xFD, b'7', b'z', b'X', b'Z', 0x00];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xB5, 0x2F, 0xFD];

impl CompressionCodec {
    /// Human-readable codec name, also used as the registered format name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }

    /// File name suffixes, each paired with what replaces it when the
    /// payload name is derived from the compressed file's name.
    #[must_use]
    pub const fn suffixes(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Gzip => &[(".tgz", ".tar"), (".gz", "")],
            Self::Bzip2 => &[(".tbz2", ".tar"), (".tbz", ".tar"), (".bz2", ""), (".bz", "")],
            Self::Xz => &[(".txz", ".tar"), (".xz", "")],
            Self::Zstd => &[(".tzst", ".tar"), (".zst", "")],
        }
    }

    /// Returns `true` if `header` begins with this codec's magic bytes.
    #[must_use]
    pub fn matches_magic(self, header: &[u8]) -> bool {
        match self {
            Self::Gzip => header.starts_with(GZIP_MAGIC),
            // "BZh" followed by the block size digit
            Self::Bzip2 => {
                header.len() >= 4
                    && header.starts_with(b"BZh")
                    && (b'1'..=b'9').contains(&header[3])
            }
            Self::Xz => header.starts_with(XZ_MAGIC),
            Self::Zstd => header.starts_with(ZSTD_MAGIC),
        }
    }

    /// Decode step that undoes this compression.
    #[must_use]
    pub const fn codec(self) -> Codec {
        match self {
            Self::Gzip => Codec::Gzip,
            Self::Bzip2 => Codec::Bzip2,
            Self::Xz => Codec::Xz,
            Self::Zstd => Codec::Zstd,
        }
    }

    /// Derives the payload name from a compressed file name by removing a
    /// known suffix (`.tgz` becomes `.tar`). Matching is case-insensitive.
    #[must_use]
    pub fn strip_suffix(self, file_name: &str) -> Option<String> {
        let lower = file_name.to_ascii_lowercase();
        self.suffixes().iter().find_map(|(suffix, replacement)| {
            let stem_len = lower.len().checked_sub(suffix.len())?;
            (stem_len > 0 && lower.ends_with(suffix))
                .then(|| format!("{}{replacement}", &file_name[..stem_len]))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_name() {
        assert_eq!(CompressionCodec::Gzip.name(), "gzip");
        assert_eq!(CompressionCodec::Bzip2.name(), "bzip2");
        assert_eq!(CompressionCodec::Xz.name(), "xz");
        assert_eq!(CompressionCodec::Zstd.name(), "zstd");
    }

    #[test]
    fn test_magic() {
        assert!(CompressionCodec::Gzip.matches_magic(&[0x1F, 0x8B, 0x08, 0x00]));
        assert!(!CompressionCodec::Gzip.matches_magic(&[0x1F, 0x8B]));
        assert!(CompressionCodec::Bzip2.matches_magic(b"BZh91AY&SY"));
        assert!(!CompressionCodec::Bzip2.matches_magic(b"BZh0"));
        assert!(CompressionCodec::Zstd.matches_magic(&[0x28, 0xB5, 0x2F, 0xFD, 0x00]));
        assert!(!CompressionCodec::Xz.matches_magic(b""));
    }

    #[test]
    fn test_strip_suffix() {
        assert_eq!(
            CompressionCodec::Gzip.strip_suffix("hello.txt.gz").as_deref(),
            Some("hello.txt")
        );
        assert_eq!(
            CompressionCodec::Gzip.strip_suffix("Backup.TGZ").as_deref(),
            Some("Backup.tar")
        );
        assert_eq!(
            CompressionCodec::Bzip2.strip_suffix("a.tbz2").as_deref(),
            Some("a.tar")
        );
        assert_eq!(CompressionCodec::Xz.strip_suffix("plain.txt"), None);
        assert_eq!(CompressionCodec::Gzip.strip_suffix(".gz"), None);
    }

    #[test]
    fn test_codec_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(CompressionCodec::Gzip);
        set.insert(CompressionCodec::Bzip2);
        set.insert(CompressionCodec::Gzip); // Duplicate

        assert_eq!(set.len(), 2);
        assert!(set.contains(&CompressionCodec::Gzip));
    }
}
