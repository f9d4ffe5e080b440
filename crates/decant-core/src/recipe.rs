//! Decode recipes: the ordered transforms that turn stored bytes into
//! entry content.
//!
//! Parsers fully determine a recipe from header fields. The pipeline only
//! interprets it, so a recipe is plain data that can be displayed, compared
//! and inspected without touching the byte source.

use std::fmt;

/// Window of the byte source holding an entry's stored bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRange {
    /// Absolute offset of the first stored byte.
    pub offset: u64,
    /// Number of stored bytes, or `None` to read until the end of source.
    pub length: Option<u64>,
}

impl DataRange {
    /// A range of known length.
    pub const fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length: Some(length),
        }
    }

    /// A range running to the end of the source.
    pub const fn to_end(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }
}

/// Decryption step parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cipher {
    /// Traditional PKWARE stream cipher with a 12-byte encryption header.
    ZipCrypto {
        /// Value the last decrypted header byte must equal for a correct
        /// password.
        check_byte: u8,
    },
    /// A cipher this build does not implement. Opening a session fails.
    Unsupported(String),
}

/// Decompression step parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codec {
    /// Bytes are stored verbatim.
    Store,
    /// Raw deflate stream (32 KiB window).
    Deflate,
    /// One or more gzip members. Each member trailer is checked while
    /// decoding.
    Gzip,
    /// One or more concatenated bzip2 streams.
    Bzip2,
    /// One or more concatenated xz streams.
    Xz,
    /// One or more zstd frames.
    Zstd,
    /// A method this build does not implement. Opening a session fails.
    Unsupported(String),
}

/// Checks applied to the decoded content once it has been fully consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verification {
    /// Stored CRC-32 (IEEE) of the decoded content.
    pub crc32: Option<u32>,
    /// Stored size of the decoded content.
    pub size: Option<u64>,
}

impl Verification {
    /// Returns `true` if there is nothing to check.
    pub const fn is_empty(&self) -> bool {
        self.crc32.is_none() && self.size.is_none()
    }
}

/// One named transform step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStep {
    /// Decrypt stored bytes.
    Decrypt(Cipher),
    /// Decompress plaintext bytes.
    Decompress(Codec),
    /// Verify decoded content.
    Verify(Verification),
}

/// Stored byte range plus the ordered transform steps applied to it.
///
/// # Examples
///
/// ```
/// use decant_core::recipe::{Codec, DataRange, DecodeRecipe, DecodeStep, Verification};
///
/// let recipe = DecodeRecipe::new(DataRange::new(30, 13))
///     .then(DecodeStep::Decompress(Codec::Deflate))
///     .then(DecodeStep::Verify(Verification {
///         crc32: Some(0x0d4a_1185),
///         size: None,
///     }));
/// assert_eq!(recipe.to_string(), "[inflate, verify(crc32=0x0d4a1185)]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeRecipe {
    /// Where the stored bytes live.
    pub data: DataRange,
    /// Steps in application order (decrypt, decompress, verify).
    pub steps: Vec<DecodeStep>,
}

impl DecodeRecipe {
    /// A recipe with no steps over `data`.
    pub const fn new(data: DataRange) -> Self {
        Self {
            data,
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    #[must_use]
    pub fn then(mut self, step: DecodeStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Returns `true` if any step decrypts.
    pub fn is_encrypted(&self) -> bool {
        self.steps
            .iter()
            .any(|step| matches!(step, DecodeStep::Decrypt(_)))
    }

    /// First step that names a method this build cannot run.
    pub fn unsupported_step(&self) -> Option<&str> {
        self.steps.iter().find_map(|step| match step {
            DecodeStep::Decrypt(Cipher::Unsupported(name))
            | DecodeStep::Decompress(Codec::Unsupported(name)) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Returns `true` if decoding checks the content against stored
    /// integrity data, either in a verification step or inside a
    /// self-checking codec.
    pub fn is_verifiable(&self) -> bool {
        self.steps.iter().any(|step| match step {
            DecodeStep::Verify(v) => !v.is_empty(),
            DecodeStep::Decompress(Codec::Gzip) => true,
            _ => false,
        })
    }

    /// Length the decoded content is guaranteed to have.
    ///
    /// Known when a verification step checks the size, or when the stored
    /// bytes are the content. Sizes a decoder only hints at do not count.
    pub fn enforced_size(&self) -> Option<u64> {
        let verified = self.steps.iter().find_map(|step| match step {
            DecodeStep::Verify(v) => v.size,
            _ => None,
        });
        if verified.is_some() {
            return verified;
        }
        let verbatim = self
            .steps
            .iter()
            .all(|step| matches!(step, DecodeStep::Decompress(Codec::Store) | DecodeStep::Verify(_)));
        if verbatim { self.data.length } else { None }
    }
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZipCrypto { .. } => f.write_str("zipcrypto"),
            Self::Unsupported(name) => f.write_str(name),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => f.write_str("store"),
            Self::Deflate => f.write_str("inflate"),
            Self::Gzip => f.write_str("gunzip"),
            Self::Bzip2 => f.write_str("bunzip2"),
            Self::Xz => f.write_str("unxz"),
            Self::Zstd => f.write_str("unzstd"),
            Self::Unsupported(name) => f.write_str(name),
        }
    }
}

impl fmt::Display for DecodeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decrypt(cipher) => write!(f, "decrypt({cipher})"),
            Self::Decompress(codec) => write!(f, "{codec}"),
            Self::Verify(v) => {
                let mut parts = Vec::new();
                if let Some(crc) = v.crc32 {
                    parts.push(format!("crc32={crc:#010x}"));
                }
                if let Some(size) = v.size {
                    parts.push(format!("size={size}"));
                }
                write!(f, "verify({})", parts.join(", "))
            }
        }
    }
}

impl fmt::Display for DecodeRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self.steps.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", steps.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zipcrypto_deflate() -> DecodeRecipe {
        DecodeRecipe::new(DataRange::new(0, 100))
            .then(DecodeStep::Decrypt(Cipher::ZipCrypto { check_byte: 0xAB }))
            .then(DecodeStep::Decompress(Codec::Deflate))
            .then(DecodeStep::Verify(Verification {
                crc32: Some(0x1234_abcd),
                size: Some(42),
            }))
    }

    #[test]
    fn test_recipe_display() {
        assert_eq!(
            zipcrypto_deflate().to_string(),
            "[decrypt(zipcrypto), inflate, verify(crc32=0x1234abcd, size=42)]"
        );
    }

    #[test]
    fn test_recipe_flags() {
        let recipe = zipcrypto_deflate();
        assert!(recipe.is_encrypted());
        assert!(recipe.is_verifiable());
        assert_eq!(recipe.unsupported_step(), None);

        let plain = DecodeRecipe::new(DataRange::to_end(0)).then(DecodeStep::Decompress(Codec::Bzip2));
        assert!(!plain.is_encrypted());
        assert!(!plain.is_verifiable());

        let gzip = DecodeRecipe::new(DataRange::to_end(0)).then(DecodeStep::Decompress(Codec::Gzip));
        assert!(gzip.is_verifiable());
        assert_eq!(gzip.to_string(), "[gunzip]");
    }

    #[test]
    fn test_enforced_size() {
        assert_eq!(zipcrypto_deflate().enforced_size(), Some(42));
        assert_eq!(DecodeRecipe::new(DataRange::new(512, 7)).enforced_size(), Some(7));

        let gzip = DecodeRecipe::new(DataRange::to_end(0)).then(DecodeStep::Decompress(Codec::Gzip));
        assert_eq!(gzip.enforced_size(), None);

        let crc_only = DecodeRecipe::new(DataRange::new(0, 9))
            .then(DecodeStep::Decompress(Codec::Deflate))
            .then(DecodeStep::Verify(Verification {
                crc32: Some(1),
                size: None,
            }));
        assert_eq!(crc_only.enforced_size(), None);
    }

    #[test]
    fn test_unsupported_step_is_reported() {
        let recipe = DecodeRecipe::new(DataRange::new(0, 1))
            .then(DecodeStep::Decompress(Codec::Unsupported("deflate64".into())));
        assert_eq!(recipe.unsupported_step(), Some("deflate64"));
    }
}
