//! ZIP archives.
//!
//! Supports ZIP64, self-extracting stubs, spanned segments
//! (`name.z01 ... name.zip`), traditional PKWARE encryption and the
//! stored, deflate, bzip2, zstd and xz methods. Entries are read from the
//! central directory; each local header is checked for its signature and
//! used only to find where the data starts.

pub mod cp437;
pub(crate) mod parser;
pub(crate) mod structures;

use super::ArchiveFormat;
use super::ParseContext;
use crate::Archive;
use crate::ReaderConfig;
use crate::Result;
use crate::io::ByteSource;
use structures::LOCAL_HEADER_SIGNATURE;
use structures::SINGLE_SEGMENT_SIGNATURE;
use structures::SPANNING_SIGNATURE;

/// The ZIP format family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZipFormat;

impl ZipFormat {
    /// Detection priority. Highest of the built-ins, so a ZIP wrapped in
    /// another recognizable stub still opens as ZIP.
    pub const PRIORITY: i32 = 100;
}

impl ArchiveFormat for ZipFormat {
    fn name(&self) -> &str {
        "zip"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn matches_signature(&self, header: &[u8]) -> bool {
        if header.starts_with(LOCAL_HEADER_SIGNATURE)
            || header.starts_with(structures::EndOfCentralDirectory::SIGNATURE)
        {
            return true;
        }
        // segment markers precede the first local header
        (header.starts_with(SPANNING_SIGNATURE) || header.starts_with(SINGLE_SEGMENT_SIGNATURE))
            && header.get(4..8) == Some(LOCAL_HEADER_SIGNATURE)
    }

    fn has_probe(&self) -> bool {
        true
    }

    fn probe(&self, source: &dyn ByteSource, config: &ReaderConfig) -> Result<bool> {
        parser::looks_like_zip(source, config)
    }

    fn parse(&self, ctx: &ParseContext<'_>) -> Result<Archive> {
        parser::parse(self.name(), ctx)
    }
}
