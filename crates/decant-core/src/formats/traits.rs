//! Capability interface implemented by every format family.

use std::sync::Arc;

use crate::Archive;
use crate::ReaderConfig;
use crate::Result;
use crate::io::ByteSource;
use crate::volume::VolumeProvider;

/// Everything a parser may consult while building an [`Archive`].
pub struct ParseContext<'a> {
    /// The bytes to parse.
    pub source: &'a Arc<dyn ByteSource>,
    /// Name hint for the source (file name), if any.
    pub name: Option<&'a str>,
    /// Provider for further segments of a multi-volume archive.
    pub volumes: Option<&'a dyn VolumeProvider>,
    /// Limits to honor.
    pub config: &'a ReaderConfig,
}

impl ParseContext<'_> {
    /// Name hint from the context, falling back to the source's own name.
    pub fn source_name(&self) -> Option<&str> {
        self.name.or_else(|| self.source.name())
    }
}

/// A format family: signature predicate, optional structural probe and
/// parser.
///
/// Implementations are registered once in a
/// [`FormatRegistry`](crate::formats::FormatRegistry) and shared for the
/// life of the process, so they hold no per-archive state.
pub trait ArchiveFormat: Send + Sync {
    /// Unique format name (e.g. `"zip"`).
    fn name(&self) -> &str;

    /// Detection priority. Higher values win when several formats match.
    fn priority(&self) -> i32;

    /// Returns `true` if the leading bytes of a source carry this format's
    /// fixed signature. `header` is at most the configured header window.
    fn matches_signature(&self, header: &[u8]) -> bool;

    /// Whether [`probe`](Self::probe) does anything. Formats without a
    /// structural probe keep the default.
    fn has_probe(&self) -> bool {
        false
    }

    /// Structural check for sources the signature predicate misses (e.g.
    /// a directory located by scanning backward from the end).
    ///
    /// Probes only read, and must bound how much they read by the limits in
    /// `config`.
    fn probe(&self, _source: &dyn ByteSource, _config: &ReaderConfig) -> Result<bool> {
        Ok(false)
    }

    /// Parses the source into an archive.
    ///
    /// # Errors
    ///
    /// Returns `CorruptArchive` for inconsistent structures and
    /// `MissingVolume` when a required segment is absent.
    fn parse(&self, ctx: &ParseContext<'_>) -> Result<Archive>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ArchiveBuilder;
    use crate::io::MemorySource;

    struct TestFormat;

    impl ArchiveFormat for TestFormat {
        fn name(&self) -> &str {
            "test"
        }

        fn priority(&self) -> i32 {
            1
        }

        fn matches_signature(&self, header: &[u8]) -> bool {
            header.starts_with(b"TEST")
        }

        fn parse(&self, ctx: &ParseContext<'_>) -> Result<Archive> {
            Ok(ArchiveBuilder::new(self.name(), Arc::clone(ctx.source)).build())
        }
    }

    #[test]
    fn test_trait_defaults() {
        let format = TestFormat;
        assert_eq!(format.name(), "test");
        assert!(!format.has_probe());
        let source = MemorySource::new(b"TEST".to_vec());
        assert!(!format.probe(&source, &ReaderConfig::default()).unwrap());
    }

    #[test]
    fn test_source_name_fallback() {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::with_name(Vec::new(), "a.test"));
        let config = ReaderConfig::default();
        let ctx = ParseContext {
            source: &source,
            name: None,
            volumes: None,
            config: &config,
        };
        assert_eq!(ctx.source_name(), Some("a.test"));
        assert_eq!(TestFormat.parse(&ctx).unwrap().format(), "test");
    }
}
