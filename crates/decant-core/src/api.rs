//! High-level public API for opening archives and decoding entries.

use std::path::Path;
use std::sync::Arc;

use crate::Archive;
use crate::ArchiveError;
use crate::Credentials;
use crate::ReaderConfig;
use crate::Result;
use crate::entry::Entry;
use crate::formats::FormatRegistry;
use crate::formats::ParseContext;
use crate::formats::detect;
use crate::formats::detect::Candidate;
use crate::formats::registry;
use crate::io::ByteSource;
use crate::io::DecodedSource;
use crate::io::FileSource;
use crate::pipeline::DecodeSession;
use crate::pipeline::open_decode_session;
use crate::volume::DirectoryVolumes;
use crate::volume::VolumeProvider;

/// Opens the archive at `path` with the process-wide registry and default
/// limits.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be opened
/// - No registered format recognizes it
/// - Its structures are corrupt or a volume is missing
///
/// # Examples
///
/// ```no_run
/// use decant_core::open_archive;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let archive = open_archive("comics.cbz")?;
/// for entry in archive.entries() {
///     println!("{} ({:?} bytes)", entry.path(), entry.size());
/// }
/// # Ok(())
/// # }
/// ```
pub fn open_archive<P: AsRef<Path>>(path: P) -> Result<Archive> {
    Unarchiver::new().open_path(path)
}

/// Hints for [`Unarchiver::open_with`].
#[derive(Clone, Copy, Default)]
pub struct OpenOptions<'a> {
    /// File name of the source, used to name single-stream payloads and
    /// to derive the names of sibling volumes.
    pub name: Option<&'a str>,
    /// Where further segments of a multi-volume archive come from.
    pub volumes: Option<&'a dyn VolumeProvider>,
}

impl<'a> OpenOptions<'a> {
    /// Sets the name hint.
    #[must_use]
    pub fn name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }

    /// Sets the volume provider.
    #[must_use]
    pub fn volumes(mut self, volumes: &'a dyn VolumeProvider) -> Self {
        self.volumes = Some(volumes);
        self
    }
}

/// Result of [`Unarchiver::extract`].
pub enum Extraction {
    /// The entry's decoded content.
    Content(DecodeSession),
    /// The entry's content is itself an archive, already opened.
    Nested(Archive),
}

impl Extraction {
    /// Returns the decode session, if this is plain content.
    pub fn into_content(self) -> Option<DecodeSession> {
        match self {
            Self::Content(session) => Some(session),
            Self::Nested(_) => None,
        }
    }

    /// Returns the inner archive, if the entry was one.
    pub fn into_nested(self) -> Option<Archive> {
        match self {
            Self::Content(_) => None,
            Self::Nested(archive) => Some(archive),
        }
    }
}

/// Detects, parses and decodes archives.
///
/// An `Unarchiver` is cheap to clone and holds no per-archive state; every
/// [`Archive`] it opens owns its own byte source.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use decant_core::io::MemorySource;
/// use decant_core::{Credentials, Unarchiver};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let gz = decant_core::test_utils::gzip(b"hello world");
/// let unarchiver = Unarchiver::new();
/// let archive = unarchiver.open(Arc::new(MemorySource::with_name(gz, "hello.txt.gz")))?;
///
/// let entry = archive.find("hello.txt")?;
/// assert_eq!(entry.size(), Some(11));
/// let session = unarchiver.open_entry(&archive, entry, &Credentials::none())?;
/// assert_eq!(session.read_all()?, b"hello world");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Unarchiver {
    registry: Arc<FormatRegistry>,
    config: ReaderConfig,
}

impl Default for Unarchiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Unarchiver {
    /// Creates an unarchiver over the process-wide registry with default
    /// limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: registry::global(),
            config: ReaderConfig::default(),
        }
    }

    /// Starts configuring an unarchiver.
    #[must_use]
    pub fn builder() -> UnarchiverBuilder {
        UnarchiverBuilder::default()
    }

    /// The registry consulted by detection.
    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// The limits in effect.
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Ranks the formats that recognize `source`, best first. Reads only.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the source cannot be read.
    pub fn detect(&self, source: &dyn ByteSource) -> Result<Vec<Candidate<'_>>> {
        detect::detect(&self.registry, source, &self.config)
    }

    /// Detects the format of `source` and parses it.
    ///
    /// # Errors
    ///
    /// Returns `UnrecognizedFormat` if nothing matches, or the parser's
    /// error (`CorruptArchive`, `MissingVolume`, ...).
    pub fn open(&self, source: Arc<dyn ByteSource>) -> Result<Archive> {
        self.open_with(source, OpenOptions::default())
    }

    /// [`open`](Self::open) with a name hint and volume provider.
    pub fn open_with(&self, source: Arc<dyn ByteSource>, options: OpenOptions<'_>) -> Result<Archive> {
        let descriptor = detect::detect_best(&self.registry, &*source, &self.config)?;
        let ctx = ParseContext {
            source: &source,
            name: options.name,
            volumes: options.volumes,
            config: &self.config,
        };
        tracing::debug!(
            format = descriptor.name(),
            source = ctx.source_name().unwrap_or("<unnamed>"),
            "opening archive"
        );
        descriptor.format().parse(&ctx)
    }

    /// Opens a file, looking for sibling volumes in its directory.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be opened, otherwise as
    /// [`open`](Self::open).
    pub fn open_path<P: AsRef<Path>>(&self, path: P) -> Result<Archive> {
        let path = path.as_ref();
        let source: Arc<dyn ByteSource> = Arc::new(FileSource::open(path)?);
        let volumes = DirectoryVolumes::beside(path);
        let name = path.file_name().and_then(|n| n.to_str());
        let options = OpenOptions {
            name,
            volumes: Some(&volumes),
        };
        self.open_with(source, options)
    }

    /// Opens a decode session over `entry`'s content, without re-detection.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFeature` if the entry uses a method this build
    /// does not implement. Credential and integrity errors surface from the
    /// session.
    pub fn open_entry(&self, archive: &Archive, entry: &Entry, credentials: &Credentials) -> Result<DecodeSession> {
        open_decode_session(archive.source(), entry, credentials, &self.config)
    }

    /// Decodes `entry`, opening it as an archive if it is marked for
    /// re-detection and its content is recognized.
    ///
    /// # Errors
    ///
    /// Returns `NestingTooDeep` if opening the inner archive would exceed
    /// `max_nesting_depth`, a credential error if detection cannot read the
    /// content, or the inner parser's error.
    pub fn extract(&self, archive: &Archive, entry: &Entry, credentials: &Credentials) -> Result<Extraction> {
        if !entry.redetect() {
            return self.open_entry(archive, entry, credentials).map(Extraction::Content);
        }

        let decoded: Arc<dyn ByteSource> = Arc::new(DecodedSource::new(
            Arc::clone(archive.source()),
            entry.clone(),
            credentials.clone(),
            self.config.clone(),
        ));
        let candidates = detect::detect(&self.registry, &*decoded, &self.config)?;
        let Some(best) = candidates.first() else {
            tracing::debug!(entry = %entry.path(), "nested content not an archive");
            return self.open_entry(archive, entry, credentials).map(Extraction::Content);
        };

        let depth = archive.depth() + 1;
        if depth > self.config.max_nesting_depth {
            return Err(ArchiveError::NestingTooDeep {
                depth,
                max: self.config.max_nesting_depth,
            });
        }

        tracing::debug!(
            entry = %entry.path(),
            format = best.descriptor.name(),
            depth,
            "opening nested archive"
        );
        let name = entry.path().file_name().to_string();
        let ctx = ParseContext {
            source: &decoded,
            name: Some(&name),
            volumes: None,
            config: &self.config,
        };
        let mut inner = best.descriptor.format().parse(&ctx)?;
        inner.mark_nested(depth);
        Ok(Extraction::Nested(inner))
    }
}

/// Builder for [`Unarchiver`].
#[derive(Debug, Clone, Default)]
pub struct UnarchiverBuilder {
    registry: Option<Arc<FormatRegistry>>,
    config: ReaderConfig,
}

impl UnarchiverBuilder {
    /// Uses `registry` instead of the process-wide one.
    #[must_use]
    pub fn registry(mut self, registry: Arc<FormatRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the limits.
    #[must_use]
    pub fn config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Finishes the unarchiver.
    #[must_use]
    pub fn build(self) -> Unarchiver {
        Unarchiver {
            registry: self.registry.unwrap_or_else(registry::global),
            config: self.config,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use crate::test_utils;

    fn mem(data: Vec<u8>, name: &str) -> Arc<dyn ByteSource> {
        Arc::new(MemorySource::with_name(data, name))
    }

    #[test]
    fn test_open_unrecognized() {
        let err = Unarchiver::new()
            .open(mem(b"just some text".to_vec(), "notes.txt"))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::UnrecognizedFormat));
    }

    #[test]
    fn test_extract_plain_payload_is_content() {
        let unarchiver = Unarchiver::new();
        let archive = unarchiver
            .open(mem(test_utils::gzip(b"plain text"), "notes.txt.gz"))
            .unwrap();
        let entry = &archive.entries()[0];
        assert!(entry.redetect());
        let session = unarchiver
            .extract(&archive, entry, &Credentials::none())
            .unwrap()
            .into_content()
            .unwrap();
        assert_eq!(session.read_all().unwrap(), b"plain text");
    }

    #[test]
    fn test_extract_nested_tar() {
        let tar = test_utils::TarBuilder::new().file("a.txt", b"inner").build();
        let unarchiver = Unarchiver::new();
        let outer = unarchiver
            .open(mem(test_utils::zstd(&tar), "bundle.tar.zst"))
            .unwrap();
        let inner = unarchiver
            .extract(&outer, &outer.entries()[0], &Credentials::none())
            .unwrap()
            .into_nested()
            .unwrap();
        assert_eq!(inner.format(), "tar");
        assert_eq!(inner.depth(), 1);
        assert!(inner.properties().solid);

        let entry = inner.find("a.txt").unwrap();
        let session = unarchiver
            .open_entry(&inner, entry, &Credentials::none())
            .unwrap();
        assert_eq!(session.read_all().unwrap(), b"inner");
    }

    #[test]
    fn test_nesting_limit() {
        let config = ReaderConfig {
            max_nesting_depth: 1,
            ..Default::default()
        };
        let unarchiver = Unarchiver::builder().config(config).build();
        let twice = test_utils::gzip(&test_utils::gzip(b"deep"));
        let outer = unarchiver.open(mem(twice, "x.gz.gz")).unwrap();
        let inner = unarchiver
            .extract(&outer, &outer.entries()[0], &Credentials::none())
            .unwrap()
            .into_nested()
            .unwrap();
        let err = unarchiver
            .extract(&inner, &inner.entries()[0], &Credentials::none())
            .err()
            .unwrap();
        assert!(matches!(err, ArchiveError::NestingTooDeep { depth: 2, max: 1 }));
    }

    #[test]
    fn test_plain_payload_at_nesting_limit_is_content() {
        let config = ReaderConfig {
            max_nesting_depth: 1,
            ..Default::default()
        };
        let unarchiver = Unarchiver::builder().config(config).build();
        let twice = test_utils::gzip(&test_utils::gzip(b"just notes"));
        let outer = unarchiver.open(mem(twice, "notes.txt.gz.gz")).unwrap();
        let inner = unarchiver
            .extract(&outer, &outer.entries()[0], &Credentials::none())
            .unwrap()
            .into_nested()
            .unwrap();
        assert_eq!(inner.depth(), 1);

        let session = unarchiver
            .extract(&inner, &inner.entries()[0], &Credentials::none())
            .unwrap()
            .into_content()
            .unwrap();
        assert_eq!(session.read_all().unwrap(), b"just notes");
    }

    #[test]
    fn test_open_path_with_name_hint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv.bz2");
        std::fs::write(&path, test_utils::bzip2(b"a,b\n")).unwrap();
        let archive = open_archive(&path).unwrap();
        assert_eq!(archive.format(), "bzip2");
        assert_eq!(archive.entries()[0].path().to_string(), "report.csv");
    }
}
