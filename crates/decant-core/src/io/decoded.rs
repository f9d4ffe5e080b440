//! Byte source over an entry's decoded content.
//!
//! Nested archives are parsed from the output of a decode session. Decoding
//! is sequential, so positional reads are served by a forward-only session:
//! reads ahead of the cursor skip decoded bytes, and reads behind it start
//! a new session from the beginning of the entry.
//!
//! The reported size is the one decoding enforces. A size the container
//! only hints at (the gzip trailer) is not reported.

use std::io;
use std::io::Read;
use std::sync::Arc;
use std::sync::Mutex;

use super::ByteSource;
use crate::Credentials;
use crate::ReaderConfig;
use crate::entry::Entry;
use crate::pipeline::DecodeSession;
use crate::pipeline::open_decode_session;

struct Cursor {
    session: DecodeSession,
    position: u64,
}

/// Positional view of one entry's decoded content.
pub struct DecodedSource {
    parent: Arc<dyn ByteSource>,
    entry: Entry,
    credentials: Credentials,
    config: ReaderConfig,
    name: String,
    cursor: Mutex<Option<Cursor>>,
}

impl DecodedSource {
    /// Creates a source decoding `entry` of an archive read from `parent`.
    pub fn new(
        parent: Arc<dyn ByteSource>,
        entry: Entry,
        credentials: Credentials,
        config: ReaderConfig,
    ) -> Self {
        let name = entry.path().file_name().to_string();
        Self {
            parent,
            entry,
            credentials,
            config,
            name,
            cursor: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn position(&self) -> Option<u64> {
        self.cursor.lock().ok()?.as_ref().map(|c| c.position)
    }

    fn restart(&self) -> io::Result<Cursor> {
        tracing::trace!(entry = %self.entry.path(), "restarting decoded source");
        let session = open_decode_session(&self.parent, &self.entry, &self.credentials, &self.config)
            .map_err(crate::ArchiveError::into_io)?;
        Ok(Cursor {
            session,
            position: 0,
        })
    }
}

impl ByteSource for DecodedSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut guard = self
            .cursor
            .lock()
            .map_err(|_| io::Error::other("decoded source lock poisoned"))?;

        let mut cursor = match guard.take() {
            Some(cursor) if cursor.position <= offset => cursor,
            _ => self.restart()?,
        };

        // Skip forward to the requested offset.
        let mut scratch = [0u8; 8192];
        while cursor.position < offset {
            let want = usize::try_from(offset - cursor.position)
                .unwrap_or(usize::MAX)
                .min(scratch.len());
            let n = cursor.session.read(&mut scratch[..want])?;
            if n == 0 {
                *guard = Some(cursor);
                return Ok(0);
            }
            cursor.position += n as u64;
        }

        let mut filled = 0;
        while filled < buf.len() {
            let n = cursor.session.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        cursor.position += filled as u64;
        *guard = Some(cursor);
        Ok(filled)
    }

    fn size(&self) -> Option<u64> {
        self.entry.recipe().enforced_size()
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn is_sequential(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use crate::io::read_exact_at;
    use crate::recipe::Codec;
    use crate::recipe::DataRange;
    use crate::recipe::DecodeRecipe;
    use crate::recipe::DecodeStep;
    use crate::recipe::Verification;
    use crate::test_utils;
    use crate::types::EntryKind;
    use crate::types::EntryPath;

    fn decoded(stored: Vec<u8>, recipe: DecodeRecipe, size: Option<u64>) -> DecodedSource {
        let parent: Arc<dyn ByteSource> = Arc::new(MemorySource::new(stored));
        let entry = Entry::new(EntryPath::parse("inner.tar").unwrap(), EntryKind::File, recipe)
            .with_size(size);
        DecodedSource::new(parent, entry, Credentials::none(), ReaderConfig::default())
    }

    fn zstd_source(content: &[u8]) -> DecodedSource {
        let stored = zstd::encode_all(content, 3).unwrap();
        let size = content.len() as u64;
        let recipe = DecodeRecipe::new(DataRange::new(0, stored.len() as u64))
            .then(DecodeStep::Decompress(Codec::Zstd))
            .then(DecodeStep::Verify(Verification {
                crc32: None,
                size: Some(size),
            }));
        decoded(stored, recipe, Some(size))
    }

    #[test]
    fn test_forward_and_backward_reads() {
        let content: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let source = zstd_source(&content);

        let mut buf = [0u8; 16];
        read_exact_at(&source, 40_000, &mut buf).unwrap();
        assert_eq!(&buf[..], &content[40_000..40_016]);

        read_exact_at(&source, 100, &mut buf).unwrap();
        assert_eq!(&buf[..], &content[100..116]);

        read_exact_at(&source, 116, &mut buf).unwrap();
        assert_eq!(&buf[..], &content[116..132]);
    }

    #[test]
    fn test_read_past_end() {
        let source = zstd_source(b"tiny");
        let mut buf = [0u8; 8];
        assert_eq!(source.read_at(10, &mut buf).unwrap(), 0);
        assert_eq!(source.read_at(2, &mut buf).unwrap(), 2);
        assert_eq!(source.size(), Some(4));
        assert_eq!(source.name(), Some("inner.tar"));
        assert!(source.is_sequential());
    }

    #[test]
    fn test_gzip_trailer_size_not_reported() {
        let mut stored = test_utils::gzip(&[1u8; 2048]);
        stored.extend([0u8; 512]);
        let recipe = DecodeRecipe::new(DataRange::to_end(0)).then(DecodeStep::Decompress(Codec::Gzip));
        // the trailer of the padded file reads as zero
        let source = decoded(stored, recipe, Some(0));
        assert_eq!(source.size(), None);
        assert_eq!(crate::io::measured_size(&source).unwrap(), 2048);
    }

    #[test]
    fn test_detection_reads_only_the_header() {
        let tar = test_utils::TarBuilder::new()
            .file("big.bin", &vec![0x5A; 256 * 1024])
            .build();
        let source = zstd_source(&tar);
        let registry = crate::formats::FormatRegistry::builtin();
        let config = ReaderConfig::default();
        let found = crate::formats::detect::detect(&registry, &source, &config).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].descriptor.name(), "tar");
        assert!(source.position().unwrap() <= config.header_window as u64);
    }
}
