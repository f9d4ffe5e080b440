//! Streaming decode pipeline.
//!
//! A session is assembled from an entry's [`DecodeRecipe`] by stacking one
//! reader per step over the stored byte range, in recipe order:
//!
//! ```text
//! SourceReader -> decrypt -> decompress -> verify -> DecodeSession
//! ```
//!
//! Nothing is read while the session is opened. Credentials are checked on
//! the first chunk request, and checksums once the content is exhausted.
//!
//! [`DecodeRecipe`]: crate::recipe::DecodeRecipe

pub mod cipher;
pub(crate) mod codec;
pub mod gzip;
pub mod session;
pub(crate) mod verify;

use std::sync::Arc;

pub use session::DecodeSession;

use crate::ArchiveError;
use crate::Credentials;
use crate::ReaderConfig;
use crate::Result;
use crate::entry::Entry;
use crate::io::ByteSource;
use crate::io::SourceReader;
use crate::recipe::Cipher;
use crate::recipe::DecodeStep;
use codec::Layer;

/// Opens a fresh decode session for `entry`, reading stored bytes from
/// `source`.
///
/// # Errors
///
/// Returns `UnsupportedFeature` if the recipe names a cipher or codec this
/// build does not implement. Credential and integrity failures are reported
/// by the session itself.
pub fn open_decode_session(
    source: &Arc<dyn ByteSource>,
    entry: &Entry,
    credentials: &Credentials,
    config: &ReaderConfig,
) -> Result<DecodeSession> {
    let recipe = entry.recipe();
    if let Some(feature) = recipe.unsupported_step() {
        return Err(ArchiveError::unsupported(feature));
    }

    let name = entry.path().to_string();
    let mut layer: Layer = Box::new(SourceReader::new(
        Arc::clone(source),
        recipe.data.offset,
        recipe.data.length,
    ));

    for step in &recipe.steps {
        layer = match step {
            DecodeStep::Decrypt(Cipher::ZipCrypto { check_byte }) => {
                let password = credentials.for_entry(entry.path()).map(<[u8]>::to_vec);
                Box::new(cipher::ZipCryptoReader::new(
                    layer,
                    password,
                    *check_byte,
                    name.clone(),
                ))
            }
            DecodeStep::Decrypt(Cipher::Unsupported(feature)) => {
                return Err(ArchiveError::unsupported(feature.clone()));
            }
            DecodeStep::Decompress(codec) => codec::decoder(codec, layer, &name, config)?,
            DecodeStep::Verify(expected) => {
                Box::new(verify::VerifyReader::new(layer, *expected, name.clone()))
            }
        };
    }

    tracing::trace!(entry = %name, recipe = %recipe, "decode session opened");
    Ok(DecodeSession::new(
        layer,
        name,
        recipe.is_encrypted(),
        config.effective_chunk_size(),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::Mismatch;
    use crate::io::MemorySource;
    use crate::recipe::Codec;
    use crate::recipe::DataRange;
    use crate::recipe::DecodeRecipe;
    use crate::recipe::Verification;
    use crate::types::EntryKind;
    use crate::types::EntryPath;

    fn crc_of(data: &[u8]) -> u32 {
        let mut crc = flate2::Crc::new();
        crc.update(data);
        crc.sum()
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn entry_over(stored_len: u64, prefix: u64, steps: Vec<DecodeStep>) -> Entry {
        let mut recipe = DecodeRecipe::new(DataRange::new(prefix, stored_len));
        recipe.steps = steps;
        Entry::new(EntryPath::parse("e.txt").unwrap(), EntryKind::File, recipe)
    }

    #[test]
    fn test_inflate_and_verify() {
        let content = b"hello world";
        let mut stored = b"JUNK".to_vec();
        stored.extend(deflate(content));
        let stored_len = stored.len() as u64 - 4;
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(stored));

        let entry = entry_over(
            stored_len,
            4,
            vec![
                DecodeStep::Decompress(Codec::Deflate),
                DecodeStep::Verify(Verification {
                    crc32: Some(crc_of(content)),
                    size: Some(11),
                }),
            ],
        );
        let session =
            open_decode_session(&source, &entry, &Credentials::none(), &ReaderConfig::default())
                .unwrap();
        assert_eq!(session.read_all().unwrap(), content);
    }

    #[test]
    fn test_flipped_byte_is_integrity_mismatch() {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(b"hellp world".to_vec()));
        let entry = entry_over(
            11,
            0,
            vec![
                DecodeStep::Decompress(Codec::Store),
                DecodeStep::Verify(Verification {
                    crc32: Some(crc_of(b"hello world")),
                    size: None,
                }),
            ],
        );
        let err =
            open_decode_session(&source, &entry, &Credentials::none(), &ReaderConfig::default())
                .unwrap()
                .read_all()
                .unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::IntegrityMismatch {
                mismatch: Mismatch::Crc32 { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_unsupported_fails_at_open() {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(Vec::new()));
        let entry = entry_over(
            0,
            0,
            vec![DecodeStep::Decrypt(Cipher::Unsupported("aes-256".into()))],
        );
        let err =
            open_decode_session(&source, &entry, &Credentials::none(), &ReaderConfig::default())
                .unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedFeature { .. }));
    }

    #[test]
    fn test_missing_password_surfaces_on_first_chunk() {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(vec![0u8; 20]));
        let entry = entry_over(
            20,
            0,
            vec![
                DecodeStep::Decrypt(Cipher::ZipCrypto { check_byte: 0 }),
                DecodeStep::Decompress(Codec::Store),
            ],
        );
        let mut session =
            open_decode_session(&source, &entry, &Credentials::none(), &ReaderConfig::default())
                .unwrap();
        assert!(matches!(
            session.next_chunk(),
            Err(ArchiveError::AuthenticationRequired { .. })
        ));
    }

    #[test]
    fn test_truncated_source_is_corrupt() {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(b"short".to_vec()));
        let entry = entry_over(100, 0, vec![DecodeStep::Decompress(Codec::Store)]);
        let err =
            open_decode_session(&source, &entry, &Credentials::none(), &ReaderConfig::default())
                .unwrap()
                .read_all()
                .unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptArchive { .. }));
    }
}
