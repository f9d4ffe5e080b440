//! Decompression layers backed by the codec crates.

use std::io;
use std::io::BufReader;
use std::io::Read;

use super::gzip::GzipMembers;
use crate::ArchiveError;
use crate::ReaderConfig;
use crate::Result;
use crate::recipe::Codec;

/// Boxed reader used between pipeline layers.
pub(crate) type Layer = Box<dyn Read + Send>;

/// Wraps `inner` in the decoder for `codec`. `entry` names the entry in
/// integrity errors raised by self-checking codecs.
///
/// # Errors
///
/// Returns `UnsupportedFeature` for codecs this build does not implement.
pub(crate) fn decoder(
    codec: &Codec,
    inner: Layer,
    entry: &str,
    config: &ReaderConfig,
) -> Result<Layer> {
    let layer: Layer = match codec {
        Codec::Store => inner,
        Codec::Deflate => Box::new(CodecReader::new(
            "inflate",
            flate2::read::DeflateDecoder::new(inner),
        )),
        Codec::Gzip => Box::new(CodecReader::new(
            "gunzip",
            GzipMembers::new(
                BufReader::with_capacity(config.effective_chunk_size(), inner),
                entry.to_string(),
                config.max_header_size,
            ),
        )),
        Codec::Bzip2 => Box::new(CodecReader::new(
            "bunzip2",
            bzip2::read::MultiBzDecoder::new(inner),
        )),
        Codec::Xz => Box::new(CodecReader::new(
            "unxz",
            xz2::read::XzDecoder::new_multi_decoder(inner),
        )),
        Codec::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(inner)
                .map_err(|e| ArchiveError::corrupt(format!("unzstd: {e}")))?;
            Box::new(CodecReader::new("unzstd", decoder))
        }
        Codec::Unsupported(name) => return Err(ArchiveError::unsupported(name.clone())),
    };
    Ok(layer)
}

/// Turns decoder failures into `CorruptArchive` while letting errors that
/// already carry an `ArchiveError` (source failures, decryption failures)
/// pass through untouched.
struct CodecReader<R> {
    name: &'static str,
    inner: R,
}

impl<R> CodecReader<R> {
    fn new(name: &'static str, inner: R) -> Self {
        Self { name, inner }
    }
}

impl<R: Read> Read for CodecReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|e| {
            let carries_archive_error = e
                .get_ref()
                .is_some_and(|inner| inner.is::<ArchiveError>());
            if carries_archive_error || e.kind() == io::ErrorKind::Interrupted {
                e
            } else {
                ArchiveError::corrupt(format!("{}: {e}", self.name)).into_io()
            }
        })
    }
}
