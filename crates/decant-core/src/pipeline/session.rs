//! Pull-based decode sessions.

use std::fmt;
use std::io;
use std::io::Read;

use super::codec::Layer;
use crate::ArchiveError;
use crate::Result;

/// One in-progress decode of one entry.
///
/// A session produces the entry's content in chunks, on demand. It is
/// single-pass: once it has returned the end of stream or an error it is
/// finished and every decoder, cipher and checksum state it held has been
/// released. Decoding the entry again requires a new session.
///
/// Integrity failures are trailing-edge: every chunk returned before the
/// error is valid content.
///
/// Sessions are also `Iterator<Item = Result<Vec<u8>>>` and `std::io::Read`.
pub struct DecodeSession {
    inner: Option<Layer>,
    entry: String,
    encrypted: bool,
    chunk_size: usize,
    pending: Option<ArchiveError>,
    produced: u64,
}

impl DecodeSession {
    pub(crate) fn new(inner: Layer, entry: String, encrypted: bool, chunk_size: usize) -> Self {
        Self {
            inner: Some(inner),
            entry,
            encrypted,
            chunk_size,
            pending: None,
            produced: 0,
        }
    }

    /// Produces the next chunk of decoded content.
    ///
    /// Returns `Ok(None)` at the end of the content and on every call after
    /// the session has finished.
    ///
    /// # Errors
    ///
    /// Returns the first error the pipeline detects. Bytes decoded before
    /// the error are returned by the preceding call.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(err) = self.pending.take() {
            return Err(err);
        }
        let Some(reader) = self.inner.as_mut() else {
            return Ok(None);
        };

        let mut chunk = vec![0u8; self.chunk_size];
        let mut filled = 0;
        let mut failure = None;
        let mut at_end = false;
        while filled < chunk.len() {
            match reader.read(&mut chunk[filled..]) {
                Ok(0) => {
                    at_end = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if at_end {
            self.inner = None;
        }

        if let Some(e) = failure {
            self.inner = None;
            let err = self.classify(e);
            if filled == 0 {
                return Err(err);
            }
            self.pending = Some(err);
        }

        if filled == 0 {
            return Ok(None);
        }
        chunk.truncate(filled);
        self.produced += filled as u64;
        Ok(Some(chunk))
    }

    /// Consumes the session and collects the remaining content.
    ///
    /// # Errors
    ///
    /// Returns the first error the pipeline detects.
    pub fn read_all(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Number of decoded bytes produced so far.
    pub fn bytes_produced(&self) -> u64 {
        self.produced
    }

    /// Returns `true` once the session has finished.
    pub fn is_finished(&self) -> bool {
        self.inner.is_none() && self.pending.is_none()
    }

    /// Path of the entry being decoded.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Ends the session early and releases its state.
    pub fn close(self) {}

    fn classify(&self, e: io::Error) -> ArchiveError {
        let err = ArchiveError::from(e);
        // The password passed its check before any content was decoded, so
        // damage stays damage. A wrong password that slips past the
        // one-byte check also ends here.
        if self.encrypted && err.is_damage() {
            tracing::debug!(entry = %self.entry, error = %err, "damage in encrypted entry");
        }
        err
    }
}

impl Iterator for DecodeSession {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

impl std::iter::FusedIterator for DecodeSession {}

impl Read for DecodeSession {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = self.pending.take() {
            return Err(err.into_io());
        }
        let Some(reader) = self.inner.as_mut() else {
            return Ok(0);
        };
        match reader.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.inner = None;
                Ok(0)
            }
            Ok(n) => {
                self.produced += n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(e) => {
                self.inner = None;
                Err(self.classify(e).into_io())
            }
        }
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        tracing::trace!(
            entry = %self.entry,
            produced = self.produced,
            finished = self.inner.is_none(),
            "decode session closed"
        );
    }
}

impl fmt::Debug for DecodeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeSession")
            .field("entry", &self.entry)
            .field("produced", &self.produced)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}
