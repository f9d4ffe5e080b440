//! Error types for archive detection, parsing and decoding.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias using `ArchiveError`.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Describes which integrity check failed once an entry was fully decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// The CRC-32 of the decoded bytes differs from the stored value.
    Crc32 {
        /// Checksum recorded in the archive.
        expected: u32,
        /// Checksum of the bytes actually produced.
        actual: u32,
    },
    /// The number of decoded bytes differs from the declared size.
    Size {
        /// Size recorded in the archive.
        expected: u64,
        /// Number of bytes actually produced.
        actual: u64,
    },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crc32 { expected, actual } => {
                write!(f, "crc32 expected {expected:#010x}, got {actual:#010x}")
            }
            Self::Size { expected, actual } => {
                write!(f, "size expected {expected} bytes, got {actual} bytes")
            }
        }
    }
}

/// Broad grouping of errors by the remediation they call for.
///
/// Embedding layers should tell "cannot understand this file" apart from
/// "this file is damaged" and "a password is needed or wrong".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The format or one of its features is not understood.
    Unreadable,
    /// The archive is structurally damaged or its content fails verification.
    Damaged,
    /// A password is missing or wrong.
    Credentials,
    /// Reading the underlying source failed, or a volume is absent.
    Environment,
    /// The caller asked for something the archive does not hold, or
    /// misconfigured the engine.
    Usage,
}

/// Errors that can occur while opening archives or decoding entries.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// No registered format recognizes the byte source.
    #[error("unrecognized archive format")]
    UnrecognizedFormat,

    /// Header or directory structures are invalid.
    #[error("corrupt archive: {reason}")]
    CorruptArchive {
        /// What was found to be inconsistent.
        reason: String,
    },

    /// A segment of a multi-volume archive could not be opened.
    #[error("missing volume: {volume}")]
    MissingVolume {
        /// Identifier (file name) of the expected volume.
        volume: String,
    },

    /// Nested archives go deeper than the configured limit.
    #[error("nesting too deep: depth {depth} exceeds maximum {max}")]
    NestingTooDeep {
        /// Depth that would have been reached.
        depth: usize,
        /// Configured maximum depth.
        max: usize,
    },

    /// An entry is encrypted and no credentials were supplied.
    #[error("password required for {entry}")]
    AuthenticationRequired {
        /// Path of the encrypted entry.
        entry: String,
    },

    /// The supplied credentials do not decrypt the entry.
    #[error("wrong password for {entry}")]
    AuthenticationFailed {
        /// Path of the encrypted entry.
        entry: String,
    },

    /// Decoded content does not match the checksum or size stored in the
    /// archive. Bytes produced before this error remain valid output.
    #[error("integrity mismatch in {entry}: {mismatch}")]
    IntegrityMismatch {
        /// Path of the entry that failed verification.
        entry: String,
        /// Which check failed.
        mismatch: Mismatch,
    },

    /// The archive uses a method this build does not implement.
    #[error("unsupported feature: {feature}")]
    UnsupportedFeature {
        /// Name of the method or feature.
        feature: String,
    },

    /// A format with the same name is already registered.
    #[error("format already registered: {name}")]
    DuplicateFormat {
        /// Name of the duplicated format.
        name: String,
    },

    /// No entry matches the requested path.
    #[error("entry not found: {path}")]
    NotFound {
        /// The requested path.
        path: String,
    },

    /// Reading the byte source failed.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl ArchiveError {
    /// Shorthand for [`ArchiveError::CorruptArchive`].
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptArchive {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ArchiveError::UnsupportedFeature`].
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            feature: feature.into(),
        }
    }

    /// Returns the remediation class of this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use decant_core::ArchiveError;
    /// use decant_core::error::ErrorClass;
    ///
    /// let err = ArchiveError::AuthenticationRequired {
    ///     entry: "secret.txt".into(),
    /// };
    /// assert_eq!(err.class(), ErrorClass::Credentials);
    ///
    /// let err = ArchiveError::corrupt("bad header");
    /// assert_eq!(err.class(), ErrorClass::Damaged);
    /// ```
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::UnrecognizedFormat | Self::UnsupportedFeature { .. } => ErrorClass::Unreadable,
            Self::CorruptArchive { .. }
            | Self::IntegrityMismatch { .. }
            | Self::NestingTooDeep { .. } => ErrorClass::Damaged,
            Self::AuthenticationRequired { .. } | Self::AuthenticationFailed { .. } => {
                ErrorClass::Credentials
            }
            Self::MissingVolume { .. } | Self::Io(_) => ErrorClass::Environment,
            Self::DuplicateFormat { .. } | Self::NotFound { .. } => ErrorClass::Usage,
        }
    }

    /// Returns `true` if the archive itself is damaged.
    #[must_use]
    pub const fn is_damage(&self) -> bool {
        matches!(self.class(), ErrorClass::Damaged)
    }

    /// Returns `true` if calling again with different credentials may help.
    #[must_use]
    pub const fn needs_credentials(&self) -> bool {
        matches!(self.class(), ErrorClass::Credentials)
    }

    /// Returns a context string for this error, if available.
    ///
    /// # Examples
    ///
    /// ```
    /// use decant_core::ArchiveError;
    ///
    /// let err = ArchiveError::corrupt("bad header");
    /// assert_eq!(err.context(), Some("bad header"));
    ///
    /// let err = ArchiveError::UnrecognizedFormat;
    /// assert_eq!(err.context(), None);
    /// ```
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::CorruptArchive { reason } => Some(reason),
            Self::UnsupportedFeature { feature } => Some(feature),
            Self::MissingVolume { volume } => Some(volume),
            Self::AuthenticationRequired { entry }
            | Self::AuthenticationFailed { entry }
            | Self::IntegrityMismatch { entry, .. } => Some(entry),
            _ => None,
        }
    }

    /// Wraps this error so it can travel through `std::io::Read` chains.
    ///
    /// The original kind is restored by `From<io::Error>`.
    #[must_use]
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Io(err) => err,
            other => io::Error::other(other),
        }
    }
}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        let carries_archive_error = err
            .get_ref()
            .is_some_and(|inner| inner.is::<Self>());
        if !carries_archive_error {
            return Self::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<Self>()) {
            Some(Ok(archive_err)) => *archive_err,
            Some(Err(inner)) => Self::Io(io::Error::other(inner)),
            None => Self::Io(io::Error::other("unknown I/O failure")),
        }
    }
}
