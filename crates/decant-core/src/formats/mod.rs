//! Archive format implementations.
//!
//! Every format family implements [`ArchiveFormat`] and is registered in a
//! [`FormatRegistry`]. Detection ranks the registered formats against a
//! source; the winner's parser builds the [`Archive`](crate::Archive).

pub mod common;
pub mod compression;
pub mod detect;
pub mod registry;
pub mod stream;
pub mod tar;
pub mod traits;
pub mod zip;

// Re-export main types for convenience
pub use compression::CompressionCodec;
pub use detect::Candidate;
pub use detect::MatchKind;
pub use detect::detect;
pub use detect::detect_best;
pub use registry::FormatDescriptor;
pub use registry::FormatRegistry;
pub use stream::StreamFormat;
pub use tar::TarFormat;
pub use traits::ArchiveFormat;
pub use traits::ParseContext;
pub use zip::ZipFormat;
