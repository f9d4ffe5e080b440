//! Read-only access to archives and compressed files.
//!
//! `decant-core` detects the format of a byte source, lists the entries it
//! contains and decodes any entry's content on demand as a pull-based
//! stream, verifying checksums where the format stores them. ZIP (including
//! ZIP64, self-extracting stubs, spanned segments and ZipCrypto), TAR
//! (v7, ustar, GNU, PAX) and gzip, bzip2, xz and zstd streams are built in;
//! further formats plug in through [`formats::FormatRegistry`].
//!
//! # Examples
//!
//! ```no_run
//! use decant_core::{Credentials, Unarchiver};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let unarchiver = Unarchiver::new();
//! let archive = unarchiver.open_path("backup.tar.gz")?;
//! for entry in archive.entries() {
//!     println!("{} ({:?} bytes)", entry.path(), entry.size());
//! }
//!
//! let entry = archive.find("backup.tar")?;
//! let session = unarchiver.open_entry(&archive, entry, &Credentials::none())?;
//! for chunk in session {
//!     let chunk = chunk?;
//!     println!("{} bytes", chunk.len());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod archive;
pub mod config;
pub mod credentials;
pub mod entry;
pub mod error;
pub mod formats;
pub mod inspection;
pub mod io;
pub mod pipeline;
pub mod recipe;
pub mod report;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod volume;

// Re-export main API types
pub use api::Extraction;
pub use api::OpenOptions;
pub use api::Unarchiver;
pub use api::UnarchiverBuilder;
pub use api::open_archive;
pub use archive::Archive;
pub use archive::ArchiveBuilder;
pub use archive::ArchiveProperties;
pub use config::ReaderConfig;
pub use credentials::Credentials;
pub use entry::Entry;
pub use entry::EntryAttributes;
pub use error::ArchiveError;
pub use error::Result;
pub use inspection::verify_archive;
pub use pipeline::DecodeSession;
pub use report::VerificationReport;

// Re-export types module for easier access
pub use types::EntryKind;
pub use types::EntryPath;
