//! Archive inspection without extraction.
//!
//! # Examples
//!
//! ```no_run
//! use decant_core::inspection::verify_archive;
//! use decant_core::{Credentials, ReaderConfig, open_archive};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let archive = open_archive("backup.zip")?;
//! let report = verify_archive(&archive, &Credentials::none(), &ReaderConfig::default());
//! for (path, err) in report.failures() {
//!     eprintln!("{path}: {err}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod verify;

pub use verify::verify_archive;
pub use verify::verify_archive_with_progress;
