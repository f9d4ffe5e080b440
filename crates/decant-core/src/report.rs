//! Verification reporting.

use std::time::Duration;

use crate::ArchiveError;
use crate::types::EntryPath;

/// What happened when one entry was decoded during verification.
#[derive(Debug)]
pub enum EntryOutcome {
    /// The content decoded and matched the stored checksum or size.
    Verified,
    /// The content decoded, but the format stores nothing to check it
    /// against.
    Unverifiable,
    /// Decoding failed.
    Failed(ArchiveError),
}

impl EntryOutcome {
    /// Returns `true` for [`EntryOutcome::Failed`].
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Outcome for one entry.
#[derive(Debug)]
pub struct EntryReport {
    /// Position of the entry in the archive.
    pub index: usize,
    /// Entry path.
    pub path: EntryPath,
    /// Decoded bytes produced before the session ended.
    pub bytes: u64,
    /// Result of decoding.
    pub outcome: EntryOutcome,
}

/// Report of a whole-archive verification pass.
///
/// Contains one [`EntryReport`] per entry that has content, in archive
/// order.
#[derive(Debug, Default)]
pub struct VerificationReport {
    /// Name of the archive's format.
    pub format: String,

    /// Per-entry outcomes.
    pub entries: Vec<EntryReport>,

    /// Total decoded bytes across all entries.
    pub bytes_decoded: u64,

    /// Duration of the verification pass.
    pub duration: Duration,
}

impl VerificationReport {
    /// Creates a new empty verification report.
    #[must_use]
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if no entry failed.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        !self.entries.iter().any(|e| e.outcome.is_failure())
    }

    /// Number of entries checked against stored integrity data.
    #[must_use]
    pub fn verified_count(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::Verified))
    }

    /// Number of entries that decoded without anything to check.
    #[must_use]
    pub fn unverifiable_count(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::Unverifiable))
    }

    /// Entries that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&EntryPath, &ArchiveError)> {
        self.entries.iter().filter_map(|e| match &e.outcome {
            EntryOutcome::Failed(err) => Some((&e.path, err)),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&EntryOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

/// Callback trait for progress reporting during verification.
///
/// The trait requires `Send` to allow use in multi-threaded contexts.
///
/// # Examples
///
/// ```
/// use decant_core::report::{EntryOutcome, VerifyProgress};
/// use decant_core::types::EntryPath;
///
/// struct Printer;
///
/// impl VerifyProgress for Printer {
///     fn on_entry_start(&mut self, path: &EntryPath, total: usize, current: usize) {
///         println!("Checking {current}/{total}: {path}");
///     }
///
///     fn on_bytes_decoded(&mut self, _bytes: u64) {}
///
///     fn on_entry_complete(&mut self, path: &EntryPath, outcome: &EntryOutcome) {
///         println!("{path}: {outcome:?}");
///     }
/// }
/// ```
pub trait VerifyProgress: Send {
    /// Called before an entry is decoded. `current` is 1-indexed.
    fn on_entry_start(&mut self, path: &EntryPath, total: usize, current: usize);

    /// Called after each decoded chunk.
    fn on_bytes_decoded(&mut self, bytes: u64);

    /// Called once an entry has been fully decoded or has failed.
    fn on_entry_complete(&mut self, path: &EntryPath, outcome: &EntryOutcome);
}

/// No-op implementation of `VerifyProgress`.
#[derive(Debug, Default)]
pub struct NoopProgress;

impl VerifyProgress for NoopProgress {
    fn on_entry_start(&mut self, _path: &EntryPath, _total: usize, _current: usize) {}

    fn on_bytes_decoded(&mut self, _bytes: u64) {}

    fn on_entry_complete(&mut self, _path: &EntryPath, _outcome: &EntryOutcome) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(name: &str, outcome: EntryOutcome) -> EntryReport {
        EntryReport {
            index: 0,
            path: EntryPath::parse(name).unwrap(),
            bytes: 0,
            outcome,
        }
    }

    #[test]
    fn test_new_report() {
        let report = VerificationReport::new("zip");
        assert_eq!(report.format, "zip");
        assert!(report.is_ok());
        assert_eq!(report.verified_count(), 0);
    }

    #[test]
    fn test_counts_and_failures() {
        let mut report = VerificationReport::new("tar");
        report.entries.push(entry("a", EntryOutcome::Verified));
        report.entries.push(entry("b", EntryOutcome::Unverifiable));
        report.entries.push(entry(
            "c",
            EntryOutcome::Failed(ArchiveError::corrupt("bad block")),
        ));

        assert!(!report.is_ok());
        assert_eq!(report.verified_count(), 1);
        assert_eq!(report.unverifiable_count(), 1);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.to_string(), "c");
    }
}
