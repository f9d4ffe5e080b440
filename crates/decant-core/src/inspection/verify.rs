//! Whole-archive verification.

use std::io;
use std::io::Read;
use std::time::Instant;

use crate::Archive;
use crate::ArchiveError;
use crate::Credentials;
use crate::ReaderConfig;
use crate::entry::Entry;
use crate::io::CountingReader;
use crate::pipeline::open_decode_session;
use crate::report::EntryOutcome;
use crate::report::EntryReport;
use crate::report::NoopProgress;
use crate::report::VerificationReport;
use crate::report::VerifyProgress;

/// Decodes every content-bearing entry of `archive` once and reports how
/// each one fared.
///
/// Directories and links are skipped. Failures are recorded per entry and
/// never abort the pass, so one damaged member does not hide the state of
/// the others. Nested archives are not opened.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use decant_core::inspection::verify_archive;
/// use decant_core::io::MemorySource;
/// use decant_core::test_utils::ZipBuilder;
/// use decant_core::{Credentials, ReaderConfig, Unarchiver};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let zip = ZipBuilder::new().file("a.txt", b"alpha").directory("d/").build();
/// let archive = Unarchiver::new().open(Arc::new(MemorySource::new(zip)))?;
///
/// let report = verify_archive(&archive, &Credentials::none(), &ReaderConfig::default());
/// assert!(report.is_ok());
/// assert_eq!(report.verified_count(), 1);
/// # Ok(())
/// # }
/// ```
pub fn verify_archive(
    archive: &Archive,
    credentials: &Credentials,
    config: &ReaderConfig,
) -> VerificationReport {
    verify_archive_with_progress(archive, credentials, config, &mut NoopProgress)
}

/// [`verify_archive`] with progress callbacks.
pub fn verify_archive_with_progress(
    archive: &Archive,
    credentials: &Credentials,
    config: &ReaderConfig,
    progress: &mut dyn VerifyProgress,
) -> VerificationReport {
    let start = Instant::now();
    let mut report = VerificationReport::new(archive.format());

    let targets: Vec<&Entry> = archive
        .entries()
        .iter()
        .filter(|e| e.kind().is_file() || e.kind().is_resource_fork())
        .collect();
    let total = targets.len();

    for (current, entry) in targets.into_iter().enumerate() {
        progress.on_entry_start(entry.path(), total, current + 1);
        let (bytes, result) = decode_entry(archive, entry, credentials, config, progress);
        let outcome = match result {
            Ok(()) if entry.recipe().is_verifiable() => EntryOutcome::Verified,
            Ok(()) => EntryOutcome::Unverifiable,
            Err(err) => {
                tracing::debug!(entry = %entry.path(), error = %err, "entry failed verification");
                EntryOutcome::Failed(err)
            }
        };
        progress.on_entry_complete(entry.path(), &outcome);
        report.bytes_decoded += bytes;
        report.entries.push(EntryReport {
            index: entry.index(),
            path: entry.path().clone(),
            bytes,
            outcome,
        });
    }

    report.duration = start.elapsed();
    tracing::debug!(
        format = %report.format,
        entries = report.entries.len(),
        failed = report.failures().count(),
        "verification finished"
    );
    report
}

fn decode_entry(
    archive: &Archive,
    entry: &Entry,
    credentials: &Credentials,
    config: &ReaderConfig,
    progress: &mut dyn VerifyProgress,
) -> (u64, Result<(), ArchiveError>) {
    let session = match open_decode_session(archive.source(), entry, credentials, config) {
        Ok(session) => session,
        Err(err) => return (0, Err(err)),
    };
    let mut reader = CountingReader::new(session);
    let mut buf = vec![0u8; config.effective_chunk_size()];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return (reader.total_bytes(), Ok(())),
            Ok(n) => progress.on_bytes_decoded(n as u64),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return (reader.total_bytes(), Err(ArchiveError::from(e))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::Unarchiver;
    use crate::io::ByteSource;
    use crate::io::MemorySource;
    use crate::test_utils::TarBuilder;
    use crate::test_utils::ZipBuilder;

    fn open(data: Vec<u8>) -> Archive {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(data));
        Unarchiver::new().open(source).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        started: Vec<(String, usize, usize)>,
        bytes: u64,
        completed: usize,
    }

    impl VerifyProgress for Recorder {
        fn on_entry_start(&mut self, path: &crate::types::EntryPath, total: usize, current: usize) {
            self.started.push((path.to_string(), total, current));
        }

        fn on_bytes_decoded(&mut self, bytes: u64) {
            self.bytes += bytes;
        }

        fn on_entry_complete(&mut self, _path: &crate::types::EntryPath, _outcome: &EntryOutcome) {
            self.completed += 1;
        }
    }

    #[test]
    fn test_damaged_entry_does_not_stop_pass() {
        let mut zip = ZipBuilder::new()
            .stored("first.txt", b"AAAAAAAAAA")
            .stored("second.txt", b"BBBBBBBBBB")
            .build();
        // corrupt one content byte of the first entry
        let at = zip.windows(10).position(|w| w == b"AAAAAAAAAA").unwrap();
        zip[at] = b'Z';

        let archive = open(zip);
        let report = verify_archive(&archive, &Credentials::none(), &ReaderConfig::default());
        assert!(!report.is_ok());
        assert!(matches!(
            report.entries[0].outcome,
            EntryOutcome::Failed(ArchiveError::IntegrityMismatch { .. })
        ));
        assert!(matches!(report.entries[1].outcome, EntryOutcome::Verified));
        assert_eq!(report.bytes_decoded, 20);
    }

    #[test]
    fn test_tar_entries_are_unverifiable() {
        let tar = TarBuilder::new()
            .file("a", b"1234")
            .directory("d/")
            .build();
        let archive = open(tar);
        let mut recorder = Recorder::default();
        let report = verify_archive_with_progress(
            &archive,
            &Credentials::none(),
            &ReaderConfig::default(),
            &mut recorder,
        );
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.unverifiable_count(), 1);
        assert_eq!(recorder.started, [("a".to_string(), 1, 1)]);
        assert_eq!(recorder.bytes, 4);
        assert_eq!(recorder.completed, 1);
    }

    #[test]
    fn test_missing_password_is_reported() {
        let zip = ZipBuilder::new()
            .encrypted("locked.txt", b"classified", "pw")
            .build();
        let archive = open(zip);
        let report = verify_archive(&archive, &Credentials::none(), &ReaderConfig::default());
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.needs_credentials());

        let report = verify_archive(&archive, &Credentials::password("pw"), &ReaderConfig::default());
        assert!(report.is_ok());
    }
}
