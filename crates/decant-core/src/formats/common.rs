//! Helpers shared between format parsers.
//!
//! - [`has_container_extension`]: nested-archive hint from an entry name
//! - [`link_resource_forks`]: AppleDouble companions become resource streams
//! - [`unix_time`]: seconds since the epoch to `SystemTime`
//! - [`read_structure`]: positional read of a fixed-size header record

use std::collections::HashSet;
use std::io;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::ArchiveError;
use crate::Result;
use crate::entry::Entry;
use crate::io::ByteSource;
use crate::io::read_exact_at;
use crate::types::EntryKind;
use crate::types::EntryPath;

/// Extensions of container formats whose payloads are worth re-detecting.
///
/// Formats without a built-in parser (rar, 7z, lha) are listed too: a
/// registered third-party format may recognize them.
pub const CONTAINER_EXTENSIONS: &[&str] = &[
    "zip", "cbz", "tar", "gz", "tgz", "bz2", "tbz2", "tbz", "xz", "txz", "zst", "tzst", "cbr",
    "rar", "7z", "cb7", "lha", "lzh",
];

/// Directory that macOS archivers use for AppleDouble companions.
const MACOSX_DIR: &str = "__MACOSX";

/// Name prefix of AppleDouble companion files.
const APPLE_DOUBLE_PREFIX: &str = "._";

/// Returns `true` if the entry name ends in a known container extension.
pub fn has_container_extension(path: &EntryPath) -> bool {
    path.extension()
        .is_some_and(|ext| CONTAINER_EXTENSIONS.contains(&ext.as_str()))
}

/// Converts Unix seconds (possibly negative) to `SystemTime`.
pub fn unix_time(seconds: i64) -> Option<SystemTime> {
    if seconds >= 0 {
        UNIX_EPOCH.checked_add(Duration::from_secs(seconds.unsigned_abs()))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_secs(seconds.unsigned_abs()))
    }
}

/// Reads a fixed-size record at `offset`. A source that ends inside the
/// record is a `CorruptArchive` naming `what`.
pub fn read_structure(
    source: &dyn ByteSource,
    offset: u64,
    buf: &mut [u8],
    what: &str,
) -> Result<()> {
    read_exact_at(source, offset, buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ArchiveError::corrupt(format!("{what} truncated at offset {offset}"))
        } else {
            ArchiveError::from(e)
        }
    })
}

/// Rewrites AppleDouble companion files as resource streams of their data
/// fork.
///
/// Two layouts are recognized: `__MACOSX/dir/._name` (always a companion of
/// `dir/name`) and `dir/._name` when `dir/name` is also present.
pub fn link_resource_forks(entries: &mut [Entry]) {
    let known: HashSet<EntryPath> = entries.iter().map(|e| e.path().clone()).collect();

    for entry in entries.iter_mut() {
        if !entry.kind().is_file() {
            continue;
        }
        let Some(owner) = apple_double_owner(entry.path(), &known) else {
            continue;
        };
        tracing::trace!(fork = %entry.path(), of = %owner, "linked resource fork");
        entry.set_kind(EntryKind::ResourceFork { of: owner });
    }
}

fn apple_double_owner(path: &EntryPath, known: &HashSet<EntryPath>) -> Option<EntryPath> {
    let name = path.file_name().strip_prefix(APPLE_DOUBLE_PREFIX)?;
    if name.is_empty() {
        return None;
    }

    let components = path.components();
    let parents = &components[..components.len() - 1];

    if parents.first().map(String::as_str) == Some(MACOSX_DIR) {
        return EntryPath::from_components(parents[1..].iter().map(String::as_str).chain([name]))
            .ok();
    }

    let owner = EntryPath::from_components(parents.iter().map(String::as_str).chain([name])).ok()?;
    known.contains(&owner).then_some(owner)
}
