//! Parsed archives and the builder parsers use to assemble them.

use std::fmt;
use std::sync::Arc;

use crate::ArchiveError;
use crate::Result;
use crate::entry::Entry;
use crate::formats::common;
use crate::io::ByteSource;
use crate::types::EntryPath;

/// Archive-wide properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveProperties {
    /// Archive-level comment.
    pub comment: Option<String>,
    /// Whether any entry requires credentials.
    pub encrypted: bool,
    /// Number of physical volumes the archive spans.
    pub volume_count: usize,
    /// Whether entries can only be decoded by running through a shared
    /// stream (archives re-opened from a decoded entry).
    pub solid: bool,
}

/// A stored item the parser refused to expose as an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    /// Name as stored in the archive.
    pub name: String,
    /// Why the item was rejected.
    pub reason: String,
}

/// The parsed representation of one container.
///
/// Entries keep the order the format declares them in. The archive holds
/// its byte source so that entries can be decoded for as long as the
/// archive is alive; dropping it releases everything.
pub struct Archive {
    format: String,
    source: Arc<dyn ByteSource>,
    entries: Vec<Entry>,
    properties: ArchiveProperties,
    rejected: Vec<RejectedEntry>,
    depth: usize,
}

impl Archive {
    /// Name of the format that parsed this archive.
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Entries in format-declared order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Entry at `index`.
    pub fn entry(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Finds the first entry whose normalized path equals `path`.
    ///
    /// The lookup normalizes `path` the same way entry names are normalized
    /// and then compares components exactly.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::NotFound` if no entry matches.
    pub fn find(&self, path: &str) -> Result<&Entry> {
        let not_found = || ArchiveError::NotFound {
            path: path.to_string(),
        };
        let wanted = EntryPath::parse(path).map_err(|_| not_found())?;
        self.entries
            .iter()
            .find(|entry| *entry.path() == wanted)
            .ok_or_else(not_found)
    }

    /// Archive-wide properties.
    pub fn properties(&self) -> &ArchiveProperties {
        &self.properties
    }

    /// Items that were stored but not exposed as entries.
    pub fn rejected(&self) -> &[RejectedEntry] {
        &self.rejected
    }

    /// Nesting depth: 0 for an archive opened directly, 1 for an archive
    /// found inside an entry of a depth-0 archive, and so on.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The byte source entries are decoded from.
    pub fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }

    pub(crate) fn mark_nested(&mut self, depth: usize) {
        self.depth = depth;
        self.properties.solid = true;
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("format", &self.format)
            .field("entries", &self.entries.len())
            .field("properties", &self.properties)
            .field("rejected", &self.rejected.len())
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// Builder parsers use to assemble an [`Archive`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use decant_core::ArchiveBuilder;
/// use decant_core::entry::Entry;
/// use decant_core::io::MemorySource;
/// use decant_core::recipe::{DataRange, DecodeRecipe};
/// use decant_core::types::{EntryKind, EntryPath};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = Arc::new(MemorySource::new(b"raw".to_vec()));
/// let mut builder = ArchiveBuilder::new("raw", source);
/// builder.push(Entry::new(
///     EntryPath::parse("data")?,
///     EntryKind::File,
///     DecodeRecipe::new(DataRange::new(0, 3)),
/// ))?;
/// let archive = builder.build();
/// assert_eq!(archive.entries().len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct ArchiveBuilder {
    format: String,
    source: Arc<dyn ByteSource>,
    entries: Vec<Entry>,
    properties: ArchiveProperties,
    rejected: Vec<RejectedEntry>,
    entry_limit: usize,
}

impl ArchiveBuilder {
    /// Creates a builder for an archive of `format` read from `source`.
    #[must_use]
    pub fn new(format: impl Into<String>, source: Arc<dyn ByteSource>) -> Self {
        Self {
            format: format.into(),
            source,
            entries: Vec::new(),
            properties: ArchiveProperties {
                volume_count: 1,
                ..ArchiveProperties::default()
            },
            rejected: Vec::new(),
            entry_limit: usize::MAX,
        }
    }

    /// Caps the number of entries; pushing beyond it is an error.
    #[must_use]
    pub fn entry_limit(mut self, limit: usize) -> Self {
        self.entry_limit = limit;
        self
    }

    /// Sets the archive comment.
    pub fn comment(&mut self, comment: Option<String>) -> &mut Self {
        self.properties.comment = comment.filter(|c| !c.is_empty());
        self
    }

    /// Sets the number of physical volumes.
    pub fn volume_count(&mut self, count: usize) -> &mut Self {
        self.properties.volume_count = count;
        self
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// Returns `CorruptArchive` once the entry limit is exceeded.
    pub fn push(&mut self, mut entry: Entry) -> Result<()> {
        if self.entries.len() >= self.entry_limit {
            return Err(ArchiveError::corrupt(format!(
                "archive declares more than {} entries",
                self.entry_limit
            )));
        }
        if entry.is_encrypted() {
            self.properties.encrypted = true;
        }
        entry.set_index(self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Records a stored item that is not exposed as an entry.
    pub fn reject(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        let rejected = RejectedEntry {
            name: name.into(),
            reason: reason.into(),
        };
        tracing::warn!(
            format = %self.format,
            name = %rejected.name,
            reason = %rejected.reason,
            "entry rejected"
        );
        self.rejected.push(rejected);
    }

    /// Number of entries pushed so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entry has been pushed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finishes the archive, linking resource streams to their data forks.
    pub fn build(mut self) -> Archive {
        common::link_resource_forks(&mut self.entries);
        tracing::debug!(
            format = %self.format,
            entries = self.entries.len(),
            rejected = self.rejected.len(),
            volumes = self.properties.volume_count,
            "archive parsed"
        );
        Archive {
            format: self.format,
            source: self.source,
            entries: self.entries,
            properties: self.properties,
            rejected: self.rejected,
            depth: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use crate::recipe::Cipher;
    use crate::recipe::DataRange;
    use crate::recipe::DecodeRecipe;
    use crate::recipe::DecodeStep;
    use crate::types::EntryKind;

    fn builder() -> ArchiveBuilder {
        ArchiveBuilder::new("test", Arc::new(MemorySource::new(Vec::new())))
    }

    fn file(path: &str) -> Entry {
        Entry::new(
            EntryPath::parse(path).unwrap(),
            EntryKind::File,
            DecodeRecipe::new(DataRange::new(0, 0)),
        )
    }

    #[test]
    fn test_entries_keep_declared_order() {
        let mut builder = builder();
        builder.push(file("b")).unwrap();
        builder.push(file("a")).unwrap();
        let archive = builder.build();

        let names: Vec<String> = archive.entries().iter().map(|e| e.path().to_string()).collect();
        assert_eq!(names, ["b", "a"]);
        assert_eq!(archive.entries()[1].index(), 1);
    }

    #[test]
    fn test_find_first_match() {
        let mut builder = builder();
        builder.push(file("dup")).unwrap();
        builder.push(file("dup").with_size(Some(9))).unwrap();
        let archive = builder.build();

        let found = archive.find("dup").unwrap();
        assert_eq!(found.index(), 0);
        assert_eq!(archive.find("/./dup").unwrap().index(), 0);
    }

    #[test]
    fn test_find_not_found() {
        let archive = builder().build();
        assert!(matches!(
            archive.find("missing"),
            Err(ArchiveError::NotFound { .. })
        ));
        assert!(matches!(
            archive.find("../x"),
            Err(ArchiveError::NotFound { .. })
        ));
    }

    #[test]
    fn test_find_is_case_sensitive() {
        let mut builder = builder();
        builder.push(file("Readme")).unwrap();
        let archive = builder.build();
        assert!(archive.find("readme").is_err());
    }

    #[test]
    fn test_entry_limit() {
        let mut builder = builder().entry_limit(1);
        builder.push(file("a")).unwrap();
        assert!(matches!(
            builder.push(file("b")),
            Err(ArchiveError::CorruptArchive { .. })
        ));
    }

    #[test]
    fn test_encrypted_flag_and_rejections() {
        let mut builder = builder();
        let recipe = DecodeRecipe::new(DataRange::new(0, 12))
            .then(DecodeStep::Decrypt(Cipher::ZipCrypto { check_byte: 0 }));
        builder
            .push(Entry::new(
                EntryPath::parse("secret").unwrap(),
                EntryKind::File,
                recipe,
            ))
            .unwrap();
        builder.reject("../evil", "path traversal component");
        let archive = builder.build();

        assert!(archive.properties().encrypted);
        assert_eq!(archive.properties().volume_count, 1);
        assert_eq!(archive.rejected().len(), 1);
        assert_eq!(archive.rejected()[0].name, "../evil");
        assert_eq!(archive.depth(), 0);
    }
}
