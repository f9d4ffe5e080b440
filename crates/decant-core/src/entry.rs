//! Logical archive entries.

use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::recipe::DecodeRecipe;
use crate::types::EntryKind;
use crate::types::EntryPath;

/// Optional metadata passed through from the archive headers.
///
/// Nothing here is interpreted by the engine; mapping these values onto a
/// filesystem is the caller's job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryAttributes {
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// Unix permission and file-type bits.
    pub unix_mode: Option<u32>,
    /// Numeric owner id.
    pub uid: Option<u64>,
    /// Numeric group id.
    pub gid: Option<u64>,
    /// Owner name.
    pub user_name: Option<String>,
    /// Group name.
    pub group_name: Option<String>,
    /// MS-DOS attribute byte.
    pub dos_attributes: Option<u32>,
    /// Per-entry comment.
    pub comment: Option<String>,
    /// Extended attributes keyed by name.
    pub xattrs: BTreeMap<String, Vec<u8>>,
}

/// One logical item of an archive.
///
/// Entries are immutable once they are part of an [`Archive`](crate::Archive).
/// Parsers assemble them with the `with_*` methods before handing them to
/// the [`ArchiveBuilder`](crate::ArchiveBuilder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    index: usize,
    path: EntryPath,
    kind: EntryKind,
    size: Option<u64>,
    compressed_size: Option<u64>,
    recipe: DecodeRecipe,
    attributes: EntryAttributes,
    redetect: bool,
}

impl Entry {
    /// Creates an entry with no size information and default attributes.
    pub fn new(path: EntryPath, kind: EntryKind, recipe: DecodeRecipe) -> Self {
        Self {
            index: 0,
            path,
            kind,
            size: None,
            compressed_size: None,
            recipe,
            attributes: EntryAttributes::default(),
            redetect: false,
        }
    }

    /// Sets the declared uncompressed size.
    #[must_use]
    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    /// Sets the declared stored (compressed) size.
    #[must_use]
    pub fn with_compressed_size(mut self, size: Option<u64>) -> Self {
        self.compressed_size = size;
        self
    }

    /// Sets the auxiliary attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: EntryAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Marks the decoded content for re-detection as a nested archive.
    #[must_use]
    pub fn with_redetect(mut self, redetect: bool) -> Self {
        self.redetect = redetect;
        self
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub(crate) fn set_kind(&mut self, kind: EntryKind) {
        self.kind = kind;
    }

    /// Position of this entry in its archive's entry list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Normalized path.
    pub fn path(&self) -> &EntryPath {
        &self.path
    }

    /// Entry kind.
    pub fn kind(&self) -> &EntryKind {
        &self.kind
    }

    /// Declared uncompressed size, if the format records one.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Declared stored size, if the format records one.
    pub fn compressed_size(&self) -> Option<u64> {
        self.compressed_size
    }

    /// Decode recipe for this entry's content.
    pub fn recipe(&self) -> &DecodeRecipe {
        &self.recipe
    }

    /// Auxiliary attributes.
    pub fn attributes(&self) -> &EntryAttributes {
        &self.attributes
    }

    /// Whether the decoded content should be re-detected as an archive.
    pub fn redetect(&self) -> bool {
        self.redetect
    }

    /// Whether decoding requires credentials.
    pub fn is_encrypted(&self) -> bool {
        self.recipe.is_encrypted()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::recipe::DataRange;

    #[test]
    fn test_entry_builder_methods() {
        let entry = Entry::new(
            EntryPath::parse("a/b.txt").unwrap(),
            EntryKind::File,
            DecodeRecipe::new(DataRange::new(10, 5)),
        )
        .with_size(Some(5))
        .with_compressed_size(Some(5))
        .with_redetect(true);

        assert_eq!(entry.path().to_string(), "a/b.txt");
        assert_eq!(entry.size(), Some(5));
        assert_eq!(entry.compressed_size(), Some(5));
        assert!(entry.redetect());
        assert!(!entry.is_encrypted());
        assert!(entry.attributes().xattrs.is_empty());
    }
}
