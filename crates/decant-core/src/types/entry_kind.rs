//! Archive entry kind enumeration.

use super::EntryPath;

/// Kind of a logical entry in an archive.
///
/// # Examples
///
/// ```
/// use decant_core::types::EntryKind;
///
/// let file = EntryKind::File;
/// let link = EntryKind::Symlink {
///     target: Some("../target".into()),
/// };
/// assert!(file.has_content());
/// assert!(link.is_symlink());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file entry.
    File,

    /// Directory entry.
    Directory,

    /// Symbolic link entry.
    ///
    /// The target is passed through as stored and has NOT been validated.
    /// It is `None` when the archive keeps the target inside encrypted
    /// content; decode the entry to read it.
    Symlink {
        /// The link target as stored in the archive.
        target: Option<String>,
    },

    /// Hard link to an earlier entry of the same archive.
    Hardlink {
        /// The link target as stored in the archive.
        target: String,
    },

    /// Auxiliary resource stream attached to another entry (a macOS
    /// resource fork stored as an AppleDouble companion file).
    ResourceFork {
        /// Path of the entry this stream belongs to.
        of: EntryPath,
    },
}

impl EntryKind {
    /// Returns `true` if this is a regular file.
    #[must_use]
    pub const fn is_file(&self) -> bool {
        matches!(self, Self::File)
    }

    /// Returns `true` if this is a directory.
    #[must_use]
    pub const fn is_directory(&self) -> bool {
        matches!(self, Self::Directory)
    }

    /// Returns `true` if this is a symlink.
    #[must_use]
    pub const fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink { .. })
    }

    /// Returns `true` if this is a hardlink.
    #[must_use]
    pub const fn is_hardlink(&self) -> bool {
        matches!(self, Self::Hardlink { .. })
    }

    /// Returns `true` if this is a resource stream.
    #[must_use]
    pub const fn is_resource_fork(&self) -> bool {
        matches!(self, Self::ResourceFork { .. })
    }

    /// Returns `true` if entries of this kind carry decodable content.
    #[must_use]
    pub const fn has_content(&self) -> bool {
        matches!(
            self,
            Self::File | Self::Symlink { .. } | Self::ResourceFork { .. }
        )
    }
}
