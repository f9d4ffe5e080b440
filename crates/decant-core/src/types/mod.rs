//! Value types describing archive entries.
//!
//! Entry paths are normalized when they are constructed: an `EntryPath`
//! cannot hold an empty component or a `..` traversal, so code consuming
//! entries never has to re-check them.

pub mod entry_kind;
pub mod entry_path;

pub use entry_kind::EntryKind;
pub use entry_path::EntryPath;
pub use entry_path::PathRejection;
