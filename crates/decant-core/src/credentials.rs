//! Secret material supplied by the caller at decode time.

use std::collections::HashMap;
use std::fmt;

use crate::types::EntryPath;

/// Passwords for an archive, with optional per-entry overrides.
///
/// The engine never prompts for or stores credentials. A caller that wants
/// to retry with a different password opens a new decode session with new
/// credentials.
///
/// # Examples
///
/// ```
/// use decant_core::Credentials;
/// use decant_core::types::EntryPath;
///
/// let creds = Credentials::password("secret")
///     .with_entry_password(EntryPath::parse("other.txt").unwrap(), "hunter2");
///
/// let other = EntryPath::parse("other.txt").unwrap();
/// let plain = EntryPath::parse("a.txt").unwrap();
/// assert_eq!(creds.for_entry(&other), Some(&b"hunter2"[..]));
/// assert_eq!(creds.for_entry(&plain), Some(&b"secret"[..]));
/// ```
#[derive(Clone, Default)]
pub struct Credentials {
    archive: Option<Vec<u8>>,
    entries: HashMap<EntryPath, Vec<u8>>,
}

impl Credentials {
    /// No credentials at all.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// One password for every entry of the archive.
    #[must_use]
    pub fn password(password: impl AsRef<[u8]>) -> Self {
        Self {
            archive: Some(password.as_ref().to_vec()),
            entries: HashMap::new(),
        }
    }

    /// Adds a password used only for `path`.
    #[must_use]
    pub fn with_entry_password(mut self, path: EntryPath, password: impl AsRef<[u8]>) -> Self {
        self.entries.insert(path, password.as_ref().to_vec());
        self
    }

    /// Password to use for `path`: its own if present, else the archive's.
    pub fn for_entry(&self, path: &EntryPath) -> Option<&[u8]> {
        self.entries
            .get(path)
            .or(self.archive.as_ref())
            .map(Vec::as_slice)
    }

    /// Returns `true` if no password is held.
    pub fn is_empty(&self) -> bool {
        self.archive.is_none() && self.entries.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("archive", &self.archive.as_ref().map(|_| "<redacted>"))
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_none_has_no_password() {
        let creds = Credentials::none();
        assert!(creds.is_empty());
        assert_eq!(creds.for_entry(&EntryPath::parse("x").unwrap()), None);
    }

    #[test]
    fn test_entry_only_password() {
        let path = EntryPath::parse("x").unwrap();
        let creds = Credentials::none().with_entry_password(path.clone(), "p");
        assert_eq!(creds.for_entry(&path), Some(&b"p"[..]));
        assert_eq!(creds.for_entry(&EntryPath::parse("y").unwrap()), None);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::password("topsecret");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("topsecret"));
        assert!(debug.contains("redacted"));
    }
}
