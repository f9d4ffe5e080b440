//! Normalized, separator-agnostic entry paths.

use std::fmt;

/// Why a stored name could not become an [`EntryPath`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathRejection {
    /// The name contains a `..` component.
    Traversal,
    /// The name contains a NUL byte.
    NulByte,
    /// Nothing remains after normalization.
    Empty,
}

impl fmt::Display for PathRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Traversal => f.write_str("path traversal component"),
            Self::NulByte => f.write_str("NUL byte in name"),
            Self::Empty => f.write_str("empty path"),
        }
    }
}

impl std::error::Error for PathRejection {}

/// A path inside an archive, held as a sequence of components.
///
/// Both `/` and `\` separate components. Empty and `.` components, leading
/// roots and drive prefixes are dropped. A name containing `..` or a NUL
/// byte is rejected, so every `EntryPath` has at least one component and
/// none of its components is empty or a traversal.
///
/// Comparison is exact: no case folding, no Unicode normalization.
///
/// # Examples
///
/// ```
/// use decant_core::types::EntryPath;
///
/// let path = EntryPath::parse("/docs\\./readme.txt").unwrap();
/// assert_eq!(path.components(), ["docs", "readme.txt"]);
/// assert_eq!(path.to_string(), "docs/readme.txt");
///
/// assert!(EntryPath::parse("../etc/passwd").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPath(Vec<String>);

impl EntryPath {
    /// Normalizes a stored entry name.
    pub fn parse(raw: &str) -> Result<Self, PathRejection> {
        if raw.contains('\0') {
            return Err(PathRejection::NulByte);
        }

        let mut components = Vec::new();
        for (i, part) in raw.split(['/', '\\']).enumerate() {
            // "C:" drive prefix
            if i == 0 && is_drive_prefix(part) {
                continue;
            }
            match part {
                "" | "." => {}
                ".." => return Err(PathRejection::Traversal),
                other => components.push(other.to_string()),
            }
        }

        if components.is_empty() {
            return Err(PathRejection::Empty);
        }
        Ok(Self(components))
    }

    /// Builds a path from already-validated components.
    pub fn from_components<I, S>(components: I) -> Result<Self, PathRejection>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = components
            .into_iter()
            .map(|c| c.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self::parse(&joined)
    }

    /// The normalized components.
    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// The last component.
    pub fn file_name(&self) -> &str {
        self.0.last().map_or("", String::as_str)
    }

    /// The path without its last component, if any remains.
    pub fn parent(&self) -> Option<Self> {
        (self.0.len() > 1).then(|| Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Appends a component, returning a new path.
    pub fn join(&self, component: &str) -> Result<Self, PathRejection> {
        let mut joined = self.0.clone();
        joined.extend(Self::parse(component)?.0);
        Ok(Self(joined))
    }

    /// Lowercased extension of the last component, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        let dot = name.rfind('.')?;
        (dot > 0 && dot + 1 < name.len()).then(|| name[dot + 1..].to_ascii_lowercase())
    }
}

fn is_drive_prefix(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let path = EntryPath::parse("a/b/c.txt").unwrap();
        assert_eq!(path.components(), ["a", "b", "c.txt"]);
        assert_eq!(path.file_name(), "c.txt");
    }

    #[test]
    fn test_parse_backslashes() {
        let path = EntryPath::parse("dir\\sub\\file").unwrap();
        assert_eq!(path.to_string(), "dir/sub/file");
    }

    #[test]
    fn test_parse_strips_root_and_dots() {
        let path = EntryPath::parse("//./a//./b/").unwrap();
        assert_eq!(path.components(), ["a", "b"]);
    }

    #[test]
    fn test_parse_strips_drive_prefix() {
        let path = EntryPath::parse("C:\\Windows\\x.dll").unwrap();
        assert_eq!(path.to_string(), "Windows/x.dll");
    }

    #[test]
    fn test_parse_rejects_traversal() {
        assert_eq!(
            EntryPath::parse("a/../../b"),
            Err(PathRejection::Traversal)
        );
        assert_eq!(EntryPath::parse("..\\x"), Err(PathRejection::Traversal));
    }

    #[test]
    fn test_parse_rejects_nul_and_empty() {
        assert_eq!(EntryPath::parse("a\0b"), Err(PathRejection::NulByte));
        assert_eq!(EntryPath::parse(""), Err(PathRejection::Empty));
        assert_eq!(EntryPath::parse("/./"), Err(PathRejection::Empty));
    }

    #[test]
    fn test_dotted_names_are_not_traversal() {
        let path = EntryPath::parse("...hidden/..x").unwrap();
        assert_eq!(path.components(), ["...hidden", "..x"]);
    }

    #[test]
    fn test_parent_and_join() {
        let path = EntryPath::parse("a/b").unwrap();
        assert_eq!(path.parent().unwrap().to_string(), "a");
        assert!(EntryPath::parse("a").unwrap().parent().is_none());
        assert_eq!(path.join("c").unwrap().to_string(), "a/b/c");
        assert!(path.join("..").is_err());
    }

    #[test]
    fn test_extension() {
        assert_eq!(
            EntryPath::parse("x/Comic.CBZ").unwrap().extension().as_deref(),
            Some("cbz")
        );
        assert_eq!(EntryPath::parse(".bashrc").unwrap().extension(), None);
        assert_eq!(EntryPath::parse("noext").unwrap().extension(), None);
    }

    #[test]
    fn test_case_is_preserved() {
        let lower = EntryPath::parse("readme").unwrap();
        let upper = EntryPath::parse("README").unwrap();
        assert_ne!(lower, upper);
    }
}
