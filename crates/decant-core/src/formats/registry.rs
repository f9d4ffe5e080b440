//! Format registry.
//!
//! The registry is process-wide state with a one-time initialization step.
//! An embedding application may [`install`] its own registry (for example
//! the built-in table plus extra formats) before first use; afterwards
//! [`global`] hands out the same read-only registry to every caller.

use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;

use super::ArchiveFormat;
use super::stream::StreamFormat;
use super::tar::TarFormat;
use super::zip::ZipFormat;
use crate::ArchiveError;
use crate::Result;
use crate::formats::compression::CompressionCodec;

/// A registered format plus its registration order.
#[derive(Clone)]
pub struct FormatDescriptor {
    format: Arc<dyn ArchiveFormat>,
    order: usize,
}

impl FormatDescriptor {
    /// The format implementation.
    pub fn format(&self) -> &Arc<dyn ArchiveFormat> {
        &self.format
    }

    /// Format name.
    pub fn name(&self) -> &str {
        self.format.name()
    }

    /// Detection priority.
    pub fn priority(&self) -> i32 {
        self.format.priority()
    }

    /// Position in registration order, starting at 0.
    pub fn order(&self) -> usize {
        self.order
    }
}

impl fmt::Debug for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDescriptor")
            .field("name", &self.name())
            .field("priority", &self.priority())
            .field("order", &self.order)
            .finish()
    }
}

/// Ordered set of known formats.
///
/// # Built-in priority table
///
/// | Format | Priority | Detection |
/// |--------|----------|-----------|
/// | zip    | 100      | `PK` record signature, or end-of-central-directory probe |
/// | gzip   | 90       | `1F 8B 08` |
/// | bzip2  | 90       | `BZh1`..`BZh9` |
/// | xz     | 90       | `FD 37 7A 58 5A 00` |
/// | zstd   | 90       | `28 B5 2F FD` |
/// | tar    | 80       | `ustar` at offset 257, or header checksum probe |
///
/// Signature matches and probe matches are ranked by the same table. A
/// structural probe runs only when no fixed-signature match outranks it,
/// which is how a self-extracting ZIP (executable stub, directory at the
/// end) is still recognized as ZIP.
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    descriptors: Vec<FormatDescriptor>,
}

impl FormatRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in formats.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let builtins: [Arc<dyn ArchiveFormat>; 6] = [
            Arc::new(ZipFormat),
            Arc::new(StreamFormat::new(CompressionCodec::Gzip)),
            Arc::new(StreamFormat::new(CompressionCodec::Bzip2)),
            Arc::new(StreamFormat::new(CompressionCodec::Xz)),
            Arc::new(StreamFormat::new(CompressionCodec::Zstd)),
            Arc::new(TarFormat),
        ];
        for format in builtins {
            registry.push(format);
        }
        registry
    }

    fn push(&mut self, format: Arc<dyn ArchiveFormat>) {
        let order = self.descriptors.len();
        self.descriptors.push(FormatDescriptor { format, order });
    }

    /// Adds a format.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateFormat` if a format with the same name exists.
    pub fn register(&mut self, format: Arc<dyn ArchiveFormat>) -> Result<()> {
        if self.get(format.name()).is_some() {
            return Err(ArchiveError::DuplicateFormat {
                name: format.name().to_string(),
            });
        }
        self.push(format);
        Ok(())
    }

    /// Descriptors by descending priority, then registration order.
    pub fn list(&self) -> Vec<&FormatDescriptor> {
        let mut list: Vec<&FormatDescriptor> = self.descriptors.iter().collect();
        list.sort_by(|a, b| b.priority().cmp(&a.priority()).then(a.order.cmp(&b.order)));
        list
    }

    /// Looks a format up by name.
    pub fn get(&self, name: &str) -> Option<&FormatDescriptor> {
        self.descriptors.iter().find(|d| d.name() == name)
    }

    /// Number of registered formats.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` if no format is registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

static GLOBAL: OnceLock<Arc<FormatRegistry>> = OnceLock::new();

/// Installs the process-wide registry.
///
/// # Errors
///
/// Returns the registry back if one was already installed or
/// [`global`] was already called.
pub fn install(registry: FormatRegistry) -> std::result::Result<(), FormatRegistry> {
    let mut slot = Some(registry);
    GLOBAL.get_or_init(|| Arc::new(slot.take().unwrap_or_default()));
    match slot {
        None => Ok(()),
        Some(registry) => Err(registry),
    }
}

/// The process-wide registry, initialized with the built-in formats unless
/// [`install`] ran first.
pub fn global() -> Arc<FormatRegistry> {
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(FormatRegistry::builtin())))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Archive;
    use crate::formats::ParseContext;

    struct Named(&'static str, i32);

    impl ArchiveFormat for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn priority(&self) -> i32 {
            self.1
        }

        fn matches_signature(&self, _header: &[u8]) -> bool {
            false
        }

        fn parse(&self, _ctx: &ParseContext<'_>) -> Result<Archive> {
            Err(ArchiveError::UnrecognizedFormat)
        }
    }

    #[test]
    fn test_builtin_order() {
        let registry = FormatRegistry::builtin();
        let names: Vec<&str> = registry.list().iter().map(|d| d.name()).collect();
        assert_eq!(names, ["zip", "gzip", "bzip2", "xz", "zstd", "tar"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = FormatRegistry::builtin();
        let err = registry.register(Arc::new(Named("zip", 1))).unwrap_err();
        assert!(matches!(err, ArchiveError::DuplicateFormat { ref name } if name == "zip"));
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn test_priority_then_registration_order() {
        let mut registry = FormatRegistry::new();
        registry.register(Arc::new(Named("low", 1))).unwrap();
        registry.register(Arc::new(Named("high-a", 5))).unwrap();
        registry.register(Arc::new(Named("high-b", 5))).unwrap();
        let names: Vec<&str> = registry.list().iter().map(|d| d.name()).collect();
        assert_eq!(names, ["high-a", "high-b", "low"]);
        assert_eq!(registry.get("low").unwrap().order(), 0);
    }

    #[test]
    fn test_global_is_stable() {
        let a = global();
        let b = global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(install(FormatRegistry::new()).is_err());
    }
}
