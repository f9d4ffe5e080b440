//! Reader configuration: scan windows, limits and chunking.

/// Limits and tuning applied while detecting, parsing and decoding archives.
///
/// Every structural scan the engine performs is bounded by one of these
/// values, so a hostile or corrupt source cannot trigger unbounded work.
///
/// # Examples
///
/// ```
/// use decant_core::ReaderConfig;
///
/// // Use the defaults
/// let config = ReaderConfig::default();
///
/// // Customize for specific needs
/// let custom = ReaderConfig {
///     max_nesting_depth: 2,
///     chunk_size: 16 * 1024,
///     ..Default::default()
/// };
/// assert!(custom.max_nesting_depth < config.max_nesting_depth);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Number of leading bytes handed to signature predicates.
    pub header_window: usize,

    /// Maximum number of trailing bytes a structural probe may scan
    /// backward (e.g. the ZIP end-of-central-directory search).
    pub max_probe_window: u64,

    /// Maximum depth of archives re-opened from an entry's decoded stream.
    pub max_nesting_depth: usize,

    /// Maximum number of entries a single archive may declare.
    pub max_entries: usize,

    /// Maximum size of a variable-length metadata record (PAX records,
    /// GNU long names, gzip headers, xz indexes).
    pub max_header_size: u64,

    /// Maximum length of a symbolic link target read from entry content.
    pub max_link_target: u64,

    /// Number of decoded bytes produced per pull from a decode session.
    pub chunk_size: usize,
}

impl Default for ReaderConfig {
    /// Creates a `ReaderConfig` with default settings.
    ///
    /// Default values:
    /// - `header_window`: 64 KiB
    /// - `max_probe_window`: 64 KiB + 22 (largest ZIP comment plus the
    ///   fixed end record)
    /// - `max_nesting_depth`: 8
    /// - `max_entries`: 1,000,000
    /// - `max_header_size`: 1 MiB
    /// - `max_link_target`: 4 KiB
    /// - `chunk_size`: 64 KiB
    fn default() -> Self {
        Self {
            header_window: 64 * 1024,
            max_probe_window: 64 * 1024 + 22,
            max_nesting_depth: 8,
            max_entries: 1_000_000,
            max_header_size: 1024 * 1024,
            max_link_target: 4096,
            chunk_size: 64 * 1024,
        }
    }
}

impl ReaderConfig {
    /// Creates a configuration with tighter limits for untrusted input.
    ///
    /// Nesting is limited to two levels, entry count to 10,000 and metadata
    /// records to 64 KiB.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            max_nesting_depth: 2,
            max_entries: 10_000,
            max_header_size: 64 * 1024,
            max_link_target: 1024,
            ..Default::default()
        }
    }

    /// Chunk size clamped to at least one byte.
    pub(crate) fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReaderConfig::default();
        assert_eq!(config.header_window, 65_536);
        assert_eq!(config.max_probe_window, 65_558);
        assert_eq!(config.max_nesting_depth, 8);
        assert_eq!(config.chunk_size, 65_536);
    }

    #[test]
    fn test_strict_config() {
        let config = ReaderConfig::strict();
        assert_eq!(config.max_nesting_depth, 2);
        assert!(config.max_entries < ReaderConfig::default().max_entries);
        assert_eq!(config.header_window, ReaderConfig::default().header_window);
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        let config = ReaderConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_chunk_size(), 1);
    }
}
