//! Archive format detection.
//!
//! Detection reads a bounded header window at offset 0 and evaluates every
//! registered signature predicate against it. Structural probes run only
//! for formats that no fixed-signature match outranks. Detection only
//! reads through the positional [`ByteSource`] interface, so it never
//! moves a cursor the caller depends on.

use crate::ArchiveError;
use crate::ReaderConfig;
use crate::Result;
use crate::io::ByteSource;
use crate::io::read_up_to;

use super::FormatDescriptor;
use super::FormatRegistry;

/// How a candidate was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Fixed signature in the header window.
    Signature,
    /// Structural probe.
    Probe,
}

/// One ranked detection result.
#[derive(Debug, Clone)]
pub struct Candidate<'r> {
    /// The matching format.
    pub descriptor: &'r FormatDescriptor,
    /// How it matched.
    pub matched_by: MatchKind,
}

/// Returns the formats that recognize `source`, best first.
///
/// Ties are broken by descending priority, then registration order. An
/// empty source or one that nothing recognizes yields an empty list.
///
/// # Errors
///
/// Returns `Io` if reading the header window fails, or the error of a
/// probe that fails for reasons other than a mismatch.
pub fn detect<'r>(
    registry: &'r FormatRegistry,
    source: &dyn ByteSource,
    config: &ReaderConfig,
) -> Result<Vec<Candidate<'r>>> {
    let header = read_up_to(source, 0, config.header_window)?;
    let descriptors = registry.list();

    let signature_hits: Vec<&FormatDescriptor> = descriptors
        .iter()
        .copied()
        .filter(|d| d.format().matches_signature(&header))
        .collect();
    let best_signature = signature_hits.iter().map(|d| d.priority()).max();

    let mut candidates: Vec<Candidate<'r>> = Vec::new();
    for descriptor in descriptors {
        if signature_hits.iter().any(|d| d.order() == descriptor.order()) {
            candidates.push(Candidate {
                descriptor,
                matched_by: MatchKind::Signature,
            });
            continue;
        }
        if !descriptor.format().has_probe() {
            continue;
        }
        if best_signature.is_some_and(|best| best > descriptor.priority()) {
            continue;
        }
        if descriptor.format().probe(source, config)? {
            candidates.push(Candidate {
                descriptor,
                matched_by: MatchKind::Probe,
            });
        }
    }

    // `list()` is already ranked; the loop keeps that order.
    tracing::debug!(
        candidates = ?candidates.iter().map(|c| c.descriptor.name()).collect::<Vec<_>>(),
        header_len = header.len(),
        "format detection"
    );
    Ok(candidates)
}

/// Returns the best candidate for `source`.
///
/// # Errors
///
/// Returns `UnrecognizedFormat` if no registered format matches.
pub fn detect_best<'r>(
    registry: &'r FormatRegistry,
    source: &dyn ByteSource,
    config: &ReaderConfig,
) -> Result<&'r FormatDescriptor> {
    detect(registry, source, config)?
        .into_iter()
        .next()
        .map(|c| c.descriptor)
        .ok_or(ArchiveError::UnrecognizedFormat)
}
