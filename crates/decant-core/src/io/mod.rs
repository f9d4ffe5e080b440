//! Byte sources and I/O adapters.
//!
//! Everything the engine reads goes through [`ByteSource`], a positional
//! interface. Sequential consumers (decoders) get a [`SourceReader`] over a
//! window of a source, and nested archives are read through a
//! [`DecodedSource`].

pub mod counting;
pub mod decoded;
pub mod reader;
pub mod source;

// Re-export main types for convenience
pub use counting::CountingReader;
pub use decoded::DecodedSource;
pub use reader::SourceReader;
pub use source::ByteSource;
pub use source::FileSource;
pub use source::MemorySource;
pub use source::measured_size;
pub use source::read_exact_at;
pub use source::read_up_to;
