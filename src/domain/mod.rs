//! Domain layer: the ASiC-E container model and transformations.
//!
//! - [`datafile`]: the immutable data-file value type with its digests
//! - [`hashcode`]: complete <-> hashcode container transformation
//! - [`zipstream`]: byte-level ZIP rewriter for sequential ZIP parsers

pub mod datafile;
pub mod hashcode;
pub mod zipstream;

pub use datafile::DataFile;
pub use zipstream::ZipInputStream;
