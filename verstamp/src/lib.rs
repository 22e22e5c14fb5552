//! Verstamp: writes `VERSIONINFO` resources into PE binaries in place.
//!
//! Parses the image's resource directory, swaps the `RT_VERSION` entry for a
//! freshly encoded one, and writes the result back atomically. Every other
//! resource and every byte outside the resource section is preserved.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bytes;

/// Error types for stamping and image parsing.
pub mod error;
/// Per-path exclusive locks.
pub mod lock;
/// PE header and section table model.
pub mod pe;
/// Resource directory parsing and serialization.
pub mod rsrc;
/// Stamp and read operations on files.
pub mod stamper;
/// Four-part versions and the stamped record.
pub mod version;
/// `VS_VERSIONINFO` encoding and decoding.
pub mod versioninfo;

pub use error::{ImageError, StampError};
pub use stamper::{read_version_info, stamp};
pub use version::{FourPartVersion, VersionRecord, CODE_PAGE_UNICODE, LANG_EN_US};
pub use versioninfo::VersionInfo;
