//! Version numbers and the record written into a binary.

use std::fmt;
use std::str::FromStr;

use crate::error::StampError;

/// US English, the language most tools fall back to.
pub const LANG_EN_US: u16 = 0x0409;

/// UTF-16 code page used for string tables.
pub const CODE_PAGE_UNICODE: u16 = 1200;

/// A `major.minor.build.revision` version with 16-bit components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FourPartVersion {
    /// Major component.
    pub major: u16,
    /// Minor component.
    pub minor: u16,
    /// Build component.
    pub build: u16,
    /// Revision component.
    pub revision: u16,
}

impl FourPartVersion {
    /// Create a version from its four components.
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// High 32 bits as stored in `VS_FIXEDFILEINFO` (`major << 16 | minor`).
    pub fn ms(&self) -> u32 {
        (u32::from(self.major) << 16) | u32::from(self.minor)
    }

    /// Low 32 bits as stored in `VS_FIXEDFILEINFO` (`build << 16 | revision`).
    pub fn ls(&self) -> u32 {
        (u32::from(self.build) << 16) | u32::from(self.revision)
    }

    /// Rebuild a version from the two packed halves.
    pub fn from_ms_ls(ms: u32, ls: u32) -> Self {
        Self {
            major: high_word(ms),
            minor: low_word(ms),
            build: high_word(ls),
            revision: low_word(ls),
        }
    }
}

fn high_word(value: u32) -> u16 {
    u16::try_from(value >> 16).unwrap_or_default()
}

fn low_word(value: u32) -> u16 {
    u16::try_from(value & 0xFFFF).unwrap_or_default()
}

impl FromStr for FourPartVersion {
    type Err = StampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() != 4 {
            return Err(StampError::malformed(
                s,
                format!("expected 4 components, found {}", parts.len()),
            ));
        }

        let mut components = [0u16; 4];
        for (slot, part) in components.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(StampError::malformed(
                    s,
                    format!("component '{part}' is not a non-negative integer"),
                ));
            }
            *slot = part
                .parse::<u16>()
                .map_err(|_| StampError::malformed(s, format!("component '{part}' exceeds 65535")))?;
        }

        let [major, minor, build, revision] = components;
        Ok(Self::new(major, minor, build, revision))
    }
}

impl fmt::Display for FourPartVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Everything written into a binary's version resource.
///
/// Built by the caller right before [`crate::stamp`]; the text attributes are
/// expected to be complete at that point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    /// File version, `a.b.c.d`.
    pub file_version: String,
    /// Product version, `a.b.c.d`.
    pub product_version: String,
    /// `CompanyName` string.
    pub company_name: String,
    /// `FileDescription` string.
    pub file_description: String,
    /// `InternalName` string.
    pub internal_name: String,
    /// `LegalCopyright` string.
    pub legal_copyright: String,
    /// `OriginalFilename` string.
    pub original_filename: String,
    /// `ProductName` string.
    pub product_name: String,
    /// Language of the string table.
    pub language_id: u16,
    /// Code page of the string table.
    pub code_page: u16,
}

impl Default for VersionRecord {
    fn default() -> Self {
        Self {
            file_version: "0.0.0.0".to_owned(),
            product_version: "0.0.0.0".to_owned(),
            company_name: String::new(),
            file_description: String::new(),
            internal_name: String::new(),
            legal_copyright: String::new(),
            original_filename: String::new(),
            product_name: String::new(),
            language_id: LANG_EN_US,
            code_page: CODE_PAGE_UNICODE,
        }
    }
}

impl VersionRecord {
    /// String table entries in the order they are written.
    pub fn string_entries(&self) -> [(&'static str, &str); 8] {
        [
            ("CompanyName", &self.company_name),
            ("FileDescription", &self.file_description),
            ("FileVersion", &self.file_version),
            ("InternalName", &self.internal_name),
            ("LegalCopyright", &self.legal_copyright),
            ("OriginalFilename", &self.original_filename),
            ("ProductName", &self.product_name),
            ("ProductVersion", &self.product_version),
        ]
    }
}
