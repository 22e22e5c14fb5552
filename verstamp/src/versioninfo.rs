//! `VS_VERSIONINFO` encoding and decoding.
//!
//! Layout follows the native structure exactly: every block is
//! `wLength, wValueLength, wType, szKey, padding, Value, padding, Children`
//! with children aligned on 32-bit boundaries from the start of the resource.

use crate::bytes::{pad_to, read_u16, read_u32, slice, utf16_bytes, write_u16};
use crate::error::{ImageError, StampError};
use crate::version::{FourPartVersion, VersionRecord};

/// `VS_FIXEDFILEINFO.dwSignature`.
pub const VS_FFI_SIGNATURE: u32 = 0xFEEF_04BD;
/// `VS_FIXEDFILEINFO.dwStrucVersion` (1.0).
pub const VS_FFI_STRUCVERSION: u32 = 0x0001_0000;
/// Bits of `dwFileFlags` that are meaningful.
pub const VS_FFI_FILEFLAGSMASK: u32 = 0x0000_003F;
/// `VOS_NT_WINDOWS32`.
pub const VOS_NT_WINDOWS32: u32 = 0x0004_0004;
/// File type of an executable.
pub const VFT_APP: u32 = 0x1;
/// File type of a dynamic-link library.
pub const VFT_DLL: u32 = 0x2;

const FIXED_INFO_LEN: usize = 52;
const ROOT_KEY: &str = "VS_VERSION_INFO";
const STRING_FILE_INFO: &str = "StringFileInfo";
const VAR_FILE_INFO: &str = "VarFileInfo";
const TRANSLATION: &str = "Translation";
const MAX_DEPTH: usize = 4;

const TYPE_BINARY: u16 = 0;
const TYPE_TEXT: u16 = 1;

/// The fixed numeric part of a version resource (`VS_FIXEDFILEINFO`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedFileInfo {
    /// Binary file version.
    pub file_version: FourPartVersion,
    /// Binary product version.
    pub product_version: FourPartVersion,
    /// Valid bits in `file_flags`.
    pub file_flags_mask: u32,
    /// Debug/prerelease/patched flags.
    pub file_flags: u32,
    /// Target operating system.
    pub file_os: u32,
    /// `VFT_APP`, `VFT_DLL`, ...
    pub file_type: u32,
    /// Subtype for drivers and fonts.
    pub file_subtype: u32,
    /// Creation timestamp, normally zero.
    pub file_date: u64,
}

impl FixedFileInfo {
    /// Fixed info with the usual defaults for a Win32 binary.
    pub fn new(file_version: FourPartVersion, product_version: FourPartVersion, file_type: u32) -> Self {
        Self {
            file_version,
            product_version,
            file_flags_mask: VS_FFI_FILEFLAGSMASK,
            file_flags: 0,
            file_os: VOS_NT_WINDOWS32,
            file_type,
            file_subtype: 0,
            file_date: 0,
        }
    }

    /// Serialize to the 52-byte native layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let date_ms = u32::try_from(self.file_date >> 32).unwrap_or_default();
        let date_ls = u32::try_from(self.file_date & 0xFFFF_FFFF).unwrap_or_default();
        [
            VS_FFI_SIGNATURE,
            VS_FFI_STRUCVERSION,
            self.file_version.ms(),
            self.file_version.ls(),
            self.product_version.ms(),
            self.product_version.ls(),
            self.file_flags_mask,
            self.file_flags,
            self.file_os,
            self.file_type,
            self.file_subtype,
            date_ms,
            date_ls,
        ]
        .iter()
        .flat_map(|field| field.to_le_bytes())
        .collect()
    }

    /// Parse the native layout, checking the signature.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError`] when the block is short or the signature is wrong.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ImageError> {
        let signature = read_u32(data, 0)?;
        if signature != VS_FFI_SIGNATURE {
            return Err(ImageError::Malformed(format!(
                "bad VS_FIXEDFILEINFO signature {signature:#010x}"
            )));
        }
        let field = |index: usize| read_u32(data, index.saturating_mul(4));
        Ok(Self {
            file_version: FourPartVersion::from_ms_ls(field(2)?, field(3)?),
            product_version: FourPartVersion::from_ms_ls(field(4)?, field(5)?),
            file_flags_mask: field(6)?,
            file_flags: field(7)?,
            file_os: field(8)?,
            file_type: field(9)?,
            file_subtype: field(10)?,
            file_date: (u64::from(field(11)?) << 32) | u64::from(field(12)?),
        })
    }
}

/// One `StringTable` block: strings for a language/code-page pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringTable {
    /// Language identifier.
    pub language_id: u16,
    /// Code page.
    pub code_page: u16,
    /// Key/value pairs in file order.
    pub entries: Vec<(String, String)>,
}

impl StringTable {
    /// Look up a string by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Block key, e.g. `040904b0`.
    pub fn key(&self) -> String {
        format!("{:04x}{:04x}", self.language_id, self.code_page)
    }
}

/// A decoded or to-be-encoded version resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Numeric block.
    pub fixed: FixedFileInfo,
    /// Children of `StringFileInfo`.
    pub string_tables: Vec<StringTable>,
    /// `VarFileInfo\Translation` pairs of (language, code page).
    pub translations: Vec<(u16, u16)>,
}

impl VersionInfo {
    /// Build the resource content for a record.
    ///
    /// # Errors
    ///
    /// Returns [`StampError::MalformedVersion`] when either version string is invalid.
    pub fn from_record(record: &VersionRecord, file_type: u32) -> Result<Self, StampError> {
        let file_version: FourPartVersion = record.file_version.parse()?;
        let product_version: FourPartVersion = record.product_version.parse()?;
        let entries = record
            .string_entries()
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();

        Ok(Self {
            fixed: FixedFileInfo::new(file_version, product_version, file_type),
            string_tables: vec![StringTable {
                language_id: record.language_id,
                code_page: record.code_page,
                entries,
            }],
            translations: vec![(record.language_id, record.code_page)],
        })
    }

    /// Look up a string in the first string table.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.string_tables.first().and_then(|t| t.get(key))
    }

    /// Encode into the native binary layout.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Malformed`] if a block grows beyond 64 KiB.
    pub fn encode(&self) -> Result<Vec<u8>, ImageError> {
        let mut tables = Vec::with_capacity(self.string_tables.len());
        for table in &self.string_tables {
            let mut strings = Vec::with_capacity(table.entries.len());
            for (key, value) in &table.entries {
                strings.push(block(key, Value::Text(value), &[])?);
            }
            tables.push(block(&table.key(), Value::Container, &strings)?);
        }
        let string_file_info = block(STRING_FILE_INFO, Value::Container, &tables)?;

        let translation_bytes: Vec<u8> = self
            .translations
            .iter()
            .flat_map(|(lang, cp)| {
                let mut pair = lang.to_le_bytes().to_vec();
                pair.extend_from_slice(&cp.to_le_bytes());
                pair
            })
            .collect();
        let translation = block(TRANSLATION, Value::Binary(&translation_bytes), &[])?;
        let var_file_info = block(VAR_FILE_INFO, Value::Container, &[translation])?;

        let fixed = self.fixed.to_bytes();
        block(
            ROOT_KEY,
            Value::Binary(&fixed),
            &[string_file_info, var_file_info],
        )
    }

    /// Decode a version resource.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError`] when the data is truncated or not a version resource.
    pub fn decode(data: &[u8]) -> Result<Self, ImageError> {
        let (root, _) = parse_block(data, 0, 0)?;
        if root.key != ROOT_KEY {
            return Err(ImageError::Malformed(format!(
                "unexpected root key '{}'",
                root.key
            )));
        }
        if root.value.len() < FIXED_INFO_LEN {
            return Err(ImageError::Malformed(
                "version resource has no VS_FIXEDFILEINFO".to_owned(),
            ));
        }
        let fixed = FixedFileInfo::from_bytes(root.value)?;

        let mut string_tables = Vec::new();
        let mut translations = Vec::new();
        for child in &root.children {
            match child.key.as_str() {
                STRING_FILE_INFO => {
                    for table in &child.children {
                        string_tables.push(decode_string_table(table)?);
                    }
                }
                VAR_FILE_INFO => {
                    for var in child.children.iter().filter(|v| v.key == TRANSLATION) {
                        for pair in var.value.chunks_exact(4) {
                            translations.push((
                                u16::from_le_bytes([pair[0], pair[1]]),
                                u16::from_le_bytes([pair[2], pair[3]]),
                            ));
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            fixed,
            string_tables,
            translations,
        })
    }
}

enum Value<'a> {
    Container,
    Binary(&'a [u8]),
    Text(&'a str),
}

fn block(key: &str, value: Value<'_>, children: &[Vec<u8>]) -> Result<Vec<u8>, ImageError> {
    let mut buf = vec![0u8; 6];
    buf.extend(utf16_bytes(key));
    buf.extend([0, 0]);
    pad_to(&mut buf, 4);

    let (value_len, value_type) = match value {
        Value::Container => (0, TYPE_TEXT),
        Value::Binary(bytes) => {
            buf.extend_from_slice(bytes);
            (bytes.len(), TYPE_BINARY)
        }
        Value::Text(text) => {
            let encoded = utf16_bytes(text);
            buf.extend(&encoded);
            buf.extend([0, 0]);
            // Text lengths are counted in UTF-16 units, terminator included.
            ((encoded.len() / 2).saturating_add(1), TYPE_TEXT)
        }
    };

    for child in children {
        pad_to(&mut buf, 4);
        buf.extend_from_slice(child);
    }

    let total = u16::try_from(buf.len())
        .map_err(|_| ImageError::Malformed(format!("version block '{key}' exceeds 64 KiB")))?;
    let value_len = u16::try_from(value_len)
        .map_err(|_| ImageError::Malformed(format!("value of '{key}' exceeds 64 KiB")))?;
    write_u16(&mut buf, 0, total)?;
    write_u16(&mut buf, 2, value_len)?;
    write_u16(&mut buf, 4, value_type)?;
    Ok(buf)
}

struct RawBlock<'a> {
    key: String,
    value_type: u16,
    value: &'a [u8],
    children: Vec<RawBlock<'a>>,
}

fn align4(offset: usize) -> usize {
    offset.saturating_add(3) & !3
}

fn parse_block(data: &[u8], offset: usize, depth: usize) -> Result<(RawBlock<'_>, usize), ImageError> {
    if depth > MAX_DEPTH {
        return Err(ImageError::Malformed("version blocks nested too deeply".to_owned()));
    }
    let length = usize::from(read_u16(data, offset)?);
    if length < 6 {
        return Err(ImageError::Malformed(format!(
            "version block at {offset:#x} has length {length}"
        )));
    }
    let end = offset.saturating_add(length).min(data.len());
    let value_len = usize::from(read_u16(data, offset.saturating_add(2))?);
    let value_type = read_u16(data, offset.saturating_add(4))?;

    let mut units = Vec::new();
    let mut pos = offset.saturating_add(6);
    loop {
        if pos >= end {
            return Err(ImageError::Malformed("unterminated version block key".to_owned()));
        }
        let unit = read_u16(data, pos)?;
        pos = pos.saturating_add(2);
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    let key = String::from_utf16_lossy(&units);

    pos = align4(pos).min(end);
    let value_bytes = if value_type == TYPE_TEXT {
        value_len.saturating_mul(2)
    } else {
        value_len
    };
    let value_bytes = value_bytes.min(end.saturating_sub(pos));
    let value = slice(data, pos, value_bytes)?;
    pos = align4(pos.saturating_add(value_bytes));

    let mut children = Vec::new();
    while pos < end {
        let (child, child_end) = parse_block(data, pos, depth.saturating_add(1))?;
        children.push(child);
        pos = align4(child_end);
    }

    Ok((
        RawBlock {
            key,
            value_type,
            value,
            children,
        },
        end,
    ))
}

fn decode_string_table(table: &RawBlock<'_>) -> Result<StringTable, ImageError> {
    let parse_hex = |range: std::ops::Range<usize>| {
        table
            .key
            .get(range)
            .and_then(|digits| u16::from_str_radix(digits, 16).ok())
            .ok_or_else(|| ImageError::Malformed(format!("bad string table key '{}'", table.key)))
    };
    let language_id = parse_hex(0..4)?;
    let code_page = parse_hex(4..8)?;

    let entries = table
        .children
        .iter()
        .map(|entry| (entry.key.clone(), decode_text(entry)))
        .collect();

    Ok(StringTable {
        language_id,
        code_page,
        entries,
    })
}

fn decode_text(entry: &RawBlock<'_>) -> String {
    if entry.value_type != TYPE_TEXT {
        return String::new();
    }
    let units: Vec<u16> = entry
        .value
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
fn header(data: &[u8], offset: usize) -> (u16, u16, u16) {
    (
        read_u16(data, offset).unwrap_or_default(),
        read_u16(data, offset.saturating_add(2)).unwrap_or_default(),
        read_u16(data, offset.saturating_add(4)).unwrap_or_default(),
    )
}
