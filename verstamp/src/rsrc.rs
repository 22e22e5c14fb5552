//! The PE resource directory: a three-level tree of type, name and language.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::bytes::{align_up, to_u32, to_usize, utf16_bytes, write_bytes, write_u16, write_u32};
use crate::error::ImageError;
use crate::pe::PeImage;

/// Resource type of version information.
pub const RT_VERSION: u16 = 16;
/// Resource type of side-by-side manifests.
pub const RT_MANIFEST: u16 = 24;

const DIR_HEADER_LEN: usize = 16;
const DIR_ENTRY_LEN: usize = 8;
const DATA_ENTRY_LEN: usize = 16;
const HIGH_BIT: u32 = 0x8000_0000;

/// Identifier of a resource type or resource: numeric or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceName {
    /// Numeric identifier.
    Id(u16),
    /// Named identifier.
    Name(String),
}

impl Ord for ResourceName {
    // Directory order: named entries first (case-insensitive), then ids ascending.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Name(a), Self::Name(b)) => a
                .to_uppercase()
                .cmp(&b.to_uppercase())
                .then_with(|| a.cmp(b)),
            (Self::Name(_), Self::Id(_)) => Ordering::Less,
            (Self::Id(_), Self::Name(_)) => Ordering::Greater,
            (Self::Id(a), Self::Id(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for ResourceName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Raw bytes of one resource plus its declared code page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceData {
    /// Resource payload.
    pub data: Vec<u8>,
    /// Code page recorded in the data entry (usually zero).
    pub code_page: u32,
}

impl ResourceData {
    /// Wrap a payload with code page zero.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, code_page: 0 }
    }
}

type Languages = BTreeMap<u16, ResourceData>;
type Names = BTreeMap<ResourceName, Languages>;

/// In-memory copy of a resource directory.
///
/// Parsing copies every payload out of the image, so the tree can be
/// serialized to any location independently of where it was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTree {
    types: BTreeMap<ResourceName, Names>,
}

impl ResourceTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a resource, returning the previous payload.
    pub fn insert(
        &mut self,
        kind: ResourceName,
        name: ResourceName,
        language: u16,
        data: ResourceData,
    ) -> Option<ResourceData> {
        self.types
            .entry(kind)
            .or_default()
            .entry(name)
            .or_default()
            .insert(language, data)
    }

    /// Look up a single resource.
    pub fn get(&self, kind: &ResourceName, name: &ResourceName, language: u16) -> Option<&ResourceData> {
        self.types.get(kind)?.get(name)?.get(&language)
    }

    /// Remove every language of a resource. Returns how many were removed.
    pub fn remove_all_languages(&mut self, kind: &ResourceName, name: &ResourceName) -> usize {
        let Some(names) = self.types.get_mut(kind) else {
            return 0;
        };
        let removed = names.remove(name).map_or(0, |langs| langs.len());
        if names.is_empty() {
            self.types.remove(kind);
        }
        removed
    }

    /// First resource of a type in directory order.
    pub fn first_of_type(&self, kind: &ResourceName) -> Option<(&ResourceName, u16, &ResourceData)> {
        let (name, langs) = self.types.get(kind)?.iter().next()?;
        let (lang, data) = langs.iter().next()?;
        Some((name, *lang, data))
    }

    /// All resources as `(type, name, language, data)` in directory order.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceName, &ResourceName, u16, &ResourceData)> {
        self.types.iter().flat_map(|(kind, names)| {
            names.iter().flat_map(move |(name, langs)| {
                langs.iter().map(move |(lang, data)| (kind, name, *lang, data))
            })
        })
    }

    /// Number of leaf resources.
    pub fn len(&self) -> usize {
        self.types
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    /// Whether the tree holds no resources.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Read the resource directory rooted at `dir_rva` out of an image.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError`] on truncated or inconsistent directory data.
    pub fn parse(image: &PeImage, dir_rva: u32) -> Result<Self, ImageError> {
        let reader = DirReader { image, dir_rva };
        let mut tree = Self::new();

        for (kind, kind_field) in reader.entries(0)? {
            let kind_dir = reader.subdirectory(kind_field)?;
            for (name, name_field) in reader.entries(kind_dir)? {
                let name_dir = reader.subdirectory(name_field)?;
                for (lang, lang_field) in reader.entries(name_dir)? {
                    let ResourceName::Id(language) = lang else {
                        return Err(ImageError::Malformed(
                            "named language entries are not supported".to_owned(),
                        ));
                    };
                    let data = reader.leaf(lang_field)?;
                    tree.insert(kind.clone(), name.clone(), language, data);
                }
            }
        }

        Ok(tree)
    }

    /// Serialize the tree as it will appear at `base_rva` in the image.
    ///
    /// Layout: all directory tables (root, types, names), then name strings,
    /// then data entries, then 8-byte aligned payloads.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Malformed`] if an offset no longer fits in 32 bits.
    pub fn serialize(&self, base_rva: u32) -> Result<Vec<u8>, ImageError> {
        let mut cursor = dir_len(self.types.len());

        let mut type_dirs = Vec::with_capacity(self.types.len());
        for names in self.types.values() {
            type_dirs.push(cursor);
            cursor = cursor.saturating_add(dir_len(names.len()));
        }
        let mut name_dirs = Vec::new();
        for langs in self.types.values().flat_map(BTreeMap::values) {
            name_dirs.push(cursor);
            cursor = cursor.saturating_add(dir_len(langs.len()));
        }

        let mut strings = Vec::new();
        let mut type_strings = Vec::with_capacity(self.types.len());
        for kind in self.types.keys() {
            type_strings.push(place_string(kind, &mut cursor, &mut strings));
        }
        let mut name_strings = Vec::new();
        for name in self.types.values().flat_map(BTreeMap::keys) {
            name_strings.push(place_string(name, &mut cursor, &mut strings));
        }

        cursor = align_up(cursor, 4)?;
        let mut data_entries = Vec::new();
        for _ in self.iter() {
            data_entries.push(cursor);
            cursor = cursor.saturating_add(DATA_ENTRY_LEN);
        }

        let mut payloads = Vec::new();
        for (_, _, _, resource) in self.iter() {
            cursor = align_up(cursor, 8)?;
            payloads.push(cursor);
            cursor = cursor.saturating_add(resource.data.len());
        }

        let mut out = vec![0u8; cursor];
        for (offset, bytes) in &strings {
            write_bytes(&mut out, *offset, bytes)?;
        }

        write_dir_header(&mut out, 0, self.types.keys())?;
        let mut name_index = 0usize;
        let mut leaf_index = 0usize;
        for (type_index, (kind, names)) in self.types.iter().enumerate() {
            let root_entry = entry_offset(0, type_index);
            write_name(&mut out, root_entry, kind, type_strings.get(type_index).copied().flatten())?;
            write_u32(&mut out, root_entry.saturating_add(4), HIGH_BIT | to_u32(type_dirs[type_index], "directory offset")?)?;

            let type_dir = type_dirs[type_index];
            write_dir_header(&mut out, type_dir, names.keys())?;
            for (slot, (name, langs)) in names.iter().enumerate() {
                let type_entry = entry_offset(type_dir, slot);
                let name_dir = name_dirs[name_index];
                write_name(&mut out, type_entry, name, name_strings.get(name_index).copied().flatten())?;
                write_u32(&mut out, type_entry.saturating_add(4), HIGH_BIT | to_u32(name_dir, "directory offset")?)?;

                write_dir_counts(&mut out, name_dir, 0, u16::try_from(langs.len()).unwrap_or(u16::MAX))?;
                for (lang_slot, (lang, resource)) in langs.iter().enumerate() {
                    let name_entry = entry_offset(name_dir, lang_slot);
                    let data_entry = data_entries[leaf_index];
                    let payload = payloads[leaf_index];
                    write_u32(&mut out, name_entry, u32::from(*lang))?;
                    write_u32(&mut out, name_entry.saturating_add(4), to_u32(data_entry, "data entry offset")?)?;

                    let payload_rva = base_rva
                        .checked_add(to_u32(payload, "payload offset")?)
                        .ok_or_else(|| ImageError::Malformed("resource RVA overflows".to_owned()))?;
                    write_u32(&mut out, data_entry, payload_rva)?;
                    write_u32(&mut out, data_entry.saturating_add(4), to_u32(resource.data.len(), "resource size")?)?;
                    write_u32(&mut out, data_entry.saturating_add(8), resource.code_page)?;
                    write_bytes(&mut out, payload, &resource.data)?;
                    leaf_index = leaf_index.saturating_add(1);
                }
                name_index = name_index.saturating_add(1);
            }
        }

        Ok(out)
    }
}

fn dir_len(entries: usize) -> usize {
    DIR_HEADER_LEN.saturating_add(DIR_ENTRY_LEN.saturating_mul(entries))
}

fn entry_offset(dir: usize, slot: usize) -> usize {
    dir.saturating_add(DIR_HEADER_LEN)
        .saturating_add(DIR_ENTRY_LEN.saturating_mul(slot))
}

/// Reserve space for a length-prefixed UTF-16 name; ids need none.
fn place_string(name: &ResourceName, cursor: &mut usize, strings: &mut Vec<(usize, Vec<u8>)>) -> Option<usize> {
    let ResourceName::Name(text) = name else {
        return None;
    };
    let units = utf16_bytes(text);
    let count = u16::try_from(units.len() / 2).unwrap_or(u16::MAX);
    let mut bytes = count.to_le_bytes().to_vec();
    bytes.extend(units);
    let offset = *cursor;
    *cursor = cursor.saturating_add(bytes.len());
    strings.push((offset, bytes));
    Some(offset)
}

fn write_dir_header<'a>(
    out: &mut [u8],
    offset: usize,
    keys: impl Iterator<Item = &'a ResourceName>,
) -> Result<(), ImageError> {
    let (mut named, mut ids) = (0u16, 0u16);
    for key in keys {
        match key {
            ResourceName::Name(_) => named = named.saturating_add(1),
            ResourceName::Id(_) => ids = ids.saturating_add(1),
        }
    }
    write_dir_counts(out, offset, named, ids)
}

fn write_dir_counts(out: &mut [u8], offset: usize, named: u16, ids: u16) -> Result<(), ImageError> {
    write_u16(out, offset.saturating_add(12), named)?;
    write_u16(out, offset.saturating_add(14), ids)
}

fn write_name(out: &mut [u8], entry: usize, name: &ResourceName, string_offset: Option<usize>) -> Result<(), ImageError> {
    let field = match (name, string_offset) {
        (ResourceName::Id(id), _) => u32::from(*id),
        (ResourceName::Name(_), Some(offset)) => HIGH_BIT | to_u32(offset, "name offset")?,
        (ResourceName::Name(text), None) => {
            return Err(ImageError::Malformed(format!("no string placed for '{text}'")))
        }
    };
    write_u32(out, entry, field)
}

struct DirReader<'a> {
    image: &'a PeImage,
    dir_rva: u32,
}

impl DirReader<'_> {
    fn read_u32(&self, offset: u32) -> Result<u32, ImageError> {
        let raw = self.image.read_rva(self.rva(offset)?, 4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_u16(&self, offset: u32) -> Result<u16, ImageError> {
        let raw = self.image.read_rva(self.rva(offset)?, 2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn rva(&self, offset: u32) -> Result<u32, ImageError> {
        self.dir_rva
            .checked_add(offset)
            .ok_or_else(|| ImageError::Malformed("resource offset overflows".to_owned()))
    }

    fn entries(&self, dir: u32) -> Result<Vec<(ResourceName, u32)>, ImageError> {
        let named = u32::from(self.read_u16(dir.saturating_add(12))?);
        let ids = u32::from(self.read_u16(dir.saturating_add(14))?);
        let count = named.saturating_add(ids);

        let mut entries = Vec::new();
        for slot in 0..count {
            let entry = dir
                .saturating_add(16)
                .saturating_add(slot.saturating_mul(8));
            let name_field = self.read_u32(entry)?;
            let data_field = self.read_u32(entry.saturating_add(4))?;
            entries.push((self.name(name_field)?, data_field));
        }
        Ok(entries)
    }

    fn name(&self, field: u32) -> Result<ResourceName, ImageError> {
        if field & HIGH_BIT == 0 {
            return u16::try_from(field)
                .map(ResourceName::Id)
                .map_err(|_| ImageError::Malformed(format!("resource id {field:#x} out of range")));
        }
        let offset = field & !HIGH_BIT;
        let len = usize::from(self.read_u16(offset)?);
        let raw = self
            .image
            .read_rva(self.rva(offset.saturating_add(2))?, len.saturating_mul(2))?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(ResourceName::Name(String::from_utf16_lossy(&units)))
    }

    fn subdirectory(&self, field: u32) -> Result<u32, ImageError> {
        if field & HIGH_BIT == 0 {
            return Err(ImageError::Malformed(
                "expected a subdirectory, found a data entry".to_owned(),
            ));
        }
        Ok(field & !HIGH_BIT)
    }

    fn leaf(&self, field: u32) -> Result<ResourceData, ImageError> {
        if field & HIGH_BIT != 0 {
            return Err(ImageError::Malformed(
                "resource tree deeper than three levels".to_owned(),
            ));
        }
        let data_rva = self.read_u32(field)?;
        let size = self.read_u32(field.saturating_add(4))?;
        let code_page = self.read_u32(field.saturating_add(8))?;
        let data = self.image.read_rva(data_rva, to_usize(size))?.to_vec();
        Ok(ResourceData { data, code_page })
    }
}
