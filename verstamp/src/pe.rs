//! Minimal PE/PE32+ image model: headers, sections, data directories.
//!
//! Only what resource rewriting needs is decoded. Everything else in the file
//! is carried through as opaque bytes.

use crate::bytes::{align_up, read_u16, read_u32, slice, to_u32, to_usize, write_bytes, write_u16, write_u32};
use crate::error::ImageError;
use crate::rsrc::ResourceTree;

/// Index of the resource table in the data directory array.
pub const DIR_RESOURCE: usize = 2;
/// Index of the certificate (Authenticode) table.
pub const DIR_SECURITY: usize = 4;

const PE32_MAGIC: u16 = 0x010B;
const PE32_PLUS_MAGIC: u16 = 0x020B;
const IMAGE_FILE_DLL: u16 = 0x2000;
const SECTION_HEADER_LEN: usize = 40;
const RSRC_CHARACTERISTICS: u32 = 0x4000_0040;

// Optional header field offsets shared by PE32 and PE32+.
const OPT_SIZE_OF_INITIALIZED_DATA: usize = 8;
const OPT_SECTION_ALIGNMENT: usize = 32;
const OPT_FILE_ALIGNMENT: usize = 36;
const OPT_SIZE_OF_IMAGE: usize = 56;
const OPT_SIZE_OF_HEADERS: usize = 60;
const OPT_CHECKSUM: usize = 64;

/// One entry of the section table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name, e.g. `.rsrc`.
    pub name: String,
    /// Size in memory.
    pub virtual_size: u32,
    /// RVA of the first byte.
    pub virtual_address: u32,
    /// Size of the initialized data on disk.
    pub raw_size: u32,
    /// File offset of the data.
    pub raw_offset: u32,
    /// Section flags.
    pub characteristics: u32,
    header_offset: usize,
}

impl Section {
    fn mapped_size(&self) -> u32 {
        if self.virtual_size == 0 {
            self.raw_size
        } else {
            self.virtual_size
        }
    }

    fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.virtual_address
            && u64::from(rva) < u64::from(self.virtual_address) + u64::from(self.mapped_size().max(self.raw_size))
    }

    /// Whether the section occupies the given file range.
    pub fn covers_file_range(&self, offset: usize, len: usize) -> bool {
        let start = to_usize(self.raw_offset);
        let end = start.saturating_add(to_usize(self.raw_size));
        offset >= start && offset.saturating_add(len) <= end
    }
}

/// Where rewritten resources ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// The existing resource section was rewritten.
    InPlace {
        /// Name of the rewritten section.
        section: String,
    },
    /// A new section was appended to the image.
    Appended {
        /// Name of the new section.
        section: String,
    },
}

/// A parsed PE image that owns its bytes.
#[derive(Debug, Clone)]
pub struct PeImage {
    bytes: Vec<u8>,
    coff_offset: usize,
    optional_offset: usize,
    data_dir_offset: usize,
    data_dir_count: usize,
    section_table: usize,
    characteristics: u16,
    sections: Vec<Section>,
}

impl PeImage {
    /// Parse PE headers and the section table.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError`] if the file is not a well-formed PE or PE32+ image.
    pub fn parse(bytes: Vec<u8>) -> Result<Self, ImageError> {
        if slice(&bytes, 0, 2)? != b"MZ" {
            return Err(ImageError::Malformed("missing MZ signature".to_owned()));
        }
        let pe_offset = to_usize(read_u32(&bytes, 0x3C)?);
        if slice(&bytes, pe_offset, 4)? != b"PE\0\0" {
            return Err(ImageError::Malformed("missing PE signature".to_owned()));
        }

        let coff_offset = pe_offset.saturating_add(4);
        let section_count = usize::from(read_u16(&bytes, coff_offset.saturating_add(2))?);
        let optional_len = usize::from(read_u16(&bytes, coff_offset.saturating_add(16))?);
        let characteristics = read_u16(&bytes, coff_offset.saturating_add(18))?;
        let optional_offset = coff_offset.saturating_add(20);

        let (count_field, dirs_field) = match read_u16(&bytes, optional_offset)? {
            PE32_MAGIC => (92, 96),
            PE32_PLUS_MAGIC => (108, 112),
            other => {
                return Err(ImageError::Malformed(format!(
                    "unknown optional header magic {other:#06x}"
                )))
            }
        };
        let declared = to_usize(read_u32(&bytes, optional_offset.saturating_add(count_field))?);
        let data_dir_offset = optional_offset.saturating_add(dirs_field);
        let section_table = optional_offset.saturating_add(optional_len);
        let fitting = section_table.saturating_sub(data_dir_offset) / 8;
        let data_dir_count = declared.min(16).min(fitting);

        let mut sections = Vec::with_capacity(section_count);
        for index in 0..section_count {
            let header_offset = section_table.saturating_add(index.saturating_mul(SECTION_HEADER_LEN));
            let raw_name = slice(&bytes, header_offset, 8)?;
            let name_len = raw_name.iter().position(|b| *b == 0).unwrap_or(8);
            let section = Section {
                name: String::from_utf8_lossy(&raw_name[..name_len]).into_owned(),
                virtual_size: read_u32(&bytes, header_offset.saturating_add(8))?,
                virtual_address: read_u32(&bytes, header_offset.saturating_add(12))?,
                raw_size: read_u32(&bytes, header_offset.saturating_add(16))?,
                raw_offset: read_u32(&bytes, header_offset.saturating_add(20))?,
                characteristics: read_u32(&bytes, header_offset.saturating_add(36))?,
                header_offset,
            };
            if section.raw_size > 0 {
                slice(&bytes, to_usize(section.raw_offset), to_usize(section.raw_size))?;
            }
            sections.push(section);
        }

        Ok(Self {
            bytes,
            coff_offset,
            optional_offset,
            data_dir_offset,
            data_dir_count,
            section_table,
            characteristics,
            sections,
        })
    }

    /// The image bytes, including any edits made so far.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the image and return its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Whether the COFF header marks this image as a DLL.
    pub fn is_dll(&self) -> bool {
        self.characteristics & IMAGE_FILE_DLL != 0
    }

    /// The section table.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Read a data directory entry; `None` when absent or empty.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError`] if the entry lies outside the optional header.
    pub fn data_directory(&self, index: usize) -> Result<Option<(u32, u32)>, ImageError> {
        if index >= self.data_dir_count {
            return Ok(None);
        }
        let offset = self.data_dir_offset.saturating_add(index.saturating_mul(8));
        let rva = read_u32(&self.bytes, offset)?;
        let size = read_u32(&self.bytes, offset.saturating_add(4))?;
        Ok((rva != 0 || size != 0).then_some((rva, size)))
    }

    /// Whether the image carries an Authenticode certificate table.
    pub fn is_signed(&self) -> bool {
        matches!(self.data_directory(DIR_SECURITY), Ok(Some((_, size))) if size > 0)
    }

    /// Map an RVA to a file offset.
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        let section = self.sections.iter().find(|s| s.contains_rva(rva))?;
        let delta = rva.checked_sub(section.virtual_address)?;
        if delta >= section.raw_size {
            return None;
        }
        Some(to_usize(section.raw_offset).saturating_add(to_usize(delta)))
    }

    /// Read `len` bytes of initialized data at an RVA.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError`] if the range is unmapped or extends past the section's raw data.
    pub fn read_rva(&self, rva: u32, len: usize) -> Result<&[u8], ImageError> {
        let offset = self
            .rva_to_offset(rva)
            .ok_or_else(|| ImageError::Malformed(format!("RVA {rva:#x} is not backed by file data")))?;
        let section_ok = self
            .sections
            .iter()
            .any(|s| s.contains_rva(rva) && s.covers_file_range(offset, len));
        if !section_ok {
            return Err(ImageError::Truncated { offset, len });
        }
        slice(&self.bytes, offset, len)
    }

    /// Parse the current resource directory, or an empty tree if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError`] if the directory is present but malformed.
    pub fn resources(&self) -> Result<ResourceTree, ImageError> {
        match self.data_directory(DIR_RESOURCE)? {
            Some((rva, _)) if rva != 0 => ResourceTree::parse(self, rva),
            _ => Ok(ResourceTree::new()),
        }
    }

    /// Stored optional-header checksum.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError`] if the header is truncated.
    pub fn stored_checksum(&self) -> Result<u32, ImageError> {
        read_u32(&self.bytes, self.optional_offset.saturating_add(OPT_CHECKSUM))
    }

    /// Compute the image checksum the way the loader verifies it.
    pub fn compute_checksum(&self) -> u32 {
        let checksum_offset = self.optional_offset.saturating_add(OPT_CHECKSUM);
        let mut sum: u64 = 0;
        for (index, chunk) in self.bytes.chunks(2).enumerate() {
            let offset = index.saturating_mul(2);
            if offset == checksum_offset || offset == checksum_offset.saturating_add(2) {
                continue;
            }
            let word = u16::from_le_bytes([chunk[0], chunk.get(1).copied().unwrap_or(0)]);
            sum = sum.saturating_add(u64::from(word));
            sum = (sum & 0xFFFF).saturating_add(sum >> 16);
        }
        sum = (sum & 0xFFFF).saturating_add(sum >> 16);
        let folded = u32::try_from(sum & 0xFFFF).unwrap_or_default();
        let len = u32::try_from(self.bytes.len()).unwrap_or(u32::MAX);
        folded.wrapping_add(len)
    }

    /// Recompute the checksum if the image had one.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError`] if the header is truncated.
    pub fn refresh_checksum(&mut self) -> Result<(), ImageError> {
        if self.stored_checksum()? == 0 {
            return Ok(());
        }
        let checksum = self.compute_checksum();
        write_u32(&mut self.bytes, self.optional_offset.saturating_add(OPT_CHECKSUM), checksum)
    }

    /// Write a resource tree into the image.
    ///
    /// The existing resource section is reused when the serialized tree fits
    /// both its raw size and the gap before the next section. Otherwise a new
    /// section is appended and the data directory repointed; the old section's
    /// bytes are left as they were.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::NoRoom`] when neither placement is possible.
    pub fn replace_resources(&mut self, tree: &ResourceTree) -> Result<Placement, ImageError> {
        if self.data_dir_count <= DIR_RESOURCE {
            return Err(ImageError::NoRoom("image has no resource data directory slot".to_owned()));
        }

        if let Some((rva, size)) = self.data_directory(DIR_RESOURCE)? {
            if let Some(index) = self.sections.iter().position(|s| s.virtual_address == rva && rva != 0) {
                let data = tree.serialize(rva)?;
                if data.len() <= self.in_place_capacity(index) {
                    return self.write_in_place(index, size, &data);
                }
            }
        }

        self.append_section(tree)
    }

    fn in_place_capacity(&self, index: usize) -> usize {
        let section = &self.sections[index];
        let virtual_limit = self
            .sections
            .iter()
            .filter(|s| s.virtual_address > section.virtual_address)
            .map(|s| s.virtual_address.saturating_sub(section.virtual_address))
            .min()
            .map_or(usize::MAX, to_usize);
        to_usize(section.raw_size).min(virtual_limit)
    }

    fn write_in_place(&mut self, index: usize, old_size: u32, data: &[u8]) -> Result<Placement, ImageError> {
        let section = self.sections[index].clone();
        let start = to_usize(section.raw_offset);
        let used = to_usize(old_size.max(section.virtual_size))
            .max(data.len())
            .min(to_usize(section.raw_size));
        write_bytes(&mut self.bytes, start, &vec![0u8; used])?;
        write_bytes(&mut self.bytes, start, data)?;

        let new_size = to_u32(data.len(), "resource size")?;
        write_u32(&mut self.bytes, section.header_offset.saturating_add(8), new_size)?;
        self.sections[index].virtual_size = new_size;
        self.set_data_directory(DIR_RESOURCE, section.virtual_address, new_size)?;
        self.grow_size_of_image()?;

        Ok(Placement::InPlace { section: section.name })
    }

    fn append_section(&mut self, tree: &ResourceTree) -> Result<Placement, ImageError> {
        let header_offset = self
            .section_table
            .saturating_add(self.sections.len().saturating_mul(SECTION_HEADER_LEN));
        let header_end = header_offset.saturating_add(SECTION_HEADER_LEN);
        let size_of_headers = to_usize(self.optional_u32(OPT_SIZE_OF_HEADERS)?);
        let first_raw = self
            .sections
            .iter()
            .filter(|s| s.raw_size > 0)
            .map(|s| to_usize(s.raw_offset))
            .min()
            .unwrap_or(self.bytes.len());
        if header_end > size_of_headers.min(first_raw) {
            return Err(ImageError::NoRoom("section table has no free slot".to_owned()));
        }
        if slice(&self.bytes, header_offset, SECTION_HEADER_LEN)?.iter().any(|b| *b != 0) {
            return Err(ImageError::NoRoom("header slack after the section table is in use".to_owned()));
        }

        let section_alignment = to_usize(self.optional_u32(OPT_SECTION_ALIGNMENT)?);
        let file_alignment = to_usize(self.optional_u32(OPT_FILE_ALIGNMENT)?);
        let image_end = self
            .sections
            .iter()
            .map(|s| to_usize(s.virtual_address).saturating_add(to_usize(s.mapped_size())))
            .max()
            .unwrap_or(size_of_headers);
        let virtual_address = to_u32(align_up(image_end, section_alignment)?, "section address")?;

        let data = tree.serialize(virtual_address)?;
        let raw_offset = align_up(self.bytes.len(), file_alignment)?;
        let raw_size = align_up(data.len(), file_alignment)?;
        let name = self.free_resource_section_name()?;
        self.bytes.resize(raw_offset, 0);
        self.bytes.extend_from_slice(&data);
        self.bytes.resize(raw_offset.saturating_add(raw_size), 0);

        let section = Section {
            name: name.clone(),
            virtual_size: to_u32(data.len(), "resource size")?,
            virtual_address,
            raw_size: to_u32(raw_size, "section size")?,
            raw_offset: to_u32(raw_offset, "section offset")?,
            characteristics: RSRC_CHARACTERISTICS,
            header_offset,
        };
        self.write_section_header(&section)?;

        let count = u16::try_from(self.sections.len().saturating_add(1))
            .map_err(|_| ImageError::NoRoom("too many sections".to_owned()))?;
        write_u16(&mut self.bytes, self.coff_offset.saturating_add(2), count)?;

        let initialized = self.optional_u32(OPT_SIZE_OF_INITIALIZED_DATA)?;
        self.set_optional_u32(
            OPT_SIZE_OF_INITIALIZED_DATA,
            initialized.saturating_add(section.raw_size),
        )?;
        self.set_data_directory(DIR_RESOURCE, virtual_address, section.virtual_size)?;
        self.sections.push(section);
        self.grow_size_of_image()?;

        Ok(Placement::Appended { section: name })
    }

    /// `.rsrc`, else the first of `.rsrc2`, `.rsrc3`, ... not already taken.
    fn free_resource_section_name(&self) -> Result<String, ImageError> {
        // Section names hold eight bytes, which caps the suffix at three digits.
        (1u16..=999)
            .map(|n| if n == 1 { ".rsrc".to_owned() } else { format!(".rsrc{n}") })
            .find(|candidate| self.sections.iter().all(|s| &s.name != candidate))
            .ok_or_else(|| ImageError::NoRoom("no free resource section name".to_owned()))
    }

    fn write_section_header(&mut self, section: &Section) -> Result<(), ImageError> {
        let mut header = [0u8; SECTION_HEADER_LEN];
        let name = section.name.as_bytes();
        header[..name.len().min(8)].copy_from_slice(&name[..name.len().min(8)]);
        header[8..12].copy_from_slice(&section.virtual_size.to_le_bytes());
        header[12..16].copy_from_slice(&section.virtual_address.to_le_bytes());
        header[16..20].copy_from_slice(&section.raw_size.to_le_bytes());
        header[20..24].copy_from_slice(&section.raw_offset.to_le_bytes());
        header[36..40].copy_from_slice(&section.characteristics.to_le_bytes());
        write_bytes(&mut self.bytes, section.header_offset, &header)
    }

    fn grow_size_of_image(&mut self) -> Result<(), ImageError> {
        let alignment = to_usize(self.optional_u32(OPT_SECTION_ALIGNMENT)?);
        let end = self
            .sections
            .iter()
            .map(|s| to_usize(s.virtual_address).saturating_add(to_usize(s.mapped_size())))
            .max()
            .unwrap_or_default();
        let required = to_u32(align_up(end, alignment)?, "image size")?;
        let current = self.optional_u32(OPT_SIZE_OF_IMAGE)?;
        if required > current {
            self.set_optional_u32(OPT_SIZE_OF_IMAGE, required)?;
        }
        Ok(())
    }

    fn set_data_directory(&mut self, index: usize, rva: u32, size: u32) -> Result<(), ImageError> {
        let offset = self.data_dir_offset.saturating_add(index.saturating_mul(8));
        write_u32(&mut self.bytes, offset, rva)?;
        write_u32(&mut self.bytes, offset.saturating_add(4), size)
    }

    fn optional_u32(&self, field: usize) -> Result<u32, ImageError> {
        read_u32(&self.bytes, self.optional_offset.saturating_add(field))
    }

    fn set_optional_u32(&mut self, field: usize, value: u32) -> Result<(), ImageError> {
        write_u32(&mut self.bytes, self.optional_offset.saturating_add(field), value)
    }
}
