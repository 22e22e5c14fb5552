//! Builds small but structurally valid PE32 and PE32+ images for tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use verstamp::pe::PeImage;
use verstamp::rsrc::{ResourceData, ResourceName, ResourceTree, RT_MANIFEST};

pub const TEXT_RAW_OFFSET: usize = 0x400;
pub const TEXT_RAW_SIZE: usize = 0x200;
pub const RSRC_VA: u32 = 0x2000;

const PE_OFFSET: usize = 0x40;
const COFF_OFFSET: usize = PE_OFFSET + 4;
const OPTIONAL_OFFSET: usize = COFF_OFFSET + 20;
const SIZE_OF_HEADERS: usize = 0x400;
const SECTION_ALIGNMENT: u32 = 0x1000;
const FILE_ALIGNMENT: usize = 0x200;

pub const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v1" manifestVersion="1.0">
  <assemblyIdentity type="win32" name="Test.App" version="1.0.0.0"/>
</assembly>
"#;

/// Describes the image to build.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    pe32: bool,
    dll: bool,
    resources: Option<ResourceTree>,
    rsrc_raw_size: usize,
    reloc: bool,
    checksum: bool,
    signed: bool,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self {
            pe32: false,
            dll: false,
            resources: None,
            rsrc_raw_size: 0x1000,
            reloc: true,
            checksum: false,
            signed: false,
        }
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 32-bit (x86) image with the PE32 optional header.
    pub fn pe32(mut self) -> Self {
        self.pe32 = true;
        self
    }

    pub fn dll(mut self) -> Self {
        self.dll = true;
        self
    }

    pub fn resources(mut self, tree: ResourceTree) -> Self {
        self.resources = Some(tree);
        self
    }

    pub fn with_manifest(self) -> Self {
        let mut tree = ResourceTree::new();
        tree.insert(
            ResourceName::Id(RT_MANIFEST),
            ResourceName::Id(1),
            0x0409,
            ResourceData::new(MANIFEST.as_bytes().to_vec()),
        );
        self.resources(tree)
    }

    pub fn rsrc_raw_size(mut self, size: usize) -> Self {
        self.rsrc_raw_size = size;
        self
    }

    pub fn without_reloc(mut self) -> Self {
        self.reloc = false;
        self
    }

    pub fn with_checksum(mut self) -> Self {
        self.checksum = true;
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        // PE32 keeps ImageBase and the stack/heap sizes in 32 bits, so its data
        // directories start 16 bytes earlier.
        let (machine, magic, optional_len, rva_count_at) = if self.pe32 {
            (0x014C, 0x010B, 224, 92)
        } else {
            (0x8664, 0x020B, 240, 108)
        };
        let data_dirs = OPTIONAL_OFFSET + rva_count_at + 4;
        let section_table = OPTIONAL_OFFSET + optional_len;

        let mut sections: Vec<(&str, u32, Vec<u8>, usize, u32)> = Vec::new();
        sections.push((".text", 0x1000, text_bytes(), TEXT_RAW_SIZE, 0x6000_0020));

        let mut next_va = 0x2000u32;
        let mut resource_dir = (0u32, 0u32);
        if let Some(tree) = &self.resources {
            let data = tree.serialize(RSRC_VA).expect("serialize resources");
            assert!(data.len() <= self.rsrc_raw_size, "resources exceed raw size");
            resource_dir = (RSRC_VA, u32::try_from(data.len()).expect("size"));
            sections.push((".rsrc", RSRC_VA, data, self.rsrc_raw_size, 0x4000_0040));
            next_va = 0x3000;
        }
        if self.reloc {
            sections.push((".reloc", next_va, vec![0xAB; 0x20], FILE_ALIGNMENT, 0x4200_0040));
        }

        let mut image = vec![0u8; SIZE_OF_HEADERS];
        image[0..2].copy_from_slice(b"MZ");
        put_u32(&mut image, 0x3C, PE_OFFSET as u32);
        image[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

        put_u16(&mut image, COFF_OFFSET, machine);
        put_u16(&mut image, COFF_OFFSET + 2, u16::try_from(sections.len()).expect("count"));
        put_u16(&mut image, COFF_OFFSET + 16, u16::try_from(optional_len).expect("optional header size"));
        put_u16(&mut image, COFF_OFFSET + 18, if self.dll { 0x2022 } else { 0x0022 });

        put_u16(&mut image, OPTIONAL_OFFSET, magic);
        put_u32(&mut image, OPTIONAL_OFFSET + 16, 0x1000);
        put_u32(&mut image, OPTIONAL_OFFSET + 32, SECTION_ALIGNMENT);
        put_u32(&mut image, OPTIONAL_OFFSET + 36, FILE_ALIGNMENT as u32);
        put_u16(&mut image, OPTIONAL_OFFSET + 48, 6);
        put_u32(&mut image, OPTIONAL_OFFSET + 60, SIZE_OF_HEADERS as u32);
        put_u16(&mut image, OPTIONAL_OFFSET + 68, 3);
        put_u32(&mut image, OPTIONAL_OFFSET + rva_count_at, 16);

        let mut raw_offset = SIZE_OF_HEADERS;
        let mut image_end = 0x1000u32;
        for (index, (name, va, data, raw_size, characteristics)) in sections.iter().enumerate() {
            let header = section_table + index * 40;
            image[header..header + name.len()].copy_from_slice(name.as_bytes());
            put_u32(&mut image, header + 8, u32::try_from(data.len()).expect("size"));
            put_u32(&mut image, header + 12, *va);
            put_u32(&mut image, header + 16, u32::try_from(*raw_size).expect("size"));
            put_u32(&mut image, header + 20, u32::try_from(raw_offset).expect("offset"));
            put_u32(&mut image, header + 36, *characteristics);

            let mut raw = data.clone();
            raw.resize(*raw_size, 0);
            image.extend_from_slice(&raw);
            raw_offset += raw_size;
            image_end = va + SECTION_ALIGNMENT;
        }
        put_u32(&mut image, OPTIONAL_OFFSET + 56, image_end);
        put_u32(&mut image, data_dirs + 16, resource_dir.0);
        put_u32(&mut image, data_dirs + 20, resource_dir.1);

        if self.signed {
            let offset = u32::try_from(image.len()).expect("offset");
            image.extend_from_slice(&[0x5A; 0x40]);
            put_u32(&mut image, data_dirs + 32, offset);
            put_u32(&mut image, data_dirs + 36, 0x40);
        }

        if self.checksum {
            put_u32(&mut image, OPTIONAL_OFFSET + 64, 1);
            let checksum = PeImage::parse(image.clone())
                .expect("parse built image")
                .compute_checksum();
            put_u32(&mut image, OPTIONAL_OFFSET + 64, checksum);
        }

        image
    }

    /// Build and write to `dir/name`.
    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).expect("write image");
        path
    }
}

/// Recognizable code bytes that must survive stamping.
pub fn text_bytes() -> Vec<u8> {
    (0..TEXT_RAW_SIZE)
        .map(|i| u8::try_from(i % 251).expect("fits"))
        .collect()
}

/// Stored checksum field of a built image.
pub fn stored_checksum(image: &[u8]) -> u32 {
    u32::from_le_bytes(
        image[OPTIONAL_OFFSET + 64..OPTIONAL_OFFSET + 68]
            .try_into()
            .expect("four bytes"),
    )
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
