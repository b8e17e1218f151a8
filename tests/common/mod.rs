//! 集成测试共用的构造工具：最小 PE32 映像（带 PiPL 资源）与最小 .lnk 文件
#![allow(dead_code)]

use pipl_category::io::ResourceName;
use pipl_category::property::{PropertyKey, PropertyRecord, FILTER_KIND};
use pipl_category::{encode_pipl, PascalString};

pub const SECTION_RVA: u32 = 0x1000;
pub const SECTION_OFFSET: usize = 0x200;
const PE_OFFSET: usize = 0x80;
const OPTIONAL_OFFSET: usize = PE_OFFSET + 24;
const OPTIONAL_SIZE: usize = 0xE0;
pub const CHECKSUM_OFFSET: usize = OPTIONAL_OFFSET + 64;
const SECTION_TABLE: usize = OPTIONAL_OFFSET + OPTIONAL_SIZE;
const HIGH_BIT: u32 = 0x80000000;
const RT_VERSION: u32 = 16;
const SECTION_ALIGNMENT: usize = 0x1000;
pub const SIZE_OF_IMAGE_OFFSET: usize = OPTIONAL_OFFSET + 56;
/// 资源节表项
pub const RESOURCE_SECTION_HEADER: usize = SECTION_TABLE;
/// PIPL 类型下名称表的第一项
pub const PIPL_NAME_ENTRIES: usize = SECTION_OFFSET + NAMES_TABLE + 16;
const NAMES_TABLE: usize = 16 + 2 * 8;

/// 非 PiPL 资源的内容，用于检查写回不影响其他资源
pub const VERSION_DATA: &[u8] = b"VS_VERSION_INFO test payload";

/// 一个滤镜 PiPL 资源的字节
pub fn filter_pipl(title: &str, category: Option<&str>) -> Vec<u8> {
    let mut properties = vec![
        PropertyRecord::new(PropertyKey::KIND, &FILTER_KIND.to_le_bytes()),
        PropertyRecord::new(PropertyKey::VERSION, &0x00020000u32.to_le_bytes()),
        PropertyRecord::new(PropertyKey::NAME, &PascalString::encode(title).unwrap()),
    ];
    if let Some(category) = category {
        properties.push(PropertyRecord::new(PropertyKey::CATEGORY, &PascalString::encode(category).unwrap()));
    }
    properties.push(PropertyRecord::new(PropertyKey::IMAGE_MODES, &[0x3f, 0x00]));
    encode_pipl(&properties).unwrap()
}

/// 一个 PIPL 类型下的资源（可有多种语言）
pub struct TestResource {
    pub name: ResourceName,
    pub languages: Vec<(u16, Vec<u8>)>,
}

/// 最小 PE32 映像构造器：只有一个 .rsrc 节
///
/// 节的映射大小与资源目录大小都是实际占用的字节数，文件中的节按 FileAlignment 补齐。
#[derive(Default)]
pub struct PeBuilder {
    resources: Vec<TestResource>,
    checksum: u32,
    slack: usize,
    file_alignment: usize,
    overlay: Vec<u8>,
}

impl PeBuilder {
    pub fn new() -> Self {
        PeBuilder { file_alignment: 0x200, ..Default::default() }
    }

    pub fn resource(mut self, name: ResourceName, language: u16, data: Vec<u8>) -> Self {
        match self.resources.iter_mut().find(|r| r.name == name) {
            Some(resource) => resource.languages.push((language, data)),
            None => self.resources.push(TestResource { name, languages: vec![(language, data)] }),
        }
        self
    }

    /// 可选头部中的 CheckSum 初值
    pub fn checksum(mut self, checksum: u32) -> Self {
        self.checksum = checksum;
        self
    }

    /// 每个数据块后额外留出的空间
    pub fn slack(mut self, slack: usize) -> Self {
        self.slack = slack;
        self
    }

    /// 文件对齐；为 8 时资源节在文件中没有填充空间
    pub fn file_alignment(mut self, alignment: usize) -> Self {
        self.file_alignment = alignment;
        self
    }

    /// 节之后的附加数据（例如签名）
    pub fn overlay(mut self, data: &[u8]) -> Self {
        self.overlay = data.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        // 名称资源在前，序号资源在后
        let mut ordered: Vec<&TestResource> = self
            .resources
            .iter()
            .filter(|r| matches!(r.name, ResourceName::Name(_)))
            .collect();
        ordered.extend(self.resources.iter().filter(|r| matches!(r.name, ResourceName::Ordinal(_))));
        let named_count = ordered.iter().filter(|r| matches!(r.name, ResourceName::Name(_))).count();

        // 布局（相对节起点）
        let names_table = NAMES_TABLE;
        let mut cursor = names_table + 16 + ordered.len() * 8;

        let mut language_tables = Vec::new();
        for resource in &ordered {
            language_tables.push(cursor);
            cursor += 16 + resource.languages.len() * 8;
        }
        let version_names = cursor;
        cursor += 24;
        let version_languages = cursor;
        cursor += 24;

        let mut data_entries = Vec::new();
        for resource in &ordered {
            let entries: Vec<usize> = resource
                .languages
                .iter()
                .map(|_| {
                    let entry = cursor;
                    cursor += 16;
                    entry
                })
                .collect();
            data_entries.push(entries);
        }
        let version_entry = cursor;
        cursor += 16;

        let pipl_string = cursor;
        cursor += 2 + 4 * 2;
        let mut name_strings = Vec::new();
        for resource in &ordered {
            match &resource.name {
                ResourceName::Name(name) => {
                    name_strings.push(cursor);
                    cursor += 2 + name.encode_utf16().count() * 2;
                }
                ResourceName::Ordinal(_) => name_strings.push(0),
            }
        }

        cursor = align(cursor, 8);
        let mut blobs = Vec::new();
        for resource in &ordered {
            let offsets: Vec<usize> = resource
                .languages
                .iter()
                .map(|(_, data)| {
                    let blob = cursor;
                    cursor = align(cursor + data.len() + self.slack, 8);
                    blob
                })
                .collect();
            blobs.push(offsets);
        }
        let version_blob = cursor;
        cursor = align(cursor + VERSION_DATA.len(), 8);

        let used_size = cursor;
        let section_size = align(used_size, self.file_alignment);
        let mut image = vec![0u8; SECTION_OFFSET + section_size];

        // DOS / PE / COFF
        image[0..2].copy_from_slice(b"MZ");
        put_u32(&mut image, 0x3C, PE_OFFSET as u32);
        image[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");
        put_u16(&mut image, PE_OFFSET + 4, 0x14c);
        put_u16(&mut image, PE_OFFSET + 6, 1);
        put_u16(&mut image, PE_OFFSET + 20, OPTIONAL_SIZE as u16);
        put_u16(&mut image, PE_OFFSET + 22, 0x2102);

        // 可选头部
        put_u16(&mut image, OPTIONAL_OFFSET, 0x10b);
        put_u32(&mut image, OPTIONAL_OFFSET + 32, SECTION_ALIGNMENT as u32);
        put_u32(&mut image, OPTIONAL_OFFSET + 36, self.file_alignment as u32);
        put_u32(&mut image, SIZE_OF_IMAGE_OFFSET, align(SECTION_RVA as usize + used_size, SECTION_ALIGNMENT) as u32);
        put_u32(&mut image, OPTIONAL_OFFSET + 60, SECTION_OFFSET as u32);
        put_u32(&mut image, CHECKSUM_OFFSET, self.checksum);
        put_u32(&mut image, OPTIONAL_OFFSET + 92, 16);
        put_u32(&mut image, OPTIONAL_OFFSET + 96 + 2 * 8, SECTION_RVA);
        put_u32(&mut image, OPTIONAL_OFFSET + 96 + 2 * 8 + 4, used_size as u32);

        // 节表
        image[SECTION_TABLE..SECTION_TABLE + 5].copy_from_slice(b".rsrc");
        put_u32(&mut image, SECTION_TABLE + 8, used_size as u32);
        put_u32(&mut image, SECTION_TABLE + 12, SECTION_RVA);
        put_u32(&mut image, SECTION_TABLE + 16, section_size as u32);
        put_u32(&mut image, SECTION_TABLE + 20, SECTION_OFFSET as u32);
        put_u32(&mut image, SECTION_TABLE + 36, 0x40000040);

        let base = SECTION_OFFSET;
        let at = |relative: usize| base + relative;

        // 类型层
        write_table(
            &mut image,
            at(0),
            1,
            1,
            &[
                (HIGH_BIT | pipl_string as u32, HIGH_BIT | names_table as u32),
                (RT_VERSION, HIGH_BIT | version_names as u32),
            ],
        );

        // 名称层
        let name_entries: Vec<(u32, u32)> = ordered
            .iter()
            .enumerate()
            .map(|(i, resource)| {
                let name_field = match resource.name {
                    ResourceName::Name(_) => HIGH_BIT | name_strings[i] as u32,
                    ResourceName::Ordinal(id) => id as u32,
                };
                (name_field, HIGH_BIT | language_tables[i] as u32)
            })
            .collect();
        write_table(&mut image, at(names_table), named_count, ordered.len() - named_count, &name_entries);

        // 语言层与数据项
        for (i, resource) in ordered.iter().enumerate() {
            let entries: Vec<(u32, u32)> = resource
                .languages
                .iter()
                .enumerate()
                .map(|(j, (language, _))| (*language as u32, data_entries[i][j] as u32))
                .collect();
            write_table(&mut image, at(language_tables[i]), 0, entries.len(), &entries);

            for (j, (_, data)) in resource.languages.iter().enumerate() {
                write_data_entry(&mut image, at(data_entries[i][j]), blobs[i][j], data.len());
                image[at(blobs[i][j])..at(blobs[i][j]) + data.len()].copy_from_slice(data);
            }

            if let ResourceName::Name(name) = &resource.name {
                write_name(&mut image, at(name_strings[i]), name);
            }
        }

        write_table(&mut image, at(version_names), 0, 1, &[(1, HIGH_BIT | version_languages as u32)]);
        write_table(&mut image, at(version_languages), 0, 1, &[(1033, version_entry as u32)]);
        write_data_entry(&mut image, at(version_entry), version_blob, VERSION_DATA.len());
        image[at(version_blob)..at(version_blob) + VERSION_DATA.len()].copy_from_slice(VERSION_DATA);

        write_name(&mut image, at(pipl_string), "PIPL");
        image.extend_from_slice(&self.overlay);
        image
    }
}

fn write_table(image: &mut [u8], offset: usize, named: usize, ids: usize, entries: &[(u32, u32)]) {
    put_u16(image, offset + 12, named as u16);
    put_u16(image, offset + 14, ids as u16);
    for (i, (name, target)) in entries.iter().enumerate() {
        put_u32(image, offset + 16 + i * 8, *name);
        put_u32(image, offset + 20 + i * 8, *target);
    }
}

fn write_data_entry(image: &mut [u8], offset: usize, blob: usize, size: usize) {
    put_u32(image, offset, SECTION_RVA + blob as u32);
    put_u32(image, offset + 4, size as u32);
}

fn write_name(image: &mut [u8], offset: usize, name: &str) {
    let units: Vec<u16> = name.encode_utf16().collect();
    put_u16(image, offset, units.len() as u16);
    for (i, unit) in units.iter().enumerate() {
        put_u16(image, offset + 2 + i * 2, *unit);
    }
}

pub fn read_u32(image: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([image[offset], image[offset + 1], image[offset + 2], image[offset + 3]])
}

fn put_u16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn align(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// 指向本地路径的最小 .lnk 文件
pub fn shortcut_to(target: &str) -> Vec<u8> {
    const HAS_LINK_INFO: u32 = 0x02;
    let clsid = [
        0x01, 0x14, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00,
        0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46,
    ];

    let mut data = vec![0u8; 0x4C];
    data[0..4].copy_from_slice(&0x4Cu32.to_le_bytes());
    data[4..20].copy_from_slice(&clsid);
    data[20..24].copy_from_slice(&HAS_LINK_INFO.to_le_bytes());

    let volume_id = [0x10u8, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0x10, 0, 0, 0];
    let local_base_path_offset = 0x1C + volume_id.len();
    let suffix_offset = local_base_path_offset + target.len() + 1;
    let link_info_size = suffix_offset + 1;

    for value in [
        link_info_size as u32,
        0x1C,
        1,
        0x1C,
        local_base_path_offset as u32,
        0,
        suffix_offset as u32,
    ] {
        data.extend_from_slice(&value.to_le_bytes());
    }
    data.extend_from_slice(&volume_id);
    data.extend_from_slice(target.as_bytes());
    data.push(0);
    data.push(0);
    data
}
