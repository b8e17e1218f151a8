/// PE 文件资源读写
///
/// 插件文件只作为数据映射打开（memmap2），不会加载或执行其中的代码。
/// 资源目录树为 类型 → 名称 → 语言 → 数据项 三层结构，所有偏移在读取前都做边界检查。
///
/// 写回优先原位修补：新数据能放进原资源的槽位（到下一个资源结构或数据块为止）时直接覆盖。
/// 放不下时把数据块移到资源节末尾的空闲空间，资源节位于文件末尾时可以扩展该节。
/// 完整的新映像在内存中构建完成后写入临时文件，再替换原文件。
use crate::utils::{create_backup, PiplError};
use super::traits::{RawResource, ResourceName, ResourceStore, ResourceTransaction};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// PiPL 资源类型名
pub const PIPL_RESOURCE_TYPE: &str = "PIPL";

const DOS_SIGNATURE: &[u8; 2] = b"MZ";
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const RESOURCE_DIRECTORY_INDEX: usize = 2;
const SECTION_HEADER_SIZE: usize = 40;
const DIRECTORY_TABLE_SIZE: usize = 16;
const DIRECTORY_ENTRY_SIZE: usize = 8;
const DATA_ENTRY_SIZE: usize = 16;
const HIGH_BIT: u32 = 0x80000000;
/// 移动后的数据块对齐
const DATA_ALIGNMENT: usize = 8;

// 可选头部中的字段偏移（PE32 与 PE32+ 相同）
const SECTION_ALIGNMENT_OFFSET: usize = 32;
const FILE_ALIGNMENT_OFFSET: usize = 36;
const SIZE_OF_IMAGE_OFFSET: usize = 56;
const CHECKSUM_OFFSET: usize = 64;

/// 节表项
#[derive(Debug, Clone, Copy)]
struct Section {
    /// 节表项的文件偏移
    header_offset: usize,
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_offset: u32,
}

impl Section {
    fn contains_rva(&self, rva: u32) -> bool {
        let extent = self.virtual_size.max(self.raw_size);
        rva >= self.virtual_address && rva - self.virtual_address < extent
    }

    fn raw_end(&self) -> usize {
        self.raw_offset as usize + self.raw_size as usize
    }

    /// 加载时从文件映射的部分的末尾
    fn mapped_end(&self) -> usize {
        let mapped = match self.virtual_size {
            0 => self.raw_size,
            size => size.min(self.raw_size),
        };
        self.raw_offset as usize + mapped as usize
    }

    fn offset_to_rva(&self, offset: usize) -> u32 {
        self.virtual_address + (offset - self.raw_offset as usize) as u32
    }
}

/// 资源目录树中的一个数据项
#[derive(Debug, Clone)]
struct LocatedResource {
    name: ResourceName,
    language: u16,
    /// 是否为该名称下的第一种语言
    first_language: bool,
    /// IMAGE_RESOURCE_DATA_ENTRY 的文件偏移
    entry_offset: usize,
    /// 数据的文件偏移
    data_offset: usize,
    size: usize,
    /// 数据所在的节
    section: usize,
}

/// 解析后的资源目录布局
#[derive(Debug, Default)]
struct ResourceLayout {
    sections: Vec<Section>,
    /// PIPL 类型下的资源
    resources: Vec<LocatedResource>,
    /// 所有目录结构、名称与数据块占用的文件区间
    regions: Vec<(usize, usize)>,
    /// 可选头部的文件偏移
    optional_offset: usize,
    /// 资源目录在数据目录表中的项（文件偏移）
    resource_directory: usize,
    image_len: usize,
}

impl ResourceLayout {
    /// 解析映像；没有资源目录时返回空布局
    fn parse(image: &[u8]) -> Result<Self, Error> {
        if image.len() < 0x40 || &image[0..2] != DOS_SIGNATURE {
            return Err(invalid("missing MZ signature"));
        }

        let pe_offset = u32_at(image, 0x3C)? as usize;
        if image.get(pe_offset..pe_offset + 4) != Some(&PE_SIGNATURE[..]) {
            return Err(invalid("missing PE signature"));
        }

        let coff_offset = pe_offset + 4;
        let section_count = u16_at(image, coff_offset + 2)? as usize;
        let optional_size = u16_at(image, coff_offset + 16)? as usize;
        let optional_offset = coff_offset + 20;

        let (count_offset, directories_offset) = match u16_at(image, optional_offset)? {
            PE32_MAGIC => (92, 96),
            PE32_PLUS_MAGIC => (108, 112),
            magic => return Err(invalid(&format!("unknown optional header magic 0x{:X}", magic))),
        };

        let mut layout = ResourceLayout {
            optional_offset,
            image_len: image.len(),
            ..Default::default()
        };

        let directory_count = u32_at(image, optional_offset + count_offset)? as usize;
        if directory_count <= RESOURCE_DIRECTORY_INDEX {
            return Ok(layout);
        }

        layout.resource_directory = optional_offset + directories_offset + RESOURCE_DIRECTORY_INDEX * 8;
        let resource_rva = u32_at(image, layout.resource_directory)?;
        if resource_rva == 0 {
            return Ok(layout);
        }

        let sections_offset = optional_offset + optional_size;
        layout.sections = (0..section_count)
            .map(|i| {
                let offset = sections_offset + i * SECTION_HEADER_SIZE;
                Ok(Section {
                    header_offset: offset,
                    virtual_size: u32_at(image, offset + 8)?,
                    virtual_address: u32_at(image, offset + 12)?,
                    raw_size: u32_at(image, offset + 16)?,
                    raw_offset: u32_at(image, offset + 20)?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let (root, _) = rva_to_offset(&layout.sections, resource_rva, image.len())?;
        layout.walk_types(image, root)?;

        Ok(layout)
    }

    /// 第一层：资源类型
    fn walk_types(&mut self, image: &[u8], root: usize) -> Result<(), Error> {
        for (name_field, offset_field) in self.read_table(image, root)? {
            if offset_field & HIGH_BIT == 0 {
                continue;
            }

            let is_pipl = name_field & HIGH_BIT != 0
                && self
                    .read_name(image, root, name_field)
                    .map(|name| name.eq_ignore_ascii_case(PIPL_RESOURCE_TYPE))
                    .unwrap_or(false);

            let table = root + (offset_field & !HIGH_BIT) as usize;
            if let Err(e) = self.walk_names(image, root, table, is_pipl) {
                if is_pipl {
                    return Err(e);
                }
                debug!(error = %e, "ignoring unreadable resource type");
            }
        }
        Ok(())
    }

    /// 第二层：资源名称；第三层：语言
    fn walk_names(&mut self, image: &[u8], root: usize, table: usize, is_pipl: bool) -> Result<(), Error> {
        for (name_field, offset_field) in self.read_table(image, table)? {
            if offset_field & HIGH_BIT == 0 {
                continue;
            }

            // 单个名称或语言表损坏时只跳过该资源
            let name = if name_field & HIGH_BIT != 0 {
                match self.read_name(image, root, name_field) {
                    Ok(name) => ResourceName::Name(name),
                    Err(e) => {
                        debug!(error = %e, "skipping resource with unreadable name");
                        continue;
                    }
                }
            } else {
                ResourceName::Ordinal(name_field as u16)
            };

            let languages = match self.read_table(image, root + (offset_field & !HIGH_BIT) as usize) {
                Ok(languages) => languages,
                Err(e) => {
                    debug!(resource = %name, error = %e, "skipping resource with unreadable language table");
                    continue;
                }
            };

            for (index, (language_field, data_field)) in languages.into_iter().enumerate() {
                if data_field & HIGH_BIT != 0 {
                    continue;
                }

                match self.read_data_entry(image, root + data_field as usize) {
                    Ok((data_offset, size, section)) => {
                        if is_pipl {
                            self.resources.push(LocatedResource {
                                name: name.clone(),
                                language: language_field as u16,
                                first_language: index == 0,
                                entry_offset: root + data_field as usize,
                                data_offset,
                                size,
                                section,
                            });
                        }
                    }
                    Err(e) => debug!(resource = %name, error = %e, "skipping unreadable resource"),
                }
            }
        }
        Ok(())
    }

    /// 读取目录表，返回 (名称字段, 偏移字段) 列表
    fn read_table(&mut self, image: &[u8], table: usize) -> Result<Vec<(u32, u32)>, Error> {
        let named = u16_at(image, table + 12)? as usize;
        let ids = u16_at(image, table + 14)? as usize;
        let count = named + ids;

        let end = table + DIRECTORY_TABLE_SIZE + count * DIRECTORY_ENTRY_SIZE;
        if end > image.len() {
            return Err(invalid("resource directory exceeds file"));
        }
        self.regions.push((table, end));

        (0..count)
            .map(|i| {
                let entry = table + DIRECTORY_TABLE_SIZE + i * DIRECTORY_ENTRY_SIZE;
                Ok((u32_at(image, entry)?, u32_at(image, entry + 4)?))
            })
            .collect()
    }

    /// 读取资源名字符串：u16 长度 + UTF-16LE
    fn read_name(&mut self, image: &[u8], root: usize, name_field: u32) -> Result<String, Error> {
        let offset = root + (name_field & !HIGH_BIT) as usize;
        let length = u16_at(image, offset)? as usize;
        let end = offset + 2 + length * 2;
        let bytes = image
            .get(offset + 2..end)
            .ok_or_else(|| invalid("resource name exceeds file"))?;
        self.regions.push((offset, end));

        let units: Vec<u16> = bytes.chunks_exact(2).map(LittleEndian::read_u16).collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// 读取数据项，返回 (数据偏移, 大小, 所在节)
    fn read_data_entry(&mut self, image: &[u8], entry_offset: usize) -> Result<(usize, usize, usize), Error> {
        if entry_offset + DATA_ENTRY_SIZE > image.len() {
            return Err(invalid("resource data entry exceeds file"));
        }
        self.regions.push((entry_offset, entry_offset + DATA_ENTRY_SIZE));

        let data_rva = u32_at(image, entry_offset)?;
        let size = u32_at(image, entry_offset + 4)? as usize;
        let (data_offset, section) = rva_to_offset(&self.sections, data_rva, image.len())?;

        if data_offset + size > self.sections[section].raw_end().min(image.len()) {
            return Err(invalid("resource data exceeds its section"));
        }
        self.regions.push((data_offset, data_offset + size));

        Ok((data_offset, size, section))
    }

    fn find(&self, name: &ResourceName, language: u16) -> Option<usize> {
        self.resources
            .iter()
            .position(|r| r.language == language && r.name.matches(name))
    }

    /// 资源槽位容量：到下一个目录结构或数据块为止，不超过节的映射部分
    fn slot_capacity(&self, resource: &LocatedResource) -> usize {
        let section_end = self.sections[resource.section].mapped_end().min(self.image_len);
        let end = self
            .regions
            .iter()
            .map(|&(start, _)| start)
            .filter(|&start| start > resource.data_offset)
            .min()
            .unwrap_or(section_end)
            .min(section_end);
        end.saturating_sub(resource.data_offset)
    }

    /// 为放不下原槽位的数据在资源节末尾分配空间，返回新的文件偏移
    ///
    /// 先使用节内未映射的填充空间；不够时扩展节，要求节位于文件末尾且扩展后不与下一节重叠。
    /// 所有检查通过后才修改映像。
    fn allocate(&mut self, image: &mut Vec<u8>, section_index: usize, length: usize) -> Result<usize, Error> {
        let section = self.sections[section_index];
        let raw_offset = section.raw_offset as usize;

        let used_end = self
            .regions
            .iter()
            .filter(|&&(start, _)| start >= raw_offset && start < section.raw_end())
            .map(|&(_, end)| end)
            .fold(section.mapped_end(), usize::max);
        let start = align(used_end, DATA_ALIGNMENT);
        let end = start + length;
        let extent = end - raw_offset;

        let raw_size = if end <= section.raw_end() {
            section.raw_size
        } else {
            // 文件末尾之后还有数据（签名等附加数据）或节尾是未初始化数据时不能扩展
            if section.raw_end() != image.len() || section.virtual_size > section.raw_size {
                return Err(invalid("resource section is full and cannot grow"));
            }
            let file_alignment = (u32_at(image, self.optional_offset + FILE_ALIGNMENT_OFFSET)? as usize).max(1);
            align(extent, file_alignment) as u32
        };

        let virtual_size = section.virtual_size.max(extent as u32);
        let virtual_end = section.virtual_address as usize + virtual_size as usize;
        let overlaps = self.sections.iter().any(|other| {
            other.virtual_address > section.virtual_address && (other.virtual_address as usize) < virtual_end
        });
        if overlaps {
            return Err(invalid("resource section cannot grow into the next section"));
        }

        if raw_size != section.raw_size {
            image.resize(raw_offset + raw_size as usize, 0);
            put_u32(image, section.header_offset + 16, raw_size);
        }
        if virtual_size != section.virtual_size {
            put_u32(image, section.header_offset + 8, virtual_size);
        }

        let section_alignment = (u32_at(image, self.optional_offset + SECTION_ALIGNMENT_OFFSET)? as usize).max(1);
        let size_of_image = align(virtual_end, section_alignment) as u32;
        if size_of_image > u32_at(image, self.optional_offset + SIZE_OF_IMAGE_OFFSET)? {
            put_u32(image, self.optional_offset + SIZE_OF_IMAGE_OFFSET, size_of_image);
        }

        // 资源目录的大小覆盖到新数据末尾
        let directory_rva = u32_at(image, self.resource_directory)?;
        let data_end_rva = section.offset_to_rva(end);
        if directory_rva.saturating_add(u32_at(image, self.resource_directory + 4)?) < data_end_rva {
            put_u32(image, self.resource_directory + 4, data_end_rva - directory_rva);
        }

        self.sections[section_index] = Section { raw_size, virtual_size, ..section };
        self.regions.push((start, end));
        self.image_len = image.len();
        Ok(start)
    }
}

/// 默认的资源读写器（PE 映像）
#[derive(Debug, Clone, Default)]
pub struct PeResourceStore {
    backup: bool,
}

impl PeResourceStore {
    /// 提交修改前是否创建带时间戳的备份文件
    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }
}

impl ResourceStore for PeResourceStore {
    fn load_resources(&self, path: &Path) -> Vec<RawResource> {
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot open plug-in");
                return Vec::new();
            }
        };

        // 只读映射，文件仅作为数据访问
        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot map plug-in");
                return Vec::new();
            }
        };

        let layout = match ResourceLayout::parse(&mmap) {
            Ok(layout) => layout,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "not a loadable image");
                return Vec::new();
            }
        };

        // 每个资源名只取第一种语言
        layout
            .resources
            .iter()
            .filter(|r| r.first_language)
            .map(|r| RawResource {
                name: r.name.clone(),
                language: r.language,
                data: mmap[r.data_offset..r.data_offset + r.size].to_vec(),
            })
            .collect()
    }

    fn begin_update(&self, path: &Path) -> Result<Box<dyn ResourceTransaction + '_>, PiplError> {
        let image = std::fs::read(path).map_err(|e| PiplError::persistence(path, e))?;
        let layout = ResourceLayout::parse(&image).map_err(|e| PiplError::persistence(path, e))?;

        Ok(Box::new(PeTransaction {
            path: path.to_path_buf(),
            image,
            layout,
            backup: self.backup,
            modified: false,
        }))
    }
}

/// PE 资源更新事务
struct PeTransaction {
    path: PathBuf,
    image: Vec<u8>,
    layout: ResourceLayout,
    backup: bool,
    modified: bool,
}

impl ResourceTransaction for PeTransaction {
    fn update(&mut self, name: &ResourceName, language: u16, data: &[u8]) -> Result<(), PiplError> {
        let index = self.layout.find(name, language).ok_or_else(|| {
            PiplError::persistence(
                &self.path,
                Error::new(
                    ErrorKind::NotFound,
                    format!("resource {} (language {}) not found", name, language),
                ),
            )
        })?;

        let resource = self.layout.resources[index].clone();
        let old_end = resource.data_offset + resource.size;

        let start = if data.len() <= self.layout.slot_capacity(&resource) {
            resource.data_offset
        } else {
            let start = self
                .layout
                .allocate(&mut self.image, resource.section, data.len())
                .map_err(|e| {
                    PiplError::persistence(
                        &self.path,
                        Error::new(
                            e.kind(),
                            format!("resource {} needs {} bytes: {}", name, data.len(), e),
                        ),
                    )
                })?;
            debug!(resource = %name, from = resource.data_offset, to = start, "moving resource data");

            let rva = self.layout.sections[resource.section].offset_to_rva(start);
            put_u32(&mut self.image, resource.entry_offset, rva);
            self.image[resource.data_offset..old_end].fill(0);
            start
        };

        let new_end = start + data.len();
        self.image[start..new_end].copy_from_slice(data);
        if start == resource.data_offset && new_end < old_end {
            self.image[new_end..old_end].fill(0);
        }
        put_u32(&mut self.image, resource.entry_offset + 4, data.len() as u32);

        let located = &mut self.layout.resources[index];
        located.data_offset = start;
        located.size = data.len();
        self.modified = true;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), PiplError> {
        let PeTransaction { path, mut image, layout, backup, modified } = *self;
        if !modified {
            return Ok(());
        }

        let checksum_offset = layout.optional_offset + CHECKSUM_OFFSET;
        if u32_at(&image, checksum_offset).map_err(|e| PiplError::persistence(&path, e))? != 0 {
            let checksum = pe_checksum(&image, checksum_offset);
            put_u32(&mut image, checksum_offset, checksum);
        }

        if backup {
            let backup_path = create_backup(&path).map_err(|e| match e {
                PiplError::IoError(source) => PiplError::persistence(&path, source),
                other => other,
            })?;
            info!(backup = %backup_path.display(), "created backup");
        }

        write_replacing(&path, &image).map_err(|e| PiplError::persistence(&path, e))?;
        info!(path = %path.display(), "resources updated");
        Ok(())
    }

    fn discard(self: Box<Self>) {
        debug!(path = %self.path.display(), "discarding resource update");
    }
}

/// 写入同目录的临时文件，再替换原文件
fn write_replacing(path: &Path, data: &[u8]) -> Result<(), Error> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "path has no file name"))?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let permissions = std::fs::metadata(path)?.permissions();
    std::fs::write(&temp_path, data)?;

    let result = std::fs::set_permissions(&temp_path, permissions)
        .and_then(|_| std::fs::rename(&temp_path, path));
    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

/// PE 映像校验和（跳过 CheckSum 字段本身）
fn pe_checksum(image: &[u8], checksum_offset: usize) -> u32 {
    let mut sum: u64 = 0;

    for (index, chunk) in image.chunks(2).enumerate() {
        let offset = index * 2;
        if offset == checksum_offset || offset == checksum_offset + 2 {
            continue;
        }

        let word = chunk[0] as u64 | (chunk.get(1).copied().unwrap_or(0) as u64) << 8;
        sum += word;
        sum = (sum & 0xffff) + (sum >> 16);
    }

    sum = (sum & 0xffff) + (sum >> 16);
    (sum as u32).wrapping_add(image.len() as u32)
}

/// RVA 转文件偏移，返回 (偏移, 节序号)
fn rva_to_offset(sections: &[Section], rva: u32, image_len: usize) -> Result<(usize, usize), Error> {
    let index = sections
        .iter()
        .position(|s| s.contains_rva(rva))
        .ok_or_else(|| invalid(&format!("RVA 0x{:X} is outside every section", rva)))?;

    let section = &sections[index];
    let offset = (rva - section.virtual_address) as usize + section.raw_offset as usize;
    if offset >= image_len {
        return Err(invalid(&format!("RVA 0x{:X} maps past the end of the file", rva)));
    }
    Ok((offset, index))
}

fn u16_at(data: &[u8], offset: usize) -> Result<u16, Error> {
    data.get(offset..offset + 2)
        .map(LittleEndian::read_u16)
        .ok_or_else(|| invalid("unexpected end of image"))
}

fn u32_at(data: &[u8], offset: usize) -> Result<u32, Error> {
    data.get(offset..offset + 4)
        .map(LittleEndian::read_u32)
        .ok_or_else(|| invalid("unexpected end of image"))
}

fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut data[offset..offset + 4], value);
}

fn align(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

fn invalid(message: &str) -> Error {
    Error::new(ErrorKind::InvalidData, message.to_string())
}
