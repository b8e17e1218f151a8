use crate::datatypes::{read_i32, read_u32, remaining, write_i32, write_u32};
use crate::utils::PiplError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::{Cursor, Read, Write};

/// Photoshop 的厂商标识 '8BIM'
pub const VENDOR_PHOTOSHOP: u32 = 0x3842494d;
/// 滤镜插件的 kind 值 '8BFM'
pub const FILTER_KIND: u32 = 0x3842464d;
/// 属性头部大小：vendorId + key + subId + dataLength
pub const PROPERTY_HEADER_SIZE: usize = 16;

/// 4字符属性键（以小端 u32 存储）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey(pub u32);

impl PropertyKey {
    /// 插件类型；滤镜为 8BFM - 'kind'
    pub const KIND: PropertyKey = PropertyKey(0x6b696e64);
    /// Win32 x86 入口 - 'wx86'
    pub const WIN32_X86_CODE: PropertyKey = PropertyKey(0x77783836);
    /// 版本号 Major(int16).Minor(int16) - 'vers'
    pub const VERSION: PropertyKey = PropertyKey(0x76657273);
    /// 支持的图像模式 - 'mode'
    pub const IMAGE_MODES: PropertyKey = PropertyKey(0x6d6f6465);
    /// 顶层菜单中的分类名 - 'catg'
    pub const CATEGORY: PropertyKey = PropertyKey(0x63617467);
    /// 菜单名 - 'name'
    pub const NAME: PropertyKey = PropertyKey(0x6e616d65);
    /// 'hstm'
    pub const HAS_TERMINOLOGY: PropertyKey = PropertyKey(0x6873746d);
    /// 'fici'
    pub const FILTER_CASE_INFO: PropertyKey = PropertyKey(0x66696369);
    /// 'enbl'
    pub const ENABLE_INFO: PropertyKey = PropertyKey(0x656e626c);
    /// 需要的宿主程序，如 '8BIM' - 'host'
    pub const REQUIRED_HOST: PropertyKey = PropertyKey(0x686f7374);

    /// 从4字符标签创建（如 b"catg"）
    pub const fn from_fourcc(tag: &[u8; 4]) -> Self {
        PropertyKey(u32::from_be_bytes(*tag))
    }

    /// 4字符标签文本
    pub fn fourcc(&self) -> String {
        self.0
            .to_be_bytes()
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect()
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.fourcc())
    }
}

impl Serialize for PropertyKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.fourcc())
    }
}

/// PiPL 属性记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyRecord {
    /// 厂商标识
    pub vendor_id: u32,
    /// 属性键
    pub key: PropertyKey,
    /// 属性子ID
    pub sub_id: i32,
    /// 原始数据（不含对齐填充）
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl PropertyRecord {
    /// 创建新的 8BIM 属性，数据补零到4字节对齐
    ///
    /// 新建记录的 dataLength 包含填充字节，部分宿主依赖这一点。
    pub fn new(key: PropertyKey, value: &[u8]) -> Self {
        let mut property = PropertyRecord {
            vendor_id: VENDOR_PHOTOSHOP,
            key,
            sub_id: 0,
            data: Vec::new(),
        };
        property.replace_value(value);
        property
    }

    /// 替换数据，保留厂商与子ID；同样补零到4字节对齐
    pub fn replace_value(&mut self, value: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(value);
        self.data.resize(value.len().div_ceil(4) * 4, 0);
    }

    /// 解析属性记录，读取前先校验剩余长度
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self, PiplError> {
        let start = cursor.position();

        if remaining(cursor) < PROPERTY_HEADER_SIZE as u64 {
            return Err(PiplError::malformed(start, "insufficient data for property header"));
        }

        let vendor_id = read_u32(cursor)?;
        let key = PropertyKey(read_u32(cursor)?);
        let sub_id = read_i32(cursor)?;
        let data_length = read_i32(cursor)?;

        if data_length < 0 {
            return Err(PiplError::malformed(
                start,
                format!("property {} has negative data length {}", key, data_length),
            ));
        }

        let data_length = data_length as usize;
        if remaining(cursor) < data_length as u64 {
            return Err(PiplError::malformed(
                start,
                format!(
                    "property {} declares {} bytes, only {} remain",
                    key,
                    data_length,
                    remaining(cursor)
                ),
            ));
        }

        let mut data = vec![0u8; data_length];
        cursor.read_exact(&mut data)?;

        // 最后一条记录可能没有填充
        let padding = (padding_for(data_length) as u64).min(remaining(cursor));
        cursor.set_position(cursor.position() + padding);

        Ok(PropertyRecord {
            vendor_id,
            key,
            sub_id,
            data,
        })
    }

    /// 写入属性：头部、数据、零填充
    pub fn write(&self, writer: &mut dyn Write) -> Result<(), std::io::Error> {
        write_u32(writer, self.vendor_id)?;
        write_u32(writer, self.key.0)?;
        write_i32(writer, self.sub_id)?;
        write_i32(writer, self.data.len() as i32)?;
        writer.write_all(&self.data)?;
        writer.write_all(&[0u8; 3][..self.padding_length()])?;
        Ok(())
    }

    /// 数据长度
    pub fn data_length(&self) -> usize {
        self.data.len()
    }

    /// 对齐填充长度
    pub fn padding_length(&self) -> usize {
        padding_for(self.data.len())
    }

    /// 记录总长度 = 16 + 数据 + 填充
    pub fn total_length(&self) -> usize {
        PROPERTY_HEADER_SIZE + self.data.len() + self.padding_length()
    }

    /// 数据的前4字节（小端）
    pub fn data_as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.data.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }
}

fn padding_for(data_length: usize) -> usize {
    (4 - data_length % 4) % 4
}
