use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};
use crate::utils::PiplError;

// 基础整数类型读取函数
pub fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, std::io::Error> {
    cursor.read_u16::<LittleEndian>()
}

pub fn read_i16(cursor: &mut Cursor<&[u8]>) -> Result<i16, std::io::Error> {
    cursor.read_i16::<LittleEndian>()
}

pub fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, std::io::Error> {
    cursor.read_u32::<LittleEndian>()
}

pub fn read_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32, std::io::Error> {
    cursor.read_i32::<LittleEndian>()
}

// 基础整数类型写入函数
pub fn write_i16(writer: &mut dyn Write, value: i16) -> Result<(), std::io::Error> {
    writer.write_i16::<LittleEndian>(value)
}

pub fn write_u32(writer: &mut dyn Write, value: u32) -> Result<(), std::io::Error> {
    writer.write_u32::<LittleEndian>(value)
}

pub fn write_i32(writer: &mut dyn Write, value: i32) -> Result<(), std::io::Error> {
    writer.write_i32::<LittleEndian>(value)
}

/// 游标之后剩余的字节数
pub fn remaining(cursor: &Cursor<&[u8]>) -> u64 {
    (cursor.get_ref().len() as u64).saturating_sub(cursor.position())
}

/// Pascal 字符串最大长度（1字节长度前缀）
pub const MAX_PASCAL_STRING_LENGTH: usize = 255;

/// Pascal 字符串（长度前缀）编解码
///
/// 插件资源里的分类名与菜单名都是 1 字节长度 + 对应字节数的文本，
/// 文本按 windows-1252 解释（纯 ASCII 是它的子集）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PascalString {
    pub content: String,
}

impl PascalString {
    /// 解析属性数据；空数据返回空字符串，长度前缀超出数据时截断到可用字节
    pub fn decode(data: &[u8]) -> Self {
        let Some((&length, rest)) = data.split_first() else {
            return PascalString { content: String::new() };
        };

        let end = (length as usize).min(rest.len());
        let (decoded, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(&rest[..end]);

        PascalString { content: decoded.into_owned() }
    }

    /// 编码为 长度前缀 + 字节
    pub fn encode(value: &str) -> Result<Vec<u8>, PiplError> {
        let bytes = Self::encoded_bytes(value)?;

        let mut output = Vec::with_capacity(1 + bytes.len());
        output.push(bytes.len() as u8);
        output.extend_from_slice(&bytes);
        Ok(output)
    }

    /// 检查字符串能否编码为 Pascal 字符串（不修改任何状态）
    pub fn is_length_valid(value: &str) -> bool {
        Self::encoded_bytes(value).is_ok()
    }

    fn encoded_bytes(value: &str) -> Result<Vec<u8>, PiplError> {
        let (encoded, _, had_unmappable) = encoding_rs::WINDOWS_1252.encode(value);
        if had_unmappable {
            return Err(PiplError::CategoryUnencodable(value.to_string()));
        }

        if encoded.len() > MAX_PASCAL_STRING_LENGTH {
            return Err(PiplError::CategoryTooLong { length: encoded.len() });
        }

        Ok(encoded.into_owned())
    }
}

// 目录搜索标志位定义
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SearchFlags: u32 {
        const RECURSIVE = 0x00000001;              // 递归进入子目录
        const DEREFERENCE_SHORTCUTS = 0x00000002;  // 解析 .lnk 快捷方式（仅一层）
    }
}

impl Default for SearchFlags {
    fn default() -> Self {
        SearchFlags::RECURSIVE | SearchFlags::DEREFERENCE_SHORTCUTS
    }
}
