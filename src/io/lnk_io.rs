/// .lnk 快捷方式解析
///
/// 按 Shell Link 二进制格式读取目标路径：
/// 头部 → 可选 IDList（跳过）→ LinkInfo（本地路径）→ StringData（相对路径）。
use crate::datatypes::{read_u16, read_u32, remaining};
use super::traits::ShortcutResolver;
use std::io::{Cursor, Error, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::debug;

const LINK_HEADER_SIZE: u32 = 0x4C;
const LINK_CLSID: [u8; 16] = [
    0x01, 0x14, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46,
];
/// 带 Unicode 偏移的 LinkInfo 头部大小
const LINK_INFO_UNICODE_HEADER_SIZE: u32 = 0x24;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy)]
    struct LinkFlags: u32 {
        const HAS_LINK_TARGET_ID_LIST = 0x00000001;
        const HAS_LINK_INFO = 0x00000002;
        const HAS_NAME = 0x00000004;
        const HAS_RELATIVE_PATH = 0x00000008;
        const HAS_WORKING_DIR = 0x00000010;
        const HAS_ARGUMENTS = 0x00000020;
        const HAS_ICON_LOCATION = 0x00000040;
        const IS_UNICODE = 0x00000080;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy)]
    struct LinkInfoFlags: u32 {
        const VOLUME_ID_AND_LOCAL_BASE_PATH = 0x00000001;
        const COMMON_NETWORK_RELATIVE_LINK_AND_PATH_SUFFIX = 0x00000002;
    }
}

/// 默认的快捷方式解析器（读取 .lnk 文件内容，不依赖系统 Shell）
#[derive(Debug, Clone, Copy, Default)]
pub struct LnkShortcutResolver;

impl ShortcutResolver for LnkShortcutResolver {
    fn resolve(&self, link: &Path) -> Option<PathBuf> {
        let data = match std::fs::read(link) {
            Ok(data) => data,
            Err(e) => {
                debug!(link = %link.display(), error = %e, "cannot read shortcut");
                return None;
            }
        };

        match parse_link_target(&data, link.parent()) {
            Ok(target) => target,
            Err(e) => {
                debug!(link = %link.display(), error = %e, "invalid shortcut");
                None
            }
        }
    }
}

/// 解析快捷方式数据中的目标路径
///
/// 优先使用 LinkInfo 中的本地路径，其次使用相对于 `base_dir` 的相对路径。
pub fn parse_link_target(data: &[u8], base_dir: Option<&Path>) -> Result<Option<PathBuf>, Error> {
    let mut cursor = Cursor::new(data);

    if remaining(&cursor) < LINK_HEADER_SIZE as u64 {
        return Err(invalid("insufficient data for link header"));
    }

    let header_size = read_u32(&mut cursor)?;
    if header_size != LINK_HEADER_SIZE {
        return Err(invalid("unexpected link header size"));
    }

    if data[4..20] != LINK_CLSID {
        return Err(invalid("not a shell link"));
    }

    cursor.set_position(20);
    let flags = LinkFlags::from_bits_truncate(read_u32(&mut cursor)?);
    cursor.set_position(LINK_HEADER_SIZE as u64);

    if flags.contains(LinkFlags::HAS_LINK_TARGET_ID_LIST) {
        let id_list_size = read_u16(&mut cursor)? as u64;
        skip(&mut cursor, id_list_size)?;
    }

    if flags.contains(LinkFlags::HAS_LINK_INFO) {
        let start = cursor.position() as usize;
        let link_info_size = read_u32(&mut cursor)? as usize;
        let link_info = data
            .get(start..start.saturating_add(link_info_size))
            .ok_or_else(|| invalid("link info exceeds file"))?;

        if let Some(target) = parse_local_path(link_info)? {
            return Ok(Some(PathBuf::from(target)));
        }

        cursor.set_position((start + link_info_size) as u64);
    }

    if !flags.contains(LinkFlags::HAS_RELATIVE_PATH) {
        return Ok(None);
    }

    let unicode = flags.contains(LinkFlags::IS_UNICODE);
    if flags.contains(LinkFlags::HAS_NAME) {
        read_string_data(&mut cursor, unicode)?;
    }

    let relative = read_string_data(&mut cursor, unicode)?;
    if relative.is_empty() {
        return Ok(None);
    }

    let relative = relative.replace('\\', std::path::MAIN_SEPARATOR_STR);
    Ok(Some(match base_dir {
        Some(dir) => dir.join(relative),
        None => PathBuf::from(relative),
    }))
}

/// LinkInfo 中的 LocalBasePath + CommonPathSuffix
fn parse_local_path(link_info: &[u8]) -> Result<Option<String>, Error> {
    let mut cursor = Cursor::new(link_info);
    if remaining(&cursor) < 0x1C {
        return Err(invalid("insufficient data for link info header"));
    }

    let _link_info_size = read_u32(&mut cursor)?;
    let header_size = read_u32(&mut cursor)?;
    let info_flags = LinkInfoFlags::from_bits_truncate(read_u32(&mut cursor)?);
    let _volume_id_offset = read_u32(&mut cursor)?;
    let local_base_path_offset = read_u32(&mut cursor)? as usize;
    let _network_link_offset = read_u32(&mut cursor)?;
    let suffix_offset = read_u32(&mut cursor)? as usize;

    if !info_flags.contains(LinkInfoFlags::VOLUME_ID_AND_LOCAL_BASE_PATH) {
        return Ok(None);
    }

    let (base, suffix) = if header_size >= LINK_INFO_UNICODE_HEADER_SIZE && remaining(&cursor) >= 8 {
        let base_unicode_offset = read_u32(&mut cursor)? as usize;
        let suffix_unicode_offset = read_u32(&mut cursor)? as usize;
        (
            read_utf16z(link_info, base_unicode_offset)?,
            if suffix_unicode_offset == 0 {
                String::new()
            } else {
                read_utf16z(link_info, suffix_unicode_offset)?
            },
        )
    } else {
        (
            read_ansiz(link_info, local_base_path_offset)?,
            if suffix_offset == 0 { String::new() } else { read_ansiz(link_info, suffix_offset)? },
        )
    };

    if base.is_empty() {
        return Ok(None);
    }

    Ok(Some(base + &suffix))
}

/// 以 null 结尾的 ANSI 字符串（windows-1252）
fn read_ansiz(data: &[u8], offset: usize) -> Result<String, Error> {
    let bytes = data.get(offset..).ok_or_else(|| invalid("string offset out of range"))?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let (decoded, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(&bytes[..end]);
    Ok(decoded.into_owned())
}

/// 以 null 结尾的 UTF-16LE 字符串
fn read_utf16z(data: &[u8], offset: usize) -> Result<String, Error> {
    let bytes = data.get(offset..).ok_or_else(|| invalid("string offset out of range"))?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

/// StringData：u16 字符数 + 字符
fn read_string_data(cursor: &mut Cursor<&[u8]>, unicode: bool) -> Result<String, Error> {
    let count = read_u16(cursor)? as usize;
    let start = cursor.position() as usize;
    let byte_len = if unicode { count * 2 } else { count };

    let bytes = cursor
        .get_ref()
        .get(start..start + byte_len)
        .ok_or_else(|| invalid("string data exceeds file"))?;
    cursor.set_position((start + byte_len) as u64);

    if unicode {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    } else {
        let (decoded, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
        Ok(decoded.into_owned())
    }
}

fn skip(cursor: &mut Cursor<&[u8]>, count: u64) -> Result<(), Error> {
    if remaining(cursor) < count {
        return Err(invalid("unexpected end of link data"));
    }
    cursor.set_position(cursor.position() + count);
    Ok(())
}

fn invalid(message: &str) -> Error {
    Error::new(ErrorKind::InvalidData, message.to_string())
}
