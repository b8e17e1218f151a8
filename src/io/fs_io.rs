/// 目录枚举的默认实现（基于 std::fs）
use std::path::Path;
use super::traits::{DirEntryInfo, DirectoryLister, EntryKind, Listing};

/// 默认的目录枚举器
///
/// 符号链接不会被当作目录跟随，只有 .lnk 快捷方式会被解析。
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDirectoryLister;

impl DirectoryLister for FsDirectoryLister {
    fn list(&self, dir: &Path) -> std::io::Result<Listing> {
        let entries = std::fs::read_dir(dir)?;

        Ok(Box::new(entries.map(|entry| {
            let entry = entry?;
            let file_type = entry.file_type()?;
            Ok(DirEntryInfo {
                name: entry.file_name(),
                is_dir: file_type.is_dir(),
            })
        })))
    }

    fn entry_kind(&self, path: &Path) -> Option<EntryKind> {
        let metadata = std::fs::metadata(path).ok()?;
        Some(if metadata.is_dir() { EntryKind::Directory } else { EntryKind::File })
    }
}
