/// IO 抽象层 - trait 定义
///
/// 扫描和写回依赖的三类系统能力：目录枚举、快捷方式解析、资源读写。
/// 面向接口编程，测试时可替换为内存实现。

use crate::utils::PiplError;
use serde::Serialize;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 路径类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// 目录中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// 文件名（不含目录）
    pub name: OsString,
    /// 是否为目录
    pub is_dir: bool,
}

impl DirEntryInfo {
    pub fn file(name: impl Into<OsString>) -> Self {
        DirEntryInfo { name: name.into(), is_dir: false }
    }

    pub fn directory(name: impl Into<OsString>) -> Self {
        DirEntryInfo { name: name.into(), is_dir: true }
    }
}

/// 一个已打开目录的枚举句柄
///
/// 产生 `Err` 表示该目录无法继续读取，调用方应当结束这个目录。
pub type Listing = Box<dyn Iterator<Item = std::io::Result<DirEntryInfo>> + Send>;

/// 目录枚举 trait
///
/// # 职责
/// - 打开目录并按系统顺序列出条目
/// - 查询一个路径是文件还是目录（用于快捷方式目标）
pub trait DirectoryLister {
    /// 打开目录；失败时返回系统错误，由调用方决定是否致命
    fn list(&self, dir: &Path) -> std::io::Result<Listing>;

    /// 路径不存在时返回 None
    fn entry_kind(&self, path: &Path) -> Option<EntryKind>;
}

impl<T: DirectoryLister + ?Sized> DirectoryLister for &T {
    fn list(&self, dir: &Path) -> std::io::Result<Listing> {
        (**self).list(dir)
    }

    fn entry_kind(&self, path: &Path) -> Option<EntryKind> {
        (**self).entry_kind(path)
    }
}

/// 快捷方式解析 trait
pub trait ShortcutResolver {
    /// 读取快捷方式文件的目标路径；无法加载或没有目标时返回 None
    fn resolve(&self, link: &Path) -> Option<PathBuf>;
}

impl<T: ShortcutResolver + ?Sized> ShortcutResolver for &T {
    fn resolve(&self, link: &Path) -> Option<PathBuf> {
        (**self).resolve(link)
    }
}

/// 资源标识：序号或名称
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum ResourceName {
    Ordinal(u16),
    Name(String),
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceName::Ordinal(id) => write!(f, "#{}", id),
            ResourceName::Name(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for ResourceName {
    type Err = std::num::ParseIntError;

    /// "#16000" 解析为序号，其他文本解析为名称
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('#') {
            Some(id) => Ok(ResourceName::Ordinal(id.parse()?)),
            None => Ok(ResourceName::Name(s.to_string())),
        }
    }
}

impl ResourceName {
    /// 资源名比较不区分大小写
    pub fn matches(&self, other: &ResourceName) -> bool {
        match (self, other) {
            (ResourceName::Ordinal(a), ResourceName::Ordinal(b)) => a == b,
            (ResourceName::Name(a), ResourceName::Name(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

/// 从插件文件中取出的一个 PiPL 资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResource {
    pub name: ResourceName,
    pub language: u16,
    pub data: Vec<u8>,
}

/// 插件资源读写 trait
///
/// # 职责
/// - 以纯数据方式打开插件，列出固定类型的资源（不执行任何代码）
/// - 打开资源更新事务，替换指定资源
pub trait ResourceStore {
    /// 列出文件中的 PiPL 资源；文件无法作为映像打开时返回空列表
    fn load_resources(&self, path: &Path) -> Vec<RawResource>;

    /// 开始更新事务；失败时文件保持原样
    fn begin_update(&self, path: &Path) -> Result<Box<dyn ResourceTransaction + '_>, PiplError>;
}

/// 资源更新事务
pub trait ResourceTransaction {
    /// 暂存对一个资源的替换
    fn update(&mut self, name: &ResourceName, language: u16, data: &[u8]) -> Result<(), PiplError>;

    /// 提交所有暂存的修改
    fn commit(self: Box<Self>) -> Result<(), PiplError>;

    /// 丢弃所有暂存的修改
    fn discard(self: Box<Self>);
}
