//! 插件文件枚举
//!
//! 惰性的广度优先目录遍历：当前目录读完后才从队列中取下一个目录，
//! 峰值内存只取决于待扫描目录队列的长度，与目录深度无关。
//!
//! .lnk 快捷方式只解析一层：指向目录的快捷方式会把目标目录加入队列并打上标记，
//! 该目录（及其子目录）中的快捷方式不再解析。

use crate::datatypes::SearchFlags;
use crate::io::{
    DirEntryInfo, DirectoryLister, EntryKind, FsDirectoryLister, Listing, LnkShortcutResolver,
    ShortcutResolver,
};
use crate::utils::PiplError;
use std::collections::VecDeque;
use std::ffi::OsStr;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 默认的插件扩展名
pub const DEFAULT_EXTENSION: &str = ".8bf";
/// 快捷方式扩展名
pub const SHORTCUT_EXTENSION: &str = ".lnk";

/// 搜索配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// 根目录
    pub root: PathBuf,
    /// 文件名后缀（不区分大小写），如 ".8bf"
    pub extension: String,
    pub flags: SearchFlags,
}

impl SearchOptions {
    /// 默认递归搜索 .8bf 并解析快捷方式
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SearchOptions {
            root: root.into(),
            extension: DEFAULT_EXTENSION.to_string(),
            flags: SearchFlags::default(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.flags.set(SearchFlags::RECURSIVE, recursive);
        self
    }

    pub fn dereference_shortcuts(mut self, dereference: bool) -> Self {
        self.flags.set(SearchFlags::DEREFERENCE_SHORTCUTS, dereference);
        self
    }
}

/// 一个待扫描的目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryFrame {
    pub path: PathBuf,
    /// 是否经由快捷方式到达（阻止二次解析）
    pub via_shortcut: bool,
}

/// 枚举器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerState {
    /// 根目录已打开，尚未产生结果
    Init,
    /// 正在遍历当前目录与队列
    Scanning,
    /// 已结束或已释放，不能重新开始
    Finished,
}

/// 惰性的插件文件枚举器
pub struct FileWalker<L = FsDirectoryLister, R = LnkShortcutResolver> {
    lister: L,
    resolver: R,
    extension: String,
    flags: SearchFlags,
    state: WalkerState,
    frame: DirectoryFrame,
    listing: Option<Listing>,
    pending: VecDeque<DirectoryFrame>,
}

impl FileWalker {
    /// 使用文件系统和 .lnk 解析器创建枚举器
    pub fn new(options: &SearchOptions) -> Result<Self, PiplError> {
        Self::with_capabilities(options, FsDirectoryLister, LnkShortcutResolver)
    }
}

impl<L: DirectoryLister, R: ShortcutResolver> FileWalker<L, R> {
    /// 使用注入的目录枚举与快捷方式解析能力创建枚举器
    ///
    /// 根目录立即打开；根目录不存在、无权限或其他系统错误都在这里返回。
    pub fn with_capabilities(options: &SearchOptions, lister: L, resolver: R) -> Result<Self, PiplError> {
        let root = std::path::absolute(&options.root)
            .map_err(|e| PiplError::from_root_io(&options.root, e))?;
        let listing = lister
            .list(&root)
            .map_err(|e| PiplError::from_root_io(&root, e))?;

        debug!(root = %root.display(), extension = %options.extension, "opened search root");

        Ok(FileWalker {
            lister,
            resolver,
            extension: options.extension.clone(),
            flags: options.flags,
            state: WalkerState::Init,
            frame: DirectoryFrame { path: root, via_shortcut: false },
            listing: Some(listing),
            pending: VecDeque::new(),
        })
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }

    /// 队列中等待扫描的目录数
    pub fn pending_directories(&self) -> usize {
        self.pending.len()
    }

    /// 释放所有句柄；可重复调用
    pub fn release(&mut self) {
        self.listing = None;
        self.pending.clear();
        self.state = WalkerState::Finished;
    }

    /// 处理当前目录中的一项，返回需要产出的路径
    fn visit(&mut self, entry: DirEntryInfo) -> Option<PathBuf> {
        let path = self.frame.path.join(&entry.name);

        if entry.is_dir {
            if self.flags.contains(SearchFlags::RECURSIVE) && entry.name != "." && entry.name != ".." {
                self.pending.push_back(DirectoryFrame {
                    path,
                    via_shortcut: self.frame.via_shortcut,
                });
            }
            return None;
        }

        if self.flags.contains(SearchFlags::DEREFERENCE_SHORTCUTS)
            && ends_with_ignore_case(&entry.name, SHORTCUT_EXTENSION)
        {
            // 快捷方式目录中的快捷方式不再解析
            if self.frame.via_shortcut {
                return None;
            }
            return self.follow_shortcut(&path);
        }

        ends_with_ignore_case(&entry.name, &self.extension).then_some(path)
    }

    fn follow_shortcut(&mut self, link: &Path) -> Option<PathBuf> {
        let target = self.resolver.resolve(link)?;

        match self.lister.entry_kind(&target)? {
            EntryKind::Directory => {
                debug!(link = %link.display(), target = %target.display(), "queueing shortcut directory");
                self.pending.push_back(DirectoryFrame { path: target, via_shortcut: true });
                None
            }
            EntryKind::File => {
                ends_with_ignore_case(target.as_os_str(), &self.extension).then_some(target)
            }
        }
    }

    /// 打开队列中下一个可读的目录；无法打开的子目录被跳过
    fn open_next_directory(&mut self) -> bool {
        while let Some(frame) = self.pending.pop_front() {
            match self.lister.list(&frame.path) {
                Ok(listing) => {
                    self.frame = frame;
                    self.listing = Some(listing);
                    return true;
                }
                Err(e) => {
                    warn!(path = %frame.path.display(), error = %e, "skipping unreadable directory");
                }
            }
        }
        false
    }
}

impl<L: DirectoryLister, R: ShortcutResolver> Iterator for FileWalker<L, R> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        match self.state {
            WalkerState::Finished => return None,
            WalkerState::Init => self.state = WalkerState::Scanning,
            WalkerState::Scanning => {}
        }

        loop {
            if let Some(listing) = self.listing.as_mut() {
                match listing.next() {
                    Some(Ok(entry)) => {
                        if let Some(path) = self.visit(entry) {
                            return Some(path);
                        }
                        continue;
                    }
                    Some(Err(e)) => {
                        debug!(path = %self.frame.path.display(), error = %e, "directory listing ended early");
                        self.listing = None;
                    }
                    None => self.listing = None,
                }
            }

            if !self.open_next_directory() {
                self.release();
                return None;
            }
        }
    }
}

impl<L: DirectoryLister, R: ShortcutResolver> FusedIterator for FileWalker<L, R> {}

/// 文件名后缀比较（ASCII 不区分大小写）
fn ends_with_ignore_case(name: &OsStr, suffix: &str) -> bool {
    let name = name.as_encoded_bytes();
    let suffix = suffix.as_bytes();
    name.len() >= suffix.len() && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}
