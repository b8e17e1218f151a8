/// 内存中的 IO 实现
///
/// 不访问文件系统，用于测试和嵌入其他宿主时替换默认实现。
use crate::utils::PiplError;
use super::traits::{
    DirEntryInfo, DirectoryLister, EntryKind, Listing, RawResource, ResourceName, ResourceStore,
    ResourceTransaction, ShortcutResolver,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 内存目录树；同一目录下的条目按添加顺序列出
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectoryLister {
    directories: BTreeMap<PathBuf, Vec<DirEntryInfo>>,
    files: HashSet<PathBuf>,
    failures: HashMap<PathBuf, ErrorKind>,
}

impl MemoryDirectoryLister {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加文件（自动创建上级目录）
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        let path = path.as_ref();
        if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
            self.add_dir(parent);
            if self.files.insert(path.to_path_buf()) {
                if let Some(entries) = self.directories.get_mut(parent) {
                    entries.push(DirEntryInfo::file(name));
                }
            }
        }
        self
    }

    /// 添加目录（自动创建上级目录）
    pub fn add_dir(&mut self, path: impl AsRef<Path>) -> &mut Self {
        let path = path.as_ref();
        if self.directories.contains_key(path) {
            return self;
        }

        self.directories.insert(path.to_path_buf(), Vec::new());
        if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
            self.add_dir(parent);
            if let Some(entries) = self.directories.get_mut(parent) {
                entries.push(DirEntryInfo::directory(name));
            }
        }
        self
    }

    /// 让某个目录在打开时失败
    pub fn fail_dir(&mut self, path: impl AsRef<Path>, kind: ErrorKind) -> &mut Self {
        self.failures.insert(path.as_ref().to_path_buf(), kind);
        self
    }
}

impl DirectoryLister for MemoryDirectoryLister {
    fn list(&self, dir: &Path) -> std::io::Result<Listing> {
        if let Some(kind) = self.failures.get(dir) {
            return Err(Error::from(*kind));
        }

        let entries = self
            .directories
            .get(dir)
            .cloned()
            .ok_or_else(|| Error::from(ErrorKind::NotFound))?;
        Ok(Box::new(entries.into_iter().map(Ok)))
    }

    fn entry_kind(&self, path: &Path) -> Option<EntryKind> {
        if self.directories.contains_key(path) {
            Some(EntryKind::Directory)
        } else if self.files.contains(path) {
            Some(EntryKind::File)
        } else {
            None
        }
    }
}

/// 快捷方式 → 目标 的映射表
#[derive(Debug, Clone, Default)]
pub struct MemoryShortcutResolver {
    links: HashMap<PathBuf, PathBuf>,
}

impl MemoryShortcutResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_link(&mut self, link: impl AsRef<Path>, target: impl AsRef<Path>) -> &mut Self {
        self.links.insert(link.as_ref().to_path_buf(), target.as_ref().to_path_buf());
        self
    }
}

impl ShortcutResolver for MemoryShortcutResolver {
    fn resolve(&self, link: &Path) -> Option<PathBuf> {
        self.links.get(link).cloned()
    }
}

/// 内存中的插件资源
#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    files: Mutex<HashMap<PathBuf, Vec<RawResource>>>,
    failing_commits: Mutex<HashSet<PathBuf>>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置文件中的资源
    pub fn insert(&self, path: impl AsRef<Path>, resources: Vec<RawResource>) {
        self.lock_files().insert(path.as_ref().to_path_buf(), resources);
    }

    /// 当前保存的资源
    pub fn resources(&self, path: impl AsRef<Path>) -> Vec<RawResource> {
        self.lock_files().get(path.as_ref()).cloned().unwrap_or_default()
    }

    /// 让之后对该文件的提交失败
    pub fn fail_commits(&self, path: impl AsRef<Path>, fail: bool) {
        let mut failing = self.failing_commits.lock().unwrap_or_else(|e| e.into_inner());
        if fail {
            failing.insert(path.as_ref().to_path_buf());
        } else {
            failing.remove(path.as_ref());
        }
    }

    fn lock_files(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Vec<RawResource>>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ResourceStore for MemoryResourceStore {
    fn load_resources(&self, path: &Path) -> Vec<RawResource> {
        self.resources(path)
    }

    fn begin_update(&self, path: &Path) -> Result<Box<dyn ResourceTransaction + '_>, PiplError> {
        let staged = self
            .lock_files()
            .get(path)
            .cloned()
            .ok_or_else(|| PiplError::persistence(path, Error::from(ErrorKind::NotFound)))?;

        Ok(Box::new(MemoryTransaction {
            store: self,
            path: path.to_path_buf(),
            staged,
        }))
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryResourceStore,
    path: PathBuf,
    staged: Vec<RawResource>,
}

impl ResourceTransaction for MemoryTransaction<'_> {
    fn update(&mut self, name: &ResourceName, language: u16, data: &[u8]) -> Result<(), PiplError> {
        let resource = self
            .staged
            .iter_mut()
            .find(|r| r.language == language && r.name.matches(name))
            .ok_or_else(|| PiplError::persistence(&self.path, Error::from(ErrorKind::NotFound)))?;

        resource.data = data.to_vec();
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), PiplError> {
        let MemoryTransaction { store, path, staged } = *self;

        let failing = store
            .failing_commits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&path);
        if failing {
            return Err(PiplError::persistence(
                &path,
                Error::new(ErrorKind::Other, "commit rejected"),
            ));
        }

        store.lock_files().insert(path, staged);
        Ok(())
    }

    fn discard(self: Box<Self>) {}
}
