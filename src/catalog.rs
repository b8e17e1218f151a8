//! 扫描流程与分类目录
//!
//! 扫描：枚举插件文件 → 读取 PiPL 资源 → 解码为 [`PluginRecord`]。
//! 每次扫描都从头解码，不缓存。
//!
//! 目录：按分类分组，组内按菜单名排序；提供修改单个插件分类和整体重命名分类。

use crate::io::{
    DirectoryLister, FsDirectoryLister, LnkShortcutResolver, PeResourceStore, ResourceStore,
    ShortcutResolver,
};
use crate::plugin::{PluginRecord, ResourceId};
use crate::utils::PiplError;
use crate::walker::{FileWalker, SearchOptions};
use crate::datatypes::PascalString;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 插件扫描器
pub struct PluginScanner<L = FsDirectoryLister, R = LnkShortcutResolver, S = PeResourceStore> {
    lister: L,
    resolver: R,
    store: S,
}

impl PluginScanner {
    /// 使用文件系统、.lnk 解析和 PE 资源读取
    pub fn new(store: PeResourceStore) -> Self {
        PluginScanner {
            lister: FsDirectoryLister,
            resolver: LnkShortcutResolver,
            store,
        }
    }
}

impl<L: DirectoryLister, R: ShortcutResolver, S: ResourceStore> PluginScanner<L, R, S> {
    pub fn with_capabilities(lister: L, resolver: R, store: S) -> Self {
        PluginScanner { lister, resolver, store }
    }

    /// 写回时使用的资源存储
    pub fn store(&self) -> &S {
        &self.store
    }

    /// 扫描目录中的所有滤镜插件
    ///
    /// 只有根目录的错误会中止扫描；损坏的资源记录警告后跳过。
    pub fn scan(&self, options: &SearchOptions) -> Result<Vec<PluginRecord>, PiplError> {
        let walker = FileWalker::with_capabilities(options, &self.lister, &self.resolver)?;

        let mut records = Vec::new();
        let mut files = 0usize;
        for path in walker {
            files += 1;
            records.extend(self.load_file(&path));
        }

        info!(root = %options.root.display(), files, plugins = records.len(), "scan finished");
        Ok(records)
    }

    /// 解码单个文件中的所有滤镜资源
    pub fn load_file(&self, path: &Path) -> Vec<PluginRecord> {
        self.store
            .load_resources(path)
            .iter()
            .filter_map(|raw| match PluginRecord::from_resource(path, raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path.display(), resource = %raw.name, error = %e, "skipping malformed resource");
                    None
                }
            })
            .collect()
    }
}

/// 分类重命名中单个插件的失败
#[derive(Debug)]
pub struct RenameFailure {
    pub path: PathBuf,
    pub title: String,
    pub error: PiplError,
}

/// 分类重命名结果
#[derive(Debug, Default)]
pub struct RenameReport {
    /// 成功写回的插件数
    pub renamed: usize,
    /// 写回失败的插件，仍留在原分类中
    pub failures: Vec<RenameFailure>,
}

impl RenameReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// 按分类分组的插件目录
#[derive(Debug, Clone, Default)]
pub struct PluginCatalog {
    groups: BTreeMap<String, Vec<PluginRecord>>,
    show_hidden: bool,
}

impl PluginCatalog {
    /// 分组；`show_hidden` 为 false 时排除隐藏分类
    pub fn from_records(records: Vec<PluginRecord>, show_hidden: bool) -> Self {
        let mut catalog = PluginCatalog { groups: BTreeMap::new(), show_hidden };
        for record in records {
            catalog.insert(record);
        }
        catalog
    }

    /// 分类名（自然顺序）
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = self.groups.keys().map(String::as_str).collect();
        categories.sort_by(|a, b| compare_logical(a, b));
        categories
    }

    /// 某分类中的插件（按菜单名排序）
    pub fn plugins(&self, category: &str) -> &[PluginRecord] {
        self.groups.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 插件总数
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// 修改一个插件的分类并写回
    ///
    /// 插件由文件与资源标识确定（同一分类中可能有同名滤镜）。
    /// 写回成功后才移动到新分类；失败时目录保持不变。
    pub fn change_category(
        &mut self,
        category: &str,
        path: &Path,
        resource: &ResourceId,
        new_category: &str,
        store: &dyn ResourceStore,
    ) -> Result<bool, PiplError> {
        let unknown = || PiplError::UnknownPlugin {
            category: category.to_string(),
            path: path.to_path_buf(),
            resource: resource.clone(),
        };

        let group = self.groups.get_mut(category).ok_or_else(unknown)?;
        let index = group
            .iter()
            .position(|p| p.path() == path && p.resource() == resource)
            .ok_or_else(unknown)?;

        let mut updated = group[index].clone();
        if !updated.change_category(new_category, store)? {
            return Ok(false);
        }

        group.remove(index);
        if group.is_empty() {
            self.groups.remove(category);
        }
        self.insert(updated);
        Ok(true)
    }

    /// 把整个分类改名，逐个写回
    ///
    /// 新名称先统一校验；单个插件写回失败不影响其他插件，失败的插件留在原分类。
    /// 新名称已存在时合并到该分类。
    pub fn rename_category(
        &mut self,
        category: &str,
        new_category: &str,
        store: &dyn ResourceStore,
    ) -> Result<RenameReport, PiplError> {
        PascalString::encode(new_category)?;

        let mut report = RenameReport::default();
        if category == new_category {
            return Ok(report);
        }
        let Some(members) = self.groups.remove(category) else {
            return Ok(report);
        };

        let mut remaining = Vec::new();
        let mut moved = Vec::new();
        for record in members {
            let mut updated = record.clone();
            match updated.change_category(new_category, store) {
                Ok(_) => moved.push(updated),
                Err(error) => {
                    warn!(path = %record.path().display(), error = %error, "category rename failed");
                    report.failures.push(RenameFailure {
                        path: record.path().to_path_buf(),
                        title: record.title().to_string(),
                        error,
                    });
                    remaining.push(record);
                }
            }
        }

        report.renamed = moved.len();
        if !remaining.is_empty() {
            self.groups.insert(category.to_string(), remaining);
        }
        for record in moved {
            self.insert(record);
        }

        info!(from = category, to = new_category, renamed = report.renamed, failed = report.failures.len(), "category renamed");
        Ok(report)
    }

    fn insert(&mut self, record: PluginRecord) {
        if record.is_hidden() && !self.show_hidden {
            return;
        }

        let group = self.groups.entry(record.category().to_string()).or_default();
        let index = group.partition_point(|p| compare_logical(p.title(), record.title()) != Ordering::Greater);
        group.insert(index, record);
    }
}

/// 自然排序：忽略大小写，连续数字按数值比较（"Filter 2" < "Filter 10"）
pub fn compare_logical(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let x_digits = take_digits(&mut left);
                let y_digits = take_digits(&mut right);
                let x_trimmed = x_digits.trim_start_matches('0');
                let y_trimmed = y_digits.trim_start_matches('0');

                let ordering = x_trimmed
                    .len()
                    .cmp(&y_trimmed.len())
                    .then_with(|| x_trimmed.cmp(y_trimmed));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                let ordering = x.to_lowercase().cmp(y.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(|c| c.is_ascii_digit()) {
        digits.push(c);
    }
    digits
}
