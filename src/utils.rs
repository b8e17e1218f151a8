use crate::plugin::ResourceId;
use thiserror::Error;
use std::path::{Path, PathBuf};

/// 自定义错误类型
#[derive(Error, Debug)]
pub enum PiplError {
    #[error("Directory not found: {0}")]
    NotFound(PathBuf),

    #[error("Access denied: {0}")]
    AccessDenied(PathBuf),

    #[error("IO failure on {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Category is {length} bytes, the maximum is 255")]
    CategoryTooLong { length: usize },

    #[error("Category contains characters that cannot be stored: {0:?}")]
    CategoryUnencodable(String),

    #[error("Malformed PiPL resource at offset {offset}: {reason}")]
    Malformed { offset: u64, reason: String },

    #[error("Failed to update resource in {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No plugin {resource} from {path:?} in category {category:?}")]
    UnknownPlugin {
        category: String,
        path: PathBuf,
        resource: ResourceId,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PiplError {
    /// 将根目录上的系统错误映射为扫描错误
    pub fn from_root_io(path: &Path, error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => PiplError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => PiplError::AccessDenied(path.to_path_buf()),
            _ => PiplError::IoFailure { path: path.to_path_buf(), source: error },
        }
    }

    pub(crate) fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        PiplError::Malformed { offset, reason: reason.into() }
    }

    pub(crate) fn persistence(path: &Path, source: std::io::Error) -> Self {
        PiplError::Persistence { path: path.to_path_buf(), source }
    }

    /// 是否为分类名校验错误
    pub fn is_validation(&self) -> bool {
        matches!(self, PiplError::CategoryTooLong { .. } | PiplError::CategoryUnencodable(_))
    }
}

/// 创建文件备份
pub fn create_backup(file_path: &Path) -> Result<PathBuf, PiplError> {
    if !file_path.exists() {
        return Err(PiplError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "原文件不存在"
        )));
    }

    let timestamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
    let extension = file_path
        .extension()
        .map(|ext| format!("{}.{}.bak", ext.to_string_lossy(), timestamp))
        .unwrap_or_else(|| format!("{}.bak", timestamp));
    let backup_path = file_path.with_extension(extension);

    std::fs::copy(file_path, &backup_path)?;

    Ok(backup_path)
}
