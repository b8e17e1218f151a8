/// IO 抽象层模块
///
/// 目录枚举、快捷方式解析、插件资源读写都通过这里的 trait 注入，
/// 默认实现访问真实文件系统，内存实现用于测试。
///
/// # 架构设计
///
/// - **traits**: 定义 DirectoryLister / ShortcutResolver / ResourceStore 接口
/// - **fs_io**: 基于 std::fs 的目录枚举
/// - **lnk_io**: .lnk 快捷方式二进制解析
/// - **pe_io**: PE 文件资源目录的读取与原位修补
/// - **memory**: 内存中的替身实现
///
/// # 使用示例
///
/// ```rust,ignore
/// use pipl_category::io::{PeResourceStore, ResourceStore};
///
/// let store = PeResourceStore::default();
/// for resource in store.load_resources(Path::new("Blur.8bf")) {
///     println!("{} ({} bytes)", resource.name, resource.data.len());
/// }
/// ```
pub mod traits;
pub mod fs_io;
pub mod lnk_io;
pub mod pe_io;
pub mod memory;

// === 导出 trait 定义 ===
pub use traits::{
    DirEntryInfo, DirectoryLister, EntryKind, Listing, RawResource, ResourceName,
    ResourceStore, ResourceTransaction, ShortcutResolver,
};

// === 导出默认实现 ===
pub use fs_io::FsDirectoryLister;
pub use lnk_io::LnkShortcutResolver;
pub use pe_io::{PeResourceStore, PIPL_RESOURCE_TYPE};
pub use memory::{MemoryDirectoryLister, MemoryResourceStore, MemoryShortcutResolver};
