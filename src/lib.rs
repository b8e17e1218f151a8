pub mod datatypes;
pub mod property;
pub mod pipl;
pub mod plugin;
pub mod walker;
pub mod catalog;
pub mod io;
pub mod utils;

// 重新导出主要结构
pub use catalog::{PluginCatalog, PluginScanner, RenameFailure, RenameReport};
pub use datatypes::{PascalString, SearchFlags};
pub use pipl::{decode_pipl, encode_pipl, DecodeOutcome, SkipReason};
pub use plugin::{PluginRecord, ResourceId, HIDDEN_CATEGORY};
pub use property::{PropertyKey, PropertyRecord};
pub use utils::PiplError;
pub use walker::{FileWalker, SearchOptions};

// 常量定义
pub use walker::DEFAULT_EXTENSION;
