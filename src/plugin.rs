use crate::datatypes::PascalString;
use crate::io::{RawResource, ResourceName};
use crate::pipl::{decode_pipl, encode_pipl, DecodeOutcome};
use crate::property::{PropertyKey, PropertyRecord};
use crate::utils::PiplError;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

mod writer;

/// 宿主不在菜单中显示的分类
pub const HIDDEN_CATEGORY: &str = "**Hidden**";

/// 资源标识：名称或序号 + 语言
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceId {
    pub name: ResourceName,
    pub language: u16,
}

impl ResourceId {
    pub fn new(name: ResourceName, language: u16) -> Self {
        ResourceId { name, language }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (language {})", self.name, self.language)
    }
}

/// 一个滤镜插件的 PiPL 资源
///
/// 属性列表中始终恰好有一条分类属性，作为写回的目标。
/// 只能通过 [`PluginRecord::set_category`] 修改。
#[derive(Debug, Clone, Serialize)]
pub struct PluginRecord {
    /// 插件文件
    path: PathBuf,
    /// 资源标识
    resource: ResourceId,
    /// 属性列表（按资源中的顺序）
    properties: Vec<PropertyRecord>,
    /// 分类名
    category: String,
    /// 菜单名
    title: String,
    #[serde(skip)]
    category_index: usize,
    #[serde(skip)]
    dirty: bool,
}

impl PluginRecord {
    /// 由已解码的属性列表创建
    ///
    /// 缺少分类属性时追加一条空分类；出现多条时只保留第一条。
    pub fn new(path: PathBuf, resource: ResourceId, mut properties: Vec<PropertyRecord>) -> Self {
        let mut seen_category = false;
        properties.retain(|property| {
            if property.key != PropertyKey::CATEGORY {
                return true;
            }
            if seen_category {
                debug!(path = %path.display(), "dropping duplicate category property");
                return false;
            }
            seen_category = true;
            true
        });

        let category_index = match properties.iter().position(|p| p.key == PropertyKey::CATEGORY) {
            Some(index) => index,
            None => {
                properties.push(PropertyRecord::new(PropertyKey::CATEGORY, &[0]));
                properties.len() - 1
            }
        };

        let category = PascalString::decode(&properties[category_index].data).content;
        // 多条菜单名时以最后一条为准
        let title = properties
            .iter()
            .rev()
            .find(|p| p.key == PropertyKey::NAME)
            .map(|p| PascalString::decode(&p.data).content)
            .unwrap_or_default();

        PluginRecord {
            path,
            resource,
            properties,
            category,
            title,
            category_index,
            dirty: false,
        }
    }

    /// 解码一个原始资源；不是滤镜 PiPL 时返回 None
    pub fn from_resource(path: &Path, raw: &RawResource) -> Result<Option<Self>, PiplError> {
        match decode_pipl(&raw.data)? {
            DecodeOutcome::Properties(properties) => Ok(Some(Self::new(
                path.to_path_buf(),
                ResourceId::new(raw.name.clone(), raw.language),
                properties,
            ))),
            DecodeOutcome::Skipped(reason) => {
                debug!(path = %path.display(), resource = %raw.name, %reason, "resource skipped");
                Ok(None)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件名，用于显示
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn properties(&self) -> &[PropertyRecord] {
        &self.properties
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// 是否有未写回的修改
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_hidden(&self) -> bool {
        self.category == HIDDEN_CATEGORY
    }

    /// 分类名能否写入（不修改任何状态）
    pub fn is_valid_category(value: &str) -> bool {
        PascalString::is_length_valid(value)
    }

    /// 修改分类名
    ///
    /// 与当前值相同时不做任何事并返回 `Ok(false)`；校验失败时状态不变。
    pub fn set_category(&mut self, value: &str) -> Result<bool, PiplError> {
        if value == self.category {
            return Ok(false);
        }

        let encoded = PascalString::encode(value)?;
        self.properties[self.category_index].replace_value(&encoded);
        self.category = value.to_string();
        self.dirty = true;
        Ok(true)
    }

    /// 编码整个资源
    pub fn encode(&self) -> Result<Vec<u8>, PiplError> {
        encode_pipl(&self.properties)
    }
}
