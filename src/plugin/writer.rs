use super::PluginRecord;
use crate::io::ResourceStore;
use crate::utils::PiplError;
use tracing::info;

impl PluginRecord {
    /// 把修改写回插件文件
    ///
    /// 没有修改时直接返回 `Ok(false)`。新的资源字节在打开事务前完整生成；
    /// 任何一步失败都保留 dirty 标记，可以重试。
    pub fn save(&mut self, store: &dyn ResourceStore) -> Result<bool, PiplError> {
        if !self.dirty {
            return Ok(false);
        }

        let data = self.encode()?;

        let mut transaction = store.begin_update(&self.path)?;
        let staged = transaction.update(&self.resource.name, self.resource.language, &data);
        if let Err(e) = staged {
            transaction.discard();
            return Err(e);
        }
        transaction.commit()?;

        self.dirty = false;
        info!(
            path = %self.path.display(),
            resource = %self.resource,
            category = %self.category,
            "category written"
        );
        Ok(true)
    }

    /// 修改分类并立即写回
    ///
    /// 写回失败时新分类保留在内存中（dirty），以便重试。
    pub fn change_category(&mut self, value: &str, store: &dyn ResourceStore) -> Result<bool, PiplError> {
        if !self.set_category(value)? {
            return Ok(false);
        }
        self.save(store)
    }
}
