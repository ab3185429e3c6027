//! 按小组分区的键值文档存储
//!
//! 每个 (小组, 记录类型) 对应一个文档 `{kind}_{safe_code}.json`：
//!
//! ```json
//! { "updated_at": "...", "count": 2, "patients": [ ... ] }
//! ```
//!
//! 每种记录类型持有一把互斥锁，所有小组的“读取-修改-写入”都在这把锁内完成。
//! 锁是粗粒度的，但每次操作只获取一次锁，不跨类型嵌套，不会死锁。

use chrono::Utc;
use radsim_core::utils::safe_filename_component;
use radsim_core::{GroupCode, Patient, RadSimError, Report, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::storage::StorageManager;

/// 每个小组保留的最近记录数
pub const RETENTION_LIMIT: usize = 50;

/// 可按小组存储的记录类型
pub trait TenantRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// 记录类型名，同时用作文件名前缀和文档中的数组字段名
    const KIND: &'static str;
}

impl TenantRecord for Patient {
    const KIND: &'static str = "patients";
}

impl TenantRecord for Report {
    const KIND: &'static str = "reports";
}

/// 按小组分区的JSON文档存储
#[derive(Debug)]
pub struct TenantKeyValueStore<T: TenantRecord> {
    storage: StorageManager,
    lock: Mutex<()>,
    retention: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TenantRecord> TenantKeyValueStore<T> {
    pub fn new(storage: StorageManager) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
            retention: RETENTION_LIMIT,
            _marker: PhantomData,
        }
    }

    /// 修改保留条数（至少为1）
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    /// 小组文档的文件名
    pub fn document_name(tenant: &GroupCode) -> String {
        format!("{}_{}.json", T::KIND, safe_filename_component(tenant.as_str()))
    }

    /// 小组文档的完整路径
    pub fn document_path(&self, tenant: &GroupCode) -> Result<PathBuf> {
        self.storage.document_path(&Self::document_name(tenant))
    }

    /// 读取小组的全部记录
    ///
    /// 文件不存在、无法读取或解析失败时返回空列表，不向调用方报错。
    pub fn load(&self, tenant: &GroupCode) -> Vec<T> {
        let _guard = self.guard();
        self.load_unlocked(tenant)
    }

    /// 原子替换小组的全部记录
    pub fn save(&self, tenant: &GroupCode, items: &[T]) -> Result<()> {
        let _guard = self.guard();
        self.save_unlocked(tenant, items)
    }

    /// 在锁内执行“读取-修改-写入”
    ///
    /// 闭包返回 `None` 表示没有修改，此时不写文件。写入前按插入顺序淘汰最旧的记录，
    /// 只保留最近 `retention` 条。
    pub fn update<R, F>(&self, tenant: &GroupCode, mutate: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut Vec<T>) -> Option<R>,
    {
        let _guard = self.guard();
        let mut items = self.load_unlocked(tenant);

        let Some(output) = mutate(&mut items) else {
            return Ok(None);
        };

        if items.len() > self.retention {
            let evicted = items.len() - self.retention;
            items.drain(..evicted);
            debug!(kind = T::KIND, tenant = %tenant, evicted, "evicted oldest records");
        }

        self.save_unlocked(tenant, &items)?;
        Ok(Some(output))
    }

    /// 追加一条记录（超出保留条数时淘汰最旧的）
    pub fn append(&self, tenant: &GroupCode, item: T) -> Result<()> {
        self.update(tenant, |items| {
            items.push(item);
            Some(())
        })?;
        Ok(())
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // 锁只保护文件系统操作，没有内存状态会因为 panic 处于不一致状态
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_unlocked(&self, tenant: &GroupCode) -> Vec<T> {
        if tenant.is_empty() {
            return Vec::new();
        }

        let name = Self::document_name(tenant);
        let document = match self.storage.read_document(&name) {
            Ok(Some(document)) => document,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(kind = T::KIND, tenant = %tenant, error = %e, "failed to read tenant document");
                return Vec::new();
            }
        };

        match document.get(T::KIND) {
            Some(items) => serde_json::from_value(items.clone()).unwrap_or_else(|e| {
                warn!(kind = T::KIND, tenant = %tenant, error = %e, "malformed tenant document");
                Vec::new()
            }),
            None => {
                warn!(kind = T::KIND, tenant = %tenant, "tenant document without item list");
                Vec::new()
            }
        }
    }

    fn save_unlocked(&self, tenant: &GroupCode, items: &[T]) -> Result<()> {
        if tenant.is_empty() {
            return Err(RadSimError::Validation("缺少小组代码".to_string()));
        }

        let mut document = Map::new();
        document.insert("updated_at".to_string(), Value::String(Utc::now().to_rfc3339()));
        document.insert("count".to_string(), Value::from(items.len()));
        document.insert(T::KIND.to_string(), serde_json::to_value(items)?);

        let path = self
            .storage
            .write_document(&Self::document_name(tenant), &document)?;
        debug!(kind = T::KIND, tenant = %tenant, count = items.len(), path = %path.display(), "saved tenant document");
        Ok(())
    }
}
