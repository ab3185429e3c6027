//! 小组代码注册表
//!
//! 注册表非空时只有其中的代码可以登录；注册表为空表示开放模式，任何非空的
//! 规范代码都可以使用。注册表损坏时按空处理，不能把所有小组都锁在外面。

use chrono::Utc;
use radsim_core::{GroupCode, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

use crate::storage::StorageManager;

/// 注册表文件名
pub const REGISTRY_DOCUMENT: &str = "sessions.json";

/// 生成代码的固定前缀
pub const CODE_PREFIX: &str = "SUS-";

/// 随机后缀的字节数（每字节两位十六进制）
pub const CODE_SUFFIX_BYTES: usize = 3;

/// 单次最多生成的代码数
pub const MAX_GENERATED_CODES: usize = 200;

#[derive(Debug, Serialize, Deserialize)]
struct RegistryDocument {
    generated_at: String,
    count: usize,
    codes: Vec<String>,
}

/// 小组代码注册表
#[derive(Debug)]
pub struct TenantRegistry {
    storage: StorageManager,
    lock: Mutex<()>,
}

impl TenantRegistry {
    pub fn new(storage: StorageManager) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    /// 读取注册的代码（规范化、去重、保持顺序）
    ///
    /// 任何读取或解析失败都返回空列表。
    pub fn load(&self) -> Vec<GroupCode> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let document = match self.storage.read_document(REGISTRY_DOCUMENT) {
            Ok(Some(document)) => document,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "failed to read group code registry, treating as open enrollment");
                return Vec::new();
            }
        };

        match serde_json::from_value::<RegistryDocument>(document) {
            Ok(document) => dedup_codes(document.codes.iter().map(String::as_str)),
            Err(e) => {
                warn!(error = %e, "malformed group code registry, treating as open enrollment");
                Vec::new()
            }
        }
    }

    /// 整体替换注册表
    pub fn save<S: AsRef<str>>(&self, codes: &[S]) -> Result<Vec<GroupCode>> {
        let cleaned = dedup_codes(codes.iter().map(AsRef::as_ref));
        let document = RegistryDocument {
            generated_at: Utc::now().to_rfc3339(),
            count: cleaned.len(),
            codes: cleaned.iter().map(|c| c.as_str().to_string()).collect(),
        };

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.storage.write_document(REGISTRY_DOCUMENT, &document)?;
        info!(count = cleaned.len(), "saved group code registry");
        Ok(cleaned)
    }

    /// 代码是否允许登录
    pub fn is_allowed(&self, code: &GroupCode) -> bool {
        let code = GroupCode::normalize(code.as_str());
        if code.is_empty() {
            return false;
        }
        let allowed = self.load();
        allowed.is_empty() || allowed.contains(&code)
    }

    /// 注册表为空时生成并保存 `n` 个代码；已有代码时不做任何修改
    pub fn ensure_generated(&self, n: usize) -> Result<Vec<GroupCode>> {
        let existing = self.load();
        if n == 0 || !existing.is_empty() {
            return Ok(existing);
        }
        let codes = Self::generate(n);
        self.save(&codes)
    }

    /// 生成 `n` 个随机代码（`n` 限定在 1..=200）
    ///
    /// 形如 `SUS-3FA91C`：固定前缀加上操作系统随机源产生的十六进制后缀，批内唯一。
    pub fn generate(n: usize) -> Vec<GroupCode> {
        let n = n.clamp(1, MAX_GENERATED_CODES);
        let mut seen = HashSet::with_capacity(n);
        let mut codes = Vec::with_capacity(n);

        while codes.len() < n {
            let mut suffix = [0u8; CODE_SUFFIX_BYTES];
            OsRng.fill_bytes(&mut suffix);
            let hex: String = suffix.iter().map(|b| format!("{:02X}", b)).collect();
            let code = GroupCode::normalize(&format!("{}{}", CODE_PREFIX, hex));
            if seen.insert(code.clone()) {
                codes.push(code);
            }
        }

        codes
    }
}

fn dedup_codes<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<GroupCode> {
    let mut seen = HashSet::new();
    raw.map(GroupCode::normalize)
        .filter(|code| !code.is_empty() && seen.insert(code.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn registry(dir: &tempfile::TempDir) -> TenantRegistry {
        TenantRegistry::new(StorageManager::new(dir.path()))
    }

    fn has_generated_shape(code: &GroupCode) -> bool {
        let Some(suffix) = code.as_str().strip_prefix(CODE_PREFIX) else {
            return false;
        };
        suffix.len() == CODE_SUFFIX_BYTES * 2
            && suffix
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
    }

    #[test]
    fn test_generate_clamps_count() {
        assert_eq!(TenantRegistry::generate(0).len(), 1);
        assert_eq!(TenantRegistry::generate(5).len(), 5);
        assert_eq!(TenantRegistry::generate(1000).len(), MAX_GENERATED_CODES);
    }

    #[test]
    fn test_generate_shape_and_uniqueness() {
        let codes = TenantRegistry::generate(MAX_GENERATED_CODES);
        let unique: HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
        assert!(codes.iter().all(has_generated_shape));
    }

    #[test]
    fn test_save_generated_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        let generated = TenantRegistry::generate(20);
        registry.save(&generated).unwrap();

        let loaded = registry.load();
        assert_eq!(loaded.len(), 20);
        assert_eq!(loaded, generated);
        assert!(loaded.iter().all(has_generated_shape));
    }

    #[test]
    fn test_save_normalizes_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        let saved = registry
            .save(&[" SUS-AAAA ", "SUS-AAAA", "", "sus/bbbb", "../"])
            .unwrap();
        let saved: Vec<&str> = saved.iter().map(GroupCode::as_str).collect();
        assert_eq!(saved, vec!["SUS-AAAA", "susbbbb"]);
        assert_eq!(registry.load().len(), 2);
    }

    #[test]
    fn test_save_replaces_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        registry.save(&["SUS-AAAA"]).unwrap();
        registry.save(&["SUS-BBBB"]).unwrap();
        assert_eq!(registry.load(), vec![GroupCode::normalize("SUS-BBBB")]);
    }

    #[test]
    fn test_open_enrollment_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        assert!(registry.is_allowed(&GroupCode::normalize("ANY-CODE")));
        assert!(!registry.is_allowed(&GroupCode::empty()));
    }

    #[test]
    fn test_membership_when_populated() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        registry.save(&["SUS-AAAA"]).unwrap();
        assert!(registry.is_allowed(&GroupCode::normalize("SUS-AAAA")));
        assert!(!registry.is_allowed(&GroupCode::normalize("SUS-BBBB")));
    }

    #[test]
    fn test_corrupt_registry_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        fs::write(dir.path().join(REGISTRY_DOCUMENT), b"{ definitely not json").unwrap();
        assert!(registry.load().is_empty());
        assert!(registry.is_allowed(&GroupCode::normalize("SUS-ZZZZ")));
    }

    #[test]
    fn test_ensure_generated_only_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);
        assert_eq!(registry.ensure_generated(4).unwrap().len(), 4);
        assert_eq!(registry.ensure_generated(10).unwrap().len(), 4);
    }
}
