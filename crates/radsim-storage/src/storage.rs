//! 文档存储管理

use radsim_core::{RadSimError, Result};
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// 存储管理器
///
/// 管理数据目录下的JSON文档。调用方只传文件名，不直接接触路径。
#[derive(Debug, Clone)]
pub struct StorageManager {
    base_path: PathBuf,
}

impl StorageManager {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 文档的完整路径；文件名不允许包含路径分隔符
    pub fn document_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(RadSimError::Storage(format!("非法文档名: {:?}", name)));
        }
        Ok(self.base_path.join(name))
    }

    /// 确保数据目录存在
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path)?;
        Ok(())
    }

    /// 读取文档；文件不存在时返回 `None`
    pub fn read_document(&self, name: &str) -> Result<Option<serde_json::Value>> {
        let path = self.document_path(name)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = serde_json::from_slice(&data)?;
        Ok(Some(value))
    }

    /// 数据目录下全部 `.json` 文档的文件名（已排序，不含临时文件）
    ///
    /// 目录不存在时返回空列表。
    pub fn list_documents(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.base_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// 原子写入文档
    ///
    /// 先写入同目录下的临时文件并刷盘，再重命名覆盖目标。重命名是最后一步，
    /// 失败时原文档保持不变，读者不会看到写了一半的文件。
    pub fn write_document<T: Serialize + ?Sized>(&self, name: &str, document: &T) -> Result<PathBuf> {
        let path = self.document_path(name)?;
        self.ensure_dir()?;

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(".tmp")
            .tempfile_in(&self.base_path)
            .map_err(|e| write_error(name, e))?;
        serde_json::to_writer_pretty(&mut tmp, document)?;
        tmp.write_all(b"\n").map_err(|e| write_error(name, e))?;
        tmp.as_file().sync_all().map_err(|e| write_error(name, e))?;
        tmp.persist(&path).map_err(|e| write_error(name, e.error))?;

        Ok(path)
    }
}

fn write_error(name: &str, e: std::io::Error) -> RadSimError {
    RadSimError::Storage(format!("写入文档 {} 失败: {}", name, e))
}
