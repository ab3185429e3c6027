//! 检查工作列表（MWL）
//!
//! RIS下达申请时为每个检查号写一个条目 `{safe_accession}.json`；检查设备查询时
//! 读取全部条目，只返回对本小组可见的部分。

use chrono::{DateTime, Utc};
use radsim_core::utils::safe_filename_component;
use radsim_core::{filter_visible, GroupCode, PatientScoped, RadSimError, Result};
use radsim_storage::StorageManager;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// 模拟检查UID使用的根
pub const STUDY_UID_ROOT: &str = "1.2.826.0.1.3680043.2.";

/// 由检查号确定性地派生检查实例UID
///
/// 同一检查号总是得到同一个UID，检查设备发送的影像因此能和申请对应上。
pub fn derive_study_uid(accession_number: &str) -> String {
    let digest = Sha256::digest(format!("{}.study", accession_number).as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    // 固定10位且不以0开头
    let suffix = 1_000_000_000 + u64::from_be_bytes(head) % 9_000_000_000;
    format!("{}{}", STUDY_UID_ROOT, suffix)
}

/// 工作列表条目（字段名沿用DICOM关键字）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorklistEntry {
    #[serde(rename = "PatientName")]
    pub patient_name: String,
    #[serde(rename = "PatientID")]
    pub patient_id: String,
    #[serde(rename = "AccessionNumber")]
    pub accession_number: String,
    #[serde(rename = "StudyInstanceUID")]
    pub study_instance_uid: String,
    #[serde(rename = "RequestedProcedureDescription", default)]
    pub description: String,
    #[serde(rename = "Modality", default)]
    pub modality: String,
    #[serde(rename = "ScheduledStationAETitle", default)]
    pub scheduled_station_ae_title: String,
    #[serde(rename = "ReferringPhysicianName", default)]
    pub referring_physician: String,
    #[serde(rename = "ScheduledAt")]
    pub scheduled_at: DateTime<Utc>,
}

impl PatientScoped for WorklistEntry {
    fn patient_id(&self) -> Option<&str> {
        Some(&self.patient_id)
    }
}

/// 工作列表目录
#[derive(Debug, Clone)]
pub struct WorklistStore {
    storage: StorageManager,
    station_ae_title: String,
    modality: String,
}

impl WorklistStore {
    pub fn new(storage: StorageManager, station_ae_title: impl Into<String>) -> Self {
        Self {
            storage,
            station_ae_title: station_ae_title.into(),
            modality: "CT".to_string(),
        }
    }

    /// 为一个检查申请生成条目（不写盘）
    pub fn build_entry(
        &self,
        patient_name: &str,
        patient_id: &str,
        accession_number: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> WorklistEntry {
        WorklistEntry {
            patient_name: patient_name.trim().to_string(),
            patient_id: patient_id.trim().to_string(),
            accession_number: accession_number.trim().to_string(),
            study_instance_uid: derive_study_uid(accession_number.trim()),
            description: description.trim().to_string(),
            modality: self.modality.clone(),
            scheduled_station_ae_title: self.station_ae_title.clone(),
            referring_physician: "Dr. House".to_string(),
            scheduled_at: now,
        }
    }

    /// 条目文件名
    pub fn entry_document_name(accession_number: &str) -> String {
        format!("{}.json", safe_filename_component(accession_number))
    }

    /// 原子写入条目；同一检查号的旧条目被替换
    pub fn write_entry(&self, entry: &WorklistEntry) -> Result<PathBuf> {
        if entry.accession_number.is_empty() {
            return Err(RadSimError::Validation("检查号不能为空".to_string()));
        }
        let path = self
            .storage
            .write_document(&Self::entry_document_name(&entry.accession_number), entry)?;
        info!(
            accession = %entry.accession_number,
            study = %entry.study_instance_uid,
            "wrote worklist entry"
        );
        Ok(path)
    }

    /// 读取全部条目；无法读取的条目跳过
    pub fn entries(&self) -> Vec<WorklistEntry> {
        let names = match self.storage.list_documents() {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "failed to list worklist directory");
                return Vec::new();
            }
        };

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let parsed = self
                .storage
                .read_document(&name)
                .and_then(|doc| Ok(doc.map(serde_json::from_value::<WorklistEntry>).transpose()?));
            match parsed {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!(document = %name, error = %e, "skipping unreadable worklist entry"),
            }
        }
        entries
    }

    /// 对小组可见的条目，按计划时间排序
    pub fn visible_entries(&self, tenant: &GroupCode) -> Vec<WorklistEntry> {
        let mut entries = filter_visible(self.entries(), tenant);
        entries.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        debug!(tenant = %tenant, count = entries.len(), "worklist query");
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store(dir: &tempfile::TempDir) -> WorklistStore {
        WorklistStore::new(StorageManager::new(dir.path()), "SIMULATOR")
    }

    #[test]
    fn test_study_uid_is_deterministic() {
        let a = derive_study_uid("SUS-AAAA-ACC1");
        assert_eq!(a, derive_study_uid("SUS-AAAA-ACC1"));
        assert_ne!(a, derive_study_uid("SUS-AAAA-ACC2"));

        let suffix = a.strip_prefix(STUDY_UID_ROOT).unwrap();
        assert_eq!(suffix.len(), 10);
        assert!(!suffix.starts_with('0'));
        assert!(radsim_core::utils::is_valid_dicom_uid(&a));
    }

    #[test]
    fn test_write_and_filter_by_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let now = Utc::now();
        for (pid, acc) in [
            ("SUS-AAAA-1", "SUS-AAAA-ACC1"),
            ("SUS-AAAA-2", "SUS-AAAA-ACC2"),
            ("SUS-BBBB-1", "SUS-BBBB-ACC1"),
        ] {
            let entry = store.build_entry("DOE^JOHN", pid, acc, "CT Thorax", now);
            store.write_entry(&entry).unwrap();
        }

        let visible = store.visible_entries(&GroupCode::normalize("SUS-AAAA"));
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|e| e.patient_id.starts_with("SUS-AAAA-")));
        assert!(store.visible_entries(&GroupCode::empty()).is_empty());
    }

    #[test]
    fn test_same_accession_replaces_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let now = Utc::now();
        store
            .write_entry(&store.build_entry("A", "SUS-AAAA-1", "SUS-AAAA-ACC1", "first", now))
            .unwrap();
        store
            .write_entry(&store.build_entry("A", "SUS-AAAA-1", "SUS-AAAA-ACC1", "second", now))
            .unwrap();

        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].description, "second");
    }

    #[test]
    fn test_unreadable_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store
            .write_entry(&store.build_entry("A", "SUS-AAAA-1", "SUS-AAAA-ACC1", "", Utc::now()))
            .unwrap();
        fs::write(dir.path().join("broken.json"), b"\x00\xffgarbage").unwrap();
        fs::write(dir.path().join("other.json"), b"{\"foo\": 1}").unwrap();

        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn test_accession_cannot_escape_directory() {
        assert_eq!(WorklistStore::entry_document_name("../../etc/x"), "______etc_x.json");
    }
}
