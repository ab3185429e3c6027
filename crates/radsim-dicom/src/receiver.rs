//! 已接收影像的共享缓存
//!
//! 所有小组共用一份只追加的记录列表，存储时不分区；读取时按患者ID前缀过滤。
//! 记录在加锁之前就已完整构造，读者要么看到整条记录，要么看不到。

use chrono::{DateTime, Utc};
use radsim_core::{GroupCode, ReceivedImageRecord, StudySummary, UNKNOWN, UNKNOWN_MODALITY};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// 归档推送的“影像到达”通知
///
/// 字段名沿用DICOM关键字，也接受 snake_case 写法。所有字段都可能缺失。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreNotification {
    #[serde(rename = "PatientName", alias = "patient_name", default)]
    pub patient_name: Option<String>,
    #[serde(rename = "PatientID", alias = "patient_id", default)]
    pub patient_id: Option<String>,
    #[serde(rename = "StudyInstanceUID", alias = "study_instance_uid", default)]
    pub study_instance_uid: Option<String>,
    #[serde(rename = "Modality", alias = "modality", default)]
    pub modality: Option<String>,
}

impl StoreNotification {
    /// 转换为接收记录，缺失或空白字段替换为占位值
    pub fn into_record(self, received_at: DateTime<Utc>) -> ReceivedImageRecord {
        ReceivedImageRecord {
            patient_name: or_sentinel(self.patient_name, UNKNOWN),
            patient_id: or_sentinel(self.patient_id, UNKNOWN),
            study_instance_uid: or_sentinel(self.study_instance_uid, UNKNOWN),
            modality: or_sentinel(self.modality, UNKNOWN_MODALITY),
            received_at,
        }
    }
}

fn or_sentinel(value: Option<String>, sentinel: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| sentinel.to_string())
}

/// 已接收影像缓存（只追加）
#[derive(Debug, Default)]
pub struct ReceivedImageLog {
    records: RwLock<Vec<ReceivedImageRecord>>,
}

impl ReceivedImageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条记录，返回追加后的记录数
    pub fn append(&self, record: ReceivedImageRecord) -> usize {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.push(record);
        records.len()
    }

    /// 把通知转换为记录并追加
    pub fn record_notification(&self, notification: StoreNotification) -> ReceivedImageRecord {
        let record = notification.into_record(Utc::now());
        let total = self.append(record.clone());
        debug!(
            patient_id = %record.patient_id,
            study = %record.study_instance_uid,
            modality = %record.modality,
            total,
            "recorded received image"
        );
        record
    }

    /// 当前全部记录的快照
    pub fn snapshot(&self) -> Vec<ReceivedImageRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 某个小组可见的记录
    ///
    /// 代码为空时返回全部记录，只用于未开启小组限制的演示场景。
    pub fn received_for(&self, tenant: &GroupCode) -> Vec<ReceivedImageRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        if tenant.is_empty() {
            return records.clone();
        }
        records
            .iter()
            .filter(|r| tenant.owns_identifier(&r.patient_id))
            .cloned()
            .collect()
    }

    /// 缓存为空时放入一条演示记录
    pub fn seed_demo(&self) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if !records.is_empty() {
            return false;
        }
        records.push(ReceivedImageRecord {
            patient_name: "TEST^DEMO".to_string(),
            patient_id: "DEMO-0001".to_string(),
            study_instance_uid: "1.2.826.0.1.3680043.10.999.1".to_string(),
            modality: "CT".to_string(),
            received_at: Utc::now(),
        });
        true
    }
}

/// 按检查实例UID聚合接收记录
///
/// 每个检查一行：患者姓名和ID取第一条记录，设备类型去重排序后用逗号连接，
/// 记录数，以及最近的接收时间。结果按 (患者姓名, 检查UID) 排序。
pub fn group_by_study(records: &[ReceivedImageRecord]) -> Vec<StudySummary> {
    let mut groups: HashMap<String, (StudySummary, BTreeSet<String>)> = HashMap::new();

    for record in records {
        let uid = record.study_instance_uid.trim();
        let uid = if uid.is_empty() { UNKNOWN } else { uid };

        let (summary, modalities) = groups.entry(uid.to_string()).or_insert_with(|| {
            (
                StudySummary {
                    study_instance_uid: uid.to_string(),
                    patient_name: record.patient_name.clone(),
                    patient_id: record.patient_id.clone(),
                    modalities: String::new(),
                    count: 0,
                    last_received_at: record.received_at,
                },
                BTreeSet::new(),
            )
        });

        summary.count += 1;
        if record.received_at > summary.last_received_at {
            summary.last_received_at = record.received_at;
        }
        let modality = record.modality.trim();
        if !modality.is_empty() {
            modalities.insert(modality.to_string());
        }
    }

    let mut summaries: Vec<StudySummary> = groups
        .into_values()
        .map(|(mut summary, modalities)| {
            summary.modalities = modalities.into_iter().collect::<Vec<_>>().join(",");
            summary
        })
        .collect();
    summaries.sort_by(|a, b| {
        (a.patient_name.as_str(), a.study_instance_uid.as_str())
            .cmp(&(b.patient_name.as_str(), b.study_instance_uid.as_str()))
    });
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn record(name: &str, pid: &str, study: &str, modality: &str) -> ReceivedImageRecord {
        ReceivedImageRecord {
            patient_name: name.to_string(),
            patient_id: pid.to_string(),
            study_instance_uid: study.to_string(),
            modality: modality.to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_fields_use_sentinels() {
        let record = StoreNotification {
            patient_name: None,
            patient_id: Some("   ".to_string()),
            study_instance_uid: None,
            modality: None,
        }
        .into_record(Utc::now());

        assert_eq!(record.patient_name, UNKNOWN);
        assert_eq!(record.patient_id, UNKNOWN);
        assert_eq!(record.study_instance_uid, UNKNOWN);
        assert_eq!(record.modality, UNKNOWN_MODALITY);
    }

    #[test]
    fn test_notification_accepts_dicom_keywords_and_snake_case() {
        let a: StoreNotification = serde_json::from_str(
            r#"{"PatientName":"DOE^JOHN","PatientID":"SUS-AAAA-1","StudyInstanceUID":"1.2","Modality":"CT"}"#,
        )
        .unwrap();
        let b: StoreNotification = serde_json::from_str(
            r#"{"patient_name":"DOE^JOHN","patient_id":"SUS-AAAA-1","study_instance_uid":"1.2","modality":"CT"}"#,
        )
        .unwrap();
        assert_eq!(a, b);

        let partial: StoreNotification = serde_json::from_str(r#"{"PatientID":"X-1"}"#).unwrap();
        assert!(partial.patient_name.is_none());
    }

    #[test]
    fn test_received_for_filters_by_prefix() {
        let log = ReceivedImageLog::new();
        log.append(record("A", "SUS-AAAA-1", "1.1", "CT"));
        log.append(record("B", "SUS-BBBB-1", "1.2", "CT"));
        log.append(record("C", "SUS-AAAAB-1", "1.3", "CT"));

        let visible = log.received_for(&GroupCode::normalize("SUS-AAAA"));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].patient_id, "SUS-AAAA-1");
        assert_eq!(log.received_for(&GroupCode::empty()).len(), 3);
    }

    #[test]
    fn test_seed_demo_only_when_empty() {
        let log = ReceivedImageLog::new();
        assert!(log.seed_demo());
        assert!(!log.seed_demo());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_group_by_study_merges_modalities() {
        let records = vec![
            record("DOE^JOHN", "SUS-AAAA-1", "1.2.3", "CT"),
            record("DOE^JOHN", "SUS-AAAA-1", "1.2.3", "CT"),
            record("DOE^JOHN", "SUS-AAAA-1", "1.2.3", "MR"),
        ];
        let summaries = group_by_study(&records);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].count, 3);
        assert_eq!(summaries[0].modalities, "CT,MR");
    }

    #[test]
    fn test_group_by_study_latest_timestamp_and_order() {
        let now = Utc::now();
        let mut early = record("ZED^A", "SUS-AAAA-1", "1.9", "CT");
        early.received_at = now;
        let mut late = record("ZED^A", "SUS-AAAA-1", "1.9", "CT");
        late.received_at = now + Duration::seconds(30);

        let records = vec![
            late.clone(),
            early,
            record("ALPHA^B", "SUS-AAAA-2", "1.5", "MR"),
            record("ALPHA^B", "SUS-AAAA-2", "1.4", "US"),
        ];
        let summaries = group_by_study(&records);
        let order: Vec<&str> = summaries.iter().map(|s| s.study_instance_uid.as_str()).collect();
        assert_eq!(order, vec!["1.4", "1.5", "1.9"]);
        assert_eq!(summaries[2].last_received_at, late.received_at);
    }

    #[test]
    fn test_concurrent_appends_are_complete() {
        let log = Arc::new(ReceivedImageLog::new());
        let writers = 16;
        let per_writer = 50;

        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..per_writer {
                        log.record_notification(StoreNotification {
                            patient_name: Some(format!("PATIENT^{}", w)),
                            patient_id: Some(format!("SUS-W{}-{}", w, i)),
                            study_instance_uid: Some(format!("1.2.{}.{}", w, i)),
                            modality: Some("CT".to_string()),
                        });
                    }
                })
            })
            .collect();

        // 并发读取：任何时刻看到的记录都必须是完整的
        let reader = {
            let log = log.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    for r in log.snapshot() {
                        assert!(r.patient_name.starts_with("PATIENT^"));
                        assert!(r.patient_id.starts_with("SUS-W"));
                        assert_eq!(r.modality, "CT");
                    }
                }
            })
        };

        for handle in handles {
            handle.join().unwrap();
        }
        reader.join().unwrap();

        let records = log.snapshot();
        assert_eq!(records.len(), writers * per_writer);
        let unique: std::collections::HashSet<_> = records.iter().map(|r| &r.patient_id).collect();
        assert_eq!(unique.len(), writers * per_writer);
    }
}
