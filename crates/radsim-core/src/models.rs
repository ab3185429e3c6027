//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 缺失字段的占位值
pub const UNKNOWN: &str = "UNKNOWN";

/// 缺失设备类型时使用的 DICOM 缺省值（Other）
pub const UNKNOWN_MODALITY: &str = "OT";

/// 患者（属于唯一一个小组）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub pid: String,  // 带小组前缀的患者ID `{code}-{localId}`
    pub name: String, // 显示名称
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exam: Option<ExamState>,
}

impl Patient {
    pub fn new(pid: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            pid: pid.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
            last_exam: None,
        }
    }
}

/// 检查状态（有序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamStatus {
    Ordered,   // 已下达申请
    Started,   // 检查开始
    Completed, // 检查完成
    Reported,  // 已出报告
}

impl ExamStatus {
    /// 界面显示文本
    pub fn label(&self) -> &'static str {
        match self {
            ExamStatus::Ordered => "Order released",
            ExamStatus::Started => "Exam started",
            ExamStatus::Completed => "Exam completed",
            ExamStatus::Reported => "Reported",
        }
    }
}

/// 患者最近一次检查的状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accession_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: ExamStatus,
    #[serde(default)]
    pub ordered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reported_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ExamState {
    pub fn new(status: ExamStatus, now: DateTime<Utc>) -> Self {
        Self {
            accession_number: None,
            description: None,
            status,
            ordered_at: None,
            started_at: None,
            completed_at: None,
            reported_at: None,
            updated_at: now,
        }
    }

    /// 某一阶段的时间戳
    pub fn stage_timestamp(&self, status: ExamStatus) -> Option<DateTime<Utc>> {
        match status {
            ExamStatus::Ordered => self.ordered_at,
            ExamStatus::Started => self.started_at,
            ExamStatus::Completed => self.completed_at,
            ExamStatus::Reported => self.reported_at,
        }
    }
}

/// 放射学报告（工作站生成，HL7 ORU^R01）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub created_at: DateTime<Utc>,
    pub study_instance_uid: String,
    pub patient_id: String,
    pub patient_name: String,
    pub text: String,
    pub hl7: String,
}

/// 每个患者的报告统计，用于RIS状态展示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportIndexEntry {
    pub count: usize,
    pub last_at: Option<DateTime<Utc>>,
}

/// 工作站接收到的影像记录（进程级共享，不按小组存储）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedImageRecord {
    pub patient_name: String,
    pub patient_id: String,
    pub study_instance_uid: String,
    pub modality: String,
    pub received_at: DateTime<Utc>,
}

/// 按检查聚合的接收记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySummary {
    pub study_instance_uid: String,
    pub patient_name: String,
    pub patient_id: String,
    pub modalities: String, // 排序后逗号连接，如 "CT,MR"
    pub count: usize,
    pub last_received_at: DateTime<Utc>,
}
