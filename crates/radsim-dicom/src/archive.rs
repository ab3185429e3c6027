//! 影像归档（PACS）协作方接口
//!
//! 工作站通过该接口在归档中查找检查、请求把检查传回本机、上传新实例。
//! 查询结果的字段可能缺失，统一建模为可选字段。

use async_trait::async_trait;
use radsim_core::{PatientScoped, Result, UNKNOWN};
use serde::{Deserialize, Serialize};

/// 检查级主要标签
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveStudyTags {
    #[serde(rename = "StudyInstanceUID", default)]
    pub study_instance_uid: Option<String>,
    #[serde(default)]
    pub study_date: Option<String>,
    #[serde(default)]
    pub study_description: Option<String>,
    #[serde(default)]
    pub accession_number: Option<String>,
    #[serde(default)]
    pub modalities_in_study: Option<String>,
    #[serde(rename = "PatientID", default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
}

/// 患者级主要标签
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchivePatientTags {
    #[serde(rename = "PatientID", default)]
    pub patient_id: Option<String>,
    #[serde(rename = "PatientName", default)]
    pub patient_name: Option<String>,
}

/// 归档中的一个检查
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveStudy {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "MainDicomTags", default)]
    pub main_tags: ArchiveStudyTags,
    #[serde(rename = "PatientMainDicomTags", default)]
    pub patient_tags: ArchivePatientTags,
}

impl ArchiveStudy {
    pub fn study_instance_uid(&self) -> &str {
        self.main_tags
            .study_instance_uid
            .as_deref()
            .filter(|uid| !uid.is_empty())
            .unwrap_or(UNKNOWN)
    }

    pub fn patient_name(&self) -> &str {
        self.patient_tags
            .patient_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN)
    }
}

impl PatientScoped for ArchiveStudy {
    /// 优先取患者级标签，缺失时回退到检查级标签
    fn patient_id(&self) -> Option<&str> {
        self.patient_tags
            .patient_id
            .as_deref()
            .or(self.main_tags.patient_id.as_deref())
    }
}

/// 上传到归档后的实例
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredInstance {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "ParentStudy", default, skip_serializing_if = "Option::is_none")]
    pub parent_study: Option<String>,
}

/// 影像归档客户端
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// 连通性检查（C-ECHO）
    async fn echo(&self) -> Result<()>;

    /// 按患者ID通配模式（如 `SUS-AB12-*`）查找检查（C-FIND）
    async fn find_studies(&self, patient_id_pattern: &str) -> Result<Vec<ArchiveStudy>>;

    /// 请求归档把检查的全部实例发送给本工作站（C-MOVE）
    async fn request_transfer(&self, study_instance_uid: &str) -> Result<()>;

    /// 上传一个DICOM实例（C-STORE）
    async fn store_instance(&self, data: Vec<u8>) -> Result<StoredInstance>;
}
