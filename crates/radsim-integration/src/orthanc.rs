//! Orthanc 影像归档客户端
//!
//! 通过Orthanc的REST接口实现 [`ArchiveClient`]：
//! - `GET /system` 连通性检查
//! - `POST /tools/find` 按患者ID通配模式查找检查
//! - `POST /tools/lookup` + `POST /modalities/{self}/store` 把检查发送给本工作站
//! - `POST /instances` 上传DICOM实例

use async_trait::async_trait;
use radsim_core::{RadSimError, Result};
use radsim_dicom::{ArchiveClient, ArchiveStudy, StoredInstance};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 归档连接配置
#[derive(Debug, Clone)]
pub struct OrthancConfig {
    pub base_url: String,          // 如 http://localhost:8042
    pub target_modality: String,   // 归档中登记的本工作站名称（C-MOVE目标）
    pub timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for OrthancConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8042".to_string(),
            target_modality: "SIMULATOR".to_string(),
            timeout: Duration::from_secs(15),
            username: None,
            password: None,
        }
    }
}

/// `/tools/lookup` 的一条结果
#[derive(Debug, Clone, Deserialize)]
struct LookupResult {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Type", default)]
    resource_type: String,
}

/// Orthanc REST 客户端
#[derive(Debug, Clone)]
pub struct OrthancArchive {
    client: Client,
    config: OrthancConfig,
}

impl OrthancArchive {
    pub fn new(config: OrthancConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(archive_error)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OrthancConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.config.username {
            Some(username) => builder.basic_auth(username, self.config.password.as_deref()),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder
            .send()
            .await
            .map_err(archive_error)?
            .error_for_status()
            .map_err(archive_error)?;
        response.json::<T>().await.map_err(archive_error)
    }
}

fn archive_error(e: reqwest::Error) -> RadSimError {
    RadSimError::Archive(e.to_string())
}

/// 从 lookup 结果中挑出检查级资源
fn study_resource(results: Vec<LookupResult>) -> Option<String> {
    results
        .into_iter()
        .find(|r| r.resource_type.eq_ignore_ascii_case("study"))
        .map(|r| r.id)
}

#[async_trait]
impl ArchiveClient for OrthancArchive {
    async fn echo(&self) -> Result<()> {
        let system: serde_json::Value = self.send_json(self.request(Method::GET, "/system")).await?;
        debug!(
            version = system.get("Version").and_then(|v| v.as_str()).unwrap_or("?"),
            "archive reachable"
        );
        Ok(())
    }

    async fn find_studies(&self, patient_id_pattern: &str) -> Result<Vec<ArchiveStudy>> {
        if patient_id_pattern.trim().is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "Level": "Study",
            "Query": { "PatientID": patient_id_pattern },
            "Expand": true,
        });
        let studies: Vec<ArchiveStudy> = self
            .send_json(self.request(Method::POST, "/tools/find").json(&body))
            .await?;
        debug!(pattern = %patient_id_pattern, count = studies.len(), "archive study query");
        Ok(studies)
    }

    async fn request_transfer(&self, study_instance_uid: &str) -> Result<()> {
        let results: Vec<LookupResult> = self
            .send_json(
                self.request(Method::POST, "/tools/lookup")
                    .body(study_instance_uid.to_string()),
            )
            .await?;
        let Some(resource) = study_resource(results) else {
            warn!(study = %study_instance_uid, "study not found in archive");
            return Err(RadSimError::NotFound(format!("检查 {}", study_instance_uid)));
        };

        let path = format!("/modalities/{}/store", self.config.target_modality);
        let body = json!({ "Resources": [resource], "Synchronous": false });
        let _job: serde_json::Value = self
            .send_json(self.request(Method::POST, &path).json(&body))
            .await?;
        info!(
            study = %study_instance_uid,
            target = %self.config.target_modality,
            "requested study transfer"
        );
        Ok(())
    }

    async fn store_instance(&self, data: Vec<u8>) -> Result<StoredInstance> {
        let size = data.len();
        let stored: StoredInstance = self
            .send_json(
                self.request(Method::POST, "/instances")
                    .header(reqwest::header::CONTENT_TYPE, "application/dicom")
                    .body(data),
            )
            .await?;
        debug!(id = %stored.id, status = %stored.status, size, "stored instance");
        Ok(stored)
    }
}
