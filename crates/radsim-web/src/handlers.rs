//! HTTP处理器

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use base64::{engine::general_purpose, Engine as _};
use radsim_core::RadSimError;
use radsim_workflow::{OrderRequest, ScanRequest};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::{clear_session_cookie, session_cookie, Tenant};
use crate::error::ApiResult;
use crate::state::AppState;

/// 健康检查
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let listener_running = state.listener.as_ref().map_or(false, |l| l.is_running());
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "listener_running": listener_running,
        "received_images": state.orchestrator.received_log().len(),
    }))
}

// ---- 会话 ----

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub code: String,
}

/// 通过链接加入小组
pub async fn join(State(state): State<AppState>, Path(code): Path<String>) -> ApiResult<impl IntoResponse> {
    open_session(&state, &code).await
}

/// 通过表单加入小组
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> ApiResult<impl IntoResponse> {
    open_session(&state, &request.code).await
}

async fn open_session(state: &AppState, raw: &str) -> ApiResult<impl IntoResponse> {
    let code = state.orchestrator.resolve_tenant(raw).await?;
    info!(code = %code, "group session opened");
    Ok(([session_cookie(&code)], Json(json!({ "group_code": code }))))
}

/// 退出小组
pub async fn delete_session() -> impl IntoResponse {
    ([clear_session_cookie()], Json(json!({ "ok": true })))
}

/// RIS总览
pub async fn dashboard(State(state): State<AppState>, Tenant(tenant): Tenant) -> ApiResult<impl IntoResponse> {
    let dashboard = state.orchestrator.dashboard(&tenant).await?;
    Ok(Json(dashboard))
}

// ---- KIS / LIS / RIS ----

#[derive(Debug, Deserialize)]
pub struct PatientForm {
    pub name: String,
    pub pid: String,
}

pub async fn register_patient(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(form): Json<PatientForm>,
) -> ApiResult<impl IntoResponse> {
    let registration = state
        .orchestrator
        .register_patient(&tenant, &form.name, &form.pid)
        .await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

#[derive(Debug, Deserialize)]
pub struct LabQuery {
    pub pid: String,
}

pub async fn query_lab(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(query): Json<LabQuery>,
) -> ApiResult<impl IntoResponse> {
    let result = state.orchestrator.query_lab(&tenant, &query.pid).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct OrderForm {
    #[serde(default)]
    pub name: String,
    pub pid: String,
    #[serde(alias = "acc")]
    pub accession_number: String,
    #[serde(default, alias = "desc")]
    pub description: String,
}

pub async fn place_order(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(form): Json<OrderForm>,
) -> ApiResult<impl IntoResponse> {
    let order = OrderRequest {
        name: form.name,
        pid: form.pid,
        accession_number: form.accession_number,
        description: form.description,
    };
    let confirmation = state.orchestrator.place_order(&tenant, order).await?;
    Ok((StatusCode::CREATED, Json(confirmation)))
}

// ---- 检查设备 ----

pub async fn modality_worklist(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
) -> ApiResult<impl IntoResponse> {
    let items = state.orchestrator.modality_worklist(&tenant).await?;
    Ok(Json(json!({ "count": items.len(), "items": items })))
}

#[derive(Debug, Deserialize)]
pub struct ScanForm {
    #[serde(default)]
    pub name: String,
    pub pid: String,
    #[serde(default, alias = "acc")]
    pub accession_number: String,
    /// base64 编码的 DICOM Part 10 文件
    #[serde(default)]
    pub instances: Vec<String>,
    /// 上传前改写为本次申请的患者和检查
    #[serde(default)]
    pub retag: bool,
}

pub async fn scan(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(form): Json<ScanForm>,
) -> ApiResult<impl IntoResponse> {
    let instances = form
        .instances
        .iter()
        .enumerate()
        .map(|(i, encoded)| {
            general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| RadSimError::Validation(format!("实例 #{} 不是有效的base64: {}", i + 1, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let summary = state
        .orchestrator
        .scan(
            &tenant,
            ScanRequest {
                name: form.name,
                pid: form.pid,
                accession_number: form.accession_number,
                instances,
                retag: form.retag,
            },
        )
        .await?;
    Ok(Json(summary))
}

// ---- 工作站 ----

pub async fn find_studies(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
) -> ApiResult<impl IntoResponse> {
    let studies = state.orchestrator.find_studies(&tenant).await?;
    let moved = state.orchestrator.moved_studies(&tenant);
    Ok(Json(json!({ "studies": studies, "moved": moved })))
}

#[derive(Debug, Deserialize)]
pub struct RetrieveForm {
    #[serde(alias = "StudyInstanceUID")]
    pub study_instance_uid: String,
}

pub async fn retrieve(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(form): Json<RetrieveForm>,
) -> ApiResult<impl IntoResponse> {
    state
        .orchestrator
        .retrieve(&tenant, &form.study_instance_uid)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "requested": form.study_instance_uid.trim() })),
    ))
}

pub async fn received(State(state): State<AppState>, Tenant(tenant): Tenant) -> impl IntoResponse {
    let records = state.orchestrator.received(&tenant);
    let studies = radsim_dicom::group_by_study(&records);
    Json(json!({ "records": records, "studies": studies }))
}

#[derive(Debug, Deserialize)]
pub struct ReportForm {
    #[serde(alias = "StudyInstanceUID")]
    pub study_instance_uid: String,
    #[serde(default)]
    pub text: String,
}

pub async fn create_report(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(form): Json<ReportForm>,
) -> ApiResult<impl IntoResponse> {
    let report = state
        .orchestrator
        .create_report(&tenant, &form.study_instance_uid, &form.text)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// 归档连通性检查（C-ECHO）
pub async fn echo(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.orchestrator.echo().await?;
    Ok(Json(json!({ "ok": true })))
}

// ---- 管理 ----

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let codes = state.orchestrator.list_codes().await?;
    Ok(Json(json!({ "count": codes.len(), "codes": codes })))
}

#[derive(Debug, Deserialize)]
pub struct GenerateForm {
    pub count: usize,
}

pub async fn generate_sessions(
    State(state): State<AppState>,
    Json(form): Json<GenerateForm>,
) -> ApiResult<impl IntoResponse> {
    let codes = state.orchestrator.regenerate_codes(form.count).await?;
    Ok(Json(json!({ "count": codes.len(), "codes": codes })))
}
