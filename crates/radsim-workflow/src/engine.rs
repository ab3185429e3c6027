//! 工作流编排
//!
//! 把各子系统串成完整的放射科流程：
//! KIS登记 → LIS化验 → RIS申请 → 设备工作列表 → 扫描上传 → 工作站查询/调阅 → 报告。
//!
//! 存储操作是同步的文件读写，统一放到阻塞线程池执行；归档调用是异步的。
//! 每个操作都以已解析的小组代码为参数，读取路径一律经过可见性过滤。

use chrono::Utc;
use radsim_core::utils::is_valid_dicom_uid;
use radsim_core::{
    filter_visible, is_visible, ExamStatus, GroupCode, Patient, RadSimError, ReceivedImageRecord,
    Report, ReportIndexEntry, Result, StudySummary,
};
use radsim_dicom::{
    group_by_study, inspect_instance, retag_instance, synthetic_ct_instance, ArchiveClient, ArchiveStudy,
    InstanceIdentity, ReceivedImageLog,
};
use radsim_integration::hl7::{self, Observation};
use radsim_storage::{PatientStore, ReportStore, StorageManager, TenantRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::lab::{self, LabFlag, LabResult};
use crate::state_machine::{ExamLifecycle, ExamUpdate};
use crate::worklist::{derive_study_uid, WorklistEntry, WorklistStore};

/// 每个小组记住的已调阅检查数
pub const MOVED_STUDIES_LIMIT: usize = 50;

/// 扫描结果中保留的错误信息条数
pub const SCAN_ERROR_DETAILS: usize = 3;

/// 患者登记结果
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub patient: Patient,
    pub hl7: String, // ADT^A04
}

/// 检查申请
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderRequest {
    pub name: String,
    pub pid: String,
    pub accession_number: String,
    #[serde(default)]
    pub description: String,
}

/// 检查申请结果
#[derive(Debug, Clone, Serialize)]
pub struct OrderConfirmation {
    pub patient: Patient,
    pub entry: WorklistEntry,
    pub hl7: String, // ORM^O01
}

/// 扫描请求：设备把一组DICOM实例发送到归档
///
/// 没有实例时生成一张空白CT图像代替（模拟扫描）。
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub name: String,
    pub pid: String,
    pub accession_number: String,
    pub instances: Vec<Vec<u8>>,
    /// 上传前把患者和检查标识改写为本次申请的值
    pub retag: bool,
}

/// 扫描结果统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanSummary {
    pub pid: String,
    pub accession_number: String,
    pub sent: usize,    // 发往归档的实例数
    pub ok: usize,      // 归档确认的实例数
    pub failed: usize,  // 归档拒绝或不可达
    pub skipped: usize, // 不是可发送的DICOM实例，或属于其他小组
    pub synthetic: bool, // 模拟扫描（未上传文件）
    pub errors: Vec<String>,
    pub more_errors: usize,
    pub status: Option<ExamStatus>,
}

impl ScanSummary {
    fn record_error(&mut self, message: String) {
        if self.errors.len() < SCAN_ERROR_DETAILS {
            self.errors.push(message);
        } else {
            self.more_errors += 1;
        }
    }
}

/// RIS总览
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub group_code: GroupCode,
    pub patients: Vec<Patient>,
    pub reports: Vec<Report>,
    pub reports_by_pid: HashMap<String, ReportIndexEntry>,
    pub received_studies: Vec<StudySummary>,
}

/// 各小组已请求调阅的检查（最近的在后）
#[derive(Debug, Default)]
struct MovedStudies {
    by_tenant: Mutex<HashMap<GroupCode, VecDeque<String>>>,
}

impl MovedStudies {
    fn mark(&self, tenant: &GroupCode, study_instance_uid: &str) {
        let mut by_tenant = self.by_tenant.lock().unwrap_or_else(PoisonError::into_inner);
        let moved = by_tenant.entry(tenant.clone()).or_default();
        moved.retain(|uid| uid != study_instance_uid);
        moved.push_back(study_instance_uid.to_string());
        while moved.len() > MOVED_STUDIES_LIMIT {
            moved.pop_front();
        }
    }

    fn list(&self, tenant: &GroupCode) -> Vec<String> {
        self.by_tenant
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant)
            .map(|moved| moved.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// 工作流编排器
///
/// 进程内只创建一个，由Web层共享。
pub struct WorkflowOrchestrator {
    patients: Arc<PatientStore>,
    reports: Arc<ReportStore>,
    registry: Arc<TenantRegistry>,
    worklist: Arc<WorklistStore>,
    received: Arc<ReceivedImageLog>,
    archive: Arc<dyn ArchiveClient>,
    moved: MovedStudies,
}

impl WorkflowOrchestrator {
    pub fn new(
        data: StorageManager,
        worklist: WorklistStore,
        received: Arc<ReceivedImageLog>,
        archive: Arc<dyn ArchiveClient>,
    ) -> Self {
        Self {
            patients: Arc::new(PatientStore::new(data.clone())),
            reports: Arc::new(ReportStore::new(data.clone())),
            registry: Arc::new(TenantRegistry::new(data)),
            worklist: Arc::new(worklist),
            received,
            archive,
            moved: MovedStudies::default(),
        }
    }

    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    pub fn received_log(&self) -> &Arc<ReceivedImageLog> {
        &self.received
    }

    // ---- 小组代码 ----

    /// 把用户输入解析为可用的小组代码
    pub async fn resolve_tenant(&self, raw: &str) -> Result<GroupCode> {
        let code = GroupCode::normalize(raw);
        if code.is_empty() {
            return Err(RadSimError::Validation("小组代码不能为空".to_string()));
        }
        let registry = self.registry.clone();
        let candidate = code.clone();
        if !blocking(move || Ok(registry.is_allowed(&candidate))).await? {
            warn!(code = %code, "rejected unknown group code");
            return Err(RadSimError::Validation(format!("未知的小组代码: {}", code)));
        }
        Ok(code)
    }

    /// 当前注册的全部代码
    pub async fn list_codes(&self) -> Result<Vec<GroupCode>> {
        let registry = self.registry.clone();
        blocking(move || Ok(registry.load())).await
    }

    /// 重新生成并整体替换注册表
    pub async fn regenerate_codes(&self, count: usize) -> Result<Vec<GroupCode>> {
        let registry = self.registry.clone();
        let codes = blocking(move || registry.save(&TenantRegistry::generate(count))).await?;
        info!(count = codes.len(), "regenerated group codes");
        Ok(codes)
    }

    // ---- KIS ----

    /// 登记患者并生成 ADT^A04
    pub async fn register_patient(&self, tenant: &GroupCode, name: &str, local_pid: &str) -> Result<Registration> {
        require_tenant(tenant)?;
        let name = name.trim().to_string();
        let pid = tenant.prefix_identifier(local_pid);
        if name.is_empty() || pid.is_empty() {
            return Err(RadSimError::Validation("患者姓名和患者ID不能为空".to_string()));
        }

        let now = Utc::now();
        let patients = self.patients.clone();
        let owner = tenant.clone();
        let patient = blocking(move || patients.upsert_patient(&owner, &pid, &name, now)).await?;

        let hl7 = hl7::build_adt_a04(&patient.pid, &patient.name, now);
        info!(tenant = %tenant, pid = %patient.pid, "KIS admission (ADT^A04)");
        Ok(Registration { patient, hl7 })
    }

    pub async fn patients(&self, tenant: &GroupCode) -> Result<Vec<Patient>> {
        let patients = self.patients.clone();
        let owner = tenant.clone();
        blocking(move || Ok(patients.load(&owner))).await
    }

    // ---- LIS ----

    /// 查询肌酐值
    pub async fn query_lab(&self, tenant: &GroupCode, pid: &str) -> Result<LabResult> {
        require_tenant(tenant)?;
        let pid = tenant.prefix_identifier(pid);
        self.require_patient(tenant, &pid).await?;

        let value = lab::simulate_creatinine(&pid);
        let status = LabFlag::classify(value);
        let now = Utc::now();
        let request_hl7 = hl7::build_qry_q02(&pid, now);
        let response_hl7 = hl7::build_oru_lab_result(
            &pid,
            &Observation {
                code: lab::CREATININE_CODE,
                name: lab::CREATININE_NAME,
                value,
                unit: lab::CREATININE_UNIT,
                reference_range: lab::CREATININE_REFERENCE_RANGE,
                flag: status.as_str(),
            },
            now,
        );

        info!(tenant = %tenant, pid = %pid, value, status = status.as_str(), "LIS creatinine query");
        Ok(LabResult {
            pid,
            value,
            unit: lab::CREATININE_UNIT.to_string(),
            reference_range: lab::CREATININE_REFERENCE_RANGE.to_string(),
            status,
            request_hl7,
            response_hl7,
        })
    }

    // ---- RIS ----

    /// 下达检查申请：写工作列表条目，检查状态回到“已申请”
    pub async fn place_order(&self, tenant: &GroupCode, order: OrderRequest) -> Result<OrderConfirmation> {
        require_tenant(tenant)?;
        let pid = tenant.prefix_identifier(&order.pid);
        let accession_number = tenant.prefix_identifier(&order.accession_number);
        if accession_number.is_empty() {
            return Err(RadSimError::Validation("检查号不能为空".to_string()));
        }
        let registered = self.require_patient(tenant, &pid).await?;
        let name = match order.name.trim() {
            "" => registered.name.clone(),
            name => name.to_string(),
        };

        let now = Utc::now();
        let entry = self
            .worklist
            .build_entry(&name, &pid, &accession_number, &order.description, now);
        let worklist = self.worklist.clone();
        let written = entry.clone();
        blocking(move || worklist.write_entry(&written)).await?;

        let update = ExamUpdate {
            accession_number: Some(accession_number.clone()),
            description: Some(order.description.clone()),
        };
        let patient = self
            .transition(tenant, &pid, ExamStatus::Ordered, update)
            .await?
            .unwrap_or(registered);

        let hl7 = hl7::build_orm_o01(&pid, &name, &accession_number, &order.description, now);
        info!(tenant = %tenant, pid = %pid, accession = %accession_number, "RIS order released");
        Ok(OrderConfirmation { patient, entry, hl7 })
    }

    /// 每个患者的报告统计
    pub async fn reports_index_by_pid(&self, tenant: &GroupCode) -> Result<HashMap<String, ReportIndexEntry>> {
        let reports = self.reports.clone();
        let owner = tenant.clone();
        blocking(move || Ok(reports.index_by_pid(&owner))).await
    }

    pub async fn reports(&self, tenant: &GroupCode) -> Result<Vec<Report>> {
        let reports = self.reports.clone();
        let owner = tenant.clone();
        blocking(move || Ok(reports.load(&owner))).await
    }

    /// RIS总览：患者、报告和已接收检查
    pub async fn dashboard(&self, tenant: &GroupCode) -> Result<Dashboard> {
        require_tenant(tenant)?;
        let patients = self.patients(tenant).await?;
        let reports = self.reports(tenant).await?;
        let reports_by_pid = self.reports_index_by_pid(tenant).await?;
        Ok(Dashboard {
            group_code: tenant.clone(),
            patients,
            reports,
            reports_by_pid,
            received_studies: self.received_studies(tenant),
        })
    }

    // ---- 检查设备 ----

    /// 本小组的工作列表
    pub async fn modality_worklist(&self, tenant: &GroupCode) -> Result<Vec<WorklistEntry>> {
        require_tenant(tenant)?;
        let worklist = self.worklist.clone();
        let owner = tenant.clone();
        blocking(move || Ok(worklist.visible_entries(&owner))).await
    }

    /// 扫描：把实例逐个上传到归档
    ///
    /// 先把检查置为“已开始”；至少有一个实例被归档接受时置为“已完成”。
    /// 检查UID按检查号推导，与工作列表条目一致。实例的 PatientID 必须属于本小组
    /// （`retag` 时会先改写为本次申请的患者），否则跳过，不会上传。
    pub async fn scan(&self, tenant: &GroupCode, request: ScanRequest) -> Result<ScanSummary> {
        require_tenant(tenant)?;
        let pid = tenant.prefix_identifier(&request.pid);
        if pid.is_empty() {
            return Err(RadSimError::Validation("患者ID不能为空".to_string()));
        }
        let accession_number = tenant.prefix_identifier(&request.accession_number);
        let update = ExamUpdate {
            accession_number: Some(accession_number.clone()),
            description: None,
        };

        let mut summary = ScanSummary {
            pid: pid.clone(),
            accession_number: accession_number.clone(),
            synthetic: request.instances.is_empty(),
            ..Default::default()
        };
        let mut patient_name = request.name.trim().to_string();
        if let Some(patient) = self
            .transition(tenant, &pid, ExamStatus::Started, update.clone())
            .await?
        {
            if patient_name.is_empty() {
                patient_name = patient.name.clone();
            }
            summary.status = patient.last_exam.map(|exam| exam.status);
        } else {
            warn!(tenant = %tenant, pid = %pid, "scan for unregistered patient");
        }

        let identity = InstanceIdentity {
            patient_name: if patient_name.is_empty() {
                radsim_core::UNKNOWN.to_string()
            } else {
                patient_name
            },
            patient_id: pid.clone(),
            study_instance_uid: derive_study_uid(&accession_number),
            accession_number: accession_number.clone(),
        };

        let (instances, retag) = if summary.synthetic {
            (vec![synthetic_ct_instance(&identity)?], false)
        } else {
            (request.instances, request.retag)
        };

        for (index, data) in instances.into_iter().enumerate() {
            let data = if retag {
                match retag_instance(&data, &identity) {
                    Ok(data) => data,
                    Err(e) => {
                        summary.skipped += 1;
                        summary.record_error(format!("#{}: {}", index + 1, e));
                        continue;
                    }
                }
            } else {
                data
            };

            let instance = match inspect_instance(&data) {
                Ok(instance) => instance,
                Err(e) => {
                    summary.skipped += 1;
                    summary.record_error(format!("#{}: {}", index + 1, e));
                    continue;
                }
            };

            let owner = instance.notification.patient_id.as_deref().unwrap_or_default();
            if !tenant.owns_identifier(owner) {
                warn!(
                    tenant = %tenant,
                    sop_instance = %instance.sop_instance_uid,
                    patient_id = %owner,
                    "refusing to upload instance of another group"
                );
                summary.skipped += 1;
                summary.record_error(format!(
                    "#{}: PatientID {:?} 不属于小组 {}",
                    index + 1,
                    owner,
                    tenant
                ));
                continue;
            }

            summary.sent += 1;
            match self.archive.store_instance(data).await {
                Ok(stored) => {
                    summary.ok += 1;
                    info!(sop_instance = %instance.sop_instance_uid, archive_id = %stored.id, "stored instance");
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(sop_instance = %instance.sop_instance_uid, error = %e, "failed to store instance");
                    summary.record_error(format!("{}: {}", instance.sop_instance_uid, e));
                }
            }
        }

        if summary.ok > 0 {
            if let Some(patient) = self
                .transition(tenant, &pid, ExamStatus::Completed, update)
                .await?
            {
                summary.status = patient.last_exam.map(|exam| exam.status);
            }
        }

        info!(
            tenant = %tenant,
            pid = %pid,
            sent = summary.sent,
            ok = summary.ok,
            failed = summary.failed,
            skipped = summary.skipped,
            synthetic = summary.synthetic,
            "modality scan"
        );
        Ok(summary)
    }

    // ---- 工作站 ----

    /// 在归档中查找本小组的检查
    pub async fn find_studies(&self, tenant: &GroupCode) -> Result<Vec<ArchiveStudy>> {
        require_tenant(tenant)?;
        let studies = self.archive.find_studies(&tenant.wildcard_pattern()).await?;
        let total = studies.len();
        let visible = filter_visible(studies, tenant);
        if visible.len() < total {
            warn!(tenant = %tenant, dropped = total - visible.len(), "archive returned foreign studies");
        }
        Ok(visible)
    }

    /// 请求归档把检查发送到本工作站
    pub async fn retrieve(&self, tenant: &GroupCode, study_instance_uid: &str) -> Result<()> {
        require_tenant(tenant)?;
        let uid = study_instance_uid.trim();
        if !is_valid_dicom_uid(uid) {
            return Err(RadSimError::Validation(format!("无效的检查实例UID: {:?}", uid)));
        }

        let studies = self.find_studies(tenant).await?;
        if !studies.iter().any(|s| s.study_instance_uid() == uid) {
            return Err(RadSimError::NotFound(format!("检查 {}", uid)));
        }

        self.archive.request_transfer(uid).await?;
        self.moved.mark(tenant, uid);
        info!(tenant = %tenant, study = %uid, "requested study retrieve");
        Ok(())
    }

    /// 本小组已请求调阅的检查UID
    pub fn moved_studies(&self, tenant: &GroupCode) -> Vec<String> {
        self.moved.list(tenant)
    }

    /// 本小组已接收的影像记录
    pub fn received(&self, tenant: &GroupCode) -> Vec<ReceivedImageRecord> {
        self.received.received_for(tenant)
    }

    /// 按检查聚合的已接收影像
    pub fn received_studies(&self, tenant: &GroupCode) -> Vec<StudySummary> {
        group_by_study(&self.received(tenant))
    }

    /// 为已接收的检查撰写报告（ORU^R01），检查状态置为“已报告”
    pub async fn create_report(&self, tenant: &GroupCode, study_instance_uid: &str, text: &str) -> Result<Report> {
        require_tenant(tenant)?;
        let uid = study_instance_uid.trim();
        if uid.is_empty() {
            return Err(RadSimError::Validation("检查实例UID不能为空".to_string()));
        }

        let record = self
            .received
            .snapshot()
            .into_iter()
            .find(|r| r.study_instance_uid == uid && is_visible(r, tenant))
            .ok_or_else(|| RadSimError::NotFound(format!("已接收的检查 {}", uid)))?;

        let now = Utc::now();
        let report = Report {
            created_at: now,
            study_instance_uid: uid.to_string(),
            patient_id: record.patient_id.clone(),
            patient_name: record.patient_name.clone(),
            text: text.trim().to_string(),
            hl7: hl7::build_oru_report(&record.patient_id, &record.patient_name, uid, text, now),
        };

        let reports = self.reports.clone();
        let owner = tenant.clone();
        let stored = report.clone();
        blocking(move || reports.append(&owner, stored)).await?;

        if self
            .transition(tenant, &record.patient_id, ExamStatus::Reported, ExamUpdate::default())
            .await?
            .is_none()
        {
            warn!(tenant = %tenant, pid = %record.patient_id, "report for patient not registered in RIS");
        }

        info!(tenant = %tenant, study = %uid, pid = %record.patient_id, "report created (ORU^R01)");
        Ok(report)
    }

    // ---- 其他 ----

    /// 归档连通性检查（C-ECHO）
    pub async fn echo(&self) -> Result<()> {
        self.archive.echo().await
    }

    async fn require_patient(&self, tenant: &GroupCode, pid: &str) -> Result<Patient> {
        let patients = self.patients.clone();
        let owner = tenant.clone();
        let lookup = pid.to_string();
        blocking(move || Ok(patients.find_patient(&owner, &lookup)))
            .await?
            .ok_or_else(|| RadSimError::Validation(format!("未知的患者ID: {}，请先在KIS登记", pid)))
    }

    async fn transition(
        &self,
        tenant: &GroupCode,
        pid: &str,
        status: ExamStatus,
        update: ExamUpdate,
    ) -> Result<Option<Patient>> {
        let patients = self.patients.clone();
        let owner = tenant.clone();
        let pid = pid.to_string();
        blocking(move || {
            patients.update_patient(&owner, &pid, |patient| {
                ExamLifecycle::transition(patient, status, update, Utc::now())
            })
        })
        .await
    }
}

fn require_tenant(tenant: &GroupCode) -> Result<()> {
    if tenant.is_empty() {
        return Err(RadSimError::Unauthorized("需要小组代码".to_string()));
    }
    Ok(())
}

/// 在阻塞线程池中执行同步的存储操作
async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| RadSimError::Internal(format!("存储任务失败: {}", e)))?
}
