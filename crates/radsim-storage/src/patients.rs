//! 患者存储
//!
//! 患者按插入顺序保留最近50条；重新登记同一个患者ID只会原地更新，不会改变
//! 它在淘汰顺序中的位置。

use chrono::{DateTime, Utc};
use radsim_core::{GroupCode, Patient, RadSimError, Result};
use tracing::info;

use crate::store::TenantKeyValueStore;

impl TenantKeyValueStore<Patient> {
    /// 按患者ID查找
    pub fn find_patient(&self, tenant: &GroupCode, pid: &str) -> Option<Patient> {
        let pid = pid.trim();
        if pid.is_empty() {
            return None;
        }
        self.load(tenant).into_iter().find(|p| p.pid == pid)
    }

    pub fn patient_exists(&self, tenant: &GroupCode, pid: &str) -> bool {
        self.find_patient(tenant, pid).is_some()
    }

    /// 登记或更新患者
    ///
    /// 患者ID必须属于该小组（以 `{code}-` 开头）。
    pub fn upsert_patient(
        &self,
        tenant: &GroupCode,
        pid: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Patient> {
        let pid = pid.trim();
        let name = name.trim();
        if pid.is_empty() || name.is_empty() {
            return Err(RadSimError::Validation("患者姓名和患者ID不能为空".to_string()));
        }
        if !tenant.owns_identifier(pid) {
            return Err(RadSimError::Validation(format!(
                "患者ID {} 不属于小组 {}",
                pid, tenant
            )));
        }

        let patient = self.update(tenant, |patients| {
            if let Some(existing) = patients.iter_mut().find(|p| p.pid == pid) {
                existing.name = name.to_string();
                existing.updated_at = now;
                return Some(existing.clone());
            }
            let patient = Patient::new(pid, name, now);
            patients.push(patient.clone());
            Some(patient)
        })?;

        let patient = patient.ok_or_else(|| RadSimError::Internal("患者更新未生效".to_string()))?;
        info!(tenant = %tenant, pid = %patient.pid, "upserted patient");
        Ok(patient)
    }

    /// 在锁内修改单个患者；患者不存在时返回 `None` 且不写文件
    pub fn update_patient<F>(&self, tenant: &GroupCode, pid: &str, mutate: F) -> Result<Option<Patient>>
    where
        F: FnOnce(&mut Patient),
    {
        let pid = pid.trim();
        if pid.is_empty() {
            return Ok(None);
        }
        self.update(tenant, |patients| {
            let patient = patients.iter_mut().find(|p| p.pid == pid)?;
            mutate(patient);
            Some(patient.clone())
        })
    }
}
