//! 租户可见性规则
//!
//! 临床记录（本地存储、归档查询结果、接收缓存）对某个小组可见，当且仅当
//! 小组代码非空且记录的患者ID以 `{code}-` 开头。这是小组之间唯一的隔离边界，
//! 每条跨租户的读取路径都必须调用，不能假设上游已经过滤。

use crate::code::GroupCode;
use crate::models::{Patient, ReceivedImageRecord, Report, StudySummary};

/// 带有患者ID、可以做可见性判断的记录
pub trait PatientScoped {
    fn patient_id(&self) -> Option<&str>;
}

/// 记录对小组是否可见
pub fn is_visible<R: PatientScoped + ?Sized>(record: &R, tenant: &GroupCode) -> bool {
    if tenant.is_empty() {
        return false;
    }
    record
        .patient_id()
        .map_or(false, |pid| tenant.owns_identifier(pid))
}

/// 只保留对小组可见的记录
pub fn filter_visible<R, I>(records: I, tenant: &GroupCode) -> Vec<R>
where
    R: PatientScoped,
    I: IntoIterator<Item = R>,
{
    records
        .into_iter()
        .filter(|record| is_visible(record, tenant))
        .collect()
}

impl PatientScoped for str {
    fn patient_id(&self) -> Option<&str> {
        Some(self)
    }
}

impl PatientScoped for Patient {
    fn patient_id(&self) -> Option<&str> {
        Some(&self.pid)
    }
}

impl PatientScoped for Report {
    fn patient_id(&self) -> Option<&str> {
        Some(&self.patient_id)
    }
}

impl PatientScoped for ReceivedImageRecord {
    fn patient_id(&self) -> Option<&str> {
        Some(&self.patient_id)
    }
}

impl PatientScoped for StudySummary {
    fn patient_id(&self) -> Option<&str> {
        Some(&self.patient_id)
    }
}

impl<T: PatientScoped + ?Sized> PatientScoped for &T {
    fn patient_id(&self) -> Option<&str> {
        (**self).patient_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(pid: &str) -> ReceivedImageRecord {
        ReceivedImageRecord {
            patient_name: "DOE^JANE".to_string(),
            patient_id: pid.to_string(),
            study_instance_uid: "1.2.3".to_string(),
            modality: "CT".to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_visible_iff_prefixed() {
        let a = GroupCode::normalize("SUS-AAAA");
        let b = GroupCode::normalize("SUS-BBBB");

        assert!(is_visible("SUS-AAAA-PID1", &a));
        assert!(!is_visible("SUS-AAAA-PID1", &b));
        assert!(!is_visible("SUS-AAAAPID1", &a));
        assert!(!is_visible("XSUS-AAAA-PID1", &a));
    }

    #[test]
    fn test_empty_tenant_sees_nothing() {
        let empty = GroupCode::empty();
        assert!(!is_visible("-PID1", &empty));
        assert!(!is_visible(&record("SUS-AAAA-1"), &empty));
    }

    #[test]
    fn test_tenant_never_sees_foreign_records() {
        let tenants = ["SUS-AAAA", "SUS-AAA", "SUS-AAAAA", "DEMO"];
        let pids = [
            "SUS-AAAA-1",
            "SUS-AAA-1",
            "SUS-AAAAA-1",
            "DEMO-0001",
            "UNKNOWN",
            "",
        ];
        for t in tenants {
            let code = GroupCode::normalize(t);
            for pid in pids {
                let expected = pid.starts_with(&format!("{}-", t));
                assert_eq!(is_visible(pid, &code), expected, "tenant {} pid {}", t, pid);
            }
        }
    }

    #[test]
    fn test_filter_visible() {
        let code = GroupCode::normalize("SUS-AAAA");
        let records = vec![record("SUS-AAAA-1"), record("SUS-BBBB-1"), record("SUS-AAAA-2")];
        let visible = filter_visible(records.iter(), &code);
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|r| r.patient_id.starts_with("SUS-AAAA-")));
    }
}
