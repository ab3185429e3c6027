//! 报告存储

use radsim_core::{GroupCode, Report, ReportIndexEntry};
use std::collections::HashMap;

use crate::store::TenantKeyValueStore;

impl TenantKeyValueStore<Report> {
    /// 按患者ID汇总报告数量和最近一次报告时间
    pub fn index_by_pid(&self, tenant: &GroupCode) -> HashMap<String, ReportIndexEntry> {
        let mut index: HashMap<String, ReportIndexEntry> = HashMap::new();
        for report in self.load(tenant) {
            let pid = report.patient_id.trim();
            if pid.is_empty() {
                continue;
            }
            let entry = index.entry(pid.to_string()).or_insert(ReportIndexEntry {
                count: 0,
                last_at: None,
            });
            entry.count += 1;
            if entry.last_at.map_or(true, |last| report.created_at > last) {
                entry.last_at = Some(report.created_at);
            }
        }
        index
    }
}
