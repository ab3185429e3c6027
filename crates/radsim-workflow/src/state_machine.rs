//! 检查状态机
//!
//! 管理患者最近一次检查的生命周期。状态按 已申请 → 已开始 → 已完成 → 已报告
//! 推进，但没有终态：任何状态都可以重新回到“已申请”开始新的检查。

use chrono::{DateTime, Utc};
use radsim_core::{ExamState, ExamStatus, Patient};
use tracing::debug;

/// 状态转换时一并更新的检查字段；`None` 表示保留原值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExamUpdate {
    pub accession_number: Option<String>,
    pub description: Option<String>,
}

impl ExamUpdate {
    pub fn accession(accession_number: impl Into<String>) -> Self {
        Self {
            accession_number: Some(accession_number.into()),
            description: None,
        }
    }
}

/// 检查状态机
#[derive(Debug, Clone, Copy, Default)]
pub struct ExamLifecycle;

impl ExamLifecycle {
    /// 按检查顺序列出全部状态
    pub fn all_states() -> [ExamStatus; 4] {
        [
            ExamStatus::Ordered,
            ExamStatus::Started,
            ExamStatus::Completed,
            ExamStatus::Reported,
        ]
    }

    /// 执行状态转换
    ///
    /// - `Ordered`：开始新的检查，刷新申请时间并清空之后各阶段的时间
    /// - 其他状态：只在该阶段时间为空时记录，重复进入不会覆盖
    ///
    /// 检查和患者的 `updated_at` 都会更新为 `now`。
    pub fn transition(patient: &mut Patient, status: ExamStatus, update: ExamUpdate, now: DateTime<Utc>) {
        let exam = patient
            .last_exam
            .get_or_insert_with(|| ExamState::new(status, now));
        let previous = exam.status;

        exam.status = status;
        exam.updated_at = now;
        if let Some(accession_number) = non_empty(update.accession_number) {
            exam.accession_number = Some(accession_number);
        }
        if let Some(description) = non_empty(update.description) {
            exam.description = Some(description);
        }

        match status {
            ExamStatus::Ordered => {
                exam.ordered_at = Some(now);
                exam.started_at = None;
                exam.completed_at = None;
                exam.reported_at = None;
            }
            ExamStatus::Started => {
                exam.started_at.get_or_insert(now);
            }
            ExamStatus::Completed => {
                exam.completed_at.get_or_insert(now);
            }
            ExamStatus::Reported => {
                exam.reported_at.get_or_insert(now);
            }
        }

        patient.updated_at = now;
        debug!(pid = %patient.pid, from = ?previous, to = ?status, "exam status transition");
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
