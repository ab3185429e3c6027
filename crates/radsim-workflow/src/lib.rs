//! # RadSim工作流模块
//!
//! 放射科流程的各个环节：
//! - 检查状态机：已申请 → 已开始 → 已完成 → 已报告
//! - 检查工作列表：RIS下达申请后生成，检查设备按小组查询
//! - 化验模拟：LIS返回确定性的肌酐值
//! - 工作流编排：把存储、归档和HL7消息串成完整流程

pub mod engine;
pub mod lab;
pub mod state_machine;
pub mod worklist;

pub use engine::{
    Dashboard, OrderConfirmation, OrderRequest, Registration, ScanRequest, ScanSummary,
    WorkflowOrchestrator,
};
pub use lab::{LabFlag, LabResult};
pub use state_machine::{ExamLifecycle, ExamUpdate};
pub use worklist::{derive_study_uid, WorklistEntry, WorklistStore};
