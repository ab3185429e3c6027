//! # RadSim存储模块
//!
//! 负责按小组分区的JSON文档存储：小组代码注册表、患者和报告。
//! 所有文档都通过“写临时文件再重命名”的方式原子替换。

pub mod patients;
pub mod registry;
pub mod reports;
pub mod storage;
pub mod store;

pub use registry::TenantRegistry;
pub use storage::StorageManager;
pub use store::{TenantKeyValueStore, TenantRecord, RETENTION_LIMIT};

/// 患者存储
pub type PatientStore = TenantKeyValueStore<radsim_core::Patient>;

/// 报告存储
pub type ReportStore = TenantKeyValueStore<radsim_core::Report>;
