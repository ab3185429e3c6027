//! # DICOM接收模块
//!
//! 工作站一侧的DICOM相关功能：
//! - 接收缓存：进程级共享、只追加的已接收影像记录
//! - 接收监听器：后台常驻任务，接受归档的 C-STORE 推送和JSON行格式的“影像到达”通知
//! - 数据集解码：从DICOM数据集中提取通知字段，检查待上传实例
//! - 归档协作方接口：查询、请求传输、上传实例

pub mod archive;
pub mod dataset;
pub mod receiver;
pub mod scp;
pub mod server;

pub use archive::{ArchiveClient, ArchivePatientTags, ArchiveStudy, ArchiveStudyTags, StoredInstance};
pub use dataset::{
    generate_uid, inspect_instance, notification_from_dataset, retag_instance, synthetic_ct_instance,
    InstanceIdentity, InstanceSummary,
};
pub use receiver::{group_by_study, ReceivedImageLog, StoreNotification};
pub use server::{ImageReceiptListener, ReceiverConfig};
