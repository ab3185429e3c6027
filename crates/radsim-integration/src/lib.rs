//! # RadSim集成模块
//!
//! 与外部系统交互：
//! - HL7 v2 消息（KIS、LIS、RIS、工作站之间的文本消息）
//! - 影像归档（Orthanc REST接口）

pub mod hl7;
pub mod orthanc;

pub use hl7::{Hl7Error, Hl7Message, Hl7MessageType, Hl7Parser, Hl7Segment, Observation};
pub use orthanc::{OrthancArchive, OrthancConfig};
