//! # RadSim Core
//!
//! 放射科工作流模拟器的核心模块，提供基础数据结构、错误定义、
//! 小组代码（租户）规范化以及租户可见性规则。

pub mod code;
pub mod error;
pub mod models;
pub mod utils;
pub mod visibility;

pub use code::GroupCode;
pub use error::{RadSimError, Result};
pub use models::*;
pub use visibility::{filter_visible, is_visible, PatientScoped};
