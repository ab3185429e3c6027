//! # RadSim Web模块
//!
//! 模拟器的HTTP接口（JSON）：小组会话、KIS/LIS/RIS、检查设备、工作站和管理接口。

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{create_app, WebServer};
pub use state::AppState;
