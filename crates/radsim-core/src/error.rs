//! 错误定义模块

use thiserror::Error;

/// 模拟器统一错误类型
#[derive(Error, Debug)]
pub enum RadSimError {
    #[error("配置错误: {0}")]
    Config(String),

    /// 输入校验失败，同步返回给调用方，不写入任何状态
    #[error("验证错误: {0}")]
    Validation(String),

    /// 资源不存在；跨租户访问同样报告为不存在
    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("影像归档错误: {0}")]
    Archive(String),

    #[error("HL7错误: {0}")]
    Hl7(String),

    #[error("网络错误: {0}")]
    Network(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("未授权: {0}")]
    Unauthorized(String),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl RadSimError {
    /// 是否属于应直接展示给用户的错误
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            RadSimError::Validation(_) | RadSimError::NotFound(_) | RadSimError::Unauthorized(_)
        )
    }
}

/// 模拟器统一结果类型
pub type Result<T> = std::result::Result<T, RadSimError>;
