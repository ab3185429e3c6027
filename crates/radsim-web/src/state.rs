//! 应用共享状态

use radsim_dicom::ImageReceiptListener;
use radsim_workflow::WorkflowOrchestrator;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// 所有处理器共享的状态
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub listener: Option<Arc<ImageReceiptListener>>,
    admin_token_digest: Option<[u8; 32]>,
}

impl AppState {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self {
            orchestrator,
            listener: None,
            admin_token_digest: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<ImageReceiptListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// 设置管理接口令牌；空令牌等同于关闭管理接口
    pub fn with_admin_token(mut self, token: Option<&str>) -> Self {
        self.admin_token_digest = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(token_digest);
        self
    }

    pub fn admin_enabled(&self) -> bool {
        self.admin_token_digest.is_some()
    }

    /// 校验管理令牌（比较摘要，长度固定）
    pub fn verify_admin_token(&self, candidate: &str) -> bool {
        match &self.admin_token_digest {
            Some(expected) => token_digest(candidate.trim()) == *expected,
            None => false,
        }
    }
}

fn token_digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}
