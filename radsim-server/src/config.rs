//! 配置管理
//!
//! 加载顺序（后者覆盖前者）：内置默认值 → 配置文件（可选）→ 环境变量
//! `RADSIM__{SECTION}__{KEY}`，例如 `RADSIM__WEB__PORT=8080`。

use config::{Config, Environment, File};
use radsim_core::{RadSimError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "RADSIM";

/// 单次最多自动生成的小组代码数
const MAX_AUTO_GENERATE: usize = 200;

/// 模拟器完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageSettings,
    pub web: WebSettings,
    pub listener: ListenerSettings,
    pub archive: ArchiveSettings,
    pub admin: AdminSettings,
    pub sessions: SessionSettings,
}

/// 存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: String,     // 注册表、患者、报告
    pub worklist_dir: String, // 检查工作列表条目
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            worklist_dir: "./data/worklist".to_string(),
        }
    }
}

/// Web服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub host: String,
    pub port: u16,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// 影像接收监听器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    pub host: String,
    pub port: u16,
    pub ae_title: String,
    pub seed_demo: bool,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 11112,
            ae_title: "SIMULATOR".to_string(),
            seed_demo: false,
        }
    }
}

/// 影像归档配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    pub url: String,
    pub target_modality: String, // 归档中登记的本工作站名称
    pub timeout_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8042".to_string(),
            target_modality: "SIMULATOR".to_string(),
            timeout_secs: 15,
            username: None,
            password: None,
        }
    }
}

impl ArchiveSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 管理接口配置；未设置令牌时管理接口关闭
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    pub token: Option<String>,
}

/// 小组会话配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// 注册表为空时启动自动生成的代码数（0 表示不生成）
    pub auto_generate: usize,
}

impl AppConfig {
    /// 从默认值、配置文件和进程环境加载
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
    }

    /// 使用指定的环境变量来源加载
    pub fn load_with_env(path: Option<&str>, env: Environment) -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default()).map_err(config_error)?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(env.separator("__").try_parsing(true))
            .build()
            .map_err(config_error)?;

        let config: AppConfig = settings.try_deserialize().map_err(config_error)?;
        info!(file = path.unwrap_or("-"), "configuration loaded");
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.trim().is_empty() || self.storage.worklist_dir.trim().is_empty() {
            return Err(RadSimError::Config("存储目录不能为空".to_string()));
        }
        if self.web.port == 0 {
            return Err(RadSimError::Config("Web端口不能为0".to_string()));
        }
        if self.listener.port == 0 {
            return Err(RadSimError::Config("监听端口不能为0".to_string()));
        }
        if self.listener.ae_title.trim().is_empty() || self.listener.ae_title.len() > 16 {
            return Err(RadSimError::Config("AE标题长度必须在1到16之间".to_string()));
        }
        if self.archive.url.trim().is_empty() {
            return Err(RadSimError::Config("归档地址不能为空".to_string()));
        }
        if self.sessions.auto_generate > MAX_AUTO_GENERATE {
            return Err(RadSimError::Config(format!(
                "自动生成的代码数不能超过 {}",
                MAX_AUTO_GENERATE
            )));
        }
        Ok(())
    }
}

fn config_error(e: config::ConfigError) -> RadSimError {
    RadSimError::Config(e.to_string())
}
