//! 放射科工作流模拟器主程序

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use radsim_dicom::{ImageReceiptListener, ReceivedImageLog, ReceiverConfig};
use radsim_integration::{OrthancArchive, OrthancConfig};
use radsim_storage::StorageManager;
use radsim_web::{AppState, WebServer};
use radsim_workflow::{WorklistStore, WorkflowOrchestrator};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

/// 命令行参数，优先于配置文件和环境变量
#[derive(Parser, Debug)]
#[command(name = "radsim-server")]
#[command(about = "放射科工作流教学模拟器 (KIS / LIS / RIS / 检查设备 / 工作站)")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// Web端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 影像接收监听端口
    #[arg(long)]
    listener_port: Option<u16>,

    /// AE标题 (Application Entity Title)
    #[arg(short, long)]
    ae_title: Option<String>,

    /// 数据目录
    #[arg(short, long)]
    data_dir: Option<String>,

    /// 影像归档地址
    #[arg(long)]
    archive_url: Option<String>,

    /// 启动时放入一条演示接收记录
    #[arg(long)]
    seed_demo: bool,

    /// 日志级别（RUST_LOG 优先）
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.web.port = port;
        }
        if let Some(port) = self.listener_port {
            config.listener.port = port;
        }
        if let Some(ae_title) = &self.ae_title {
            config.listener.ae_title = ae_title.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.storage.worklist_dir = format!("{}/worklist", dir.trim_end_matches('/'));
            config.storage.data_dir = dir.clone();
        }
        if let Some(url) = &self.archive_url {
            config.archive.url = url.clone();
        }
        if self.seed_demo {
            config.listener.seed_demo = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("启动放射科工作流模拟器...");

    let mut config = AppConfig::load(args.config.as_deref()).context("加载配置失败")?;
    args.apply(&mut config);
    config.validate().context("配置无效")?;

    info!("模拟器配置:");
    info!("  数据目录: {}", config.storage.data_dir);
    info!("  工作列表目录: {}", config.storage.worklist_dir);
    info!("  AE标题: {}", config.listener.ae_title);
    info!("  归档地址: {}", config.archive.url);
    if config.admin.token.is_none() {
        info!("  管理接口: 未启用");
    }

    let data = StorageManager::new(&config.storage.data_dir);
    data.ensure_dir().context("无法创建数据目录")?;
    let worklist_storage = StorageManager::new(&config.storage.worklist_dir);
    worklist_storage.ensure_dir().context("无法创建工作列表目录")?;

    // 影像接收监听器启动失败是致命错误
    let received = Arc::new(ReceivedImageLog::new());
    let listener = Arc::new(ImageReceiptListener::new(
        ReceiverConfig {
            ae_title: config.listener.ae_title.clone(),
            host: config.listener.host.clone(),
            port: config.listener.port,
            seed_demo: config.listener.seed_demo,
            ..ReceiverConfig::default()
        },
        received.clone(),
    ));
    if let Err(e) = listener.start().await {
        error!("影像接收监听器启动失败: {}", e);
        return Err(e).context("影像接收监听器启动失败");
    }

    let archive = OrthancArchive::new(OrthancConfig {
        base_url: config.archive.url.clone(),
        target_modality: config.archive.target_modality.clone(),
        timeout: config.archive.timeout(),
        username: config.archive.username.clone(),
        password: config.archive.password.clone(),
    })
    .context("无法创建归档客户端")?;

    let worklist = WorklistStore::new(worklist_storage, config.listener.ae_title.clone());
    let orchestrator = Arc::new(WorkflowOrchestrator::new(
        data,
        worklist,
        received,
        Arc::new(archive),
    ));

    if config.sessions.auto_generate > 0 {
        let codes = orchestrator
            .registry()
            .ensure_generated(config.sessions.auto_generate)
            .context("无法生成小组代码")?;
        info!("已登记小组代码: {}", codes.len());
    } else if orchestrator.registry().load().is_empty() {
        warn!("小组代码注册表为空，任何规范化代码都可使用");
    }

    let state = AppState::new(orchestrator)
        .with_listener(listener)
        .with_admin_token(config.admin.token.as_deref());

    let addr = resolve_addr(&config.web.host, config.web.port).await?;
    WebServer::new(addr, state).run().await?;

    Ok(())
}

async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("无法解析Web地址 {}:{}", host, port))?
        .next()
        .with_context(|| format!("Web地址 {}:{} 没有可用的解析结果", host, port))
}
