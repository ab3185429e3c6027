//! 影像接收监听器
//!
//! 后台常驻任务，独立于Web请求运行。同一个端口上接受两种连接，按第一个字节区分：
//! - DICOM关联（A-ASSOCIATE-RQ）：归档推送的 C-STORE，见 [`crate::scp`]
//! - 其他：按行推送的JSON格式 [`StoreNotification`]
//!
//! 收到的记录都追加到共享的 [`ReceivedImageLog`]。单条通知或单个连接出错
//! 只会被记录并跳过，不会停止监听。

use bytes::BytesMut;
use radsim_core::{RadSimError, ReceivedImageRecord, Result};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::receiver::{ReceivedImageLog, StoreNotification};
use crate::scp::{self, ASSOCIATE_RQ_PDU_TYPE};

/// 接收监听器配置
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub ae_title: String,         // 本工作站的应用实体标题
    pub host: String,             // 监听地址
    pub port: u16,                // 监听端口
    pub max_line_length: usize,   // 单条通知的最大字节数
    pub seed_demo: bool,          // 启动时放入演示记录
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            ae_title: "SIMULATOR".to_string(),
            host: "0.0.0.0".to_string(),
            port: 11112,
            max_line_length: 64 * 1024,
            seed_demo: false,
        }
    }
}

/// 影像接收监听器
///
/// 同一个实例无论调用多少次 [`start`](Self::start) 都只会启动一次。
#[derive(Debug)]
pub struct ImageReceiptListener {
    config: ReceiverConfig,
    log: Arc<ReceivedImageLog>,
    started: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
}

impl ImageReceiptListener {
    pub fn new(config: ReceiverConfig, log: Arc<ReceivedImageLog>) -> Self {
        Self {
            config,
            log,
            started: AtomicBool::new(false),
            local_addr: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn log(&self) -> &Arc<ReceivedImageLog> {
        &self.log
    }

    /// 实际监听的地址（启动后可用）
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// 启动后台监听
    ///
    /// 第一次调用绑定端口并派生一个分离的接收任务，返回监听地址；之后的调用
    /// 直接返回 `None`。绑定失败是不可恢复的启动错误，会返回给调用方，
    /// 同时允许之后重试。
    pub async fn start(&self) -> Result<Option<SocketAddr>> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("image receipt listener already running");
            return Ok(None);
        }

        let listener = match TcpListener::bind((self.config.host.as_str(), self.config.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(RadSimError::Network(e));
            }
        };
        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);

        if self.config.seed_demo && self.log.seed_demo() {
            info!("seeded demo received image");
        }

        info!("影像接收监听器启动: AE={}, 地址={}", self.config.ae_title, addr);

        let context = Arc::new(ConnectionContext {
            log: self.log.clone(),
            ae_title: self.config.ae_title.clone(),
            max_line_length: self.config.max_line_length,
        });
        tokio::spawn(accept_loop(listener, context));

        Ok(Some(addr))
    }

    /// 进程内直接投递一条通知
    pub fn accept(&self, notification: StoreNotification) -> ReceivedImageRecord {
        self.log.record_notification(notification)
    }
}

/// 每个连接共享的处理参数
struct ConnectionContext {
    log: Arc<ReceivedImageLog>,
    ae_title: String,
    max_line_length: usize,
}

async fn accept_loop(listener: TcpListener, context: Arc<ConnectionContext>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                debug!("接受连接: {}", remote_addr);
                let context = context.clone();
                tokio::spawn(async move {
                    match handle_connection(stream, context).await {
                        Ok(accepted) => debug!("连接关闭: {}, 接收 {} 条记录", remote_addr, accepted),
                        Err(e) => error!("处理连接失败: {}: {}", remote_addr, e),
                    }
                });
            }
            Err(e) => {
                error!("接受连接失败: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// 按第一个字节分派连接，返回成功记录的条数
async fn handle_connection(stream: TcpStream, context: Arc<ConnectionContext>) -> Result<usize> {
    let mut first = [0u8; 1];
    if stream.peek(&mut first).await? == 0 {
        return Ok(0);
    }

    if first[0] == ASSOCIATE_RQ_PDU_TYPE {
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        return tokio::task::spawn_blocking(move || {
            scp::serve_association(stream, &context.ae_title, &context.log)
        })
        .await
        .map_err(|e| RadSimError::Internal(format!("DICOM关联任务异常结束: {}", e)))?;
    }

    read_notification_lines(stream, &context.log, context.max_line_length).await
}

/// 读取一个连接上的全部JSON行通知
async fn read_notification_lines(
    mut stream: TcpStream,
    log: &ReceivedImageLog,
    max_line_length: usize,
) -> Result<usize> {
    let mut codec = LinesCodec::new_with_max_length(max_line_length);
    let mut buffer = BytesMut::with_capacity(4096);
    let mut accepted = 0;

    loop {
        let eof = stream.read_buf(&mut buffer).await? == 0;

        loop {
            let frame = if eof {
                codec.decode_eof(&mut buffer)
            } else {
                codec.decode(&mut buffer)
            };
            match frame {
                Ok(Some(line)) => {
                    if ingest_line(log, &line) {
                        accepted += 1;
                    }
                }
                Ok(None) => break,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!("丢弃超长通知 (>{} bytes)", max_line_length);
                }
                // 解码器在报错前已经消费了这一行
                Err(LinesCodecError::Io(e)) if e.kind() == ErrorKind::InvalidData => {
                    warn!("丢弃非UTF-8通知: {}", e);
                }
                Err(LinesCodecError::Io(e)) => return Err(e.into()),
            }
        }

        if eof {
            return Ok(accepted);
        }
    }
}

fn ingest_line(log: &ReceivedImageLog, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    match serde_json::from_str::<StoreNotification>(line) {
        Ok(notification) => {
            log.record_notification(notification);
            true
        }
        Err(e) => {
            warn!(error = %e, "skipping malformed store notification");
            false
        }
    }
}
