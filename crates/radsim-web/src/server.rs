//! Web服务器

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use radsim_core::Result;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::auth::admin_middleware;
use crate::handlers;
use crate::state::AppState;

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            app: create_app(state),
        }
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("Web服务器启动: {}", listener.local_addr()?);
        axum::serve(listener, self.app).await?;
        Ok(())
    }
}

/// 构建完整路由
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // 小组会话
        .route("/join/:code", get(handlers::join))
        .route(
            "/session",
            post(handlers::create_session).delete(handlers::delete_session),
        )
        .route("/dashboard", get(handlers::dashboard))
        // KIS / LIS / RIS
        .route("/kis/patients", post(handlers::register_patient))
        .route("/lis/query", post(handlers::query_lab))
        .route("/ris/orders", post(handlers::place_order))
        // 检查设备
        .route("/modality/worklist", get(handlers::modality_worklist))
        .route("/modality/scan", post(handlers::scan))
        // 工作站
        .route("/workstation/studies", get(handlers::find_studies))
        .route("/workstation/retrieve", post(handlers::retrieve))
        .route("/workstation/received", get(handlers::received))
        .route("/workstation/reports", post(handlers::create_report))
        .route("/echo", post(handlers::echo))
        .nest("/admin", admin_routes(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

/// 管理路由（Bearer令牌）
fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/generate", post(handlers::generate_sessions))
        .layer(middleware::from_fn_with_state(state, admin_middleware))
}
