use axum::{
    routing::{get, post},
    Json, Router,
};
use media_fetch_rust::{
    config::{config_path, LogConfig},
    logging,
    server::handlers,
    AppState,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// 加载日志配置
///
/// 尝试从配置文件加载，失败时返回默认配置
async fn load_log_config() -> LogConfig {
    // 尝试读取配置文件中的日志配置
    if let Ok(content) = tokio::fs::read_to_string(config_path()).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    // 返回默认配置
    LogConfig::default()
}

/// 按配置构造 CORS 层（"*" 表示不限制来源）
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 🔥 先尝试加载日志配置，失败时使用默认配置
    let log_config = load_log_config().await;

    // 🔥 初始化日志系统（必须保持 _log_guard 存活）
    let _log_guard = logging::init_logging(&log_config);

    info!(
        "Media Fetch Rust v{} 启动中...",
        env!("CARGO_PKG_VERSION")
    );

    // 创建应用状态
    let app_state = AppState::new().await?;
    info!("应用状态初始化完成");

    let config = app_state.config.clone();
    let addr = format!("{}:{}", config.server.host, config.server.port);

    // 配置中间件层
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http()) // HTTP 请求日志
        .layer(build_cors_layer(&config.server.cors_origins));

    // API 路由
    let api_routes = Router::new()
        // 任务API
        .route("/jobs", post(handlers::submit_job))
        .route("/jobs/status", get(handlers::get_status))
        .route("/jobs/cancel", post(handlers::cancel_job))
        // 会话API
        .route("/sessions/reset", post(handlers::reset_session))
        // 预览API
        .route("/preview", post(handlers::preview))
        .with_state(app_state.clone());

    // 健康检查响应结构
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
        service: String,
        version: String,
    }

    // 健康检查处理器
    async fn health_check() -> Json<HealthResponse> {
        Json(HealthResponse {
            status: "ok".to_string(),
            service: "media-fetch-rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    // 构建完整应用
    let app = Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(middleware);

    // 启动服务器
    info!("服务器启动在: http://{}", addr);
    info!("API 基础路径: http://{}/api/v1", addr);
    info!("健康检查: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // 🔥 使用 select! 监听关闭信号，支持优雅关闭
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("服务器错误: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，开始优雅关闭...");
        }
    }

    info!("应用已安全退出");

    Ok(())
}
