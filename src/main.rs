// 服务入口：加载配置、初始化日志并启动 HTTP 服务。
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::Response;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use taskwise_server::api::{build_router, error_response};
use taskwise_server::config::{load_config, Config};
use taskwise_server::shutdown::shutdown_signal;
use taskwise_server::state::AppState;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config();
    init_tracing(&config);
    let state = Arc::new(AppState::new(config.clone())?);

    if !config.llm.is_configured() {
        warn!("未配置模型 api_key，/agent/chat 将返回兜底道歉。");
    }

    let app = build_router(state)
        .layer(build_cors(&config))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(panic_guard));

    let addr = bind_address(&config);
    let listener = tokio::net::TcpListener::bind(addr.as_str()).await?;
    info!("TaskWise 服务已启动: http://{addr}");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        warn!("服务退出异常: {err}");
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let default_level = config.observability.log_level.trim();
    let default_level = if default_level.is_empty() {
        "info".to_string()
    } else {
        default_level.to_lowercase()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn bind_address(config: &Config) -> String {
    // 保留环境变量覆盖，便于容器化部署。
    let host = std::env::var("TASKWISE_HOST").unwrap_or_else(|_| config.server.host.clone());
    let port = std::env::var("TASKWISE_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.server.port);
    format!("{host}:{port}")
}

fn build_cors(config: &Config) -> CorsLayer {
    let explicit = config
        .cors
        .allow_origins
        .as_deref()
        .filter(|origins| !origins.iter().any(|value| value == "*"))
        .map(|origins| {
            origins
                .iter()
                .filter_map(|value| value.parse().ok())
                .collect::<Vec<_>>()
        })
        .filter(|values| !values.is_empty());

    match explicit {
        Some(values) => {
            let mut cors = CorsLayer::new()
                .allow_origin(AllowOrigin::list(values))
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([axum::http::header::CONTENT_TYPE]);
            if config.cors.allow_credentials.unwrap_or(false) {
                cors = cors.allow_credentials(true);
            }
            cors
        }
        // 通配来源下不能携带凭证，忽略 allow_credentials。
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

// 兜底把 handler panic 转成统一 500，避免连接被直接挂断。
async fn panic_guard(request: Request<Body>, next: Next) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| payload.downcast_ref::<&str>().copied())
                .unwrap_or("panic");
            warn!("请求处理 panic: {detail}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
