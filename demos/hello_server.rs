//! Per-client rate limiting in front of an axum handler.
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1:6379 cargo run --example hello_server
//! curl -i http://127.0.0.1:3000/
//! ```
//!
//! The algorithm and its parameters come from the `RATELIMIT_*` variables.

use anyhow::Result;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use redis_ratelimit::clock::{Clock, SystemClock};
use redis_ratelimit::{Config, Ratelimit, RedisStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type SharedLimiter = Arc<Ratelimit<RedisStore>>;

fn client_ip(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

fn rate_limit_headers(headers: &mut HeaderMap, decision: &redis_ratelimit::Response) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset));
}

async fn rate_limit(State(limiter): State<SharedLimiter>, request: Request, next: Next) -> Response {
    let ip = client_ip(&request);

    let decision = match limiter.limit(&ip).await {
        Ok(decision) => decision,
        Err(e) => {
            tracing::error!(client = %ip, error = %e, "Rate limit check failed");
            return (StatusCode::SERVICE_UNAVAILABLE, "rate limiter unavailable").into_response();
        }
    };

    if !decision.allowed {
        let retry_after = decision.retry_after(SystemClock.now_millis()).div_ceil(1_000).max(1);
        tracing::info!(client = %ip, retry_after, "Rate limit exceeded");

        let mut response = (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
        rate_limit_headers(response.headers_mut(), &decision);
        response
            .headers_mut()
            .insert("retry-after", HeaderValue::from(retry_after));
        return response;
    }

    let mut response = next.run(request).await;
    rate_limit_headers(response.headers_mut(), &decision);
    response
}

async fn hello() -> &'static str {
    "Hello, world!"
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hello_server=info,redis_ratelimit=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let algorithm = config.algorithm()?;
    tracing::info!(
        algorithm = %algorithm.kind(),
        limit = algorithm.limit(),
        redis_url = %config.redis_url,
        "Starting rate limited server"
    );

    let store = RedisStore::connect(&config.redis_url).await?;
    let limiter: SharedLimiter = Arc::new(Ratelimit::new(store, algorithm));

    let app = Router::new()
        .route("/", get(hello))
        .layer(middleware::from_fn_with_state(limiter, rate_limit))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
