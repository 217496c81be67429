mod handlers;
#[cfg(test)]
mod test_util;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    Router, ServiceExt,
    extract::{ConnectInfo, FromRef},
    http::{Method, Request, StatusCode, header},
};
use circleci_artifacts_circleci::CircleCi;
use circleci_artifacts_core::config::{Config, DEFAULT_CONFIG_PATH};
use tokio::{net::TcpListener, signal};
use tower::{Layer, ServiceBuilder};
use tower_http::{
    cors::{self, CorsLayer},
    normalize_path::{NormalizePath, NormalizePathLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, MakeSpan, TraceLayer},
};
use tracing::{Level, Span};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

use crate::handlers::build_router;

#[derive(Clone, FromRef)]
pub struct AppState {
    config: Arc<Config>,
    circleci: Arc<CircleCi>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Arc::new(Config::load(&config_path)?);
    let circleci =
        Arc::new(CircleCi::new(&config.circleci).context("Failed to create CircleCI client")?);
    let state = AppState { config: config.clone(), circleci };
    let service = ServiceExt::<axum::extract::Request>::into_make_service_with_connect_info::<
        SocketAddr,
    >(app(state));

    // Create the listener
    #[allow(unused_mut)]
    let mut listener = None;
    #[cfg(target_os = "linux")]
    {
        use std::os::fd::{FromRawFd, IntoRawFd};
        let fds = libsystemd::activation::receive_descriptors_with_names(false)
            .context("Failed to receive fds")?;
        if let Some((fd, name)) = fds.into_iter().next() {
            tracing::info!("Listening on {}", name);
            let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd.into_raw_fd()) };
            std_listener.set_nonblocking(true).context("Failed to set non-blocking")?;
            listener =
                Some(TcpListener::from_std(std_listener).context("Failed to create listener")?);
        }
    }
    let listener = match listener {
        Some(listener) => listener,
        None => {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server.port));
            tracing::info!("Listening on {}", addr);
            TcpListener::bind(addr).await.with_context(|| format!("Failed to bind {addr}"))?
        }
    };

    #[cfg(target_os = "linux")]
    {
        libsystemd::daemon::notify(false, &[libsystemd::daemon::NotifyState::Ready])
            .context("Failed to notify")?;
    }

    let result = axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server error");

    #[cfg(target_os = "linux")]
    {
        libsystemd::daemon::notify(false, &[libsystemd::daemon::NotifyState::Stopping])
            .context("Failed to notify")?;
    }

    result?;
    tracing::info!("Shut down gracefully");
    Ok(())
}

/// Trailing slashes are trimmed before routing, so the layer wraps the router from outside.
fn app(state: AppState) -> NormalizePath<Router> {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(RequestSpan)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
        .layer(CorsLayer::new().allow_methods([Method::GET]).allow_origin(cors::Any));
    let router = build_router().with_state(state).layer(middleware);
    NormalizePathLayer::trim_trailing_slash().layer(router)
}

async fn shutdown_signal() {
    if let Err(e) = wait_for_signal().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await
    }
}

/// Request span that records the path only; the query string carries the CircleCI token.
#[derive(Debug, Clone)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            ip = %client_ip(request),
            user_agent = %user_agent(request),
        )
    }
}

/// Prefers `CF-Connecting-IP` over the socket peer address.
fn client_ip<B>(request: &Request<B>) -> IpAddr {
    let forwarded = request
        .headers()
        .get("CF-Connecting-IP")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| IpAddr::from_str(s).ok());
    forwarded
        .or_else(|| {
            request.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::from([0, 0, 0, 0]))
}

fn user_agent<B>(request: &Request<B>) -> &str {
    request.headers().get(header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or("[unknown]")
}
