use std::{convert::Infallible, sync::Arc};

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::Path,
    http::{HeaderMap, Request, StatusCode},
    response::Response,
    routing::get,
};
use circleci_artifacts_circleci::CircleCi;
use circleci_artifacts_core::config::{CircleCiConfig, Config};
use tokio::net::TcpListener;
use tower::{Service, ServiceExt};
use url::Url;

use crate::AppState;

const BUILDS: &str =
    r#"[{"status": "success", "branch": "main", "build_num": 42, "has_artifacts": true}]"#;
const ARTIFACTS: &str =
    r#"[{"path": "a/foo.txt", "url": "u1"}, {"path": "b/bar.txt", "url": "u2"}]"#;

/// Starts a fake CircleCI API and returns app state pointed at it.
pub async fn mock_state(builds_status: StatusCode) -> AppState {
    let upstream = Router::new()
        .route(
            "/api/v1.1/project/github/{owner}/{repo}",
            get(move || async move { (builds_status, BUILDS) }),
        )
        .route(
            "/api/v1.1/project/github/{owner}/{repo}/{build_num}/artifacts",
            get(|Path((_, _, build_num)): Path<(String, String, u64)>| async move {
                if build_num == 42 {
                    (StatusCode::OK, ARTIFACTS)
                } else {
                    (StatusCode::NOT_FOUND, "")
                }
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, upstream).await.unwrap() });
    state_for(&format!("http://{addr}"))
}

/// App state pointed at a port nothing listens on.
pub async fn unreachable_state() -> AppState {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    state_for(&format!("http://{addr}"))
}

fn state_for(base_url: &str) -> AppState {
    let config = Config {
        circleci: CircleCiConfig {
            base_url: Url::parse(base_url).unwrap(),
            vcs: "github".to_string(),
        },
        ..Default::default()
    };
    let circleci = Arc::new(CircleCi::new(&config.circleci).unwrap());
    AppState { config: Arc::new(config), circleci }
}

pub async fn send<S>(service: S, uri: &str) -> (StatusCode, HeaderMap, String)
where S: Service<Request<Body>, Response = Response, Error = Infallible> {
    send_request(service, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

pub async fn send_request<S>(service: S, request: Request<Body>) -> (StatusCode, HeaderMap, String)
where S: Service<Request<Body>, Response = Response, Error = Infallible> {
    let response = service.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}
