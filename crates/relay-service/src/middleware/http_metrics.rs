//! HTTP metrics middleware.
//!
//! Applied as the outermost layer so framework-level rejections (404, 405,
//! 415, JSON errors) and authentication failures are counted alongside
//! handler responses.

use crate::observability::metrics::record_http_request;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Record method, normalized path, status and duration for every request.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use tower::ServiceExt;

    fn test_app() -> Router {
        Router::new()
            .route("/api/status", get(|| async { "OK" }))
            .layer(middleware::from_fn(http_metrics_middleware))
    }

    #[test]
    fn test_unmatched_route_is_counted_as_other() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let response = test_app()
                    .oneshot(
                        HttpRequest::builder()
                            .uri("/nope")
                            .body(Body::empty())
                            .unwrap(),
                    )
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::NOT_FOUND);

                let response = test_app()
                    .oneshot(
                        HttpRequest::builder()
                            .uri("/api/status")
                            .body(Body::empty())
                            .unwrap(),
                    )
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::OK);
            });
        });

        let counters: Vec<(String, Vec<(String, String)>, u64)> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(count) => Some((
                    key.key().name().to_string(),
                    key.key()
                        .labels()
                        .map(|l| (l.key().to_string(), l.value().to_string()))
                        .collect(),
                    count,
                )),
                _ => None,
            })
            .collect();

        let endpoint_of = |status: &str| {
            counters
                .iter()
                .find(|(name, labels, _)| {
                    name == "relay_http_requests_total"
                        && labels.iter().any(|(k, v)| k == "status_code" && v == status)
                })
                .and_then(|(_, labels, _)| {
                    labels
                        .iter()
                        .find(|(k, _)| k == "endpoint")
                        .map(|(_, v)| v.clone())
                })
        };

        assert_eq!(endpoint_of("404").as_deref(), Some("/other"));
        assert_eq!(endpoint_of("200").as_deref(), Some("/api/status"));
    }
}
