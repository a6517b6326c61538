//! Segmented-transport serving.
//!
//! The transcoder writes a rolling playlist and segments into the output
//! directory; this router exposes that directory read-only with caching
//! disabled so viewers always fetch the current window.

use axum::http::{header, HeaderValue};
use axum::Router;
use std::path::Path;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;

/// Router serving `dir` with no-store caching headers.
///
/// Intended to be nested under `/stream`.
pub fn hls_router(dir: &Path) -> Router {
    let service = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .service(ServeDir::new(dir));

    Router::new().fallback_service(service)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn test_playlist_served_without_caching() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("playlist.m3u8"), "#EXTM3U\n").unwrap();

        let app = Router::new().nest_service("/stream", hls_router(dir.path()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/stream/playlist.m3u8")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert!(headers
            .get(header::CACHE_CONTROL)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("no-store"));
        assert_eq!(headers.get(header::PRAGMA).unwrap(), "no-cache");
        assert_eq!(headers.get(header::EXPIRES).unwrap(), "0");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"#EXTM3U\n");
    }

    #[tokio::test]
    async fn test_missing_segment_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = Router::new().nest_service("/stream", hls_router(dir.path()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/stream/playlist3.ts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
