use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    body::{Bytes, Full},
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::feed::Served;
use crate::render::Format;
use crate::store::FeedStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FeedStore>,
}

#[derive(Debug, Serialize)]
struct ErrorResp {
    error: String,
}

fn err(status: StatusCode, msg: &str) -> (StatusCode, Json<ErrorResp>) {
    (status, Json(ErrorResp { error: msg.into() }))
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(serve_feed)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// `GET|HEAD /{feed}[.json|.rss|.atom]`
async fn serve_feed(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, Json<ErrorResp>)> {
    if method != Method::GET && method != Method::HEAD {
        return Err(err(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed"));
    }
    let (feed_id, format) = parse_path(uri.path())?;
    let feed = state
        .store
        .by_id(&feed_id)
        .ok_or_else(|| err(StatusCode::NOT_FOUND, "feed_not_found"))?;
    let served = feed
        .cached(format)
        .ok_or_else(|| err(StatusCode::SERVICE_UNAVAILABLE, "feed_not_ready"))?;
    Ok(respond(&served, &headers, method == Method::HEAD))
}

/// Split a request path into a lowercased feed id and format.
fn parse_path(path: &str) -> Result<(String, Format), (StatusCode, Json<ErrorResp>)> {
    let path = path.trim_start_matches('/').to_lowercase();
    if path.is_empty() || path.contains('/') {
        return Err(err(StatusCode::NOT_FOUND, "feed_not_found"));
    }
    let (name, ext) = match path.rfind('.') {
        Some(dot) => path.split_at(dot),
        None => (path.as_str(), ""),
    };
    let format =
        Format::from_extension(ext).ok_or_else(|| err(StatusCode::NOT_FOUND, "unknown_format"))?;
    Ok((name.to_string(), format))
}

fn respond(served: &Served, req: &HeaderMap, head_only: bool) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::LAST_MODIFIED,
        http_date(served.last_modified)
            .parse()
            .unwrap_or(HeaderValue::from_static("")),
    );
    if let Ok(etag) = served.etag.parse() {
        headers.insert(header::ETAG, etag);
    }
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(served.format.mime()),
    );

    if not_modified(served, req) {
        return (StatusCode::NOT_MODIFIED, headers).into_response();
    }
    let body = if head_only {
        Bytes::new()
    } else {
        served.bytes.clone()
    };
    headers.insert(header::CONTENT_LENGTH, served.bytes.len().into());
    (StatusCode::OK, headers, Full::new(body)).into_response()
}

fn not_modified(served: &Served, req: &HeaderMap) -> bool {
    let etag_matches = req
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .any(|tag| tag == "*" || tag == served.etag)
        })
        .unwrap_or(false);
    let unmodified_since = req
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|since| since.timestamp() >= served.last_modified.timestamp())
        .unwrap_or(false);
    etag_matches || unmodified_since
}

/// RFC 7231 IMF-fixdate.
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Serve until `cancel` fires.
pub async fn serve(listen_address: &str, store: Arc<FeedStore>, cancel: CancellationToken) -> Result<()> {
    let addr: SocketAddr = listen_address
        .parse()
        .with_context(|| format!("invalid listen address {listen_address}"))?;
    let router = build_router(AppState { store });
    info!(%addr, "serving feeds");
    axum::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {addr}"))?
        .serve(router.into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::TimeZone;
    use tower::ServiceExt;

    use crate::feed::{tests::message, Feed};
    use crate::render::Renderer;

    fn router() -> (Router, Arc<FeedStore>) {
        let renderer = Renderer::new("https://f.example.com", "https://m.example.com", "example.com");
        let mut store = FeedStore::new();
        let feed = store
            .insert(Feed::new("news", "!a:example.com", 5, None, None))
            .unwrap();
        store
            .insert(Feed::new("pending", "!b:example.com", 5, None, None))
            .unwrap();
        feed.seed(&Default::default(), &[message("$1", "@a:x", 1_000, "hi")], &renderer);
        feed.go_live(&renderer);
        let store = Arc::new(store);
        (build_router(AppState { store: store.clone() }), store)
    }

    async fn send(app: Router, method: Method, path: &str, headers: &[(&str, &str)]) -> Response {
        let mut req = Request::builder().method(method).uri(path);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap()
    }

    #[test]
    fn paths() {
        assert_eq!(parse_path("/News.RSS").unwrap().0, "news");
        assert_eq!(parse_path("/news.rss").unwrap().1, Format::Rss);
        assert_eq!(parse_path("/news").unwrap().1, Format::Json);
        assert_eq!(parse_path("/news.atom").unwrap().1, Format::Atom);
        assert!(parse_path("/news.xml").is_err());
        assert!(parse_path("/").is_err());
        assert!(parse_path("/a/b").is_err());
    }

    #[test]
    fn http_dates() {
        let t = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(http_date(t), "Sun, 06 Nov 1994 08:49:37 GMT");
        let parsed = DateTime::parse_from_rfc2822(&http_date(t)).unwrap();
        assert_eq!(parsed.timestamp(), t.timestamp());
    }

    #[tokio::test]
    async fn serves_formats_with_validators() {
        let (app, store) = router();
        let served = store.by_id("news").unwrap().cached(Format::Rss).unwrap();
        let resp = send(app, Method::GET, "/news.rss", &[]).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/rss+xml");
        assert_eq!(resp.headers()[header::ETAG], served.etag.as_str());
        assert!(resp.headers().contains_key(header::LAST_MODIFIED));
    }

    #[tokio::test]
    async fn conditional_requests() {
        let (app, store) = router();
        let served = store.by_id("news").unwrap().cached(Format::Json).unwrap();
        let resp = send(app.clone(), Method::GET, "/news", &[("if-none-match", served.etag.as_str())]).await;
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);

        let resp = send(app.clone(), Method::GET, "/news", &[("if-none-match", "\"other\"")]).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let since = http_date(served.last_modified);
        let resp = send(app.clone(), Method::GET, "/news", &[("if-modified-since", since.as_str())]).await;
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);

        let resp = send(
            app,
            Method::GET,
            "/news",
            &[("if-modified-since", "Sun, 06 Nov 1994 08:49:37 GMT")],
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn error_statuses() {
        let (app, _) = router();
        let resp = send(app.clone(), Method::GET, "/missing", &[]).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = send(app.clone(), Method::GET, "/news.xml", &[]).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = send(app.clone(), Method::GET, "/pending", &[]).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let resp = send(app.clone(), Method::POST, "/news", &[]).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        let resp = send(app, Method::GET, "/health", &[]).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn head_has_headers_only() {
        let (app, _) = router();
        let resp = send(app, Method::HEAD, "/news.atom", &[]).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/atom+xml");
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert!(body.is_empty());
    }
}
