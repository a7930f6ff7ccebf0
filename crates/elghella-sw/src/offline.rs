//! Synthesized offline responses.
//!
//! Both carry 503 so callers can tell a placeholder from a genuine 200.

use elghella_net::Response;
use http::StatusCode;
use url::Url;

pub const OFFLINE_TEXT: &str = "Offline - content unavailable";

pub const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="ar" dir="rtl">
<head><meta charset="utf-8"><title>Elghella - Offline</title></head>
<body>
<h1>غير متصل بالإنترنت</h1>
<p>This content is unavailable while you are offline. Please check your connection and try again.</p>
</body>
</html>"#;

/// Placeholder for assets and API calls.
pub fn offline_text(url: &Url) -> Response {
    Response::synthetic(
        url.clone(),
        StatusCode::SERVICE_UNAVAILABLE,
        "text/plain; charset=utf-8",
        OFFLINE_TEXT,
    )
}

/// Placeholder for documents.
pub fn offline_page(url: &Url) -> Response {
    Response::synthetic(
        url.clone(),
        StatusCode::SERVICE_UNAVAILABLE,
        "text/html; charset=utf-8",
        OFFLINE_PAGE,
    )
}
