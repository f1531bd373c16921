//! Local stand-ins for upstream hosts used by tests

use std::collections::HashMap;

use axum::extract::Query;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;

pub const DRIVE_FILE_ID: &str = "1AbCdEfGhIjKlMnOpQrStUvWxYz012345";
pub const DRIVE_SECRET: &str = "q7Xk";

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A fake Drive `uc` endpoint
///
/// Ids prefixed `large-` get a confirmation page with a session cookie,
/// `nocookie-` get the page without one, anything else downloads directly.
pub fn drive_app() -> Router {
    Router::new().route("/uc", get(drive_uc))
}

async fn drive_uc(Query(query): Query<HashMap<String, String>>, headers: HeaderMap) -> Response {
    let id = query.get("id").cloned().unwrap_or_default();
    if query.get("export").map(String::as_str) != Some("download") {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let form = format!(
        r#"<html><body><p>Google Drive can't scan this file for viruses.</p>
           <form id="download-form" action="/uc?export=download&amp;confirm=t&amp;id={}" method="post">
           <input type="submit" value="Download anyway"/></form></body></html>"#,
        id
    );

    if id.starts_with("large-") {
        if query.get("confirm").map(String::as_str) != Some("t") {
            return (
                [(SET_COOKIE, format!("download_warning={}; Path=/uc; HttpOnly", DRIVE_SECRET))],
                Html(form),
            )
                .into_response();
        }
        let expected = format!("download_warning={}", DRIVE_SECRET);
        let cookie = headers.get(COOKIE).and_then(|v| v.to_str().ok());
        if cookie != Some(expected.as_str()) {
            return StatusCode::FORBIDDEN.into_response();
        }
        return (
            [
                (CONTENT_TYPE, "application/zip"),
                (CONTENT_DISPOSITION, "attachment; filename=\"big.zip\""),
            ],
            "large file contents",
        )
            .into_response();
    }

    if id.starts_with("nocookie-") {
        return Html(form).into_response();
    }

    (
        [
            (CONTENT_TYPE, "application/pdf"),
            (CONTENT_DISPOSITION, "attachment; filename=\"shared.pdf\""),
        ],
        format!("drive file {}", id),
    )
        .into_response()
}
