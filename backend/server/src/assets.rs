//! # Static Site
//!
//! Game page and assets, served from one site root.
//!
//! - `/` is `index.html`
//! - `/assets/{path}` resolves under `assets/`
//! - `/static/{path}` and anything else resolve under the site root
//!
//! `ServeDir` keeps every lookup inside its root. On top of that only files with
//! an allow-listed extension are served, and no path segment may start with a
//! dot, so server sources and `.env` files in the site root stay private.
//! Segments are percent-decoded before the check, the same way `ServeDir`
//! decodes them before touching the filesystem.
use std::{borrow::Cow, ffi::OsStr, path::Path};

use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, StatusCode, header::CACHE_CONTROL},
    middleware::{Next, from_fn},
    response::{IntoResponse, Response},
};
use percent_encoding::percent_decode_str;
use tower_http::{
    services::{ServeDir, ServeFile},
    set_header::SetResponseHeaderLayer,
};
use tracing::debug;

pub const INDEX_FILE: &str = "index.html";
pub const ASSETS_DIR: &str = "assets";
pub const STATIC_PREFIX: &str = "/static";

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "html", "css", "js", "mjs", "map", "json", "webmanifest", "txt", "png", "jpg", "jpeg", "gif",
    "svg", "webp", "ico", "mp3", "ogg", "wav", "woff", "woff2", "ttf",
];

pub fn site_router<S>(root: &Path, reload: bool) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let router = Router::new()
        .route_service("/", ServeFile::new(root.join(INDEX_FILE)))
        .nest_service("/assets", ServeDir::new(root.join(ASSETS_DIR)))
        .nest_service(STATIC_PREFIX, ServeDir::new(root))
        .fallback_service(ServeDir::new(root))
        .layer(from_fn(allow_listed));

    if reload {
        router.layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
    } else {
        router
    }
}

async fn allow_listed(request: Request, next: Next) -> Response {
    if !is_servable(request.uri().path()) {
        debug!("Refusing to serve {}", request.uri().path());
        return StatusCode::NOT_FOUND.into_response();
    }

    next.run(request).await
}

pub fn is_servable(path: &str) -> bool {
    if path == "/" {
        return true;
    }

    let decoded: Option<Vec<String>> = path
        .trim_start_matches('/')
        .split('/')
        .map(|segment| {
            percent_decode_str(segment)
                .decode_utf8()
                .ok()
                .map(Cow::into_owned)
        })
        .collect();

    let Some(segments) = decoded else {
        return false;
    };

    if segments.iter().any(|segment| {
        segment.is_empty() || segment.starts_with('.') || segment.contains(['/', '\\', '\0'])
    }) {
        return false;
    }

    segments
        .last()
        .and_then(|name| Path::new(name).extension())
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}
