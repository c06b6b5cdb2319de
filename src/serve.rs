//! Mounts a synchronous application on axum.
//!
//! Each request runs on the blocking pool from environ construction to the last body
//! chunk, so per-request registry frames are pushed and popped on one thread.

use crate::error::AppError;
use crate::wsgi::{BoxedApp, CollectedResponse, Environ, WsgiResponse};
use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;

/// Largest request body handed to the application.
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    name: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /_health` plus every other request forwarded to `app`.
pub fn router(app: BoxedApp) -> Router {
    router_with_limit(app, DEFAULT_BODY_LIMIT)
}

pub fn router_with_limit(app: BoxedApp, limit: usize) -> Router {
    Router::new()
        .route("/_health", get(health))
        .fallback(move |request: Request| {
            let app = app.clone();
            async move { forward(app, request, limit).await }
        })
        .layer(RequestBodyLimitLayer::new(limit))
}

async fn forward(app: BoxedApp, request: Request, limit: usize) -> Response {
    let (parts, body) = request.into_parts();
    let input = match to_bytes(body, limit).await {
        Ok(input) => input,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting request body");
            return AppError::http(StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };
    let mut environ = environ_from(&parts);
    environ.input = input;

    let outcome = tokio::task::spawn_blocking(move || app.call(&mut environ).and_then(WsgiResponse::collect)).await;
    match outcome {
        Ok(Ok(collected)) => into_http(collected),
        Ok(Err(e)) => {
            tracing::error!(error = %e, chain = ?e.chain(), "unhandled application error");
            e.into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "application task failed");
            AppError::Controller("application task failed".into()).into_response()
        }
    }
}

fn environ_from(parts: &Parts) -> Environ {
    let target = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let mut environ = Environ::new(parts.method.clone(), target);
    environ.headers = parts.headers.clone();
    if let Some(scheme) = parts.uri.scheme_str() {
        environ.url_scheme = scheme.to_string();
    }
    let host = parts
        .uri
        .authority()
        .map(|a| a.as_str().to_string())
        .or_else(|| environ.header("host").map(str::to_string));
    if let Some(host) = host {
        match host.rsplit_once(':').map(|(name, port)| (name, port.parse::<u16>())) {
            Some((name, Ok(port))) => {
                environ.server_name = name.to_string();
                environ.server_port = port;
            }
            _ => environ.server_name = host,
        }
    }
    environ
}

fn into_http(collected: CollectedResponse) -> Response {
    let mut builder = axum::http::Response::builder().status(collected.status);
    for (name, value) in &collected.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(Body::from(collected.body)).unwrap_or_else(|e| {
        tracing::error!(error = %e, "application returned an invalid response head");
        AppError::Controller("invalid response head".into()).into_response()
    })
}
