use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::transport::AppState;

pub async fn check_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok());

    match auth_header {
        Some(auth) if auth == state.password => Ok(next.run(req).await),
        Some(_) => {
            warn!("Peer authorization failed: invalid password on {}", req.uri());
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Peer authorization failed: missing Authorization header on {}", req.uri());
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Tags every response with the answering process' fleet name.
pub async fn add_response_headers(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;
    if let Ok(name) = HeaderValue::from_str(state.interop.manager().name()) {
        response.headers_mut().insert("Hanabi-Process", name);
    }
    response
}
