use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    middleware,
    routing::{get, post},
};
use serde_json::Value;
use tracing::debug;

use crate::{
    common::HanabiError,
    interop::{
        PeerCall,
        envelope::{Payload, http_reply},
        http::{ROUTES, Route, STATES_PATH},
    },
    transport::{
        AppState,
        middleware::{add_response_headers, check_auth},
        websocket_server::websocket_handler,
    },
};

pub const INTEROP_PATH: &str = "/interop";

pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route(STATES_PATH, get(voice_states))
        .route(INTEROP_PATH, get(websocket_handler));

    for route in ROUTES {
        router = router.route(
            route.path,
            post(
                move |State(state): State<Arc<AppState>>,
                      body: Result<Json<Payload>, JsonRejection>| async move {
                    operation(state, route, body).await
                },
            ),
        );
    }

    router
        .layer(middleware::from_fn_with_state(state.clone(), check_auth))
        .layer(middleware::from_fn_with_state(state.clone(), add_response_headers))
        .with_state(state)
}

async fn operation(
    state: Arc<AppState>,
    route: &'static Route,
    body: Result<Json<Payload>, JsonRejection>,
) -> Json<Value> {
    let reply = match body {
        Ok(Json(body)) => state.interop.dispatch_route(route, body).await,
        Err(rejection) => {
            debug!("Rejected body on {}: {}", route.path, rejection);
            http_reply(Err(HanabiError::MalformedRequest(rejection.body_text())))
        }
    };
    Json(Value::Object(reply))
}

async fn voice_states(State(state): State<Arc<AppState>>) -> Json<Value> {
    let result = PeerCall::States.execute(state.interop.manager()).await;
    Json(Value::Object(http_reply(result)))
}
