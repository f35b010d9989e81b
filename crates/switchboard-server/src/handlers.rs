//! HTTP handlers.
//!
//! Every response uses the `{status, payload}` envelope. Malformed requests
//! and provisioning failures answer 400 with cause `"ko"`.

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use switchboard_core::{ApiResponse, SessionId};
use switchboard_telemetry::metrics::CONNECTIONS_ACTIVE;

use crate::gateway;
use crate::server::AppState;

type Reply = (StatusCode, Json<ApiResponse>);

fn ok(status: StatusCode, payload: Value) -> Reply {
    (status, Json(ApiResponse::success(payload)))
}

fn ko() -> Reply {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::failure("ko")))
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub alias: String,
}

#[derive(Debug, Deserialize)]
pub struct SignOutRequest {
    pub id: String,
}

pub async fn ping() -> Reply {
    ok(StatusCode::OK, json!("pong"))
}

/// `200` with a new session id, `202` with the id already held by the alias.
pub async fn sign_in(
    State(state): State<AppState>,
    body: Result<Json<SignInRequest>, JsonRejection>,
) -> Reply {
    let Json(request) = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "rejected sign-in request");
            return ko();
        }
    };

    match state.provisioner.sign_in(&request.alias).await {
        Ok(outcome) => {
            let status = if outcome.is_created() {
                StatusCode::OK
            } else {
                StatusCode::ACCEPTED
            };
            ok(status, json!(outcome.id().as_str()))
        }
        Err(e) => {
            tracing::warn!(alias = %request.alias, error = %e, "sign-in failed");
            ko()
        }
    }
}

/// Always `"ok"` for a well-formed request, known id or not.
pub async fn sign_out(
    State(state): State<AppState>,
    body: Result<Json<SignOutRequest>, JsonRejection>,
) -> Reply {
    let Json(request) = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "rejected sign-out request");
            return ko();
        }
    };

    let _ = state
        .provisioner
        .sign_out(&SessionId::from_raw(request.id))
        .await;
    ok(StatusCode::OK, json!("ok"))
}

pub async fn health(State(state): State<AppState>) -> Reply {
    let snapshot = state.metrics.snapshot();
    ok(
        StatusCode::OK,
        json!({
            "sessions": state.registry.len(),
            "bound": state.registry.bound_count(),
            "connections": snapshot.gauges.get(CONNECTIONS_ACTIVE).copied().unwrap_or(0),
            "counters": snapshot.counters,
            "taken_at": snapshot.taken_at,
        }),
    )
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| gateway::run_connection(socket, state.gateway))
}
