//! Route handlers for the control socket.
//!
//! Every handler turns its failures into a status code; nothing here can
//! take the server down.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, error, info, warn};

use super::server::{ControlState, NO_LOG_CONTENT};
use super::types::{ErrorResponse, LogSentResponse, LogViewResponse, ReloadResponse};
use crate::auth::DeactivationDecision;
use crate::daemon::DnsBinding;
use crate::reload::ReloadOutcome;
use crate::remote::LogsRequest;

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

pub(super) async fn list_clients(State(state): State<Arc<ControlState>>) -> Response {
    let include_counts = state.include_query_counts();

    let mut clients = state.clients.list();
    clients.sort_by_key(|c| c.ip);

    if include_counts {
        for client in &mut clients {
            client.include_query_count = true;
            match state
                .metrics
                .query_count(client.ip, &client.mac, &client.hostname)
            {
                Ok(count) => client.query_count = Some(count),
                Err(e) => debug!(ip = %client.ip, error = %e, "no query count for client"),
            }
        }
    }

    match serde_json::to_vec(&clients) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode client list");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub(super) async fn started(State(state): State<Arc<ControlState>>) -> Response {
    match state.started.wait(state.timeouts.started).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!(error = %e, "daemon not started");
            error_response(StatusCode::REQUEST_TIMEOUT, e.to_string())
        }
    }
}

pub(super) async fn reload(State(state): State<Arc<ControlState>>) -> Response {
    info!("reload requested via control socket");
    match state.reload.reload().await {
        Ok(ReloadOutcome::Unchanged) => {
            (StatusCode::OK, Json(ReloadResponse { changes: vec![] })).into_response()
        }
        Ok(ReloadOutcome::RestartRequired(changes)) => {
            (StatusCode::CREATED, Json(ReloadResponse { changes })).into_response()
        }
        Err(e) => {
            error!(error = %e, "reload failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub(super) async fn deactivation(State(state): State<Arc<ControlState>>, body: Bytes) -> Response {
    match state.auth.authorize(&body).await {
        DeactivationDecision::Allow(reason) => {
            info!(?reason, "deactivation allowed");
            StatusCode::OK.into_response()
        }
        DeactivationDecision::PinOmitted => {
            warn!("deactivation refused, pin required");
            error_response(StatusCode::BAD_REQUEST, "deactivation pin required")
        }
        DeactivationDecision::PinMismatch => {
            warn!("deactivation refused, wrong pin");
            error_response(StatusCode::FORBIDDEN, "wrong deactivation pin")
        }
        DeactivationDecision::Malformed => {
            error_response(StatusCode::PRECONDITION_FAILED, "invalid deactivation request")
        }
    }
}

pub(super) async fn identity(State(state): State<Arc<ControlState>>) -> Response {
    match state.auth.device_id() {
        Some(id) => (StatusCode::OK, Json(id)).into_response(),
        None => error_response(StatusCode::BAD_REQUEST, "no device identifier configured"),
    }
}

pub(super) async fn interface(State(state): State<Arc<ControlState>>) -> Response {
    if state.interactive {
        return error_response(
            StatusCode::BAD_REQUEST,
            "daemon is running interactively, DNS is not bound",
        );
    }

    match state.dns_binding.wait(state.timeouts.interface).await {
        Ok(DnsBinding::Bound { interface }) => (StatusCode::OK, Json(interface)).into_response(),
        Ok(DnsBinding::Failed { reason }) => error_response(StatusCode::BAD_REQUEST, reason),
        Err(e) => {
            warn!(error = %e, "DNS binding not reported");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

pub(super) async fn view_logs(State(state): State<Arc<ControlState>>) -> Response {
    let bundle = match state.log_source().read().await {
        Ok(bundle) => bundle,
        Err(e) => {
            error!(error = %e, "failed to read logs");
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };
    if bundle.is_empty() {
        return NO_LOG_CONTENT.into_response();
    }

    (
        StatusCode::OK,
        Json(LogViewResponse {
            data: bundle.to_text(),
        }),
    )
        .into_response()
}

pub(super) async fn send_logs(State(state): State<Arc<ControlState>>) -> Response {
    // Dropped on the early returns below, which frees the slot again.
    let permit = match state.throttle.try_acquire() {
        Ok(permit) => permit,
        Err(throttled) => {
            debug!(retry_after = ?throttled.retry_after, "log upload throttled");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, throttled.to_string());
        }
    };

    let bundle = match state.log_source().read().await {
        Ok(bundle) => bundle,
        Err(e) => {
            error!(error = %e, "failed to read logs");
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };
    if bundle.is_empty() {
        return NO_LOG_CONTENT.into_response();
    }

    let size = bundle.len();
    let request = LogsRequest {
        uid: state.auth.device_id().unwrap_or_default().to_string(),
        log_file: STANDARD.encode(bundle.as_bytes()),
    };
    let result = state.remote.send_logs(&request).await;
    permit.commit();

    match result {
        Ok(()) => {
            info!(size, "logs sent");
            (StatusCode::OK, Json(LogSentResponse { size, error: None })).into_response()
        }
        Err(e) => {
            error!(size, error = %e, "failed to send logs");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LogSentResponse {
                    size,
                    error: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}
