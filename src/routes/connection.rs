//! Session status, pairing and lifecycle control.

use std::time::Duration;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::AppState;

/// `GET /api/whatsapp/status`
pub async fn status(State(state): State<AppState>) -> Result<Json<Value>> {
    if !state.manager.is_initialized() {
        return Err(Error::NotInitialized);
    }
    let snapshot = state.manager.snapshot();
    Ok(Json(json!({
        "success": true,
        "connected": snapshot.connected,
        "state": snapshot.state,
        "session_id": snapshot.session_id,
        "has_qr": snapshot.has_qr,
        "reconnect_failures": snapshot.reconnect_failures,
        "connected_since_ms": snapshot.connected_since_ms,
    })))
}

/// `GET /api/whatsapp/qr`. Returns the cached pairing code or waits for the
/// next one up to `server.qr_timeout_ms`.
pub async fn qr(State(state): State<AppState>) -> Result<Json<Value>> {
    if state.manager.is_connected() {
        return Err(Error::AlreadyConnected);
    }
    let timeout_ms = state.config.server.qr_timeout_ms;
    match state
        .manager
        .pairing()
        .latest_or_next(Duration::from_millis(timeout_ms))
        .await
    {
        Some(qr) => Ok(Json(json!({"success": true, "qr": qr}))),
        None => Err(Error::Timeout(format!(
            "No QR code received within {timeout_ms} ms"
        ))),
    }
}

/// `POST /api/whatsapp/auth`. Waits for the session to open, bounded by
/// `server.auth_timeout_ms`.
pub async fn authenticate(State(state): State<AppState>) -> Result<Json<Value>> {
    let timeout = Duration::from_millis(state.config.server.auth_timeout_ms);
    let token = tokio::time::timeout(timeout, state.manager.authenticate())
        .await
        .map_err(|_| Error::Timeout("Authentication timed out, scan the QR code and retry".into()))??;
    Ok(Json(json!({"success": true, "data": token})))
}

/// `POST /api/whatsapp/connect`
pub async fn connect(State(state): State<AppState>) -> Result<Json<Value>> {
    state.manager.connect().await?;
    Ok(Json(json!({
        "success": true,
        "message": "Connection started",
        "state": state.manager.state(),
    })))
}

/// `POST /api/whatsapp/disconnect`
pub async fn disconnect(State(state): State<AppState>) -> Json<Value> {
    state.manager.disconnect().await;
    Json(json!({
        "success": true,
        "message": "Disconnected",
        "state": state.manager.state(),
    }))
}
