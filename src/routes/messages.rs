//! `POST /api/whatsapp/send/*`: text, media and bulk sends.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::bulk::{self, BulkOptions};
use crate::dispatch::{MediaKind, MessageContent};
use crate::error::{Error, Result};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SendTextRequest {
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendMediaRequest {
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default, rename = "type")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Recipients may be strings or plain JSON numbers.
#[derive(Debug, Default, Deserialize)]
pub struct SendBulkRequest {
    #[serde(default)]
    pub recipients: Option<Vec<Value>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "type")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::invalid(rejection.body_text()))
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn unsupported_type() -> Error {
    Error::invalid(format!(
        "Invalid media type. Supported types: {}",
        MediaKind::SUPPORTED
    ))
}

/// `POST /api/whatsapp/send/text`
pub async fn send_text(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendTextRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let request = body(payload)?;
    let (Some(recipient), Some(message)) = (present(request.recipient), present(request.message))
    else {
        return Err(Error::invalid("Recipient and message are required"));
    };

    let receipt = state.dispatcher.send_text(&recipient, &message).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Message sent successfully",
        "data": {
            "recipient": receipt.recipient.to_string(),
            "messageContent": message,
            "messageId": receipt.message_id,
        },
    })))
}

/// `POST /api/whatsapp/send/media`
pub async fn send_media(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendMediaRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let request = body(payload)?;
    let (Some(recipient), Some(media_type), Some(url)) = (
        present(request.recipient),
        present(request.media_type),
        present(request.url),
    ) else {
        return Err(Error::invalid("Recipient, type and url are required"));
    };
    let kind = MediaKind::parse(&media_type).ok_or_else(unsupported_type)?;

    let content = MessageContent::media(kind, url.clone(), present(request.caption));
    let receipt = state.dispatcher.send_message(&recipient, &content).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("{} message sent successfully", kind.as_str()),
        "data": {
            "recipient": receipt.recipient.to_string(),
            "mediaType": kind.as_str(),
            "url": url,
            "messageId": receipt.message_id,
        },
    })))
}

/// `POST /api/whatsapp/send/bulk`
pub async fn send_bulk(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendBulkRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let request = body(payload)?;
    let recipients = recipient_list(request.recipients.unwrap_or_default())?;
    let limit = state.config.bulk.max_recipients;
    if recipients.is_empty() {
        return Err(Error::invalid("Recipients must be a non-empty array"));
    }
    if recipients.len() > limit {
        return Err(Error::invalid(format!(
            "Too many recipients ({}, limit {limit})",
            recipients.len()
        )));
    }

    let kind = request
        .media_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("text"));
    let content = match kind {
        None => MessageContent::text(
            present(request.message).ok_or_else(|| Error::invalid("Message is required"))?,
        ),
        Some(name) => {
            let kind = MediaKind::parse(name).ok_or_else(unsupported_type)?;
            let url = present(request.url)
                .ok_or_else(|| Error::invalid("url is required for media messages"))?;
            MessageContent::media(kind, url, present(request.caption).or(present(request.message)))
        }
    };

    let outcomes = bulk::send_bulk(
        &state.dispatcher,
        &recipients,
        &content,
        BulkOptions::from(&state.config.bulk),
    )
    .await;
    let sent = outcomes.iter().filter(|o| o.is_sent()).count();
    let failed = outcomes.len() - sent;
    Ok(Json(json!({
        "success": true,
        "message": format!("Bulk send finished: {sent} sent, {failed} failed"),
        "results": outcomes,
        "sent": sent,
        "failed": failed,
    })))
}

fn recipient_list(values: Vec<Value>) -> Result<Vec<String>> {
    values
        .into_iter()
        .map(|value| match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(Error::invalid(format!("Invalid recipient entry: {other}"))),
        })
        .collect()
}
