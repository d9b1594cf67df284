//! Recipient spreadsheet upload and template download.

use axum::{
    extract::multipart::{Multipart, MultipartRejection},
    http::header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::error::{Error, Result};
use crate::spreadsheet::{self, TEMPLATE_FILE_NAME, XLSX_CONTENT_TYPE};

/// `POST /api/whatsapp/upload-excel`. Reads the `file` part (or the first
/// part carrying a file name) and returns the numbers in column A.
pub async fn upload_excel(
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>> {
    let mut multipart = multipart.map_err(|e| Error::invalid(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::invalid(e.body_text()))?
    {
        if field.name() != Some("file") && field.file_name().is_none() {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::invalid(e.body_text()))?;
        if bytes.is_empty() {
            return Err(Error::invalid("Uploaded file is empty"));
        }

        let numbers = spreadsheet::read_numbers(bytes.to_vec())?;
        let count = numbers.len();
        info!(file = %file_name, count, "Recipient spreadsheet parsed");
        return Ok(Json(json!({
            "success": true,
            "numbers": numbers,
            "count": count,
        })));
    }

    Err(Error::invalid("No file uploaded"))
}

/// `GET /api/whatsapp/download-template`
pub async fn download_template() -> Result<Response> {
    let workbook = spreadsheet::template()?;
    Ok((
        [
            (CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{TEMPLATE_FILE_NAME}\""),
            ),
        ],
        workbook,
    )
        .into_response())
}
