//! Client registration (HTTP).
//!
//! `POST <server>/v1/clients` with an empty body; the server answers with a
//! JSON object carrying at least `{"Id": "<client-id>"}`.

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use eventsocket_core::error::{EventSocketError, Result};

#[derive(Debug, Deserialize)]
struct Registration {
    #[serde(rename = "Id")]
    id: String,
}

pub async fn register(http: &reqwest::Client, url: &str) -> Result<String> {
    let resp = http
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .body("")
        .send()
        .await
        .map_err(|e| EventSocketError::Registration(format!("post {url} failed: {e}")))?
        .error_for_status()
        .map_err(|e| EventSocketError::Registration(format!("post {url} rejected: {e}")))?;

    let body = resp
        .bytes()
        .await
        .map_err(|e| EventSocketError::Registration(format!("read body failed: {e}")))?;

    let id = parse_registration(&body)?;
    tracing::debug!(client_id = %id, "registered");
    Ok(id)
}

/// Extract the client id from a registration response body.
pub fn parse_registration(body: &[u8]) -> Result<String> {
    let reg: Registration = serde_json::from_slice(body)
        .map_err(|e| EventSocketError::Registration(format!("invalid body: {e}")))?;
    if reg.id.trim().is_empty() {
        return Err(EventSocketError::Registration("empty client id".into()));
    }
    Ok(reg.id)
}
