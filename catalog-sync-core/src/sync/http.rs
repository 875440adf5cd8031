//! HTTP transport for catalogsync-server.
//!
//! A changeset is posted as `multipart/form-data` to
//! `{server_url}/roots/{root_id}/changeset`:
//!
//! 1. `root_id` – text
//! 2. `changeset` – the JSON structured diff
//! 3. one binary part per pending asset, named by its symbolic key
//!
//! The server answers with the JSON canonical tree.

use std::future::Future;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::error::{FieldError, TransportError};
use super::transport::Transport;
use crate::envelope::{TransportEnvelope, CHANGESET_FIELD, ROOT_ID_FIELD};
use crate::identity::ServerId;
use crate::model::Root;
use crate::wire::CanonicalTree;

#[derive(Debug, Deserialize)]
struct ValidationBody {
    errors: Vec<FieldError>,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    server_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(server_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            server_url: server_url.into(),
            api_key,
        }
    }

    /// Like [`new`](Self::new) with a per-request timeout.
    pub fn with_timeout(
        server_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            server_url: server_url.into(),
            api_key,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Fetches the stored tree for a root.
    pub async fn fetch_root(&self, root_id: &ServerId) -> Result<Root, TransportError> {
        let url = build_http_url(&self.server_url, &format!("/roots/{}", root_id));
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response).await?;
        response
            .json::<Root>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn post_changeset(
        &self,
        envelope: TransportEnvelope,
    ) -> Result<CanonicalTree, TransportError> {
        let url = build_http_url(
            &self.server_url,
            &format!("/roots/{}/changeset", envelope.root_id),
        );
        let form = envelope_form(envelope)?;

        tracing::debug!(url = %url, "posting changeset");
        let response = self
            .authorize(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response).await?;
        response
            .json::<CanonicalTree>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }
}

impl Transport for HttpTransport {
    fn submit(
        &self,
        envelope: TransportEnvelope,
    ) -> impl Future<Output = Result<CanonicalTree, TransportError>> + Send {
        self.post_changeset(envelope)
    }
}

/// Lays the envelope out as multipart parts.
pub fn envelope_form(envelope: TransportEnvelope) -> Result<Form, TransportError> {
    let changeset = Part::text(envelope.structured_diff)
        .mime_str("application/json")
        .map_err(|e| TransportError::Decode(e.to_string()))?;

    let mut form = Form::new()
        .text(ROOT_ID_FIELD, envelope.root_id.to_string())
        .part(CHANGESET_FIELD, changeset);

    for (key, bytes) in envelope.binary_parts {
        let part = Part::bytes(bytes).file_name(key.clone());
        form = form.part(key, part);
    }
    Ok(form)
}

/// Probes `GET /health`.
pub async fn check_server(server_url: &str) -> bool {
    let url = build_http_url(server_url, "/health");
    match reqwest::get(&url).await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "health check failed");
            false
        }
    }
}

fn build_http_url(server_url: &str, path: &str) -> String {
    let base_url = if server_url.starts_with("http://") || server_url.starts_with("https://") {
        server_url.to_string()
    } else {
        format!("http://{}", server_url)
    };

    format!("{}{}", base_url.trim_end_matches('/'), path)
}

fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> TransportError {
    match status {
        StatusCode::CONFLICT => TransportError::Conflict(body.to_string()),
        StatusCode::UNPROCESSABLE_ENTITY => match serde_json::from_str::<ValidationBody>(body) {
            Ok(parsed) => TransportError::Validation(parsed.errors),
            Err(_) => TransportError::Validation(vec![FieldError::new("changeset", body)]),
        },
        _ => TransportError::Server {
            status: status.as_u16(),
            message: body.to_string(),
        },
    }
}
