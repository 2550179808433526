//! reqwest-backed transport for HTTP relays and NIP-11 documents.

use crate::error::RelayConnectionError;
use crate::transport::HttpTransport;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, RelayConnectionError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RelayConnectionError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn read(response: reqwest::Response) -> Result<Vec<u8>, RelayConnectionError> {
        let status = response.status();
        if !status.is_success() {
            return Err(RelayConnectionError::Http(status.as_u16()));
        }
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &Url,
        body: Vec<u8>,
        authorization: Option<String>,
    ) -> Result<Vec<u8>, RelayConnectionError> {
        debug!("POST {} ({} bytes)", url, body.len());
        let mut request = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        let response = request.send().await.map_err(map_reqwest_error)?;
        Self::read(response).await
    }

    async fn get(&self, url: &Url, accept: &str) -> Result<Vec<u8>, RelayConnectionError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::read(response).await
    }
}

fn map_reqwest_error(error: reqwest::Error) -> RelayConnectionError {
    if error.is_timeout() {
        RelayConnectionError::Transport(format!("request timed out: {}", error))
    } else if error.is_connect() {
        RelayConnectionError::Connect(error.to_string())
    } else {
        RelayConnectionError::Transport(error.to_string())
    }
}
