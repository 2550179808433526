//! NIP-11 relay information documents.

use crate::endpoint::{EndpointId, EndpointRegistry};
use crate::error::{ClientError, RelayConnectionError, Result};
use crate::transport::HttpTransport;
use nostr::{RELAY_INFO_ACCEPT_HEADER, RelayInformationDocument};
use tracing::{debug, info};
use url::Url;

/// HTTP URL serving the information document for `relay`.
pub fn info_url(relay: &Url) -> Result<Url> {
    let scheme = match relay.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    };
    let mut url = relay.clone();
    url.set_scheme(scheme)
        .map_err(|_| ClientError::InvalidUrl(format!("cannot map {} to http", relay)))?;
    Ok(url)
}

pub async fn fetch_relay_info(
    http: &dyn HttpTransport,
    relay: &Url,
) -> Result<RelayInformationDocument> {
    let url = info_url(relay)?;
    debug!("Fetching relay information from {}", url);
    let body = http.get(&url, RELAY_INFO_ACCEPT_HEADER).await?;
    serde_json::from_slice(&body).map_err(|e| {
        RelayConnectionError::Protocol(format!("invalid relay information: {}", e)).into()
    })
}

/// Fetch and record the document for one endpoint. Limits and the auth
/// requirement it announces apply to later broadcasts and queries.
pub async fn refresh_endpoint_info(
    registry: &EndpointRegistry,
    http: &dyn HttpTransport,
    id: EndpointId,
) -> Result<RelayInformationDocument> {
    let endpoint = registry
        .get(id)
        .ok_or_else(|| ClientError::UnknownEndpoint(id.to_string()))?;
    let doc = fetch_relay_info(http, endpoint.url()).await?;
    info!(
        "{} supports NIPs {:?} (auth required: {})",
        endpoint.url(),
        doc.supported_nips,
        doc.auth_required()
    );
    registry.apply_info(id, doc.clone())?;
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RelayEndpointConfig;
    use crate::mock::MockHttp;

    const DOC: &str = r#"{
        "name": "test relay",
        "supported_nips": [1, 11, 42],
        "limitation": {"auth_required": true, "max_message_length": 4096}
    }"#;

    #[test]
    fn test_info_url_maps_scheme() {
        let url = Url::parse("wss://relay.test/path").unwrap();
        assert_eq!(info_url(&url).unwrap().as_str(), "https://relay.test/path");
        let url = Url::parse("ws://localhost:7000").unwrap();
        assert_eq!(info_url(&url).unwrap().as_str(), "http://localhost:7000/");
    }

    #[tokio::test]
    async fn test_refresh_marks_auth_required() {
        let mut registry = EndpointRegistry::default();
        let id = registry.add(RelayEndpointConfig::new("wss://relay.test")).unwrap();
        let http = MockHttp::unused().with_document("https://relay.test/", DOC);

        let doc = refresh_endpoint_info(&registry, &http, id).await.unwrap();
        assert_eq!(doc.name.as_deref(), Some("test relay"));

        let endpoint = registry.get(id).unwrap();
        assert!(endpoint.auth_required());
        assert_eq!(endpoint.limitation().unwrap().max_message_length, Some(4096));
    }

    #[tokio::test]
    async fn test_fetch_missing_document() {
        let url = Url::parse("wss://relay.test").unwrap();
        let err = fetch_relay_info(&MockHttp::unused(), &url).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Connection(RelayConnectionError::Http(404))
        ));
    }

    #[tokio::test]
    async fn test_fetch_invalid_document() {
        let url = Url::parse("wss://relay.test").unwrap();
        let http = MockHttp::unused().with_document("https://relay.test/", "not json");
        let err = fetch_relay_info(&http, &url).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Connection(RelayConnectionError::Protocol(_))
        ));
    }
}
