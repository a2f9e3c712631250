use async_trait::async_trait;
use atomic_core::{AtomicError, HttpClient, HttpResponse};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, instrument};

use crate::error::NetError;

/// [`HttpClient`] backed by reqwest.
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    http: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured reqwest client, e.g. with timeouts or a proxy.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, NetError> {
    let invalid = |name: &str, reason: String| NetError::InvalidHeader {
        name: name.to_string(),
        reason,
    };
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(name, e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| invalid(name, e.to_string()))?;
        map.insert(header, value);
    }
    Ok(map)
}

async fn read_response(response: reqwest::Response) -> Result<HttpResponse, NetError> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    debug!(status, "received response");
    Ok(HttpResponse::new(status, body))
}

#[async_trait]
impl HttpClient for ReqwestClient {
    #[instrument(skip(self, headers))]
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, AtomicError> {
        let response = self
            .http
            .get(url)
            .headers(header_map(headers)?)
            .send()
            .await
            .map_err(NetError::from)?;
        Ok(read_response(response).await?)
    }

    #[instrument(skip(self, headers, body))]
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Result<HttpResponse, AtomicError> {
        let response = self
            .http
            .post(url)
            .headers(header_map(headers)?)
            .body(body)
            .send()
            .await
            .map_err(NetError::from)?;
        Ok(read_response(response).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_headers() {
        let bad = vec![("bad header".to_string(), "x".to_string())];
        assert!(matches!(
            header_map(&bad),
            Err(NetError::InvalidHeader { ref name, .. }) if name == "bad header"
        ));

        let good = vec![("x-atomic-agent".to_string(), "https://a".to_string())];
        assert_eq!(header_map(&good).unwrap()["x-atomic-agent"], "https://a");
    }
}
