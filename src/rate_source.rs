// Remote exchange-rate source.
// A single GET against a public rates API, parameterized by the base currency.

use crate::config::CurrencyConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateSourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    #[error("Malformed rates payload: {0}")]
    Payload(String),

    #[error("Rate source reported an error: {0}")]
    Rejected(String),

    #[error("Client error: {0}")]
    Client(String),
}

// Body returned by the rates API. Only `rates` is required.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RemoteRates {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub base_code: Option<String>,
    #[serde(default, rename = "error-type")]
    pub error_type: Option<String>,
    pub rates: HashMap<String, f64>,
}

impl RemoteRates {
    /// Extracts the rate map, turning an explicit error result or an empty map
    /// into a [`RateSourceError`].
    pub fn into_rates(self) -> Result<HashMap<String, f64>, RateSourceError> {
        if self.result.as_deref() == Some("error") {
            return Err(RateSourceError::Rejected(
                self.error_type.unwrap_or_else(|| "unknown".to_string()),
            ));
        }
        if self.rates.is_empty() {
            return Err(RateSourceError::Payload("empty rates".to_string()));
        }
        Ok(self.rates)
    }
}

#[async_trait]
pub trait RateSource: Send + Sync {
    // Latest rates for converting one unit of `base` into each listed currency
    async fn fetch_rates(&self, base: &str) -> Result<RemoteRates, RateSourceError>;
}

// open.er-api.com style endpoint: GET {endpoint}/{base}
pub struct ErApiRateSource {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl ErApiRateSource {
    pub fn new(config: &CurrencyConfig) -> Result<Self, RateSourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| RateSourceError::Client(err.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.rates_endpoint.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
        })
    }

    pub fn url_for(&self, base: &str) -> String {
        format!("{}/{}", self.endpoint, base)
    }

    fn map_transport_error(&self, err: reqwest::Error) -> RateSourceError {
        if err.is_timeout() {
            RateSourceError::Timeout(self.timeout.as_millis() as u64)
        } else {
            RateSourceError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl RateSource for ErApiRateSource {
    async fn fetch_rates(&self, base: &str) -> Result<RemoteRates, RateSourceError> {
        let response = self
            .client
            .get(self.url_for(base))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| self.map_transport_error(err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RateSourceError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|err| self.map_transport_error(err))?;

        serde_json::from_str::<RemoteRates>(&body)
            .map_err(|err| RateSourceError::Payload(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    // Serves a single canned HTTP response and reports the request line it saw
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let request_line = request.lines().next().unwrap_or_default().to_string();
            let _ = tx.send(request_line);

            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        (format!("http://{}/v6/latest", addr), rx)
    }

    fn source_for(endpoint: String, timeout: Duration) -> ErApiRateSource {
        let config = CurrencyConfig {
            rates_endpoint: endpoint,
            request_timeout: timeout,
            ..CurrencyConfig::default()
        };
        ErApiRateSource::new(&config).unwrap()
    }

    #[test]
    fn test_payload_parsing() {
        let body = r#"{"result":"success","base_code":"THB","time_last_update_unix":1717200000,
            "rates":{"THB":1,"USD":0.0272,"EUR":0.0251}}"#;
        let payload: RemoteRates = serde_json::from_str(body).unwrap();
        assert_eq!(payload.base_code.as_deref(), Some("THB"));

        let rates = payload.into_rates().unwrap();
        assert_eq!(rates["USD"], 0.0272);
        assert_eq!(rates.len(), 3);
    }

    #[test]
    fn test_payload_without_rates_is_rejected() {
        assert!(serde_json::from_str::<RemoteRates>(r#"{"result":"success"}"#).is_err());

        let error_body = r#"{"result":"error","error-type":"unsupported-code","rates":{}}"#;
        let payload: RemoteRates = serde_json::from_str(error_body).unwrap();
        assert!(matches!(
            payload.into_rates(),
            Err(RateSourceError::Rejected(kind)) if kind == "unsupported-code"
        ));

        let empty: RemoteRates = serde_json::from_str(r#"{"rates":{}}"#).unwrap();
        assert!(matches!(empty.into_rates(), Err(RateSourceError::Payload(_))));
    }

    #[tokio::test]
    async fn test_fetch_rates_over_http() {
        let (endpoint, request_line) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"result":"success","base_code":"THB","rates":{"USD":0.03,"JPY":4.4}}"#,
        )
        .await;
        let source = source_for(endpoint, Duration::from_secs(5));

        let payload = source.fetch_rates("THB").await.unwrap();

        assert_eq!(payload.rates["USD"], 0.03);
        assert_eq!(payload.rates["JPY"], 4.4);
        let request_line = request_line.await.unwrap();
        assert!(
            request_line.starts_with("GET /v6/latest/THB "),
            "unexpected request line: {}",
            request_line
        );
    }

    #[tokio::test]
    async fn test_fetch_rates_non_success_status() {
        let (endpoint, _) = serve_once("HTTP/1.1 503 Service Unavailable", "{}").await;
        let source = source_for(endpoint, Duration::from_secs(5));

        let result = source.fetch_rates("THB").await;
        assert!(matches!(result, Err(RateSourceError::Status(503))));
    }

    #[tokio::test]
    async fn test_fetch_rates_malformed_body() {
        let (endpoint, _) = serve_once("HTTP/1.1 200 OK", "<html>maintenance</html>").await;
        let source = source_for(endpoint, Duration::from_secs(5));

        let result = source.fetch_rates("THB").await;
        assert!(matches!(result, Err(RateSourceError::Payload(_))));
    }

    #[tokio::test]
    async fn test_fetch_rates_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and never answer
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let source = source_for(format!("http://{}", addr), Duration::from_millis(100));
        let result = source.fetch_rates("THB").await;

        assert!(
            matches!(result, Err(RateSourceError::Timeout(100))),
            "expected timeout, got {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_fetch_rates_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = source_for(format!("http://{}", addr), Duration::from_secs(2));
        let result = source.fetch_rates("THB").await;
        assert!(matches!(result, Err(RateSourceError::Network(_))));
    }
}
