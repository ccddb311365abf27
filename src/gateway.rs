use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Mode;
use crate::error::{BridgeError, Result};

pub const TRANSLATE_BATCH: &str = "translate batch";
pub const TRANSLATE_SENTENCES: &str = "translate sentences";
pub const CLOSE_SERVER: &str = "close server";

/// Text to translate. `batch_texts` is ignored by an external server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationRequest {
    pub primary_text: String,
    pub batch_texts: Vec<String>,
}

impl TranslationRequest {
    pub fn single<S: Into<String>>(text: S) -> Self {
        Self {
            primary_text: text.into(),
            batch_texts: Vec::new(),
        }
    }

    pub fn batch<S: Into<String>>(primary_text: S, batch_texts: Vec<String>) -> Self {
        Self {
            primary_text: primary_text.into(),
            batch_texts,
        }
    }

    /// The batch actually sent; an empty batch means just the primary text
    pub fn effective_batch(&self) -> Vec<String> {
        if self.batch_texts.is_empty() {
            vec![self.primary_text.clone()]
        } else {
            self.batch_texts.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationResult {
    /// One translation per batch entry, in batch order
    Batch(Vec<String>),
    Single(String),
}

impl TranslationResult {
    pub fn into_texts(self) -> Vec<String> {
        match self {
            Self::Batch(texts) => texts,
            Self::Single(text) => vec![text],
        }
    }
}

/// JSON body understood by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<Vec<String>>,
    pub message: String,
}

impl WireRequest {
    pub fn for_mode(mode: Mode, request: &TranslationRequest) -> Self {
        match mode {
            Mode::Managed => Self {
                content: request.primary_text.clone(),
                batch: Some(request.effective_batch()),
                message: TRANSLATE_BATCH.to_string(),
            },
            Mode::External => Self {
                content: request.primary_text.clone(),
                batch: None,
                message: TRANSLATE_SENTENCES.to_string(),
            },
        }
    }

    pub fn close_server() -> Self {
        Self {
            content: String::new(),
            batch: None,
            message: CLOSE_SERVER.to_string(),
        }
    }
}

/// Serialized request ready to be POSTed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub url: String,
    pub body: String,
}

/// Turn a raw server response into a result for `mode`
pub fn extract_translation(mode: Mode, request: &TranslationRequest, raw: &str) -> Result<TranslationResult> {
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        BridgeError::backend(format!("Invalid JSON from translation server: {}", e), raw)
    })?;

    match mode {
        Mode::Managed => {
            let expected = request.effective_batch().len();
            let texts: Vec<String> = serde_json::from_value(value).map_err(|_| {
                BridgeError::backend(
                    format!("unexpected response shape: expected an array of {} strings", expected),
                    raw,
                )
            })?;

            if texts.len() != expected {
                return Err(BridgeError::backend(
                    format!(
                        "unexpected response shape: expected {} translations, got {}",
                        expected,
                        texts.len()
                    ),
                    raw,
                ));
            }

            Ok(TranslationResult::Batch(texts))
        }
        Mode::External => match value {
            Value::String(text) => Ok(TranslationResult::Single(text)),
            _ => Err(BridgeError::backend(
                format!("unexpected response shape: expected a string, server returned {}", raw),
                raw,
            )),
        },
    }
}

/// Speaks the server's JSON protocol. Holds no state besides mode and URL; never retries.
pub struct TranslationGateway {
    client: Client,
    mode: Mode,
    endpoint: String,
}

impl TranslationGateway {
    pub fn new<S: Into<String>>(mode: Mode, endpoint: S, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            mode,
            endpoint: endpoint.into(),
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn prepare(&self, request: &TranslationRequest) -> Result<PreparedRequest> {
        let body = serde_json::to_string(&WireRequest::for_mode(self.mode, request))?;

        Ok(PreparedRequest {
            url: self.endpoint.clone(),
            body,
        })
    }

    pub fn extract(&self, request: &TranslationRequest, raw: &str) -> Result<TranslationResult> {
        extract_translation(self.mode, request, raw)
    }

    /// POST a prepared request and return the raw response body
    pub async fn send(&self, prepared: &PreparedRequest, cancel: &CancellationToken) -> Result<String> {
        debug!("Sending translation request to: {}", prepared.url);

        let exchange = async {
            let response = self
                .client
                .post(&prepared.url)
                .header(CONTENT_TYPE, "application/json")
                .header(ACCEPT, "*/*")
                .body(prepared.body.clone())
                .send()
                .await
                .map_err(|e| BridgeError::backend(format!("HTTP request failed: {}", e), ""))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| BridgeError::backend(format!("Failed to read response: {}", e), ""))?;

            if !status.is_success() {
                return Err(BridgeError::backend(format!("Translation server returned {}", status), body));
            }

            Ok::<_, BridgeError>(body)
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            result = exchange => result,
        }
    }

    pub async fn translate(&self, request: &TranslationRequest, cancel: &CancellationToken) -> Result<TranslationResult> {
        let prepared = self.prepare(request)?;
        let raw = self.send(&prepared, cancel).await?;

        self.extract(request, &raw)
    }

    /// Ask the server to shut itself down. Best effort, bounded by `timeout`.
    pub async fn request_close(&self, timeout: Duration) -> Result<()> {
        let body = serde_json::to_string(&WireRequest::close_server())?;

        self.client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "*/*")
            .timeout(timeout)
            .body(body)
            .send()
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn gateway(mode: Mode, server: &MockServer) -> TranslationGateway {
        TranslationGateway::new(mode, server.url("/"), Duration::from_secs(5)).unwrap()
    }

    fn strings(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|text| text.to_string()).collect()
    }

    #[test]
    fn test_managed_wire_request() {
        let request = TranslationRequest::batch("こんにちは", strings(&["こんにちは", "ありがとう"]));
        let wire = serde_json::to_value(WireRequest::for_mode(Mode::Managed, &request)).unwrap();

        assert_eq!(
            wire,
            json!({
                "content": "こんにちは",
                "batch": ["こんにちは", "ありがとう"],
                "message": "translate batch"
            })
        );
    }

    #[test]
    fn test_external_wire_request_never_has_batch() {
        let request = TranslationRequest::batch("こんにちは", strings(&["こんにちは", "ありがとう"]));
        let wire = serde_json::to_value(WireRequest::for_mode(Mode::External, &request)).unwrap();

        assert_eq!(wire, json!({"content": "こんにちは", "message": "translate sentences"}));
    }

    #[test]
    fn test_empty_batch_sends_primary_text() {
        let request = TranslationRequest::single("ありがとう");
        let wire = WireRequest::for_mode(Mode::Managed, &request);
        assert_eq!(wire.batch, Some(strings(&["ありがとう"])));
    }

    #[test]
    fn test_extract_batch_length_mismatch() {
        let request = TranslationRequest::batch("a", strings(&["a", "b"]));
        let err = extract_translation(Mode::Managed, &request, r#"["A"]"#).unwrap_err();

        assert!(err.to_string().contains("unexpected response shape"));
        assert_eq!(err.payload(), Some(r#"["A"]"#));
    }

    #[test]
    fn test_extract_batch_rejects_non_strings() {
        let request = TranslationRequest::batch("a", strings(&["a", "b"]));
        let err = extract_translation(Mode::Managed, &request, r#"["A", 2]"#).unwrap_err();
        assert!(matches!(err, BridgeError::Backend { .. }));

        let err = extract_translation(Mode::Managed, &request, r#""A""#).unwrap_err();
        assert!(matches!(err, BridgeError::Backend { .. }));
    }

    #[test]
    fn test_extract_invalid_json() {
        let err = extract_translation(Mode::External, &TranslationRequest::single("a"), "<html>").unwrap_err();
        assert_eq!(err.payload(), Some("<html>"));
    }

    #[tokio::test]
    async fn test_managed_batch_translation() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(Method::POST)
                    .path("/")
                    .header("content-type", "application/json")
                    .header("accept", "*/*")
                    .json_body(json!({
                        "content": "こんにちは",
                        "batch": ["こんにちは", "ありがとう"],
                        "message": "translate batch"
                    }));
                then.status(200).body(r#"["Hello", "Thank you"]"#);
            })
            .await;

        let request = TranslationRequest::batch("こんにちは", strings(&["こんにちは", "ありがとう"]));
        let result = gateway(Mode::Managed, &server)
            .translate(&request, &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result, TranslationResult::Batch(strings(&["Hello", "Thank you"])));
    }

    #[tokio::test]
    async fn test_batch_order_follows_input_order() {
        let translate = |text: &str| format!("<{}>", text);
        let orders = [
            ["一", "二", "三"],
            ["三", "一", "二"],
            ["二", "三", "一"],
            ["三", "二", "一"],
        ];

        let server = MockServer::start_async().await;
        for order in &orders {
            let translated: Vec<String> = order.iter().map(|text| translate(*text)).collect();
            server
                .mock_async(|when, then| {
                    when.method(Method::POST).path("/").json_body(json!({
                        "content": order[0],
                        "batch": order,
                        "message": "translate batch"
                    }));
                    then.status(200).json_body(json!(translated));
                })
                .await;
        }

        let gateway = gateway(Mode::Managed, &server);
        for order in &orders {
            let request = TranslationRequest::batch(order[0], strings(order));
            let texts = gateway
                .translate(&request, &CancellationToken::new())
                .await
                .unwrap()
                .into_texts();

            assert_eq!(texts.len(), order.len());
            for (source, target) in order.iter().zip(&texts) {
                assert_eq!(target, &translate(*source));
            }
        }
    }

    #[tokio::test]
    async fn test_external_sentence_translation() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(Method::POST)
                    .path("/")
                    .json_body(json!({"content": "こんにちは", "message": "translate sentences"}));
                then.status(200).body(r#""Hello""#);
            })
            .await;

        let request = TranslationRequest::batch("こんにちは", strings(&["こんにちは", "ありがとう"]));
        let result = gateway(Mode::External, &server)
            .translate(&request, &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result, TranslationResult::Single("Hello".to_string()));
    }

    #[tokio::test]
    async fn test_external_array_response_is_backend_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::POST).path("/");
                then.status(200).body(r#"["Hello"]"#);
            })
            .await;

        let err = gateway(Mode::External, &server)
            .translate(&TranslationRequest::single("こんにちは"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("unexpected response shape"));
        assert_eq!(err.payload(), Some(r#"["Hello"]"#));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_server_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::POST).path("/");
                then.status(500).body("Internal Server Error");
            })
            .await;

        let err = gateway(Mode::Managed, &server)
            .translate(&TranslationRequest::single("こんにちは"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.payload(), Some("Internal Server Error"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_backend_error() {
        // Nothing listens on port 9 locally
        let gateway = TranslationGateway::new(Mode::External, "http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        let err = gateway
            .translate(&TranslationRequest::single("こんにちは"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Backend { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::POST).path("/");
                then.status(200).delay(Duration::from_secs(5)).body(r#""late""#);
            })
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = gateway(Mode::External, &server)
            .translate(&TranslationRequest::single("こんにちは"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled));
    }

    #[tokio::test]
    async fn test_close_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(Method::POST)
                    .path("/")
                    .json_body(json!({"content": "", "message": "close server"}));
                then.status(200);
            })
            .await;

        gateway(Mode::Managed, &server)
            .request_close(Duration::from_secs(1))
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
