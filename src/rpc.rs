use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::multipart::Form;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::document::Document;
use crate::endpoint::{Credentials, Endpoint};

const ERROR_BODY_SNIPPET_LEN: usize = 200;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RpcDefaults;

impl RpcDefaults {
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Where RPC requests are posted.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStyle {
    /// `POST <base>/<method>`.
    #[default]
    Templated,
    /// `POST <base>`; the configured URL already names the method.
    Fixed,
}

#[derive(Clone, Debug)]
pub struct RpcClientOptions {
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub endpoint_style: EndpointStyle,
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            call_timeout: RpcDefaults::CALL_TIMEOUT,
            connect_timeout: RpcDefaults::CONNECT_TIMEOUT,
            endpoint_style: EndpointStyle::default(),
        }
    }
}

/// Form parameters for one RPC call.
///
/// Values are sent as individual text fields; arrays of scalars are joined
/// with commas, which is how the node reads list parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Authenticated HTTP client for the node's RPC interface.
///
/// Every call is a single attempt; failures are returned to the caller as-is.
#[derive(Clone, Debug)]
pub struct RpcClient {
    http: Client,
    endpoint: Endpoint,
    credentials: Credentials,
    call_timeout: Duration,
    endpoint_style: EndpointStyle,
}

impl RpcClient {
    pub fn new(endpoint: Endpoint, credentials: Credentials) -> Result<Self, reqwest::Error> {
        Self::with_options(endpoint, credentials, RpcClientOptions::default())
    }

    pub fn with_options(
        endpoint: Endpoint,
        credentials: Credentials,
        options: RpcClientOptions,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint,
            credentials,
            call_timeout: options.call_timeout,
            endpoint_style: options.endpoint_style,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Invokes `method` with `params` and returns the parsed response.
    pub async fn call(&self, method: &str, params: &Params) -> Result<Document, RpcError> {
        self.send(method, params).await.map(|(_, document)| document)
    }

    pub async fn call_no_params(&self, method: &str) -> Result<Document, RpcError> {
        self.call(method, &Params::new()).await
    }

    /// Invokes `method` and decodes the response into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &Params,
    ) -> Result<T, RpcError> {
        let (status, document) = self.send(method, params).await?;
        document
            .deserialize()
            .map_err(|source| RpcError::Protocol {
                method: method.to_string(),
                status,
                body: snippet(document.raw()),
                source,
            })
    }

    fn url_for(&self, method: &str) -> String {
        match self.endpoint_style {
            EndpointStyle::Templated => self.endpoint.rpc_url(method),
            EndpointStyle::Fixed => self.endpoint.base_url().to_string(),
        }
    }

    async fn send(&self, method: &str, params: &Params) -> Result<(StatusCode, Document), RpcError> {
        let form = encode_fields(method, params)?
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value));

        let url = self.url_for(method);
        let started = Instant::now();
        debug!(event = "rpc_call_started", method, fields = params.len());

        let response = self
            .http
            .post(&url)
            .timeout(self.call_timeout)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, self.credentials.authorization_header())
            .multipart(form)
            .send()
            .await
            .map_err(|source| self.transport_error(method, source))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| self.transport_error(method, source))?;

        debug!(
            event = "rpc_call_completed",
            method,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64
        );

        let document = classify_response(method, status, body)?;
        Ok((status, document))
    }

    fn transport_error(&self, method: &str, source: reqwest::Error) -> RpcError {
        RpcError::Transport {
            method: method.to_string(),
            host: self.endpoint.host().to_string(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    /// A parameter could not be turned into a form field; nothing was sent.
    #[error("cannot encode field `{field}` for {method}: {reason}")]
    Encoding {
        method: String,
        field: String,
        reason: String,
    },

    #[error("call to {method} on {host} failed: {source}")]
    Transport {
        method: String,
        host: String,
        #[source]
        source: reqwest::Error,
    },

    /// The node answered with a structured `{"error": "..."}` body.
    #[error("node rejected {method} ({status}): {message}")]
    Application {
        method: String,
        status: StatusCode,
        message: String,
    },

    /// The response body was not the JSON the protocol promises.
    ///
    /// An error status whose body is valid JSON but lacks a string `error`
    /// field (`{}`, for instance) lands here rather than in
    /// [`RpcError::Application`] with an empty message.
    #[error("unexpected response to {method} ({status}): {body}")]
    Protocol {
        method: String,
        status: StatusCode,
        body: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcError {
    pub fn method(&self) -> &str {
        match self {
            Self::Encoding { method, .. }
            | Self::Transport { method, .. }
            | Self::Application { method, .. }
            | Self::Protocol { method, .. } => method,
        }
    }

    pub fn is_application(&self) -> bool {
        matches!(self, Self::Application { .. })
    }

    /// Server-reported error text, if the node produced one.
    pub fn application_message(&self) -> Option<&str> {
        match self {
            Self::Application { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_timeout())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

fn classify_response(method: &str, status: StatusCode, body: String) -> Result<Document, RpcError> {
    if status.as_u16() >= 300 {
        return match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(parsed) => Err(RpcError::Application {
                method: method.to_string(),
                status,
                message: parsed.error,
            }),
            Err(source) => Err(RpcError::Protocol {
                method: method.to_string(),
                status,
                body: snippet(&body),
                source,
            }),
        };
    }

    let snippet_body = snippet(&body);
    Document::parse(body).map_err(|source| RpcError::Protocol {
        method: method.to_string(),
        status,
        body: snippet_body,
        source,
    })
}

fn encode_fields(method: &str, params: &Params) -> Result<Vec<(String, String)>, RpcError> {
    params
        .iter()
        .map(|(name, value)| {
            let encoding_error = |reason: &str| RpcError::Encoding {
                method: method.to_string(),
                field: name.to_string(),
                reason: reason.to_string(),
            };

            if name.is_empty() {
                return Err(encoding_error("field name is empty"));
            }
            if name.contains(['"', '\r', '\n']) {
                return Err(encoding_error(
                    "field name contains a quote or line break",
                ));
            }

            let text = field_text(value).map_err(encoding_error)?;
            Ok((name.to_string(), text))
        })
        .collect()
}

fn field_text(value: &Value) -> Result<String, &'static str> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Number(number) => Ok(number.to_string()),
        Value::String(text) => Ok(text.clone()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Array(_) | Value::Object(_) => {
                    Err("nested arrays and objects cannot be sent as a form field")
                }
                scalar => field_text(scalar),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|parts| parts.join(",")),
        Value::Object(_) => Err("objects cannot be sent as a form field"),
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use secrecy::SecretString;
    use serde_json::json;

    use super::{
        classify_response, encode_fields, EndpointStyle, Params, RpcClient, RpcClientOptions,
        RpcError,
    };
    use crate::endpoint::{Credentials, Endpoint};

    fn client(style: EndpointStyle) -> RpcClient {
        RpcClient::with_options(
            Endpoint::new("127.0.0.1:8080"),
            Credentials::new(SecretString::new("pw".to_string())),
            RpcClientOptions {
                endpoint_style: style,
                ..RpcClientOptions::default()
            },
        )
        .expect("build rpc client")
    }

    #[test]
    fn templated_style_appends_method() {
        let client = client(EndpointStyle::Templated);
        assert_eq!(client.url_for("getinfo"), "http://127.0.0.1:8080/getinfo");
    }

    #[test]
    fn fixed_style_posts_to_base_url() {
        let client = client(EndpointStyle::Fixed);
        assert_eq!(client.url_for("getinfo"), "http://127.0.0.1:8080");
    }

    #[test]
    fn default_call_timeout_is_ten_seconds() {
        assert_eq!(
            RpcClientOptions::default().call_timeout,
            std::time::Duration::from_secs(10)
        );
    }

    #[test]
    fn fields_are_stringified_one_per_key() {
        let params = Params::new()
            .with("invoice", "lnbc1xyz")
            .with("amountMsat", 15_000u64)
            .with("blocking", true)
            .with("feeThresholdSat", 2.5)
            .with("label", json!(null))
            .with("nodeIds", json!(["03aa", "03bb"]));

        let fields = encode_fields("payinvoice", &params).expect("encode fields");
        assert_eq!(
            fields,
            vec![
                ("amountMsat".to_string(), "15000".to_string()),
                ("blocking".to_string(), "true".to_string()),
                ("feeThresholdSat".to_string(), "2.5".to_string()),
                ("invoice".to_string(), "lnbc1xyz".to_string()),
                ("label".to_string(), String::new()),
                ("nodeIds".to_string(), "03aa,03bb".to_string()),
            ]
        );
    }

    #[test]
    fn object_values_fail_encoding() {
        let params = Params::new().with("route", json!({"hops": 2}));
        let error = encode_fields("sendtoroute", &params).expect_err("object must fail");

        match error {
            RpcError::Encoding { method, field, .. } => {
                assert_eq!(method, "sendtoroute");
                assert_eq!(field, "route");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn nested_arrays_fail_encoding() {
        let params = Params::new().with("ids", json!([["a"], "b"]));
        assert!(matches!(
            encode_fields("close", &params),
            Err(RpcError::Encoding { .. })
        ));
    }

    #[test]
    fn header_breaking_field_names_fail_encoding() {
        let params = Params::new().with("bad\r\nname", "x");
        assert!(matches!(
            encode_fields("getinfo", &params),
            Err(RpcError::Encoding { .. })
        ));
        let params = Params::new().with("", "x");
        assert!(matches!(
            encode_fields("getinfo", &params),
            Err(RpcError::Encoding { .. })
        ));
    }

    #[test]
    fn success_body_becomes_document() {
        let document = classify_response("getinfo", StatusCode::OK, r#"{"nodeId":"abc"}"#.into())
            .expect("success");
        assert_eq!(document.str("nodeId"), Some("abc"));
    }

    #[test]
    fn error_body_becomes_application_error() {
        let error = classify_response(
            "pay",
            StatusCode::PAYMENT_REQUIRED,
            r#"{"error":"insufficient funds"}"#.into(),
        )
        .expect_err("402 must fail");

        assert_eq!(error.application_message(), Some("insufficient funds"));
        assert_eq!(error.method(), "pay");
    }

    #[test]
    fn status_300_is_already_an_error() {
        let error = classify_response(
            "getinfo",
            StatusCode::MULTIPLE_CHOICES,
            r#"{"error":"moved"}"#.into(),
        )
        .expect_err("300 must fail");
        assert_eq!(error.application_message(), Some("moved"));
    }

    #[test]
    fn malformed_error_body_is_truncated_protocol_error() {
        let body = "x".repeat(500);
        let error = classify_response("getinfo", StatusCode::INTERNAL_SERVER_ERROR, body)
            .expect_err("500 must fail");

        match error {
            RpcError::Protocol { status, body, .. } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body.chars().count(), 200);
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn error_body_without_error_field_is_protocol_error() {
        let error = classify_response("pay", StatusCode::BAD_REQUEST, "{}".into())
            .expect_err("400 must fail");

        assert!(!error.is_application());
        match error {
            RpcError::Protocol { status, body, .. } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body, "{}");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let body = "é".repeat(300);
        let error = classify_response("getinfo", StatusCode::BAD_GATEWAY, body)
            .expect_err("502 must fail");
        match error {
            RpcError::Protocol { body, .. } => assert_eq!(body.chars().count(), 200),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn malformed_success_body_is_protocol_error() {
        let error = classify_response("getinfo", StatusCode::OK, "<html>oops</html>".into())
            .expect_err("html must fail");
        match error {
            RpcError::Protocol { status, body, .. } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body, "<html>oops</html>");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn params_collect_from_pairs() {
        let params: Params = [("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(params.len(), 2);
        assert!(!params.is_empty());
    }
}
