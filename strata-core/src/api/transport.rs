use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use strata_config::ApiConfig;
use strata_model::{Row, Value};

use crate::error::{Result, StrataError};

/// Request parameters as sent upstream.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Body of one upstream call.
#[derive(Clone, Serialize)]
pub struct ApiRequest {
    pub api_name: String,
    /// Filled in by the transport when left empty.
    pub token: String,
    pub params: Params,
    /// Comma-separated field list; empty asks for every field.
    pub fields: String,
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("api_name", &self.api_name)
            .field("params", &self.params)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<ApiPayload>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiPayload {
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub items: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub has_more: bool,
}

/// One decoded response page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPage {
    pub field_names: Vec<String>,
    pub rows: Vec<Row>,
    pub has_more: bool,
}

impl ApiResponse {
    /// Converts the envelope into a page, failing on a non-zero code.
    pub fn into_page(self) -> Result<FetchPage> {
        if self.code != 0 {
            return Err(StrataError::api(
                self.code,
                self.msg.unwrap_or_else(|| "upstream error".to_string()),
            ));
        }
        let payload = self.data.unwrap_or_default();
        Ok(FetchPage {
            rows: payload
                .items
                .into_iter()
                .map(|item| item.into_iter().map(json_to_value).collect())
                .collect(),
            field_names: payload.fields,
            has_more: payload.has_more,
        })
    }
}

pub fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Text(other.to_string()),
    }
}

/// Issues one page request against the upstream API.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn call(&self, request: ApiRequest) -> Result<FetchPage>;
}

/// JSON-over-HTTP transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("strata/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let token = config.token.clone().ok_or_else(|| {
            StrataError::Configuration("API token is not configured".into())
        })?;
        Self::new(&config.base_url, token, config.request_timeout)
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn call(&self, mut request: ApiRequest) -> Result<FetchPage> {
        if request.token.is_empty() {
            request.token = self.token.clone();
        }
        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string()
            } else {
                body
            };
            return Err(StrataError::api(i64::from(status.as_u16()), message));
        }

        let bytes = response.bytes().await?;
        let envelope: ApiResponse = serde_json::from_slice(&bytes)?;
        envelope.into_page()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_envelope() {
        let envelope: ApiResponse = serde_json::from_value(json!({
            "code": 0,
            "msg": "",
            "data": {
                "fields": ["ts_code", "trade_date", "close", "vol"],
                "items": [["000001.SZ", "20240102", 9.39, 1158366]],
                "has_more": false
            }
        }))
        .unwrap();
        let page = envelope.into_page().unwrap();
        assert_eq!(page.field_names.len(), 4);
        assert_eq!(
            page.rows[0],
            vec![
                Value::from("000001.SZ"),
                Value::from("20240102"),
                Value::Float(9.39),
                Value::Int(1158366),
            ]
        );
    }

    #[test]
    fn nonzero_code_is_api_error() {
        let envelope: ApiResponse = serde_json::from_value(json!({
            "code": 40203,
            "msg": "rate limited",
            "data": null
        }))
        .unwrap();
        match envelope.into_page() {
            Err(StrataError::Api {
                status_or_code,
                message,
            }) => {
                assert_eq!(status_or_code, 40203);
                assert_eq!(message, "rate limited");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_data_is_empty_page() {
        let envelope: ApiResponse =
            serde_json::from_value(json!({"code": 0})).unwrap();
        assert!(envelope.into_page().unwrap().rows.is_empty());
    }
}
