//! # 📡 THE ELASTICSEARCH ENGINE
//!
//! 🎬 COLD OPEN -- INT. SERVER ROOM -- 3:47 AM
//!
//! The dashboard glows amber. Somebody typed "just rebuild the index" into a chat window
//! and then went to lunch. This module is what actually talks to the cluster while they eat.
//!
//! One `reqwest::Client`, reused for every call. One auth rule: an API key beats basic auth.
//! Every non-2xx answer becomes a [`ConnectorError::Remote`] carrying the status and the
//! body, except the few 404s that are answers rather than failures (existence checks,
//! get-by-id, delete-by-id).
//!
//! ⚠️ This engine does not retry. Retries are a policy decision and the caller owns policy.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, trace};

use super::bulk::render_ndjson;
use super::{AliasAction, BulkRequest, Engine, IndexDocumentRequest};
use crate::error::ConnectorError;

/// 📡 Where the cluster lives and how to get past the bouncer.
///
/// 🔧 auth is tri-modal: `api_key`, `username` + `password`, or anonymous.
/// The key wins when both are set. This is not a democracy.
#[derive(Deserialize, Clone)]
pub struct EngineConfig {
    /// 📡 Scheme, host and port. All of it.
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 If this is in plaintext in your config file, consider the env var instead.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: None,
            password: None,
            api_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// -- 🔒 hand-rolled so secrets never end up in a debug log
impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// 📡 The HTTP-speaking [`Engine`]. Clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ElasticsearchEngine {
    client: reqwest::Client,
    config: EngineConfig,
}

impl ElasticsearchEngine {
    /// 🚀 Build the client. No network traffic happens here; the first real call is the
    /// first handshake.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a missing TLS cert or a cursed system OpenSSL. Either way: tragic.")?;
        debug!(url = %config.url, "📡 Elasticsearch engine ready");
        Ok(Self { client, config })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        // -- one slash of difference, infinite suffering of difference
        let url = format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let request = self.client.request(method, url);
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {api_key}"))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    async fn execute(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<(u16, String)> {
        let response = request.send().await.with_context(|| {
            format!(
                "💀 '{operation}' never made it to Elasticsearch at {}. Check connectivity, check timeouts, check your feelings.",
                self.config.url
            )
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("💀 '{operation}' got a status {status} but the body evaporated mid-read."))?;
        trace!(operation, status, "📡 engine call returned");
        Ok((status, body))
    }

    /// 📡 Send an optional JSON body, demand a 2xx, parse whatever comes back.
    async fn call_json(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let mut request = self.request(method, path);
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(serde_json::to_string(body).with_context(|| {
                    format!("💀 Failed to serialize the request body for '{operation}'.")
                })?);
        }
        let (status, text) = self.execute(operation, request).await?;
        if !(200..300).contains(&status) {
            return Err(ConnectorError::remote(operation, status, text).into());
        }
        parse_body(operation, &text)
    }

    /// 🔍 HEAD: 2xx is yes, 404 is no, anything else is a problem.
    async fn head(&self, operation: &str, path: &str) -> Result<bool> {
        let (status, body) = self
            .execute(operation, self.request(Method::HEAD, path))
            .await?;
        match status {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(ConnectorError::remote(operation, status, body).into()),
        }
    }
}

fn parse_body(operation: &str, text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(text)
        .map_err(|err| ConnectorError::unexpected(operation, format!("{err}: {text}")).into())
}

/// 🔤 Percent-encode a path segment or query value. Ids come from callers and may contain
/// anything; index names are restricted by the cluster and pass through untouched.
fn encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// 🔗 Append `?k=v&...` for the params that are present.
fn with_query(path: String, params: &[(&str, Option<String>)]) -> String {
    let query: Vec<String> = params
        .iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}={}", encode(v))))
        .collect();
    if query.is_empty() {
        path
    } else {
        format!("{path}?{}", query.join("&"))
    }
}

#[async_trait]
impl Engine for ElasticsearchEngine {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        self.head("index_exists", index).await
    }

    async fn create_index(&self, index: &str, definition: &Value) -> Result<Value> {
        self.call_json("create_index", Method::PUT, index, Some(definition))
            .await
    }

    async fn delete_index(&self, index: &str) -> Result<Value> {
        self.call_json("delete_index", Method::DELETE, index, None)
            .await
    }

    async fn refresh_index(&self, index: &str) -> Result<Value> {
        self.call_json("refresh_index", Method::POST, &format!("{index}/_refresh"), None)
            .await
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool> {
        self.head("alias_exists", &format!("_alias/{alias}")).await
    }

    async fn get_alias(&self, alias: &str) -> Result<Value> {
        self.call_json("get_alias", Method::GET, &format!("_alias/{alias}"), None)
            .await
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<Value> {
        let body = json!({"actions": actions.iter().map(AliasAction::to_json).collect::<Vec<_>>()});
        self.call_json("update_aliases", Method::POST, "_aliases", Some(&body))
            .await
    }

    async fn index_document(&self, request: &IndexDocumentRequest) -> Result<Value> {
        let path = with_query(
            format!("{}/_doc/{}", request.index, encode(&request.id)),
            &[
                ("refresh", Some(request.refresh.to_string())),
                ("pipeline", request.pipeline.clone()),
            ],
        );
        self.call_json("index_document", Method::PUT, &path, Some(&request.source))
            .await
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let path = format!("{index}/_doc/{}", encode(id));
        let (status, body) = self
            .execute("get_document", self.request(Method::GET, &path))
            .await?;
        match status {
            200..=299 => Ok(Some(parse_body("get_document", &body)?)),
            // -- 🔍 missing doc and missing index both land here
            404 => Ok(None),
            _ => Err(ConnectorError::remote("get_document", status, body).into()),
        }
    }

    async fn delete_document(&self, index: &str, id: &str, refresh: bool) -> Result<Value> {
        let path = with_query(
            format!("{index}/_doc/{}", encode(id)),
            &[("refresh", Some(refresh.to_string()))],
        );
        let (status, body) = self
            .execute("delete_document", self.request(Method::DELETE, &path))
            .await?;
        match status {
            200..=299 | 404 => parse_body("delete_document", &body),
            _ => Err(ConnectorError::remote("delete_document", status, body).into()),
        }
    }

    async fn bulk(&self, request: &BulkRequest) -> Result<Value> {
        let payload = render_ndjson(&request.operations)?;
        debug!(
            operations = request.operations.len(),
            bytes = payload.len(),
            "📦 shipping a bulk request to /_bulk"
        );
        let path = with_query(
            "_bulk".to_string(),
            &[
                ("refresh", request.refresh.map(|r| r.to_string())),
                ("pipeline", request.pipeline.clone()),
            ],
        );
        let http = self
            .request(Method::POST, &path)
            // ⚠️ x-ndjson, not json. The cluster notices.
            .header("Content-Type", "application/x-ndjson")
            .body(payload);
        let (status, body) = self.execute("bulk", http).await?;
        if !(200..300).contains(&status) {
            return Err(ConnectorError::remote("bulk", status, body).into());
        }
        parse_body("bulk", &body)
    }

    async fn search(&self, indices: &str, body: &Value, scroll: Option<&str>) -> Result<Value> {
        let path = with_query(
            format!("{indices}/_search"),
            &[("scroll", scroll.map(str::to_string))],
        );
        self.call_json("search", Method::POST, &path, Some(body))
            .await
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<Value> {
        let body = json!({"scroll": keep_alive, "scroll_id": scroll_id});
        self.call_json("scroll", Method::POST, "_search/scroll", Some(&body))
            .await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<Value> {
        let body = json!({"scroll_id": scroll_id});
        self.call_json("clear_scroll", Method::DELETE, "_search/scroll", Some(&body))
            .await
    }

    async fn put_pipeline(&self, id: &str, definition: &Value) -> Result<Value> {
        self.call_json(
            "put_pipeline",
            Method::PUT,
            &format!("_ingest/pipeline/{}", encode(id)),
            Some(definition),
        )
        .await
    }

    async fn delete_pipeline(&self, id: &str) -> Result<Value> {
        self.call_json(
            "delete_pipeline",
            Method::DELETE,
            &format!("_ingest/pipeline/{}", encode(id)),
            None,
        )
        .await
    }

    async fn count(&self, indices: &str, body: &Value) -> Result<Value> {
        self.call_json("count", Method::POST, &format!("{indices}/_count"), Some(body))
            .await
    }
}
