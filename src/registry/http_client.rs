//! HTTP implementation of [`RegistryClient`] for a Consul-compatible API.
//!
//! - services: `GET /v1/catalog/service/<name>`
//! - key:      `GET /v1/kv/<key>`
//! - prefix:   `GET /v1/kv/<prefix>?recurse=true`
//!
//! Blocking behaviour is driven by the `index` and `wait` query parameters; the
//! next cursor comes back in the `X-Consul-Index` header.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use reqwest::header::HeaderValue;
use reqwest::Url;
use serde::Deserialize;
use tracing::trace;

use super::FetchResponse;
use super::FetchResult;
use super::RegistryClient;
use crate::config::RegistryConfig;
use crate::config::WatchConfig;
use crate::constants::INDEX_HEADER;
use crate::constants::TOKEN_HEADER;
use crate::errors::TransportError;
use crate::model::Cursor;
use crate::model::ServiceEntry;
use crate::model::StatusClass;
use crate::model::StatusCode;
use crate::model::ValueNode;
use crate::Error;
use crate::Result;

/// Slack on top of the long-poll wait before the HTTP call itself times out.
/// The registry adds up to wait/16 of jitter.
const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    http: reqwest::Client,
    base_url: Url,
    config: RegistryConfig,
    max_wait: Duration,
}

/// Status, cursor and (for 2xx only) the body of one request
struct RawResponse {
    status: StatusCode,
    cursor: Cursor,
    body: Option<Bytes>,
}

impl HttpRegistryClient {
    pub fn new(config: RegistryConfig, watch: &WatchConfig) -> Result<Self> {
        config.validate()?;
        let base_url = Url::parse(&config.address)
            .map_err(|e| Error::InvalidConfig(format!("registry.address {}: {e}", config.address)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "registry.address {} cannot carry a path",
                config.address
            )));
        }
        let max_wait = watch.max_wait();
        let http = reqwest::Client::builder()
            .timeout(max_wait + max_wait / 16 + REQUEST_TIMEOUT_SLACK)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            config,
            max_wait,
        })
    }

    /// `<address>/v1/<segments..>` with every segment percent-encoded
    pub(crate) fn endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> std::result::Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                TransportError::Malformed(format!("registry address {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn query_params(&self, cursor: Cursor, recurse: bool) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if cursor > 0 {
            params.push(("index", cursor.to_string()));
            params.push(("wait", format!("{}ms", self.max_wait.as_millis())));
        }
        if let Some(dc) = &self.config.datacenter {
            params.push(("dc", dc.clone()));
        }
        if let Some(flag) = self.config.consistency.query_flag() {
            params.push((flag, String::new()));
        }
        if recurse {
            params.push(("recurse", "true".to_string()));
        }
        params
    }

    async fn get(&self, url: Url, cursor: Cursor, recurse: bool) -> std::result::Result<RawResponse, TransportError> {
        trace!(%url, cursor, "issuing blocking query");

        let response = self
            .http
            .get(url.clone())
            .query(&self.query_params(cursor, recurse))
            .header(TOKEN_HEADER, self.config.effective_token())
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    TransportError::Unreachable(format!("{url}: {e}"))
                } else {
                    TransportError::Http(e)
                }
            })?;

        let status = StatusCode(response.status().as_u16());

        match status.class() {
            // Neither body nor index header is trusted and the cursor must not move
            StatusClass::ServerError => Ok(RawResponse {
                status,
                cursor,
                body: None,
            }),
            StatusClass::Found => {
                let index = parse_index(response.headers().get(INDEX_HEADER))?;
                let cursor = index.ok_or_else(|| {
                    TransportError::Malformed(format!("{url}: missing {INDEX_HEADER} header"))
                })?;
                let body = response.bytes().await?;
                Ok(RawResponse {
                    status,
                    cursor,
                    body: Some(body),
                })
            }
            StatusClass::NotFound | StatusClass::Other => {
                let index = parse_index(response.headers().get(INDEX_HEADER))?;
                Ok(RawResponse {
                    status,
                    cursor: index.unwrap_or(cursor),
                    body: None,
                })
            }
        }
    }
}

#[async_trait::async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn fetch_service(&self, name: &str, cursor: Cursor) -> FetchResult<Vec<ServiceEntry>> {
        let url = self.endpoint(["catalog", "service", name])?;
        let raw = self.get(url, cursor, false).await?;
        let entries = match &raw.body {
            Some(body) => decode_services(body)?,
            None => Vec::new(),
        };
        Ok(FetchResponse::new(entries, raw.cursor, raw.status))
    }

    async fn fetch_key(&self, key: &str, cursor: Cursor) -> FetchResult<Option<ValueNode>> {
        let url = self.endpoint(kv_segments(key))?;
        let raw = self.get(url, cursor, false).await?;
        let node = match &raw.body {
            Some(body) => {
                let key = key.trim_start_matches('/');
                decode_value_nodes(body)?.into_iter().find(|n| n.key == key)
            }
            None => None,
        };
        Ok(FetchResponse::new(node, raw.cursor, raw.status))
    }

    async fn fetch_key_prefix(&self, prefix: &str, cursor: Cursor) -> FetchResult<Vec<ValueNode>> {
        let url = self.endpoint(kv_segments(prefix))?;
        let raw = self.get(url, cursor, true).await?;
        let nodes = match &raw.body {
            Some(body) => decode_value_nodes(body)?,
            None => Vec::new(),
        };
        Ok(FetchResponse::new(nodes, raw.cursor, raw.status))
    }
}

/// Key paths keep their `/` separators; everything else is encoded per segment
fn kv_segments(key: &str) -> impl Iterator<Item = &str> {
    std::iter::once("kv").chain(key.trim_start_matches('/').split('/'))
}

// ---------------------------------------------------------------------------
// Wire format

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireServiceEntry {
    node: String,
    #[serde(default)]
    address: String,
    #[serde(rename = "ServiceID", default)]
    service_id: String,
    service_name: String,
    #[serde(default)]
    service_address: String,
    #[serde(default)]
    service_port: u16,
    #[serde(default)]
    service_tags: Option<Vec<String>>,
    #[serde(default)]
    modify_index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireValueNode {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    flags: u64,
    #[serde(default)]
    create_index: u64,
    #[serde(default)]
    modify_index: u64,
    #[serde(default)]
    session: Option<String>,
}

/// Reads the blocking-query index header. Absent is fine, garbage is not.
pub(crate) fn parse_index(value: Option<&HeaderValue>) -> std::result::Result<Option<Cursor>, TransportError> {
    let Some(value) = value else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Some)
        .ok_or_else(|| TransportError::Malformed(format!("invalid {INDEX_HEADER} header: {value:?}")))
}

pub(crate) fn decode_services(body: &[u8]) -> std::result::Result<Vec<ServiceEntry>, TransportError> {
    let wire: Option<Vec<WireServiceEntry>> = serde_json::from_slice(body)
        .map_err(|e| TransportError::Malformed(format!("service catalog payload: {e}")))?;

    Ok(wire
        .unwrap_or_default()
        .into_iter()
        .map(|w| ServiceEntry {
            node: w.node,
            address: w.address,
            service_id: w.service_id,
            service_name: w.service_name,
            service_address: w.service_address,
            service_port: w.service_port,
            tags: w.service_tags.unwrap_or_default(),
            modify_index: w.modify_index,
        })
        .collect())
}

pub(crate) fn decode_value_nodes(body: &[u8]) -> std::result::Result<Vec<ValueNode>, TransportError> {
    let wire: Option<Vec<WireValueNode>> = serde_json::from_slice(body)
        .map_err(|e| TransportError::Malformed(format!("kv payload: {e}")))?;

    wire.unwrap_or_default()
        .into_iter()
        .map(|w| {
            let value = match w.value {
                Some(encoded) => BASE64
                    .decode(encoded.as_bytes())
                    .map(Bytes::from)
                    .map_err(|e| TransportError::Malformed(format!("kv value for {}: {e}", w.key)))?,
                None => Bytes::new(),
            };
            Ok(ValueNode {
                key: w.key,
                value,
                flags: w.flags,
                create_index: w.create_index,
                modify_index: w.modify_index,
                session: w.session,
            })
        })
        .collect()
}
