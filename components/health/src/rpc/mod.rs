//! JSON-RPC client querying a node for its latest block number (`eth_blockNumber`).
use crate::{ctx, time};
use anyhow::Context as _;
use http_body_util::{BodyExt as _, Full};
use hyper::{body::Bytes, header, StatusCode, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client as HttpClient},
    rt::TokioExecutor,
};
use serde::{Deserialize, Serialize};
use std::{fmt, num::ParseIntError, str::FromStr};

#[cfg(test)]
mod tests;

/// JSON-RPC protocol version sent with every request.
pub const JSONRPC_VERSION: &str = "2.0";
/// Method returning the latest block number of an Ethereum-compatible node.
pub const BLOCK_NUMBER_METHOD: &str = "eth_blockNumber";

/// Block height, as reported by a node.
pub type Height = i64;

/// JSON-RPC request. Serialized as `{"jsonrpc":"2.0","method":"eth_blockNumber","id":1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request {
    /// Protocol version.
    pub jsonrpc: &'static str,
    /// Called method.
    pub method: &'static str,
    /// Request id, echoed back by the node.
    pub id: u64,
}

impl Request {
    /// `eth_blockNumber` call.
    pub fn block_number() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: BLOCK_NUMBER_METHOD,
            id: 1,
        }
    }
}

/// JSON-RPC error object returned instead of a result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, thiserror::Error)]
#[error("code {code}: {message}")]
pub struct ErrorObject {
    /// Error code.
    pub code: i64,
    /// Human readable message.
    pub message: String,
}

/// JSON-RPC response. Every field is optional, so that a well-formed JSON object
/// with an unexpected shape is reported as `MissingResult` rather than `Decode`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    /// Protocol version.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Block number as a decimal or `0x`-prefixed hexadecimal string.
    #[serde(default)]
    pub result: Option<String>,
    /// Error reported by the node.
    #[serde(default)]
    pub error: Option<ErrorObject>,
    /// Echoed request id.
    #[serde(default)]
    pub id: Option<i64>,
}

impl Response {
    /// Decodes a response body. Anything but a JSON object is rejected,
    /// including arrays which serde would otherwise map onto the fields.
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        if !value.is_object() {
            return Err(serde::de::Error::custom("response is not a JSON object"));
        }
        serde_json::from_value(value)
    }

    /// Extracts the block number from the response.
    pub fn block_number(self) -> Result<Height, QueryError> {
        if let Some(err) = self.error {
            return Err(QueryError::Rpc(err));
        }
        let result = self.result.ok_or(QueryError::MissingResult)?;
        parse_block_number(&result).map_err(|err| QueryError::InvalidNumber(result, err))
    }
}

/// Parses a block number: base 16 if prefixed with `0x`, base 10 otherwise.
/// A sign is accepted only in front of a decimal number.
pub fn parse_block_number(s: &str) -> Result<Height, ParseIntError> {
    match s.strip_prefix("0x") {
        // `from_str_radix` accepts a leading sign. A lone sign fails with `InvalidDigit`.
        Some(hex) if hex.starts_with(['+', '-']) => Height::from_str_radix(&hex[..1], 16),
        Some(hex) => Height::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

/// Reason why a block number query failed.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Request could not be serialized.
    #[error("encoding request: {0}")]
    Encode(#[source] serde_json::Error),
    /// HTTP request could not be built.
    #[error("building request: {0}")]
    Request(#[source] hyper::http::Error),
    /// Connection failure, reset, etc.
    #[error("transport: {0:?}")]
    Transport(#[source] hyper_util::client::legacy::Error),
    /// The node didn't respond within the configured timeout.
    #[error("timed out after {0}")]
    Timeout(time::Duration),
    /// HTTP status other than 200 OK.
    #[error("HTTP status {0}")]
    Status(StatusCode),
    /// Response body could not be read.
    #[error("reading response body: {0}")]
    Body(#[source] hyper::Error),
    /// Response body is not valid JSON of the expected shape.
    #[error("malformed JSON response: {0}")]
    Decode(#[source] serde_json::Error),
    /// The node returned a JSON-RPC error.
    #[error("JSON-RPC error {0}")]
    Rpc(ErrorObject),
    /// The response has neither a result nor an error.
    #[error("response has no result")]
    MissingResult,
    /// The result is not a number.
    #[error("invalid block number {0:?}: {1}")]
    InvalidNumber(String, #[source] ParseIntError),
}

/// JSON-RPC endpoint of a node.
/// An address without a scheme (`localhost:8545`) is interpreted as `http://`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeUrl(Uri);

impl NodeUrl {
    /// Underlying URI.
    pub fn uri(&self) -> &Uri {
        &self.0
    }
}

impl FromStr for NodeUrl {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        let uri: Uri = if s.contains("://") {
            s.parse()
        } else {
            format!("http://{s}").parse()
        }
        .with_context(|| format!("invalid URL {s:?}"))?;
        match uri.scheme_str() {
            Some("http") => {}
            scheme => anyhow::bail!("unsupported scheme {scheme:?} in {s:?}, only http is supported"),
        }
        anyhow::ensure!(uri.host().is_some(), "URL {s:?} has no host");
        Ok(Self(uri))
    }
}

impl fmt::Display for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Source of block heights. Implemented by [`Client`];
/// tests substitute it with a fixed set of heights.
#[async_trait::async_trait]
pub trait BlockSource: 'static + Send + Sync {
    /// Queries the latest block number of the node at `url`.
    /// Returns `Canceled` only if `ctx` got canceled; a timeout is a `QueryError`.
    async fn block_number(
        &self,
        ctx: &ctx::Ctx,
        url: &NodeUrl,
    ) -> ctx::OrCanceled<Result<Height, QueryError>>;
}

/// HTTP JSON-RPC client. Keeps a pool of connections to the nodes.
#[derive(Debug, Clone)]
pub struct Client {
    http: HttpClient<HttpConnector, Full<Bytes>>,
    timeout: time::Duration,
}

impl Client {
    /// Constructs a client which bounds every call by `timeout`.
    pub fn new(timeout: time::Duration) -> Self {
        Self {
            http: HttpClient::builder(TokioExecutor::new()).build_http(),
            timeout,
        }
    }

    async fn call(&self, url: &NodeUrl) -> Result<Height, QueryError> {
        let body = serde_json::to_vec(&Request::block_number()).map_err(QueryError::Encode)?;
        let request = hyper::Request::post(url.uri().clone())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(QueryError::Request)?;
        let response = self
            .http
            .request(request)
            .await
            .map_err(QueryError::Transport)?;
        if response.status() != StatusCode::OK {
            return Err(QueryError::Status(response.status()));
        }
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(QueryError::Body)?
            .to_bytes();
        let response = Response::decode(&body).map_err(QueryError::Decode)?;
        response.block_number()
    }
}

#[async_trait::async_trait]
impl BlockSource for Client {
    async fn block_number(
        &self,
        ctx: &ctx::Ctx,
        url: &NodeUrl,
    ) -> ctx::OrCanceled<Result<Height, QueryError>> {
        let call_ctx = &ctx.with_timeout(self.timeout);
        match call_ctx.wait(self.call(url)).await {
            Ok(res) => Ok(res),
            // Only the call deadline has passed, the caller is still waiting.
            Err(ctx::Canceled) if ctx.is_active() => Ok(Err(QueryError::Timeout(self.timeout))),
            Err(err) => Err(err),
        }
    }
}
