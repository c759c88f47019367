//! Batch and sequence framing.
//!
//! A single onion request may carry a list of sub-requests. `batch` runs
//! them independently; `sequence` stops at the first failure. Sub-responses
//! come back positionally as `{code, body}` pairs; the caller supplies one
//! decoder per position, since each sub-request expects its own response
//! shape.

use serde::de::DeserializeOwned;
use serde_json::json;

use crate::request::{Endpoint, SignedRequest};
use crate::{Result, RpcError};

/// One positional sub-response.
#[derive(Clone, Debug)]
pub struct SubResponse {
    pub code: i64,
    pub body: serde_json::Value,
}

impl SubResponse {
    /// Whether the sub-request succeeded.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Decode the body into the expected response type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))
    }
}

/// Wrap sub-requests into a `batch` request (independent execution).
pub fn batch(requests: &[SignedRequest]) -> SignedRequest {
    wrap(Endpoint::Batch, requests)
}

/// Wrap sub-requests into a `sequence` request (stop at first failure).
pub fn sequence(requests: &[SignedRequest]) -> SignedRequest {
    wrap(Endpoint::Sequence, requests)
}

fn wrap(endpoint: Endpoint, requests: &[SignedRequest]) -> SignedRequest {
    let subs: Vec<serde_json::Value> = requests.iter().map(SignedRequest::to_body).collect();
    SignedRequest {
        endpoint,
        params: json!({ "requests": subs }),
    }
}

/// Split a batch/sequence response into positional sub-responses.
///
/// A sequence that stopped early returns fewer items than requests; the
/// caller matches them up positionally.
pub fn parse_response(raw: &serde_json::Value) -> Result<Vec<SubResponse>> {
    let results = raw
        .get("results")
        .and_then(|v| v.as_array())
        .ok_or_else(|| RpcError::InvalidResponse("missing results array".into()))?;

    results
        .iter()
        .map(|item| {
            let code = item
                .get("code")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| RpcError::InvalidResponse("sub-response missing code".into()))?;
            let body = item.get("body").cloned().unwrap_or(serde_json::Value::Null);
            Ok(SubResponse { code, body })
        })
        .collect()
}
