//! Layered response decoding.
//!
//! After the guard's HTTP response is received, the destination's payload is
//! recovered by AES-GCM-decrypting with the innermost layer key:
//!
//! - **v3** (snodes and v3 servers): the guard returns JSON
//!   `{"result": base64(iv || ciphertext)}`; the decrypted plaintext is JSON
//!   `{"status_code": int, "body": string, "t": network_ms?}`.
//! - **v4** (servers): the guard returns raw `iv || ciphertext`; the
//!   decrypted plaintext is the bencoded two-element list
//!   `l<len>:<info-json><len>:<body>e` with `info = {"code": int, "headers": {..}}`.

use base64::Engine;
use serde::Deserialize;
use veil_crypto::aes_gcm;

use crate::{OnionError, Result};

/// A decoded destination response, before status mapping.
#[derive(Clone, Debug)]
pub struct DestinationResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// The destination's clock in network milliseconds, when it sent one.
    pub timestamp_ms: Option<i64>,
    /// Hard-fork / soft-fork versions, when the snode sent them.
    pub fork_versions: Option<(i64, i64)>,
    /// v4 response headers, when present.
    pub headers: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct V3Envelope {
    result: String,
}

#[derive(Deserialize)]
struct V3Plaintext {
    status_code: Option<u16>,
    code: Option<u16>,
    body: Option<serde_json::Value>,
    t: Option<i64>,
    hf: Option<Vec<i64>>,
}

#[derive(Deserialize)]
struct V4Info {
    code: u16,
    headers: Option<serde_json::Value>,
}

/// Decode a v3 response: parse the guard's JSON envelope, decrypt, parse the
/// inner status/body JSON.
pub fn decode_v3(raw: &[u8], destination_key: &[u8; 32]) -> Result<DestinationResponse> {
    let envelope: V3Envelope =
        serde_json::from_slice(raw).map_err(|e| OnionError::InvalidJson(e.to_string()))?;
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(&envelope.result)
        .map_err(|e| OnionError::InvalidResponse(e.to_string()))?;

    let plaintext = aes_gcm::decrypt_with_prefixed_nonce(destination_key, &ciphertext)
        .map_err(|_| OnionError::DecryptionFailed)?;

    let parsed: V3Plaintext =
        serde_json::from_slice(&plaintext).map_err(|e| OnionError::InvalidJson(e.to_string()))?;

    let status = parsed
        .status_code
        .or(parsed.code)
        .ok_or_else(|| OnionError::InvalidResponse("missing status code".into()))?;

    let body = match parsed.body {
        Some(serde_json::Value::String(s)) => s.into_bytes(),
        Some(other) => serde_json::to_vec(&other)
            .map_err(|e| OnionError::InvalidJson(e.to_string()))?,
        None => Vec::new(),
    };

    let fork_versions = parsed
        .hf
        .as_ref()
        .filter(|hf| hf.len() >= 2)
        .map(|hf| (hf[0], hf[1]));

    Ok(DestinationResponse {
        status,
        body,
        timestamp_ms: parsed.t,
        fork_versions,
        headers: None,
    })
}

/// Decode a v4 response: decrypt the raw blob, split the bencoded frame.
pub fn decode_v4(raw: &[u8], destination_key: &[u8; 32]) -> Result<DestinationResponse> {
    let plaintext = aes_gcm::decrypt_with_prefixed_nonce(destination_key, raw)
        .map_err(|_| OnionError::DecryptionFailed)?;

    let (info_bytes, body) = bencode::decode_pair(&plaintext)?;
    let info: V4Info = serde_json::from_slice(&info_bytes)
        .map_err(|e| OnionError::InvalidJson(e.to_string()))?;

    Ok(DestinationResponse {
        status: info.code,
        body,
        timestamp_ms: None,
        fork_versions: None,
        headers: info.headers,
    })
}

/// Map a destination status onto the transport error taxonomy.
///
/// 2xx returns the body; 401 means the swarm rejected the signature; 406 and
/// 425 mean the embedded timestamp drifted outside the swarm's tolerance.
pub fn map_status(response: DestinationResponse, destination: &str) -> Result<DestinationResponse> {
    match response.status {
        200..=299 => Ok(response),
        401 => Err(OnionError::SignatureVerificationFailed),
        406 | 425 => Err(OnionError::ClockOutOfSync),
        status => Err(OnionError::HttpRequestFailedAtDestination {
            status,
            body: String::from_utf8_lossy(&response.body).into_owned(),
            destination: destination.to_string(),
        }),
    }
}

/// The two-element byte-string list used by v4 responses.
pub mod bencode {
    use crate::{OnionError, Result};

    /// Encode `(info, body)` as `l<len>:<info><len>:<body>e`.
    pub fn encode_pair(info: &[u8], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(info.len() + body.len() + 16);
        out.push(b'l');
        out.extend_from_slice(info.len().to_string().as_bytes());
        out.push(b':');
        out.extend_from_slice(info);
        out.extend_from_slice(body.len().to_string().as_bytes());
        out.push(b':');
        out.extend_from_slice(body);
        out.push(b'e');
        out
    }

    /// Decode `l<len>:<info><len>:<body>e` into `(info, body)`.
    pub fn decode_pair(data: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        if data.first() != Some(&b'l') || data.last() != Some(&b'e') {
            return Err(OnionError::InvalidResponse(
                "v4 frame is not a bencoded list".into(),
            ));
        }
        let inner = &data[1..data.len() - 1];
        let (info, rest) = take_byte_string(inner)?;
        let (body, rest) = take_byte_string(rest)?;
        if !rest.is_empty() {
            return Err(OnionError::InvalidResponse(format!(
                "v4 frame has {} trailing bytes",
                rest.len()
            )));
        }
        Ok((info, body))
    }

    fn take_byte_string(data: &[u8]) -> Result<(Vec<u8>, &[u8])> {
        let colon = data
            .iter()
            .position(|b| *b == b':')
            .ok_or_else(|| OnionError::InvalidResponse("missing length separator".into()))?;
        let len: usize = std::str::from_utf8(&data[..colon])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| OnionError::InvalidResponse("invalid byte-string length".into()))?;
        let start = colon + 1;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| OnionError::InvalidResponse("byte string overruns frame".into()))?;
        Ok((data[start..end].to_vec(), &data[end..]))
    }
}
