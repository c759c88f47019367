//! Signed storage request builders.
//!
//! Every authenticated request signs a canonical byte string with the
//! Ed25519 identity key. The strings are exact concatenations with every
//! numeric field rendered as base-10 ASCII; building them byte-for-byte
//! identically to the swarm is what makes the signatures verify, so the
//! [`canonical`] helpers are the single source of truth and are tested
//! against literal expected bytes.

use base64::Engine;
use serde_json::json;
use veil_types::namespace::{Namespace, NamespaceScope};
use veil_types::NetworkClock;

use crate::auth::ClientIdentity;
use crate::{Result, RpcError};

/// The closed set of storage RPC endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Store,
    Retrieve,
    GetSwarm,
    GetExpiries,
    Expire,
    ExpireAll,
    Delete,
    DeleteAll,
    DeleteBefore,
    RevokeSubkey,
    OxendRequest,
    GetInfo,
    Batch,
    Sequence,
}

impl Endpoint {
    /// The method name on the wire.
    pub fn method(self) -> &'static str {
        match self {
            Endpoint::Store => "store",
            Endpoint::Retrieve => "retrieve",
            Endpoint::GetSwarm => "get_swarm",
            Endpoint::GetExpiries => "get_expiries",
            Endpoint::Expire => "expire",
            Endpoint::ExpireAll => "expire_all",
            Endpoint::Delete => "delete",
            Endpoint::DeleteAll => "delete_all",
            Endpoint::DeleteBefore => "delete_before",
            Endpoint::RevokeSubkey => "revoke_subkey",
            Endpoint::OxendRequest => "oxend_request",
            Endpoint::GetInfo => "get_info",
            Endpoint::Batch => "batch",
            Endpoint::Sequence => "sequence",
        }
    }
}

/// How an `expire` request may move an existing expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpireMode {
    /// Move freely in either direction.
    Set,
    /// Only shorten.
    Shorten,
    /// Only extend.
    Extend,
}

impl ExpireMode {
    /// The token this mode contributes to the signed bytes: empty for
    /// [`ExpireMode::Set`].
    pub fn signed_token(self) -> &'static str {
        match self {
            ExpireMode::Set => "",
            ExpireMode::Shorten => "shorten",
            ExpireMode::Extend => "extend",
        }
    }
}

/// A ready-to-send storage RPC.
#[derive(Clone, Debug, PartialEq)]
pub struct SignedRequest {
    pub endpoint: Endpoint,
    pub params: serde_json::Value,
}

impl SignedRequest {
    /// The JSON body for the storage RPC envelope.
    pub fn to_body(&self) -> serde_json::Value {
        json!({ "method": self.endpoint.method(), "params": self.params })
    }
}

/// Canonical signing byte strings, one builder per endpoint.
pub mod canonical {
    use super::*;

    fn concat_hashes(out: &mut Vec<u8>, hashes: &[String]) {
        for hash in hashes {
            out.extend_from_slice(hash.as_bytes());
        }
    }

    pub fn store(namespace: Namespace, timestamp_ms: i64) -> Vec<u8> {
        let mut out = b"store".to_vec();
        out.extend_from_slice(namespace.verification_string().as_bytes());
        out.extend_from_slice(timestamp_ms.to_string().as_bytes());
        out
    }

    pub fn retrieve(namespace: Namespace, timestamp_ms: i64) -> Vec<u8> {
        let mut out = b"retrieve".to_vec();
        out.extend_from_slice(namespace.verification_string().as_bytes());
        out.extend_from_slice(timestamp_ms.to_string().as_bytes());
        out
    }

    pub fn delete(hashes: &[String]) -> Vec<u8> {
        let mut out = b"delete".to_vec();
        concat_hashes(&mut out, hashes);
        out
    }

    pub fn delete_all(scope: NamespaceScope, timestamp_ms: i64) -> Vec<u8> {
        let mut out = b"delete_all".to_vec();
        out.extend_from_slice(scope.verification_string().as_bytes());
        out.extend_from_slice(timestamp_ms.to_string().as_bytes());
        out
    }

    pub fn delete_before(scope: NamespaceScope, before_ms: i64) -> Vec<u8> {
        let mut out = b"delete_before".to_vec();
        out.extend_from_slice(scope.verification_string().as_bytes());
        out.extend_from_slice(before_ms.to_string().as_bytes());
        out
    }

    pub fn expire(mode: ExpireMode, expiry_ms: i64, hashes: &[String]) -> Vec<u8> {
        let mut out = b"expire".to_vec();
        out.extend_from_slice(mode.signed_token().as_bytes());
        out.extend_from_slice(expiry_ms.to_string().as_bytes());
        concat_hashes(&mut out, hashes);
        out
    }

    pub fn expire_all(scope: NamespaceScope, expiry_ms: i64) -> Vec<u8> {
        let mut out = b"expire_all".to_vec();
        out.extend_from_slice(scope.verification_string().as_bytes());
        out.extend_from_slice(expiry_ms.to_string().as_bytes());
        out
    }

    pub fn get_expiries(timestamp_ms: i64, hashes: &[String]) -> Vec<u8> {
        let mut out = b"get_expiries".to_vec();
        out.extend_from_slice(timestamp_ms.to_string().as_bytes());
        concat_hashes(&mut out, hashes);
        out
    }

    pub fn revoke_subkey(subkey: &[u8]) -> Vec<u8> {
        let mut out = b"revoke_subkey".to_vec();
        out.extend_from_slice(subkey);
        out
    }
}

/// Builds signed requests for one identity against the network clock.
pub struct StorageRequests<'a> {
    identity: &'a ClientIdentity,
    clock: &'a NetworkClock,
}

impl<'a> StorageRequests<'a> {
    pub fn new(identity: &'a ClientIdentity, clock: &'a NetworkClock) -> Self {
        Self { identity, clock }
    }

    fn sign(&self, message: &[u8]) -> String {
        self.identity.ed25519.sign_base64(message)
    }

    fn auth_params(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("pubkey".into(), self.identity.session_id().into());
        map.insert(
            "pubkey_ed25519".into(),
            self.identity.ed25519_pub_hex().into(),
        );
        map
    }

    /// `store`: place a message in the recipient's namespace.
    pub fn store(
        &self,
        namespace: Namespace,
        data: &[u8],
        ttl_ms: i64,
    ) -> Result<SignedRequest> {
        let timestamp = self.clock.now_ms();
        let signature = self.sign(&canonical::store(namespace, timestamp));

        let mut params = self.auth_params();
        params.insert("namespace".into(), namespace.value().into());
        params.insert(
            "data".into(),
            base64::engine::general_purpose::STANDARD.encode(data).into(),
        );
        params.insert("ttl".into(), ttl_ms.into());
        params.insert("timestamp".into(), timestamp.into());
        params.insert("signature".into(), signature.into());
        Ok(SignedRequest {
            endpoint: Endpoint::Store,
            params: params.into(),
        })
    }

    /// `retrieve`: fetch messages newer than `last_hash`.
    pub fn retrieve(
        &self,
        namespace: Namespace,
        last_hash: Option<&str>,
        max_size: Option<i64>,
    ) -> Result<SignedRequest> {
        let timestamp = self.clock.now_ms();
        let mut params = self.auth_params();
        params.insert("namespace".into(), namespace.value().into());
        params.insert("last_hash".into(), last_hash.unwrap_or("").into());
        if let Some(max_size) = max_size {
            params.insert("max_size".into(), max_size.into());
        }
        if namespace.requires_read_auth() {
            let signature = self.sign(&canonical::retrieve(namespace, timestamp));
            params.insert("timestamp".into(), timestamp.into());
            params.insert("signature".into(), signature.into());
        } else {
            // Legacy namespaces poll unauthenticated.
            params.remove("pubkey_ed25519");
        }
        Ok(SignedRequest {
            endpoint: Endpoint::Retrieve,
            params: params.into(),
        })
    }

    /// `delete`: remove specific messages by hash.
    pub fn delete(&self, hashes: &[String]) -> Result<SignedRequest> {
        if hashes.is_empty() {
            return Err(RpcError::SigningFailed("delete with no hashes".into()));
        }
        let signature = self.sign(&canonical::delete(hashes));
        let mut params = self.auth_params();
        params.insert("messages".into(), hashes.to_vec().into());
        params.insert("signature".into(), signature.into());
        Ok(SignedRequest {
            endpoint: Endpoint::Delete,
            params: params.into(),
        })
    }

    /// `delete_all`: clear one namespace, or every namespace.
    pub fn delete_all(&self, scope: NamespaceScope) -> Result<SignedRequest> {
        let timestamp = self.clock.now_ms();
        let signature = self.sign(&canonical::delete_all(scope, timestamp));
        let mut params = self.auth_params();
        params.insert("namespace".into(), scope_param(scope));
        params.insert("timestamp".into(), timestamp.into());
        params.insert("signature".into(), signature.into());
        Ok(SignedRequest {
            endpoint: Endpoint::DeleteAll,
            params: params.into(),
        })
    }

    /// `delete_before`: remove everything stored before `before_ms`.
    pub fn delete_before(
        &self,
        scope: NamespaceScope,
        before_ms: i64,
    ) -> Result<SignedRequest> {
        let signature = self.sign(&canonical::delete_before(scope, before_ms));
        let mut params = self.auth_params();
        params.insert("namespace".into(), scope_param(scope));
        params.insert("before".into(), before_ms.into());
        params.insert("signature".into(), signature.into());
        Ok(SignedRequest {
            endpoint: Endpoint::DeleteBefore,
            params: params.into(),
        })
    }

    /// `expire`: adjust the expiry of specific messages.
    ///
    /// An empty hash set short-circuits with `SigningFailed`; there is
    /// nothing meaningful to sign.
    pub fn expire(
        &self,
        mode: ExpireMode,
        expiry_ms: i64,
        hashes: &[String],
    ) -> Result<SignedRequest> {
        if hashes.is_empty() {
            return Err(RpcError::SigningFailed("expire with no hashes".into()));
        }
        let signature = self.sign(&canonical::expire(mode, expiry_ms, hashes));
        let mut params = self.auth_params();
        params.insert("messages".into(), hashes.to_vec().into());
        params.insert("expiry".into(), expiry_ms.into());
        match mode {
            ExpireMode::Shorten => {
                params.insert("shorten".into(), true.into());
            }
            ExpireMode::Extend => {
                params.insert("extend".into(), true.into());
            }
            ExpireMode::Set => {}
        }
        params.insert("signature".into(), signature.into());
        Ok(SignedRequest {
            endpoint: Endpoint::Expire,
            params: params.into(),
        })
    }

    /// `expire_all`: adjust the expiry of everything in scope.
    pub fn expire_all(&self, scope: NamespaceScope, expiry_ms: i64) -> Result<SignedRequest> {
        let signature = self.sign(&canonical::expire_all(scope, expiry_ms));
        let mut params = self.auth_params();
        params.insert("namespace".into(), scope_param(scope));
        params.insert("expiry".into(), expiry_ms.into());
        params.insert("signature".into(), signature.into());
        Ok(SignedRequest {
            endpoint: Endpoint::ExpireAll,
            params: params.into(),
        })
    }

    /// `get_expiries`: read the current expiries of specific messages.
    pub fn get_expiries(&self, hashes: &[String]) -> Result<SignedRequest> {
        let timestamp = self.clock.now_ms();
        let signature = self.sign(&canonical::get_expiries(timestamp, hashes));
        let mut params = self.auth_params();
        params.insert("messages".into(), hashes.to_vec().into());
        params.insert("timestamp".into(), timestamp.into());
        params.insert("signature".into(), signature.into());
        Ok(SignedRequest {
            endpoint: Endpoint::GetExpiries,
            params: params.into(),
        })
    }

    /// `revoke_subkey`: invalidate a delegated subkey.
    pub fn revoke_subkey(&self, subkey: &[u8]) -> Result<SignedRequest> {
        let signature = self.sign(&canonical::revoke_subkey(subkey));
        let mut params = self.auth_params();
        params.insert(
            "revoke_subkey".into(),
            base64::engine::general_purpose::STANDARD.encode(subkey).into(),
        );
        params.insert("signature".into(), signature.into());
        Ok(SignedRequest {
            endpoint: Endpoint::RevokeSubkey,
            params: params.into(),
        })
    }
}

/// `get_swarm`: unauthenticated swarm lookup for any recipient.
pub fn get_swarm(recipient: &str) -> SignedRequest {
    SignedRequest {
        endpoint: Endpoint::GetSwarm,
        params: json!({ "pubkey": recipient }),
    }
}

/// `oxend_request`: wrap an oxend query (node lists, name resolution).
pub fn oxend_request(endpoint: &str, params: serde_json::Value) -> SignedRequest {
    SignedRequest {
        endpoint: Endpoint::OxendRequest,
        params: json!({ "endpoint": endpoint, "params": params }),
    }
}

/// `get_info`: unauthenticated node info.
pub fn get_info() -> SignedRequest {
    SignedRequest {
        endpoint: Endpoint::GetInfo,
        params: json!({}),
    }
}

fn scope_param(scope: NamespaceScope) -> serde_json::Value {
    match scope {
        NamespaceScope::All => "all".into(),
        NamespaceScope::One(ns) => ns.value().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ClientIdentity {
        ClientIdentity::from_seeds([7u8; 32], [9u8; 32])
    }

    #[test]
    fn test_canonical_store_default_namespace() {
        // The default namespace contributes nothing to the signed bytes.
        assert_eq!(
            canonical::store(Namespace::Default, 1_700_000_000_000),
            b"store1700000000000".to_vec()
        );
        assert_eq!(
            canonical::store(Namespace::ContactsConfig, 1_700_000_000_000),
            b"store31700000000000".to_vec()
        );
    }

    #[test]
    fn test_canonical_retrieve() {
        assert_eq!(
            canonical::retrieve(Namespace::UserProfileConfig, 42),
            b"retrieve242".to_vec()
        );
    }

    #[test]
    fn test_canonical_delete() {
        let hashes = vec!["h1".to_string(), "h2".to_string()];
        assert_eq!(canonical::delete(&hashes), b"deleteh1h2".to_vec());
    }

    #[test]
    fn test_canonical_delete_all_scopes() {
        assert_eq!(
            canonical::delete_all(NamespaceScope::All, 7),
            b"delete_allall7".to_vec()
        );
        assert_eq!(
            canonical::delete_all(NamespaceScope::One(Namespace::Default), 7),
            b"delete_all7".to_vec()
        );
    }

    #[test]
    fn test_canonical_delete_before() {
        assert_eq!(
            canonical::delete_before(NamespaceScope::All, 123_456),
            b"delete_beforeall123456".to_vec()
        );
    }

    #[test]
    fn test_canonical_expire_modes() {
        let hashes = vec!["aa".to_string(), "bb".to_string()];
        assert_eq!(
            canonical::expire(ExpireMode::Set, 1000, &hashes),
            b"expire1000aabb".to_vec()
        );
        assert_eq!(
            canonical::expire(ExpireMode::Shorten, 1000, &hashes),
            b"expireshorten1000aabb".to_vec()
        );
        assert_eq!(
            canonical::expire(ExpireMode::Extend, 1000, &hashes),
            b"expireextend1000aabb".to_vec()
        );
    }

    #[test]
    fn test_canonical_expire_all() {
        assert_eq!(
            canonical::expire_all(NamespaceScope::One(Namespace::UserGroupsConfig), 99),
            b"expire_all599".to_vec()
        );
    }

    #[test]
    fn test_canonical_get_expiries() {
        let hashes = vec!["x".to_string()];
        assert_eq!(
            canonical::get_expiries(55, &hashes),
            b"get_expiries55x".to_vec()
        );
    }

    #[test]
    fn test_canonical_revoke_subkey() {
        assert_eq!(
            canonical::revoke_subkey(&[0x01, 0x02]),
            vec![b'r', b'e', b'v', b'o', b'k', b'e', b'_', b's', b'u', b'b', b'k', b'e', b'y', 0x01, 0x02]
        );
    }

    #[test]
    fn test_store_request_signature_verifies() {
        let identity = identity();
        let clock = NetworkClock::new();
        let requests = StorageRequests::new(&identity, &clock);

        let request = requests
            .store(Namespace::Default, b"payload", 14 * 24 * 3600 * 1000)
            .expect("store request");
        assert_eq!(request.endpoint, Endpoint::Store);

        let timestamp = request.params["timestamp"].as_i64().expect("timestamp");
        let signature = request.params["signature"].as_str().expect("signature");
        let expected = canonical::store(Namespace::Default, timestamp);
        let public = identity.ed25519.public_key();
        assert!(public.verify_base64(&expected, signature).is_ok());

        // Flipping any signed byte must break verification.
        let mut tampered = expected;
        tampered[0] ^= 0x01;
        assert!(public.verify_base64(&tampered, signature).is_err());
    }

    #[test]
    fn test_store_timestamp_uses_network_clock() {
        let identity = identity();
        let clock = NetworkClock::new();
        clock.update_from_server(NetworkClock::wall_ms() + 60_000);
        let requests = StorageRequests::new(&identity, &clock);

        let request = requests.store(Namespace::Default, b"x", 1000).expect("store");
        let timestamp = request.params["timestamp"].as_i64().expect("timestamp");
        assert!((timestamp - NetworkClock::wall_ms() - 60_000).abs() < 1_000);
    }

    #[test]
    fn test_retrieve_unauthenticated_for_legacy() {
        let identity = identity();
        let clock = NetworkClock::new();
        let requests = StorageRequests::new(&identity, &clock);

        let request = requests
            .retrieve(Namespace::LegacyClosedGroup, Some("prev"), None)
            .expect("retrieve");
        assert!(request.params.get("signature").is_none());
        assert!(request.params.get("pubkey_ed25519").is_none());

        let signed = requests
            .retrieve(Namespace::Default, None, Some(1024))
            .expect("retrieve");
        assert!(signed.params.get("signature").is_some());
        assert_eq!(signed.params["last_hash"], "");
        assert_eq!(signed.params["max_size"], 1024);
    }

    #[test]
    fn test_expire_empty_hashes_rejected() {
        let identity = identity();
        let clock = NetworkClock::new();
        let requests = StorageRequests::new(&identity, &clock);
        assert!(matches!(
            requests.expire(ExpireMode::Set, 1000, &[]),
            Err(RpcError::SigningFailed(_))
        ));
        assert!(matches!(
            requests.delete(&[]),
            Err(RpcError::SigningFailed(_))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let request = get_swarm("05abc");
        let body = request.to_body();
        assert_eq!(body["method"], "get_swarm");
        assert_eq!(body["params"]["pubkey"], "05abc");

        let wrapped = oxend_request("ons_resolve", json!({"type": 0}));
        let body = wrapped.to_body();
        assert_eq!(body["method"], "oxend_request");
        assert_eq!(body["params"]["endpoint"], "ons_resolve");
    }
}
