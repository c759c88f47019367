//! Integration test: signed storage RPCs end to end.
//!
//! Exercises the full request/response crypto loop without a network:
//! 1. Build a signed delete request and check its canonical signed bytes
//! 2. Play the swarm side: three nodes sign their outcomes, one times out
//! 3. Validate the recursive response, per-node signatures, and quorum
//! 4. Wrap a request in an onion envelope, unwrap it hop by hop like the
//!    relays would, answer as the destination, and decode the v3 response
//! 5. Resolve a name record sealed under both the current and legacy
//!    schemes

use base64::Engine;
use veil_crypto::ed25519::IdentityKeys;
use veil_crypto::x25519::{X25519PublicKey, X25519SecretKey};
use veil_crypto::{aes_gcm, blake2b, xchacha};
use veil_onion::envelope::{build_onion, layer_key};
use veil_onion::response::{decode_v3, map_status};
use veil_onion::OnionDestination;
use veil_rpc::request::{canonical, Endpoint};
use veil_rpc::verify::{
    parse_swarm_response, validate_swarm_response, verification, Quorum,
};
use veil_rpc::{ons, ClientIdentity, StorageRequests};
use veil_types::{NetworkClock, ServiceNode};

#[test]
fn test_signed_delete_swarm_roundtrip() {
    let identity = ClientIdentity::generate();
    let clock = NetworkClock::new();
    let requests = StorageRequests::new(&identity, &clock);

    let hashes = vec!["h1".to_string(), "h2".to_string()];
    let request = requests.delete(&hashes).expect("delete request");
    assert_eq!(request.endpoint, Endpoint::Delete);
    assert_eq!(canonical::delete(&hashes), b"deleteh1h2".to_vec());

    // The swarm side: two nodes delete and sign, a third times out.
    let user_hex = identity.session_id();
    let node_a = IdentityKeys::generate();
    let node_b = IdentityKeys::generate();

    let fields = serde_json::json!({"deleted": ["h1", "h2"]});
    let message = verification::delete(&user_hex, &hashes, &fields);
    assert_eq!(message, format!("{user_hex}h1h2h1h2").into_bytes());

    let raw = serde_json::json!({
        "swarm": {
            node_a.public_key().to_hex(): {
                "signature": node_a.sign_base64(&message),
                "deleted": ["h1", "h2"],
            },
            node_b.public_key().to_hex(): {
                "signature": node_b.sign_base64(&message),
                "deleted": ["h1", "h2"],
            },
            "cc".repeat(32): {"failed": true, "timeout": true},
        }
    });

    let parsed = parse_swarm_response(&raw).expect("parse");
    let outcomes = validate_swarm_response(&parsed, Quorum::AtLeastOne, |fields| {
        verification::delete(&user_hex, &hashes, fields)
    })
    .expect("validate");

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[&node_a.public_key().to_hex()].succeeded);
    assert!(outcomes[&node_b.public_key().to_hex()].succeeded);
    assert!(!outcomes[&"cc".repeat(32)].succeeded);
}

#[test]
fn test_store_quorum_counts_majority() {
    let node_a = IdentityKeys::generate();

    let fields = serde_json::json!({"hash": "stored-hash", "signature": "ignored"});
    let message = verification::store(&fields);

    let raw = serde_json::json!({
        "swarm": {
            node_a.public_key().to_hex(): {
                "signature": node_a.sign_base64(&message),
                "hash": "stored-hash",
            },
            "dd".repeat(32): {"failed": true, "code": 500},
        }
    });
    let parsed = parse_swarm_response(&raw).expect("parse");

    // One of two entries verified: exactly half, which meets the quorum.
    let outcomes =
        validate_swarm_response(&parsed, Quorum::Majority, verification::store).expect("validate");
    assert!(outcomes[&node_a.public_key().to_hex()].succeeded);
}

/// Unwrap one onion layer the way a relay does.
fn unwrap_layer(
    secret: &X25519SecretKey,
    layer: &serde_json::Value,
) -> (serde_json::Value, [u8; 32]) {
    let eph = X25519PublicKey::from_hex(layer["ephemeral_key"].as_str().expect("eph"))
        .expect("eph key");
    let shared = secret.diffie_hellman(&eph);
    let key = layer_key(&shared);
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(layer["ciphertext"].as_str().expect("ct"))
        .expect("ct base64");
    let plaintext = aes_gcm::decrypt_with_prefixed_nonce(&key, &ciphertext).expect("open layer");
    (serde_json::from_slice(&plaintext).unwrap_or(serde_json::Value::Null), key)
}

#[test]
fn test_onion_request_response_loop() {
    // Three relays plus a destination snode, each with a real X25519 key.
    let secrets: Vec<X25519SecretKey> = (0..4).map(|_| X25519SecretKey::random()).collect();
    let path: Vec<ServiceNode> = (0..3)
        .map(|i| ServiceNode {
            ip: format!("10.0.0.{i}"),
            port: 22021,
            ed25519_pub_hex: hex::encode(blake2b::hash256(&[i as u8])),
            x25519_pub_hex: secrets[i].public_key().to_hex(),
        })
        .collect();
    let dest_node = ServiceNode {
        ip: "10.0.0.9".to_string(),
        port: 22021,
        ed25519_pub_hex: hex::encode(blake2b::hash256(b"dest")),
        x25519_pub_hex: secrets[3].public_key().to_hex(),
    };

    let identity = ClientIdentity::generate();
    let clock = NetworkClock::new();
    let requests = StorageRequests::new(&identity, &clock);
    let request = requests
        .retrieve(veil_types::Namespace::Default, None, None)
        .expect("retrieve");
    let payload = serde_json::to_vec(&request.to_body()).expect("payload");

    let destination = OnionDestination::Snode(dest_node);
    let onion = build_onion(&path, &destination, &payload).expect("build onion");

    // Walk the circuit: guard, two relays, destination.
    let outer: serde_json::Value = serde_json::from_slice(&onion.body).expect("outer");
    let (layer1, _) = unwrap_layer(&secrets[0], &outer);
    let (layer2, _) = unwrap_layer(&secrets[1], &layer1);
    let (layer3, _) = unwrap_layer(&secrets[2], &layer2);
    let (inner, dest_key) = unwrap_layer(&secrets[3], &layer3);

    // The destination received exactly the signed RPC we sent.
    let received: serde_json::Value = inner;
    assert_eq!(received["method"], "retrieve");
    assert_eq!(
        received["params"]["pubkey"],
        serde_json::Value::String(identity.session_id())
    );
    assert_eq!(dest_key, onion.destination_key);

    // The destination answers with a v3 envelope under the same key, and
    // stamps its clock; the client applies the offset.
    let server_now = NetworkClock::wall_ms() + 12_345;
    let plaintext = serde_json::json!({
        "status_code": 200,
        "body": "{\"messages\": []}",
        "t": server_now,
    });
    let sealed = aes_gcm::encrypt_with_prefixed_nonce(
        &onion.destination_key,
        &serde_json::to_vec(&plaintext).expect("plaintext"),
    )
    .expect("seal");
    let wire = serde_json::to_vec(&serde_json::json!({
        "result": base64::engine::general_purpose::STANDARD.encode(sealed),
    }))
    .expect("wire");

    let decoded = decode_v3(&wire, &onion.destination_key).expect("decode");
    if let Some(t) = decoded.timestamp_ms {
        clock.update_from_server(t);
    }
    let response = map_status(decoded, "snode 10.0.0.9:22021").expect("2xx");
    assert_eq!(response.body, b"{\"messages\": []}");
    assert!((clock.offset_ms() - 12_345).abs() < 1_000);
}

#[test]
fn test_name_resolution_agreement() {
    let name = "alice.veil";
    let mut session_id_bytes = vec![0x05];
    session_id_bytes.extend_from_slice(&[0x77u8; 32]);

    // Current scheme: keyed-Blake2b key, XChaCha, explicit nonce.
    let outer = blake2b::hash256(name.as_bytes());
    let key = blake2b::hash256_keyed(&outer, name.as_bytes()).expect("key");
    let nonce = [0x24u8; 24];
    let record = ons::NameRecord {
        encrypted_value: hex::encode(
            xchacha::encrypt(&key, &nonce, &session_id_bytes).expect("seal"),
        ),
        nonce: Some(hex::encode(nonce)),
    };

    // Three nodes return the same record; all decrypt to one session id.
    let results: Vec<String> = (0..ons::RESOLUTION_QUERIES)
        .map(|_| ons::decrypt_record(name, &record).expect("decrypt"))
        .collect();
    let resolved = ons::combine_results(&results).expect("combine");
    assert_eq!(resolved, hex::encode(&session_id_bytes));

    // A disagreeing answer poisons the set.
    let mut tampered = results;
    tampered[2] = "05".to_string() + &"00".repeat(32);
    assert!(ons::combine_results(&tampered).is_err());
}
