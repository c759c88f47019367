//! Last-received message hash tracking.
//!
//! One row per `(recipient, namespace, snode)` records the newest message
//! hash seen there plus the server-side expiry of that message. Poll
//! requests send the hash as `last_hash`; once the expiry passes the row is
//! useless (the server has already pruned the message) and is deleted.

use rusqlite::Connection;

use crate::Result;

/// A persisted last-hash record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessageInfo {
    pub recipient: String,
    pub namespace: i32,
    pub snode_ed25519: String,
    pub hash: String,
    pub expires_at_ms: i64,
}

/// Fetch the last hash for a `(recipient, namespace, snode)` triple, pruning
/// it first if its server expiry has passed.
pub fn last_hash(
    conn: &Connection,
    recipient: &str,
    namespace: i32,
    snode_ed25519: &str,
    now_ms: i64,
) -> Result<Option<String>> {
    conn.execute(
        "DELETE FROM received_message
         WHERE recipient = ?1 AND namespace = ?2 AND snode_ed25519 = ?3 AND expires_at_ms <= ?4",
        rusqlite::params![recipient, namespace, snode_ed25519, now_ms],
    )?;

    let result = conn.query_row(
        "SELECT hash FROM received_message
         WHERE recipient = ?1 AND namespace = ?2 AND snode_ed25519 = ?3",
        rusqlite::params![recipient, namespace, snode_ed25519],
        |row| row.get(0),
    );
    match result {
        Ok(hash) => Ok(Some(hash)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Record the newest hash seen for a `(recipient, namespace, snode)` triple.
pub fn upsert(conn: &Connection, info: &ReceivedMessageInfo) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO received_message
         (recipient, namespace, snode_ed25519, hash, expires_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            info.recipient,
            info.namespace,
            info.snode_ed25519,
            info.hash,
            info.expires_at_ms,
        ],
    )?;
    Ok(())
}

/// Delete every record whose server expiry has passed.
pub fn prune_expired(conn: &Connection, now_ms: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM received_message WHERE expires_at_ms <= ?1",
        [now_ms],
    )?;
    Ok(deleted)
}
