//! Service-node pool persistence.

use rusqlite::Connection;
use veil_types::ServiceNode;

use crate::{queries::settings, Result};

/// Replace the persisted pool and its refresh timestamp in one transaction.
pub fn replace(conn: &mut Connection, nodes: &[ServiceNode], refreshed_at: i64) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM snode_pool", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO snode_pool (ip, port, ed25519_pub, x25519_pub)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for node in nodes {
            stmt.execute(rusqlite::params![
                node.ip,
                node.port,
                node.ed25519_pub_hex,
                node.x25519_pub_hex,
            ])?;
        }
    }
    tx.execute(
        "INSERT OR REPLACE INTO settings (key, value) VALUES ('pool_refreshed_at', ?1)",
        [refreshed_at.to_string()],
    )?;
    tx.commit()?;
    Ok(())
}

/// Load the persisted pool.
pub fn load(conn: &Connection) -> Result<Vec<ServiceNode>> {
    let mut stmt =
        conn.prepare("SELECT ip, port, ed25519_pub, x25519_pub FROM snode_pool")?;
    let nodes = stmt
        .query_map([], |row| {
            Ok(ServiceNode {
                ip: row.get(0)?,
                port: row.get(1)?,
                ed25519_pub_hex: row.get(2)?,
                x25519_pub_hex: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(nodes)
}

/// The persisted refresh timestamp (Unix seconds), 0 when never refreshed.
pub fn refreshed_at(conn: &Connection) -> Result<i64> {
    settings::get_i64(conn, "pool_refreshed_at", 0)
}

/// Remove one node from the persisted pool.
pub fn delete_node(conn: &Connection, node: &ServiceNode) -> Result<()> {
    conn.execute(
        "DELETE FROM snode_pool WHERE ip = ?1 AND port = ?2",
        rusqlite::params![node.ip, node.port],
    )?;
    Ok(())
}

/// Clear the persisted pool.
pub fn clear(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM snode_pool", [])?;
    Ok(())
}
