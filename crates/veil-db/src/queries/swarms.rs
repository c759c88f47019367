//! Per-recipient swarm persistence.

use rusqlite::Connection;
use veil_types::ServiceNode;

use crate::Result;

/// Replace the persisted swarm for one recipient.
pub fn replace(conn: &mut Connection, recipient: &str, nodes: &[ServiceNode]) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM swarm WHERE recipient = ?1", [recipient])?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO swarm (recipient, ip, port, ed25519_pub, x25519_pub)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for node in nodes {
            stmt.execute(rusqlite::params![
                recipient,
                node.ip,
                node.port,
                node.ed25519_pub_hex,
                node.x25519_pub_hex,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Load the persisted swarm for one recipient.
pub fn load(conn: &Connection, recipient: &str) -> Result<Vec<ServiceNode>> {
    let mut stmt = conn.prepare(
        "SELECT ip, port, ed25519_pub, x25519_pub FROM swarm WHERE recipient = ?1",
    )?;
    let nodes = stmt
        .query_map([recipient], |row| {
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

/// Remove one node from one recipient's persisted swarm.
pub fn delete_node(conn: &Connection, recipient: &str, node: &ServiceNode) -> Result<()> {
    conn.execute(
        "DELETE FROM swarm WHERE recipient = ?1 AND ip = ?2 AND port = ?3",
        rusqlite::params![recipient, node.ip, node.port],
    )?;
    Ok(())
}

/// Remove one node from every persisted swarm.
pub fn delete_node_everywhere(conn: &Connection, node: &ServiceNode) -> Result<()> {
    conn.execute(
        "DELETE FROM swarm WHERE ip = ?1 AND port = ?2",
        rusqlite::params![node.ip, node.port],
    )?;
    Ok(())
}
