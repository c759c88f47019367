//! Onion path persistence.
//!
//! Paths are stored hop-by-hop; `path_index` orders the paths, `hop_index`
//! orders the hops within one (the guard is hop 0).

use rusqlite::Connection;
use veil_types::ServiceNode;

use crate::Result;

/// Replace all persisted paths.
pub fn replace(conn: &mut Connection, paths: &[Vec<ServiceNode>]) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM onion_path", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO onion_path (path_index, hop_index, ip, port, ed25519_pub, x25519_pub)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (path_index, path) in paths.iter().enumerate() {
            for (hop_index, node) in path.iter().enumerate() {
                stmt.execute(rusqlite::params![
                    path_index as i64,
                    hop_index as i64,
                    node.ip,
                    node.port,
                    node.ed25519_pub_hex,
                    node.x25519_pub_hex,
                ])?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

/// Load all persisted paths, hop order preserved.
pub fn load(conn: &Connection) -> Result<Vec<Vec<ServiceNode>>> {
    let mut stmt = conn.prepare(
        "SELECT path_index, ip, port, ed25519_pub, x25519_pub
         FROM onion_path ORDER BY path_index ASC, hop_index ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                ServiceNode {
                    ip: row.get(1)?,
                    port: row.get(2)?,
                    ed25519_pub_hex: row.get(3)?,
                    x25519_pub_hex: row.get(4)?,
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut paths: Vec<Vec<ServiceNode>> = Vec::new();
    let mut current_index: Option<i64> = None;
    for (path_index, node) in rows {
        if current_index != Some(path_index) {
            paths.push(Vec::new());
            current_index = Some(path_index);
        }
        if let Some(path) = paths.last_mut() {
            path.push(node);
        }
    }
    Ok(paths)
}

/// Delete every persisted path.
pub fn clear(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM onion_path", [])?;
    Ok(())
}
