//! Settings query functions.
//!
//! The settings table is the durable key-value store for the clock offset,
//! pool refresh timestamp, and fork-version indicators.

use rusqlite::Connection;

use crate::{DbError, Result};

/// Get a setting value by key.
pub fn get(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("setting '{key}'")),
        other => DbError::Sqlite(other),
    })
}

/// Set a setting value.
pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

/// Get a setting as i64, defaulting to `default` if not found.
pub fn get_i64(conn: &Connection, key: &str, default: i64) -> Result<i64> {
    match get(conn, key) {
        Ok(v) => v
            .parse()
            .map_err(|e: std::num::ParseIntError| DbError::Serialization(e.to_string())),
        Err(DbError::NotFound(_)) => Ok(default),
        Err(e) => Err(e),
    }
}

/// Get a setting as u64, defaulting to `default` if not found.
pub fn get_u64(conn: &Connection, key: &str, default: u64) -> Result<u64> {
    match get(conn, key) {
        Ok(v) => v
            .parse()
            .map_err(|e: std::num::ParseIntError| DbError::Serialization(e.to_string())),
        Err(DbError::NotFound(_)) => Ok(default),
        Err(e) => Err(e),
    }
}

/// Set an integer setting.
pub fn set_i64(conn: &Connection, key: &str, value: i64) -> Result<()> {
    set(conn, key, &value.to_string())
}

/// Record the latest hard-fork / soft-fork versions observed in a snode
/// response, keeping only the newest pair.
pub fn update_fork_versions(conn: &Connection, hf: i64, sf: i64) -> Result<()> {
    let current_hf = get_i64(conn, "hf_version", 0)?;
    let current_sf = get_i64(conn, "sf_version", 0)?;
    if (hf, sf) > (current_hf, current_sf) {
        set_i64(conn, "hf_version", hf)?;
        set_i64(conn, "sf_version", sf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_get_default_setting() {
        let conn = test_db();
        let offset = get(&conn, "clock_offset_ms").expect("get");
        assert_eq!(offset, "0");
    }

    #[test]
    fn test_set_and_get() {
        let conn = test_db();
        set_i64(&conn, "pool_refreshed_at", 1_700_000_000).expect("set");
        let at = get_i64(&conn, "pool_refreshed_at", 0).expect("get");
        assert_eq!(at, 1_700_000_000);
    }

    #[test]
    fn test_get_nonexistent() {
        let conn = test_db();
        let result = get(&conn, "nonexistent");
        assert!(matches!(result, Err(DbError::NotFound(_))));
        assert_eq!(get_i64(&conn, "nonexistent", -7).expect("default"), -7);
    }

    #[test]
    fn test_fork_versions_monotonic() {
        let conn = test_db();
        update_fork_versions(&conn, 19, 1).expect("update");
        assert_eq!(get_i64(&conn, "hf_version", 0).expect("get"), 19);

        // Older pair must not clobber the newer one.
        update_fork_versions(&conn, 18, 0).expect("update");
        assert_eq!(get_i64(&conn, "hf_version", 0).expect("get"), 19);
        assert_eq!(get_i64(&conn, "sf_version", 0).expect("get"), 1);
    }
}
