//! SQLite schema for the persistent graph cache.

use rusqlite::Connection;

use crate::errors::CacheError;
use crate::models::SNAPSHOT_SCHEMA_VERSION;

/// Executed with `IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS cache_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS graph_cache (
        repository TEXT NOT NULL,
        revision TEXT NOT NULL,
        payload TEXT NOT NULL,
        file_count INTEGER NOT NULL DEFAULT 0,
        last_access_seq INTEGER NOT NULL,
        last_access_at TEXT DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY(repository, revision)
    );",
    "CREATE INDEX IF NOT EXISTS idx_graph_cache_access ON graph_cache(last_access_seq);",
];

pub fn init_schema(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    migrate_schema(conn)
}

/// Payloads written under another snapshot schema cannot be decoded, so a
/// version change empties the cache inside a savepoint.
pub fn migrate_schema(conn: &Connection) -> Result<(), CacheError> {
    let stored = get_schema_version(conn);
    if stored == SNAPSHOT_SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch("SAVEPOINT planweave_migrate;")?;
    let step = (|| -> Result<(), CacheError> {
        conn.execute("DELETE FROM graph_cache;", [])?;
        set_schema_version(conn, SNAPSHOT_SCHEMA_VERSION)?;
        conn.execute_batch("RELEASE SAVEPOINT planweave_migrate;")?;
        Ok(())
    })();
    if let Err(e) = step {
        let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT planweave_migrate;");
        let _ = conn.execute_batch("RELEASE SAVEPOINT planweave_migrate;");
        return Err(e);
    }
    Ok(())
}

/// 0 when the key is absent or unparseable.
fn get_schema_version(conn: &Connection) -> u32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM cache_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<u32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), CacheError> {
    conn.execute(
        "INSERT INTO cache_meta(key, value) VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SNAPSHOT_SCHEMA_VERSION);
    }

    #[test]
    fn test_version_change_clears_rows() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO graph_cache(repository, revision, payload, last_access_seq) \
             VALUES('repo', 'r1', '{}', 1);",
            [],
        )
        .unwrap();
        set_schema_version(&conn, 0).unwrap();
        migrate_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM graph_cache;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(get_schema_version(&conn), SNAPSHOT_SCHEMA_VERSION);
    }
}
