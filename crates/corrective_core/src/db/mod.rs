use std::collections::HashSet;
use std::path::Path;

use rusqlite::Connection;

use crate::error::EngineError;

const MIGRATION_0001: (&str, &str) = (
    "0001_init.sql",
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../migrations/0001_init.sql"
    )),
);

fn migrations() -> Vec<(&'static str, &'static str)> {
    vec![MIGRATION_0001]
}

pub fn open(path: &Path) -> Result<Connection, EngineError> {
    Connection::open(path).map_err(|e| EngineError::store("open SQLite database", e))
}

pub fn open_in_memory() -> Result<Connection, EngineError> {
    Connection::open_in_memory()
        .map_err(|e| EngineError::store("open in-memory SQLite database", e))
}

pub fn migrate(conn: &mut Connection) -> Result<(), EngineError> {
    // Track migrations by name, applying each exactly once, in deterministic order.
    conn.execute_batch(
        r#"
      PRAGMA foreign_keys = ON;
      CREATE TABLE IF NOT EXISTS _migrations (
        name TEXT PRIMARY KEY NOT NULL,
        applied_at TEXT NOT NULL
      );
    "#,
    )
    .map_err(|e| EngineError::store("ensure migrations table exists", e))?;

    let applied: HashSet<String> = {
        let mut stmt = conn
            .prepare("SELECT name FROM _migrations")
            .map_err(|e| EngineError::store("prepare applied-migrations query", e))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| EngineError::store("query applied migrations", e))?;

        let mut set = HashSet::new();
        for r in rows {
            let name = r.map_err(|e| EngineError::store("read applied migration row", e))?;
            set.insert(name);
        }
        set
    };

    for (name, sql) in migrations() {
        if applied.contains(name) {
            continue;
        }

        let tx = conn
            .transaction()
            .map_err(|e| EngineError::store("start migration transaction", e))?;

        tx.execute_batch(sql)
            .map_err(|e| EngineError::store(format!("apply migration {name}"), e))?;

        // Use SQLite to record the timestamp; this is operational metadata only.
        tx.execute(
            "INSERT INTO _migrations(name, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
            [name],
        )
        .map_err(|e| EngineError::store(format!("record migration {name}"), e))?;

        tx.commit()
            .map_err(|e| EngineError::store("commit migration transaction", e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::OptionalExtension;

    #[test]
    fn migrations_create_expected_tables() {
        let mut conn = open_in_memory().expect("open");
        migrate(&mut conn).expect("migrate");

        for table in [
            "failure_occurrences",
            "work_orders",
            "downtime_logs",
            "qa_records",
            "solutions_applied",
            "corrective_settings",
        ] {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")
                .unwrap();
            let name: Option<String> = stmt.query_row([table], |row| row.get(0)).optional().unwrap();
            assert_eq!(name.as_deref(), Some(table), "missing table {table}");
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = open_in_memory().expect("open");
        migrate(&mut conn).expect("first run");
        migrate(&mut conn).expect("second run");
    }

    #[test]
    fn file_backed_database_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("corrective.db");

        let mut conn = open(&path).expect("open");
        migrate(&mut conn).expect("migrate");
        drop(conn);

        let mut conn = open(&path).expect("reopen");
        migrate(&mut conn).expect("migrate again");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
