//! Shared SQLite schema plumbing.
//!
//! Table definitions are static SQL grouped into versioned schemas; a store
//! opens its connection, walks the versions recorded in `PRAGMA user_version`
//! and applies whatever is missing.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Offset added to the schema version stored in `PRAGMA user_version`, so a
/// database created by an unrelated tool (version 0) is distinguishable from
/// our own version 0.
pub const BASE_DB_VERSION: i64 = 731;

pub struct Table {
    pub name: &'static str,
    pub schema: &'static str,
    pub indices: &'static [&'static str],
}

impl Table {
    /// Create this table and its indices. The schema statement must be a
    /// plain `CREATE TABLE`, creation is only attempted on fresh or reset
    /// databases.
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(self.schema, [])
            .with_context(|| format!("Failed to create table {}", self.name))?;
        for index in self.indices {
            conn.execute(index, [])
                .with_context(|| format!("Failed to create index on {}", self.name))?;
        }
        Ok(())
    }

    /// Column names as reported by SQLite, in declaration order.
    pub fn column_names(&self, conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let columns = stmt
            .query_map([], |row| row.get(1))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(columns)
    }

    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?1",
            [self.name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
}

impl VersionedSchema {
    fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.pragma_update(None, "user_version", BASE_DB_VERSION + self.version as i64)?;
        Ok(())
    }
}

/// Bring a freshly opened connection up to the latest schema version.
pub fn migrate_if_needed(conn: &Connection, schemas: &[VersionedSchema]) -> Result<()> {
    let latest = schemas
        .last()
        .context("No schema versions defined")?;

    let table_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if table_count == 0 {
        tracing::info!("Creating db schema at version {}", latest.version);
        latest.create(conn)?;
        return Ok(());
    }

    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if db_version < BASE_DB_VERSION || db_version > BASE_DB_VERSION + latest.version as i64 {
        bail!("Unknown database version {}", db_version);
    }

    // Single schema version so far, nothing to walk.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TABLE: Table = Table {
        name: "things",
        schema: "CREATE TABLE things (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
        indices: &["CREATE INDEX things_name_index ON things (name);"],
    };

    const TEST_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
        version: 0,
        tables: &[TEST_TABLE],
    }];

    #[test]
    fn creates_schema_on_empty_database() {
        let conn = Connection::open_in_memory().unwrap();
        migrate_if_needed(&conn, TEST_SCHEMAS).unwrap();

        assert!(TEST_TABLE.exists(&conn).unwrap());
        assert_eq!(TEST_TABLE.column_names(&conn).unwrap(), ["id", "name"]);

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, BASE_DB_VERSION);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate_if_needed(&conn, TEST_SCHEMAS).unwrap();
        migrate_if_needed(&conn, TEST_SCHEMAS).unwrap();
        assert!(TEST_TABLE.exists(&conn).unwrap());
    }

    #[test]
    fn rejects_foreign_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE unrelated (x INTEGER);", [])
            .unwrap();
        assert!(migrate_if_needed(&conn, TEST_SCHEMAS).is_err());
    }
}
