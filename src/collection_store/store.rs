//! SQLite-backed collection store implementation.

use super::models::{TokenMetadata, TokenScore, TRAIT_DIMENSIONS};
use super::schema::{
    insert_metadata_sql, metadata_column_list, COLLECTION_VERSIONED_SCHEMAS,
    TOKEN_METADATA_TABLE, TOKEN_SCORES_TABLE,
};
use super::trait_def::{CollectionStore, StoreError};
use crate::sqlite_persistence::{migrate_if_needed, Table};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// SQLite-backed collection store.
///
/// A single connection behind a mutex: the pipeline is the only writer and
/// never overlaps its read and write phases.
pub struct SqliteCollectionStore {
    conn: Mutex<Connection>,
}

impl SqliteCollectionStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            db_path.as_ref(),
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open collection database")?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on collection database")?;

        Self::from_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrate_if_needed(&conn, COLLECTION_VERSIONED_SCHEMAS)?;
        Self::validate_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        info!(
            "Collection store ready: {} records, {} scores",
            store.metadata_count()?,
            store.score_count()?
        );
        Ok(store)
    }

    fn validate_schema(conn: &Connection) -> Result<()> {
        let mut expected = vec!["token".to_string()];
        expected.extend(TRAIT_DIMENSIONS.iter().map(|d| d.to_string()));

        let columns = TOKEN_METADATA_TABLE.column_names(conn)?;
        if columns != expected {
            bail!(
                "Schema validation failed for {} table, found columns {:?}",
                TOKEN_METADATA_TABLE.name,
                columns
            );
        }
        Ok(())
    }

    fn count(&self, table: &Table) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: usize =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.name), [], |r| {
                r.get(0)
            })?;
        Ok(count)
    }

    fn recreate(&self, table: &Table) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(&format!("DROP TABLE IF EXISTS {}", table.name), [])?;
        conn.execute(table.schema, [])?;
        for index in table.indices {
            conn.execute(index, [])?;
        }
        Ok(())
    }

    fn query_metadata(&self, sql: &str) -> Result<Vec<TokenMetadata>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map([], row_to_metadata)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

fn row_to_metadata(row: &rusqlite::Row) -> rusqlite::Result<TokenMetadata> {
    let token: u32 = row.get(0)?;
    let traits = [
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, String>(3)?,
        row.get::<_, String>(4)?,
        row.get::<_, String>(5)?,
    ];
    Ok(TokenMetadata::new(token, traits))
}

fn row_to_score(row: &rusqlite::Row) -> rusqlite::Result<TokenScore> {
    Ok(TokenScore {
        token: row.get(0)?,
        statistical_score: row.get(1)?,
        rarity_score: row.get(2)?,
    })
}

/// A primary-key violation on insert means the caller tried to store a token
/// twice; everything else passes through.
fn map_insert_error(err: rusqlite::Error, token: u32) -> StoreError {
    match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => StoreError::DuplicateToken(token),
        _ => StoreError::Sqlite(err),
    }
}

impl CollectionStore for SqliteCollectionStore {
    fn metadata_count(&self) -> Result<usize, StoreError> {
        self.count(&TOKEN_METADATA_TABLE)
    }

    fn reset_metadata(&self) -> Result<(), StoreError> {
        self.recreate(&TOKEN_METADATA_TABLE)
    }

    fn insert_metadata_batch(&self, records: &[TokenMetadata]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&insert_metadata_sql())?;
            for record in records {
                stmt.execute(params![
                    record.token(),
                    record.trait_value(0),
                    record.trait_value(1),
                    record.trait_value(2),
                    record.trait_value(3),
                    record.trait_value(4),
                ])
                .map_err(|e| map_insert_error(e, record.token()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn missing_tokens(&self, collection_size: u32) -> Result<Vec<u32>, StoreError> {
        let stored: HashSet<u32> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(&format!(
                "SELECT token FROM {}",
                TOKEN_METADATA_TABLE.name
            ))?;
            let result = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            result
        };
        Ok((0..collection_size).filter(|t| !stored.contains(t)).collect())
    }

    fn all_metadata(&self) -> Result<Vec<TokenMetadata>, StoreError> {
        self.query_metadata(&format!(
            "SELECT {} FROM {} ORDER BY token",
            metadata_column_list(),
            TOKEN_METADATA_TABLE.name
        ))
    }

    fn unscored_metadata(&self) -> Result<Vec<TokenMetadata>, StoreError> {
        let columns = TRAIT_DIMENSIONS
            .iter()
            .map(|d| format!("m.{}", d))
            .collect::<Vec<_>>()
            .join(", ");
        self.query_metadata(&format!(
            "SELECT m.token, {} FROM {} m LEFT OUTER JOIN {} s ON m.token = s.token WHERE s.token IS NULL ORDER BY m.token",
            columns,
            TOKEN_METADATA_TABLE.name,
            TOKEN_SCORES_TABLE.name
        ))
    }

    fn score_count(&self) -> Result<usize, StoreError> {
        self.count(&TOKEN_SCORES_TABLE)
    }

    fn reset_scores(&self) -> Result<(), StoreError> {
        self.recreate(&TOKEN_SCORES_TABLE)
    }

    fn insert_score_batch(&self, scores: &[TokenScore]) -> Result<(), StoreError> {
        if scores.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (token, statistical_score, rarity_score) VALUES (?1, ?2, ?3)",
                TOKEN_SCORES_TABLE.name
            ))?;
            for score in scores {
                stmt.execute(params![
                    score.token,
                    score.statistical_score,
                    score.rarity_score
                ])
                .map_err(|e| map_insert_error(e, score.token))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn all_scores(&self) -> Result<Vec<TokenScore>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT token, statistical_score, rarity_score FROM {} ORDER BY token",
            TOKEN_SCORES_TABLE.name
        ))?;
        let scores = stmt
            .query_map([], row_to_score)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(scores)
    }

    fn score_for_token(&self, token: u32) -> Result<Option<TokenScore>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let score = conn
            .query_row(
                &format!(
                    "SELECT token, statistical_score, rarity_score FROM {} WHERE token = ?1",
                    TOKEN_SCORES_TABLE.name
                ),
                params![token],
                row_to_score,
            )
            .optional()?;
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteCollectionStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("collection.db");
        let store = SqliteCollectionStore::open(&db_path).unwrap();
        (store, tmp)
    }

    fn make_record(token: u32, head: &str) -> TokenMetadata {
        TokenMetadata::new(
            token,
            [
                "Blue".to_string(),
                "Normal".to_string(),
                "Hoodie".to_string(),
                "Winking".to_string(),
                head.to_string(),
            ],
        )
    }

    #[test]
    fn insert_and_read_back_metadata() {
        let (store, _tmp) = create_test_store();
        let records = vec![make_record(0, "Beanie"), make_record(1, "Halo")];

        store.insert_metadata_batch(&records).unwrap();

        assert_eq!(store.metadata_count().unwrap(), 2);
        assert_eq!(store.all_metadata().unwrap(), records);
    }

    #[test]
    fn duplicate_insert_is_a_typed_error() {
        let (store, _tmp) = create_test_store();
        store
            .insert_metadata_batch(&[make_record(7, "Beanie")])
            .unwrap();

        let err = store
            .insert_metadata_batch(&[make_record(7, "Halo")])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateToken(7)));
    }

    #[test]
    fn failed_batch_leaves_no_partial_rows() {
        let (store, _tmp) = create_test_store();
        store
            .insert_metadata_batch(&[make_record(1, "Beanie")])
            .unwrap();

        // Token 0 is new, token 1 collides: the whole batch must roll back.
        let batch = vec![make_record(0, "Halo"), make_record(1, "Halo")];
        assert!(store.insert_metadata_batch(&batch).is_err());

        assert_eq!(store.metadata_count().unwrap(), 1);
        assert_eq!(store.missing_tokens(3).unwrap(), vec![0, 2]);
    }

    #[test]
    fn missing_tokens_covers_the_whole_range() {
        let (store, _tmp) = create_test_store();
        assert_eq!(store.missing_tokens(4).unwrap(), vec![0, 1, 2, 3]);

        store
            .insert_metadata_batch(&[make_record(1, "Beanie"), make_record(3, "Halo")])
            .unwrap();
        assert_eq!(store.missing_tokens(4).unwrap(), vec![0, 2]);
    }

    #[test]
    fn unscored_metadata_is_the_left_join_complement() {
        let (store, _tmp) = create_test_store();
        store
            .insert_metadata_batch(&[
                make_record(0, "Beanie"),
                make_record(1, "Halo"),
                make_record(2, "Crown"),
            ])
            .unwrap();
        store
            .insert_score_batch(&[TokenScore {
                token: 1,
                statistical_score: 0.5,
                rarity_score: 2.0,
            }])
            .unwrap();

        let unscored = store.unscored_metadata().unwrap();
        let tokens: Vec<u32> = unscored.iter().map(|r| r.token()).collect();
        assert_eq!(tokens, vec![0, 2]);
    }

    #[test]
    fn resets_are_independent() {
        let (store, _tmp) = create_test_store();
        store
            .insert_metadata_batch(&[make_record(0, "Beanie")])
            .unwrap();
        store
            .insert_score_batch(&[TokenScore {
                token: 0,
                statistical_score: 0.1,
                rarity_score: 9.0,
            }])
            .unwrap();

        store.reset_scores().unwrap();
        assert_eq!(store.score_count().unwrap(), 0);
        assert_eq!(store.metadata_count().unwrap(), 1);

        store.reset_metadata().unwrap();
        assert_eq!(store.metadata_count().unwrap(), 0);
    }

    #[test]
    fn score_for_token_lookup() {
        let (store, _tmp) = create_test_store();
        let score = TokenScore {
            token: 42,
            statistical_score: 0.25,
            rarity_score: 8.5,
        };
        store
            .insert_metadata_batch(&[make_record(42, "Beanie")])
            .unwrap();
        store.insert_score_batch(&[score.clone()]).unwrap();

        assert_eq!(store.score_for_token(42).unwrap(), Some(score));
        assert_eq!(store.score_for_token(43).unwrap(), None);
    }

    #[test]
    fn store_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("collection.db");

        {
            let store = SqliteCollectionStore::open(&db_path).unwrap();
            store
                .insert_metadata_batch(&[make_record(5, "Beanie")])
                .unwrap();
        }

        let store = SqliteCollectionStore::open(&db_path).unwrap();
        assert_eq!(store.metadata_count().unwrap(), 1);
        assert_eq!(store.missing_tokens(6).unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
