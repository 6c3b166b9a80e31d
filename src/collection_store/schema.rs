//! SQLite schema for the collection database.

use super::models::TRAIT_DIMENSIONS;
use crate::sqlite_persistence::{Table, VersionedSchema};

/// Per-token trait records, one TEXT column per trait dimension. The column
/// list must stay aligned with [`TRAIT_DIMENSIONS`]; the store validates
/// this on open.
pub const TOKEN_METADATA_TABLE: Table = Table {
    name: "token_metadata",
    schema: "CREATE TABLE token_metadata (token INTEGER PRIMARY KEY, background TEXT NOT NULL, skin TEXT NOT NULL, body TEXT NOT NULL, face TEXT NOT NULL, head TEXT NOT NULL);",
    indices: &[],
};

pub const TOKEN_SCORES_TABLE: Table = Table {
    name: "token_scores",
    schema: "CREATE TABLE token_scores (token INTEGER PRIMARY KEY, statistical_score REAL NOT NULL, rarity_score REAL NOT NULL);",
    indices: &[],
};

pub const COLLECTION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[TOKEN_METADATA_TABLE, TOKEN_SCORES_TABLE],
}];

/// `token, background, skin, ...` in table order.
pub fn metadata_column_list() -> String {
    format!("token, {}", TRAIT_DIMENSIONS.join(", "))
}

pub fn insert_metadata_sql() -> String {
    let placeholders = (1..=TRAIT_DIMENSIONS.len() + 1)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        TOKEN_METADATA_TABLE.name,
        metadata_column_list(),
        placeholders
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn metadata_table_columns_match_trait_dimensions() {
        let conn = Connection::open_in_memory().unwrap();
        TOKEN_METADATA_TABLE.create(&conn).unwrap();

        let mut expected = vec!["token".to_string()];
        expected.extend(TRAIT_DIMENSIONS.iter().map(|d| d.to_string()));
        assert_eq!(TOKEN_METADATA_TABLE.column_names(&conn).unwrap(), expected);
    }

    #[test]
    fn insert_statement_covers_every_dimension() {
        let sql = insert_metadata_sql();
        for dimension in TRAIT_DIMENSIONS {
            assert!(sql.contains(dimension), "missing column {}", dimension);
        }
        assert!(sql.contains("?6"));
        assert!(!sql.contains("?7"));
    }
}
