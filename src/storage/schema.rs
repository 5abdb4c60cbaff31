//! Database schema constants and SQL queries.
//!
//! This module contains the SQL schema definitions for the keyword table
//! backing the durable tier.

/// SQL schema for creating the keyword table.
///
/// `AUTOINCREMENT` keeps ids strictly monotonic across deletes, which the
/// id-descending scan order relies on.
pub const CREATE_KEYWORD_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS keyword (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    type        TEXT    NOT NULL DEFAULT '',
    keyword     TEXT    NOT NULL DEFAULT '',
    is_read     INTEGER NOT NULL DEFAULT 0,
    add_time    TEXT    NOT NULL,
    update_time TEXT    NOT NULL
)
"#;

/// SQL for creating all required indexes.
pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_keyword_is_read_id ON keyword(is_read, id);
CREATE INDEX IF NOT EXISTS idx_keyword_type ON keyword(type);
CREATE INDEX IF NOT EXISTS idx_keyword_keyword ON keyword(keyword)
"#;

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![CREATE_KEYWORD_TABLE, CREATE_INDEXES]
}

/// Table names in the schema.
pub mod tables {
    /// Keyword table name.
    pub const KEYWORD: &str = "keyword";
    /// Applied migration bookkeeping table.
    pub const MIGRATIONS: &str = "_migrations";
}
