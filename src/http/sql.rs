//! SQL assembly from dynamic field maps.
//!
//! Statements are built from JSON request bodies at runtime: column names are
//! interpolated (after identifier validation), values always travel as bind
//! parameters. Table names are validated against the registry before they
//! reach this module.

use crate::error::{DbError, DbResult};
use serde_json::Value as JsonValue;
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::types::Json;

/// Reject column names that could not be a plain identifier. Values are bound,
/// but column names are spliced into the statement text.
pub fn validate_identifier(name: &str) -> DbResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "invalid column name: '{}'",
            name
        )))
    }
}

/// `INSERT INTO t (a, b) VALUES ($1, $2) RETURNING *`
pub fn build_insert(table: &str, columns: &[String]) -> String {
    let collist = columns.join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        table, collist, placeholders
    )
}

/// `UPDATE t SET a = $1, b = $2 WHERE pk = $3`
pub fn build_update(table: &str, pk: &str, columns: &[String]) -> String {
    let set_clause = columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{} = ${}", col, i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {} = ${}",
        table,
        set_clause,
        pk,
        columns.len() + 1
    )
}

/// `SELECT * FROM t`
pub fn build_select_all(table: &str) -> String {
    format!("SELECT * FROM {}", table)
}

/// `SELECT * FROM t WHERE pk = $1`
pub fn build_select_by_pk(table: &str, pk: &str) -> String {
    format!("SELECT * FROM {} WHERE {} = $1", table, pk)
}

/// `DELETE FROM t WHERE pk = $1`
pub fn build_delete(table: &str, pk: &str) -> String {
    format!("DELETE FROM {} WHERE {} = $1", table, pk)
}

/// Bind a JSON value to the next query placeholder with a matching SQL type.
pub fn bind_json_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &'q JsonValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        JsonValue::Null => query.bind(None::<String>),
        JsonValue::Bool(v) => query.bind(*v),
        JsonValue::Number(n) => {
            if let Some(v) = n.as_i64() {
                query.bind(v)
            } else {
                query.bind(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(v) => query.bind(v.as_str()),
        // Arrays and objects land in json/jsonb columns.
        other => query.bind(Json(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_insert() {
        let sql = build_insert("posts", &cols(&["title", "content"]));
        assert_eq!(
            sql,
            "INSERT INTO posts (title, content) VALUES ($1, $2) RETURNING *"
        );
    }

    #[test]
    fn test_build_insert_single_column() {
        let sql = build_insert("tags", &cols(&["name"]));
        assert_eq!(sql, "INSERT INTO tags (name) VALUES ($1) RETURNING *");
    }

    #[test]
    fn test_build_update() {
        let sql = build_update("posts", "post_id", &cols(&["title", "content"]));
        assert_eq!(
            sql,
            "UPDATE posts SET title = $1, content = $2 WHERE post_id = $3"
        );
    }

    #[test]
    fn test_build_select_and_delete() {
        assert_eq!(build_select_all("authors"), "SELECT * FROM authors");
        assert_eq!(
            build_select_by_pk("authors", "author_id"),
            "SELECT * FROM authors WHERE author_id = $1"
        );
        assert_eq!(
            build_delete("authors", "author_id"),
            "DELETE FROM authors WHERE author_id = $1"
        );
    }

    #[test]
    fn test_validate_identifier_accepts_plain_names() {
        assert!(validate_identifier("title").is_ok());
        assert!(validate_identifier("created_at").is_ok());
        assert!(validate_identifier("_internal").is_ok());
        assert!(validate_identifier("col2").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_injections() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2col").is_err());
        assert!(validate_identifier("a; DROP TABLE posts").is_err());
        assert!(validate_identifier("a\"b").is_err());
        assert!(validate_identifier("a b").is_err());
    }
}
