//! Generic table CRUD handlers.
//!
//! Reads go through the cache and acquire pool connections with read-only
//! intent (served from a replica when one is idle); writes always acquire
//! with read-write intent and invalidate the affected cache keys afterward.
//! Pool exhaustion surfaces as 503 via the error type's response mapping.

use crate::cache;
use crate::config::{CACHE_TTL_ITEM_SECS, CACHE_TTL_LIST_SECS};
use crate::db::RowToJson;
use crate::error::{DbError, DbResult};
use crate::http::server::AppState;
use crate::http::{sql, tables};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::debug;

/// GET /health - liveness plus per-role idle connection counts.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    let status = state.pool.status();
    Json(json!({
        "status": "ok",
        "pool": status,
        "cache": state.cache.is_enabled(),
    }))
}

/// GET /api/{table} - list all rows, cached.
pub async fn list_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
) -> Result<Response, DbError> {
    ensure_table(&table)?;

    let key = cache::list_key(&table);
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(raw_json(cached));
    }

    let stmt = sql::build_select_all(&table);
    let rows = {
        let mut conn = state.pool.acquire(true).await?;
        debug!(table = %table, role = %conn.role(), "listing rows");
        sqlx::query(&stmt).fetch_all(&mut *conn).await?
    };

    let body = JsonValue::Array(
        rows.iter()
            .map(|row| JsonValue::Object(row.to_json_map()))
            .collect(),
    )
    .to_string();
    state.cache.set_ex(&key, &body, CACHE_TTL_LIST_SECS).await;

    Ok(raw_json(body))
}

/// GET /api/{table}/{id} - rows matching the primary key, cached.
pub async fn get_row(
    State(state): State<Arc<AppState>>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Response, DbError> {
    ensure_table(&table)?;
    let pk = tables::primary_key(&table).ok_or_else(|| DbError::no_primary_key(&table))?;
    let id_value = parse_id(&id)?;

    let key = cache::item_key(&table, &id);
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(raw_json(cached));
    }

    let stmt = sql::build_select_by_pk(&table, pk);
    let rows = {
        let mut conn = state.pool.acquire(true).await?;
        debug!(table = %table, id = %id, role = %conn.role(), "fetching row");
        sqlx::query(&stmt)
            .bind(id_value)
            .fetch_all(&mut *conn)
            .await?
    };

    let body = JsonValue::Array(
        rows.iter()
            .map(|row| JsonValue::Object(row.to_json_map()))
            .collect(),
    )
    .to_string();
    state.cache.set_ex(&key, &body, CACHE_TTL_ITEM_SECS).await;

    Ok(raw_json(body))
}

/// POST /api/{table} - insert a row built from the JSON body's field map.
pub async fn create_row(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Json(body): Json<JsonValue>,
) -> Result<Json<JsonValue>, DbError> {
    ensure_table(&table)?;
    let fields = body
        .as_object()
        .ok_or_else(|| DbError::invalid_input("request body must be a JSON object"))?;
    if fields.is_empty() {
        return Err(DbError::invalid_input("no fields provided"));
    }

    let columns: Vec<String> = fields.keys().cloned().collect();
    for col in &columns {
        sql::validate_identifier(col)?;
    }

    let stmt = sql::build_insert(&table, &columns);
    let mut query = sqlx::query(&stmt);
    for value in fields.values() {
        query = sql::bind_json_value(query, value);
    }

    let row = {
        let mut conn = state.pool.acquire(false).await?;
        debug!(table = %table, role = %conn.role(), "inserting row");
        query.fetch_one(&mut *conn).await?
    };

    state.cache.del(&cache::list_key(&table)).await;

    Ok(Json(JsonValue::Object(row.to_json_map())))
}

/// PUT /api/{table}/{id} - update columns from the JSON body's field map.
pub async fn update_row(
    State(state): State<Arc<AppState>>,
    Path((table, id)): Path<(String, String)>,
    Json(body): Json<JsonValue>,
) -> Result<Json<JsonValue>, DbError> {
    ensure_table(&table)?;
    let pk = tables::primary_key(&table).ok_or_else(|| DbError::no_primary_key(&table))?;
    let id_value = parse_id(&id)?;

    let fields = body
        .as_object()
        .ok_or_else(|| DbError::invalid_input("request body must be a JSON object"))?;
    if fields.is_empty() {
        return Err(DbError::invalid_input("no fields provided"));
    }

    let columns: Vec<String> = fields.keys().cloned().collect();
    for col in &columns {
        sql::validate_identifier(col)?;
    }

    let stmt = sql::build_update(&table, pk, &columns);
    let mut query = sqlx::query(&stmt);
    for value in fields.values() {
        query = sql::bind_json_value(query, value);
    }
    query = query.bind(id_value);

    let updated = {
        let mut conn = state.pool.acquire(false).await?;
        debug!(table = %table, id = %id, role = %conn.role(), "updating row");
        query.execute(&mut *conn).await?.rows_affected()
    };

    state.cache.del(&cache::list_key(&table)).await;
    state.cache.del(&cache::item_key(&table, &id)).await;

    Ok(Json(json!({ "updated": updated })))
}

/// DELETE /api/{table}/{id} - delete by primary key.
pub async fn delete_row(
    State(state): State<Arc<AppState>>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<JsonValue>, DbError> {
    ensure_table(&table)?;
    let pk = tables::primary_key(&table).ok_or_else(|| DbError::no_primary_key(&table))?;
    let id_value = parse_id(&id)?;

    let stmt = sql::build_delete(&table, pk);
    let deleted = {
        let mut conn = state.pool.acquire(false).await?;
        debug!(table = %table, id = %id, role = %conn.role(), "deleting row");
        sqlx::query(&stmt)
            .bind(id_value)
            .execute(&mut *conn)
            .await?
            .rows_affected()
    };

    state.cache.del(&cache::list_key(&table)).await;
    state.cache.del(&cache::item_key(&table, &id)).await;

    Ok(Json(json!({ "deleted": deleted })))
}

/// GET /api/post_tags/{post_id}/{tag_id} - composite-key lookup, cached.
pub async fn get_post_tag(
    State(state): State<Arc<AppState>>,
    Path((post_id, tag_id)): Path<(i64, i64)>,
) -> Result<Response, DbError> {
    let (post, tag) = (post_id.to_string(), tag_id.to_string());
    let key = cache::composite_key("post_tags", &[post.as_str(), tag.as_str()]);
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(raw_json(cached));
    }

    let rows = {
        let mut conn = state.pool.acquire(true).await?;
        debug!(post_id, tag_id, role = %conn.role(), "fetching post tag");
        sqlx::query("SELECT * FROM post_tags WHERE post_id = $1 AND tag_id = $2")
            .bind(post_id)
            .bind(tag_id)
            .fetch_all(&mut *conn)
            .await?
    };

    let body = JsonValue::Array(
        rows.iter()
            .map(|row| JsonValue::Object(row.to_json_map()))
            .collect(),
    )
    .to_string();
    state.cache.set_ex(&key, &body, CACHE_TTL_ITEM_SECS).await;

    Ok(raw_json(body))
}

/// DELETE /api/post_tags/{post_id}/{tag_id} - composite-key delete.
pub async fn delete_post_tag(
    State(state): State<Arc<AppState>>,
    Path((post_id, tag_id)): Path<(i64, i64)>,
) -> Result<Json<JsonValue>, DbError> {
    let deleted = {
        let mut conn = state.pool.acquire(false).await?;
        debug!(post_id, tag_id, role = %conn.role(), "deleting post tag");
        sqlx::query("DELETE FROM post_tags WHERE post_id = $1 AND tag_id = $2")
            .bind(post_id)
            .bind(tag_id)
            .execute(&mut *conn)
            .await?
            .rows_affected()
    };

    let (post, tag) = (post_id.to_string(), tag_id.to_string());
    state
        .cache
        .del(&cache::composite_key(
            "post_tags",
            &[post.as_str(), tag.as_str()],
        ))
        .await;
    // The post's cached detail embeds its tags.
    state.cache.del(&cache::item_key("posts", &post)).await;

    Ok(Json(json!({ "deleted": deleted })))
}

fn ensure_table(table: &str) -> DbResult<()> {
    if tables::is_valid_table(table) {
        Ok(())
    } else {
        Err(DbError::unknown_table(table))
    }
}

fn parse_id(id: &str) -> DbResult<i64> {
    id.parse()
        .map_err(|_| DbError::invalid_input(format!("invalid id: '{}'", id)))
}

/// Serve an already-serialized JSON body (cache hits skip re-parsing).
fn raw_json(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_table() {
        assert!(ensure_table("posts").is_ok());
        assert!(matches!(
            ensure_table("no_such_table"),
            Err(DbError::UnknownTable { .. })
        ));
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(parse_id("abc").is_err());
        assert!(parse_id("42; DROP TABLE posts").is_err());
    }
}
