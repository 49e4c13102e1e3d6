//! Table registry.
//!
//! The REST surface is generic over tables but not open-ended: only names in
//! this registry are served, which is also what makes interpolating the table
//! name into SQL safe. Views are listed without a primary key; they support
//! listing but not by-id access. `post_tags` is the one composite-keyed table
//! and gets its own two-id routes.

/// Tables and views exposed through the REST API.
const VALID_TABLES: &[&str] = &[
    "users",
    "authors",
    "news_texts",
    "sources",
    "channels",
    "posts",
    "media",
    "tags",
    "post_tags",
    "comments",
    // Reporting views: list-only, no primary key.
    "top_authors",
    "active_users",
    "popular_tags",
    "posts_by_channel",
    "avg_comments_per_post",
    "posts_ranked",
    "comments_moving_avg",
    "cumulative_posts",
    "tag_rank",
    "user_activity_rank",
    "posts_with_authors",
    "comments_with_users",
    "posts_with_tags",
    "posts_authors_channels",
    "comments_posts_users",
    "posts_authors_tags",
    "full_post_info",
    "full_post_media",
];

/// Single-column primary keys, for by-id reads, updates and deletes.
const PRIMARY_KEYS: &[(&str, &str)] = &[
    ("users", "user_id"),
    ("authors", "author_id"),
    ("news_texts", "text_id"),
    ("sources", "source_id"),
    ("channels", "channel_id"),
    ("posts", "post_id"),
    ("media", "media_id"),
    ("tags", "tag_id"),
    ("comments", "comment_id"),
];

/// Whether a table name is served by the API.
pub fn is_valid_table(table: &str) -> bool {
    VALID_TABLES.contains(&table)
}

/// The table's primary key column, if it has a simple one.
pub fn primary_key(table: &str) -> Option<&'static str> {
    PRIMARY_KEYS
        .iter()
        .find(|(t, _)| *t == table)
        .map(|(_, pk)| *pk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tables_are_valid() {
        assert!(is_valid_table("posts"));
        assert!(is_valid_table("post_tags"));
        assert!(is_valid_table("full_post_info"));
    }

    #[test]
    fn test_unknown_tables_are_rejected() {
        assert!(!is_valid_table("pg_shadow"));
        assert!(!is_valid_table("posts; DROP TABLE posts"));
        assert!(!is_valid_table(""));
    }

    #[test]
    fn test_primary_keys() {
        assert_eq!(primary_key("posts"), Some("post_id"));
        assert_eq!(primary_key("users"), Some("user_id"));
    }

    #[test]
    fn test_views_have_no_primary_key() {
        assert_eq!(primary_key("top_authors"), None);
        assert_eq!(primary_key("posts_with_tags"), None);
    }

    #[test]
    fn test_composite_table_has_no_simple_pk() {
        assert!(is_valid_table("post_tags"));
        assert_eq!(primary_key("post_tags"), None);
    }

    #[test]
    fn test_every_pk_table_is_valid() {
        for (table, _) in PRIMARY_KEYS {
            assert!(is_valid_table(table), "{table} missing from VALID_TABLES");
        }
    }
}
