//! Connection factory and probing seam.
//!
//! The pool does not open or probe connections itself; it goes through the
//! [`Connector`] trait so the production PostgreSQL implementation and the
//! in-memory test double share the same pool code. A connector knows how to
//! open a connection to a target, check liveness, and determine the node's
//! role. Query execution is not part of the trait - callers run queries
//! through the concrete connection type they get back from the pool handle.

use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use sqlx::Connection;
use sqlx::postgres::PgConnection;
use tracing::debug;

/// Role of a database node, as reported by its replication probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts writes.
    Primary,
    /// Read-only, possibly lagging copy of primary data.
    Replica,
}

impl Role {
    pub fn is_replica(self) -> bool {
        matches!(self, Role::Replica)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Replica => write!(f, "replica"),
        }
    }
}

/// Factory and probe operations over one kind of database connection.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// Open a new connection to the given target.
    async fn connect(&self, target: &str) -> DbResult<Self::Conn>;

    /// Liveness probe. Returns false for connections that should be discarded.
    async fn ping(&self, conn: &mut Self::Conn) -> bool;

    /// Role probe. Errors are surfaced so the caller can apply the
    /// conservative read-only classification.
    async fn role(&self, conn: &mut Self::Conn) -> DbResult<Role>;

    /// Close a connection that is being discarded.
    async fn close(&self, conn: Self::Conn);
}

/// Production connector for PostgreSQL.
///
/// Pool slots are plain `PgConnection`s rather than sqlx pools: the pool in
/// this crate owns lifecycle and scheduling itself, one live connection per
/// slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    type Conn = PgConnection;

    async fn connect(&self, target: &str) -> DbResult<PgConnection> {
        let conn = PgConnection::connect(target).await?;
        Ok(conn)
    }

    async fn ping(&self, conn: &mut PgConnection) -> bool {
        match sqlx::query("SELECT 1").execute(&mut *conn).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "liveness probe failed");
                false
            }
        }
    }

    async fn role(&self, conn: &mut PgConnection) -> DbResult<Role> {
        let in_recovery: bool = sqlx::query_scalar("SELECT pg_is_in_recovery()")
            .fetch_one(&mut *conn)
            .await?;
        Ok(if in_recovery {
            Role::Replica
        } else {
            Role::Primary
        })
    }

    async fn close(&self, conn: PgConnection) {
        if let Err(e) = conn.close().await {
            debug!(error = %e, "error closing discarded connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Primary.to_string(), "primary");
        assert_eq!(Role::Replica.to_string(), "replica");
    }

    #[test]
    fn test_role_is_replica() {
        assert!(Role::Replica.is_replica());
        assert!(!Role::Primary.is_replica());
    }
}
