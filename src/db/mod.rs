//! Database access layer.
//!
//! - Replica-aware connection pooling with health-driven reconnection
//! - Connection factory / probe seam for PostgreSQL and test doubles
//! - Dynamic row to JSON conversion

pub mod connector;
pub mod pool;
pub mod row;

pub use connector::{Connector, PgConnector, Role};
pub use pool::{ConnectionPool, PoolConfig, PoolStatus, PooledConn};
pub use row::RowToJson;
