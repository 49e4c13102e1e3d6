//! pg-rest-server library
//!
//! A REST API server over a PostgreSQL primary/replica cluster. The database
//! layer discovers each target's role by probing, pools connections per role,
//! routes reads to replicas when possible, and heals itself on a timer; the
//! HTTP layer is generic table CRUD with Redis response caching in front.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod http;

pub use config::Config;
pub use error::DbError;
