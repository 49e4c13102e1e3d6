//! REST interface over the database layer.
//!
//! Routing, generic CRUD handlers, the table registry that bounds them, and
//! SQL assembly from dynamic field maps.

pub mod handlers;
pub mod server;
pub mod sql;
pub mod tables;

pub use server::{AppState, router, serve};
