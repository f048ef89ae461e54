pub mod backend;
pub mod conversions;
pub mod quiz;
pub mod schema;
pub mod settings;
mod store_impl;
pub mod visitors;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so tests can use
/// `aura_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
