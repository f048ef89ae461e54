pub mod app;
pub mod client;
pub mod cookies;
pub mod error;
pub mod geo;
pub mod routes;
pub mod state;
pub mod transport;
