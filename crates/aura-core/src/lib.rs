pub mod attribution;
pub mod config;
pub mod error;
pub mod event;
pub mod geo;
pub mod memory;
pub mod record;
pub mod recorder;
pub mod session;
pub mod sink;
pub mod store;
pub mod webhook;

pub use error::FunnelError;
pub use session::SessionToken;
