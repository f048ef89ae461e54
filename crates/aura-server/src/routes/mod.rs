pub mod admin;
pub mod funnel;
pub mod health;
pub mod session;
pub mod webhooks;
