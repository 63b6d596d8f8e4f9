#![warn(clippy::unwrap_used)]

pub mod billing_rest;
pub mod rest;
pub mod server;
pub mod usage_rest;

pub use rest::AppState;
pub use server::{router, ApiServer};
