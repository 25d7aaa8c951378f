// API crate clippy configuration
#![allow(clippy::needless_borrows_for_generic_args)] // Sometimes needed for clarity
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Storefront API Library
//!
//! Accounts, sessions, and the product catalog behind the storefront's
//! REST API.

pub mod auth;
pub mod catalog;
pub mod config;
pub mod email;
pub mod error;
pub mod routes;
pub mod security;
pub mod state;
pub mod users;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
