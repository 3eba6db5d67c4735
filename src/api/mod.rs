//! Client for the classroom data service
//!
//! `client` is the request layer (bearer injection, 401 handling, error
//! normalization); `classes` holds the typed endpoint calls.

pub mod classes;
pub mod client;
mod error;

pub use client::{ApiClient, LoginRedirect};
pub use error::{ApiError, ApiErrorKind};
