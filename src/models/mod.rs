//! Data models for Classflow entities

mod class;
mod user;

pub use class::*;
pub use user::*;
