//! Infrastructure - configuration and the resilient state cache

pub mod cache;
pub mod config;

pub use cache::{LocalCache, ResilientCache, StateStore};
pub use config::Config;
