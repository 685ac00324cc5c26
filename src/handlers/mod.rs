//! HTTP handlers.

pub mod endpoint;
pub use endpoint::*;
