//! Statement execution and write-graph construction.

mod crud;
pub mod write;
pub use crud::{CrudService, WriteMode};
