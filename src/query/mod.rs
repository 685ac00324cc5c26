//! Query-string language: values, coercion, field resolution, parsing and compilation.

pub mod value;
pub mod coerce;
pub mod field;
pub mod parser;
pub mod compiler;

pub use compiler::{compile_delete, compile_select, Page, ResultShape};
pub use value::SqlValue;
