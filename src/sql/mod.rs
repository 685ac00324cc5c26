//! Safe SQL builder: identifiers from the schema document only, values as parameters.

mod builder;
pub use builder::*;
