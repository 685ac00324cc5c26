pub mod types;
pub mod loader;
pub mod validator;
pub mod resolved;

pub use types::*;
pub use loader::*;
pub use validator::*;
pub use resolved::*;

/// Schema document shared by unit tests.
#[cfg(test)]
pub(crate) fn fixture_config() -> FullConfig {
    serde_json::from_str(include_str!("../../tests/fixtures/schema.json"))
        .expect("fixture schema document parses")
}

#[cfg(test)]
pub(crate) fn fixture_catalog() -> Catalog {
    resolve(&fixture_config()).expect("fixture schema document resolves")
}
