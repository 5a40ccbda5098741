//! JSON-schema subset validation and schema derivation.

pub mod generation;
pub mod validation;

pub use generation::schema_for;
pub use validation::{validate_arguments, ValidationIssue};
