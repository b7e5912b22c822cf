pub mod diagnostics;
pub mod schema;
pub mod validators;
pub mod value;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use schema::{Attribute, AttributeKind, ElementType, NestedObject, Plan, PlanModifier, Schema};
pub use value::{UNKNOWN, Value};
