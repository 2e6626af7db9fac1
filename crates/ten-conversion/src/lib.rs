pub mod rule;
pub mod schema;

pub use rule::{MsgAndResultConversion, MsgConversion, PathResultConversion, Rule};
pub use schema::{JsonSchemaStore, SchemaError, SchemaStore};
