//! Structured output: JSON instruction strategies, schema validation and
//! the validate-and-retry loop.

pub mod json_output;
pub mod schema;
pub mod validator;

pub use json_output::{
    parse_json_output, try_parse_json_output, JsonModeStrategy, JsonOutputStrategy,
    JsonSchemaStrategy,
};
pub use schema::ObjectSchema;
pub use validator::{
    generate_object_with_retries, stream_object_with_retries, StructuredError, StructuredOptions,
    StructuredOutput,
};
