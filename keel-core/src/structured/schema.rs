//! JSON Schema compilation and validation.

use crate::error::AppError;
use crate::types::{RequestContext, ValidationIssue};
use std::fmt;
use std::sync::Arc;

/// A compiled JSON Schema.
#[derive(Clone)]
pub struct ObjectSchema {
    schema: serde_json::Value,
    validator: Arc<jsonschema::Validator>,
}

impl fmt::Debug for ObjectSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectSchema")
            .field("schema", &self.schema)
            .finish()
    }
}

impl ObjectSchema {
    /// Compile a schema. An invalid schema is a caller error.
    pub fn compile(ctx: &RequestContext, schema: &serde_json::Value) -> Result<Self, AppError> {
        let validator = jsonschema::options().build(schema).map_err(|e| {
            AppError::validation(ctx, format!("Invalid output schema: {}", e))
        })?;
        Ok(Self {
            schema: schema.clone(),
            validator: Arc::new(validator),
        })
    }

    /// The raw schema document
    pub fn schema(&self) -> &serde_json::Value {
        &self.schema
    }

    /// Validate an instance, returning every issue found.
    pub fn validate(&self, instance: &serde_json::Value) -> Result<(), Vec<ValidationIssue>> {
        let issues: Vec<ValidationIssue> = self
            .validator
            .iter_errors(instance)
            .map(|e| {
                let schema_path = e.schema_path.to_string();
                let code = schema_path
                    .rsplit('/')
                    .next()
                    .filter(|segment| !segment.is_empty())
                    .unwrap_or("invalid")
                    .to_string();
                ValidationIssue::new(e.instance_path.to_string(), e.to_string(), code)
            })
            .collect();

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// Check if an instance is valid
    pub fn is_valid(&self, instance: &serde_json::Value) -> bool {
        self.validator.is_valid(instance)
    }
}
