//! Static description of a tool: name, description and a JSON-describable
//! input schema. Kept separate from [`super::registry`] so a
//! schema can be serialized into a model's tool-list request without
//! touching the invocation machinery.

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: &'static str, description: &'static str, input_schema: Value) -> Self {
        Self { name, description, input_schema }
    }
}
