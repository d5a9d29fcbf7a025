//! Calculator tool — one arithmetic operation on two numbers.

use async_trait::async_trait;
use turnstore_core::error::ToolError;

use crate::tool::Tool;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Perform basic arithmetic: add, subtract, multiply or divide two numbers."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["add", "subtract", "multiply", "divide"]
                },
                "a": { "type": "number", "description": "First operand" },
                "b": { "type": "number", "description": "Second operand" }
            },
            "required": ["operation", "a", "b"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let operation = arguments["operation"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'operation' argument".into()))?;
        let a = operand(&arguments, "a")?;
        let b = operand(&arguments, "b")?;

        let value = match operation {
            "add" => a + b,
            "subtract" => a - b,
            "multiply" => a * b,
            "divide" => {
                if b == 0.0 {
                    return Err(ToolError::ExecutionFailed {
                        tool_name: self.name().into(),
                        reason: "division by zero".into(),
                    });
                }
                a / b
            }
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "Unknown operation '{other}'"
                )));
            }
        };
        Ok(format_number(value))
    }
}

fn operand(arguments: &serde_json::Value, field: &str) -> Result<f64, ToolError> {
    arguments[field]
        .as_f64()
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{field}' must be a number")))
}

/// Integers print without a trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
