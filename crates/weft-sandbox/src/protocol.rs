use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::config::SandboxConfig;

/// Engine limits applied inside the isolated context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl From<&SandboxConfig> for Limits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            loop_iteration_limit: config.loop_iteration_limit,
            recursion_limit: config.recursion_limit,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

/// The single message handed to an isolated context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartMessage {
    pub package_name: String,
    pub code: String,
    pub input: Value,
    /// Extra parameter names bound to the package besides `pkg`.
    #[serde(default)]
    pub binding_names: Vec<String>,
    /// CommonJS-style source that populates `module.exports`.
    pub binding_source: String,
    #[serde(default)]
    pub limits: Limits,
}

/// The single message an isolated context sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultMessage {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_message_wire_shape() {
        let ok = serde_json::to_value(ResultMessage::ok(json!([1]))).unwrap();
        assert_eq!(ok, json!({"success": true, "output": [1]}));

        let err: ResultMessage =
            serde_json::from_value(json!({"success": false, "error": "boom"})).unwrap();
        assert_eq!(err, ResultMessage::err("boom"));
    }

    #[test]
    fn test_start_message_defaults_limits() {
        let msg: StartMessage = serde_json::from_value(json!({
            "package_name": "lodash",
            "code": "return input;",
            "input": null,
            "binding_source": ""
        }))
        .unwrap();
        assert_eq!(msg.limits, Limits::default());
        assert!(msg.binding_names.is_empty());
    }
}
