//! Echo Agent（演示/测试用）

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::AgentUnit;

/// Echo Agent：原样返回输入中的 text 字段
pub struct EchoAgent;

#[async_trait]
impl AgentUnit for EchoAgent {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input text (for demos and tests). Input: {\"text\": \"message\"}"
    }

    async fn run(&self, input: Value) -> Result<Value, String> {
        let text = input
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        Ok(Value::String(text.to_string()))
    }
}
