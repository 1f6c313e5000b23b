//! Agent 注册表
//!
//! 所有 AgentUnit 实现统一契约 run(input) -> Result<Value, String>，由 AgentRegistry
//! 按名注册与查找。派发时查不到名字会记为 UnknownAgent 失败任务，不会让引擎崩溃。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Agent 契约：把一份输入映射为一份输出或失败。
/// 引擎视其为不透明、时长有界、可并发调用的计算；不得假设共享可变状态。
#[async_trait]
pub trait AgentUnit: Send + Sync {
    /// Agent 名称（注册表键）
    fn name(&self) -> &str;

    /// 功能描述
    fn description(&self) -> &str;

    /// 执行一次计算
    async fn run(&self, input: Value) -> Result<Value, String>;
}

/// Agent 注册表：按名称存储 Arc<dyn AgentUnit>，显式构造后以引用传入引擎（无全局状态）
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn AgentUnit>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: impl AgentUnit + 'static) {
        let name = agent.name().to_string();
        self.agents.insert(name, Arc::new(agent));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentUnit>> {
        self.agents.get(name).cloned()
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
