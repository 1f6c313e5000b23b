//! Swarm - 并行 Agent 任务执行引擎
//!
//! 模块划分：
//! - **agents**: AgentUnit 契约与注册表（按名查找的可插拔计算单元）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **engine**: 有界队列、worker 池、会话聚合与主控门面
//! - **observability**: tracing 初始化

pub mod agents;
pub mod config;
pub mod engine;
pub mod observability;

pub use agents::{AgentRegistry, AgentUnit};
pub use engine::{
    generate_session_id, BatchOutcome, EngineError, EngineStatus, ParallelEngine, ProgressSink,
    SessionHandle, TaskPriority, TaskRecord, TaskSpec, TaskStatus,
};
