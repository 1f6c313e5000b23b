//! Agent 契约与注册表
//!
//! AgentUnit 是引擎调度的计算单元；AgentRegistry 显式构造、按名查找，无环境全局状态。

mod echo;
mod registry;

pub use echo::EchoAgent;
pub use registry::{AgentRegistry, AgentUnit};
