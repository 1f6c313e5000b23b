//! 引擎错误类型
//!
//! 仅结构性误用（未启动、队列满、未知会话）会作为错误返回给调用方；
//! 单个任务层面的失败一律收敛进 TaskRecord（见 task::FailureKind），绝不跨引擎边界抛出。

use thiserror::Error;

/// 引擎门面操作可能返回的错误
#[derive(Error, Debug)]
pub enum EngineError {
    /// 引擎尚未 start() 或已 shutdown()
    #[error("Engine not ready")]
    NotReady,

    /// 队列已满，提交被拒绝；调用方需重试或削减负载
    #[error("Work queue full")]
    QueueFull,

    #[error("Unknown session: {0}")]
    UnknownSession(String),
}
