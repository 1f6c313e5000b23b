//! 并行任务执行引擎：有界队列、worker 池、会话聚合、错误收敛与主控门面

pub mod error;
pub mod processor;
pub mod queue;
pub mod session;
pub mod task;
pub mod worker;

pub use error::EngineError;
pub use processor::{BatchOutcome, EngineStatus, ParallelEngine, SessionHandle};
pub use session::{generate_session_id, ProgressSink, SessionContext, SessionId, SessionSnapshot};
pub use task::{FailureKind, TaskId, TaskPriority, TaskRecord, TaskSpec, TaskStatus};
pub use worker::{WorkerSnapshot, WorkerStats};
