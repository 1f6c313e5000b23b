//! 任务记录与状态机
//!
//! TaskRecord 描述一次 AgentUnit 调用：PENDING → RUNNING → {COMPLETED, FAILED, CANCELLED}，
//! 终态之后不再变更；output 与 error 互斥，且在 PENDING / RUNNING 阶段均为空。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 任务优先级（数值越大越先派发）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    Low = 1,
    Normal = 5,
    High = 8,
    Critical = 10,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// 等待派发
    Pending,
    /// 正在执行
    Running,
    /// 执行成功
    Completed,
    /// 执行失败（Agent 报错 / 未注册 / 超时）
    Failed,
    /// 取消后未派发即短路
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// 失败类别：区分 Agent 自身报错、未注册、执行超时与取消短路
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    AgentFailure,
    UnknownAgent,
    Timeout,
    Cancelled,
}

/// 提交批次中的单个任务描述
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// 注册表中的 Agent 名
    pub agent_name: String,
    /// 输入数据（JSON）
    pub input: Value,
    pub priority: TaskPriority,
}

impl TaskSpec {
    pub fn new(agent_name: impl Into<String>, input: Value) -> Self {
        Self {
            agent_name: agent_name.into(),
            input,
            priority: TaskPriority::default(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// 任务 ID
pub type TaskId = String;

/// 单次 AgentUnit 调用的记录；由派发它的 worker 独占推进状态机
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    /// 所属会话
    pub session_id: String,
    pub agent_name: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub input: Value,
    /// 仅成功时存在
    pub output: Option<Value>,
    /// 仅失败/取消时存在
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    /// 开始执行时间（毫秒时间戳）
    pub started_at: Option<i64>,
    /// 终结时间
    pub ended_at: Option<i64>,
}

impl TaskRecord {
    pub fn new(session_id: impl Into<String>, spec: TaskSpec) -> Self {
        Self {
            task_id: format!("task_{}", uuid::Uuid::new_v4()),
            session_id: session_id.into(),
            agent_name: spec.agent_name,
            priority: spec.priority,
            status: TaskStatus::Pending,
            input: spec.input,
            output: None,
            error: None,
            failure_kind: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// PENDING → RUNNING，由派发 worker 在调用 Agent 前执行一次
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(chrono::Utc::now().timestamp_millis());
    }

    /// RUNNING → COMPLETED，附加输出
    pub fn mark_completed(&mut self, output: Value) {
        self.status = TaskStatus::Completed;
        self.output = Some(output);
        self.ended_at = Some(chrono::Utc::now().timestamp_millis());
    }

    /// → FAILED，附加错误与失败类别
    pub fn mark_failed(&mut self, kind: FailureKind, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.failure_kind = Some(kind);
        self.ended_at = Some(chrono::Utc::now().timestamp_millis());
    }

    /// PENDING → CANCELLED（会话取消后尚未派发的任务）
    pub fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.failure_kind = Some(FailureKind::Cancelled);
        self.ended_at = Some(chrono::Utc::now().timestamp_millis());
    }

    /// 执行耗时（毫秒），未终结时为 None
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
