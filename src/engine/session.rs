//! 会话上下文
//!
//! 聚合同一批次提交的全部 TaskRecord；completed / failed 列表由多个 worker 并发追加，
//! 通过内部 state 锁串行化——这是引擎中唯一的会话级共享写点。
//! 取消仅置标志位（协作式）：运行中的任务照常完成，未派发的任务在下次派发时短路。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::engine::task::{FailureKind, TaskId, TaskRecord, TaskStatus};

/// 会话 ID
pub type SessionId = String;

/// 生成会话 ID
pub fn generate_session_id() -> SessionId {
    format!("session_{}", uuid::Uuid::new_v4())
}

/// 进度回调：每个任务终结后以当前完成数调用一次；失败只记日志，不影响任务核算
#[async_trait::async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, session_id: &str, completed_count: usize) -> anyhow::Result<()>;
}

/// 会话内部状态（state 锁保护）
#[derive(Default)]
pub struct SessionState {
    /// 全部任务记录（task_id -> TaskRecord）
    tasks: HashMap<TaskId, TaskRecord>,
    /// 提交顺序
    order: Vec<TaskId>,
    /// 已完成（status == Completed）
    completed: Vec<TaskId>,
    /// 失败或取消（status == Failed | Cancelled）
    failed: Vec<TaskId>,
    started_at: Option<i64>,
    ended_at: Option<i64>,
    /// 全部终结的时刻（保留期清扫用）
    settled_clock: Option<Instant>,
}

/// 会话完成度快照（await_completion 轮询与状态查询用）
#[derive(Debug, Clone, Copy)]
pub struct SessionSnapshot {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// 仍未派发的任务数
    pub pending: usize,
    /// 会话创建时间（毫秒时间戳）
    pub started_at: Option<i64>,
    /// 全部终结时间；未终结为 None
    pub ended_at: Option<i64>,
}

impl SessionSnapshot {
    /// 所有任务均已终结（空批次视为已终结）
    pub fn is_settled(&self) -> bool {
        self.completed + self.failed >= self.total
    }
}

/// 会话上下文
pub struct SessionContext {
    pub session_id: SessionId,
    cancelled: AtomicBool,
    progress: std::sync::Mutex<Option<Arc<dyn ProgressSink>>>,
    state: Mutex<SessionState>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, progress: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            session_id: session_id.into(),
            cancelled: AtomicBool::new(false),
            progress: std::sync::Mutex::new(progress),
            state: Mutex::new(SessionState {
                started_at: Some(chrono::Utc::now().timestamp_millis()),
                // 无任务即终结；insert_task 会重新打开
                settled_clock: Some(Instant::now()),
                ..Default::default()
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 置取消标志；不打断运行中的任务
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn progress_sink(&self) -> Option<Arc<dyn ProgressSink>> {
        self.progress.lock().expect("progress lock poisoned").clone()
    }

    pub fn set_progress_sink(&self, sink: Arc<dyn ProgressSink>) {
        *self.progress.lock().expect("progress lock poisoned") = Some(sink);
    }

    /// 登记新任务（提交时调用）；会话若已终结则重新打开
    pub async fn insert_task(&self, record: TaskRecord) {
        let mut state = self.state.lock().await;
        state.order.push(record.task_id.clone());
        state.tasks.insert(record.task_id.clone(), record);
        state.ended_at = None;
        state.settled_clock = None;
    }

    /// 撤回尚未入队的记录（入队失败时调用，保证核算一致）
    pub async fn remove_task(&self, task_id: &str) {
        let mut state = self.state.lock().await;
        state.tasks.remove(task_id);
        state.order.retain(|id| id != task_id);
    }

    /// PENDING → RUNNING；返回记录副本（agent 名与输入）供派发。非 PENDING 返回 None。
    pub async fn begin_task(&self, task_id: &str) -> Option<TaskRecord> {
        let mut state = self.state.lock().await;
        let record = state.tasks.get_mut(task_id)?;
        if record.status != TaskStatus::Pending {
            return None;
        }
        record.mark_running();
        Some(record.clone())
    }

    /// 取消短路：仍为 PENDING 的任务置为 CANCELLED 并计入 failed 列表。
    /// 返回当前完成数（供进度回调）。
    pub async fn cancel_task(&self, task_id: &str) -> Option<usize> {
        let mut state = self.state.lock().await;
        let record = state.tasks.get_mut(task_id)?;
        if record.status != TaskStatus::Pending {
            return None;
        }
        record.mark_cancelled();
        let id = record.task_id.clone();
        state.failed.push(id);
        settle_if_done(&mut state);
        Some(state.completed.len())
    }

    /// 终态写回：附加输出或错误，追加到 completed / failed；返回当前完成数
    pub async fn finish_task(
        &self,
        task_id: &str,
        result: Result<Value, (FailureKind, String)>,
    ) -> Option<usize> {
        let mut state = self.state.lock().await;
        let record = state.tasks.get_mut(task_id)?;
        if record.status != TaskStatus::Running {
            return None;
        }
        let id = record.task_id.clone();
        match result {
            Ok(output) => {
                record.mark_completed(output);
                state.completed.push(id);
            }
            Err((kind, error)) => {
                record.mark_failed(kind, error);
                state.failed.push(id);
            }
        }
        settle_if_done(&mut state);
        Some(state.completed.len())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        let pending = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count();
        SessionSnapshot {
            total: state.tasks.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            pending,
            started_at: state.started_at,
            ended_at: state.ended_at,
        }
    }

    /// 按终结顺序导出 (completed, failed) 记录副本
    pub async fn collect_outcome(&self) -> (Vec<TaskRecord>, Vec<TaskRecord>) {
        let state = self.state.lock().await;
        let completed = state
            .completed
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect();
        let failed = state
            .failed
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect();
        (completed, failed)
    }

    /// 指定 Agent 的终态记录（可观测性查询用）
    pub async fn tasks_for_agent(&self, agent_name: &str) -> Vec<TaskRecord> {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|t| t.agent_name == agent_name && t.status.is_terminal())
            .cloned()
            .collect()
    }

    /// 是否已终结且超过保留期（清扫判据）
    pub async fn settled_for(&self, retention: Duration) -> bool {
        let state = self.state.lock().await;
        state
            .settled_clock
            .map(|t| t.elapsed() >= retention)
            .unwrap_or(false)
    }
}

fn settle_if_done(state: &mut SessionState) {
    if state.settled_clock.is_none()
        && state.completed.len() + state.failed.len() >= state.tasks.len()
    {
        state.ended_at = Some(chrono::Utc::now().timestamp_millis());
        state.settled_clock = Some(Instant::now());
    }
}
