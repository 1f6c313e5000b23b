//! Worker 统计
//!
//! 计数器由所属 worker 独占写入（单写多读）；状态查询只取快照，不阻塞派发。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// 每 worker 统计信息
pub struct WorkerStats {
    pub worker_id: String,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    total_execution_ms: AtomicU64,
    /// 正在执行的 Agent 名（空闲时为 None）
    current_task: Mutex<Option<String>>,
    /// 最后活跃时间（毫秒时间戳）
    last_activity: Mutex<Option<i64>>,
}

impl WorkerStats {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            total_execution_ms: AtomicU64::new(0),
            current_task: Mutex::new(None),
            last_activity: Mutex::new(None),
        }
    }

    /// 任务开始：记录当前 Agent 与活跃时间
    pub fn task_started(&self, agent_name: &str) {
        *self.current_task.lock().expect("stats lock poisoned") = Some(agent_name.to_string());
        *self.last_activity.lock().expect("stats lock poisoned") =
            Some(chrono::Utc::now().timestamp_millis());
    }

    /// 任务终结：更新计数与累计耗时，清空当前任务
    pub fn task_finished(&self, success: bool, elapsed_ms: u64) {
        if success {
            self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_execution_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        *self.current_task.lock().expect("stats lock poisoned") = None;
        *self.last_activity.lock().expect("stats lock poisoned") =
            Some(chrono::Utc::now().timestamp_millis());
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let completed = self.tasks_completed.load(Ordering::Relaxed);
        let total_ms = self.total_execution_ms.load(Ordering::Relaxed);
        WorkerSnapshot {
            worker_id: self.worker_id.clone(),
            tasks_completed: completed,
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            total_execution_ms: total_ms,
            average_execution_ms: total_ms / completed.max(1),
            current_task: self
                .current_task
                .lock()
                .expect("stats lock poisoned")
                .clone(),
            last_activity: *self.last_activity.lock().expect("stats lock poisoned"),
        }
    }
}

/// 统计快照（status() 返回）
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub worker_id: String,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_execution_ms: u64,
    pub average_execution_ms: u64,
    pub current_task: Option<String>,
    pub last_activity: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_counters() {
        let stats = WorkerStats::new("worker_000");
        stats.task_started("echo");
        assert_eq!(stats.snapshot().current_task.as_deref(), Some("echo"));

        stats.task_finished(true, 40);
        stats.task_started("echo");
        stats.task_finished(false, 10);

        let snap = stats.snapshot();
        assert_eq!(snap.tasks_completed, 1);
        assert_eq!(snap.tasks_failed, 1);
        assert_eq!(snap.total_execution_ms, 50);
        assert_eq!(snap.average_execution_ms, 50);
        assert!(snap.current_task.is_none());
        assert!(snap.last_activity.is_some());
    }
}
