//! 并行处理引擎：主控门面
//!
//! 固定数量的 worker 循环消费共享有界队列，在全局并发限制（Semaphore）下调用 AgentUnit，
//! 结果写回 TaskRecord 并聚合进所属 SessionContext。提供 submit / await_completion /
//! cancel / status / agent_history / shutdown 操作；后台清扫任务按保留期回收已终结会话。
//!
//! 并发上限与 worker 数是两个独立可调的界：Semaphore 限制同时运行的 Agent 调用数，
//! worker 数限制循环数，便于日后为长轮询等用途预留循环而不放大实际并发。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentRegistry;
use crate::config::EngineConfig;
use crate::engine::error::EngineError;
use crate::engine::queue::{QueueItem, WorkQueue};
use crate::engine::session::{ProgressSink, SessionContext, SessionId};
use crate::engine::task::{FailureKind, TaskId, TaskRecord, TaskSpec};
use crate::engine::worker::{WorkerSnapshot, WorkerStats};

/// await_completion 轮询间隔（短且固定：有界等待而非自旋）
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// worker 出队等待：短超时保证运行标志回查与关闭响应
const DEQUEUE_WAIT: Duration = Duration::from_millis(200);

/// 提交返回的会话句柄
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    /// 本批次任务 id（已按派发顺序排列）
    pub task_ids: Vec<TaskId>,
}

/// 一个批次的最终结果（超时或取消时为部分结果）
#[derive(Debug)]
pub struct BatchOutcome {
    pub completed: Vec<TaskRecord>,
    pub failed: Vec<TaskRecord>,
    /// 等待超时（上报条件而非错误）
    pub timed_out: bool,
    /// 返回时仍未终结的任务数
    pub unsettled: usize,
}

/// 引擎状态快照
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub queue_utilization: f64,
    pub active_sessions: usize,
    pub total_workers: usize,
    /// 正在执行任务的 worker 数
    pub active_workers: usize,
    pub total_tasks_completed: u64,
    pub total_tasks_failed: u64,
    pub workers: Vec<WorkerSnapshot>,
}

/// 并行任务执行引擎
pub struct ParallelEngine {
    config: EngineConfig,
    registry: Arc<AgentRegistry>,
    queue: WorkQueue,
    /// 全局并发限制（与 worker 数独立）
    limiter: Arc<Semaphore>,
    sessions: RwLock<HashMap<SessionId, Arc<SessionContext>>>,
    worker_stats: Vec<Arc<WorkerStats>>,
    running: AtomicBool,
    shutdown_token: CancellationToken,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ParallelEngine {
    pub fn new(config: EngineConfig, registry: AgentRegistry) -> Arc<Self> {
        let worker_stats = (0..config.max_workers())
            .map(|i| Arc::new(WorkerStats::new(format!("worker_{i:03}"))))
            .collect();
        Arc::new(Self {
            queue: WorkQueue::new(config.queue_size()),
            limiter: Arc::new(Semaphore::new(config.max_concurrent())),
            sessions: RwLock::new(HashMap::new()),
            worker_stats,
            running: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            handles: tokio::sync::Mutex::new(Vec::new()),
            registry: Arc::new(registry),
            config,
        })
    }

    /// 启动 worker 循环与会话清扫任务；重复调用无效果
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut handles = self.handles.lock().await;
        for stats in &self.worker_stats {
            let engine = Arc::clone(self);
            handles.push(tokio::spawn(engine.worker_loop(Arc::clone(stats))));
        }
        handles.push(self.spawn_sweeper());

        tracing::info!(
            max_workers = self.worker_stats.len(),
            max_concurrent = self.config.max_concurrent(),
            queue_size = self.config.queue_size(),
            agents = self.registry.len(),
            "Parallel engine started"
        );
    }

    /// 提交一个批次：创建或复用会话，批内按优先级降序入队（平级保持提交顺序），
    /// 立即返回句柄，不等待完成
    pub async fn submit(
        &self,
        session_id: &str,
        specs: Vec<TaskSpec>,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<SessionHandle, EngineError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(EngineError::NotReady);
        }

        let session = self.get_or_create_session(session_id, progress).await;

        let mut records: Vec<TaskRecord> = specs
            .into_iter()
            .map(|spec| TaskRecord::new(session_id, spec))
            .collect();
        // 稳定排序：平级按提交顺序
        records.sort_by_key(|r| std::cmp::Reverse(r.priority));

        let enqueue_wait = self.config.enqueue_wait();
        let mut task_ids = Vec::with_capacity(records.len());
        for record in records {
            let task_id = record.task_id.clone();
            session.insert_task(record).await;
            let item = QueueItem::Task(session_id.to_string(), task_id.clone());
            if let Err(e) = self.queue.enqueue(item, enqueue_wait).await {
                // 撤回未入队的记录，保证会话核算与实际派发一致
                session.remove_task(&task_id).await;
                tracing::warn!(session_id, enqueued = task_ids.len(), "Batch submit rejected, queue full");
                return Err(e);
            }
            task_ids.push(task_id);
        }

        tracing::info!(session_id, task_count = task_ids.len(), "Batch submitted");
        Ok(SessionHandle {
            session_id: session_id.to_string(),
            task_ids,
        })
    }

    /// 等待会话完成：固定间隔轮询完成计数，直到全部终结、取消后待派发任务清空、
    /// 或超时为止。超时返回部分结果（timed_out = true），不是错误。
    pub async fn await_completion(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<BatchOutcome, EngineError> {
        let session = self
            .get_session(session_id)
            .await
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;

        let deadline = Instant::now() + timeout;
        let mut timed_out = false;
        loop {
            let snap = session.snapshot().await;
            if snap.is_settled() {
                break;
            }
            // 取消后：待派发任务全部短路完毕即可返回；运行中的任务不强制等待
            if session.is_cancelled() && snap.pending == 0 {
                break;
            }
            if Instant::now() >= deadline {
                timed_out = true;
                tracing::warn!(
                    session_id,
                    completed = snap.completed,
                    failed = snap.failed,
                    total = snap.total,
                    "Batch wait timed out"
                );
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let (completed, failed) = session.collect_outcome().await;
        let snap = session.snapshot().await;
        Ok(BatchOutcome {
            unsettled: snap.total.saturating_sub(snap.completed + snap.failed),
            completed,
            failed,
            timed_out,
        })
    }

    /// 取消会话（协作式，仅置标志位）；未知会话返回 false
    pub async fn cancel(&self, session_id: &str) -> bool {
        match self.get_session(session_id).await {
            Some(session) => {
                session.cancel();
                tracing::info!(session_id, "Session cancelled");
                true
            }
            None => false,
        }
    }

    /// 引擎状态快照；不阻塞派发
    pub async fn status(&self) -> EngineStatus {
        let workers: Vec<WorkerSnapshot> =
            self.worker_stats.iter().map(|s| s.snapshot()).collect();
        let active_workers = workers.iter().filter(|w| w.current_task.is_some()).count();
        let total_tasks_completed = workers.iter().map(|w| w.tasks_completed).sum();
        let total_tasks_failed = workers.iter().map(|w| w.tasks_failed).sum();
        let queue_depth = self.queue.depth();
        let queue_capacity = self.queue.capacity();

        EngineStatus {
            running: self.running.load(Ordering::SeqCst),
            queue_depth,
            queue_capacity,
            queue_utilization: queue_depth as f64 / queue_capacity as f64,
            active_sessions: self.sessions.read().await.len(),
            total_workers: workers.len(),
            active_workers,
            total_tasks_completed,
            total_tasks_failed,
            workers,
        }
    }

    /// 指定 Agent 在保留会话中的终态记录，按开始时间倒序（最近优先）
    pub async fn agent_history(&self, agent_name: &str) -> Vec<TaskRecord> {
        let mut records = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for session in sessions.values() {
                records.extend(session.tasks_for_agent(agent_name).await);
            }
        }
        records.sort_by_key(|r| std::cmp::Reverse(r.started_at.unwrap_or(0)));
        records
    }

    /// 关闭：清运行标志，向每个 worker 投毒丸，等待全部循环退出。幂等。
    pub async fn shutdown(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.shutdown_token.cancel();

        let mut handles = self.handles.lock().await;
        if !was_running && handles.is_empty() {
            return;
        }

        // 队列满或已关闭时忽略投递失败：worker 也会在出队超时后回查运行标志退出
        for _ in 0..handles.len() {
            let _ = self
                .queue
                .enqueue(QueueItem::Poison, Duration::from_millis(100))
                .await;
        }

        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Worker join failed");
            }
        }

        tracing::info!("Parallel engine shut down");
    }

    async fn get_session(&self, session_id: &str) -> Option<Arc<SessionContext>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn get_or_create_session(
        &self,
        session_id: &str,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Arc<SessionContext> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(session_id) {
            Some(session) => {
                if let Some(sink) = progress {
                    session.set_progress_sink(sink);
                }
                Arc::clone(session)
            }
            None => {
                let session = Arc::new(SessionContext::new(session_id, progress));
                sessions.insert(session_id.to_string(), Arc::clone(&session));
                session
            }
        }
    }

    /// worker 循环：短超时出队 → 毒丸退出 → 限流许可 → 派发。
    /// 单个任务的任何失败都不会终止循环。
    async fn worker_loop(self: Arc<Self>, stats: Arc<WorkerStats>) {
        tracing::info!(worker = %stats.worker_id, "Worker started");

        while self.running.load(Ordering::SeqCst) {
            match self.queue.dequeue(DEQUEUE_WAIT).await {
                Some(QueueItem::Poison) => break,
                Some(QueueItem::Task(session_id, task_id)) => {
                    let permit = match self.limiter.clone().acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => break, // Semaphore 已关闭
                    };
                    self.execute_task(&stats, &session_id, &task_id).await;
                    drop(permit);
                }
                None => continue, // 队列空闲，回查运行标志
            }
        }

        tracing::info!(worker = %stats.worker_id, "Worker stopped");
    }

    /// 派发单个任务：取消短路 → 置 RUNNING → 调用 Agent → 终态写回与聚合
    async fn execute_task(&self, stats: &WorkerStats, session_id: &str, task_id: &str) {
        let session = match self.get_session(session_id).await {
            Some(s) => s,
            None => {
                // 会话已被清扫或从未存在：无处记录，只能丢弃
                tracing::warn!(session_id, task_id, "Session missing at dispatch, dropping task");
                return;
            }
        };

        // 协作式取消：尚未开始的任务短路为 CANCELLED
        if session.is_cancelled() {
            if let Some(completed) = session.cancel_task(task_id).await {
                tracing::info!(session_id, task_id, "Task cancelled before dispatch");
                self.fire_progress(&session, completed).await;
            }
            return;
        }

        let record = match session.begin_task(task_id).await {
            Some(r) => r,
            None => return, // 已非 PENDING，不重复派发
        };

        stats.task_started(&record.agent_name);
        let start = Instant::now();

        let result = self.run_agent(&record).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let success = result.is_ok();
        match &result {
            Ok(_) => tracing::info!(
                worker = %stats.worker_id,
                session_id,
                task_id,
                agent = %record.agent_name,
                elapsed_ms,
                "Task completed"
            ),
            Err((kind, error)) => tracing::warn!(
                worker = %stats.worker_id,
                session_id,
                task_id,
                agent = %record.agent_name,
                ?kind,
                error = %error,
                elapsed_ms,
                "Task failed"
            ),
        }

        let completed = session.finish_task(task_id, result).await;
        stats.task_finished(success, elapsed_ms);

        if let Some(count) = completed {
            self.fire_progress(&session, count).await;
        }
    }

    /// 调用 Agent：注册表查找、可选单任务超时、panic 隔离。
    /// 所有失败路径都折叠为 (FailureKind, message)，不向上传播。
    async fn run_agent(&self, record: &TaskRecord) -> Result<Value, (FailureKind, String)> {
        let agent = match self.registry.get(&record.agent_name) {
            Some(a) => a,
            None => {
                return Err((
                    FailureKind::UnknownAgent,
                    format!("Unknown agent: {}", record.agent_name),
                ))
            }
        };

        // 独立任务中调用：Agent panic 转为 JoinError 而不是拖垮 worker 循环
        let input = record.input.clone();
        let invocation = tokio::spawn(async move { agent.run(input).await });

        let joined = match self.config.task_timeout() {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(j) => j,
                Err(_) => {
                    return Err((
                        FailureKind::Timeout,
                        format!(
                            "Agent '{}' timed out after {}s",
                            record.agent_name,
                            limit.as_secs()
                        ),
                    ))
                }
            },
            None => invocation.await,
        };

        match joined {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err((FailureKind::AgentFailure, e)),
            Err(e) => Err((
                FailureKind::AgentFailure,
                format!("Agent '{}' panicked: {e}", record.agent_name),
            )),
        }
    }

    async fn fire_progress(&self, session: &SessionContext, completed_count: usize) {
        if let Some(sink) = session.progress_sink() {
            if let Err(e) = sink.on_progress(&session.session_id, completed_count).await {
                tracing::warn!(session_id = %session.session_id, error = %e, "Progress sink failed");
            }
        }
    }

    fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let interval = engine.config.sweep_interval();
            let retention = engine.config.retention();
            loop {
                tokio::select! {
                    _ = engine.shutdown_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let evicted = engine.sweep_sessions(retention).await;
                        if evicted > 0 {
                            tracing::info!(evicted, "Evicted settled sessions");
                        }
                    }
                }
            }
        })
    }

    /// 回收终结后超过保留期的会话
    async fn sweep_sessions(&self, retention: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (id, session) in sessions.iter() {
            if session.settled_for(retention).await {
                expired.push(id.clone());
            }
        }
        for id in &expired {
            sessions.remove(id);
        }
        expired.len()
    }
}
