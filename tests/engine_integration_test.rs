//! 引擎集成测试

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    use swarm::agents::EchoAgent;
    use swarm::config::EngineConfig;
    use swarm::engine::FailureKind;
    use swarm::{
        generate_session_id, AgentRegistry, AgentUnit, EngineError, ParallelEngine, ProgressSink,
        TaskPriority, TaskSpec, TaskStatus,
    };

    /// 总是失败
    struct FailAgent;

    #[async_trait]
    impl AgentUnit for FailAgent {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        async fn run(&self, _input: Value) -> Result<Value, String> {
            Err("simulated failure".to_string())
        }
    }

    /// 睡眠指定毫秒后返回
    struct SleepAgent {
        ms: u64,
    }

    #[async_trait]
    impl AgentUnit for SleepAgent {
        fn name(&self) -> &str {
            "sleep"
        }
        fn description(&self) -> &str {
            "Sleeps then returns"
        }
        async fn run(&self, input: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_millis(self.ms)).await;
            Ok(input)
        }
    }

    /// 长时间不返回（模拟卡死的 Agent）
    struct StallAgent;

    #[async_trait]
    impl AgentUnit for StallAgent {
        fn name(&self) -> &str {
            "stall"
        }
        fn description(&self) -> &str {
            "Never returns within test horizons"
        }
        async fn run(&self, input: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(input)
        }
    }

    /// 记录并发峰值（计数器共享，克隆注册后仍可在测试侧读取）
    #[derive(Clone)]
    struct TrackingAgent {
        current: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
    }

    impl TrackingAgent {
        fn new() -> Self {
            Self {
                current: Arc::new(AtomicUsize::new(0)),
                max_seen: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn peak(&self) -> usize {
            self.max_seen.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentUnit for TrackingAgent {
        fn name(&self) -> &str {
            "track"
        }
        fn description(&self) -> &str {
            "Tracks peak concurrency"
        }
        async fn run(&self, input: Value) -> Result<Value, String> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(input)
        }
    }

    /// 按派发顺序记录输入标签
    struct RecordingAgent {
        dispatched: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AgentUnit for RecordingAgent {
        fn name(&self) -> &str {
            "record"
        }
        fn description(&self) -> &str {
            "Records dispatch order"
        }
        async fn run(&self, input: Value) -> Result<Value, String> {
            let label = input
                .get("label")
                .and_then(|v| v.as_str())
                .unwrap_or("?")
                .to_string();
            self.dispatched.lock().await.push(label);
            Ok(input)
        }
    }

    /// 统计进度回调次数与最后完成数
    struct CountingSink {
        calls: AtomicUsize,
        last_completed: AtomicUsize,
    }

    #[async_trait]
    impl ProgressSink for CountingSink {
        async fn on_progress(&self, _session_id: &str, completed_count: usize) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_completed.fetch_max(completed_count, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(workers: usize) -> EngineConfig {
        EngineConfig {
            max_workers: workers,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_batch_accounting() {
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent);
        let engine = ParallelEngine::new(config(4), registry);
        engine.start().await;

        let specs: Vec<TaskSpec> = (0..10)
            .map(|i| TaskSpec::new("echo", json!({"text": format!("t{i}")})))
            .collect();
        let session_id = generate_session_id();
        let handle = engine.submit(&session_id, specs, None).await.unwrap();
        assert_eq!(handle.task_ids.len(), 10);

        let outcome = engine
            .await_completion(&session_id, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.completed.len() + outcome.failed.len(), 10);
        assert_eq!(outcome.completed.len(), 10);
        assert_eq!(outcome.unsettled, 0);
        for record in &outcome.completed {
            assert_eq!(record.status, TaskStatus::Completed);
            assert!(record.output.is_some() && record.error.is_none());
        }

        engine.shutdown().await;
    }

    async fn run_concurrency_bound(workers: usize, batch: usize) -> usize {
        let tracker = TrackingAgent::new();
        let mut registry = AgentRegistry::new();
        registry.register(tracker.clone());
        let engine = ParallelEngine::new(config(workers), registry);
        engine.start().await;

        let specs: Vec<TaskSpec> = (0..batch).map(|_| TaskSpec::new("track", json!({}))).collect();
        let session_id = generate_session_id();
        engine.submit(&session_id, specs, None).await.unwrap();
        let outcome = engine
            .await_completion(&session_id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.completed.len(), batch);

        engine.shutdown().await;
        tracker.peak()
    }

    #[tokio::test]
    async fn test_concurrency_bound_single_worker() {
        assert!(run_concurrency_bound(1, 6).await <= 1);
    }

    #[tokio::test]
    async fn test_concurrency_bound_four_workers() {
        assert!(run_concurrency_bound(4, 12).await <= 4);
    }

    #[tokio::test]
    async fn test_concurrency_bound_twenty_workers() {
        assert!(run_concurrency_bound(20, 40).await <= 20);
    }

    #[tokio::test]
    async fn test_limiter_caps_below_worker_count() {
        let tracker = TrackingAgent::new();
        let mut registry = AgentRegistry::new();
        registry.register(tracker.clone());
        // 8 个 worker 循环，但并发上限独立配置为 2
        let cfg = EngineConfig {
            max_workers: 8,
            max_concurrent: Some(2),
            ..Default::default()
        };
        let engine = ParallelEngine::new(cfg, registry);
        engine.start().await;

        let specs: Vec<TaskSpec> = (0..10).map(|_| TaskSpec::new("track", json!({}))).collect();
        let session_id = generate_session_id();
        engine.submit(&session_id, specs, None).await.unwrap();
        let outcome = engine
            .await_completion(&session_id, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(outcome.completed.len(), 10);
        assert!(tracker.peak() <= 2);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_batch_settles_immediately() {
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent);
        let engine = ParallelEngine::new(config(2), registry);
        engine.start().await;

        let session_id = generate_session_id();
        let handle = engine.submit(&session_id, Vec::new(), None).await.unwrap();
        assert!(handle.task_ids.is_empty());

        // 空批次立即视为终结，不消耗等待超时
        let started = std::time::Instant::now();
        let outcome = engine
            .await_completion(&session_id, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(!outcome.timed_out);
        assert!(outcome.completed.is_empty() && outcome.failed.is_empty());
        assert_eq!(outcome.unsettled, 0);
        assert!(started.elapsed() < Duration::from_secs(1));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_priority_dispatch_order_single_worker() {
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let mut registry = AgentRegistry::new();
        registry.register(RecordingAgent {
            dispatched: Arc::clone(&dispatched),
        });
        let engine = ParallelEngine::new(config(1), registry);
        engine.start().await;

        // 提交顺序 Low, Critical, Normal；派发应为 Critical, Normal, Low
        let specs = vec![
            TaskSpec::new("record", json!({"label": "low"})).with_priority(TaskPriority::Low),
            TaskSpec::new("record", json!({"label": "critical"}))
                .with_priority(TaskPriority::Critical),
            TaskSpec::new("record", json!({"label": "normal"})).with_priority(TaskPriority::Normal),
        ];
        let session_id = generate_session_id();
        engine.submit(&session_id, specs, None).await.unwrap();
        engine
            .await_completion(&session_id, Duration::from_secs(5))
            .await
            .unwrap();

        let order = dispatched.lock().await.clone();
        assert_eq!(order, vec!["critical", "normal", "low"]);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancellation_short_circuits_pending() {
        let mut registry = AgentRegistry::new();
        registry.register(SleepAgent { ms: 100 });
        let engine = ParallelEngine::new(config(1), registry);
        engine.start().await;

        let specs: Vec<TaskSpec> = (0..10).map(|_| TaskSpec::new("sleep", json!({}))).collect();
        let session_id = generate_session_id();
        engine.submit(&session_id, specs, None).await.unwrap();
        assert!(engine.cancel(&session_id).await);

        let outcome = engine
            .await_completion(&session_id, Duration::from_secs(5))
            .await
            .unwrap();

        let cancelled = outcome
            .failed
            .iter()
            .filter(|r| r.status == TaskStatus::Cancelled)
            .count();
        // 最多 1 个任务（已派发的那个）不是 CANCELLED
        assert!(cancelled >= 9, "expected >= 9 cancelled, got {cancelled}");
        let settled = outcome.completed.len() + outcome.failed.len() + outcome.unsettled;
        assert_eq!(settled, 10);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent);
        registry.register(FailAgent);
        let engine = ParallelEngine::new(config(4), registry);
        engine.start().await;

        let mut specs = vec![TaskSpec::new("fail", json!({}))];
        specs.extend((0..9).map(|i| TaskSpec::new("echo", json!({"text": format!("t{i}")}))));
        let session_id = generate_session_id();
        engine.submit(&session_id, specs, None).await.unwrap();

        let outcome = engine
            .await_completion(&session_id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.completed.len(), 9);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].status, TaskStatus::Failed);
        assert_eq!(outcome.failed[0].failure_kind, Some(FailureKind::AgentFailure));
        assert_eq!(outcome.failed[0].error.as_deref(), Some("simulated failure"));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_agent_becomes_failed_task() {
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent);
        let engine = ParallelEngine::new(config(1), registry);
        engine.start().await;

        let specs = vec![TaskSpec::new("no_such_agent", json!({}))];
        let session_id = generate_session_id();
        engine.submit(&session_id, specs, None).await.unwrap();

        let outcome = engine
            .await_completion(&session_id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].failure_kind, Some(FailureKind::UnknownAgent));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_idempotent() {
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent);
        let engine = ParallelEngine::new(config(2), registry);
        engine.start().await;

        engine.shutdown().await;
        engine.shutdown().await;

        // 关闭后提交应拒绝
        let result = engine
            .submit(&generate_session_id(), vec![TaskSpec::new("echo", json!({}))], None)
            .await;
        assert!(matches!(result, Err(EngineError::NotReady)));
    }

    #[tokio::test]
    async fn test_timeout_returns_partial_results() {
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent);
        registry.register(StallAgent);
        let engine = ParallelEngine::new(config(4), registry);
        engine.start().await;

        let mut specs = vec![TaskSpec::new("stall", json!({}))];
        specs.extend((0..4).map(|i| TaskSpec::new("echo", json!({"text": format!("t{i}")}))));
        let session_id = generate_session_id();
        engine.submit(&session_id, specs, None).await.unwrap();

        let started = std::time::Instant::now();
        let outcome = engine
            .await_completion(&session_id, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert_eq!(outcome.completed.len() + outcome.failed.len(), 4);
        assert_eq!(outcome.unsettled, 1);
        // 不应阻塞调用方超过超时加少量调度余量
        assert!(started.elapsed() < Duration::from_secs(3));
        // 卡死的任务不调用 shutdown（join 会等 worker），引擎随测试一起丢弃
    }

    #[tokio::test]
    async fn test_per_task_timeout_marks_failed() {
        let mut registry = AgentRegistry::new();
        registry.register(StallAgent);
        let cfg = EngineConfig {
            max_workers: 1,
            task_timeout_secs: Some(1),
            ..Default::default()
        };
        let engine = ParallelEngine::new(cfg, registry);
        engine.start().await;

        let specs = vec![TaskSpec::new("stall", json!({}))];
        let session_id = generate_session_id();
        engine.submit(&session_id, specs, None).await.unwrap();

        let outcome = engine
            .await_completion(&session_id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].failure_kind, Some(FailureKind::Timeout));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_progress_sink_called_per_terminal_task() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            last_completed: AtomicUsize::new(0),
        });
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent);
        registry.register(FailAgent);
        let engine = ParallelEngine::new(config(2), registry);
        engine.start().await;

        let mut specs: Vec<TaskSpec> = (0..8)
            .map(|i| TaskSpec::new("echo", json!({"text": format!("t{i}")})))
            .collect();
        specs.push(TaskSpec::new("fail", json!({})));
        let session_id = generate_session_id();
        engine
            .submit(&session_id, specs, Some(sink.clone() as Arc<dyn ProgressSink>))
            .await
            .unwrap();
        engine
            .await_completion(&session_id, Duration::from_secs(5))
            .await
            .unwrap();

        // 每个终结任务至少一次回调；完成数最终到达 8
        assert_eq!(sink.calls.load(Ordering::SeqCst), 9);
        assert_eq!(sink.last_completed.load(Ordering::SeqCst), 8);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_agent_history_newest_first() {
        let mut registry = AgentRegistry::new();
        registry.register(EchoAgent);
        let engine = ParallelEngine::new(config(1), registry);
        engine.start().await;

        for i in 0..2 {
            let session_id = generate_session_id();
            let specs = vec![TaskSpec::new("echo", json!({"text": format!("s{i}")}))];
            engine.submit(&session_id, specs, None).await.unwrap();
            engine
                .await_completion(&session_id, Duration::from_secs(5))
                .await
                .unwrap();
        }

        let history = engine.agent_history("echo").await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.status.is_terminal()));
        assert!(history[0].started_at.unwrap_or(0) >= history[1].started_at.unwrap_or(0));

        assert!(engine.agent_history("missing").await.is_empty());

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_full_surfaces_error() {
        let mut registry = AgentRegistry::new();
        registry.register(StallAgent);
        // 1 worker + 容量 2 的队列：大批次提交必然触顶
        let cfg = EngineConfig {
            max_workers: 1,
            queue_size: 2,
            enqueue_wait_ms: 50,
            ..Default::default()
        };
        let engine = ParallelEngine::new(cfg, registry);
        engine.start().await;

        let specs: Vec<TaskSpec> = (0..20).map(|_| TaskSpec::new("stall", json!({}))).collect();
        let result = engine.submit(&generate_session_id(), specs, None).await;
        assert!(matches!(result, Err(EngineError::QueueFull)));
        // worker 卡在 stall 任务上，不调用 shutdown
    }
}
