//! Swarm - 并行 Agent 任务执行引擎
//!
//! 入口：初始化日志、注册内置 Agent、启动引擎并提交一个演示批次。

use swarm::agents::EchoAgent;
use swarm::config::{load_config, AppConfig};
use swarm::{generate_session_id, AgentRegistry, ParallelEngine, TaskPriority, TaskSpec};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    swarm::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let mut registry = AgentRegistry::new();
    registry.register(EchoAgent);

    let engine = ParallelEngine::new(cfg.engine.clone(), registry);
    engine.start().await;

    let specs = vec![
        TaskSpec::new("echo", serde_json::json!({"text": "hello"})),
        TaskSpec::new("echo", serde_json::json!({"text": "swarm"}))
            .with_priority(TaskPriority::High),
    ];
    let session_id = generate_session_id();
    let handle = engine.submit(&session_id, specs, None).await?;
    let outcome = engine
        .await_completion(&handle.session_id, cfg.engine.batch_timeout())
        .await?;

    tracing::info!(
        completed = outcome.completed.len(),
        failed = outcome.failed.len(),
        timed_out = outcome.timed_out,
        "Demo batch finished"
    );

    engine.shutdown().await;
    Ok(())
}
