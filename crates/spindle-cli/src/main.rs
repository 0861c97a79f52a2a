use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use spindle_core::domain::{LastRunState, TaskError};
use spindle_core::observability::TaskCounts;
use spindle_core::ports::{Clock, Job, JobContext, SystemClock};
use spindle_core::{
    InMemoryTriggerEngine, Schedule, SchedulerConfig, TaskConfiguration, TaskRegistry,
};

#[derive(Debug, Parser)]
#[command(name = "spindle", about = "Run the in-memory task scheduler demo")]
struct Args {
    /// Path to spindle.toml (SPINDLE_* env vars override it)
    #[arg(long)]
    config: Option<String>,

    /// Name greeted by the one-shot task
    #[arg(long, default_value = "spindle")]
    name: String,

    /// Interval of the recurring heartbeat task, in seconds
    #[arg(long, default_value_t = 2)]
    every: u64,

    /// How many heartbeat runs fail before it starts succeeding
    #[arg(long, default_value_t = 1)]
    failures: u32,

    /// Keep running until Ctrl-C instead of exiting after the one-shot task
    #[arg(long)]
    watch: bool,
}

/// 1 回だけ挨拶する
struct HelloJob;

#[async_trait]
impl Job<String> for HelloJob {
    async fn execute(&self, ctx: &JobContext) -> Result<String, TaskError> {
        let name = ctx.configuration().name().unwrap_or("world");
        Ok(format!("Hello, {name}!"))
    }
}

#[derive(Debug)]
struct IntentionalFailure {
    left: u32,
}

impl fmt::Display for IntentionalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "intentional failure (left={})", self.left)
    }
}

impl std::error::Error for IntentionalFailure {}

/// 最初の数回は失敗する定期タスク
struct HeartbeatJob {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl Job<String> for HeartbeatJob {
    async fn execute(&self, ctx: &JobContext) -> Result<String, TaskError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(Arc::new(IntentionalFailure { left }));
        }
        Ok(format!("heartbeat at {}", ctx.fire_time()))
    }
}

#[derive(Debug, Serialize)]
struct Report {
    task: String,
    result: Result<String, String>,
    last_run: Option<LastRunState>,
    counts: TaskCounts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spindle_core=info,spindle_cli=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = SchedulerConfig::load(args.config.as_deref()).context("loading configuration")?;
    let await_timeout = config.await_timeout();

    // (A) registry とエンジンを用意
    let registry = Arc::new(TaskRegistry::<String>::new(config));
    let engine = Arc::new(InMemoryTriggerEngine::new(Arc::clone(&registry)));
    let now = SystemClock.now();

    // (B) タスクを登録（1 回だけ / 定期）
    let mut greeting = TaskConfiguration::new();
    greeting.set_name(args.name.clone());
    let hello = engine.schedule(
        registry.identity("hello"),
        Schedule::once(now),
        greeting,
        Arc::new(HelloJob),
    )?;
    engine.schedule(
        registry.identity("heartbeat"),
        Schedule::interval(now, Duration::from_secs(args.every.max(1))),
        TaskConfiguration::new(),
        Arc::new(HeartbeatJob {
            remaining_failures: AtomicU32::new(args.failures),
        }),
    )?;

    // (C) エンジンのループを起動
    let engine_loop = engine.spawn();

    // (D) 1 回だけのタスクが発火するのを待ち、その future の結果を待つ
    let mut updates = hello.subscribe();
    let future = tokio::time::timeout(await_timeout, updates.wait_for(|s| s.future().is_some()))
        .await
        .context("one-shot task never started")?
        .context("task info dropped")?
        .future()
        .cloned()
        .context("one-shot task has no future")?;
    let result = future.wait(await_timeout).await.map_err(|e| e.to_string());

    let report = Report {
        task: hello.identity().to_string(),
        result,
        last_run: hello.last_run_state(),
        counts: registry.counts(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.watch {
        info!("watching; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        for info in registry.list() {
            println!("{}", serde_json::to_string(&info.current_state())?);
        }
    }

    // (E) 新しい firing を止め、実行中のものを待ってから終了
    engine_loop.shutdown_and_join().await;
    Ok(())
}
