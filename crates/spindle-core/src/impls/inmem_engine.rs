//! InMemoryTriggerEngine - 開発・テスト用のトリガーエンジン
//!
//! # 責務
//! - Schedule をネイティブ trigger にして保持し、期限が来たら発火する
//! - 同じ TaskIdentity の firing を重ねない（`executing` フラグ）
//! - run-now 用の一時的な trigger を受け付ける
//! - firing ごとに listener の on_start → ジョブ本体 → on_finish を回す
//!
//! 関連付けられた trigger はジョブ本体の完了後、on_finish の前に進める。
//! そのため RUNNING 中に見える次回時刻は「いま発火している時刻」のまま。
//!
//! # 所有関係
//! listener が持つのは `TriggerStore`（trigger の表）だけで、registry は持たない。
//! エンジン本体 → registry → listener → store の一方向になる。

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::app::converter::ScheduleConverter;
use crate::app::listener::{Firing, TaskJobListener};
use crate::app::registry::TaskRegistry;
use crate::app::task_info::TaskInfo;
use crate::domain::{
    EngineError, JobExecutionError, LifecycleState, Schedule, SchedulerError, TaskConfiguration,
    TaskIdentity, TaskState,
};
use crate::ports::{
    Clock, FiringContext, IdGenerator, Job, JobContext, JobDataMap, Trigger, TriggerEngine,
    TriggerKind,
};

/// `after` より後の最初の発火時刻。もう発火しなければ None。
///
/// このエンジンが作るのは 1 回きりと無制限の Simple、それと Cron だけ。
pub(crate) fn next_fire_after(
    kind: &TriggerKind,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, EngineError> {
    match kind {
        TriggerKind::Simple { interval: None, .. }
        | TriggerKind::Simple {
            repeat_count: Some(0),
            ..
        } => Ok(None),
        TriggerKind::Simple {
            start_at,
            interval: Some(every),
            repeat_count: None,
        } => {
            if after < *start_at {
                return Ok(Some(*start_at));
            }
            let every_ms = i64::try_from(every.as_millis()).unwrap_or(i64::MAX);
            if every_ms <= 0 {
                return Ok(None);
            }
            let elapsed_ms = (after - *start_at).num_milliseconds();
            let k = elapsed_ms / every_ms + 1;
            Ok(k.checked_mul(every_ms)
                .and_then(TimeDelta::try_milliseconds)
                .and_then(|offset| start_at.checked_add_signed(offset)))
        }
        TriggerKind::Cron {
            start_at,
            expression,
        } => {
            let schedule = cron::Schedule::from_str(expression).map_err(|e| {
                EngineError::with_source(format!("invalid cron expression '{expression}'"), e)
            })?;
            Ok(schedule.after(&after.max(*start_at)).next())
        }
        TriggerKind::Simple { .. } | TriggerKind::CalendarInterval { .. } => Err(
            EngineError::new(format!("unsupported trigger kind: {}", kind.name())),
        ),
    }
}

/// 新しく作った trigger の最初の発火時刻
fn first_fire_time(
    kind: &TriggerKind,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, EngineError> {
    match kind {
        TriggerKind::Simple { start_at, .. } => Ok(Some(*start_at)),
        TriggerKind::Cron { .. } | TriggerKind::CalendarInterval { .. } => {
            next_fire_after(kind, now)
        }
    }
}

/// 1 タスク分のエントリ。`generation` は schedule のたびに振り直す。
///
/// 削除後に同じ TaskIdentity で登録し直すと、古い firing がまだ走っていることがある。
/// firing の後始末は generation が一致するエントリにしか触らない。
struct Entry<T> {
    generation: u64,
    job: Arc<dyn Job<T>>,
    trigger: Trigger,
    job_data: JobDataMap,
    enabled: bool,
    executing: bool,
    run_now: VecDeque<Trigger>,
}

/// 発火が決まった 1 件
struct Due<T> {
    identity: TaskIdentity,
    generation: u64,
    trigger: Trigger,
    job: Arc<dyn Job<T>>,
    job_data: JobDataMap,
    transient: bool,
}

/// trigger の表。listener からは `TriggerEngine` として見える。
struct TriggerStore<T> {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    entries: Mutex<HashMap<TaskIdentity, Entry<T>>>,
    next_generation: AtomicU64,
    wake: Notify,
}

impl<T> TriggerStore<T> {
    /// 無効（`.enabled = false`）なタスクは期限が来ても発火しない。run-now は受け付ける。
    fn take_due(&self, now: DateTime<Utc>) -> Vec<Due<T>> {
        let mut entries = self.entries.lock();
        let mut due = Vec::new();
        for (identity, entry) in entries.iter_mut() {
            if entry.executing {
                continue;
            }
            let (trigger, transient) = if let Some(trigger) = entry.run_now.pop_front() {
                (trigger, true)
            } else if entry.enabled && entry.trigger.next_fire_time().is_some_and(|at| at <= now) {
                (entry.trigger.clone(), false)
            } else {
                continue;
            };
            entry.executing = true;
            due.push(Due {
                identity: identity.clone(),
                generation: entry.generation,
                trigger,
                job: Arc::clone(&entry.job),
                job_data: entry.job_data.clone(),
                transient,
            });
        }
        due
    }

    /// 同じ generation のエントリだけを触る
    fn with_entry(&self, identity: &TaskIdentity, generation: u64, f: impl FnOnce(&mut Entry<T>)) {
        let mut entries = self.entries.lock();
        match entries.get_mut(identity) {
            Some(entry) if entry.generation == generation => f(entry),
            Some(_) => debug!(task = %identity, generation, "entry was scheduled again; leaving it alone"),
            None => {}
        }
    }

    /// firing の後始末。進めた firing trigger を載せた文脈を返す。
    ///
    /// 関連付けられた trigger は、firing 中に差し替えられていなければ同じだけ進める。
    fn complete(&self, ctx: FiringContext, generation: u64, transient: bool) -> FiringContext {
        let next = if transient {
            None
        } else {
            next_fire_after(ctx.trigger().kind(), ctx.fire_time()).unwrap_or_else(|e| {
                warn!(task = %ctx.identity(), error = %e, "cannot compute next fire time");
                None
            })
        };
        let advanced = ctx.trigger().fired(next);

        self.with_entry(ctx.identity(), generation, |entry| {
            entry.executing = false;
            if !transient && entry.trigger.key() == advanced.key() {
                entry.trigger = entry.trigger.fired(next);
            }
        });

        ctx.with_trigger(advanced)
    }

    /// 始まらなかった firing。trigger は進めない。
    fn release(&self, identity: &TaskIdentity, generation: u64) {
        self.with_entry(identity, generation, |entry| entry.executing = false);
    }

    /// 追跡されなくなったタスクのエントリを落とす
    fn discard(&self, identity: &TaskIdentity, generation: u64) {
        let mut entries = self.entries.lock();
        if entries.get(identity).is_some_and(|entry| entry.generation == generation) {
            entries.remove(identity);
        }
    }
}

impl<T: Send + 'static> TriggerEngine for TriggerStore<T> {
    fn trigger_of(&self, identity: &TaskIdentity) -> Result<Option<Trigger>, EngineError> {
        Ok(self
            .entries
            .lock()
            .get(identity)
            .map(|entry| entry.trigger.clone()))
    }

    fn remove_task(&self, identity: &TaskIdentity) -> Result<bool, EngineError> {
        let existed = self.entries.lock().remove(identity).is_some();
        debug!(task = %identity, existed, "job entry removed");
        Ok(existed)
    }

    fn fire_now(&self, identity: &TaskIdentity) -> Result<(), EngineError> {
        let now = self.clock.now();
        let transient = Trigger::new(
            self.ids.generate_trigger_key(),
            TriggerKind::Simple {
                start_at: now,
                interval: None,
                repeat_count: Some(0),
            },
            Some(now),
        );

        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(identity)
            .ok_or_else(|| EngineError::new(format!("no job for {identity}")))?;
        entry.run_now.push_back(transient);
        drop(entries);

        self.wake.notify_one();
        Ok(())
    }
}

/// `InMemoryTriggerEngine::spawn` が返すハンドル
/// - `request_shutdown()` で新しい firing を止める（実行中のジョブは最後まで走る）
/// - `shutdown_and_join()` で実行中のジョブも含めて終わるのを待つ
pub struct EngineLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl EngineLoop {
    pub fn request_shutdown(&self) {
        // receiver が先に落ちていても構わない
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(error = %e, "engine loop terminated abnormally");
        }
    }
}

pub struct InMemoryTriggerEngine<T> {
    registry: Arc<TaskRegistry<T>>,
    store: Arc<TriggerStore<T>>,
    converter: ScheduleConverter,
    in_flight: tokio::sync::Mutex<JoinSet<()>>,
}

impl<T> InMemoryTriggerEngine<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 時刻と ID は registry と同じものを使う
    pub fn new(registry: Arc<TaskRegistry<T>>) -> Self {
        let store = Arc::new(TriggerStore {
            clock: registry.clock(),
            ids: registry.id_generator(),
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            wake: Notify::new(),
        });
        Self {
            registry,
            store,
            converter: ScheduleConverter::new(),
            in_flight: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry<T>> {
        &self.registry
    }

    /// タスクを登録して trigger を作る
    pub fn schedule(
        &self,
        identity: TaskIdentity,
        schedule: Schedule,
        configuration: TaskConfiguration,
        job: Arc<dyn Job<T>>,
    ) -> Result<TaskInfo<T>, SchedulerError> {
        let trigger = self.new_trigger(&schedule)?;
        let state = TaskState::new(
            LifecycleState::Waiting,
            configuration.clone(),
            schedule.clone(),
            trigger.next_fire_time(),
        );

        let engine: Arc<dyn TriggerEngine> = self.store.clone();
        let task_info = self.registry.register(identity.clone(), engine, state)?;

        info!(
            task = %identity,
            schedule = schedule.kind(),
            trigger = %trigger.key(),
            next = ?trigger.next_fire_time(),
            enabled = configuration.is_enabled(),
            "task scheduled"
        );
        let generation = self.store.next_generation.fetch_add(1, Ordering::Relaxed);
        self.store.entries.lock().insert(
            identity,
            Entry {
                generation,
                job,
                trigger,
                job_data: JobDataMap::from(&configuration),
                enabled: configuration.is_enabled(),
                executing: false,
                run_now: VecDeque::new(),
            },
        );
        self.store.wake.notify_one();
        Ok(task_info)
    }

    /// 新しい trigger（新しい key）に差し替える。実行中の firing はそのまま走り切る。
    pub fn reschedule(
        &self,
        identity: &TaskIdentity,
        schedule: Schedule,
    ) -> Result<Trigger, SchedulerError> {
        let listener = self
            .registry
            .listener(identity)
            .ok_or_else(|| SchedulerError::TaskNotFound(identity.clone()))?;
        let trigger = self.new_trigger(&schedule)?;

        {
            let mut entries = self.store.entries.lock();
            let entry = entries
                .get_mut(identity)
                .ok_or_else(|| SchedulerError::TaskNotFound(identity.clone()))?;
            entry.trigger = trigger.clone();
        }

        listener.on_rescheduled(&trigger);
        info!(task = %identity, schedule = schedule.kind(), trigger = %trigger.key(), "task rescheduled");
        self.store.wake.notify_one();
        Ok(trigger)
    }

    /// run-now
    pub fn fire_now(&self, identity: &TaskIdentity) -> Result<(), SchedulerError> {
        self.registry.get(identity)?.run_now()
    }

    pub fn remove(&self, identity: &TaskIdentity) -> Result<bool, SchedulerError> {
        self.registry.remove(identity)
    }

    /// 期限の来た trigger と run-now をすべて発火させ、発火した数を返す。
    /// ジョブ本体は待たない（`wait_idle` で待てる）。
    pub async fn fire_due(&self) -> usize {
        let now = self.store.clock.now();
        let due = self.store.take_due(now);
        if due.is_empty() {
            return 0;
        }

        let mut in_flight = self.in_flight.lock().await;
        let mut fired = 0;
        for due in due {
            let Some(listener) = self.registry.listener(&due.identity) else {
                warn!(task = %due.identity, "dropping job entry of an untracked task");
                self.store.discard(&due.identity, due.generation);
                continue;
            };

            let ctx = FiringContext::new(due.identity.clone(), now, due.trigger, due.job_data);
            let firing = match listener.on_start(&ctx) {
                Ok(firing) => firing,
                Err(_) => {
                    // on_start 側でログ済み。trigger は進めない
                    self.store.release(&due.identity, due.generation);
                    continue;
                }
            };

            in_flight.spawn(run_firing(
                Arc::clone(&self.store),
                listener,
                due.job,
                ctx,
                firing,
                due.generation,
                due.transient,
            ));
            fired += 1;
        }
        fired
    }

    /// 実行中の firing がすべて終わるまで待つ
    pub async fn wait_idle(&self) {
        let mut in_flight = self.in_flight.lock().await;
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "firing task terminated abnormally");
            }
        }
    }

    /// shutdown が立つまで発火を続ける。抜ける前に実行中の firing を待つ。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let poll = self.registry.config().poll_interval();
        info!(poll_ms = poll.as_millis() as u64, "trigger engine started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let fired = self.fire_due().await;
            if fired > 0 {
                debug!(fired, "fired due triggers");
            }
            self.reap_finished().await;

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.store.wake.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }

        self.wait_idle().await;
        info!("trigger engine stopped");
    }

    /// `run` をバックグラウンドで回す
    pub fn spawn(self: &Arc<Self>) -> EngineLoop {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let join = tokio::spawn(async move {
            engine.run(shutdown_rx).await;
        });
        EngineLoop { shutdown_tx, join }
    }

    async fn reap_finished(&self) {
        let mut in_flight = self.in_flight.lock().await;
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "firing task terminated abnormally");
            }
        }
    }

    fn new_trigger(&self, schedule: &Schedule) -> Result<Trigger, SchedulerError> {
        schedule.validate()?;
        let kind = self.converter.to_trigger_kind(schedule);
        let next = first_fire_time(&kind, self.store.clock.now())
            .map_err(|e| SchedulerError::InvalidSchedule(e.message().to_string()))?;
        if next.is_none() {
            return Err(SchedulerError::InvalidSchedule(format!(
                "{} schedule never fires",
                schedule.kind()
            )));
        }
        Ok(Trigger::new(self.store.ids.generate_trigger_key(), kind, next))
    }
}

impl<T> TriggerEngine for InMemoryTriggerEngine<T>
where
    T: Send + Sync + 'static,
{
    fn trigger_of(&self, identity: &TaskIdentity) -> Result<Option<Trigger>, EngineError> {
        self.store.trigger_of(identity)
    }

    fn remove_task(&self, identity: &TaskIdentity) -> Result<bool, EngineError> {
        self.store.remove_task(identity)
    }

    fn fire_now(&self, identity: &TaskIdentity) -> Result<(), EngineError> {
        self.store.fire_now(identity)
    }
}

/// 1 回の firing: ジョブ本体 → trigger を進める → on_finish
async fn run_firing<T>(
    store: Arc<TriggerStore<T>>,
    listener: Arc<TaskJobListener<T>>,
    job: Arc<dyn Job<T>>,
    ctx: FiringContext,
    firing: Firing<T>,
    generation: u64,
    transient: bool,
) where
    T: Clone + Send + Sync + 'static,
{
    let job_ctx = JobContext::new(
        ctx.identity().clone(),
        ctx.fire_time(),
        ctx.job_data().snapshot(),
        Arc::new(firing.future().clone()),
    );

    // panic もここで受け止める
    let result = match tokio::spawn(async move { job.execute(&job_ctx).await }).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(cause)) => Err(JobExecutionError::wrapping(cause)),
        Err(join_error) => {
            error!(task = %ctx.identity(), run_id = %firing.run_id(), error = %join_error, "job did not complete");
            Err(JobExecutionError::new(format!(
                "job {} did not complete: {join_error}",
                ctx.identity()
            )))
        }
    };

    let identity = ctx.identity().clone();
    let ctx = store.complete(ctx, generation, transient);
    if let Err(e) = listener.on_finish(&ctx, firing, result) {
        debug!(task = %identity, error = %e, "on_finish reported an error");
    }
}
