//! TaskJobListener - トリガーエンジンの firing とタスク状態をつなぐ
//!
//! # 1 回の firing の流れ
//! ```text
//! engine ── on_start(ctx) ──▶ Firing（run_id, future, task_info）
//!                                │  ジョブ本体を実行
//! engine ── on_finish(ctx, firing, result) ──▶ 統計を保存 → publish → cleanup → resolve
//! ```
//!
//! on_start の戻り値（`Firing`）をエンジンがそのまま on_finish に渡すので、
//! firing ごとの対応づけを汎用のコンテキストに詰め込む必要はない。
//!
//! 同じ TaskIdentity の on_start / on_finish は交互にしか呼ばれない（エンジンの保証）。

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::app::converter::ScheduleConverter;
use crate::app::future::{TaskFuture, TaskOutcome};
use crate::app::task_info::TaskInfo;
use crate::domain::{
    unwrap_job_error, EndState, JobExecutionError, LastRunState, LifecycleState, RunId,
    SchedulerError, TaskIdentity, TaskState,
};
use crate::ports::{Clock, FiringContext, IdGenerator, Trigger, TriggerEngine};

/// on_start から on_finish へ渡す、1 回の firing の対応づけ
pub struct Firing<T> {
    run_id: RunId,
    future: TaskFuture<T>,
    task_info: TaskInfo<T>,
}

impl<T> Firing<T> {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn future(&self) -> &TaskFuture<T> {
        &self.future
    }

    pub fn task_info(&self) -> &TaskInfo<T> {
        &self.task_info
    }
}

impl<T> Clone for Firing<T> {
    fn clone(&self) -> Self {
        Self {
            run_id: self.run_id,
            future: self.future.clone(),
            task_info: self.task_info.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Firing<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Firing")
            .field("run_id", &self.run_id)
            .field("future", &self.future)
            .finish()
    }
}

/// on_finish で使った trigger の出どころ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerSource {
    /// エンジンに問い合わせた、タスクに関連付けられた trigger
    Associated,
    /// 問い合わせに失敗したので、この firing 自身の trigger を使った
    Firing,
}

pub struct TaskJobListener<T> {
    identity: TaskIdentity,
    name: String,
    engine: Arc<dyn TriggerEngine>,
    converter: ScheduleConverter,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    task_info: TaskInfo<T>,
}

impl<T> TaskJobListener<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        task_info: TaskInfo<T>,
        engine: Arc<dyn TriggerEngine>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let identity = task_info.identity().clone();
        Self {
            name: format!("spindle.listener:{identity}"),
            identity,
            engine,
            converter: ScheduleConverter::new(),
            clock,
            ids,
            task_info,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    pub fn task_info(&self) -> &TaskInfo<T> {
        &self.task_info
    }

    /// firing の開始。RUNNING と新しい future を 1 回で公開する。
    ///
    /// 関連付けられた trigger が引けない、または記述できない場合は何も公開せずに失敗する。
    /// 前の実行がまだ RUNNING のまま残っていても失敗する。
    pub fn on_start(&self, ctx: &FiringContext) -> Result<Firing<T>, SchedulerError> {
        let trigger = self.associated_trigger().inspect_err(|e| {
            error!(task = %self.identity, error = %e, "aborting firing: associated trigger unavailable");
        })?;
        let schedule = self.converter.to_schedule(&trigger).inspect_err(|e| {
            error!(task = %self.identity, error = %e, "aborting firing: trigger cannot be described");
        })?;

        let run_id = self.ids.generate_run_id();
        let future = TaskFuture::new(self.identity.clone(), run_id, ctx.fire_time());
        let state = TaskState::new(
            LifecycleState::Running,
            ctx.job_data().snapshot(),
            schedule,
            trigger.next_fire_time(),
        );

        if self.task_info.publish(state, Some(future.clone())) {
            info!(task = %self.identity, %run_id, fire_time = %ctx.fire_time(), "run started");
        } else if self.task_info.current_state().lifecycle() == LifecycleState::Running {
            error!(task = %self.identity, "aborting firing: previous run still open");
            return Err(SchedulerError::AlreadyRunning(self.identity.clone()));
        }

        Ok(Firing {
            run_id,
            future,
            task_info: self.task_info.clone(),
        })
    }

    /// firing の終了。
    ///
    /// 1. 結果を分類（FAILED > CANCELED > OK）
    /// 2. `lastRunState.*` をジョブデータに書く
    /// 3. 次の state を公開（DONE のときだけ終わった future を残す）
    /// 4. DONE、または firing 自身の trigger で代用したときはエンジン側のエントリを消す
    ///    （実行中に削除されたタスクでは何もしない）
    /// 5. エンジンのラッパーを 1 段だけ剥がして future を resolve
    pub fn on_finish(
        &self,
        ctx: &FiringContext,
        firing: Firing<T>,
        result: Result<T, JobExecutionError>,
    ) -> Result<(), SchedulerError> {
        let Firing {
            run_id,
            future,
            task_info,
        } = firing;

        let cancelled = future.settle();
        let end_state = EndState::classify(result.is_err(), cancelled);

        let stats = LastRunState::new(end_state, future.started_at(), self.clock.now());
        ctx.job_data().put_all(stats.to_entries());

        let (trigger, source) = self.finishing_trigger(ctx);
        let next_fire_time = trigger.next_fire_time();
        let schedule = match self.converter.to_schedule(&trigger) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(task = %self.identity, error = %e, "keeping previous schedule");
                task_info.current_state().schedule().clone()
            }
        };
        let state = TaskState::after_run(ctx.job_data().snapshot(), schedule, next_fire_time);
        let done = state.is_done();
        task_info.publish(state, done.then(|| future.clone()));

        // 削除済みのタスクはエンジン側のエントリも消えている。
        // 同じ TaskIdentity で登録し直されたエントリには触らない。
        if task_info.is_removed() {
            debug!(task = %self.identity, %run_id, "task was removed during the run");
        } else if done || source == TriggerSource::Firing {
            self.remove_quietly();
        }

        info!(
            task = %self.identity,
            %run_id,
            end_state = %end_state,
            duration_ms = stats.run_duration.as_millis() as u64,
            next = if done { "done" } else { "waiting" },
            "run finished"
        );

        let outcome: TaskOutcome<T> = result.map_err(unwrap_job_error);
        future.resolve(outcome).inspect_err(|e| {
            error!(task = %self.identity, %run_id, error = %e, "future resolved twice");
        })
    }

    /// trigger が差し替えられたとき。WAITING なら新しい schedule と次回時刻を公開する。
    pub fn on_rescheduled(&self, trigger: &Trigger) -> bool {
        let schedule = match self.converter.to_schedule(trigger) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(task = %self.identity, error = %e, "ignoring reschedule");
                return false;
            }
        };
        let next_fire_time = trigger.next_fire_time();
        let updated = self
            .task_info
            .update_if_waiting(|state| state.with_schedule(schedule, next_fire_time));
        debug!(task = %self.identity, trigger = %trigger.key(), updated, "rescheduled");
        updated
    }

    fn associated_trigger(&self) -> Result<Trigger, SchedulerError> {
        self.engine
            .trigger_of(&self.identity)?
            .ok_or_else(|| SchedulerError::MissingTrigger(self.identity.clone()))
    }

    fn finishing_trigger(&self, ctx: &FiringContext) -> (Trigger, TriggerSource) {
        match self.associated_trigger() {
            Ok(trigger) => (trigger, TriggerSource::Associated),
            Err(e) => {
                debug!(task = %self.identity, error = %e, "falling back to the firing trigger");
                (ctx.trigger().clone(), TriggerSource::Firing)
            }
        }
    }

    /// 失敗しても公開済みの state は変えない
    fn remove_quietly(&self) {
        match self.engine.remove_task(&self.identity) {
            Ok(existed) => debug!(task = %self.identity, existed, "engine entry removed"),
            Err(e) => warn!(task = %self.identity, error = %e, "engine entry removal failed"),
        }
    }
}
