//! TaskInfo - タスクごとの長寿命ハンドル
//!
//! `(TaskState, Option<TaskFuture>)` の組を 1 つの値として `watch` チャネルに載せる。
//! 書き手は組ごと差し替え、読み手は `borrow()` で一貫した組を 1 つ見る。
//! そのため「RUNNING なのに future がない」「WAITING なのに実行中の future がある」
//! といった中途半端な組は観測されない。
//!
//! # 削除
//! `remove()` はエンジン側のエントリを消したあと、組を DONE（次回時刻なし・future なし）に
//! 固定する。以降の publish は受け付けない。

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::app::future::TaskFuture;
use crate::domain::{
    LastRunState, LifecycleState, SchedulerError, TaskIdentity, TaskState,
};
use crate::ports::TriggerEngine;

/// ある時点の `(state, future)` の組
pub struct TaskSnapshot<T> {
    state: TaskState,
    future: Option<TaskFuture<T>>,
    removed: bool,
}

impl<T> TaskSnapshot<T> {
    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn future(&self) -> Option<&TaskFuture<T>> {
        self.future.as_ref()
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

impl<T> Clone for TaskSnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            future: self.future.clone(),
            removed: self.removed,
        }
    }
}

impl<T> fmt::Debug for TaskSnapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSnapshot")
            .field("state", &self.state)
            .field("future", &self.future)
            .field("removed", &self.removed)
            .finish()
    }
}

struct Inner<T> {
    identity: TaskIdentity,
    engine: Arc<dyn TriggerEngine>,
    published: watch::Sender<TaskSnapshot<T>>,
}

/// TaskInfo は clone しても同じタスクを指す
pub struct TaskInfo<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for TaskInfo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> TaskInfo<T> {
    pub(crate) fn new(
        identity: TaskIdentity,
        engine: Arc<dyn TriggerEngine>,
        initial: TaskState,
    ) -> Self {
        let (published, _) = watch::channel(TaskSnapshot {
            state: initial,
            future: None,
            removed: false,
        });
        Self {
            inner: Arc::new(Inner {
                identity,
                engine,
                published,
            }),
        }
    }

    pub fn identity(&self) -> &TaskIdentity {
        &self.inner.identity
    }

    pub fn current_state(&self) -> TaskState {
        self.inner.published.borrow().state.clone()
    }

    /// RUNNING 中はその実行の future、DONE 直後は最後に終わった future、それ以外は None
    pub fn current_future(&self) -> Option<TaskFuture<T>> {
        self.inner.published.borrow().future.clone()
    }

    /// state と future を同じ時点で読む
    pub fn current(&self) -> TaskSnapshot<T> {
        self.inner.published.borrow().clone()
    }

    /// 以降の publish を受け取る
    pub fn subscribe(&self) -> watch::Receiver<TaskSnapshot<T>> {
        self.inner.published.subscribe()
    }

    /// 最後に公開された configuration に残っている前回実行の記録
    pub fn last_run_state(&self) -> Option<LastRunState> {
        self.inner
            .published
            .borrow()
            .state
            .configuration()
            .last_run_state()
    }

    pub fn is_removed(&self) -> bool {
        self.inner.published.borrow().removed
    }

    /// 一時的な trigger で今すぐ 1 回実行させる。関連付けられた trigger はそのまま。
    pub fn run_now(&self) -> Result<(), SchedulerError> {
        if self.is_removed() || self.current_state().is_done() {
            return Err(SchedulerError::TaskNotFound(self.inner.identity.clone()));
        }
        self.inner.engine.fire_now(&self.inner.identity)?;
        info!(task = %self.inner.identity, "run-now requested");
        Ok(())
    }

    /// エンジン側のエントリを消し、このハンドルを DONE に固定する。
    ///
    /// エンジンのエラーはそのまま返し、その場合は何も変えない。
    /// 戻り値はエンジン側にエントリがあったかどうか。
    pub fn remove(&self) -> Result<bool, SchedulerError> {
        let existed = self.inner.engine.remove_task(&self.inner.identity)?;
        self.inner.published.send_modify(|current| {
            current.state = current.state.clone().into_done();
            current.future = None;
            current.removed = true;
        });
        info!(task = %self.inner.identity, existed, "task removed");
        Ok(existed)
    }

    /// 組を丸ごと差し替える。
    ///
    /// DONE の後と削除後、および `LifecycleState::can_transition_to` が許さない遷移
    /// （WAITING → WAITING や RUNNING → RUNNING）は拒否して false。
    /// 同じ lifecycle のままの更新は `update_if_waiting` を使う。
    pub(crate) fn publish(&self, state: TaskState, future: Option<TaskFuture<T>>) -> bool {
        let next = state.lifecycle();
        let mut illegal_from = None;
        let published = self.inner.published.send_if_modified(|current| {
            if current.removed || current.state.is_done() {
                return false;
            }
            let from = current.state.lifecycle();
            if !from.can_transition_to(next) {
                illegal_from = Some(from);
                return false;
            }
            current.state = state;
            current.future = future;
            true
        });
        if let Some(from) = illegal_from {
            warn!(task = %self.inner.identity, ?from, to = ?next, "illegal lifecycle transition refused");
        } else if !published {
            debug!(task = %self.inner.identity, lifecycle = ?next, "publish refused for finished task");
        }
        published
    }

    /// WAITING のときだけ、現在の state から作った新しい state を公開する
    pub(crate) fn update_if_waiting<F>(&self, update: F) -> bool
    where
        F: FnOnce(TaskState) -> TaskState,
    {
        self.inner.published.send_if_modified(|current| {
            if current.removed || current.state.lifecycle() != LifecycleState::Waiting {
                return false;
            }
            current.state = update(current.state.clone());
            true
        })
    }
}

impl<T> fmt::Debug for TaskInfo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskInfo")
            .field("identity", &self.inner.identity)
            .field("current", &*self.inner.published.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{at_millis, identity, one_shot, StubEngine};
    use crate::domain::{EndState, RunId, Schedule, TaskConfiguration};
    use tracing_test::traced_test;
    use ulid::Ulid;

    fn waiting(next_ms: i64) -> TaskState {
        TaskState::new(
            LifecycleState::Waiting,
            TaskConfiguration::new(),
            Schedule::once(at_millis(next_ms)),
            Some(at_millis(next_ms)),
        )
    }

    fn info(engine: Arc<StubEngine>) -> TaskInfo<u32> {
        TaskInfo::new(identity(), engine, waiting(1_000))
    }

    fn future() -> TaskFuture<u32> {
        TaskFuture::new(identity(), RunId::from_ulid(Ulid::new()), at_millis(1_000))
    }

    fn running() -> TaskState {
        TaskState::new(
            LifecycleState::Running,
            TaskConfiguration::new(),
            Schedule::once(at_millis(1_000)),
            Some(at_millis(1_000)),
        )
    }

    #[test]
    fn initial_state_has_no_future() {
        let info = info(Arc::new(StubEngine::default()));
        assert_eq!(info.current_state().lifecycle(), LifecycleState::Waiting);
        assert!(info.current_future().is_none());
        assert!(!info.is_removed());
    }

    #[test]
    fn publish_replaces_state_and_future_together() {
        let info = info(Arc::new(StubEngine::default()));
        let f = future();
        let running = TaskState::new(
            LifecycleState::Running,
            TaskConfiguration::new(),
            Schedule::once(at_millis(1_000)),
            Some(at_millis(1_000)),
        );

        assert!(info.publish(running.clone(), Some(f.clone())));

        let snapshot = info.current();
        assert_eq!(snapshot.state(), &running);
        assert!(snapshot.future().unwrap().ptr_eq(&f));
    }

    #[test]
    fn done_is_absorbing() {
        let info = info(Arc::new(StubEngine::default()));
        let f = future();
        assert!(info.publish(running(), Some(f.clone())));
        let done = TaskState::after_run(TaskConfiguration::new(), Schedule::once(at_millis(1_000)), None);
        assert!(info.publish(done, Some(f.clone())));

        assert!(!info.publish(waiting(2_000), None));
        assert!(info.current_state().is_done());
        assert!(info.current_future().unwrap().ptr_eq(&f));
    }

    #[test]
    fn remove_pins_the_task_as_done() {
        let engine = Arc::new(StubEngine::with_trigger(one_shot(at_millis(1_000), Some(at_millis(1_000)))));
        let info = info(Arc::clone(&engine));

        assert!(info.remove().unwrap());
        assert_eq!(engine.removals(), 1);

        let state = info.current_state();
        assert!(state.is_done());
        assert_eq!(state.next_fire_time(), None);
        assert!(info.current_future().is_none());
        assert!(info.is_removed());

        // 削除後の publish は無視される
        assert!(!info.publish(waiting(2_000), Some(future())));
        assert!(info.current_future().is_none());
    }

    #[test]
    fn remove_propagates_engine_failure_and_keeps_state() {
        let engine = Arc::new(StubEngine::default());
        engine.fail_removals(true);
        let info = info(Arc::clone(&engine));

        let err = info.remove().unwrap_err();
        assert!(matches!(err, SchedulerError::Engine(_)));
        assert!(!info.is_removed());
        assert_eq!(info.current_state().lifecycle(), LifecycleState::Waiting);
    }

    #[test]
    fn run_now_asks_the_engine_unless_removed() {
        let engine = Arc::new(StubEngine::default());
        let info = info(Arc::clone(&engine));

        info.run_now().unwrap();
        assert_eq!(engine.fired_now(), 1);

        info.remove().unwrap();
        assert!(matches!(info.run_now(), Err(SchedulerError::TaskNotFound(_))));
        assert_eq!(engine.fired_now(), 1);
    }

    #[test]
    fn update_if_waiting_skips_running_tasks() {
        let info = info(Arc::new(StubEngine::default()));
        assert!(info.update_if_waiting(|state| state.with_schedule(Schedule::Manual, Some(at_millis(5_000)))));
        assert_eq!(info.current_state().schedule(), &Schedule::Manual);

        let running = TaskState::new(
            LifecycleState::Running,
            TaskConfiguration::new(),
            Schedule::Manual,
            Some(at_millis(5_000)),
        );
        info.publish(running, Some(future()));
        assert!(!info.update_if_waiting(|state| state.with_schedule(Schedule::once(at_millis(9_000)), None)));
        assert_eq!(info.current_state().lifecycle(), LifecycleState::Running);
    }

    #[test]
    fn last_run_state_reads_the_published_configuration() {
        let info = info(Arc::new(StubEngine::default()));
        assert!(info.last_run_state().is_none());

        let stats = LastRunState::new(EndState::Failed, at_millis(1_000), at_millis(1_400));
        let configuration: TaskConfiguration = stats.to_entries().into_iter().collect();
        info.publish(running(), Some(future()));
        info.publish(
            TaskState::after_run(configuration, Schedule::once(at_millis(1_000)), None),
            None,
        );

        assert_eq!(info.last_run_state(), Some(stats));
    }

    #[tokio::test]
    async fn subscribers_see_each_publish() {
        let info = info(Arc::new(StubEngine::default()));
        let mut rx = info.subscribe();

        info.publish(running(), Some(future()));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().state().lifecycle(), LifecycleState::Running);

        info.publish(
            TaskState::after_run(TaskConfiguration::new(), Schedule::once(at_millis(1_000)), None),
            None,
        );
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().state().is_done());
    }

    #[test]
    #[traced_test]
    fn illegal_transitions_are_refused() {
        let info = info(Arc::new(StubEngine::default()));

        // WAITING -> WAITING / WAITING -> DONE
        assert!(!info.publish(waiting(2_000), None));
        let done = TaskState::after_run(TaskConfiguration::new(), Schedule::once(at_millis(1_000)), None);
        assert!(!info.publish(done, None));
        assert_eq!(info.current_state(), waiting(1_000));

        // RUNNING -> RUNNING は実行中の future を差し替えない
        let first = future();
        assert!(info.publish(running(), Some(first.clone())));
        assert!(!info.publish(running(), Some(future())));
        assert!(info.current_future().unwrap().ptr_eq(&first));
        assert!(logs_contain("illegal lifecycle transition refused"));
    }
}
