//! TaskRegistry - TaskIdentity ごとの listener を管理
//!
//! エンジンは firing のたびに `listener(&identity)` を引き、
//! 呼び出し側は `get(&identity)` で `TaskInfo` を引く。
//!
//! # 生存期間
//! - DONE になったタスクと削除されたタスクは「追跡中」ではない。
//!   `get` / `listener` / `list` からは見えず、アクセスのついでに取り除く。
//! - 同じ TaskIdentity の再登録は、前のタスクが追跡中でなくなっていれば受け付ける。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::app::config::SchedulerConfig;
use crate::app::listener::TaskJobListener;
use crate::app::task_info::TaskInfo;
use crate::domain::{SchedulerError, TaskIdentity, TaskState};
use crate::observability::TaskCounts;
use crate::ports::{Clock, IdGenerator, SystemClock, TriggerEngine, UlidGenerator};

pub struct TaskRegistry<T> {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    listeners: RwLock<HashMap<TaskIdentity, Arc<TaskJobListener<T>>>>,
}

impl<T> TaskRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// 時刻源を差し替える。ID の timestamp も同じ時刻源から取る。
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn id_generator(&self) -> Arc<dyn IdGenerator> {
        Arc::clone(&self.ids)
    }

    /// 既定グループの TaskIdentity
    pub fn identity(&self, name: impl Into<String>) -> TaskIdentity {
        self.config.identity(name)
    }

    /// 新しいタスクを追跡し始める
    pub fn register(
        &self,
        identity: TaskIdentity,
        engine: Arc<dyn TriggerEngine>,
        initial: TaskState,
    ) -> Result<TaskInfo<T>, SchedulerError> {
        initial.schedule().validate()?;

        let mut listeners = self.listeners.write();
        if listeners.get(&identity).is_some_and(|l| is_tracked(l)) {
            return Err(SchedulerError::DuplicateTask(identity));
        }

        let task_info = TaskInfo::new(identity.clone(), Arc::clone(&engine), initial);
        let listener = TaskJobListener::new(
            task_info.clone(),
            engine,
            Arc::clone(&self.clock),
            Arc::clone(&self.ids),
        );
        info!(task = %identity, listener = listener.name(), "task registered");
        listeners.insert(identity, Arc::new(listener));
        Ok(task_info)
    }

    /// エンジンが firing ごとに使う listener
    pub fn listener(&self, identity: &TaskIdentity) -> Option<Arc<TaskJobListener<T>>> {
        let listener = self.listeners.read().get(identity).cloned()?;
        if is_tracked(&listener) {
            Some(listener)
        } else {
            self.prune(identity);
            None
        }
    }

    pub fn get(&self, identity: &TaskIdentity) -> Result<TaskInfo<T>, SchedulerError> {
        self.listener(identity)
            .map(|listener| listener.task_info().clone())
            .ok_or_else(|| SchedulerError::TaskNotFound(identity.clone()))
    }

    /// 追跡中のタスク（TaskIdentity 順）
    pub fn list(&self) -> Vec<TaskInfo<T>> {
        let mut listeners = self.listeners.write();
        listeners.retain(|_, listener| is_tracked(listener));

        let mut infos: Vec<_> = listeners
            .values()
            .map(|listener| listener.task_info().clone())
            .collect();
        infos.sort_by(|a, b| a.identity().cmp(b.identity()));
        infos
    }

    /// エンジン側のエントリごと削除する
    pub fn remove(&self, identity: &TaskIdentity) -> Result<bool, SchedulerError> {
        let task_info = self.get(identity)?;
        let existed = task_info.remove()?;
        self.prune(identity);
        Ok(existed)
    }

    /// まだ取り除かれていないエントリの lifecycle 別件数（削除済みは数えない）
    pub fn counts(&self) -> TaskCounts {
        self.listeners
            .read()
            .values()
            .filter(|listener| !listener.task_info().is_removed())
            .map(|listener| listener.task_info().current_state().lifecycle())
            .collect()
    }

    fn prune(&self, identity: &TaskIdentity) {
        let mut listeners = self.listeners.write();
        if listeners.get(identity).is_some_and(|l| !is_tracked(l)) {
            listeners.remove(identity);
            debug!(task = %identity, "untracked task pruned");
        }
    }
}

fn is_tracked<T>(listener: &TaskJobListener<T>) -> bool
where
    T: Clone + Send + Sync + 'static,
{
    let info = listener.task_info();
    !info.is_removed() && !info.current_state().is_done()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{at_millis, one_shot, StubEngine};
    use crate::domain::{LifecycleState, Schedule, TaskConfiguration};
    use crate::ports::{FiringContext, JobDataMap};
    use std::time::Duration;

    fn waiting(schedule: Schedule) -> TaskState {
        TaskState::new(
            LifecycleState::Waiting,
            TaskConfiguration::new(),
            schedule,
            Some(at_millis(1_000)),
        )
    }

    fn registry() -> TaskRegistry<u32> {
        TaskRegistry::new(SchedulerConfig::default())
    }

    #[test]
    fn register_then_get() {
        let registry = registry();
        let engine = Arc::new(StubEngine::default());
        let id = registry.identity("scan");

        let info = registry
            .register(id.clone(), engine, waiting(Schedule::Manual))
            .unwrap();

        assert_eq!(id, TaskIdentity::new("default", "scan"));
        assert_eq!(registry.get(&id).unwrap().identity(), info.identity());
        assert_eq!(
            registry.listener(&id).unwrap().name(),
            "spindle.listener:default.scan"
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = registry();
        let engine: Arc<dyn TriggerEngine> = Arc::new(StubEngine::default());
        let id = registry.identity("scan");

        registry
            .register(id.clone(), Arc::clone(&engine), waiting(Schedule::Manual))
            .unwrap();
        let err = registry
            .register(id.clone(), engine, waiting(Schedule::Manual))
            .unwrap_err();

        assert!(matches!(err, SchedulerError::DuplicateTask(dup) if dup == id));
    }

    #[test]
    fn invalid_schedule_is_rejected() {
        let registry = registry();
        let err = registry
            .register(
                registry.identity("scan"),
                Arc::new(StubEngine::default()),
                waiting(Schedule::interval(at_millis(0), Duration::ZERO)),
            )
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    #[test]
    fn unknown_task_is_not_found() {
        let registry = registry();
        let id = registry.identity("missing");
        assert!(matches!(registry.get(&id), Err(SchedulerError::TaskNotFound(_))));
        assert!(matches!(registry.remove(&id), Err(SchedulerError::TaskNotFound(_))));
    }

    #[test]
    fn removed_task_is_no_longer_found_and_can_be_registered_again() {
        let registry = registry();
        let engine = Arc::new(StubEngine::default());
        let id = registry.identity("scan");
        let info = registry
            .register(id.clone(), engine.clone(), waiting(Schedule::Manual))
            .unwrap();

        registry.remove(&id).unwrap();

        assert!(info.is_removed());
        assert_eq!(engine.removals(), 1);
        assert!(matches!(registry.get(&id), Err(SchedulerError::TaskNotFound(_))));
        assert_eq!(registry.counts(), TaskCounts::default());

        registry
            .register(id.clone(), engine, waiting(Schedule::Manual))
            .unwrap();
        assert!(registry.get(&id).is_ok());
    }

    #[test]
    fn done_task_is_counted_until_pruned() {
        let registry = registry();
        let trigger = one_shot(at_millis(1_000), Some(at_millis(1_000)));
        let engine = Arc::new(StubEngine::with_trigger(trigger.clone()));
        let id = registry.identity("once");
        registry
            .register(id.clone(), engine.clone(), waiting(Schedule::once(at_millis(1_000))))
            .unwrap();

        let listener = registry.listener(&id).unwrap();
        let ctx = FiringContext::new(id.clone(), at_millis(1_000), trigger.clone(), JobDataMap::new());
        let firing = listener.on_start(&ctx).unwrap();
        assert_eq!(registry.counts().running, 1);

        engine.set_trigger(Some(trigger.fired(None)));
        listener.on_finish(&ctx, firing, Ok(1)).unwrap();
        assert_eq!(registry.counts().done, 1);

        assert!(registry.list().is_empty());
        assert!(registry.listener(&id).is_none());
        assert_eq!(registry.counts().total(), 0);
    }

    #[test]
    fn list_is_ordered_by_identity() {
        let registry = registry();
        let engine: Arc<dyn TriggerEngine> = Arc::new(StubEngine::default());
        for name in ["purge", "audit", "scan"] {
            registry
                .register(registry.identity(name), Arc::clone(&engine), waiting(Schedule::Manual))
                .unwrap();
        }

        let names: Vec<_> = registry
            .list()
            .iter()
            .map(|info| info.identity().name().to_string())
            .collect();
        assert_eq!(names, ["audit", "purge", "scan"]);
        assert_eq!(registry.counts().waiting, 3);
    }
}
