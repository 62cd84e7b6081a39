//! Per-agent task scheduling.
//!
//! A task is a stored [`Request`] replayed against the owning agent, once
//! after a delay or repeatedly on an interval. Execution is handed to a
//! [`TaskRunner`] (the host), which dispatches the request to the agent.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{message::Request, RpcError, RpcResult};

pub type TaskId = String;

/// Executes the request of a due task on behalf of `agent_id`.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, agent_id: &str, request: Request);
}

#[cfg_attr(test, mockall::automock)]
pub trait Scheduler: Send + Sync {
    /// Schedules `request`. A recurring task repeats every `delay`; with
    /// `first_immediate` its first run happens right away instead of after
    /// one interval.
    fn create_task(
        &self,
        request: Request,
        delay: Duration,
        recurring: bool,
        first_immediate: bool,
    ) -> RpcResult<TaskId>;

    /// Stops future runs. Runs already in flight complete. Returns whether
    /// the task was known.
    fn cancel_task(&self, task_id: &str) -> bool;

    fn list_tasks(&self) -> Vec<TaskId>;

    fn cancel_all(&self) -> usize {
        self.list_tasks()
            .iter()
            .filter(|id| self.cancel_task(id))
            .count()
    }
}

pub struct TokioScheduler {
    agent_id: String,
    runner: Weak<dyn TaskRunner>,
    tasks: Arc<DashMap<TaskId, JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new(agent_id: impl Into<String>, runner: Weak<dyn TaskRunner>) -> Self {
        Self {
            agent_id: agent_id.into(),
            runner,
            tasks: Arc::new(DashMap::new()),
        }
    }

    fn spawn_once(
        &self,
        task_id: TaskId,
        request: Request,
        delay: Duration,
        gate: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let agent_id = self.agent_id.clone();
        let runner = self.runner.clone();
        let tasks = self.tasks.clone();
        tokio::spawn(async move {
            let _ = gate.await;
            tokio::time::sleep(delay).await;
            tasks.remove(&task_id);
            match runner.upgrade() {
                Some(runner) => runner.run_task(&agent_id, request).await,
                None => debug!("runner gone, dropping task {}", task_id),
            }
        })
    }

    fn spawn_recurring(
        &self,
        task_id: TaskId,
        request: Request,
        interval: Duration,
        first_immediate: bool,
        gate: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let agent_id = self.agent_id.clone();
        let runner = self.runner.clone();
        let tasks = self.tasks.clone();
        tokio::spawn(async move {
            let _ = gate.await;
            let start = if first_immediate {
                Instant::now()
            } else {
                Instant::now() + interval
            };
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(runner) = runner.upgrade() else {
                    debug!("runner gone, stopping task {}", task_id);
                    tasks.remove(&task_id);
                    return;
                };
                // Each run is its own task so cancelling stops only future ticks.
                let agent_id = agent_id.clone();
                let request = request.clone();
                tokio::spawn(async move {
                    runner.run_task(&agent_id, request).await;
                });
            }
        })
    }
}

impl Scheduler for TokioScheduler {
    fn create_task(
        &self,
        request: Request,
        delay: Duration,
        recurring: bool,
        first_immediate: bool,
    ) -> RpcResult<TaskId> {
        if recurring && delay.is_zero() {
            return Err(RpcError::InvalidParams(
                "recurring task needs a non-zero interval".to_string(),
            ));
        }
        let task_id = Uuid::new_v4().to_string();
        debug!(
            "{}: scheduling {} in {:?} (recurring: {})",
            self.agent_id,
            request.method(),
            delay,
            recurring
        );

        // The task waits until its handle is registered, so a one-shot that
        // finishes immediately still removes its own entry.
        let (open, gate) = oneshot::channel();
        let handle = if recurring {
            self.spawn_recurring(task_id.clone(), request, delay, first_immediate, gate)
        } else {
            self.spawn_once(task_id.clone(), request, delay, gate)
        };
        self.tasks.insert(task_id.clone(), handle);
        let _ = open.send(());
        Ok(task_id)
    }

    fn cancel_task(&self, task_id: &str) -> bool {
        match self.tasks.remove(task_id) {
            Some((_, handle)) => {
                handle.abort();
                debug!("{}: cancelled task {}", self.agent_id, task_id);
                true
            }
            None => false,
        }
    }

    fn list_tasks(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        let remaining = self.cancel_all();
        if remaining > 0 {
            warn!("{}: dropped scheduler with {} live tasks", self.agent_id, remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Params;
    use tokio::{sync::mpsc, time::sleep};

    struct ChannelRunner {
        tx: mpsc::UnboundedSender<(String, String)>,
    }

    #[async_trait]
    impl TaskRunner for ChannelRunner {
        async fn run_task(&self, agent_id: &str, request: Request) {
            let _ = self.tx.send((agent_id.to_string(), request.method().to_string()));
        }
    }

    fn setup() -> (
        Arc<dyn TaskRunner>,
        TokioScheduler,
        mpsc::UnboundedReceiver<(String, String)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner: Arc<dyn TaskRunner> = Arc::new(ChannelRunner { tx });
        let scheduler = TokioScheduler::new("sensor", Arc::downgrade(&runner));
        (runner, scheduler, rx)
    }

    fn request(method: &str) -> Request {
        Request::call(method, Params::new()).unwrap()
    }

    #[tokio::test]
    async fn test_one_shot_runs_once_and_forgets_itself() {
        let (_runner, scheduler, mut rx) = setup();
        scheduler
            .create_task(request("onTrigger"), Duration::ZERO, false, false)
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ("sensor".to_string(), "onTrigger".to_string())
        );
        sleep(Duration::from_millis(20)).await;
        assert!(scheduler.list_tasks().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recurring_until_cancelled() {
        let (_runner, scheduler, mut rx) = setup();
        let id = scheduler
            .create_task(request("doPoll"), Duration::from_millis(20), true, true)
            .unwrap();

        // The first run is immediate, the next ones follow the interval.
        for _ in 0..3 {
            assert_eq!(rx.recv().await.unwrap().1, "doPoll");
        }
        assert_eq!(scheduler.list_tasks(), vec![id.clone()]);

        assert!(scheduler.cancel_task(&id));
        assert!(!scheduler.cancel_task(&id));
        sleep(Duration::from_millis(30)).await;
        while rx.try_recv().is_ok() {}
        sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delayed_first_run() {
        let (_runner, scheduler, mut rx) = setup();
        scheduler
            .create_task(request("doPush"), Duration::from_millis(100), true, false)
            .unwrap();
        sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(rx.recv().await.unwrap().1, "doPush");
        scheduler.cancel_all();
    }

    #[tokio::test]
    async fn test_zero_interval_recurring_is_rejected() {
        let (_runner, scheduler, _rx) = setup();
        assert!(matches!(
            scheduler.create_task(request("doPoll"), Duration::ZERO, true, true),
            Err(RpcError::InvalidParams(_))
        ));
        assert!(scheduler.list_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (_runner, scheduler, _rx) = setup();
        for _ in 0..3 {
            scheduler
                .create_task(request("doPoll"), Duration::from_secs(60), true, false)
                .unwrap();
        }
        assert_eq!(scheduler.cancel_all(), 3);
        assert!(scheduler.list_tasks().is_empty());
    }
}
