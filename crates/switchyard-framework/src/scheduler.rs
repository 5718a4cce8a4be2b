//! Per-conversation execution scheduling.
//!
//! The [`Scheduler`] runs handler jobs according to a [`Threading`] policy.
//! For the keyed policies every active key owns a mailbox and a worker task:
//!
//! ```text
//!            submit(key, job)
//!                  │
//!        ┌─────────┴─────────┐
//!   no worker for key    worker registered
//!        │                   │
//!   register mailbox,    push job onto
//!   spawn worker         the mailbox
//!        │
//!   worker: run job, then drain the mailbox in FIFO order;
//!   on empty, unregister the key under the lane lock and exit
//! ```
//!
//! Each lane (per-user, per-chat) guards its mailbox map with one mutex.
//! Senders only push while holding it and a worker only unregisters while
//! holding it, so no job is left behind in a mailbox without a worker.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use crate::error::DispatchError;

/// How executions for a conversation are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Threading {
    /// Every update runs independently.
    PerEvent,
    /// Updates from the same user run one at a time, in arrival order.
    /// Falls back to [`Threading::PerChat`] when the update has no user.
    #[default]
    PerUser,
    /// Updates in the same chat run one at a time, in arrival order.
    /// Updates without a chat run as [`Threading::PerEvent`].
    PerChat,
    /// Runs on the dispatching task.
    Disabled,
}

/// Serialization key a job was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneKey {
    User(i64),
    Chat(i64),
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneKey::User(id) => write!(f, "user:{id}"),
            LaneKey::Chat(id) => write!(f, "chat:{id}"),
        }
    }
}

enum Target {
    Inline,
    Spawn,
    Keyed(LaneKey),
}

impl Threading {
    fn target(self, user: Option<i64>, chat: Option<i64>) -> Target {
        match self {
            Threading::Disabled => Target::Inline,
            Threading::PerEvent => Target::Spawn,
            Threading::PerUser => match (user, chat) {
                (Some(user), _) => Target::Keyed(LaneKey::User(user)),
                (None, Some(chat)) => Target::Keyed(LaneKey::Chat(chat)),
                (None, None) => Target::Spawn,
            },
            Threading::PerChat => match chat {
                Some(chat) => Target::Keyed(LaneKey::Chat(chat)),
                None => Target::Spawn,
            },
        }
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// How a job's run future ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    /// A more specific collaborator already handled a failure.
    Suppressed,
}

/// Result of executing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    Completed,
    Suppressed,
    Failed,
}

type ErrorHook = Box<dyn FnOnce(DispatchError) -> BoxFuture<'static, ()> + Send>;

/// A unit of work submitted to the [`Scheduler`].
pub struct Job {
    label: String,
    run: BoxFuture<'static, Result<Completion, DispatchError>>,
    on_error: Option<ErrorHook>,
}

impl Job {
    pub fn new<F>(label: impl Into<String>, run: F) -> Self
    where
        F: Future<Output = Result<Completion, DispatchError>> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: run.boxed(),
            on_error: None,
        }
    }

    /// Sets the hook that receives the job's error or panic.
    pub fn on_error<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(DispatchError) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Some(Box::new(move |err| hook(err).boxed()));
        self
    }

    /// Runs the job, catching panics so the calling worker survives.
    pub async fn execute(self) -> Execution {
        let err = match AssertUnwindSafe(self.run).catch_unwind().await {
            Ok(Ok(Completion::Done)) => return Execution::Completed,
            Ok(Ok(Completion::Suppressed)) => return Execution::Suppressed,
            Ok(Err(err)) => err,
            Err(panic) => DispatchError::Panicked {
                method: self.label,
                message: panic_message(panic.as_ref()),
            },
        };
        match self.on_error {
            Some(hook) => hook(err).await,
            None => debug!(error = %err, "Job failed without an error hook"),
        }
        Execution::Failed
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("label", &self.label).finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Where a submitted job went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Ran on the caller.
    Inline(Execution),
    /// Spawned as an independent task.
    Spawned,
    /// Started a new worker for an idle key.
    Started(LaneKey),
    /// Queued behind the running worker of a busy key.
    Queued(LaneKey),
}

#[derive(Default)]
struct Lane {
    mailboxes: Mutex<HashMap<i64, mpsc::UnboundedSender<Job>>>,
}

/// Runs jobs under a [`Threading`] policy.
#[derive(Clone, Default)]
pub struct Scheduler {
    users: Arc<Lane>,
    chats: Arc<Lane>,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submits a job.
    ///
    /// Only [`Threading::Disabled`] awaits the job itself; every other policy
    /// returns once the job is spawned or queued.
    pub async fn submit(
        &self,
        threading: Threading,
        user: Option<i64>,
        chat: Option<i64>,
        job: Job,
    ) -> Placement {
        match threading.target(user, chat) {
            Target::Inline => Placement::Inline(job.execute().await),
            Target::Spawn => {
                self.tracker.spawn(job.execute());
                Placement::Spawned
            }
            Target::Keyed(key) => self.enqueue(key, job),
        }
    }

    fn lane(&self, key: LaneKey) -> (&Arc<Lane>, i64) {
        match key {
            LaneKey::User(id) => (&self.users, id),
            LaneKey::Chat(id) => (&self.chats, id),
        }
    }

    fn enqueue(&self, key: LaneKey, job: Job) -> Placement {
        let (lane, id) = self.lane(key);
        let mut mailboxes = lane.mailboxes.lock();

        let job = match mailboxes.get(&id) {
            Some(mailbox) => match mailbox.send(job) {
                Ok(()) => {
                    trace!(%key, "Queued job behind running worker");
                    return Placement::Queued(key);
                }
                // Receiver dropped without unregistering: the worker task was
                // cancelled by runtime shutdown.
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        mailboxes.insert(id, tx);
        drop(mailboxes);

        trace!(%key, "Starting worker");
        self.tracker
            .spawn(run_worker(Arc::clone(lane), id, key, job, rx));
        Placement::Started(key)
    }

    /// Returns the number of keys with a running worker.
    pub fn active_keys(&self) -> usize {
        self.users.mailboxes.lock().len() + self.chats.mailboxes.lock().len()
    }

    /// Waits until every spawned job and worker has finished.
    ///
    /// Jobs submitted while draining are waited for as well.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("active_keys", &self.active_keys())
            .field("tasks", &self.tracker.len())
            .finish()
    }
}

async fn run_worker(
    lane: Arc<Lane>,
    id: i64,
    key: LaneKey,
    first: Job,
    mut mailbox: mpsc::UnboundedReceiver<Job>,
) {
    first.execute().await;
    loop {
        let next = match mailbox.try_recv() {
            Ok(job) => job,
            Err(_) => {
                let mut mailboxes = lane.mailboxes.lock();
                match mailbox.try_recv() {
                    Ok(job) => job,
                    Err(_) => {
                        mailboxes.remove(&id);
                        trace!(%key, "Worker idle, exiting");
                        return;
                    }
                }
            }
        };
        next.execute().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ok_job(label: &str, f: impl Future<Output = ()> + Send + 'static) -> Job {
        Job::new(label, async move {
            f.await;
            Ok(Completion::Done)
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_per_user_is_fifo() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let log = Arc::clone(&log);
            let job = ok_job("append", async move {
                // Earlier jobs sleep longer; order must still hold.
                tokio::time::sleep(Duration::from_millis(20 - i)).await;
                log.lock().push(i);
            });
            scheduler.submit(Threading::PerUser, Some(7), Some(1), job).await;
        }

        scheduler.drain().await;
        assert_eq!(*log.lock(), (0..20).collect::<Vec<_>>());
        assert_eq!(scheduler.active_keys(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_one_in_flight_per_key() {
        let scheduler = Scheduler::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..30 {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            let job = ok_job("count", async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                tokio::time::sleep(Duration::from_millis(1)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
            scheduler.submit(Threading::PerChat, Some(1), Some(99), job).await;
        }

        scheduler.drain().await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_second_event_waits_for_first() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first_log = Arc::clone(&log);
        let first = ok_job("slow", async move {
            first_log.lock().push("first:start");
            tokio::time::sleep(Duration::from_millis(50)).await;
            first_log.lock().push("first:end");
        });
        let second_log = Arc::clone(&log);
        let second = ok_job("fast", async move {
            second_log.lock().push("second");
        });

        let a = scheduler.submit(Threading::PerChat, None, Some(5), first).await;
        let b = scheduler.submit(Threading::PerChat, None, Some(5), second).await;
        assert_eq!(a, Placement::Started(LaneKey::Chat(5)));
        assert_eq!(b, Placement::Queued(LaneKey::Chat(5)));

        scheduler.drain().await;
        assert_eq!(*log.lock(), vec!["first:start", "first:end", "second"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_keys_run_concurrently() {
        let scheduler = Scheduler::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        // Key 1 blocks until key 2 has run.
        let blocked = ok_job("wait", async move {
            let _ = rx.await;
        });
        let unblock = ok_job("signal", async move {
            let _ = tx.send(());
        });

        scheduler.submit(Threading::PerUser, Some(1), None, blocked).await;
        scheduler.submit(Threading::PerUser, Some(2), None, unblock).await;

        tokio::time::timeout(Duration::from_secs(5), scheduler.drain())
            .await
            .expect("keys must not block each other");
    }

    fn explode() -> Completion {
        panic!("handler exploded")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_does_not_stop_worker() {
        let scheduler = Scheduler::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let ran = Arc::new(AtomicUsize::new(0));

        let hook_errors = Arc::clone(&errors);
        let failing = Job::new("boom", async { Ok(explode()) }).on_error(
            move |err| async move {
                hook_errors.lock().push(err.to_string());
            },
        );
        let counter = Arc::clone(&ran);
        let next = ok_job("after", async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.submit(Threading::PerUser, Some(3), None, failing).await;
        scheduler.submit(Threading::PerUser, Some(3), None, next).await;
        scheduler.drain().await;

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_disabled_runs_inline() {
        let scheduler = Scheduler::new();
        let job = Job::new("inline", async { Ok(Completion::Suppressed) });
        let placement = scheduler.submit(Threading::Disabled, None, None, job).await;
        assert_eq!(placement, Placement::Inline(Execution::Suppressed));
    }

    #[test]
    fn test_threading_fallbacks() {
        assert!(matches!(
            Threading::PerUser.target(None, Some(4)),
            Target::Keyed(LaneKey::Chat(4))
        ));
        assert!(matches!(Threading::PerChat.target(Some(1), None), Target::Spawn));
        assert!(matches!(Threading::PerEvent.target(Some(1), Some(2)), Target::Spawn));
    }

    #[test]
    fn test_threading_serde_names() {
        let threading: Threading = serde_json::from_str("\"per-chat\"").unwrap();
        assert_eq!(threading, Threading::PerChat);
        assert_eq!(Threading::default(), Threading::PerUser);
    }
}
