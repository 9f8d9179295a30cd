//! Per-subscriber periodic push
//!
//! Every subscriber owns exactly one repeating timer. Timers are `TimerHandle`s
//! kept in the subscriber table, so removing an entry is what cancels it.
//! A token per subscription keeps a slow initial push from installing a timer
//! for an entry that was unsubscribed or replaced in the meantime.
use crate::aggregator::{Aggregator, Snapshot};
use crate::config::SchedulerConfig;
use crate::errors::{BrokerError, BrokerResult};
use crate::logger::{self, LogLevel, LogTag};
use crate::timer::TimerHandle;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const MIN_INTERVAL: Duration = Duration::from_millis(100);

type PushFn = Arc<dyn Fn() -> BoxFuture<'static, BrokerResult<()>> + Send + Sync>;
type LastPush = Arc<Mutex<Option<DateTime<Utc>>>>;

struct Subscriber {
    token: u64,
    last_push_at: LastPush,
    /// None until the initial push has completed
    timer: Option<TimerHandle>,
}

pub struct UpdateScheduler {
    aggregator: Arc<Aggregator>,
    default_interval: Duration,
    subscribers: Mutex<HashMap<String, Subscriber>>,
    next_token: AtomicU64,
}

impl UpdateScheduler {
    pub fn new(aggregator: Arc<Aggregator>, cfg: &SchedulerConfig) -> Self {
        Self {
            aggregator,
            default_interval: Duration::from_millis(cfg.refresh_interval_ms),
            subscribers: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    /// Push once now, then every `interval`
    ///
    /// Any existing subscription under `id` is cancelled first. A failing push is
    /// logged and retried on the next tick.
    pub async fn subscribe<F, Fut>(&self, id: &str, push: F, interval: Duration)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BrokerResult<()>> + Send + 'static,
    {
        let push: PushFn = Arc::new(move || push().boxed());
        let period = interval.max(MIN_INTERVAL);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let last_push_at: LastPush = Arc::new(Mutex::new(None));

        // Replacing the entry drops the previous timer
        let entry = Subscriber {
            token,
            last_push_at: last_push_at.clone(),
            timer: None,
        };
        if self.subscribers.lock().insert(id.to_string(), entry).is_some() {
            logger::debug(
                LogTag::Scheduler,
                &format!("Re-subscribe for '{}', previous timer cancelled", id),
            );
        }

        run_push(id, &push, &last_push_at).await;

        let mut subscribers = self.subscribers.lock();
        match subscribers.get_mut(id) {
            Some(entry) if entry.token == token => {
                entry.timer = Some(spawn_timer(id.to_string(), push, last_push_at, period));
                logger::debug(
                    LogTag::Scheduler,
                    &format!("Subscriber '{}' scheduled every {}ms", id, period.as_millis()),
                );
            }
            _ => logger::debug(
                LogTag::Scheduler,
                &format!("Subscriber '{}' went away during initial push", id),
            ),
        }
    }

    /// Subscribe to aggregator snapshots
    ///
    /// Failures reach `on_error` as a scoped event; the subscription stays active.
    pub async fn subscribe_snapshots<D, E>(
        &self,
        id: &str,
        on_data: D,
        on_error: E,
        interval: Duration,
    ) where
        D: Fn(Snapshot) + Send + Sync + 'static,
        E: Fn(&BrokerError) + Send + Sync + 'static,
    {
        let aggregator = self.aggregator.clone();
        let on_data = Arc::new(on_data);
        let on_error = Arc::new(on_error);

        self.subscribe(
            id,
            move || {
                let aggregator = aggregator.clone();
                let on_data = on_data.clone();
                let on_error = on_error.clone();
                async move {
                    match aggregator.snapshot().await {
                        Ok(snapshot) => {
                            on_data(snapshot);
                            Ok(())
                        }
                        Err(e) => {
                            on_error(&e);
                            Err(e)
                        }
                    }
                }
            },
            interval,
        )
        .await;
    }

    /// Cancel the subscriber's timer; returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = self.subscribers.lock().remove(id);
        match removed {
            Some(subscriber) => {
                if let Some(timer) = subscriber.timer {
                    timer.cancel();
                }
                logger::debug(LogTag::Scheduler, &format!("Subscriber '{}' removed", id));
                true
            }
            None => false,
        }
    }

    pub fn last_push_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.subscribers
            .lock()
            .get(id)
            .and_then(|subscriber| *subscriber.last_push_at.lock())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn shutdown(&self) {
        let drained: Vec<_> = self.subscribers.lock().drain().collect();
        if !drained.is_empty() {
            logger::info(
                LogTag::Scheduler,
                &format!("Cancelled {} subscriber timer(s)", drained.len()),
            );
        }
    }
}

fn spawn_timer(id: String, push: PushFn, last_push_at: LastPush, period: Duration) -> TimerHandle {
    TimerHandle::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            run_push(&id, &push, &last_push_at).await;
        }
    })
}

async fn run_push(id: &str, push: &PushFn, last_push_at: &LastPush) {
    match push().await {
        Ok(()) => {
            *last_push_at.lock() = Some(Utc::now());
        }
        Err(e) => {
            // Transient transport trouble is expected while the broker flaps
            let level = if e.is_retryable() {
                LogLevel::Warning
            } else {
                LogLevel::Error
            };
            let mut fields = vec![("subscriber", id.to_string()), ("error", e.to_string())];
            if let Some(status) = e.status_code() {
                fields.push(("status", status.to_string()));
            }
            logger::with_fields(level, LogTag::Scheduler, "Push to subscriber failed", &fields);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{offline_aggregator, FakeTransport};
    use reqwest::Method;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn scheduler() -> (UpdateScheduler, Arc<FakeTransport>) {
        let transport = FakeTransport::new();
        let scheduler = UpdateScheduler::new(
            offline_aggregator(transport.clone()),
            &SchedulerConfig::default(),
        );
        (scheduler, transport)
    }

    fn counting_push(counter: &Arc<AtomicUsize>) -> impl Fn() -> BoxFuture<'static, BrokerResult<()>> + Send + Sync + 'static {
        let counter = counter.clone();
        move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_push_then_interval() {
        let (scheduler, _) = scheduler();
        let pushes = Arc::new(AtomicUsize::new(0));

        scheduler
            .subscribe("ws-1", counting_push(&pushes), Duration::from_millis(1_000))
            .await;
        assert_eq!(pushes.load(Ordering::SeqCst), 1);
        assert!(scheduler.last_push_at("ws-1").is_some());

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert_eq!(pushes.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(pushes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_keeps_single_timer() {
        let (scheduler, _) = scheduler();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler
            .subscribe("ws-1", counting_push(&first), Duration::from_millis(1_000))
            .await;
        scheduler
            .subscribe("ws-1", counting_push(&second), Duration::from_millis(1_000))
            .await;

        tokio::time::sleep(Duration::from_millis(3_050)).await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.subscriber_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_unsubscribe_leaves_others_running() {
        let (scheduler, _) = scheduler();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        scheduler
            .subscribe("a", counting_push(&a), Duration::from_millis(500))
            .await;
        scheduler
            .subscribe("b", counting_push(&b), Duration::from_millis(500))
            .await;

        assert!(scheduler.unsubscribe("a"));
        assert!(!scheduler.unsubscribe("a"));

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.subscriber_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_subscriber_is_isolated() {
        let (scheduler, _) = scheduler();
        let failures = Arc::new(AtomicUsize::new(0));
        let healthy = Arc::new(AtomicUsize::new(0));

        let counter = failures.clone();
        scheduler
            .subscribe(
                "broken",
                move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(BrokerError::ChannelUnavailable)
                    }
                },
                Duration::from_millis(500),
            )
            .await;
        scheduler
            .subscribe("ok", counting_push(&healthy), Duration::from_millis(500))
            .await;

        tokio::time::sleep(Duration::from_millis(1_050)).await;

        assert_eq!(failures.load(Ordering::SeqCst), 3);
        assert_eq!(healthy.load(Ordering::SeqCst), 3);
        assert!(scheduler.last_push_at("broken").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_during_initial_push_installs_no_timer() {
        let (scheduler, _) = scheduler();
        let scheduler = Arc::new(scheduler);
        let pushes = Arc::new(AtomicUsize::new(0));

        let counter = pushes.clone();
        let task = tokio::spawn({
            let scheduler = scheduler.clone();
            async move {
                scheduler
                    .subscribe(
                        "slow",
                        move || {
                            let counter = counter.clone();
                            async move {
                                tokio::time::sleep(Duration::from_millis(200)).await;
                                counter.fetch_add(1, Ordering::SeqCst);
                                Ok(())
                            }
                        },
                        Duration::from_millis(500),
                    )
                    .await
            }
        });

        tokio::task::yield_now().await;
        assert!(scheduler.unsubscribe("slow"));
        task.await.unwrap();

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(pushes.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_errors_are_scoped_events() {
        let (scheduler, transport) = scheduler();
        let data = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let (data_seen, errors_seen) = (data.clone(), errors.clone());
        scheduler
            .subscribe_snapshots(
                "dash",
                move |_| {
                    data_seen.fetch_add(1, Ordering::SeqCst);
                },
                move |e| errors_seen.lock().push(e.to_string()),
                Duration::from_millis(1_000),
            )
            .await;
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(data.load(Ordering::SeqCst), 0);

        transport.respond(Method::GET, "/overview", Ok(json!({"cluster_name": "rabbit@mq1"})));
        transport.respond(Method::GET, "/queues", Ok(json!([])));
        tokio::time::sleep(Duration::from_millis(1_050)).await;

        assert_eq!(data.load(Ordering::SeqCst), 1);
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(scheduler.subscriber_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_every_timer() {
        let (scheduler, _) = scheduler();
        let pushes = Arc::new(AtomicUsize::new(0));
        for id in ["a", "b", "c"] {
            scheduler
                .subscribe(id, counting_push(&pushes), Duration::from_millis(500))
                .await;
        }

        scheduler.shutdown();
        tokio::time::sleep(Duration::from_millis(2_000)).await;

        assert_eq!(pushes.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.subscriber_count(), 0);
    }
}
