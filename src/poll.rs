use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::ClientResult;
use crate::sync::lock_or_recover;

type PollFuture<T> = Pin<Box<dyn Future<Output = ClientResult<T>> + Send>>;
type PollFn<T> = Arc<dyn Fn() -> PollFuture<T> + Send + Sync>;

struct Shared<T> {
    name: &'static str,
    published: watch::Sender<Option<T>>,
    issued: AtomicU64,
    published_generation: Mutex<u64>,
    stopped: AtomicBool,
}

impl<T> Shared<T> {
    async fn poll_once(&self, fetch: &PollFn<T>) -> ClientResult<T>
    where
        T: Clone,
    {
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let value = fetch().await?;
        self.publish(generation, value.clone());
        Ok(value)
    }

    fn publish(&self, generation: u64, value: T) {
        if self.stopped.load(Ordering::SeqCst) {
            tracing::debug!(poller = self.name, generation, "poller stopped, dropping result");
            return;
        }
        let mut last = lock_or_recover(&self.published_generation);
        if generation <= *last {
            tracing::debug!(poller = self.name, generation, latest = *last, "dropping out-of-order result");
            return;
        }
        *last = generation;
        self.published.send_replace(Some(value));
    }
}

/// Re-fetches a resource on a fixed interval and publishes the newest result.
///
/// The first fetch happens immediately. A result is published only if it was
/// requested after the one currently published, so a slow response can never
/// replace a fresher one. The timer stops on [`Poller::stop`] or drop.
pub struct Poller<T> {
    shared: Arc<Shared<T>>,
    fetch: PollFn<T>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + Sync + 'static> Poller<T> {
    pub fn start<F, Fut>(name: &'static str, interval: Duration, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClientResult<T>> + Send + 'static,
    {
        let fetch: PollFn<T> = Arc::new(move || Box::pin(fetch()) as PollFuture<T>);
        let (published, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            name,
            published,
            issued: AtomicU64::new(0),
            published_generation: Mutex::new(0),
            stopped: AtomicBool::new(false),
        });

        let timer = tokio::spawn({
            let shared = shared.clone();
            let fetch = fetch.clone();
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(error) = shared.poll_once(&fetch).await {
                        tracing::warn!(poller = shared.name, error = %error, "poll failed");
                    }
                }
            }
        });
        tracing::debug!(poller = name, interval_ms = interval.as_millis() as u64, "poller started");

        Self {
            shared,
            fetch,
            timer: Mutex::new(Some(timer)),
        }
    }

    /// Fetches now, outside the timer. The value is returned even if a
    /// newer result was published in the meantime.
    pub async fn refresh(&self) -> ClientResult<T> {
        self.shared.poll_once(&self.fetch).await
    }

    pub fn latest(&self) -> Option<T> {
        self.shared.published.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.shared.published.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }
}

impl<T> Poller<T> {
    /// Cancels the timer. Fetches already in flight finish without
    /// publishing.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        if let Some(timer) = lock_or_recover(&self.timer).take() {
            timer.abort();
            tracing::debug!(poller = self.shared.name, "poller stopped");
        }
    }
}

impl<T> Drop for Poller<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
