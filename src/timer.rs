//! Owned handle for a spawned timer task
//!
//! Dropping or cancelling the handle aborts the task, so whoever owns the handle
//! controls whether the timer may still fire. Reconnect backoff timers, link
//! watchers and subscriber push timers are all held this way.
use std::future::Future;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct TimerHandle {
    handle: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(future)),
        }
    }

    /// Abort the task; it will not run past its current suspension point
    pub fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Release ownership without aborting
    ///
    /// Used by a timer task that clears its own slot: dropping the handle from
    /// inside the task it refers to would abort the task itself.
    pub fn detach(mut self) {
        self.handle.take();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_dropped_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let timer = TimerHandle::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(timer);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_timer_keeps_running() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let timer = TimerHandle::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timer.detach();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
