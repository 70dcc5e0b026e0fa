use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Recurring status update.
///
/// Calls `tick` once per period, first after one full period. The tick only
/// fans out work; it must not wait on devices.
pub struct StatusPoller {
    task: JoinHandle<()>,
}

impl StatusPoller {
    /// Start polling. `None` when `period` is zero, which disables polling.
    pub fn spawn<F>(period: Duration, tick: F) -> Option<Self>
    where
        F: Fn() + Send + 'static,
    {
        if period.is_zero() {
            info!("Status polling disabled");
            return None;
        }

        info!("Polling device status every {:?}", period);
        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                debug!("Status poll tick");
                tick();
            }
        });

        Some(Self { task })
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_zero_period_disables() {
        assert!(StatusPoller::spawn(Duration::ZERO, || {}).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_every_period() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let poller = StatusPoller::spawn(Duration::from_secs(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(poller.is_running());

        // Nothing before the first full period
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        poller.stop();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(!poller.is_running());
    }
}
