//! Rotation Scheduler (C6) — a single long-running cooperative task that
//! advances the Key Rotation Engine's state machine on an adaptive tick.

use crate::keys::rotation::KeyRotationEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Tick period derived once at start from the configured rotation interval.
pub fn tick_period_for(rotation_interval: Duration) -> Duration {
    if rotation_interval < Duration::from_secs(5 * 60) {
        Duration::from_secs(10)
    } else if rotation_interval < Duration::from_secs(24 * 60 * 60) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(60 * 60)
    }
}

pub struct RotationScheduler {
    engine: Arc<KeyRotationEngine>,
    tick_period: Duration,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RotationScheduler {
    pub fn new(engine: Arc<KeyRotationEngine>, rotation_interval: Duration) -> Self {
        Self {
            engine,
            tick_period: tick_period_for(rotation_interval),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Idempotent: a second call while already running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut handle_slot = self.handle.lock().await;
        if handle_slot.is_some() {
            return;
        }

        let engine = self.engine.clone();
        let tick_period = self.tick_period;
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("rotation scheduler stopping");
                        break;
                    }
                    _ = tokio::time::sleep(tick_period) => {
                        if let Err(e) = engine.check_and_rotate_if_needed().await {
                            tracing::error!(error = %e, "rotation tick failed, will retry next tick");
                        }
                        if let Err(e) = engine.check_and_activate_pending_keys().await {
                            tracing::error!(error = %e, "activation tick failed, will retry next tick");
                        }
                    }
                }
            }
        });

        *handle_slot = Some(handle);
    }

    /// Cancels the task and returns once it has observed cancellation (or
    /// has already exited on its own).
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut handle_slot = self.handle.lock().await;
        if let Some(handle) = handle_slot.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_period_below_five_minutes_is_ten_seconds() {
        assert_eq!(tick_period_for(Duration::from_secs(30)), Duration::from_secs(10));
        assert_eq!(
            tick_period_for(Duration::from_secs(4 * 60)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn tick_period_between_five_minutes_and_one_day_is_one_minute() {
        assert_eq!(
            tick_period_for(Duration::from_secs(5 * 60)),
            Duration::from_secs(60)
        );
        assert_eq!(
            tick_period_for(Duration::from_secs(23 * 60 * 60)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn tick_period_at_or_above_one_day_is_one_hour() {
        assert_eq!(
            tick_period_for(Duration::from_secs(24 * 60 * 60)),
            Duration::from_secs(60 * 60)
        );
        assert_eq!(
            tick_period_for(Duration::from_secs(180 * 24 * 60 * 60)),
            Duration::from_secs(60 * 60)
        );
    }
}
