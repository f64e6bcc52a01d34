use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tracing::debug;

#[derive(Default)]
struct Slot {
    generation: u64,
    armed: Option<JoinHandle<()>>,
}

/// One-shot cancellable timer.
///
/// The firing task re-checks its generation under the same lock that
/// [`ForfeitTimer::cancel`] takes, so a cancel that reports `true` guarantees the
/// callback never runs.
#[derive(Clone)]
pub struct ForfeitTimer {
    label: &'static str,
    slot: Arc<Mutex<Slot>>,
}

impl ForfeitTimer {
    /// Idle timer; `label` names it in logs.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Start the countdown, replacing any countdown already running.
    pub async fn arm<F, Fut>(&self, after: Duration, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock().await;
        slot.generation += 1;
        if let Some(previous) = slot.armed.take() {
            previous.abort();
        }

        let generation = slot.generation;
        let shared = self.slot.clone();
        let label = self.label;
        slot.armed = Some(tokio::spawn(async move {
            sleep(after).await;
            {
                let mut slot = shared.lock().await;
                if slot.generation != generation || slot.armed.is_none() {
                    return;
                }
                slot.armed = None;
            }
            debug!(timer = label, "timer fired");
            on_fire().await;
        }));
        debug!(timer = self.label, after_ms = after.as_millis() as u64, "timer armed");
    }

    /// Stop the countdown. Returns `true` when a pending countdown was stopped
    /// before it fired.
    pub async fn cancel(&self) -> bool {
        let mut slot = self.slot.lock().await;
        slot.generation += 1;
        match slot.armed.take() {
            Some(task) => {
                task.abort();
                debug!(timer = self.label, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// True while a countdown is pending.
    pub async fn is_running(&self) -> bool {
        self.slot.lock().await.armed.is_some()
    }
}
