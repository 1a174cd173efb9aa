//! Cancellable one-round countdown.
//!
//! One ticking task per round, system-wide: the orchestrator stops the timer
//! of round N (and `stop` waits for the task) before starting the timer of
//! round N+1, so two countdowns never tick concurrently. Events are pushed
//! over a channel; the consumer decides what each one means for clients.

use log::debug;
use shared::LOW_TIME_SECS;
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// What the countdown reports while running.
///
/// `RevealLetter` fires at two-thirds and one-third of the original duration
/// and carries no content: which letter to disclose is the consumer's
/// business. `Expired` is emitted exactly once, after which the task exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Tick(u32),
    RevealLetter(u8),
    LowTime(u32),
    Expired,
}

pub struct RoundTimer {
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RoundTimer {
    /// Spawns the ticking task. The countdown decrements once per second,
    /// starting one second from now.
    pub fn start(duration_secs: u32, events: mpsc::UnboundedSender<TimerEvent>) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let reveal_first = duration_secs * 2 / 3;
            let reveal_second = duration_secs / 3;
            let mut remaining = duration_secs;

            let mut ticker = interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // An interval's first tick completes immediately; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    // Also trips when the handle is dropped without stop().
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        remaining = remaining.saturating_sub(1);
                        if events.send(TimerEvent::Tick(remaining)).is_err() {
                            break;
                        }
                        if remaining == reveal_first && remaining > 0 {
                            let _ = events.send(TimerEvent::RevealLetter(1));
                        } else if remaining == reveal_second && remaining > 0 {
                            let _ = events.send(TimerEvent::RevealLetter(2));
                        }
                        if remaining <= LOW_TIME_SECS {
                            let _ = events.send(TimerEvent::LowTime(remaining));
                        }
                        if remaining == 0 {
                            let _ = events.send(TimerEvent::Expired);
                            break;
                        }
                    }
                }
            }
            debug!("Round timer task finished");
        });

        Self {
            stop_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stops the countdown. Idempotent, and safe to call from any context:
    /// it waits for the ticking task to exit, so once `stop` returns no
    /// further event will be delivered and a new timer may start immediately.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
