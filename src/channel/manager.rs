// Reconnecting channel manager: keeps one best-effort push channel alive
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::connection::{ChannelConnection, ChannelEvent};
use crate::models::ChannelMessage;

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;
/// After this many consecutive failed attempts the manager reports itself as
/// polling-only; it keeps retrying regardless, since reconnection is
/// unbounded for a non-terminal job.
const POLLING_ONLY_AFTER: u32 = 5;

/// Updates the manager reports to its owner. `Down` doubles as the
/// channel-health-degraded signal that activates polling.
#[derive(Debug)]
pub enum ChannelUpdate {
    Connected,
    Down,
    Message(ChannelMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Connecting,
    Open,
    Backoff,
    PollingOnly,
}

/// Owns zero-or-one live [`ChannelConnection`] and a retry policy:
/// exponential backoff with jitter, unbounded attempts. Terminal-job
/// shutdown is the owner's call (it sees the reconciled status); the manager
/// only ever stops on `stop()`.
pub struct ChannelManager {
    url: String,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<ManagerState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelManager {
    pub fn new(url: String) -> Self {
        Self {
            url,
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(ManagerState::Idle)),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock()
    }

    /// Opens the channel and keeps it alive until `stop()`. Repeated calls
    /// while running are no-ops.
    pub fn start(&self, updates: mpsc::UnboundedSender<ChannelUpdate>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Channel manager already running");
            return;
        }

        let url = self.url.clone();
        let running = self.running.clone();
        let state = self.state.clone();

        let handle = tokio::spawn(async move {
            let mut attempt: u32 = 0;
            let mut was_open = true; // report Down on the very first failure too

            while running.load(Ordering::SeqCst) {
                *state.lock() = ManagerState::Connecting;

                match ChannelConnection::open(&url).await {
                    Ok(mut conn) => {
                        attempt = 0;
                        was_open = true;
                        *state.lock() = ManagerState::Open;
                        if updates.send(ChannelUpdate::Connected).is_err() {
                            break;
                        }

                        loop {
                            match conn.next_event().await {
                                ChannelEvent::Message(ChannelMessage::Unknown) => {
                                    debug!("Unknown channel message type ignored");
                                }
                                ChannelEvent::Message(msg) => {
                                    if updates.send(ChannelUpdate::Message(msg)).is_err() {
                                        running.store(false, Ordering::SeqCst);
                                        break;
                                    }
                                }
                                ChannelEvent::Closed => {
                                    info!("Channel closed by server");
                                    break;
                                }
                                ChannelEvent::Error(e) => {
                                    warn!("Channel error: {}", e);
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Channel connect failed: {}", e);
                    }
                }

                if !running.load(Ordering::SeqCst) {
                    break;
                }

                attempt += 1;
                *state.lock() = if attempt >= POLLING_ONLY_AFTER {
                    ManagerState::PollingOnly
                } else {
                    ManagerState::Backoff
                };
                if was_open {
                    was_open = false;
                    if updates.send(ChannelUpdate::Down).is_err() {
                        break;
                    }
                }

                let delay = backoff_delay(attempt);
                debug!(
                    "Channel reconnect attempt {} in {}ms",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            *state.lock() = ManagerState::Idle;
            debug!("Channel manager stopped");
        });

        *self.task.lock() = Some(handle);
    }

    /// Tears the channel down. Idempotent; after return no further updates
    /// are produced and no connection is leaked.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        *self.state.lock() = ManagerState::Idle;
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Nominal exponential delay for the given attempt (1-based): base 1s,
/// factor 2, capped at 30s.
fn backoff_delay_ms(attempt: u32) -> u64 {
    let shift = attempt.saturating_sub(1).min(10);
    BACKOFF_BASE_MS
        .saturating_mul(1u64 << shift)
        .min(BACKOFF_CAP_MS)
}

/// Full backoff delay: nominal value minus up to 25% jitter, so a fleet of
/// sessions does not reconnect in lockstep.
fn backoff_delay(attempt: u32) -> Duration {
    let nominal = backoff_delay_ms(attempt);
    let jitter = rand::thread_rng().gen_range(0..=nominal / 4);
    Duration::from_millis(nominal - jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_one_second() {
        assert_eq!(backoff_delay_ms(1), 1_000);
        assert_eq!(backoff_delay_ms(2), 2_000);
        assert_eq!(backoff_delay_ms(3), 4_000);
        assert_eq!(backoff_delay_ms(5), 16_000);
    }

    #[test]
    fn test_backoff_caps_at_thirty_seconds() {
        assert_eq!(backoff_delay_ms(6), 30_000);
        assert_eq!(backoff_delay_ms(10), 30_000);
        assert_eq!(backoff_delay_ms(u32::MAX), 30_000);
    }

    #[test]
    fn test_jittered_delay_stays_in_range() {
        for attempt in 1..8 {
            let nominal = backoff_delay_ms(attempt);
            for _ in 0..50 {
                let d = backoff_delay(attempt).as_millis() as u64;
                assert!(d <= nominal);
                assert!(d >= nominal - nominal / 4);
            }
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let manager = ChannelManager::new("ws://127.0.0.1:1/jobs/x/events".to_string());
        let (tx, _rx) = mpsc::unbounded_channel();
        manager.start(tx);
        manager.stop();
        manager.stop();
        assert_eq!(manager.state(), ManagerState::Idle);
    }

    #[tokio::test]
    async fn test_reports_down_when_connect_fails() {
        // Nothing listens on this port, so the first connect attempt fails
        // and the manager must report the channel as down.
        let manager = ChannelManager::new("ws://127.0.0.1:9/jobs/x/events".to_string());
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.start(tx);
        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("expected an update before timeout")
            .expect("sender dropped");
        assert!(matches!(update, ChannelUpdate::Down));
        manager.stop();
    }
}
