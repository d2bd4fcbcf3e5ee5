//! Repeating autofocus cycles at a configurable cadence.
//!
//! A focus cycle is a blocking driver call, so it runs on the blocking pool;
//! between cycles a single cancellable retry task sleeps for the configured
//! interval. Only devices whose current focus mode needs re-triggering (auto
//! or macro) get cycles; for anything else the scheduler accepts every call
//! and does nothing.

use crate::device::SharedDevice;
use crate::error::{QrcamError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_AUTOFOCUS_INTERVAL_MS: u64 = 5000;

struct FocusState {
    stopped: bool,
    focusing: bool,
    interval: Duration,
    /// Cancellation handle of the one scheduled retry, when there is one.
    pending_retry: Option<CancellationToken>,
}

struct Inner {
    device: SharedDevice,
    use_auto_focus: bool,
    state: Mutex<FocusState>,
}

pub struct AutoFocusScheduler {
    inner: Arc<Inner>,
}

impl AutoFocusScheduler {
    /// Create a scheduler bound to an open device and immediately begin the
    /// focus cycle (when the device's focus mode calls for one).
    pub fn new(device: SharedDevice, interval_ms: u64) -> Self {
        let current_mode = device.lock().focus_mode();
        let use_auto_focus = current_mode
            .map(|mode| mode.requires_focus_cycles())
            .unwrap_or(false);
        info!(
            "Current focus mode {:?}; use auto focus? {}",
            current_mode, use_auto_focus
        );

        let scheduler = Self {
            inner: Arc::new(Inner {
                device,
                use_auto_focus,
                state: Mutex::new(FocusState {
                    stopped: false,
                    focusing: false,
                    interval: Duration::from_millis(interval_ms.max(1)),
                    pending_retry: None,
                }),
            }),
        };
        scheduler.start();
        scheduler
    }

    /// Trigger a focus cycle now. No-op while one is already running or
    /// after `stop()`.
    pub fn start(&self) {
        self.inner.trigger_focus();
    }

    /// Stop the cycle: cancel the scheduled retry and best-effort cancel an
    /// in-flight focus call on the device. Terminal; failures are logged,
    /// never raised.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            if let Some(token) = state.pending_retry.take() {
                token.cancel();
            }
        }
        if self.inner.use_auto_focus {
            // Doesn't hurt to call this even if not focusing.
            if let Err(e) = self.inner.device.lock().cancel_auto_focus() {
                warn!("Unexpected error while cancelling focus: {}", e);
            }
        }
    }

    /// Change the cadence. Takes effect on the next scheduled retry, not the
    /// current one. Zero is rejected and leaves the previous interval alone.
    pub fn set_interval(&self, interval_ms: u64) -> Result<()> {
        if interval_ms == 0 {
            return Err(QrcamError::invalid_argument(
                "Autofocus interval must be greater than 0",
            ));
        }
        self.inner.state.lock().interval = Duration::from_millis(interval_ms);
        Ok(())
    }

    /// Interval used by the next retry.
    pub fn interval_ms(&self) -> u64 {
        self.inner.state.lock().interval.as_millis() as u64
    }
}

impl Inner {
    fn trigger_focus(self: &Arc<Self>) {
        if !self.use_auto_focus {
            return;
        }
        {
            let mut state = self.state.lock();
            // A retry that was waiting its turn is superseded by this cycle.
            if let Some(token) = state.pending_retry.take() {
                token.cancel();
            }
            if state.stopped || state.focusing {
                return;
            }
            state.focusing = true;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            // stop() may have run between admission and this task first
            // polling; bail without touching the driver.
            {
                let mut state = inner.state.lock();
                if state.stopped {
                    state.focusing = false;
                    return;
                }
            }
            let device = Arc::clone(&inner.device);
            let outcome = tokio::task::spawn_blocking(move || device.lock().auto_focus()).await;
            match outcome {
                Ok(Ok(success)) => debug!("Focus cycle finished (achieved: {})", success),
                // Keep the cycle going; a flaky driver is not fatal.
                Ok(Err(e)) => warn!("Unexpected error while focusing: {}", e),
                Err(e) => warn!("Focus task aborted: {}", e),
            }
            inner.focus_done();
        });
    }

    fn focus_done(self: &Arc<Self>) {
        let interval;
        let token = {
            let mut state = self.state.lock();
            state.focusing = false;
            if state.stopped || state.pending_retry.is_some() {
                return;
            }
            let token = CancellationToken::new();
            state.pending_retry = Some(token.clone());
            interval = state.interval;
            token
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Scheduled focus retry cancelled");
                }
                _ = tokio::time::sleep(interval) => {
                    inner.state.lock().pending_retry = None;
                    inner.trigger_focus();
                }
            }
        });
    }
}
