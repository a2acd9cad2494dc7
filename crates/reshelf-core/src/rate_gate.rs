//! Process-wide admission control for outbound remote calls.
//!
//! The gate keeps a sliding-window log of the last `limit` admission
//! instants. A caller is admitted once the oldest entry in a full log has
//! aged out of the window, so no rolling window ever holds more than
//! `limit` admissions regardless of how many tasks are waiting.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Error, Result};

/// Shared rate gate. Clones share the same window.
#[derive(Debug, Clone)]
pub struct RateGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    limit: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateGate {
    pub fn new(limit: NonZeroU32, window: Duration) -> Self {
        let limit = limit.get() as usize;
        Self {
            inner: Arc::new(GateInner {
                limit,
                window,
                admitted: Mutex::new(VecDeque::with_capacity(limit)),
            }),
        }
    }

    /// At most `limit` admissions per rolling second
    pub fn per_second(limit: NonZeroU32) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Wait until the call may proceed.
    ///
    /// Never rejects; returns `Error::Cancelled` if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let ready_at = match self.try_admit(Instant::now()) {
                None => return Ok(()),
                Some(at) => at,
            };

            let wait = ready_at.saturating_duration_since(Instant::now());
            trace!(wait_ms = wait.as_millis() as u64, "rate gate full");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep_until(ready_at) => {}
            }
        }
    }

    /// Admit at `now` if the window has room, otherwise return the instant
    /// at which the oldest admission leaves the window.
    fn try_admit(&self, now: Instant) -> Option<Instant> {
        let inner = &self.inner;
        let mut log = inner
            .admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while let Some(&oldest) = log.front() {
            if now.saturating_duration_since(oldest) >= inner.window {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() < inner.limit {
            log.push_back(now);
            None
        } else {
            log.front().map(|&oldest| oldest + inner.window)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(limit: u32) -> RateGate {
        RateGate::per_second(NonZeroU32::new(limit).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_limit_is_immediate() {
        let gate = gate(4);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..4 {
            gate.acquire(&cancel).await.unwrap();
        }
        assert_eq!(Instant::now(), start);

        gate.acquire(&cancel).await.unwrap();
        assert_eq!(Instant::now() - start, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_window_exceeds_limit_under_contention() {
        let limit = 8;
        let gate = gate(limit);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let gate = gate.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                gate.acquire(&cancel).await.unwrap();
                Instant::now()
            }));
        }

        let mut admitted = Vec::new();
        for h in handles {
            admitted.push(h.await.unwrap());
        }
        admitted.sort();

        // Any limit+1 consecutive admissions span at least one full window
        let limit = limit as usize;
        for pair in admitted.windows(limit + 1) {
            assert!(pair[limit] - pair[0] >= Duration::from_secs(1));
        }

        // 100 admissions at 8/s need at least 12 full windows
        let elapsed = *admitted.last().unwrap() - start;
        assert!(elapsed >= Duration::from_secs(12));
        assert!(elapsed < Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unblocks_waiters() {
        let gate = gate(1);
        let cancel = CancellationToken::new();
        gate.acquire(&cancel).await.unwrap();

        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.acquire(&cancel).await })
        };

        tokio::task::yield_now().await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_token_rejects_before_admission() {
        let gate = gate(10);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(gate.acquire(&cancel).await.unwrap_err().is_cancelled());
    }
}
