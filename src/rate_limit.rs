//! Per-provider request rate limiting.
//!
//! A [`RateLimiter`] grants at most `requests_per_window` approvals within
//! any rolling `window`. Grants are remembered in a deque of timestamps;
//! when it is full, the caller sleeps until the oldest grant leaves the
//! window.
//!
//! Waiters queue on a `tokio::sync::Mutex`, which hands the lock out in
//! arrival order, so slots are granted FIFO. Waiting never blocks the
//! runtime thread, and a cancelled token ends the wait immediately.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use translatex_core::error::{Result, TranslateError};

/// Provider request budgets, in requests per minute.
const PROVIDER_RPM: &[(&str, u32)] = &[
    ("openai", 60),
    ("openrouter", 15),
    ("groq", 10),
    ("gemini", 12),
];

const DEFAULT_RPM: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub requests_per_window: u32,
    pub window: Duration,
}

impl RateBudget {
    pub fn new(requests_per_window: u32, window: Duration) -> Self {
        Self {
            requests_per_window: requests_per_window.max(1),
            window,
        }
    }

    /// Budget for a provider from the static table.
    pub fn for_provider(provider: &str) -> Self {
        let rpm = PROVIDER_RPM
            .iter()
            .find(|(name, _)| *name == provider)
            .map(|(_, rpm)| *rpm)
            .unwrap_or(DEFAULT_RPM);
        Self::new(rpm, Duration::from_secs(60))
    }
}

pub struct RateLimiter {
    budget: RateBudget,
    granted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(budget: RateBudget) -> Self {
        Self {
            budget,
            granted: Mutex::new(VecDeque::with_capacity(budget.requests_per_window as usize)),
        }
    }

    pub fn budget(&self) -> RateBudget {
        self.budget
    }

    /// Wait for a dispatch slot.
    ///
    /// Returns [`TranslateError::Cancelled`] if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        let mut granted = tokio::select! {
            guard = self.granted.lock() => guard,
            _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
        };

        loop {
            let now = Instant::now();
            while granted
                .front()
                .is_some_and(|t| now.duration_since(*t) >= self.budget.window)
            {
                granted.pop_front();
            }

            if granted.len() < self.budget.requests_per_window as usize {
                granted.push_back(now);
                return Ok(());
            }

            let Some(oldest) = granted.front().copied() else {
                continue;
            };
            tokio::select! {
                _ = tokio::time::sleep_until(oldest + self.budget.window) => {}
                _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
            }
        }
    }

    /// Approvals granted within the current window.
    pub async fn used_in_window(&self) -> usize {
        let mut granted = self.granted.lock().await;
        let now = Instant::now();
        while granted
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.budget.window)
        {
            granted.pop_front();
        }
        granted.len()
    }
}
