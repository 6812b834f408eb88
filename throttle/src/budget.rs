use std::time::Duration;

use tokio::time::Instant;

/// The shared budget of an operation ran out before all of its items were processed.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("Timed out after {} ms", .elapsed.as_millis())]
pub struct DeadlineExceeded {
    pub elapsed: Duration,
}

/// Deadline shared by all items of one logical operation.
///
/// The origin is captured once when the budget is started and the total is never extended.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    origin: Instant,
    total: Duration,
}

impl Budget {
    #[must_use]
    pub fn start(total: Duration) -> Self {
        Self {
            origin: Instant::now(),
            total,
        }
    }

    #[must_use]
    pub fn total(&self) -> Duration {
        self.total
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Milliseconds left, negative once the budget is overdrawn.
    #[must_use]
    pub fn remaining_ms(&self) -> i128 {
        self.total.as_millis() as i128 - self.elapsed().as_millis() as i128
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.elapsed())
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.elapsed() > self.total
    }

    /// Fails once more time has elapsed than the budget allows.
    pub fn check(&self) -> Result<(), DeadlineExceeded> {
        let elapsed = self.elapsed();
        if elapsed > self.total {
            tracing::debug!(
                "budget of {}ms exhausted after {}ms",
                self.total.as_millis(),
                elapsed.as_millis()
            );
            return Err(DeadlineExceeded { elapsed });
        }
        Ok(())
    }

    /// Ceiling for a single item: what is left of the budget, but never less than `floor`.
    #[must_use]
    pub fn item_timeout(&self, floor: Duration) -> Duration {
        std::cmp::max(self.remaining(), floor)
    }
}
