//! Admission control and deadline budgets for bulk device transfers
//!
//! This crate provides the two primitives every multi-file transfer in `afcx` is built on:
//!
//! 1. **Transfer window** - caps the number of simultaneously outstanding transfers
//! 2. **Deadline budget** - a monotonic timer checked between items of one logical operation
//!
//! # Transfer Window
//!
//! Device storage does not benefit from deep parallelism, so both the pull and push paths feed
//! their per-file tasks through a [`Window`] of fixed width:
//!
//! ```rust,no_run
//! use throttle::Window;
//!
//! # async fn example() {
//! let mut window = Window::new(8);
//! for i in 0..100u64 {
//!     // waits for a free slot once 8 tasks are outstanding
//!     for settled in window.admit(async move { i * 2 }).await {
//!         let _ = settled;
//!     }
//! }
//! // wait for whatever is still in flight
//! let _rest = window.drain().await;
//! # }
//! ```
//!
//! Callers that need to decide something between waiting for a slot and starting the next task
//! (like checking a [`Budget`]) use [`Window::make_room`] followed by [`Window::spawn`].
//!
//! Eviction is triggered by any completion, refill happens right after eviction and the window
//! terminates once both the input and the window are empty. Results are handed back untouched:
//! the window never decides whether a failed task is fatal.
//!
//! # Deadline Budget
//!
//! A [`Budget`] is started once per operation and consulted after each completed item:
//!
//! ```rust,no_run
//! use throttle::Budget;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), throttle::DeadlineExceeded> {
//! let budget = Budget::start(Duration::from_secs(240));
//! // ... transfer one item ...
//! budget.check()?;
//! // the next item may run for whatever is left, but never less than a minute
//! let _ceiling = budget.item_timeout(Duration::from_secs(60));
//! # Ok(())
//! # }
//! ```
//!
//! The budget is never consulted preemptively: an in-flight item is not cancelled because the
//! budget ran out, only the admission of the next item is refused.
//!
//! # Clock
//!
//! Both primitives use the tokio clock, so tests can drive them with a paused runtime.

mod budget;
mod window;

pub use budget::{Budget, DeadlineExceeded};
pub use window::{Window, run_bounded};
