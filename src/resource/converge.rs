//! Convergence primitives
//!
//! The control plane applies creates, deletes and captures asynchronously.
//! Adapters reach a stable state through two generic loops:
//!
//! - [`wait_until`] polls a fetch closure until a predicate holds or the
//!   deadline passes, returning the last observed value either way
//! - [`retry_on_conflict`] repeats an action while the provider reports the
//!   resource as busy
//!
//! Both suspend the calling task between attempts; neither spawns work.

use crate::error::{CloudError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Polling interval and overall deadline for one waiting operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceBudget {
    pub interval: Duration,
    pub deadline: Duration,
}

impl ConvergenceBudget {
    pub const fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    pub const fn from_secs(interval_secs: u64, deadline_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(deadline_secs),
        )
    }
}

const MINUTE: u64 = 60;

/// Named budgets used by the adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait for a pending volume to settle before deleting it
    pub volume_settle: ConvergenceBudget,
    pub volume_delete: ConvergenceBudget,
    pub volume_create: ConvergenceBudget,
    /// Wait for the source server to finish any in-flight snapshot
    pub capture_precondition: ConvergenceBudget,
    /// Wait for a captured image to become visible
    pub capture_appear: ConvergenceBudget,
    pub image_delete_conflict: ConvergenceBudget,
    pub image_delete: ConvergenceBudget,
    pub address_release_conflict: ConvergenceBudget,
    pub address_release: ConvergenceBudget,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            volume_settle: ConvergenceBudget::from_secs(15, 10 * MINUTE),
            volume_delete: ConvergenceBudget::from_secs(15, 10 * MINUTE),
            volume_create: ConvergenceBudget::from_secs(15, 10 * MINUTE),
            capture_precondition: ConvergenceBudget::from_secs(15, 10 * MINUTE),
            capture_appear: ConvergenceBudget::from_secs(15, 20 * MINUTE),
            image_delete_conflict: ConvergenceBudget::from_secs(MINUTE, 60 * MINUTE),
            image_delete: ConvergenceBudget::from_secs(15, 10 * MINUTE),
            address_release_conflict: ConvergenceBudget::from_secs(MINUTE, 60 * MINUTE),
            address_release: ConvergenceBudget::from_secs(15, 10 * MINUTE),
        }
    }
}

impl Timeouts {
    /// Every budget set to the same value (handy for tests and dry runs)
    pub fn uniform(budget: ConvergenceBudget) -> Self {
        Self {
            volume_settle: budget,
            volume_delete: budget,
            volume_create: budget,
            capture_precondition: budget,
            capture_appear: budget,
            image_delete_conflict: budget,
            image_delete: budget,
            address_release_conflict: budget,
            address_release: budget,
        }
    }
}

/// Poll `fetch` until `predicate` holds or the deadline elapses.
///
/// Returns the last successfully observed value. Reaching the deadline is
/// not an error: callers inspect the returned value. A failed fetch counts as
/// "no new information" for that round and is only logged.
pub async fn wait_until<T, F, Fut, P>(mut fetch: F, predicate: P, budget: ConvergenceBudget) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
    P: Fn(Option<&T>) -> bool,
{
    let started = Instant::now();
    let mut last: Option<T> = None;
    let mut round = 0u32;

    loop {
        round += 1;
        match fetch().await {
            Ok(observed) => {
                last = observed;
                if predicate(last.as_ref()) {
                    tracing::debug!("Converged after {} round(s)", round);
                    return last;
                }
            }
            Err(e) => tracing::debug!("Ignoring fetch error in round {}: {}", round, e),
        }

        if started.elapsed() >= budget.deadline {
            tracing::debug!(
                "Gave up waiting after {} round(s) ({:?})",
                round,
                budget.deadline
            );
            return last;
        }
        sleep(budget.interval).await;
    }
}

/// Run `action`, retrying while it fails with a conflict.
///
/// Non-conflict errors propagate on first occurrence. Once the deadline has
/// elapsed the most recent conflict error is returned.
pub async fn retry_on_conflict<T, F, Fut, C>(mut action: F, is_conflict: C, budget: ConvergenceBudget) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&CloudError) -> bool,
{
    let started = Instant::now();

    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(e) if is_conflict(&e) => {
                if started.elapsed() >= budget.deadline {
                    return Err(e);
                }
                tracing::debug!("Resource busy, retrying in {:?}: {}", budget.interval, e);
                sleep(budget.interval).await;
            }
            Err(e) => return Err(e),
        }
    }
}
