//! Transient-failure handling for embedding calls.
//!
//! The remote provider runs every HTTP round through [`with_retry`]: errors
//! classified as transient get a bounded number of re-attempts on a doubling
//! delay schedule, everything else surfaces immediately. Delays carry a
//! random skew so parallel workers that fail together do not retry in
//! lockstep.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use super::EmbeddingError;

/// Bounded doubling-delay schedule.
///
/// Yields `attempts` delays starting at `first_delay`, doubling up to `cap`,
/// each widened by a random skew of up to a quarter of the base delay.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
  delay_ms: u64,
  cap_ms: u64,
  attempts_left: u32,
}

impl RetrySchedule {
  pub fn new(attempts: u32, first_delay: Duration, cap: Duration) -> Self {
    Self {
      delay_ms: first_delay.as_millis().max(1) as u64,
      cap_ms: cap.as_millis().max(1) as u64,
      attempts_left: attempts,
    }
  }

  /// The next delay to sleep before re-attempting, or `None` once the
  /// attempt budget is spent.
  pub fn next_delay(&mut self) -> Option<Duration> {
    if self.attempts_left == 0 {
      return None;
    }
    self.attempts_left -= 1;

    let base = self.delay_ms;
    self.delay_ms = self.delay_ms.saturating_mul(2).min(self.cap_ms);

    Some(Duration::from_millis(base + random_below(base / 4 + 1)))
  }
}

impl Default for RetrySchedule {
  fn default() -> Self {
    Self::new(4, Duration::from_millis(250), Duration::from_secs(10))
  }
}

/// Sample a value in `[0, span)` from the OS-seeded hasher state.
fn random_below(span: u64) -> u64 {
  use std::collections::hash_map::RandomState;
  use std::hash::{BuildHasher, Hasher};

  if span <= 1 {
    return 0;
  }
  let mut hasher = RandomState::new().build_hasher();
  hasher.write_u64(span);
  hasher.finish() % span
}

/// Run `op`, re-attempting transient failures per the default schedule.
pub async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, EmbeddingError>
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = Result<T, EmbeddingError>>,
{
  let mut schedule = RetrySchedule::default();

  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_transient() => match schedule.next_delay() {
        Some(delay) => {
          debug!(op = op_name, delay_ms = delay.as_millis() as u64, err = %e, "Re-attempting after transient failure");
          sleep(delay).await;
        }
        None => {
          warn!(op = op_name, err = %e, "Attempt budget spent");
          return Err(e);
        }
      },
      Err(e) => return Err(e),
    }
  }
}
