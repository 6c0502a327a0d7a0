//! Bounded retry of read-modify-write cycles that lose an optimistic concurrency race
use backon::{BackoffBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tracing::debug;

use crate::{Error, Result};

/// Delays between attempts of a cycle that ended in a conflict
///
/// The number of attempts is always bounded: once the delays run out, the
/// last conflict is surfaced as [`Error::RetriesExhausted`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ConflictBackoff {
    /// Wait the listed delays in order, one per retry
    #[serde(rename_all = "camelCase")]
    Fixed { delays_ms: Vec<u64> },
    /// Exponential delays with jitter, at most `max_times` retries
    #[serde(rename_all = "camelCase")]
    Exponential {
        min_delay_ms: u64,
        max_delay_ms: u64,
        max_times: usize,
    },
}

impl Default for ConflictBackoff {
    /// Five attempts, 10ms apart
    fn default() -> Self {
        ConflictBackoff::Fixed { delays_ms: vec![10; 4] }
    }
}

impl ConflictBackoff {
    /// `attempts` attempts with no delay between them
    pub fn immediate(attempts: usize) -> Self {
        ConflictBackoff::Fixed {
            delays_ms: vec![0; attempts.saturating_sub(1)],
        }
    }

    fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match self {
            ConflictBackoff::Fixed { delays_ms } => {
                Box::new(delays_ms.clone().into_iter().map(Duration::from_millis))
            }
            ConflictBackoff::Exponential {
                min_delay_ms,
                max_delay_ms,
                max_times,
            } => Box::new(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(*min_delay_ms))
                    .with_max_delay(Duration::from_millis(*max_delay_ms))
                    .with_max_times(*max_times)
                    .with_jitter()
                    .build(),
            ),
        }
    }
}

/// Run `cycle` until it does not fail with a conflict or the backoff runs out
///
/// `cycle` must redo the whole lookup, merge and submit sequence, since a
/// conflict means what it read is stale. Errors other than conflicts are
/// returned right away.
pub async fn retry_on_conflict<T, F, Fut>(backoff: &ConflictBackoff, mut cycle: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delays = backoff.delays();
    let mut attempts = 0;
    loop {
        attempts += 1;
        match cycle().await {
            Err(err) if err.is_conflict() => match delays.next() {
                Some(delay) => {
                    debug!(attempts, ?delay, error = %err, "conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(Error::RetriesExhausted {
                        attempts,
                        source: Box::new(err),
                    })
                }
            },
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrp_client::error::api_error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn conflict() -> Error {
        Error::store("update statefulset", "g1-v1")(api_error(409, "Conflict", "stale"))
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = &AtomicUsize::new(0);
        let result = retry_on_conflict(&ConflictBackoff::immediate(5), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        let calls = &AtomicUsize::new(0);
        let err = retry_on_conflict(&ConflictBackoff::immediate(3), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(conflict())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
        assert!(err.is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = &AtomicUsize::new(0);
        let err = retry_on_conflict(&ConflictBackoff::default(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::NotFound {
                identity: "g1-v1".into(),
            })
        })
        .await
        .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_backoff_is_bounded() {
        let backoff = ConflictBackoff::Exponential {
            min_delay_ms: 10,
            max_delay_ms: 100,
            max_times: 4,
        };
        let calls = &AtomicUsize::new(0);
        let err = retry_on_conflict(&backoff, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(conflict())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 5, .. }));
    }

    #[test]
    fn default_is_five_attempts() {
        let ConflictBackoff::Fixed { delays_ms } = ConflictBackoff::default() else {
            panic!("default backoff is fixed");
        };
        assert_eq!(delays_ms.len() + 1, 5);
    }
}
