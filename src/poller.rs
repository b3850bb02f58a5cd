use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Cadence and bound for one polling loop. Callers pick the interval; the
/// attempt bound keeps an unresponsive provider from pinning a loop forever.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

pub const GENERATION_POLL: PollPolicy = PollPolicy {
    interval: Duration::from_millis(2000),
    max_attempts: 150,
};

pub const MOCKUP_POLL: PollPolicy = PollPolicy {
    interval: Duration::from_millis(1000),
    max_attempts: 120,
};

#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    Pending,
    Processing,
    Completed(T),
    Failed(String),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("job reported failure: {0}")]
    Failed(String),
    #[error("status check failed: {0}")]
    Provider(String),
    #[error("no terminal status after {0} attempts")]
    TimedOut(u32),
}

/// Drives `check` until it reports a terminal status. A non-terminal status
/// schedules exactly one more check after the policy interval.
pub async fn run_poll<T, F, Fut>(policy: PollPolicy, mut check: F) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, String>>,
{
    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            sleep(policy.interval).await;
        }
        match check().await {
            Ok(PollStatus::Completed(value)) => return Ok(value),
            Ok(PollStatus::Failed(reason)) => return Err(PollError::Failed(reason)),
            Ok(PollStatus::Pending) | Ok(PollStatus::Processing) => {}
            Err(message) => return Err(PollError::Provider(message)),
        }
    }
    Err(PollError::TimedOut(policy.max_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn completes_after_intermediate_states() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = run_poll(fast(10), move || {
            let counter = counter.clone();
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => Ok(PollStatus::Pending),
                    1 => Ok(PollStatus::Processing),
                    _ => Ok(PollStatus::Completed("done".to_string())),
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failure_terminates_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = run_poll(fast(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(PollStatus::Failed("provider rejected task".to_string()))
            }
        })
        .await;
        assert!(matches!(result, Err(PollError::Failed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn times_out_after_max_attempts() {
        let result: Result<(), _> =
            run_poll(fast(4), || async { Ok(PollStatus::<()>::Processing) }).await;
        assert!(matches!(result, Err(PollError::TimedOut(4))));
    }

    #[tokio::test]
    async fn status_check_error_surfaces_as_provider_error() {
        let result: Result<(), _> =
            run_poll(fast(4), || async { Err("connection refused".to_string()) }).await;
        assert!(matches!(result, Err(PollError::Provider(_))));
    }
}
