use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use rocket::tokio::time::sleep;

use crate::error::{Error, Result};

/// How long a transaction keeps being retried after transient failures
/// before the last failure is handed back to the caller.
pub const TRANSACTION_RETRY_BUDGET: Duration = Duration::from_secs(10);

/// Upper bound on the pause between two attempts.
const MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Run a transaction, retrying it while it fails with a transient
/// transaction error (e.g. a write conflict with a concurrent transaction).
///
/// Each attempt must start its own MongoDB session; an attempt that errors
/// drops its session, which aborts the transaction.
pub async fn retry_transient<T, F, Fut>(attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_while(Error::is_transient, TRANSACTION_RETRY_BUDGET, attempt).await
}

/// Retry `attempt` while it fails with a retryable error and `budget` has not
/// run out, backing off a random, growing amount between attempts.
async fn retry_while<T, F, Fut>(
    retryable: impl Fn(&Error) -> bool,
    budget: Duration,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut backoff = Duration::from_millis(2);
    let mut attempts = 1;
    loop {
        match attempt().await {
            Err(err) if retryable(&err) && started.elapsed() < budget => {
                debug!("Transaction attempt {attempts} lost a race, retrying: {err}");
                let pause = rand::thread_rng().gen_range(Duration::ZERO..=backoff);
                sleep(pause).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                attempts += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn is_conflict(err: &Error) -> bool {
        matches!(err, Error::Conflict(_))
    }

    #[rocket::async_test]
    async fn non_transient_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<()> = retry_transient(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Conflict("nope".to_string()))
        })
        .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[rocket::async_test]
    async fn success_is_returned_immediately() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result = retry_transient(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[rocket::async_test]
    async fn keeps_retrying_a_busy_transaction_until_it_succeeds() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result = retry_while(is_conflict, Duration::from_secs(10), || async move {
            match counter.fetch_add(1, Ordering::SeqCst) {
                n if n < 12 => Err(Error::Conflict("busy".to_string())),
                _ => Ok("committed"),
            }
        })
        .await;
        assert_eq!(result.unwrap(), "committed");
        assert_eq!(calls.load(Ordering::SeqCst), 13);
    }

    #[rocket::async_test]
    async fn gives_up_once_the_budget_is_spent() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let started = Instant::now();
        let result: Result<()> = retry_while(is_conflict, Duration::from_millis(50), || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Conflict("busy".to_string()))
        })
        .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert!(calls.load(Ordering::SeqCst) > 1);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
