//! Event-driven readiness waits.
//!
//! A watch subscription is driven on its own task. The first event that
//! satisfies the predicate resolves a one-shot channel and ends the task,
//! which drops (and thereby cancels) the subscription. The waiting side
//! bounds the wait and aborts the task on every exit path, so no
//! subscription outlives its wait.

use std::fmt::Display;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use podcall_common::OrchestratorError;

/// Wait for the first watch event matching `ready`.
///
/// # Arguments
///
/// * `resource` - Human-readable name of the watched object (for errors and logs)
/// * `events` - The watch subscription
/// * `timeout` - Upper bound on the wait
/// * `ready` - Predicate identifying the awaited state
///
/// # Errors
///
/// Returns [`OrchestratorError::ReadinessTimeout`] if no matching event
/// arrives in time, or a deploy error if the subscription ends first.
pub async fn await_first<T, E, S, F>(
    resource: &str,
    events: S,
    timeout: Duration,
    ready: F,
) -> Result<T, OrchestratorError>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    let (signal, resolved) = oneshot::channel();
    let watched = resource.to_string();

    let subscription = tokio::spawn(async move {
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(object) if ready(&object) => {
                    let _ = signal.send(object);
                    return;
                }
                Ok(_) => {}
                Err(e) => warn!(resource = %watched, error = %e, "Watch event error"),
            }
        }
        debug!(resource = %watched, "Watch stream ended");
    });

    let outcome = tokio::time::timeout(timeout, resolved).await;
    subscription.abort();

    match outcome {
        Ok(Ok(object)) => {
            debug!(resource, "Readiness signal received");
            Ok(object)
        }
        Ok(Err(_)) => Err(OrchestratorError::deploy(format!(
            "Watch on {resource} ended before it became ready"
        ))),
        Err(_) => Err(OrchestratorError::readiness_timeout(resource, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::channel::mpsc;
    use futures::stream;

    #[tokio::test]
    async fn test_resolves_on_first_match() {
        let events = stream::iter(vec![
            Ok::<_, String>("Pending"),
            Ok("ContainerCreating"),
            Ok("Running"),
            Ok("Running"),
        ]);

        let phase = await_first("pod agent", events, Duration::from_secs(1), |p| {
            *p == "Running"
        })
        .await
        .unwrap();

        assert_eq!(phase, "Running");
    }

    #[tokio::test]
    async fn test_errors_are_skipped() {
        let events = stream::iter(vec![Err("connection reset".to_string()), Ok(3_u32)]);

        let value = await_first("svc", events, Duration::from_secs(1), |v| *v == 3)
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_timeout() {
        let events = stream::pending::<Result<&str, String>>();

        let result = await_first("pod slow", events, Duration::from_millis(50), |_| true).await;

        assert!(matches!(
            result,
            Err(OrchestratorError::ReadinessTimeout { waited_ms: 50, .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_end_is_deploy_error() {
        let events = stream::iter(vec![Ok::<_, String>("Pending"), Ok("Failed")]);

        let result = await_first("pod broken", events, Duration::from_secs(1), |p| {
            *p == "Running"
        })
        .await;

        assert!(matches!(result, Err(OrchestratorError::Deploy { .. })));
    }

    #[tokio::test]
    async fn test_subscription_cancelled_after_resolution() {
        let (tx, rx) = mpsc::unbounded::<Result<&str, String>>();
        tx.unbounded_send(Ok("Running")).unwrap();

        await_first("pod agent", rx, Duration::from_secs(1), |p| *p == "Running")
            .await
            .unwrap();

        // The receiving side was dropped together with the subscription task.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_subscription_cancelled_after_timeout() {
        let (tx, rx) = mpsc::unbounded::<Result<&str, String>>();
        tx.unbounded_send(Ok("Pending")).unwrap();

        let result = await_first("pod agent", rx, Duration::from_millis(30), |p| {
            *p == "Running"
        })
        .await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tx.is_closed());
    }
}
