use std::future::Future;
use std::time::Duration;

use crate::error::SessionError;

/// Run a provider/store call, bounded by `deadline` when one is configured.
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    operation: &'static str,
    fut: F,
) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| SessionError::Timeout(operation))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_expires() {
        let err = with_deadline(Some(Duration::from_millis(10)), "slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, SessionError>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, SessionError::Timeout("slow")));
    }

    #[tokio::test]
    async fn test_no_deadline_passes_through() {
        let value = with_deadline(None, "fast", async { Ok::<_, SessionError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
