use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::{
    backoff::{reconnect_backoff_ms, BackoffConfig},
    error::ChannelError,
    transport::InboundTransport,
};

/// Connect `transport`, retrying failures with exponential backoff + jitter.
///
/// `max_attempts = None` retries forever. On success returns the number of
/// attempts it took; when the budget runs out the last error is wrapped in
/// [`ChannelError::RetriesExhausted`], which callers treat as fatal.
pub async fn connect_with_retry<T>(
    transport: &mut T,
    backoff: &BackoffConfig,
    max_attempts: Option<u32>,
) -> Result<u32, ChannelError>
where
    T: InboundTransport + ?Sized,
{
    let max_attempts = max_attempts.unwrap_or(u32::MAX).max(1);
    let name = transport.name().to_string();
    let mut attempt: u32 = 0;

    loop {
        match transport.connect().await {
            Ok(()) => {
                info!(transport = %name, attempts = attempt + 1, "transport connected");
                return Ok(attempt + 1);
            }
            Err(e) => {
                attempt = attempt.saturating_add(1);
                if attempt >= max_attempts {
                    return Err(ChannelError::RetriesExhausted {
                        transport: name,
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                let delay_ms = reconnect_backoff_ms(attempt, backoff);
                warn!(
                    transport = %name,
                    attempt,
                    error = %e,
                    retry_after_ms = delay_ms,
                    "transport connect failed, retrying with backoff"
                );
                sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::types::TransportStatus;

    struct Flaky {
        failures_left: u32,
        attempts: u32,
        status: TransportStatus,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: failures,
                attempts: 0,
                status: TransportStatus::Disconnected,
            }
        }
    }

    #[async_trait]
    impl InboundTransport for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn connect(&mut self) -> Result<(), ChannelError> {
            self.attempts += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                self.status = TransportStatus::Error("refused".to_string());
                return Err(ChannelError::ConnectionFailed("refused".to_string()));
            }
            self.status = TransportStatus::Connected;
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), ChannelError> {
            self.status = TransportStatus::Disconnected;
            Ok(())
        }

        fn status(&self) -> TransportStatus {
            self.status.clone()
        }
    }

    fn fast() -> BackoffConfig {
        BackoffConfig {
            base_ms: 1,
            cap_ms: 4,
            jitter_ratio: 0.0,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let mut transport = Flaky::new(3);
        let attempts = connect_with_retry(&mut transport, &fast(), None)
            .await
            .expect("should connect");
        assert_eq!(attempts, 4);
        assert_eq!(transport.status(), TransportStatus::Connected);
    }

    #[tokio::test]
    async fn gives_up_when_budget_exhausted() {
        let mut transport = Flaky::new(10);
        let err = connect_with_retry(&mut transport, &fast(), Some(3))
            .await
            .expect_err("should give up");
        assert_eq!(transport.attempts, 3);
        match err {
            ChannelError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn zero_budget_still_tries_once() {
        let mut transport = Flaky::new(0);
        assert_eq!(
            connect_with_retry(&mut transport, &fast(), Some(0))
                .await
                .unwrap(),
            1
        );
    }
}
