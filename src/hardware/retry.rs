// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bounded reconnect-and-retry wrapper around a hardware session

use async_trait::async_trait;
use futures::future::BoxFuture;
use log::{error, warn};
use std::time::Duration;

use super::{
    Acquisition, AcquisitionRequest, AnalogOutput, DeviceLimits, HardwareError, HardwareSession,
};

/// Retries operations failing with [`HardwareError::Communication`]
///
/// After a communication error the link is reopened with
/// [`HardwareSession::reconnect`] and the operation is attempted again, at most
/// `max_retries` more times. Other errors are returned immediately.
pub struct RetryingSession<S> {
    inner: S,
    max_retries: u32,
    retry_delay: Duration,
}

impl<S: HardwareSession> RetryingSession<S> {
    pub fn new(inner: S, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            retry_delay,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn with_retry<T, F>(&mut self, operation: &str, mut f: F) -> Result<T, HardwareError>
    where
        T: Send,
        F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T, HardwareError>> + Send,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match f(&mut self.inner).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_recoverable() => e,
                Err(e) => return Err(e),
            };

            if attempt > self.max_retries {
                error!(
                    "{}: {} on channel {} after {} attempts",
                    operation,
                    error,
                    self.inner.channel(),
                    attempt
                );
                return Err(HardwareError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            warn!(
                "{} on channel {} failed ({}), reconnecting (attempt {}/{})",
                operation,
                self.inner.channel(),
                error,
                attempt,
                self.max_retries
            );
            tokio::time::sleep(self.retry_delay).await;
            if let Err(e) = self.inner.reconnect().await {
                warn!("Reconnect of channel {} failed: {}", self.inner.channel(), e);
            }
        }
    }
}

#[async_trait]
impl<S: HardwareSession> HardwareSession for RetryingSession<S> {
    fn channel(&self) -> &str {
        self.inner.channel()
    }

    async fn power_on(&mut self) -> Result<(), HardwareError> {
        self.with_retry("power_on", |s| s.power_on()).await
    }

    async fn power_off(&mut self) -> Result<(), HardwareError> {
        self.with_retry("power_off", |s| s.power_off()).await
    }

    async fn generate(&mut self, output: AnalogOutput) -> Result<(), HardwareError> {
        self.with_retry("generate", move |s| s.generate(output)).await
    }

    async fn acquire(
        &mut self,
        request: &AcquisitionRequest,
    ) -> Result<Acquisition, HardwareError> {
        let request = request.clone();
        self.with_retry("acquire", move |s| {
            let request = request.clone();
            Box::pin(async move { s.acquire(&request).await })
        })
        .await
    }

    fn limits(&self) -> DeviceLimits {
        self.inner.limits()
    }

    async fn reconnect(&mut self) -> Result<(), HardwareError> {
        self.inner.reconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::hardware::SimulatorConfig;
    use crate::hardware::{SessionEvent, SimulatedSession};

    fn wrapped(max_retries: u32) -> RetryingSession<SimulatedSession> {
        let session = SimulatedSession::new("CHX", &SimulatorConfig::default());
        RetryingSession::new(session, max_retries, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let mut session = wrapped(3);
        session.inner().inject_failures(2);

        session.power_on().await.unwrap();

        let events = session.inner().events();
        let reconnects = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Reconnect))
            .count();
        assert_eq!(reconnects, 2);
        assert_eq!(events.last(), Some(&SessionEvent::PowerOn));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let mut session = wrapped(2);
        session.inner().inject_failures(10);

        let err = session.power_off().await.unwrap_err();
        match err {
            HardwareError::RetriesExhausted {
                operation,
                attempts,
                ..
            } => {
                assert_eq!(operation, "power_off");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_retried() {
        let mut session = wrapped(3);
        let request = AcquisitionRequest {
            channels: vec![0],
            sample_rate: 1000.0,
            samples: 0,
            range: 5.0,
        };
        let err = session.acquire(&request).await.unwrap_err();
        assert!(matches!(err, HardwareError::InvalidRequest(_)));
        assert!(!session
            .inner()
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Reconnect)));
    }
}
