//! HTTP transport
//!
//! Connection-pooled client over a list of candidate baseurls for one
//! service. Selection probes a bounded HEAD against the health endpoint
//! and caches the first responsive base; a failed request invalidates the
//! cache so the next attempt re-probes.
//!
//! Retries are a plain policy value injected at each call site rather
//! than an annotation: transient failures back off exponentially, final
//! (4xx) errors surface immediately.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Socket connect timeout for every request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Socket read timeout for every request.
const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on a single health probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Exponential backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub factor: u32,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(32),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry (1-based attempt that just failed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.initial.saturating_mul(self.factor.saturating_pow(exp));
        delay.min(self.cap)
    }
}

/// Runs `op` under the policy, retrying transient failures with backoff.
pub async fn retry<T, Fut, F>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    attempt,
                    max = policy.max_attempts,
                    "transient failure, retrying in {delay:?}: {err}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// A pooled HTTP client bound to the candidate baseurls of one service.
#[derive(Debug)]
pub struct Transport {
    client: Client,
    baseurls: Vec<String>,
    /// Index of the last baseurl that answered a health probe.
    selected: Mutex<Option<usize>>,
}

impl Transport {
    /// Creates a transport over the candidate baseurls, in preference
    /// order. Trailing slashes are trimmed.
    pub fn new(baseurls: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            baseurls: baseurls
                .into_iter()
                .map(|url| url.trim_end_matches('/').to_string())
                .collect(),
            selected: Mutex::new(None),
        })
    }

    /// The candidate baseurls.
    pub fn baseurls(&self) -> &[String] {
        &self.baseurls
    }

    /// The first responsive baseurl, probing with `HEAD {base}/health`
    /// when nothing is cached.
    pub async fn base(&self) -> Result<String> {
        if let Some(index) = *self.selected.lock().expect("selection lock") {
            return Ok(self.baseurls[index].clone());
        }
        for (index, base) in self.baseurls.iter().enumerate() {
            let probe = self
                .client
                .head(format!("{base}/health"))
                .timeout(PROBE_TIMEOUT)
                .send()
                .await;
            match probe {
                Ok(response) if !response.status().is_server_error() => {
                    debug!(base, "selected responsive baseurl");
                    *self.selected.lock().expect("selection lock") = Some(index);
                    return Ok(base.clone());
                }
                Ok(response) => {
                    warn!(base, status = %response.status(), "health probe rejected");
                }
                Err(err) => {
                    warn!(base, "health probe failed: {err}");
                }
            }
        }
        Err(ClientError::NoBackendAvailable(self.baseurls.clone()))
    }

    /// Drops the cached selection so the next request re-probes.
    pub fn invalidate(&self) {
        *self.selected.lock().expect("selection lock") = None;
    }

    /// Sends one request built against the selected base. Send failures
    /// invalidate the selection before surfacing.
    pub async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: FnOnce(&Client, &str) -> RequestBuilder,
    {
        let base = self.base().await?;
        match build(&self.client, &base).send().await {
            Ok(response) => Ok(response),
            Err(err) => {
                self.invalidate();
                Err(err.into())
            }
        }
    }
}

/// Checks the status code and deserializes a JSON body.
pub async fn handle_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), message));
    }
    response
        .json()
        .await
        .map_err(|err| ClientError::ParseError(format!("invalid JSON response: {err}")))
}

/// Checks the status code of a bodyless response.
pub async fn handle_empty(response: Response) -> Result<()> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), message));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        // capped
        assert_eq!(policy.backoff(7), Duration::from_secs(32));
        assert_eq!(policy.backoff(30), Duration::from_secs(32));
    }

    #[test]
    fn test_transport_trims_trailing_slash() {
        let transport = Transport::new(vec!["http://localhost:8004/".to_string()]).unwrap();
        assert_eq!(transport.baseurls(), ["http://localhost:8004"]);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_final_error() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<()> = retry(&policy, || {
            calls += 1;
            async { Err(ClientError::api_error(400, "bad request")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts_on_transient_error() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial: Duration::from_millis(1),
            factor: 2,
            cap: Duration::from_millis(4),
        };
        let mut calls = 0;
        let result: Result<()> = retry(&policy, || {
            calls += 1;
            async { Err(ClientError::api_error(503, "busy")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial: Duration::from_millis(1),
            factor: 2,
            cap: Duration::from_millis(4),
        };
        let mut calls = 0;
        let result = retry(&policy, || {
            calls += 1;
            let outcome = if calls < 3 {
                Err(ClientError::api_error(500, "boom"))
            } else {
                Ok(42)
            };
            async move { outcome }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }
}
