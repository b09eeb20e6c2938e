//! Results service client
//!
//! Long-term store that takes ownership of work once it is terminal and
//! archived. Deposits are idempotent through the `exists` check: the
//! transfer daemon may deliver the same item more than once.

use skein_core::Work;

use crate::error::{ClientError, Result};
use crate::transport::{handle_json, retry, RetryPolicy, Transport};

/// HTTP client for the results service.
#[derive(Debug)]
pub struct Results {
    transport: Transport,
    policy: RetryPolicy,
}

impl Results {
    /// Creates a client over the candidate baseurls, in preference order.
    pub fn new(baseurls: Vec<String>) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(baseurls)?,
            policy: RetryPolicy::default(),
        })
    }

    /// Probes for a responsive baseurl without issuing an operation.
    pub async fn ping(&self) -> Result<()> {
        self.transport.base().await.map(|_| ())
    }

    /// Deposits terminal work into the results store.
    pub async fn deposit(&self, works: &[Work]) -> Result<()> {
        retry(&self.policy, || self.try_deposit(works)).await
    }

    async fn try_deposit(&self, works: &[Work]) -> Result<()> {
        let response = self
            .transport
            .send(|client, base| client.post(format!("{base}/results")).json(&works))
            .await?;
        crate::transport::handle_empty(response).await
    }

    /// Fetches a stored result by pipeline and id.
    pub async fn get(&self, pipeline: &str, id: &str) -> Result<Work> {
        retry(&self.policy, || self.try_get(pipeline, id)).await
    }

    async fn try_get(&self, pipeline: &str, id: &str) -> Result<Work> {
        let response = self
            .transport
            .send(|client, base| client.get(format!("{base}/results/{pipeline}/{id}")))
            .await?;
        handle_json(response).await
    }

    /// True when the result is already stored. Used for the duplicate
    /// check before re-depositing.
    pub async fn exists(&self, pipeline: &str, id: &str) -> Result<bool> {
        match self.get(pipeline, id).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl Results {
    /// Convenience constructor failing when the workspace declares no
    /// results baseurls.
    pub fn from_baseurls(baseurls: Vec<String>) -> Result<Self> {
        if baseurls.is_empty() {
            return Err(ClientError::NotConfigured("results"));
        }
        Self::new(baseurls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_baseurls_rejected() {
        let err = Results::from_baseurls(vec![]).unwrap_err();
        assert!(matches!(err, ClientError::NotConfigured("results")));
    }
}
