//! Bucket service client
//!
//! Deposit, withdraw, update and delete work against the queue service.
//! The queue is the authoritative store while work is pending or active;
//! every mutation in the system goes through these four operations.

use skein_core::dto::{ViewQuery, WithdrawFilter};
use skein_core::Work;

use crate::error::Result;
use crate::transport::{handle_empty, handle_json, retry, RetryPolicy, Transport};

/// HTTP client for the bucket service.
#[derive(Debug)]
pub struct Buckets {
    transport: Transport,
    policy: RetryPolicy,
}

impl Buckets {
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

    /// Deposits work items into the queue, returning their assigned ids.
    pub async fn deposit(&self, works: &[Work]) -> Result<Vec<String>> {
        retry(&self.policy, || self.try_deposit(works)).await
    }

    async fn try_deposit(&self, works: &[Work]) -> Result<Vec<String>> {
        let response = self
            .transport
            .send(|client, base| client.post(format!("{base}/work")).json(&works))
            .await?;
        handle_json(response).await
    }

    /// Withdraws one queued work item for the pipeline, or `None` when the
    /// queue has nothing matching the filter (204).
    ///
    /// The dequeue is atomic on the service side: at most one caller ever
    /// receives a given item.
    pub async fn withdraw(&self, pipeline: &str, filter: &WithdrawFilter) -> Result<Option<Work>> {
        retry(&self.policy, || self.try_withdraw(pipeline, filter)).await
    }

    async fn try_withdraw(&self, pipeline: &str, filter: &WithdrawFilter) -> Result<Option<Work>> {
        let response = self
            .transport
            .send(|client, base| {
                let mut request = client
                    .get(format!("{base}/work/withdraw"))
                    .query(&[("pipeline", pipeline)]);
                if let Some(site) = &filter.site {
                    request = request.query(&[("site", site)]);
                }
                if let Some(priority) = filter.priority {
                    request = request.query(&[("priority", priority)]);
                }
                if let Some(user) = &filter.user {
                    request = request.query(&[("user", user)]);
                }
                if let Some(parent) = &filter.parent {
                    request = request.query(&[("parent", parent)]);
                }
                if let Some(event) = &filter.event {
                    request = request.query(&[("event", join(event))]);
                }
                if let Some(tags) = &filter.tags {
                    request = request.query(&[("tags", tags.join(","))]);
                }
                request
            })
            .await?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        handle_json(response).await.map(Some)
    }

    /// Updates a work item in place.
    pub async fn update(&self, work: &Work) -> Result<()> {
        retry(&self.policy, || self.try_update(work)).await
    }

    async fn try_update(&self, work: &Work) -> Result<()> {
        let id = work.id.as_deref().unwrap_or_default();
        let response = self
            .transport
            .send(|client, base| client.put(format!("{base}/work/{id}")).json(work))
            .await?;
        handle_empty(response).await
    }

    /// Deletes work items by id.
    pub async fn delete(&self, ids: &[String]) -> Result<()> {
        retry(&self.policy, || self.try_delete(ids)).await
    }

    async fn try_delete(&self, ids: &[String]) -> Result<()> {
        let response = self
            .transport
            .send(|client, base| {
                client
                    .delete(format!("{base}/work"))
                    .query(&[("ids", ids.join(","))])
            })
            .await?;
        handle_empty(response).await
    }

    /// Lists work matching a query. The daemons reconcile against this.
    pub async fn view(&self, query: &ViewQuery) -> Result<Vec<Work>> {
        retry(&self.policy, || self.try_view(query)).await
    }

    async fn try_view(&self, query: &ViewQuery) -> Result<Vec<Work>> {
        let response = self
            .transport
            .send(|client, base| client.post(format!("{base}/view")).json(query))
            .await?;
        handle_json(response).await
    }
}

fn join(values: &[i64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
