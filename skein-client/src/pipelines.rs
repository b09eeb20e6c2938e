//! Pipelines manager client
//!
//! The manager owns Pipeline Configurations: it stores them, evaluates
//! execution-time conditions, and fires scheduled configurations. Bare
//! configurations live under `/pipelines`; configurations carrying a cron
//! schedule live under `/schedules` with the same surface.

use serde::{Deserialize, Serialize};
use skein_core::Configuration;

use crate::error::Result;
use crate::transport::{handle_empty, handle_json, retry, RetryPolicy, Transport};

/// Summary record the manager returns for a stored configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// HTTP client for the pipelines manager service.
#[derive(Debug)]
pub struct Pipelines {
    transport: Transport,
    policy: RetryPolicy,
}

impl Pipelines {
    /// Creates a client over the candidate baseurls, in preference order.
    pub fn new(baseurls: Vec<String>) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(baseurls)?,
            policy: RetryPolicy::default(),
        })
    }

    /// Registers a configuration. Scheduled configurations are routed to
    /// the schedules surface; the count bound caps firings.
    pub async fn deposit(&self, config: &Configuration) -> Result<ConfigurationRecord> {
        let kind = kind_of(config);
        retry(&self.policy, || self.try_deposit(kind, config)).await
    }

    async fn try_deposit(&self, kind: &str, config: &Configuration) -> Result<ConfigurationRecord> {
        let response = self
            .transport
            .send(|client, base| client.post(format!("{base}/{kind}")).json(config))
            .await?;
        handle_json(response).await
    }

    /// Lists stored configurations.
    pub async fn list(&self, kind: Kind) -> Result<Vec<ConfigurationRecord>> {
        retry(&self.policy, || self.try_list(kind.path())).await
    }

    async fn try_list(&self, kind: &str) -> Result<Vec<ConfigurationRecord>> {
        let response = self
            .transport
            .send(|client, base| client.get(format!("{base}/{kind}")))
            .await?;
        handle_json(response).await
    }

    /// Fetches one stored configuration.
    pub async fn get(&self, kind: Kind, id: &str) -> Result<ConfigurationRecord> {
        retry(&self.policy, || self.try_get(kind.path(), id)).await
    }

    async fn try_get(&self, kind: &str, id: &str) -> Result<ConfigurationRecord> {
        let response = self
            .transport
            .send(|client, base| client.get(format!("{base}/{kind}/{id}")))
            .await?;
        handle_json(response).await
    }

    /// True when the configuration execution still exists in the manager.
    pub async fn exists(&self, kind: Kind, id: &str) -> Result<bool> {
        match self.get(kind, id).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Stops a running configuration execution.
    pub async fn stop(&self, kind: Kind, id: &str) -> Result<()> {
        retry(&self.policy, || self.try_stop(kind.path(), id)).await
    }

    async fn try_stop(&self, kind: &str, id: &str) -> Result<()> {
        let response = self
            .transport
            .send(|client, base| client.post(format!("{base}/{kind}/{id}/stop")))
            .await?;
        handle_empty(response).await
    }

    /// Removes a stored configuration.
    pub async fn remove(&self, kind: Kind, id: &str) -> Result<()> {
        retry(&self.policy, || self.try_remove(kind.path(), id)).await
    }

    async fn try_remove(&self, kind: &str, id: &str) -> Result<()> {
        let response = self
            .transport
            .send(|client, base| client.delete(format!("{base}/{kind}/{id}")))
            .await?;
        handle_empty(response).await
    }
}

/// Which manager surface to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Pipelines,
    Schedules,
}

impl Kind {
    fn path(&self) -> &'static str {
        match self {
            Kind::Pipelines => "pipelines",
            Kind::Schedules => "schedules",
        }
    }
}

fn kind_of(config: &Configuration) -> &'static str {
    if config.is_scheduled() {
        Kind::Schedules.path()
    } else {
        Kind::Pipelines.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_configurations_route_to_schedules() {
        let scheduled = Configuration::from_yaml(
            "version: \"1\"\nname: s\nschedule: {cronspec: \"0 4 * * *\"}\npipeline:\n  a: {stage: 1, work: {}}\n",
        )
        .unwrap();
        assert_eq!(kind_of(&scheduled), "schedules");

        let bare = Configuration::from_yaml(
            "version: \"1\"\nname: b\npipeline:\n  a: {stage: 1, work: {}}\n",
        )
        .unwrap();
        assert_eq!(kind_of(&bare), "pipelines");
    }
}
