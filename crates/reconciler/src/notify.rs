//! Deletion notices sent to the portal before a monster's dependents go away.

use async_trait::async_trait;
use dungeon_core::{Monster, ObjectKey};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::NotificationConfig;
use crate::error::{Error, Result};

/// Body of a deletion notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionNotice {
    #[serde(rename = "monsterName")]
    pub monster_name: String,
    #[serde(rename = "monsterID")]
    pub monster_id: i64,
    pub namespace: String,
}

impl DeletionNotice {
    /// Notice announcing the removal of `monster`.
    pub fn for_monster(monster: &Monster) -> Self {
        Self {
            monster_name: monster.meta.name.clone(),
            monster_id: monster.spec.id,
            namespace: monster.meta.namespace.clone(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.monster_name)
    }
}

/// What a failed notice does to teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationPolicy {
    /// Abort teardown; the pass is retried and the notice re-sent.
    #[default]
    Required,
    /// Log the failure and tear down anyway.
    BestEffort,
}

/// Receiver of deletion notices.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notice.
    ///
    /// # Errors
    ///
    /// Returns `Notification` when the notice was not acknowledged.
    async fn notify_deletion(&self, notice: &DeletionNotice) -> Result<()>;
}

/// Sink that POSTs notices as JSON to the portal.
#[derive(Debug, Clone)]
pub struct HttpNotificationSink {
    endpoint: Url,
    http_client: reqwest::Client,
}

impl HttpNotificationSink {
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the endpoint URL is malformed or the HTTP
    /// client cannot be built.
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::invalid_config(format!("notification client: {e}")))?;

        Ok(Self {
            endpoint: config.endpoint()?,
            http_client,
        })
    }

    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationSink {
    async fn notify_deletion(&self, notice: &DeletionNotice) -> Result<()> {
        let response = self
            .http_client
            .post(self.endpoint.as_ref())
            .json(notice)
            .send()
            .await
            .map_err(|e| Error::notification(&notice.key(), e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(monster = %notice.key(), %status, "Portal rejected deletion notice");
            return Err(Error::notification(
                &notice.key(),
                format!("portal returned {status}"),
            ));
        }

        debug!(monster = %notice.key(), "Deletion notice acknowledged");
        Ok(())
    }
}
