use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::client::encode;
use super::{ApstraClient, ApstraError};

const MUTEX_LABEL_PREFIX: &str = "blueprint-mutex-";
const MUTEX_DETAILS: &str = "locked by terraform";
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct MutexMessage {
    owner: String,
    details: String,
}

#[derive(Debug, Deserialize)]
struct TagItem {
    id: String,
    label: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct TagList {
    items: Vec<TagItem>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

pub fn mutex_label(blueprint_id: &str) -> String {
    format!("{}{}", MUTEX_LABEL_PREFIX, blueprint_id)
}

/// Serializes blueprint changes across concurrent provider runs by holding a
/// well-known design tag per blueprint.
pub struct BlueprintMutexes {
    client: ApstraClient,
    owner: Uuid,
    enabled: bool,
    timeout: Duration,
    held: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for BlueprintMutexes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlueprintMutexes")
            .field("owner", &self.owner)
            .field("enabled", &self.enabled)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BlueprintMutexes {
    pub fn new(client: ApstraClient, enabled: bool, timeout: Duration) -> Self {
        Self {
            client,
            owner: Uuid::new_v4(),
            enabled,
            timeout,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    fn message(&self) -> Result<String, ApstraError> {
        serde_json::to_string(&MutexMessage {
            owner: self.owner.to_string(),
            details: MUTEX_DETAILS.to_string(),
        })
        .map_err(|e| ApstraError::Parse {
            message: e.to_string(),
        })
    }

    /// Blocks until this process owns the blueprint's mutex tag.
    pub async fn lock(&self, blueprint_id: &str) -> Result<(), ApstraError> {
        if !self.enabled {
            return Ok(());
        }
        let mut held = self.held.lock().await;
        if held.contains_key(blueprint_id) {
            return Ok(());
        }

        let label = mutex_label(blueprint_id);
        let description = self.message()?;
        let deadline = Instant::now() + self.timeout;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let result: Result<IdResponse, ApstraError> = self
                .client
                .post(
                    "/api/design/tags",
                    &json!({"label": label, "description": description}),
                )
                .await;

            match result {
                Ok(created) => {
                    tracing::info!(blueprint_id = %blueprint_id, tag_id = %created.id, "blueprint locked");
                    held.insert(blueprint_id.to_string(), created.id);
                    return Ok(());
                }
                Err(ApstraError::Api { status, .. }) if status == 409 || status == 422 => {
                    if let Some(tag_id) = self.find_own_tag(&label).await? {
                        held.insert(blueprint_id.to_string(), tag_id);
                        return Ok(());
                    }
                }
                Err(e) => return Err(e),
            }

            if Instant::now() + backoff > deadline {
                return Err(ApstraError::Lock {
                    blueprint_id: blueprint_id.to_string(),
                    message: format!(
                        "timed out after {}s waiting for tag {:?}",
                        self.timeout.as_secs(),
                        label
                    ),
                });
            }
            tracing::debug!(blueprint_id = %blueprint_id, backoff_ms = backoff.as_millis() as u64, "blueprint locked elsewhere, waiting");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Returns the tag ID when an existing mutex tag belongs to this process.
    async fn find_own_tag(&self, label: &str) -> Result<Option<String>, ApstraError> {
        let tags: TagList = self.client.get("/api/design/tags").await?;
        let own = self.owner.to_string();
        Ok(tags
            .items
            .into_iter()
            .find(|t| {
                t.label == label
                    && serde_json::from_str::<MutexMessage>(&t.description)
                        .is_ok_and(|m| m.owner == own)
            })
            .map(|t| t.id))
    }

    pub async fn unlock(&self, blueprint_id: &str) -> Result<(), ApstraError> {
        let tag_id = self.held.lock().await.remove(blueprint_id);
        if let Some(tag_id) = tag_id {
            let path = format!("/api/design/tags/{}", encode(&tag_id));
            match self.client.delete(&path).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            tracing::info!(blueprint_id = %blueprint_id, "blueprint unlocked");
        }
        Ok(())
    }

    pub async fn unlock_all(&self) -> Result<(), ApstraError> {
        let blueprint_ids: Vec<String> = self.held.lock().await.keys().cloned().collect();
        for blueprint_id in blueprint_ids {
            self.unlock(&blueprint_id).await?;
        }
        Ok(())
    }

    pub async fn held(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.held.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
