use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RtcError};
use super::hub::SessionKey;

/// Persisted shape of one collaboration session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub whiteboard: Option<Vec<Value>>,
}

/// HTTP client for the session persistence backend.
///
/// Entirely optional: without `COLLAB_STORAGE_URL` the synchronizer runs
/// in-memory only and every session starts from the default template.
pub struct StorageClient {
    client: reqwest::Client,
    base_url: String,
}

impl StorageClient {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("COLLAB_STORAGE_URL").ok()?;
        tracing::info!(base_url = %base_url, "Collab session storage enabled");
        Some(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn session_url(&self, key: &SessionKey) -> String {
        format!(
            "{}/collab-sessions/{}/{}",
            self.base_url,
            urlencoding::encode(&key.assessment_id),
            urlencoding::encode(&key.question_id)
        )
    }

    /// Fetch the stored state for a session. A 404 is not an error, it
    /// just means no one has written this session yet.
    pub async fn load(&self, key: &SessionKey) -> Result<Option<StoredSession>> {
        let url = self.session_url(key);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RtcError::storage(format!("fetch {}: {}", url, e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RtcError::storage(format!(
                "fetch {}: status {}",
                url,
                response.status()
            )));
        }

        let stored = response
            .json::<StoredSession>()
            .await
            .map_err(|e| RtcError::storage(format!("decode session: {}", e)))?;
        Ok(Some(stored))
    }

    /// Persist the latest state for a session. Best effort; callers log
    /// and continue on failure.
    pub async fn store(&self, key: &SessionKey, code: &str, whiteboard: &[Value]) -> Result<()> {
        let url = self.session_url(key);
        let body = StoredSession {
            code: Some(code.to_string()),
            whiteboard: Some(whiteboard.to_vec()),
        };
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RtcError::storage(format!("store {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(RtcError::storage(format!(
                "store {}: status {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}
