//! Forum role lookup. The forum answers `GET <base_url><uid>` with a JSON array
//! of the role ids the user currently holds.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{BotError, Result};

/// Connect and read timeout for a single lookup
pub const FORUM_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of a forum user's current role ids
#[async_trait]
pub trait RoleSource: Send + Sync {
    async fn role_ids(&self, external_user_id: u64) -> Result<Vec<u64>>;
}

/// Shared role source type
pub type SharedRoleSource = Arc<dyn RoleSource>;

/// HTTP client for the forum role API
pub struct ForumRoleApi {
    base_url: String,
    http_client: reqwest::Client,
}

impl ForumRoleApi {
    pub fn new(base_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(FORUM_REQUEST_TIMEOUT)
            .timeout(FORUM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BotError::ConfigValidation {
                message: format!("Could not build forum HTTP client: {}", e),
            })?;

        Ok(Self {
            base_url: base_url.to_string(),
            http_client,
        })
    }

    fn url_for(&self, external_user_id: u64) -> String {
        format!("{}{}", self.base_url, external_user_id)
    }
}

/// Parse the body of a role lookup
pub fn parse_role_ids(body: &str) -> Result<Vec<u64>> {
    serde_json::from_str::<Vec<u64>>(body.trim()).map_err(|_| BotError::MalformedPayload {
        body: body.chars().take(200).collect(),
    })
}

#[async_trait]
impl RoleSource for ForumRoleApi {
    async fn role_ids(&self, external_user_id: u64) -> Result<Vec<u64>> {
        let url = self.url_for(external_user_id);
        debug!("Requesting forum roles from {}", url);

        let to_error = |e: reqwest::Error| {
            if e.is_timeout() {
                BotError::ForumTimeout { external_id: external_user_id }
            } else {
                BotError::ForumRequest {
                    message: e.to_string(),
                }
            }
        };

        let response = self.http_client.get(&url).send().await.map_err(to_error)?;
        let body = response.text().await.map_err(to_error)?;
        parse_role_ids(&body)
    }
}
