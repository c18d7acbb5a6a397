use std::time::Duration;
use tracing::warn;

use crate::error::{BotError, Result};

pub const DEFAULT_FORUM_API_DELAY_MS: u64 = 5000;
/// Lower bound for the delay between two forum lookups
pub const MIN_FORUM_API_DELAY_MS: u64 = 100;
pub const DEFAULT_BAN_AUDIT_GRACE_SECS: u64 = 15;
pub const DEFAULT_STATE_PATH: &str = "state";

/// Process-wide settings read from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub discord_token: String,

    /// Forum role API base url; the forum user id is appended to it
    pub forum_role_api_url: Option<String>,

    /// Delay between two member lookups during role sync
    pub forum_role_api_delay: Duration,

    /// Forum role that triggers a ban
    pub forum_banned_role_id: Option<u64>,

    /// Directory holding the bot database
    pub state_path: String,

    /// Time given to Discord to write the audit log entry of a (un)ban
    pub ban_audit_grace: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| BotError::ConfigValidation {
                message: "DISCORD_TOKEN environment variable not set".to_string(),
            })?;

        let forum_role_api_url = lookup("FORUM_ROLE_API_URL").filter(|u| !u.trim().is_empty());

        let forum_role_api_delay =
            parse_forum_delay(lookup("FORUM_ROLE_API_DELAY_MS").as_deref());

        let forum_banned_role_id =
            parse_banned_role_id(lookup("FORUM_BANNED_ROLE_ID").as_deref());

        let state_path =
            lookup("STATE_PATH").unwrap_or_else(|| DEFAULT_STATE_PATH.to_string());

        let ban_audit_grace = Duration::from_secs(
            lookup("BAN_AUDIT_GRACE_SECS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_BAN_AUDIT_GRACE_SECS),
        );

        Ok(Self {
            discord_token,
            forum_role_api_url,
            forum_role_api_delay,
            forum_banned_role_id,
            state_path,
            ban_audit_grace,
        })
    }
}

/// Delay between forum lookups, never below [`MIN_FORUM_API_DELAY_MS`]
pub fn parse_forum_delay(raw: Option<&str>) -> Duration {
    let ms = raw
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_FORUM_API_DELAY_MS);
    Duration::from_millis(ms.max(MIN_FORUM_API_DELAY_MS))
}

/// Empty disables the banned-role check; an invalid id disables it with a warning
pub fn parse_banned_role_id(raw: Option<&str>) -> Option<u64> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match raw.parse::<u64>() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(
                "Invalid FORUM_BANNED_ROLE_ID '{}'. Set a valid id or remove the variable.",
                raw
            );
            None
        }
    }
}
