use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{BotError, Result};

/// Allowed autokick delays in hours
pub const AUTOKICK_DELAY_RANGE: RangeInclusive<u32> = 12..=168;
pub const DEFAULT_AUTOKICK_DELAY_HOURS: u32 = 24;

/// Reason stored when neither the ban nor the audit log carries one
pub const DEFAULT_BAN_REASON: &str = "No reason given.";

/// Feature flags granted to a guild. All off until the bot owner enables them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuildPermissions {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub role_sync: bool,
    #[serde(default)]
    pub ban_sync: bool,
    #[serde(default)]
    pub autokick: bool,
}

/// Per-guild settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuildConfig {
    pub guild_id: u64,

    #[serde(default)]
    pub perms: GuildPermissions,

    /// Hours an unlinked member may stay before being kicked
    pub autokick_hour_delay: u32,

    /// Channel where `/verify` is accepted (0 = any channel)
    #[serde(default)]
    pub verification_channel_id: u64,
}

impl GuildConfig {
    /// Default settings for a guild seen for the first time
    pub fn new_default(guild_id: u64) -> Self {
        Self {
            guild_id,
            perms: GuildPermissions::default(),
            autokick_hour_delay: DEFAULT_AUTOKICK_DELAY_HOURS,
            verification_channel_id: 0,
        }
    }

    pub fn set_autokick_delay(&mut self, hours: u32) -> Result<()> {
        if !AUTOKICK_DELAY_RANGE.contains(&hours) {
            return Err(BotError::InvalidInput {
                message: format!(
                    "Autokick delay must be between {} and {} hours, got {}",
                    AUTOKICK_DELAY_RANGE.start(),
                    AUTOKICK_DELAY_RANGE.end(),
                    hours
                ),
            });
        }
        self.autokick_hour_delay = hours;
        Ok(())
    }

    /// Whether `/verify` may be used in the given channel
    pub fn accepts_verification_in(&self, channel_id: u64) -> bool {
        self.verification_channel_id == 0 || self.verification_channel_id == channel_id
    }

    pub fn permission_text(&self) -> String {
        let yes_no = |b: bool| if b { "Yes" } else { "No" };
        format!(
            "Read: {}\nWrite: {}\nRoleSync: {}\nBanSync: {}\nAutokick: {} ({}h)",
            yes_no(self.perms.read),
            yes_no(self.perms.write),
            yes_no(self.perms.role_sync),
            yes_no(self.perms.ban_sync),
            yes_no(self.perms.autokick),
            self.autokick_hour_delay
        )
    }
}

/// A platform user the bot keeps settings for, linked or not
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformUser {
    pub user_id: u64,

    /// Whitelisted users are neither synced nor autokicked
    #[serde(default)]
    pub whitelisted: bool,
}

/// 1:1 link between a platform account and a forum account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkedIdentity {
    pub platform_user_id: u64,
    pub external_user_id: u64,
    pub external_username: String,
    pub linked_at: u64,
}

impl LinkedIdentity {
    pub fn new(platform_user_id: u64, external_user_id: u64, external_username: &str) -> Self {
        Self {
            platform_user_id,
            external_user_id,
            external_username: external_username.to_string(),
            linked_at: current_timestamp(),
        }
    }
}

/// Forum role id mapped to the name of the platform role it grants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RoleDefinition {
    pub external_role_id: u64,
    pub name: String,
}

impl RoleDefinition {
    pub fn new(external_role_id: u64, name: &str) -> Self {
        Self {
            external_role_id,
            name: name.to_string(),
        }
    }
}

/// A ban as seen by the bot. Unique per (guild_id, user_id).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BanRecord {
    pub guild_id: u64,
    pub user_id: u64,

    /// User that issued the ban (0 = unknown)
    pub actor_id: u64,

    pub reason: String,
    pub recorded_at: u64,
}

impl BanRecord {
    pub fn new(guild_id: u64, user_id: u64, actor_id: u64, reason: Option<&str>) -> Self {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_BAN_REASON)
            .to_string();

        Self {
            guild_id,
            user_id,
            actor_id,
            reason,
            recorded_at: current_timestamp(),
        }
    }

    pub fn with_unknown_actor(guild_id: u64, user_id: u64, reason: Option<&str>) -> Self {
        Self::new(guild_id, user_id, 0, reason)
    }

    pub fn has_known_actor(&self) -> bool {
        self.actor_id != 0
    }
}

/// Link request created on the forum side, consumed by `/verify <code>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingVerification {
    pub external_user_id: u64,
    pub external_username: String,
    pub code: String,
    pub created_at: u64,
}

impl PendingVerification {
    pub fn new(external_user_id: u64, external_username: &str, code: &str) -> Self {
        Self {
            external_user_id,
            external_username: external_username.to_string(),
            code: code.to_string(),
            created_at: current_timestamp(),
        }
    }
}

/// Platform roles are matched by name, ignoring case
pub fn role_name_key(name: &str) -> String {
    name.to_lowercase()
}

pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
