//! The slice of the Discord API the reconciliation code needs.
//!
//! Everything that talks to Discord goes through [`Platform`] so the sync and
//! ban logic can run against an in-memory double in tests.

mod serenity_client;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{GuildId, RoleId, UserId};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;

pub use serenity_client::SerenityPlatform;

/// Snapshot of a guild taken when a pass is planned
#[derive(Debug, Clone, PartialEq)]
pub struct GuildSummary {
    pub id: GuildId,
    pub name: String,
    pub member_count: u64,
    pub owner_id: UserId,
}

/// Snapshot of a guild member
#[derive(Debug, Clone, PartialEq)]
pub struct MemberSnapshot {
    pub user_id: UserId,
    pub tag: String,
    pub is_bot: bool,
    pub joined_at: Option<DateTime<Utc>>,
    pub roles: HashSet<RoleId>,
}

/// A role as it exists in a guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformRole {
    pub id: RoleId,
    pub name: String,
    pub position: u16,
}

/// An entry of a guild's ban list
#[derive(Debug, Clone, PartialEq)]
pub struct BanEntry {
    pub user_id: UserId,
    pub reason: Option<String>,
}

/// Which audit log to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditKind {
    Ban,
    Unban,
}

/// One audit log entry. Entries are returned newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub target_id: Option<u64>,
    pub actor_id: Option<UserId>,
    pub reason: Option<String>,
}

/// Chat platform operations used by the bot
#[async_trait]
pub trait Platform: Send + Sync {
    /// All guilds the bot is a member of
    async fn guilds(&self) -> Result<Vec<GuildSummary>>;

    async fn guild(&self, guild_id: GuildId) -> Result<Option<GuildSummary>>;

    /// Load every member of a guild
    async fn members(&self, guild_id: GuildId) -> Result<Vec<MemberSnapshot>>;

    /// A single member, `None` if the user is not in the guild
    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<MemberSnapshot>>;

    async fn roles(&self, guild_id: GuildId) -> Result<Vec<PlatformRole>>;

    /// Position of the bot's highest role in the guild
    async fn bot_role_position(&self, guild_id: GuildId) -> Result<u16>;

    async fn add_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<()>;

    async fn remove_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId)
        -> Result<()>;

    /// Permanent ban without message deletion
    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()>;

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()>;

    /// The guild's full ban list
    async fn bans(&self, guild_id: GuildId) -> Result<Vec<BanEntry>>;

    /// The ban of one user, `None` if the user is not banned
    async fn ban_of(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<BanEntry>>;

    async fn audit_log(&self, guild_id: GuildId, kind: AuditKind) -> Result<Vec<AuditEntry>>;
}

/// Shared platform type
pub type SharedPlatform = Arc<dyn Platform>;
