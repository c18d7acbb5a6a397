use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{Cache, GuildId, Http, Member, RoleId, UserId};
use serenity::http::UserPagination;
use serenity::model::guild::audit_log::{Action, MemberAction};
use std::sync::Arc;
use tracing::debug;

use super::{
    AuditEntry, AuditKind, BanEntry, GuildSummary, MemberSnapshot, Platform, PlatformRole,
};
use crate::error::Result;

/// Discord's page size for member listing
const MEMBER_PAGE_SIZE: u64 = 1000;
/// Page size for ban listing
const BAN_PAGE_SIZE: u8 = 200;
/// Audit log entries fetched per lookup (Discord maximum)
const AUDIT_LOG_LIMIT: u8 = 100;

/// [`Platform`] backed by serenity's HTTP client and gateway cache
pub struct SerenityPlatform {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache }
    }

    fn cached_summary(&self, guild_id: GuildId) -> Option<GuildSummary> {
        self.cache.guild(guild_id).map(|guild| GuildSummary {
            id: guild.id,
            name: guild.name.clone(),
            member_count: guild.member_count,
            owner_id: guild.owner_id,
        })
    }
}

fn snapshot(member: &Member) -> MemberSnapshot {
    MemberSnapshot {
        user_id: member.user.id,
        tag: member.user.tag(),
        is_bot: member.user.bot,
        joined_at: member
            .joined_at
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.unix_timestamp(), 0)),
        roles: member.roles.iter().copied().collect(),
    }
}

/// Bans are listed by ascending user id, so the first entry after this
/// cursor is either the user's own ban or someone else's.
fn ban_cursor_before(user_id: UserId) -> Option<UserId> {
    user_id
        .get()
        .checked_sub(1)
        .filter(|id| *id != 0)
        .map(UserId::new)
}

#[async_trait]
impl Platform for SerenityPlatform {
    async fn guilds(&self) -> Result<Vec<GuildSummary>> {
        let mut summaries = Vec::new();
        for guild_id in self.cache.guilds() {
            if let Some(summary) = self.guild(guild_id).await? {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }

    async fn guild(&self, guild_id: GuildId) -> Result<Option<GuildSummary>> {
        if let Some(summary) = self.cached_summary(guild_id) {
            return Ok(Some(summary));
        }

        debug!("Guild {} not cached, fetching from Discord", guild_id);
        match guild_id.to_partial_guild_with_counts(self.http.as_ref()).await {
            Ok(guild) => Ok(Some(GuildSummary {
                id: guild.id,
                name: guild.name.clone(),
                member_count: guild.approximate_member_count.unwrap_or(0),
                owner_id: guild.owner_id,
            })),
            Err(e) => {
                let err = crate::error::BotError::from_discord(e);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn members(&self, guild_id: GuildId) -> Result<Vec<MemberSnapshot>> {
        let mut members = Vec::new();
        let mut after: Option<UserId> = None;

        loop {
            let page = guild_id
                .members(self.http.as_ref(), Some(MEMBER_PAGE_SIZE), after)
                .await?;
            let page_len = page.len() as u64;
            after = page.last().map(|m| m.user.id);
            members.extend(page.iter().map(snapshot));

            if page_len < MEMBER_PAGE_SIZE {
                break;
            }
        }

        Ok(members)
    }

    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<MemberSnapshot>> {
        match guild_id.member(self.http.as_ref(), user_id).await {
            Ok(member) => Ok(Some(snapshot(&member))),
            Err(e) => {
                let err = crate::error::BotError::from_discord(e);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn roles(&self, guild_id: GuildId) -> Result<Vec<PlatformRole>> {
        let roles = guild_id.roles(self.http.as_ref()).await?;
        Ok(roles
            .into_values()
            .map(|role| PlatformRole {
                id: role.id,
                name: role.name,
                position: role.position,
            })
            .collect())
    }

    async fn bot_role_position(&self, guild_id: GuildId) -> Result<u16> {
        let bot_id = self.cache.current_user().id;
        let bot_member = guild_id.member(self.http.as_ref(), bot_id).await?;
        let roles = self.roles(guild_id).await?;

        Ok(roles
            .iter()
            .filter(|r| bot_member.roles.contains(&r.id))
            .map(|r| r.position)
            .max()
            .unwrap_or(0))
    }

    async fn add_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<()> {
        self.http
            .add_member_role(guild_id, user_id, role_id, Some("Forum role sync"))
            .await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<()> {
        self.http
            .remove_member_role(guild_id, user_id, role_id, Some("Forum role sync"))
            .await?;
        Ok(())
    }

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()> {
        guild_id
            .ban_with_reason(self.http.as_ref(), user_id, 0, reason)
            .await?;
        Ok(())
    }

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()> {
        guild_id
            .kick_with_reason(self.http.as_ref(), user_id, reason)
            .await?;
        Ok(())
    }

    async fn bans(&self, guild_id: GuildId) -> Result<Vec<BanEntry>> {
        let mut entries = Vec::new();
        let mut after: Option<UserId> = None;

        loop {
            let page = guild_id
                .bans(
                    self.http.as_ref(),
                    after.map(UserPagination::After),
                    Some(BAN_PAGE_SIZE),
                )
                .await?;
            let page_len = page.len();
            after = page.last().map(|b| b.user.id);
            entries.extend(page.into_iter().map(|ban| BanEntry {
                user_id: ban.user.id,
                reason: ban.reason,
            }));

            if page_len < BAN_PAGE_SIZE as usize {
                break;
            }
        }

        Ok(entries)
    }

    async fn ban_of(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<BanEntry>> {
        let after = ban_cursor_before(user_id).map(UserPagination::After);
        let page = guild_id.bans(self.http.as_ref(), after, Some(1)).await?;
        Ok(page
            .into_iter()
            .find(|ban| ban.user.id == user_id)
            .map(|ban| BanEntry {
                user_id: ban.user.id,
                reason: ban.reason,
            }))
    }

    async fn audit_log(&self, guild_id: GuildId, kind: AuditKind) -> Result<Vec<AuditEntry>> {
        let action = match kind {
            AuditKind::Ban => Action::Member(MemberAction::BanAdd),
            AuditKind::Unban => Action::Member(MemberAction::BanRemove),
        };

        let logs = guild_id
            .audit_logs(self.http.as_ref(), Some(action), None, None, Some(AUDIT_LOG_LIMIT))
            .await?;

        Ok(logs
            .entries
            .into_iter()
            .map(|entry| AuditEntry {
                target_id: entry.target_id.map(|t| t.get()),
                actor_id: Some(entry.user_id),
                reason: entry.reason,
            })
            .collect())
    }
}
