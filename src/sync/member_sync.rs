use chrono::Utc;
use poise::serenity_prelude::{GuildId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::autokick::{self, KickDecision};
use super::role_diff::{diff_role_names, plan_role_changes};
use crate::error::{BotError, Result};
use crate::forum::SharedRoleSource;
use crate::platform::{GuildSummary, MemberSnapshot, SharedPlatform};
use crate::state::{GuildConfig, LinkedIdentity, RoleDefinition, SharedStore};

/// What happened to one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberOutcome {
    Kicked,
    /// Unlinked but allowed to stay
    Kept(autokick::KeepReason),
    Whitelisted,
    Banned,
    /// Role calls that went through, and the ones refused by Discord
    Synced {
        granted: usize,
        revoked: usize,
        failed: usize,
    },
    /// Linked but not a member of the guild
    Absent,
    /// Lookup or Discord call failed, retried on the next pass
    Skipped,
}

/// Role calls issued for one member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct AppliedRoles {
    granted: usize,
    revoked: usize,
    failed: usize,
}

pub fn banned_role_reason(external_user_id: u64) -> String {
    format!(
        "User ({}) has the banned role on the forum. Might be a temporary ban.",
        external_user_id
    )
}

/// Brings one member's roles in line with the forum
pub struct MemberSync {
    store: SharedStore,
    platform: SharedPlatform,
    role_source: SharedRoleSource,
    banned_role_id: Option<u64>,
}

impl MemberSync {
    pub fn new(
        store: SharedStore,
        platform: SharedPlatform,
        role_source: SharedRoleSource,
        banned_role_id: Option<u64>,
    ) -> Self {
        Self {
            store,
            platform,
            role_source,
            banned_role_id,
        }
    }

    /// Sync a member during a pass. Unlinked members go through the autokick
    /// policy. Never fails; problems are logged and reported as `Skipped`.
    pub async fn sync_member(&self, guild: &GuildSummary, member: &MemberSnapshot) -> MemberOutcome {
        debug!(
            "Updating member \"{}\" ({}) on \"{}\"",
            member.tag, member.user_id, guild.name
        );

        let (link, whitelisted, config) = {
            let db = self.store.read().await;
            let user_id = member.user_id.get();
            (
                db.link_by_platform(user_id).cloned(),
                db.is_whitelisted(user_id),
                db.guild(guild.id.get())
                    .cloned()
                    .unwrap_or_else(|| GuildConfig::new_default(guild.id.get())),
            )
        };

        match link {
            None => self.check_for_kick(guild, member, &config, whitelisted).await,
            Some(_) if whitelisted => MemberOutcome::Whitelisted,
            Some(link) => self.sync_linked(guild, member, &link).await,
        }
    }

    /// Sync a single linked user in a guild outside of a pass, e.g. right after
    /// joining or verifying. Unlinked users are left alone.
    pub async fn sync_user(&self, guild_id: GuildId, user_id: UserId) -> Result<MemberOutcome> {
        let (link, whitelisted) = {
            let db = self.store.read().await;
            (
                db.link_by_platform(user_id.get()).cloned(),
                db.is_whitelisted(user_id.get()),
            )
        };
        let Some(link) = link else {
            return Ok(MemberOutcome::Skipped);
        };
        if whitelisted {
            return Ok(MemberOutcome::Whitelisted);
        }

        let guild = self
            .platform
            .guild(guild_id)
            .await?
            .ok_or_else(|| BotError::GuildNotFound {
                id: guild_id.to_string(),
            })?;
        let Some(member) = self.platform.member(guild_id, user_id).await? else {
            return Ok(MemberOutcome::Absent);
        };

        Ok(self.sync_linked(&guild, &member, &link).await)
    }

    /// Take every forum-managed role away from a member, e.g. after unlinking
    pub async fn strip_forum_roles(&self, guild_id: GuildId, user_id: UserId) -> Result<usize> {
        let guild = self
            .platform
            .guild(guild_id)
            .await?
            .ok_or_else(|| BotError::GuildNotFound {
                id: guild_id.to_string(),
            })?;
        let Some(member) = self.platform.member(guild_id, user_id).await? else {
            debug!("Can not remove roles from {} as user is not in the guild", user_id);
            return Ok(0);
        };

        let definitions = self.store.read().await.role_definitions();
        let applied = self
            .apply_roles(&guild, &member, &HashSet::new(), &definitions)
            .await?;
        Ok(applied.revoked)
    }

    async fn check_for_kick(
        &self,
        guild: &GuildSummary,
        member: &MemberSnapshot,
        config: &GuildConfig,
        whitelisted: bool,
    ) -> MemberOutcome {
        let elapsed =
            match autokick::decide(config, whitelisted, member, guild.owner_id, Utc::now()) {
                KickDecision::Kick { elapsed } => elapsed,
                KickDecision::Keep(reason) => return MemberOutcome::Kept(reason),
            };

        match self
            .platform
            .kick(guild.id, member.user_id, &autokick::kick_reason(elapsed))
            .await
        {
            Ok(()) => {
                info!(
                    "Kicked member {} ({}) from \"{}\" due to being unlinked. Joined {} ago.",
                    member.tag,
                    member.user_id,
                    guild.name,
                    autokick::format_elapsed(elapsed)
                );
                MemberOutcome::Kicked
            }
            Err(e) => {
                self.log_platform_failure(guild, "kick unlinked members", &e);
                MemberOutcome::Skipped
            }
        }
    }

    async fn sync_linked(
        &self,
        guild: &GuildSummary,
        member: &MemberSnapshot,
        link: &LinkedIdentity,
    ) -> MemberOutcome {
        let role_ids = match self.role_source.role_ids(link.external_user_id).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(
                    "Skipping user. Could not get roles of forum user {} ({}): {}",
                    link.external_username, link.external_user_id, e
                );
                return MemberOutcome::Skipped;
            }
        };

        if self.banned_role_id.is_some_and(|id| role_ids.contains(&id)) {
            return self.ban_member(guild, member, link).await;
        }

        let definitions = self.store.read().await.role_definitions();
        let desired: HashSet<u64> = role_ids.into_iter().collect();

        match self.apply_roles(guild, member, &desired, &definitions).await {
            Ok(applied) => MemberOutcome::Synced {
                granted: applied.granted,
                revoked: applied.revoked,
                failed: applied.failed,
            },
            Err(e) => {
                self.log_platform_failure(guild, "update roles", &e);
                MemberOutcome::Skipped
            }
        }
    }

    async fn ban_member(
        &self,
        guild: &GuildSummary,
        member: &MemberSnapshot,
        link: &LinkedIdentity,
    ) -> MemberOutcome {
        let reason = banned_role_reason(link.external_user_id);
        match self.platform.ban(guild.id, member.user_id, &reason).await {
            Ok(()) => {
                info!(
                    "Banned member {} ({}) linked to forum user {} ({}) due to having the banned role.",
                    member.tag, member.user_id, link.external_username, link.external_user_id
                );
                MemberOutcome::Banned
            }
            Err(e) => {
                self.log_platform_failure(guild, "ban members", &e);
                MemberOutcome::Skipped
            }
        }
    }

    /// Compute and issue the grants and revokes for one member. A refused
    /// call is logged and does not stop the others.
    async fn apply_roles(
        &self,
        guild: &GuildSummary,
        member: &MemberSnapshot,
        desired: &HashSet<u64>,
        definitions: &[RoleDefinition],
    ) -> Result<AppliedRoles> {
        let diff = diff_role_names(desired, definitions);
        let guild_roles = self.platform.roles(guild.id).await?;
        let bot_position = self.platform.bot_role_position(guild.id).await?;
        let plan = plan_role_changes(&diff, &guild_roles, &member.roles, bot_position);

        if !plan.unmanageable.is_empty() {
            warn!(
                "Bot can not modify forum roles {:?} in \"{}\"! Please move the bot role above any forum role.",
                plan.unmanageable, guild.name
            );
        }

        let mut applied = AppliedRoles::default();
        for role in &plan.grant {
            match self.platform.add_role(guild.id, member.user_id, role.id).await {
                Ok(()) => applied.granted += 1,
                Err(e) => {
                    applied.failed += 1;
                    self.log_platform_failure(guild, &format!("grant \"{}\"", role.name), &e);
                }
            }
        }
        for role in &plan.revoke {
            match self
                .platform
                .remove_role(guild.id, member.user_id, role.id)
                .await
            {
                Ok(()) => applied.revoked += 1,
                Err(e) => {
                    applied.failed += 1;
                    self.log_platform_failure(guild, &format!("revoke \"{}\"", role.name), &e);
                }
            }
        }

        if !plan.is_empty() {
            info!(
                "Updated roles of {} ({}) on \"{}\": +{:?} -{:?}",
                member.tag,
                member.user_id,
                guild.name,
                plan.grant_names(),
                plan.revoke_names()
            );
        }
        Ok(applied)
    }

    fn log_platform_failure(&self, guild: &GuildSummary, action: &str, err: &BotError) {
        if err.is_actionable() {
            warn!(
                "Bot can not {} in \"{}\": {}. An admin needs to fix the bot's permissions.",
                action, guild.name, err
            );
        } else {
            error!("Failed to {} in \"{}\": {}", action, guild.name, err);
        }
    }
}

/// Shared member sync type
pub type SharedMemberSync = Arc<MemberSync>;

pub fn create_shared_member_sync(member_sync: MemberSync) -> SharedMemberSync {
    Arc::new(member_sync)
}
