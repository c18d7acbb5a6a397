//! In-memory doubles for the Discord API and the forum.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use poise::serenity_prelude::{GuildId, RoleId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::Settings;
use crate::error::{BotError, Result};
use crate::forum::{RoleSource, SharedRoleSource};
use crate::platform::{
    AuditEntry, AuditKind, BanEntry, GuildSummary, MemberSnapshot, Platform, PlatformRole,
};
use crate::state::{create_shared_store, Store};
use crate::Data;

/// What the fake guilds look like and every call made against them
#[derive(Default)]
pub struct FakeState {
    pub guilds: Vec<GuildSummary>,
    pub members: HashMap<GuildId, Vec<MemberSnapshot>>,
    pub roles: HashMap<GuildId, Vec<PlatformRole>>,
    pub bot_position: u16,
    pub bans: HashMap<GuildId, Vec<BanEntry>>,
    pub audit: HashMap<(GuildId, AuditKind), Vec<AuditEntry>>,

    pub added_roles: Vec<(GuildId, UserId, RoleId)>,
    pub removed_roles: Vec<(GuildId, UserId, RoleId)>,
    pub issued_bans: Vec<(GuildId, UserId, String)>,
    pub kicks: Vec<(GuildId, UserId, String)>,
    pub guild_listings: Vec<Instant>,
    pub member_listings: Vec<(GuildId, Instant)>,

    /// Role calls fail with missing permissions
    pub deny_role_changes: bool,
    /// Calls for these roles fail with missing permissions
    pub deny_roles: HashSet<RoleId>,
    /// Guild enumeration fails
    pub fail_guild_listings: bool,
    /// Bans of these users fail with missing permissions
    pub deny_bans_for: HashSet<UserId>,
}

pub struct FakePlatform {
    pub state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                bot_position: 100,
                ..FakeState::default()
            }),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn add_guild(&self, id: u64, name: &str, owner_id: u64) {
        let mut state = self.state.lock();
        state.guilds.push(GuildSummary {
            id: GuildId::new(id),
            name: name.to_string(),
            member_count: 0,
            owner_id: UserId::new(owner_id),
        });
    }

    pub fn add_member(&self, guild_id: u64, member: MemberSnapshot) {
        let mut state = self.state.lock();
        let guild_id = GuildId::new(guild_id);
        state.members.entry(guild_id).or_default().push(member);
        let count = state.members[&guild_id].len() as u64;
        if let Some(guild) = state.guilds.iter_mut().find(|g| g.id == guild_id) {
            guild.member_count = count;
        }
    }

    pub fn add_role(&self, guild_id: u64, role_id: u64, name: &str, position: u16) {
        self.state
            .lock()
            .roles
            .entry(GuildId::new(guild_id))
            .or_default()
            .push(PlatformRole {
                id: RoleId::new(role_id),
                name: name.to_string(),
                position,
            });
    }

    pub fn add_ban(&self, guild_id: u64, user_id: u64, reason: Option<&str>) {
        self.state
            .lock()
            .bans
            .entry(GuildId::new(guild_id))
            .or_default()
            .push(BanEntry {
                user_id: UserId::new(user_id),
                reason: reason.map(str::to_string),
            });
    }

    /// Append an audit entry; entries added later are older
    pub fn add_audit(
        &self,
        guild_id: u64,
        kind: AuditKind,
        target_id: u64,
        actor_id: u64,
        reason: Option<&str>,
    ) {
        self.state
            .lock()
            .audit
            .entry((GuildId::new(guild_id), kind))
            .or_default()
            .push(AuditEntry {
                target_id: Some(target_id),
                actor_id: Some(UserId::new(actor_id)),
                reason: reason.map(str::to_string),
            });
    }

    pub fn issued_bans(&self) -> Vec<(GuildId, UserId, String)> {
        self.state.lock().issued_bans.clone()
    }

    pub fn kicks(&self) -> Vec<(GuildId, UserId, String)> {
        self.state.lock().kicks.clone()
    }

    pub fn member_roles(&self, guild_id: u64, user_id: u64) -> HashSet<RoleId> {
        self.state
            .lock()
            .members
            .get(&GuildId::new(guild_id))
            .and_then(|ms| ms.iter().find(|m| m.user_id == UserId::new(user_id)))
            .map(|m| m.roles.clone())
            .unwrap_or_default()
    }
}

fn denied() -> BotError {
    BotError::MissingPermissions {
        message: "Missing Permissions".to_string(),
    }
}

pub fn member(user_id: u64, joined_at: Option<DateTime<Utc>>) -> MemberSnapshot {
    MemberSnapshot {
        user_id: UserId::new(user_id),
        tag: format!("user{}", user_id),
        is_bot: false,
        joined_at,
        roles: HashSet::new(),
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn guilds(&self) -> Result<Vec<GuildSummary>> {
        let mut state = self.state.lock();
        state.guild_listings.push(Instant::now());
        if state.fail_guild_listings {
            return Err(BotError::Discord {
                message: "Service Unavailable".to_string(),
            });
        }
        Ok(state.guilds.clone())
    }

    async fn guild(&self, guild_id: GuildId) -> Result<Option<GuildSummary>> {
        Ok(self
            .state
            .lock()
            .guilds
            .iter()
            .find(|g| g.id == guild_id)
            .cloned())
    }

    async fn members(&self, guild_id: GuildId) -> Result<Vec<MemberSnapshot>> {
        let mut state = self.state.lock();
        state.member_listings.push((guild_id, Instant::now()));
        Ok(state.members.get(&guild_id).cloned().unwrap_or_default())
    }

    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<MemberSnapshot>> {
        Ok(self
            .state
            .lock()
            .members
            .get(&guild_id)
            .and_then(|ms| ms.iter().find(|m| m.user_id == user_id))
            .cloned())
    }

    async fn roles(&self, guild_id: GuildId) -> Result<Vec<PlatformRole>> {
        Ok(self
            .state
            .lock()
            .roles
            .get(&guild_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn bot_role_position(&self, _guild_id: GuildId) -> Result<u16> {
        Ok(self.state.lock().bot_position)
    }

    async fn add_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<()> {
        let mut state = self.state.lock();
        if state.deny_role_changes || state.deny_roles.contains(&role_id) {
            return Err(denied());
        }
        state.added_roles.push((guild_id, user_id, role_id));
        if let Some(m) = state
            .members
            .get_mut(&guild_id)
            .and_then(|ms| ms.iter_mut().find(|m| m.user_id == user_id))
        {
            m.roles.insert(role_id);
        }
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.deny_role_changes || state.deny_roles.contains(&role_id) {
            return Err(denied());
        }
        state.removed_roles.push((guild_id, user_id, role_id));
        if let Some(m) = state
            .members
            .get_mut(&guild_id)
            .and_then(|ms| ms.iter_mut().find(|m| m.user_id == user_id))
        {
            m.roles.remove(&role_id);
        }
        Ok(())
    }

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.deny_bans_for.contains(&user_id) {
            return Err(denied());
        }
        state
            .issued_bans
            .push((guild_id, user_id, reason.to_string()));
        let bans = state.bans.entry(guild_id).or_default();
        if !bans.iter().any(|b| b.user_id == user_id) {
            bans.push(BanEntry {
                user_id,
                reason: Some(reason.to_string()),
            });
        }
        if let Some(ms) = state.members.get_mut(&guild_id) {
            ms.retain(|m| m.user_id != user_id);
        }
        Ok(())
    }

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.kicks.push((guild_id, user_id, reason.to_string()));
        if let Some(ms) = state.members.get_mut(&guild_id) {
            ms.retain(|m| m.user_id != user_id);
        }
        Ok(())
    }

    async fn bans(&self, guild_id: GuildId) -> Result<Vec<BanEntry>> {
        Ok(self
            .state
            .lock()
            .bans
            .get(&guild_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn ban_of(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<BanEntry>> {
        Ok(self
            .state
            .lock()
            .bans
            .get(&guild_id)
            .and_then(|bs| bs.iter().find(|b| b.user_id == user_id))
            .cloned())
    }

    async fn audit_log(&self, guild_id: GuildId, kind: AuditKind) -> Result<Vec<AuditEntry>> {
        Ok(self
            .state
            .lock()
            .audit
            .get(&(guild_id, kind))
            .cloned()
            .unwrap_or_default())
    }
}

/// Forum double answering from a fixed table
#[derive(Default)]
pub struct FakeRoleSource {
    roles: Mutex<HashMap<u64, Vec<u64>>>,
    failing: Mutex<HashSet<u64>>,
    pub lookups: Mutex<Vec<(u64, Instant)>>,
}

impl FakeRoleSource {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_roles(&self, external_user_id: u64, role_ids: &[u64]) {
        self.roles.lock().insert(external_user_id, role_ids.to_vec());
    }

    /// Lookups for this user time out
    pub fn fail_for(&self, external_user_id: u64) {
        self.failing.lock().insert(external_user_id);
    }

    pub fn lookups(&self) -> Vec<(u64, Instant)> {
        self.lookups.lock().clone()
    }
}

#[async_trait]
impl RoleSource for FakeRoleSource {
    async fn role_ids(&self, external_user_id: u64) -> Result<Vec<u64>> {
        self.lookups.lock().push((external_user_id, Instant::now()));
        if self.failing.lock().contains(&external_user_id) {
            return Err(BotError::ForumTimeout {
                external_id: external_user_id,
            });
        }
        Ok(self
            .roles
            .lock()
            .get(&external_user_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Bot state wired to the doubles, with an in-memory store and no audit grace
pub fn test_data(platform: Arc<FakePlatform>, forum: Option<Arc<FakeRoleSource>>) -> Data {
    let settings = Settings {
        discord_token: "test".to_string(),
        forum_role_api_url: None,
        forum_role_api_delay: Duration::from_millis(100),
        forum_banned_role_id: None,
        state_path: String::new(),
        ban_audit_grace: Duration::ZERO,
    };
    Data::new(
        &settings,
        create_shared_store(Store::in_memory()),
        platform,
        forum.map(|f| f as SharedRoleSource),
    )
}
