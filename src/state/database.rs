use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

use super::records::{
    current_timestamp, role_name_key, BanRecord, GuildConfig, LinkedIdentity, PendingVerification,
    PlatformUser, RoleDefinition,
};
use crate::error::{BotError, Result};

/// File name of the database inside the state directory
pub const STATE_FILE: &str = "rolewarden.json";

const SCHEMA_VERSION: u32 = 1;

/// A user as seen from one guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub user_id: u64,
    pub whitelisted: bool,
    /// Reason of the ban on the guild asked about
    pub ban_reason: Option<String>,
    pub link: Option<LinkedIdentity>,
}

/// Everything the bot persists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    /// Schema version for migrations
    pub version: u32,

    /// Last update timestamp
    pub last_updated: u64,

    #[serde(default)]
    guilds: HashMap<u64, GuildConfig>,

    #[serde(default)]
    users: HashMap<u64, PlatformUser>,

    /// Platform user id -> link
    #[serde(default)]
    links: HashMap<u64, LinkedIdentity>,

    /// External role id -> definition
    #[serde(default)]
    roles: HashMap<u64, RoleDefinition>,

    /// Guild id -> user id -> ban. Nesting keeps (guild, user) unique.
    #[serde(default)]
    bans: HashMap<u64, HashMap<u64, BanRecord>>,

    /// Verification code -> pending link
    #[serde(default)]
    pending: HashMap<String, PendingVerification>,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            last_updated: current_timestamp(),
            guilds: HashMap::new(),
            users: HashMap::new(),
            links: HashMap::new(),
            roles: HashMap::new(),
            bans: HashMap::new(),
            pending: HashMap::new(),
        }
    }
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file, or create new if not exists
    pub async fn load(path: &str) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| BotError::StateParse {
                path: path.to_string(),
                source: e,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(BotError::StateLoad {
                path: path.to_string(),
                source: e,
            }),
        }
    }

    /// Save to a JSON file atomically
    pub async fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = format!("{}.tmp", path);
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| BotError::StateSave {
                path: path.to_string(),
                source: e,
            })?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| BotError::StateSave {
                path: path.to_string(),
                source: e,
            })?;

        Ok(())
    }

    fn touch(&mut self) {
        self.last_updated = current_timestamp();
    }

    // Guilds

    pub fn guild(&self, guild_id: u64) -> Option<&GuildConfig> {
        self.guilds.get(&guild_id)
    }

    pub fn guild_exists(&self, guild_id: u64) -> bool {
        self.guilds.contains_key(&guild_id)
    }

    /// Get the guild config, creating the all-off default on first access
    pub fn guild_or_default(&mut self, guild_id: u64) -> &mut GuildConfig {
        self.last_updated = current_timestamp();
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| GuildConfig::new_default(guild_id))
    }

    /// Returns true if the config had to be created
    pub fn ensure_guild(&mut self, guild_id: u64) -> bool {
        if self.guild_exists(guild_id) {
            return false;
        }
        self.guild_or_default(guild_id);
        true
    }

    // Users and links

    pub fn user(&self, user_id: u64) -> Option<&PlatformUser> {
        self.users.get(&user_id)
    }

    pub fn is_whitelisted(&self, user_id: u64) -> bool {
        self.users
            .get(&user_id)
            .map(|u| u.whitelisted)
            .unwrap_or(false)
    }

    pub fn set_whitelisted(&mut self, user_id: u64, whitelisted: bool) {
        self.users
            .entry(user_id)
            .or_insert_with(|| PlatformUser {
                user_id,
                whitelisted: false,
            })
            .whitelisted = whitelisted;
        self.touch();
    }

    pub fn link_by_platform(&self, platform_user_id: u64) -> Option<&LinkedIdentity> {
        self.links.get(&platform_user_id)
    }

    pub fn link_by_external(&self, external_user_id: u64) -> Option<&LinkedIdentity> {
        self.links
            .values()
            .find(|l| l.external_user_id == external_user_id)
    }

    /// Link of an id that may be a forum user id or a Discord user id.
    /// Forum ids win when both match.
    pub fn link_by_any(&self, id: u64) -> Option<&LinkedIdentity> {
        self.link_by_external(id)
            .or_else(|| self.link_by_platform(id))
    }

    /// What the bot knows about a user on one guild. `None` when the id is
    /// neither linked nor has a user or ban record.
    pub fn user_summary(&self, guild_id: u64, id: u64) -> Option<UserSummary> {
        let link = self.link_by_any(id).cloned();
        let user_id = link.as_ref().map_or(id, |l| l.platform_user_id);
        let known = link.is_some()
            || self.users.contains_key(&user_id)
            || !self.bans_for_user(user_id).is_empty();
        if !known {
            return None;
        }

        Some(UserSummary {
            user_id,
            whitelisted: self.is_whitelisted(user_id),
            ban_reason: self.ban(guild_id, user_id).map(|b| b.reason.clone()),
            link,
        })
    }

    /// Store a link, refusing it if either side is already linked to someone else
    pub fn save_link(&mut self, link: LinkedIdentity) -> Result<()> {
        if let Some(existing) = self.link_by_external(link.external_user_id) {
            if existing.platform_user_id != link.platform_user_id {
                return Err(BotError::LinkConflict {
                    message: format!(
                        "Forum account {} is already linked to {}",
                        link.external_user_id, existing.platform_user_id
                    ),
                });
            }
        }
        if let Some(existing) = self.link_by_platform(link.platform_user_id) {
            if existing.external_user_id != link.external_user_id {
                return Err(BotError::LinkConflict {
                    message: format!(
                        "Discord account {} is already linked to forum account {}",
                        link.platform_user_id, existing.external_user_id
                    ),
                });
            }
        }

        self.users
            .entry(link.platform_user_id)
            .or_insert_with(|| PlatformUser {
                user_id: link.platform_user_id,
                whitelisted: false,
            });
        self.links.insert(link.platform_user_id, link);
        self.touch();
        Ok(())
    }

    pub fn delete_link(&mut self, platform_user_id: u64) -> Option<LinkedIdentity> {
        let removed = self.links.remove(&platform_user_id);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    // Role definitions

    pub fn role_definition(&self, external_role_id: u64) -> Option<&RoleDefinition> {
        self.roles.get(&external_role_id)
    }

    /// All definitions ordered by external id
    pub fn role_definitions(&self) -> Vec<RoleDefinition> {
        let mut defs: Vec<RoleDefinition> = self.roles.values().cloned().collect();
        defs.sort_by_key(|d| d.external_role_id);
        defs
    }

    /// Definitions granting the same platform role as `name`
    pub fn role_definitions_by_name(&self, name: &str) -> Vec<&RoleDefinition> {
        let key = role_name_key(name);
        self.roles
            .values()
            .filter(|d| role_name_key(&d.name) == key)
            .collect()
    }

    pub fn save_role_definition(&mut self, definition: RoleDefinition) {
        self.roles.insert(definition.external_role_id, definition);
        self.touch();
    }

    pub fn delete_role_definition(&mut self, external_role_id: u64) -> Option<RoleDefinition> {
        let removed = self.roles.remove(&external_role_id);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    // Bans

    pub fn ban(&self, guild_id: u64, user_id: u64) -> Option<&BanRecord> {
        self.bans.get(&guild_id).and_then(|g| g.get(&user_id))
    }

    pub fn ban_exists(&self, guild_id: u64, user_id: u64) -> bool {
        self.ban(guild_id, user_id).is_some()
    }

    /// Insert a ban record. Returns false (and changes nothing) if one already
    /// exists for the same guild and user.
    pub fn insert_ban(&mut self, record: BanRecord) -> bool {
        let guild_bans = self.bans.entry(record.guild_id).or_default();
        if guild_bans.contains_key(&record.user_id) {
            return false;
        }
        guild_bans.insert(record.user_id, record);
        self.touch();
        true
    }

    pub fn delete_ban(&mut self, guild_id: u64, user_id: u64) -> Option<BanRecord> {
        let removed = self.bans.get_mut(&guild_id).and_then(|g| g.remove(&user_id));
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Bans of one guild ordered by user id
    pub fn bans_for_guild(&self, guild_id: u64) -> Vec<BanRecord> {
        let mut bans: Vec<BanRecord> = self
            .bans
            .get(&guild_id)
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default();
        bans.sort_by_key(|b| b.user_id);
        bans
    }

    pub fn bans_for_user(&self, user_id: u64) -> Vec<&BanRecord> {
        self.bans
            .values()
            .filter_map(|g| g.get(&user_id))
            .collect()
    }

    pub fn ban_count(&self) -> usize {
        self.bans.values().map(HashMap::len).sum()
    }

    // Pending verifications

    pub fn pending_by_code(&self, code: &str) -> Option<&PendingVerification> {
        self.pending.get(code)
    }

    pub fn save_pending(&mut self, pending: PendingVerification) {
        self.pending.insert(pending.code.clone(), pending);
        self.touch();
    }

    /// Remove and return the pending verification for a code
    pub fn take_pending(&mut self, code: &str) -> Option<PendingVerification> {
        let taken = self.pending.remove(code);
        if taken.is_some() {
            self.touch();
        }
        taken
    }
}

/// The database plus the file it is persisted to
pub struct Store {
    db: RwLock<Database>,
    path: Option<String>,
}

impl Store {
    /// Open (or create) the database inside a state directory
    pub async fn open(state_dir: &str) -> Result<Self> {
        tokio::fs::create_dir_all(state_dir).await?;
        let path = format!("{}/{}", state_dir, STATE_FILE);
        let db = Database::load(&path).await?;

        Ok(Self {
            db: RwLock::new(db),
            path: Some(path),
        })
    }

    /// A store that never touches the disk
    pub fn in_memory() -> Self {
        Self {
            db: RwLock::new(Database::new()),
            path: None,
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Database> {
        self.db.read().await
    }

    /// Apply a mutation and persist the result. The write lock is held until
    /// the file is written so saves never interleave. A failed save leaves the
    /// database as it was.
    pub async fn update<R>(&self, f: impl FnOnce(&mut Database) -> R) -> Result<R> {
        let mut db = self.db.write().await;
        let Some(path) = &self.path else {
            return Ok(f(&mut db));
        };

        // Changes only become visible once they are on disk
        let mut next = db.clone();
        let result = f(&mut next);
        next.save(path).await?;
        *db = next;
        Ok(result)
    }
}

/// Shared store type
pub type SharedStore = Arc<Store>;

pub fn create_shared_store(store: Store) -> SharedStore {
    Arc::new(store)
}
