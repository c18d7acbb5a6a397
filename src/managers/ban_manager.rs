use dashmap::DashSet;
use futures::stream::{self, StreamExt};
use poise::serenity_prelude::{GuildId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{BotError, Result};
use crate::platform::{AuditEntry, AuditKind, SharedPlatform};
use crate::state::{BanRecord, SharedStore};

/// Concurrent ban calls while applying an import
const IMPORT_BAN_CONCURRENCY: usize = 4;

/// Tag prefix marking a ban imported from another guild
const IMPORT_TAG_PREFIX: &str = "[IB";

/// Result of reconciling one guild's ban list with the stored records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BanSyncSummary {
    pub added: usize,
    pub removed: usize,
}

impl BanSyncSummary {
    pub fn message(&self) -> String {
        let plural = |n: usize| if n == 1 { "ban" } else { "bans" };
        match (self.removed, self.added) {
            (0, 0) => "Bans are already in sync.".to_string(),
            (r, 0) => format!("Removed {} {}.", r, plural(r)),
            (0, a) => format!("Added {} {}.", a, plural(a)),
            (r, a) => format!("Removed {} {} and added {} {}.", r, plural(r), a, plural(a)),
        }
    }
}

/// Result of importing another guild's bans
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// New records written for the target guild
    pub imported: usize,
    /// Source bans the target guild already had a record for
    pub skipped: usize,
    /// Imported users that were members and got banned
    pub banned: usize,
    /// Imported users not in the target guild
    pub absent: usize,
    pub failed: usize,
}

enum ApplyOutcome {
    Banned,
    Absent,
    Failed,
}

/// Rewrite a reason to carry the guild it was imported from. An existing
/// import tag is replaced, never nested.
pub fn retag_reason(reason: &str, source_guild_id: u64) -> String {
    let stripped = if reason.starts_with(IMPORT_TAG_PREFIX) {
        reason
            .split_once(':')
            .map(|(_, rest)| rest.trim())
            .unwrap_or(reason)
    } else {
        reason
    };
    format!("{}{}]: {}", IMPORT_TAG_PREFIX, source_guild_id, stripped)
}

/// Newest audit entry for a target. Entries come newest first.
fn first_match(entries: &[AuditEntry], target_id: u64) -> Option<&AuditEntry> {
    entries.iter().find(|e| e.target_id == Some(target_id))
}

/// Build a record from a ban and its audit entry, if any
fn record_from(
    guild_id: GuildId,
    user_id: UserId,
    ban_reason: Option<&str>,
    entry: Option<&AuditEntry>,
) -> BanRecord {
    let ban_reason = ban_reason.filter(|r| !r.trim().is_empty());
    match entry {
        Some(entry) => BanRecord::new(
            guild_id.get(),
            user_id.get(),
            entry.actor_id.map(|a| a.get()).unwrap_or(0),
            ban_reason.or(entry.reason.as_deref()),
        ),
        None => BanRecord::with_unknown_actor(guild_id.get(), user_id.get(), ban_reason),
    }
}

/// Keeps stored ban records in line with the guilds' ban lists
pub struct BanManager {
    store: SharedStore,
    platform: SharedPlatform,
    /// Wait before reading a ban's audit log entry
    grace: Duration,
    /// Bans captured right now, keyed by (guild, user)
    in_flight: DashSet<(u64, u64)>,
}

impl BanManager {
    pub fn new(store: SharedStore, platform: SharedPlatform, grace: Duration) -> Self {
        Self {
            store,
            platform,
            grace,
            in_flight: DashSet::new(),
        }
    }

    /// Record a ban that just happened. Returns whether a record was written.
    pub async fn capture_ban(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        let key = (guild_id.get(), user_id.get());
        if self.store.read().await.ban_exists(key.0, key.1) {
            debug!("Ban of {} on {} already recorded", user_id, guild_id);
            return Ok(false);
        }
        if !self.in_flight.insert(key) {
            return Ok(false);
        }

        let result = self.record_ban(guild_id, user_id).await;
        self.in_flight.remove(&key);
        result
    }

    async fn record_ban(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        tokio::time::sleep(self.grace).await;

        let Some(ban) = self.platform.ban_of(guild_id, user_id).await? else {
            warn!(
                "Could not retrieve ban of {} on {}, maybe already unbanned?",
                user_id, guild_id
            );
            return Ok(false);
        };

        let entries = self
            .platform
            .audit_log(guild_id, AuditKind::Ban)
            .await
            .unwrap_or_else(|e| {
                warn!("Could not read ban audit log of {}: {}", guild_id, e);
                Vec::new()
            });
        let entry = first_match(&entries, user_id.get());
        if entry.is_none() {
            warn!(
                "Received ban event for user {} in guild {} but could not find matching audit log entry!",
                user_id, guild_id
            );
        }

        let record = record_from(guild_id, user_id, ban.reason.as_deref(), entry);
        debug!(
            "{} got banned on {} by {} for \"{}\"",
            user_id, guild_id, record.actor_id, record.reason
        );
        self.store.update(|db| db.insert_ban(record)).await
    }

    /// Drop the record of a lifted ban. The unban's actor is looked up in the
    /// background for the log only.
    pub async fn capture_unban(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<BanRecord>> {
        let removed = self
            .store
            .update(|db| db.delete_ban(guild_id.get(), user_id.get()))
            .await?;

        if removed.is_none() {
            warn!(
                "{} got unbanned on {} but no database entry could be found!",
                user_id, guild_id
            );
        }

        tokio::spawn(log_unban_actor(
            Arc::clone(&self.platform),
            self.grace,
            guild_id,
            user_id,
        ));
        Ok(removed)
    }

    /// Reconcile stored records with the guild's current ban list
    pub async fn resync(&self, guild_id: GuildId) -> Result<BanSyncSummary> {
        let platform_bans = self.platform.bans(guild_id).await?;
        let stored = self.store.read().await.bans_for_guild(guild_id.get());

        let banned_ids: HashSet<u64> = platform_bans.iter().map(|b| b.user_id.get()).collect();
        let stored_ids: HashSet<u64> = stored.iter().map(|r| r.user_id).collect();

        let to_remove: Vec<u64> = stored_ids.difference(&banned_ids).copied().collect();
        let to_add: Vec<_> = platform_bans
            .iter()
            .filter(|b| !stored_ids.contains(&b.user_id.get()))
            .collect();

        let entries = if to_add.is_empty() {
            Vec::new()
        } else {
            self.platform
                .audit_log(guild_id, AuditKind::Ban)
                .await
                .unwrap_or_else(|e| {
                    warn!("Could not read ban audit log of {}: {}", guild_id, e);
                    Vec::new()
                })
        };

        let records: Vec<BanRecord> = to_add
            .iter()
            .map(|ban| {
                record_from(
                    guild_id,
                    ban.user_id,
                    ban.reason.as_deref(),
                    first_match(&entries, ban.user_id.get()),
                )
            })
            .collect();

        let summary = self
            .store
            .update(|db| {
                let mut summary = BanSyncSummary::default();
                for user_id in &to_remove {
                    if db.delete_ban(guild_id.get(), *user_id).is_some() {
                        summary.removed += 1;
                    }
                }
                for record in records {
                    if db.insert_ban(record) {
                        summary.added += 1;
                    }
                }
                summary
            })
            .await?;

        info!(
            "Synced bans of {}: removed {}, added {}",
            guild_id, summary.removed, summary.added
        );
        Ok(summary)
    }

    /// Copy another guild's ban records into `target` and ban the affected
    /// users that are currently members of it.
    pub async fn import_from_guild(&self, target: GuildId, source_guild_id: u64) -> Result<ImportSummary> {
        if target.get() == source_guild_id {
            return Err(BotError::InvalidInput {
                message: "Please do not provide your own guild ID.".to_string(),
            });
        }

        let (imported, skipped) = self
            .store
            .update(|db| {
                if !db.guild_exists(source_guild_id) {
                    return Err(BotError::GuildNotFound {
                        id: source_guild_id.to_string(),
                    });
                }
                db.ensure_guild(target.get());

                let mut imported = Vec::new();
                let mut skipped = 0;
                for source in db.bans_for_guild(source_guild_id) {
                    let record = BanRecord::new(
                        target.get(),
                        source.user_id,
                        source.actor_id,
                        Some(&retag_reason(&source.reason, source_guild_id)),
                    );
                    if db.insert_ban(record.clone()) {
                        imported.push(record);
                    } else {
                        skipped += 1;
                    }
                }
                Ok((imported, skipped))
            })
            .await??;

        info!(
            "Guild {} imported {} bans from guild {}",
            target,
            imported.len(),
            source_guild_id
        );

        let mut summary = ImportSummary {
            imported: imported.len(),
            skipped,
            ..ImportSummary::default()
        };

        let outcomes: Vec<ApplyOutcome> = stream::iter(imported)
            .map(|record| self.apply_imported(target, record))
            .buffer_unordered(IMPORT_BAN_CONCURRENCY)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                ApplyOutcome::Banned => summary.banned += 1,
                ApplyOutcome::Absent => summary.absent += 1,
                ApplyOutcome::Failed => summary.failed += 1,
            }
        }
        Ok(summary)
    }

    async fn apply_imported(&self, guild_id: GuildId, record: BanRecord) -> ApplyOutcome {
        let user_id = UserId::new(record.user_id);
        match self.platform.member(guild_id, user_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!("Banned member {} not present in {}", user_id, guild_id);
                return ApplyOutcome::Absent;
            }
            Err(e) => {
                warn!("Could not look up {} on {}: {}", user_id, guild_id, e);
                return ApplyOutcome::Failed;
            }
        }

        match self.platform.ban(guild_id, user_id, &record.reason).await {
            Ok(()) => ApplyOutcome::Banned,
            Err(e) => {
                warn!("Could not ban imported user {} on {}: {}", user_id, guild_id, e);
                ApplyOutcome::Failed
            }
        }
    }

    /// Re-ban a joining user that has a ban record for this guild
    pub async fn ban_if_recorded(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        let record = self
            .store
            .read()
            .await
            .ban(guild_id.get(), user_id.get())
            .cloned();
        let Some(record) = record else {
            return Ok(false);
        };

        let reason = format!("User found on ban list. Reason: {}", record.reason);
        self.platform.ban(guild_id, user_id, &reason).await?;
        info!("Re-banned {} on joining {}: {}", user_id, guild_id, record.reason);
        Ok(true)
    }
}

/// Log who lifted a ban, returning the actor if the audit log names one
async fn log_unban_actor(
    platform: SharedPlatform,
    grace: Duration,
    guild_id: GuildId,
    user_id: UserId,
) -> Option<UserId> {
    tokio::time::sleep(grace).await;

    let entries = match platform.audit_log(guild_id, AuditKind::Unban).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not read unban audit log of {}: {}", guild_id, e);
            return None;
        }
    };

    let actor = first_match(&entries, user_id.get()).and_then(|e| e.actor_id);
    match actor {
        Some(actor) => debug!("{} got unbanned on {} by {}", user_id, guild_id, actor),
        None => warn!(
            "Received unban event for user {} in guild {} but could not find matching audit log entry!",
            user_id, guild_id
        ),
    }
    actor
}

/// Shared ban manager type
pub type SharedBanManager = Arc<BanManager>;

pub fn create_shared_ban_manager(manager: BanManager) -> SharedBanManager {
    Arc::new(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{create_shared_store, Store};
    use crate::testing::{member, FakePlatform};

    const GUILD: u64 = 123;
    const OTHER: u64 = 456;
    const GRACE: Duration = Duration::from_secs(15);

    fn setup() -> (SharedStore, Arc<FakePlatform>, BanManager) {
        let store = create_shared_store(Store::in_memory());
        let platform = FakePlatform::shared();
        platform.add_guild(GUILD, "Home", 1);
        platform.add_guild(OTHER, "Other", 1);
        let manager = BanManager::new(store.clone(), platform.clone(), GRACE);
        (store, platform, manager)
    }

    #[test]
    fn test_retag_reason_replaces_existing_tag() {
        assert_eq!(retag_reason("[IB123]: foo", 456), "[IB456]: foo");
        assert_eq!(retag_reason("spamming", 456), "[IB456]: spamming");
        assert_eq!(
            retag_reason(&retag_reason("foo", 1), 2),
            "[IB2]: foo"
        );
    }

    #[test]
    fn test_summary_message() {
        let s = |removed, added| BanSyncSummary { added, removed }.message();
        assert_eq!(s(0, 0), "Bans are already in sync.");
        assert_eq!(s(2, 1), "Removed 2 bans and added 1 ban.");
        assert_eq!(s(0, 3), "Added 3 bans.");
        assert_eq!(s(1, 0), "Removed 1 ban.");
    }

    #[test]
    fn test_first_audit_match_is_newest() {
        let entries = vec![
            AuditEntry {
                target_id: Some(9),
                actor_id: Some(UserId::new(1)),
                reason: None,
            },
            AuditEntry {
                target_id: Some(5),
                actor_id: Some(UserId::new(2)),
                reason: Some("new".into()),
            },
            AuditEntry {
                target_id: Some(5),
                actor_id: Some(UserId::new(3)),
                reason: Some("old".into()),
            },
        ];
        let entry = first_match(&entries, 5).unwrap();
        assert_eq!(entry.actor_id, Some(UserId::new(2)));
        assert!(first_match(&entries, 7).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_ban_attributes_actor() {
        let (store, platform, manager) = setup();
        platform.add_ban(GUILD, 5, None);
        platform.add_audit(GUILD, AuditKind::Ban, 5, 77, Some("raiding"));

        assert!(manager.capture_ban(GuildId::new(GUILD), UserId::new(5)).await.unwrap());

        let db = store.read().await;
        let record = db.ban(GUILD, 5).unwrap();
        assert_eq!(record.actor_id, 77);
        assert_eq!(record.reason, "raiding");
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_ban_without_audit_entry() {
        let (store, platform, manager) = setup();
        platform.add_ban(GUILD, 5, Some("ban reason"));

        assert!(manager.capture_ban(GuildId::new(GUILD), UserId::new(5)).await.unwrap());

        let db = store.read().await;
        let record = db.ban(GUILD, 5).unwrap();
        assert!(!record.has_known_actor());
        assert_eq!(record.reason, "ban reason");
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_ban_is_idempotent() {
        let (store, platform, manager) = setup();
        platform.add_ban(GUILD, 5, None);

        assert!(manager.capture_ban(GuildId::new(GUILD), UserId::new(5)).await.unwrap());
        assert!(!manager.capture_ban(GuildId::new(GUILD), UserId::new(5)).await.unwrap());

        let db = store.read().await;
        assert_eq!(db.ban_count(), 1);
        assert_eq!(db.ban(GUILD, 5).unwrap().reason, "No reason given.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_ban_lifted_during_grace() {
        let (store, _platform, manager) = setup();

        assert!(!manager.capture_ban(GuildId::new(GUILD), UserId::new(5)).await.unwrap());
        assert_eq!(store.read().await.ban_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_unban_deletes_without_audit_log() {
        let (store, _platform, manager) = setup();
        store
            .update(|db| db.insert_ban(BanRecord::new(GUILD, 5, 1, Some("x"))))
            .await
            .unwrap();

        let removed = manager
            .capture_unban(GuildId::new(GUILD), UserId::new(5))
            .await
            .unwrap();

        assert!(removed.is_some());
        assert!(!store.read().await.ban_exists(GUILD, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_captures_record_once() {
        let (store, platform, manager) = setup();
        platform.add_ban(GUILD, 5, None);

        let (first, second) = tokio::join!(
            manager.capture_ban(GuildId::new(GUILD), UserId::new(5)),
            manager.capture_ban(GuildId::new(GUILD), UserId::new(5)),
        );

        assert!(first.unwrap() ^ second.unwrap());
        assert_eq!(store.read().await.ban_count(), 1);
        assert!(manager.in_flight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unban_actor_from_audit_log() {
        let platform = FakePlatform::shared();
        platform.add_audit(GUILD, AuditKind::Unban, 5, 77, None);
        platform.add_audit(GUILD, AuditKind::Unban, 5, 78, None);
        platform.add_audit(GUILD, AuditKind::Ban, 6, 79, None);

        let actor = log_unban_actor(platform.clone(), GRACE, GuildId::new(GUILD), UserId::new(5)).await;
        assert_eq!(actor, Some(UserId::new(77)));

        let actor = log_unban_actor(platform, GRACE, GuildId::new(GUILD), UserId::new(6)).await;
        assert_eq!(actor, None);
    }

    #[tokio::test]
    async fn test_resync_adds_and_removes() {
        let (store, platform, manager) = setup();
        store
            .update(|db| {
                db.insert_ban(BanRecord::new(GUILD, 1, 0, Some("stale")));
                db.insert_ban(BanRecord::new(GUILD, 2, 0, Some("kept")));
                db.insert_ban(BanRecord::new(OTHER, 1, 0, Some("other guild")));
            })
            .await
            .unwrap();
        platform.add_ban(GUILD, 2, Some("kept"));
        platform.add_ban(GUILD, 3, None);
        platform.add_audit(GUILD, AuditKind::Ban, 3, 40, Some("newest"));
        platform.add_audit(GUILD, AuditKind::Ban, 3, 41, Some("older"));

        let summary = manager.resync(GuildId::new(GUILD)).await.unwrap();

        assert_eq!(summary, BanSyncSummary { added: 1, removed: 1 });
        let db = store.read().await;
        assert!(!db.ban_exists(GUILD, 1));
        assert!(db.ban_exists(OTHER, 1));
        let added = db.ban(GUILD, 3).unwrap();
        assert_eq!(added.actor_id, 40);
        assert_eq!(added.reason, "newest");
        drop(db);

        let again = manager.resync(GuildId::new(GUILD)).await.unwrap();
        assert_eq!(again.message(), "Bans are already in sync.");
    }

    #[tokio::test]
    async fn test_import_retags_and_bans_present_members() {
        let (store, platform, manager) = setup();
        store
            .update(|db| {
                db.ensure_guild(OTHER);
                db.insert_ban(BanRecord::new(OTHER, 5, 9, Some("[IB123]: foo")));
                db.insert_ban(BanRecord::new(OTHER, 6, 9, Some("bar")));
                db.insert_ban(BanRecord::new(OTHER, 7, 9, Some("baz")));
                db.insert_ban(BanRecord::new(GUILD, 7, 1, Some("already here")));
            })
            .await
            .unwrap();
        platform.add_member(GUILD, member(5, None));

        let summary = manager
            .import_from_guild(GuildId::new(GUILD), OTHER)
            .await
            .unwrap();

        assert_eq!(summary.imported, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.banned, 1);
        assert_eq!(summary.absent, 1);

        let db = store.read().await;
        assert_eq!(db.ban(GUILD, 5).unwrap().reason, "[IB456]: foo");
        assert_eq!(db.ban(GUILD, 5).unwrap().actor_id, 9);
        assert_eq!(db.ban(GUILD, 7).unwrap().reason, "already here");

        let bans = platform.issued_bans();
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].1, UserId::new(5));
        assert_eq!(bans[0].2, "[IB456]: foo");
    }

    #[tokio::test]
    async fn test_import_counts_failed_bans() {
        let (store, platform, manager) = setup();
        store
            .update(|db| {
                db.ensure_guild(OTHER);
                db.insert_ban(BanRecord::new(OTHER, 5, 9, Some("foo")));
                db.insert_ban(BanRecord::new(OTHER, 6, 9, Some("bar")));
            })
            .await
            .unwrap();
        platform.add_member(GUILD, member(5, None));
        platform.add_member(GUILD, member(6, None));
        platform.state.lock().deny_bans_for.insert(UserId::new(6));

        let summary = manager
            .import_from_guild(GuildId::new(GUILD), OTHER)
            .await
            .unwrap();

        assert_eq!(summary.imported, 2);
        assert_eq!(summary.banned, 1);
        assert_eq!(summary.failed, 1);
        // the record stays so the user is banned on rejoin
        assert!(store.read().await.ban_exists(GUILD, 6));
    }

    #[tokio::test]
    async fn test_import_rejects_own_and_unknown_guild() {
        let (_store, _platform, manager) = setup();

        assert!(matches!(
            manager.import_from_guild(GuildId::new(GUILD), GUILD).await,
            Err(BotError::InvalidInput { .. })
        ));
        assert!(matches!(
            manager.import_from_guild(GuildId::new(GUILD), 999).await,
            Err(BotError::GuildNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejoining_banned_user_is_banned_again() {
        let (store, platform, manager) = setup();
        store
            .update(|db| db.insert_ban(BanRecord::new(GUILD, 5, 1, Some("spam"))))
            .await
            .unwrap();

        assert!(manager
            .ban_if_recorded(GuildId::new(GUILD), UserId::new(5))
            .await
            .unwrap());
        assert!(!manager
            .ban_if_recorded(GuildId::new(GUILD), UserId::new(6))
            .await
            .unwrap());
        assert_eq!(
            platform.issued_bans()[0].2,
            "User found on ban list. Reason: spam"
        );
    }
}
