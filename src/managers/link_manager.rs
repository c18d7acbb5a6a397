use poise::serenity_prelude::{GuildId, UserId};
use std::sync::Arc;
use tracing::info;

use crate::error::{BotError, Result};
use crate::platform::SharedPlatform;
use crate::state::{LinkedIdentity, SharedStore};

/// Longest verification code handed out by the forum
pub const MAX_CODE_LENGTH: usize = 20;

/// Links between Discord and forum accounts, and the whitelist
pub struct LinkManager {
    store: SharedStore,
    platform: SharedPlatform,
}

impl LinkManager {
    pub fn new(store: SharedStore, platform: SharedPlatform) -> Self {
        Self { store, platform }
    }

    /// Link the caller to the forum account that requested `code`. The code is
    /// only consumed when the link is created.
    pub async fn verify(&self, user_id: UserId, code: &str) -> Result<LinkedIdentity> {
        let code = code.trim();
        if code.is_empty() || code.len() > MAX_CODE_LENGTH {
            return Err(invalid_code());
        }

        let link = self
            .store
            .update(|db| {
                let pending = db.pending_by_code(code).cloned().ok_or_else(invalid_code)?;

                if db.link_by_external(pending.external_user_id).is_some() {
                    return Err(BotError::LinkConflict {
                        message: "Your forum account is already linked! Contact a staff if you want to get unlinked.".to_string(),
                    });
                }
                if db.link_by_platform(user_id.get()).is_some() {
                    return Err(BotError::LinkConflict {
                        message: "Your Discord account is already linked! Contact a staff if you want to get unlinked.".to_string(),
                    });
                }

                let link = LinkedIdentity::new(
                    user_id.get(),
                    pending.external_user_id,
                    &pending.external_username,
                );
                db.save_link(link.clone())?;
                db.take_pending(code);
                Ok(link)
            })
            .await??;

        info!(
            "Linked {} to forum user {} ({})",
            user_id, link.external_username, link.external_user_id
        );
        Ok(link)
    }

    /// Manual link by staff
    pub async fn link(
        &self,
        user_id: UserId,
        external_user_id: u64,
        external_username: &str,
    ) -> Result<LinkedIdentity> {
        let link = LinkedIdentity::new(user_id.get(), external_user_id, external_username);
        self.store
            .update(|db| {
                if let Some(existing) = db.link_by_external(external_user_id) {
                    return Err(BotError::LinkConflict {
                        message: format!(
                            "Forum user \"{}\" (UID: {}) is already linked to <@{}>.",
                            existing.external_username,
                            existing.external_user_id,
                            existing.platform_user_id
                        ),
                    });
                }
                if let Some(existing) = db.link_by_platform(user_id.get()) {
                    return Err(BotError::LinkConflict {
                        message: format!(
                            "That Discord user ({}) is already linked to \"{}\" (UID: {}).",
                            user_id, existing.external_username, existing.external_user_id
                        ),
                    });
                }
                db.save_link(link.clone())
            })
            .await??;

        info!(
            "Added link of {} to forum user {} ({})",
            user_id, link.external_username, link.external_user_id
        );
        Ok(link)
    }

    /// Remove a link. Refused while the user is banned, either by a stored
    /// record or on `guild_id`, unless `force` is set.
    pub async fn unlink(&self, guild_id: GuildId, user_id: UserId, force: bool) -> Result<LinkedIdentity> {
        if !force {
            let recorded = self
                .store
                .read()
                .await
                .bans_for_user(user_id.get())
                .first()
                .map(|b| b.reason.clone());

            let reason = match recorded {
                Some(reason) => Some(reason),
                None => self
                    .platform
                    .ban_of(guild_id, user_id)
                    .await?
                    .map(|b| b.reason.unwrap_or_else(|| "Unknown reason".to_string())),
            };

            if let Some(reason) = reason {
                return Err(BotError::ActiveBan {
                    user_id: user_id.get(),
                    reason,
                });
            }
        }

        let removed = self
            .store
            .update(|db| db.delete_link(user_id.get()))
            .await?
            .ok_or_else(|| BotError::NotFound {
                message: "User not found! Make sure the given ID exists.".to_string(),
            })?;

        info!(
            "Unlinked {} from forum user {} ({})",
            user_id, removed.external_username, removed.external_user_id
        );
        Ok(removed)
    }

    /// Returns whether the flag changed
    pub async fn set_whitelisted(&self, user_id: UserId, whitelisted: bool) -> Result<bool> {
        let changed = self
            .store
            .update(|db| {
                if db.is_whitelisted(user_id.get()) == whitelisted {
                    return false;
                }
                db.set_whitelisted(user_id.get(), whitelisted);
                true
            })
            .await?;

        if changed {
            info!("Whitelist status of {} set to {}", user_id, whitelisted);
        }
        Ok(changed)
    }
}

fn invalid_code() -> BotError {
    BotError::InvalidInput {
        message: "Please check the validity of your code and try again.".to_string(),
    }
}

/// Shared link manager type
pub type SharedLinkManager = Arc<LinkManager>;

pub fn create_shared_link_manager(manager: LinkManager) -> SharedLinkManager {
    Arc::new(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{create_shared_store, BanRecord, PendingVerification, Store};
    use crate::testing::FakePlatform;

    const GUILD: u64 = 1;

    async fn setup() -> (SharedStore, Arc<FakePlatform>, LinkManager) {
        let store = create_shared_store(Store::in_memory());
        let platform = FakePlatform::shared();
        store
            .update(|db| db.save_pending(PendingVerification::new(50, "forumuser", "abc123")))
            .await
            .unwrap();
        let manager = LinkManager::new(store.clone(), platform.clone());
        (store, platform, manager)
    }

    #[tokio::test]
    async fn test_verify_consumes_code() {
        let (store, _platform, manager) = setup().await;

        let link = manager.verify(UserId::new(5), "abc123").await.unwrap();
        assert_eq!(link.external_user_id, 50);

        let db = store.read().await;
        assert!(db.pending_by_code("abc123").is_none());
        assert_eq!(db.link_by_platform(5).unwrap().external_username, "forumuser");
        drop(db);

        assert!(matches!(
            manager.verify(UserId::new(6), "abc123").await,
            Err(BotError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_refuses_linked_account_and_keeps_code() {
        let (store, _platform, manager) = setup().await;
        manager.link(UserId::new(5), 77, "someone").await.unwrap();

        assert!(matches!(
            manager.verify(UserId::new(5), "abc123").await,
            Err(BotError::LinkConflict { .. })
        ));
        assert!(store.read().await.pending_by_code("abc123").is_some());
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_codes() {
        let (_store, _platform, manager) = setup().await;

        for code in ["", "   ", "this-code-is-far-too-long-to-be-real"] {
            assert!(matches!(
                manager.verify(UserId::new(5), code).await,
                Err(BotError::InvalidInput { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_link_is_one_to_one() {
        let (_store, _platform, manager) = setup().await;
        manager.link(UserId::new(5), 77, "a").await.unwrap();

        assert!(manager.link(UserId::new(6), 77, "b").await.is_err());
        assert!(manager.link(UserId::new(5), 78, "c").await.is_err());
    }

    #[tokio::test]
    async fn test_unlink_refused_while_banned() {
        let (store, _platform, manager) = setup().await;
        manager.link(UserId::new(5), 77, "a").await.unwrap();
        store
            .update(|db| db.insert_ban(BanRecord::new(GUILD, 5, 0, Some("spam"))))
            .await
            .unwrap();

        match manager.unlink(GuildId::new(GUILD), UserId::new(5), false).await {
            Err(BotError::ActiveBan { reason, .. }) => assert_eq!(reason, "spam"),
            other => panic!("expected active ban, got {:?}", other),
        }

        manager
            .unlink(GuildId::new(GUILD), UserId::new(5), true)
            .await
            .unwrap();
        assert!(store.read().await.link_by_platform(5).is_none());
    }

    #[tokio::test]
    async fn test_unlink_checks_guild_ban_list() {
        let (_store, platform, manager) = setup().await;
        manager.link(UserId::new(5), 77, "a").await.unwrap();
        platform.add_ban(GUILD, 5, None);

        assert!(matches!(
            manager.unlink(GuildId::new(GUILD), UserId::new(5), false).await,
            Err(BotError::ActiveBan { .. })
        ));
    }

    #[tokio::test]
    async fn test_unlink_unknown_user() {
        let (_store, _platform, manager) = setup().await;
        assert!(matches!(
            manager.unlink(GuildId::new(GUILD), UserId::new(9), false).await,
            Err(BotError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_whitelist_toggle() {
        let (store, _platform, manager) = setup().await;

        assert!(manager.set_whitelisted(UserId::new(5), true).await.unwrap());
        assert!(!manager.set_whitelisted(UserId::new(5), true).await.unwrap());
        assert!(store.read().await.is_whitelisted(5));
        assert!(manager.set_whitelisted(UserId::new(5), false).await.unwrap());
    }
}
