use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::error;

use crate::{Data, Error};

/// Record a new ban. Capture waits for the audit log, so it runs detached from
/// the gateway loop.
pub async fn handle_ban_add(
    guild_id: serenity::GuildId,
    banned_user: &serenity::User,
    data: &Data,
) -> Result<(), Error> {
    let ban_manager = Arc::clone(&data.ban_manager);
    let user_id = banned_user.id;
    tokio::spawn(async move {
        if let Err(e) = ban_manager.capture_ban(guild_id, user_id).await {
            error!("Failed to record ban of {} on {}: {}", user_id, guild_id, e);
        }
    });
    Ok(())
}

pub async fn handle_ban_remove(
    guild_id: serenity::GuildId,
    unbanned_user: &serenity::User,
    data: &Data,
) -> Result<(), Error> {
    ban_lifted(guild_id, unbanned_user.id, data).await
}

/// Bans are recorded regardless of the guild's ban sync flag, so lifting one
/// must always drop its record
async fn ban_lifted(
    guild_id: serenity::GuildId,
    user_id: serenity::UserId,
    data: &Data,
) -> Result<(), Error> {
    data.ban_manager.capture_unban(guild_id, user_id).await?;
    Ok(())
}
