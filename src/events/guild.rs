use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{Data, Error};

/// Handle when the bot joins a new guild or starts up. A guild seen for the
/// first time gets default settings and its current ban list imported.
pub async fn handle_guild_create(guild: &serenity::Guild, data: &Data) -> Result<(), Error> {
    guild_seen(guild.id, &guild.name, data).await?;
    Ok(())
}

/// Returns the ban import task when the guild was new
async fn guild_seen(
    guild_id: serenity::GuildId,
    guild_name: &str,
    data: &Data,
) -> Result<Option<JoinHandle<()>>, Error> {
    let created = data.store.update(|db| db.ensure_guild(guild_id.get())).await?;
    if !created {
        return Ok(None);
    }

    info!(
        "Added \"{}\" ({}) to the database with default settings. Importing guild bans...",
        guild_name, guild_id
    );

    let ban_manager = Arc::clone(&data.ban_manager);
    let guild_name = guild_name.to_string();
    Ok(Some(tokio::spawn(async move {
        match ban_manager.resync(guild_id).await {
            Ok(summary) => info!(
                "Imported {} bans of \"{}\" ({})",
                summary.added, guild_name, guild_id
            ),
            Err(e) => error!("Could not import bans of \"{}\": {}", guild_name, e),
        }
    })))
}
