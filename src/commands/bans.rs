use tracing::{error, info};

use super::{parse_snowflake, require_guild_perms, GuildPerm};
use crate::error::BotError;
use crate::{Context, Error};

/// Synchronise bans between Discord and the database
#[poise::command(slash_command, guild_only, default_member_permissions = "BAN_MEMBERS")]
pub async fn sync_bans(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command must be used in a guild")?;
    if !require_guild_perms(ctx, &[GuildPerm::Read, GuildPerm::Write, GuildPerm::BanSync]).await? {
        return Ok(());
    }

    ctx.defer().await?;
    match ctx.data().ban_manager.resync(guild_id).await {
        Ok(summary) => {
            ctx.say(summary.message()).await?;
        }
        Err(e) => {
            error!("Could not sync ban list of {}: {}", guild_id, e);
            ctx.say("Could not request ban list of this guild!").await?;
        }
    }
    Ok(())
}

/// Import all saved bans from another guild and ban matching members
#[poise::command(slash_command, guild_only, default_member_permissions = "BAN_MEMBERS")]
pub async fn import_bans(
    ctx: Context<'_>,
    #[description = "ID of the guild to import bans from"] guild_id: String,
) -> Result<(), Error> {
    let target = ctx.guild_id().ok_or("This command must be used in a guild")?;
    if !require_guild_perms(ctx, &[GuildPerm::Read]).await? {
        return Ok(());
    }

    let Some(source) = parse_snowflake(&guild_id) else {
        ctx.say("Please provide a guild ID to import bans from.").await?;
        return Ok(());
    };

    ctx.defer().await?;
    match ctx.data().ban_manager.import_from_guild(target, source).await {
        Ok(summary) => {
            info!(
                "{} imported {} bans from {} ({} banned, {} not present)",
                target, summary.imported, source, summary.banned, summary.absent
            );
            let mut reply = format!(
                "Imported **{}** ban(s) from guild {}. Banned {} member(s) of this guild.",
                summary.imported, source, summary.banned
            );
            if summary.skipped > 0 {
                reply.push_str(&format!(" {} ban(s) were already on record.", summary.skipped));
            }
            if summary.failed > 0 {
                reply.push_str(&format!(" {} ban(s) could not be applied.", summary.failed));
            }
            ctx.say(reply).await?;
        }
        Err(BotError::InvalidInput { message }) => {
            ctx.say(message).await?;
        }
        Err(BotError::GuildNotFound { id }) => {
            ctx.say(format!(
                "Can not find guild with ID {}. Make sure your ID is correct and try again.",
                id
            ))
            .await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
