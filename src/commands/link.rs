use poise::serenity_prelude as serenity;
use tracing::{info, warn};

use super::{require_guild_perms, GuildPerm};
use crate::error::BotError;
use crate::sync::MemberOutcome;
use crate::{Context, Error};

async fn say_ephemeral(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(
        poise::CreateReply::default()
            .content(content.into())
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Sync a freshly linked member, if the forum is configured
async fn sync_after_link(ctx: Context<'_>, user_id: serenity::UserId) -> Option<MemberOutcome> {
    let guild_id = ctx.guild_id()?;
    let member_sync = ctx.data().member_sync.as_ref()?;
    match member_sync.sync_user(guild_id, user_id).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!("Could not sync roles of {} after linking: {}", user_id, e);
            None
        }
    }
}

/// Link your Discord account with the code you got on the forum
#[poise::command(slash_command, guild_only)]
pub async fn verify(
    ctx: Context<'_>,
    #[description = "The code you got on the forum"] code: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command must be used in a guild")?;
    let channel_ok = ctx
        .data()
        .store
        .read()
        .await
        .guild(guild_id.get())
        .map_or(true, |g| g.accepts_verification_in(ctx.channel_id().get()));
    if !channel_ok {
        return say_ephemeral(ctx, "Please use this command in the verification channel.").await;
    }

    match ctx.data().link_manager.verify(ctx.author().id, &code).await {
        Ok(link) => {
            let reply = match sync_after_link(ctx, ctx.author().id).await {
                Some(MemberOutcome::Banned) => {
                    "Your account got linked, but you have the banned role on the forum.".to_string()
                }
                _ => format!(
                    "Your Discord account is now linked to forum user **{}**.",
                    link.external_username
                ),
            };
            say_ephemeral(ctx, reply).await
        }
        Err(BotError::InvalidInput { message }) | Err(BotError::LinkConflict { message }) => {
            say_ephemeral(ctx, message).await
        }
        Err(e) => Err(e.into()),
    }
}

/// Link a Discord user to a forum account
#[poise::command(slash_command, guild_only, default_member_permissions = "MANAGE_ROLES")]
pub async fn link(
    ctx: Context<'_>,
    #[description = "Discord user"] user: serenity::User,
    #[description = "Forum user ID"] forum_id: u64,
    #[description = "Forum username"] username: String,
) -> Result<(), Error> {
    if !require_guild_perms(ctx, &[GuildPerm::Write]).await? {
        return Ok(());
    }

    match ctx.data().link_manager.link(user.id, forum_id, &username).await {
        Ok(_) => {
            info!(
                "{} ({}) linked {} to forum user {} ({})",
                ctx.author().tag(),
                ctx.author().id,
                user.id,
                username,
                forum_id
            );
            let reply = match sync_after_link(ctx, user.id).await {
                Some(MemberOutcome::Banned) => {
                    "Member has the banned role on the forum and thus has been banned."
                }
                _ => "Added new user to the database!",
            };
            ctx.say(reply).await?;
        }
        Err(BotError::LinkConflict { message }) => {
            ctx.say(message).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Remove the link of a Discord user
#[poise::command(slash_command, guild_only, default_member_permissions = "MANAGE_ROLES")]
pub async fn unlink(
    ctx: Context<'_>,
    #[description = "Discord user"] user: serenity::User,
    #[description = "Unlink even if the user is banned"] force: Option<bool>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command must be used in a guild")?;
    if !require_guild_perms(ctx, &[GuildPerm::Write]).await? {
        return Ok(());
    }

    let data = ctx.data();
    match data
        .link_manager
        .unlink(guild_id, user.id, force.unwrap_or(false))
        .await
    {
        Ok(removed) => {
            ctx.say(format!(
                "Deleted the link of <@{}> to forum user {} (UID: {}).",
                user.id, removed.external_username, removed.external_user_id
            ))
            .await?;

            let whitelisted = data.store.read().await.is_whitelisted(user.id.get());
            if let (false, Some(member_sync)) = (whitelisted, &data.member_sync) {
                if let Err(e) = member_sync.strip_forum_roles(guild_id, user.id).await {
                    warn!("Could not remove forum roles of {}: {}", user.id, e);
                }
            }
        }
        Err(BotError::ActiveBan { reason, .. }) => {
            ctx.say(format!(
                "The user you tried to unlink is banned for \"{}\" on this guild!\n\
                Unban the user and try again. If the user is **already unbanned** or the \
                **ban is imported** use the `force` option.",
                reason
            ))
            .await?;
        }
        Err(BotError::NotFound { message }) => {
            ctx.say(message).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Add or remove a user from the whitelist
#[poise::command(slash_command, guild_only, default_member_permissions = "MANAGE_ROLES")]
pub async fn whitelist(
    ctx: Context<'_>,
    #[description = "Discord user"] user: serenity::User,
    #[description = "Whitelist (true) or remove from the whitelist (false)"] enabled: bool,
) -> Result<(), Error> {
    if !require_guild_perms(ctx, &[GuildPerm::Write]).await? {
        return Ok(());
    }

    let changed = ctx
        .data()
        .link_manager
        .set_whitelisted(user.id, enabled)
        .await?;

    let reply = match (changed, enabled) {
        (false, true) => "User is already whitelisted!".to_string(),
        (false, false) => "User is not whitelisted!".to_string(),
        (true, _) => {
            info!(
                "{} ({}) set whitelist status of {} to {}",
                ctx.author().tag(),
                ctx.author().id,
                user.id,
                enabled
            );
            format!("Updated whitelist status of user <@{}>.", user.id)
        }
    };
    ctx.say(reply).await?;
    Ok(())
}
