use poise::serenity_prelude as serenity;
use tracing::info;

use super::{parse_snowflake, require_guild_perms, GuildPerm};
use crate::error::BotError;
use crate::state::RoleDefinition;
use crate::{Context, Error};

/// Show or change the feature flags of a guild
#[poise::command(slash_command, owners_only)]
pub async fn guild_perms(
    ctx: Context<'_>,
    #[description = "Guild ID (defaults to this guild)"] guild_id: Option<String>,
    #[description = "Allow reading the database"] read: Option<bool>,
    #[description = "Allow writing to the database"] write: Option<bool>,
    #[description = "Sync forum roles to members"] role_sync: Option<bool>,
    #[description = "Record bans and unbans"] ban_sync: Option<bool>,
    #[description = "Kick members that never linked"] autokick: Option<bool>,
) -> Result<(), Error> {
    let target = match guild_id.as_deref() {
        Some(raw) => match parse_snowflake(raw) {
            Some(id) => id,
            None => {
                ctx.say("Please provide a valid guild ID.").await?;
                return Ok(());
            }
        },
        None => ctx
            .guild_id()
            .ok_or("Provide a guild ID when using this command outside of a guild")?
            .get(),
    };

    let changed = [read, write, role_sync, ban_sync, autokick]
        .iter()
        .any(Option::is_some);

    let text = ctx
        .data()
        .store
        .update(|db| {
            let config = db.guild_or_default(target);
            let perms = &mut config.perms;
            for (flag, value) in [
                (&mut perms.read, read),
                (&mut perms.write, write),
                (&mut perms.role_sync, role_sync),
                (&mut perms.ban_sync, ban_sync),
                (&mut perms.autokick, autokick),
            ] {
                if let Some(value) = value {
                    *flag = value;
                }
            }
            config.permission_text()
        })
        .await?;

    if changed {
        info!(
            "{} ({}) changed permissions of guild {}",
            ctx.author().tag(),
            ctx.author().id,
            target
        );
    }

    let embed = serenity::CreateEmbed::new()
        .title(format!("Permissions of guild {}", target))
        .description(text)
        .color(0x3498db);
    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Set how long unlinked members may stay before they are kicked
#[poise::command(slash_command, guild_only, default_member_permissions = "KICK_MEMBERS")]
pub async fn autokick_delay(
    ctx: Context<'_>,
    #[description = "Delay in hours"] hours: u32,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command must be used in a guild")?;
    if !require_guild_perms(ctx, &[GuildPerm::Write]).await? {
        return Ok(());
    }

    let result = ctx
        .data()
        .store
        .update(|db| db.guild_or_default(guild_id.get()).set_autokick_delay(hours))
        .await?;

    match result {
        Ok(()) => {
            info!("Autokick delay of {} set to {}h", guild_id, hours);
            ctx.say(format!("Unlinked members are now kicked after **{}** hours.", hours))
                .await?;
        }
        Err(BotError::InvalidInput { message }) => {
            ctx.say(message).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Map a forum role to a Discord role name
#[poise::command(slash_command, guild_only, default_member_permissions = "MANAGE_ROLES")]
pub async fn forum_role_add(
    ctx: Context<'_>,
    #[description = "Forum role ID"] role_id: u64,
    #[description = "Name of the Discord role"] name: String,
) -> Result<(), Error> {
    if !require_guild_perms(ctx, &[GuildPerm::Write]).await? {
        return Ok(());
    }

    let name = name.trim().to_string();
    if name.is_empty() {
        ctx.say("Please provide a role name.").await?;
        return Ok(());
    }

    let (previous, sharing) = ctx
        .data()
        .store
        .update(|db| {
            let previous = db.role_definition(role_id).map(|d| d.name.clone());
            db.save_role_definition(RoleDefinition::new(role_id, &name));
            let sharing: Vec<u64> = db
                .role_definitions_by_name(&name)
                .into_iter()
                .map(|d| d.external_role_id)
                .filter(|id| *id != role_id)
                .collect();
            (previous, sharing)
        })
        .await?;

    info!("Forum role {} mapped to \"{}\"", role_id, name);
    let mut reply = match previous {
        Some(old) => format!("Renamed forum role {} from **{}** to **{}**.", role_id, old, name),
        None => format!("Forum role {} is now synced as **{}**.", role_id, name),
    };
    if !sharing.is_empty() {
        reply.push_str(&format!(
            " Forum roles {:?} grant the same Discord role, members holding any of them keep it.",
            sharing
        ));
    }
    ctx.say(reply).await?;
    Ok(())
}

/// Stop syncing a forum role
#[poise::command(slash_command, guild_only, default_member_permissions = "MANAGE_ROLES")]
pub async fn forum_role_remove(
    ctx: Context<'_>,
    #[description = "Forum role ID"] role_id: u64,
) -> Result<(), Error> {
    if !require_guild_perms(ctx, &[GuildPerm::Write]).await? {
        return Ok(());
    }

    let removed = ctx
        .data()
        .store
        .update(|db| db.delete_role_definition(role_id))
        .await?;

    match removed {
        Some(definition) => {
            info!("Forum role {} (\"{}\") removed", role_id, definition.name);
            ctx.say(format!(
                "Forum role {} (**{}**) is no longer synced.",
                role_id, definition.name
            ))
            .await?;
        }
        None => {
            ctx.say(format!("Forum role {} is not synced.", role_id)).await?;
        }
    }
    Ok(())
}

/// Restrict /verify to one channel, or allow it everywhere
#[poise::command(slash_command, guild_only, default_member_permissions = "MANAGE_CHANNELS")]
pub async fn verify_channel(
    ctx: Context<'_>,
    #[description = "Verification channel (empty for any channel)"]
    #[channel_types("Text")]
    channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command must be used in a guild")?;
    if !require_guild_perms(ctx, &[GuildPerm::Write]).await? {
        return Ok(());
    }

    let channel_id = channel.as_ref().map_or(0, |c| c.id.get());
    ctx.data()
        .store
        .update(|db| db.guild_or_default(guild_id.get()).verification_channel_id = channel_id)
        .await?;

    let reply = match channel {
        Some(c) => format!("/verify is now only accepted in <#{}>.", c.id),
        None => "/verify is now accepted in every channel.".to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}
