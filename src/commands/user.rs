use poise::serenity_prelude as serenity;
use tracing::{error, info};

use super::{parse_snowflake, require_guild_perms, GuildPerm};
use crate::state::UserSummary;
use crate::sync::MemberOutcome;
use crate::{Context, Error};

/// Force an update of a user's roles from their forum roles
#[poise::command(slash_command, guild_only, default_member_permissions = "MANAGE_ROLES")]
pub async fn update_user(
    ctx: Context<'_>,
    #[description = "Discord mention, Discord ID or forum ID"] id: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command must be used in a guild")?;
    if !require_guild_perms(ctx, &[GuildPerm::Read]).await? {
        return Ok(());
    }

    let Some(id) = parse_snowflake(&id) else {
        ctx.say("Please provide a mention or an ID of the user to update.").await?;
        return Ok(());
    };
    let data = ctx.data();
    let Some(member_sync) = &data.member_sync else {
        ctx.say("Role sync is disabled, no forum role API is configured.").await?;
        return Ok(());
    };
    let link = data.store.read().await.link_by_any(id).cloned();
    let Some(link) = link else {
        ctx.say("No user found with that ID.").await?;
        return Ok(());
    };

    ctx.defer().await?;
    let user_id = serenity::UserId::new(link.platform_user_id);
    let reply = match member_sync.sync_user(guild_id, user_id).await {
        Ok(outcome) => {
            info!(
                "{} ({}) forced a role update of {}: {:?}",
                ctx.author().tag(),
                ctx.author().id,
                user_id,
                outcome
            );
            update_reply(&outcome)
        }
        Err(e) => {
            error!("Could not update roles of {}: {}", user_id, e);
            "Could not update the roles of the user!"
        }
    };
    ctx.say(reply).await?;
    Ok(())
}

fn update_reply(outcome: &MemberOutcome) -> &'static str {
    match outcome {
        MemberOutcome::Absent => "Member not found, make sure the user is in your guild!",
        MemberOutcome::Skipped => "Could not get roles of user!",
        MemberOutcome::Banned => "Member has the banned role on the forum and thus has been banned.",
        MemberOutcome::Whitelisted => "User is whitelisted, their roles are not synced.",
        MemberOutcome::Synced { failed, .. } if *failed > 0 => {
            "Updated roles of the mentioned user, but some roles could not be changed."
        }
        _ => "Updated roles of the mentioned user.",
    }
}

/// Show what the bot knows about a user
#[poise::command(slash_command, guild_only, default_member_permissions = "MANAGE_ROLES")]
pub async fn who(
    ctx: Context<'_>,
    #[description = "Discord mention, Discord ID or forum ID"] id: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command must be used in a guild")?;
    if !require_guild_perms(ctx, &[GuildPerm::Read]).await? {
        return Ok(());
    }

    let Some(id) = parse_snowflake(&id) else {
        ctx.say("Please mention a user or provide an ID to receive the user information.")
            .await?;
        return Ok(());
    };
    let summary = ctx.data().store.read().await.user_summary(guild_id.get(), id);
    match summary {
        Some(summary) => {
            ctx.send(poise::CreateReply::default().embed(user_embed(&summary)))
                .await?;
        }
        None => {
            ctx.say("No user found with that ID!").await?;
        }
    }
    Ok(())
}

fn user_fields(summary: &UserSummary) -> Vec<(&'static str, String, bool)> {
    let mut fields = vec![
        ("Discord user:", format!("<@{}>", summary.user_id), true),
        (
            "Whitelisted?",
            (if summary.whitelisted { "Yes" } else { "No" }).to_string(),
            true,
        ),
    ];
    if let Some(reason) = &summary.ban_reason {
        fields.push(("Banned for:", reason.clone(), false));
    }
    fields.push(match &summary.link {
        Some(link) => (
            "Forum user:",
            format!("{} (UID: {})", link.external_username, link.external_user_id),
            false,
        ),
        None => ("Forum user:", "UNKNOWN (not linked)".to_string(), true),
    });
    fields
}

fn user_embed(summary: &UserSummary) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title("User information:")
        .fields(user_fields(summary))
        .color(0x3498db)
}
