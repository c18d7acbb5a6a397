use poise::serenity_prelude as serenity;
use tracing::{debug, info};

use crate::{Data, Error};

/// Handle when a new member joins the guild: users with a ban record for this
/// guild are banned again, linked users get their forum roles.
pub async fn handle_member_add(new_member: &serenity::Member, data: &Data) -> Result<(), Error> {
    debug!("{} joined {}", new_member.user.tag(), new_member.guild_id);
    member_joined(new_member.guild_id, new_member.user.id, data).await
}

pub(super) async fn member_joined(
    guild_id: serenity::GuildId,
    user_id: serenity::UserId,
    data: &Data,
) -> Result<(), Error> {
    if data.ban_manager.ban_if_recorded(guild_id, user_id).await? {
        return Ok(());
    }

    let role_sync = data
        .store
        .read()
        .await
        .guild(guild_id.get())
        .is_some_and(|g| g.perms.role_sync);
    if !role_sync {
        return Ok(());
    }

    let Some(member_sync) = &data.member_sync else {
        debug!("Forum role API not configured, not syncing {}", user_id);
        return Ok(());
    };

    let outcome = member_sync.sync_user(guild_id, user_id).await?;
    info!("Synced {} after joining {}: {:?}", user_id, guild_id, outcome);
    Ok(())
}
