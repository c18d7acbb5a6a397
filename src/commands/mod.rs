pub mod bans;
pub mod config;
pub mod general;
pub mod link;
pub mod user;

pub use bans::{import_bans, sync_bans};
pub use config::{autokick_delay, forum_role_add, forum_role_remove, guild_perms, verify_channel};
pub use general::{help, ping};
pub use link::{link, unlink, verify, whitelist};
pub use user::{update_user, who};

use crate::state::GuildPermissions;
use crate::{Context, Error};

/// Feature flag a command needs on its guild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuildPerm {
    Read,
    Write,
    BanSync,
}

impl GuildPerm {
    pub fn granted_by(self, perms: &GuildPermissions) -> bool {
        match self {
            GuildPerm::Read => perms.read,
            GuildPerm::Write => perms.write,
            GuildPerm::BanSync => perms.ban_sync,
        }
    }
}

/// Check the guild's flags, telling the caller when one is missing. Guilds
/// without settings get the defaults first.
pub async fn require_guild_perms(ctx: Context<'_>, needed: &[GuildPerm]) -> Result<bool, Error> {
    let guild_id = ctx.guild_id().ok_or("This command must be used in a guild")?;

    let perms = ctx
        .data()
        .store
        .update(|db| db.guild_or_default(guild_id.get()).perms)
        .await?;

    if needed.iter().all(|p| p.granted_by(&perms)) {
        return Ok(true);
    }

    ctx.send(
        poise::CreateReply::default()
            .content("Your guild does not have the required permission!")
            .ephemeral(true),
    )
    .await?;
    Ok(false)
}

/// Parse a Discord id given as text
pub fn parse_snowflake(raw: &str) -> Option<u64> {
    raw.trim()
        .trim_start_matches("<@")
        .trim_start_matches('!')
        .trim_end_matches('>')
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
}
