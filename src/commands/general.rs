use poise::serenity_prelude as serenity;
use tracing::info;

use crate::{Context, Error};

/// Check if the bot is running
#[poise::command(prefix_command, slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    info!("Ping command called by {}", ctx.author().name);
    ctx.send(poise::CreateReply::default()
        .content("Pong! Bot is working!")
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Show help information
#[poise::command(prefix_command, slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let embed = serenity::CreateEmbed::new()
        .title("Bot Commands")
        .description("Available commands:")
        .field("/ping", "Check if the bot is running", false)
        .field("/verify", "Link your Discord account with the code from the forum", false)
        .field("/link, /unlink", "Manage links between Discord and forum accounts (Write)", false)
        .field("/whitelist", "Exclude a user from role sync and autokick (Write)", false)
        .field("/who", "Show what is known about a user (Read)", false)
        .field("/update_user", "Force a role update of a user (Read)", false)
        .field("/sync_bans", "Synchronise bans between Discord and database (Read, Write, BanSync)", false)
        .field("/import_bans", "Import saved bans from another guild (Read)", false)
        .field("/forum_role_add, /forum_role_remove", "Manage forum role mappings (Write)", false)
        .field("/autokick_delay, /verify_channel", "Guild settings (Write)", false)
        .field("/guild_perms", "Show or change a guild's permissions (Owner)", false)
        .color(0x3498db);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}
