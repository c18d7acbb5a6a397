use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Discord bot syncing forum roles and bans across guilds
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Register slash commands per guild instead of globally (faster for testing)
    #[arg(long, short = 's')]
    sync_commands: bool,

    /// Specific guild ID to register commands to
    #[arg(long)]
    guild_id: Option<u64>,

    /// Log at debug level
    #[arg(long, short = 'v')]
    verbose: bool,
}

mod commands;
mod config;
mod error;
mod events;
mod forum;
mod managers;
mod platform;
mod state;
mod sync;

#[cfg(test)]
mod testing;

use commands::{
    autokick_delay, forum_role_add, forum_role_remove, guild_perms, help, import_bans, link,
    ping, sync_bans, unlink, update_user, verify, verify_channel, whitelist, who,
};
use config::Settings;
use events::{handle_ban_add, handle_ban_remove, handle_guild_create, handle_member_add};
use forum::{ForumRoleApi, SharedRoleSource};
use managers::{
    create_shared_ban_manager, create_shared_link_manager, BanManager, LinkManager,
    SharedBanManager, SharedLinkManager,
};
use platform::{SerenityPlatform, SharedPlatform};
use state::{create_shared_store, SharedStore, Store};
use sync::{
    create_shared_member_sync, create_shared_scheduler, MemberSync, RoleSyncScheduler,
    SharedMemberSync, SharedScheduler,
};

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared application state
pub struct Data {
    pub store: SharedStore,
    pub ban_manager: SharedBanManager,
    pub link_manager: SharedLinkManager,
    /// Only present when a forum role API is configured
    pub member_sync: Option<SharedMemberSync>,
    pub scheduler: Option<SharedScheduler>,
}

impl Data {
    pub fn new(
        settings: &Settings,
        store: SharedStore,
        platform: SharedPlatform,
        role_source: Option<SharedRoleSource>,
    ) -> Self {
        let ban_manager = create_shared_ban_manager(BanManager::new(
            store.clone(),
            platform.clone(),
            settings.ban_audit_grace,
        ));
        let link_manager =
            create_shared_link_manager(LinkManager::new(store.clone(), platform.clone()));

        let member_sync = role_source.map(|source| {
            create_shared_member_sync(MemberSync::new(
                store.clone(),
                platform.clone(),
                source,
                settings.forum_banned_role_id,
            ))
        });
        let scheduler = member_sync.as_ref().map(|member_sync| {
            create_shared_scheduler(RoleSyncScheduler::new(
                store.clone(),
                platform.clone(),
                member_sync.clone(),
                settings.forum_role_api_delay,
            ))
        });

        Self {
            store,
            ban_manager,
            link_manager,
            member_sync,
            scheduler,
        }
    }
}

async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::GuildCreate { guild, .. } => {
            if let Err(e) = handle_guild_create(guild, data).await {
                error!("Failed to handle guild create: {}", e);
            }
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            if let Err(e) = handle_member_add(new_member, data).await {
                error!("Failed to handle new member: {}", e);
            }
        }
        serenity::FullEvent::GuildBanAddition {
            guild_id,
            banned_user,
        } => {
            if let Err(e) = handle_ban_add(*guild_id, banned_user, data).await {
                error!("Failed to handle ban: {}", e);
            }
        }
        serenity::FullEvent::GuildBanRemoval {
            guild_id,
            unbanned_user,
        } => {
            if let Err(e) = handle_ban_remove(*guild_id, unbanned_user, data).await {
                error!("Failed to handle unban: {}", e);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Log the application id encoded in the first part of the token
fn log_bot_id(token: &str) {
    use base64::Engine;

    let Some(bot_id_b64) = token.split('.').next() else {
        return;
    };
    let decoded = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(bot_id_b64)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(bot_id_b64));
    if let Some(id_str) = decoded.ok().and_then(|d| String::from_utf8(d).ok()) {
        info!(
            "Bot ID: {} (configure intents at https://discord.com/developers/applications/{}/bot)",
            id_str, id_str
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let level = if args.verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(level)
        .init();

    let settings = Settings::from_env()?;
    log_bot_id(&settings.discord_token);

    info!("Loading database from {}...", settings.state_path);
    let store = create_shared_store(Store::open(&settings.state_path).await?);
    {
        let db = store.read().await;
        info!(
            "Loaded {} links and {} bans",
            db.link_count(),
            db.ban_count()
        );
    }

    let role_source: Option<SharedRoleSource> = match &settings.forum_role_api_url {
        Some(url) => Some(Arc::new(ForumRoleApi::new(url)?)),
        None => {
            warn!("FORUM_ROLE_API_URL not set, role sync is disabled");
            None
        }
    };
    debug!(
        "Forum lookups every {}ms, banned role: {:?}",
        settings.forum_role_api_delay.as_millis(),
        settings.forum_banned_role_id
    );

    let sync_commands = args.sync_commands;
    let target_guild_id = args.guild_id;
    if sync_commands {
        info!("--sync-commands: Will register commands per guild");
    } else {
        info!("Registering commands globally by default (takes up to 1 hour to propagate)");
    }

    let token = settings.discord_token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                ping(),
                help(),
                verify(),
                link(),
                unlink(),
                whitelist(),
                who(),
                update_user(),
                sync_bans(),
                import_bans(),
                guild_perms(),
                autokick_delay(),
                forum_role_add(),
                forum_role_remove(),
                verify_channel(),
            ],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' invoked by {} (ID: {}) in {}",
                        ctx.command().qualified_name,
                        ctx.author().name,
                        ctx.author().id,
                        ctx.guild_id().map(|g| g.to_string()).unwrap_or_else(|| "DM".to_string())
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' completed for {}",
                        ctx.command().qualified_name,
                        ctx.author().name
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!("Error in command '{}': {}", ctx.command().qualified_name, error);
                            let _ = ctx.say(format!("An error occurred: {}", error)).await;
                        }
                        poise::FrameworkError::ArgumentParse { error, input, ctx, .. } => {
                            error!("Argument parse error in '{}': {} (input: {:?})", ctx.command().qualified_name, error, input);
                        }
                        poise::FrameworkError::MissingBotPermissions { missing_permissions, ctx, .. } => {
                            error!("Bot missing permissions for '{}': {:?}", ctx.command().qualified_name, missing_permissions);
                            let _ = ctx.say(format!("Bot is missing permissions: {:?}", missing_permissions)).await;
                        }
                        poise::FrameworkError::MissingUserPermissions { missing_permissions, ctx, .. } => {
                            error!("User {} missing permissions for '{}': {:?}", ctx.author().name, ctx.command().qualified_name, missing_permissions);
                        }
                        poise::FrameworkError::NotAnOwner { ctx, .. } => {
                            error!("User {} tried to use owner command '{}'", ctx.author().name, ctx.command().qualified_name);
                        }
                        poise::FrameworkError::GuildOnly { ctx, .. } => {
                            error!("Command '{}' is guild-only, used in DM by {}", ctx.command().qualified_name, ctx.author().name);
                        }
                        other => {
                            error!("Other framework error: {}", other);
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!(
                    "Bot logged in as: {} ({} guilds)",
                    ready.user.name,
                    ready.guilds.len()
                );

                if sync_commands {
                    let guilds_to_register: Vec<serenity::GuildId> = match target_guild_id {
                        Some(gid) => vec![serenity::GuildId::new(gid)],
                        None => ready.guilds.iter().map(|g| g.id).collect(),
                    };
                    for guild_id in &guilds_to_register {
                        info!("Registering commands to guild: {}", guild_id);
                        if let Err(e) = poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            *guild_id,
                        )
                        .await
                        {
                            error!("Failed to register commands for guild {}: {}", guild_id, e);
                        }
                    }
                } else {
                    info!("Registering commands globally...");
                    if let Err(e) =
                        poise::builtins::register_globally(ctx, &framework.options().commands).await
                    {
                        error!("Failed to register commands globally: {}", e);
                    } else {
                        info!(
                            "Successfully registered {} commands globally",
                            framework.options().commands.len()
                        );
                    }
                }

                let platform: SharedPlatform =
                    Arc::new(SerenityPlatform::new(ctx.http.clone(), ctx.cache.clone()));
                let data = Data::new(&settings, store, platform, role_source);

                match &data.scheduler {
                    Some(scheduler) => {
                        scheduler.start();
                        let scheduler = scheduler.clone();
                        tokio::spawn(async move {
                            if tokio::signal::ctrl_c().await.is_ok() {
                                scheduler.stop();
                            }
                        });
                    }
                    None => warn!("Scheduled role sync not started: no forum role API configured"),
                }

                Ok(data)
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MODERATION;
    info!("Requesting privileged intents: [\"GUILD_MEMBERS\"]");

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting bot...");
    if let Err(e) = client.start().await {
        let err_str = e.to_string();
        if err_str.contains("Disallowed") || err_str.contains("intents") {
            error!("Failed to start bot: {}", e);
            error!("Enable the GUILD_MEMBERS intent at https://discord.com/developers/applications -> Your App -> Bot -> Privileged Gateway Intents");
            return Err(anyhow::anyhow!(
                "Disallowed gateway intents. Enable GUILD_MEMBERS in the Discord Developer Portal"
            ));
        }
        return Err(e.into());
    }
    warn!("Bot ended.");

    Ok(())
}
