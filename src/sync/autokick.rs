use chrono::{DateTime, Duration, Utc};
use poise::serenity_prelude::UserId;

use crate::platform::MemberSnapshot;
use crate::state::GuildConfig;

/// Why an unlinked member stays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    AutokickDisabled,
    Whitelisted,
    Bot,
    Owner,
    UnknownJoinDate,
    TooRecent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KickDecision {
    Kick { elapsed: Duration },
    Keep(KeepReason),
}

/// Decide whether an unlinked member gets kicked. The member must have been
/// in the guild for strictly longer than the guild's autokick delay.
pub fn decide(
    config: &GuildConfig,
    whitelisted: bool,
    member: &MemberSnapshot,
    owner_id: UserId,
    now: DateTime<Utc>,
) -> KickDecision {
    if !config.perms.autokick {
        return KickDecision::Keep(KeepReason::AutokickDisabled);
    }
    if whitelisted {
        return KickDecision::Keep(KeepReason::Whitelisted);
    }
    if member.is_bot {
        return KickDecision::Keep(KeepReason::Bot);
    }
    if member.user_id == owner_id {
        return KickDecision::Keep(KeepReason::Owner);
    }
    let Some(joined_at) = member.joined_at else {
        return KickDecision::Keep(KeepReason::UnknownJoinDate);
    };

    let elapsed = now - joined_at;
    if elapsed > Duration::hours(i64::from(config.autokick_hour_delay)) {
        KickDecision::Kick { elapsed }
    } else {
        KickDecision::Keep(KeepReason::TooRecent)
    }
}

/// `"2d 5h 13m"`
pub fn format_elapsed(elapsed: Duration) -> String {
    format!(
        "{}d {}h {}m",
        elapsed.num_days(),
        elapsed.num_hours() % 24,
        elapsed.num_minutes() % 60
    )
}

pub fn kick_reason(elapsed: Duration) -> String {
    format!(
        "Autokick due to being unlinked. (Joined **{}d** **{}h** **{}m** ago)",
        elapsed.num_days(),
        elapsed.num_hours() % 24,
        elapsed.num_minutes() % 60
    )
}
