//! Paced role sync over every guild with role sync enabled.
//!
//! A pass computes all start times up front from the guilds' member counts:
//! guild `k` starts one delay after the members of guilds `0..k` have all been
//! queued, member `i` of a guild fires `i` delays after its guild, and the
//! next pass is armed once the whole queue has drained.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::member_sync::SharedMemberSync;
use crate::error::Result;
use crate::platform::{GuildSummary, SharedPlatform};
use crate::state::SharedStore;

/// Next pass delay when no member was queued
pub const EMPTY_PASS_DELAY: Duration = Duration::from_secs(60);
/// Next pass delay after a pass failed to plan
pub const FAILED_PASS_DELAY: Duration = Duration::from_secs(60);
/// Members synced at the same time
pub const SYNC_WORKERS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledGuild {
    pub guild: GuildSummary,
    /// Start of the guild's member scan, relative to the pass start
    pub offset: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassPlan {
    pub guilds: Vec<ScheduledGuild>,
    pub total_members: u64,
    pub next_pass_in: Duration,
}

fn times(delay: Duration, n: u64) -> Duration {
    let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(ms.saturating_mul(n))
}

/// Lay out one pass. `guilds` must already be filtered and in their final order.
pub fn plan_pass(guilds: Vec<GuildSummary>, delay: Duration) -> PassPlan {
    let mut queued: u64 = 0;
    let mut scheduled = Vec::with_capacity(guilds.len());

    for guild in guilds {
        let offset = times(delay, queued) + delay;
        queued += guild.member_count;
        scheduled.push(ScheduledGuild { guild, offset });
    }

    let next_pass_in = if queued == 0 {
        EMPTY_PASS_DELAY
    } else {
        times(delay, queued) + delay
    };

    PassPlan {
        guilds: scheduled,
        total_members: queued,
        next_pass_in,
    }
}

struct SchedulerInner {
    store: SharedStore,
    platform: SharedPlatform,
    member_sync: SharedMemberSync,
    delay: Duration,
    workers: Arc<Semaphore>,
}

impl SchedulerInner {
    /// Plan and dispatch one pass, returning when the next one is due
    async fn run_pass(self: &Arc<Self>) -> Result<Duration> {
        let mut guilds = self.platform.guilds().await?;
        guilds.sort_by_key(|g| g.id);

        let eligible = self
            .store
            .update(|db| {
                guilds
                    .into_iter()
                    .filter(|g| {
                        db.ensure_guild(g.id.get());
                        db.guild(g.id.get()).is_some_and(|c| c.perms.role_sync)
                    })
                    .collect::<Vec<_>>()
            })
            .await?;

        let plan = plan_pass(eligible, self.delay);
        info!(
            "Scheduling role sync of {} members in {} guilds, next pass in {}s",
            plan.total_members,
            plan.guilds.len(),
            plan.next_pass_in.as_secs()
        );

        for scheduled in plan.guilds {
            debug!(
                "Scheduling guild \"{}\" ({} members) at +{}ms",
                scheduled.guild.name,
                scheduled.guild.member_count,
                scheduled.offset.as_millis()
            );
            let inner = Arc::clone(self);
            tokio::spawn(
                async move {
                    tokio::time::sleep(scheduled.offset).await;
                    inner.sync_guild(scheduled.guild).await;
                }
                .in_current_span(),
            );
        }

        Ok(plan.next_pass_in)
    }

    async fn sync_guild(self: Arc<Self>, guild: GuildSummary) {
        let members = match self.platform.members(guild.id).await {
            Ok(members) => members,
            Err(e) => {
                warn!("Could not load members of \"{}\": {}", guild.name, e);
                return;
            }
        };
        debug!("Updating {} members of \"{}\"", members.len(), guild.name);

        let guild = Arc::new(guild);
        for (i, member) in members.into_iter().enumerate() {
            let inner = Arc::clone(&self);
            let guild = Arc::clone(&guild);
            let start = times(self.delay, i as u64);
            tokio::spawn(
                async move {
                    tokio::time::sleep(start).await;
                    let Ok(_permit) = inner.workers.acquire().await else {
                        return;
                    };
                    inner.member_sync.sync_member(&guild, &member).await;
                }
                .in_current_span(),
            );
        }
    }
}

/// Owns the re-arming sync loop
pub struct RoleSyncScheduler {
    inner: Arc<SchedulerInner>,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RoleSyncScheduler {
    pub fn new(
        store: SharedStore,
        platform: SharedPlatform,
        member_sync: SharedMemberSync,
        delay: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                platform,
                member_sync,
                delay,
                workers: Arc::new(Semaphore::new(SYNC_WORKERS)),
            }),
            stop_tx,
            handle: Mutex::new(None),
        }
    }

    /// Start the loop. Calling it while running does nothing.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Role sync scheduler already running");
            return;
        }

        info!(
            "Starting scheduled role sync ({}ms between members)",
            self.inner.delay.as_millis()
        );
        let inner = Arc::clone(&self.inner);
        let stop_rx = self.stop_tx.subscribe();
        *handle = Some(tokio::spawn(run_loop(inner, stop_rx)));
    }

    /// Stop re-arming. Member syncs already dispatched still finish.
    pub fn stop(&self) {
        if self.handle.lock().take().is_some() {
            let _ = self.stop_tx.send(true);
            info!("Role sync scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

async fn run_loop(inner: Arc<SchedulerInner>, mut stop_rx: watch::Receiver<bool>) {
    loop {
        let span = info_span!("role_sync_pass", pass = %Uuid::new_v4());
        let next = match inner.run_pass().instrument(span).await {
            Ok(next) => next,
            Err(e) => {
                warn!("Unexpected error during role sync pass: {}", e);
                FAILED_PASS_DELAY
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(next) => {}
            _ = stop_rx.changed() => break,
        }
    }
}

/// Shared scheduler type
pub type SharedScheduler = Arc<RoleSyncScheduler>;

pub fn create_shared_scheduler(scheduler: RoleSyncScheduler) -> SharedScheduler {
    Arc::new(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{create_shared_store, LinkedIdentity, Store};
    use crate::sync::member_sync::{create_shared_member_sync, MemberSync};
    use crate::testing::{member, FakePlatform, FakeRoleSource};
    use poise::serenity_prelude::{GuildId, UserId};
    use tokio::time::Instant;

    fn summary(id: u64, members: u64) -> GuildSummary {
        GuildSummary {
            id: GuildId::new(id),
            name: format!("guild{}", id),
            member_count: members,
            owner_id: UserId::new(1),
        }
    }

    #[test]
    fn test_plan_paces_guilds_by_member_count() {
        let plan = plan_pass(
            vec![summary(1, 5), summary(2, 3)],
            Duration::from_millis(1000),
        );

        assert_eq!(plan.total_members, 8);
        assert_eq!(plan.guilds[0].offset, Duration::from_millis(1000));
        assert_eq!(plan.guilds[1].offset, Duration::from_millis(6000));
        assert_eq!(plan.next_pass_in, Duration::from_millis(9000));
    }

    #[test]
    fn test_empty_pass_waits_a_minute() {
        let plan = plan_pass(vec![summary(1, 0)], Duration::from_millis(100));
        assert_eq!(plan.next_pass_in, EMPTY_PASS_DELAY);

        let plan = plan_pass(Vec::new(), Duration::from_millis(100));
        assert!(plan.guilds.is_empty());
        assert_eq!(plan.next_pass_in, EMPTY_PASS_DELAY);
    }

    struct Fixture {
        platform: Arc<FakePlatform>,
        forum: Arc<FakeRoleSource>,
        scheduler: RoleSyncScheduler,
    }

    /// Guild 1 with five linked members, guild 2 with three, guild 3 with
    /// role sync off
    async fn fixture() -> Fixture {
        let store = create_shared_store(Store::in_memory());
        let platform = FakePlatform::shared();
        let forum = FakeRoleSource::shared();

        platform.add_guild(1, "First", 1);
        platform.add_guild(2, "Second", 1);
        platform.add_guild(3, "Disabled", 1);
        for user in 10..15 {
            platform.add_member(1, member(user, None));
        }
        for user in 20..23 {
            platform.add_member(2, member(user, None));
        }
        platform.add_member(3, member(30, None));

        store
            .update(|db| {
                for guild in [1, 2] {
                    db.guild_or_default(guild).perms.role_sync = true;
                }
                for user in (10..15).chain(20..23).chain(30..31) {
                    db.save_link(LinkedIdentity::new(user, user + 1000, "forum"))
                        .unwrap();
                }
            })
            .await
            .unwrap();

        let member_sync = create_shared_member_sync(MemberSync::new(
            store.clone(),
            platform.clone(),
            forum.clone(),
            None,
        ));
        let scheduler = RoleSyncScheduler::new(
            store,
            platform.clone(),
            member_sync,
            Duration::from_millis(1000),
        );

        Fixture {
            platform,
            forum,
            scheduler,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_timing() {
        let f = fixture().await;
        let start = Instant::now();

        f.scheduler.start();
        tokio::time::sleep(Duration::from_millis(9500)).await;

        let lookups = f.forum.lookups();
        assert_eq!(lookups.len(), 8);
        assert!(lookups.iter().all(|(ext, _)| *ext != 1030));

        let first_of_second = lookups
            .iter()
            .find(|(ext, _)| *ext == 1020)
            .map(|(_, at)| *at - start)
            .unwrap();
        assert!(first_of_second >= Duration::from_millis(6000));
        assert!(first_of_second < Duration::from_millis(7000));

        let state = f.platform.state.lock();
        assert_eq!(state.guild_listings.len(), 2);
        assert!(state.guild_listings[1] - start >= Duration::from_millis(9000));
        assert!(state
            .member_listings
            .iter()
            .all(|(guild, _)| *guild != GuildId::new(3)));
        drop(state);

        f.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pass_rearms_after_a_minute() {
        let f = fixture().await;
        f.platform.state.lock().fail_guild_listings = true;
        let start = Instant::now();

        f.scheduler.start();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.platform.state.lock().guild_listings.len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let listings = f.platform.state.lock().guild_listings.clone();
        assert_eq!(listings.len(), 2);
        assert!(listings[1] - start >= FAILED_PASS_DELAY);
        assert!(f.scheduler.is_running());
        assert!(f.forum.lookups().is_empty());

        f.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_next_pass() {
        let f = fixture().await;

        f.scheduler.start();
        assert!(f.scheduler.is_running());
        tokio::time::sleep(Duration::from_millis(500)).await;
        f.scheduler.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(!f.scheduler.is_running());
        assert_eq!(f.platform.state.lock().guild_listings.len(), 1);
        // dispatched members still ran
        assert_eq!(f.forum.lookups().len(), 8);
    }
}
