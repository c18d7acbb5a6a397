//! Forum role sync: the pure role differ, the autokick policy, the per-member
//! pipeline and the paced scheduler driving it.

pub mod autokick;
pub mod member_sync;
pub mod role_diff;
pub mod scheduler;

pub use member_sync::{create_shared_member_sync, MemberOutcome, MemberSync, SharedMemberSync};
pub use scheduler::{create_shared_scheduler, RoleSyncScheduler, SharedScheduler};
