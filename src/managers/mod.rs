pub mod ban_manager;
pub mod link_manager;

pub use ban_manager::{
    create_shared_ban_manager, BanManager, BanSyncSummary, ImportSummary, SharedBanManager,
};
pub use link_manager::{create_shared_link_manager, LinkManager, SharedLinkManager};
