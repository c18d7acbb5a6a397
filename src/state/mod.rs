pub mod database;
pub mod records;

pub use database::{create_shared_store, SharedStore, Store, UserSummary, STATE_FILE};
pub use records::{
    role_name_key, BanRecord, GuildConfig, GuildPermissions, LinkedIdentity,
    PendingVerification, PlatformUser, RoleDefinition, AUTOKICK_DELAY_RANGE,
    DEFAULT_AUTOKICK_DELAY_HOURS, DEFAULT_BAN_REASON,
};
