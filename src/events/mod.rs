pub mod ban;
pub mod guild;
pub mod member;

pub use ban::{handle_ban_add, handle_ban_remove};
pub use guild::handle_guild_create;
pub use member::handle_member_add;
