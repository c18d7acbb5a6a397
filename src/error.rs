use serenity::http::HttpError;
use serenity::model::ModelError;
use thiserror::Error;

/// Discord JSON error code for "Missing Permissions" (also returned on role hierarchy violations)
const DISCORD_MISSING_PERMISSIONS: isize = 50013;
/// Discord JSON error codes for unknown member / unknown user / unknown ban
const DISCORD_UNKNOWN_ENTITY: [isize; 3] = [10007, 10013, 10026];

#[derive(Error, Debug)]
pub enum BotError {
    // Configuration errors
    #[error("Invalid config: {message}")]
    ConfigValidation { message: String },

    // State errors
    #[error("Failed to save state to '{path}': {source}")]
    StateSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state file '{path}': {source}")]
    StateParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to load state from '{path}': {source}")]
    StateLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // Discord errors
    #[error("Missing Discord permissions: {message}")]
    MissingPermissions { message: String },

    #[error("Role hierarchy prevents this action: {message}")]
    Hierarchy { message: String },

    #[error("Not found on Discord: {message}")]
    NotFound { message: String },

    #[error("Discord API error: {message}")]
    Discord { message: String },

    #[error("Guild not found: {id}")]
    GuildNotFound { id: String },

    // Forum errors
    #[error("Forum role API timed out for user {external_id}")]
    ForumTimeout { external_id: u64 },

    #[error("Forum role API request failed: {message}")]
    ForumRequest { message: String },

    #[error("Forum role API returned a malformed payload: {body:?}")]
    MalformedPayload { body: String },

    // Linking / moderation refusals
    #[error("Link conflict: {message}")]
    LinkConflict { message: String },

    #[error("User {user_id} still has an active ban: {reason}")]
    ActiveBan { user_id: u64, reason: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BotError {
    /// Classify a serenity error by the Discord JSON error code it carries
    pub fn from_discord(err: serenity::Error) -> Self {
        match &err {
            serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
                let message = format!("{} ({})", response.error.message, response.error.code);
                if response.error.code == DISCORD_MISSING_PERMISSIONS {
                    BotError::MissingPermissions { message }
                } else if DISCORD_UNKNOWN_ENTITY.contains(&response.error.code)
                    || response.status_code.as_u16() == 404
                {
                    BotError::NotFound { message }
                } else {
                    BotError::Discord { message }
                }
            }
            serenity::Error::Model(ModelError::Hierarchy) => BotError::Hierarchy {
                message: err.to_string(),
            },
            _ => BotError::Discord {
                message: err.to_string(),
            },
        }
    }

    /// Errors that need an admin to change guild settings before they can go away
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            BotError::MissingPermissions { .. } | BotError::Hierarchy { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BotError::NotFound { .. })
    }
}

impl From<serenity::Error> for BotError {
    fn from(err: serenity::Error) -> Self {
        BotError::from_discord(err)
    }
}

impl From<std::io::Error> for BotError {
    fn from(err: std::io::Error) -> Self {
        BotError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
