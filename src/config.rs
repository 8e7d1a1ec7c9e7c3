//! Runtime configuration, read once at startup.

use crate::error::{PlusError, Result};

/// Service configuration from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Discord id of the administrator. Only this caller may control the
    /// voting window, trigger settlement or issue tokens.
    pub admin_discord_id: String,
    /// Bootstrap bearer token for the administrator.
    pub admin_token: Option<String>,
    /// Invite link handed out to +1 members.
    pub plus_one_invite_link: Option<String>,
    /// Invite link handed out to every member.
    pub plus_two_invite_link: String,
    /// HTTP port the API binds to.
    pub bind_port: u16,
    /// Directory the state file lives in.
    pub state_path: String,
}

impl AppConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self> {
        let admin_discord_id =
            std::env::var("ADMIN_DISCORD_ID").map_err(|_| PlusError::ConfigValidation {
                message: "ADMIN_DISCORD_ID is not set".to_string(),
            })?;
        let plus_two_invite_link =
            std::env::var("PLUS_TWO_LINK").map_err(|_| PlusError::ConfigValidation {
                message: "PLUS_TWO_LINK is not set".to_string(),
            })?;

        Ok(Self {
            admin_discord_id,
            admin_token: std::env::var("ADMIN_TOKEN").ok(),
            plus_one_invite_link: std::env::var("PLUS_ONE_LINK").ok(),
            plus_two_invite_link,
            bind_port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
            state_path: std::env::var("STATE_PATH").unwrap_or_else(|_| "state".to_string()),
        })
    }

    /// Whether the given caller id is the configured administrator.
    pub fn is_admin(&self, discord_id: &str) -> bool {
        discord_id == self.admin_discord_id
    }

    /// Path of the state file inside `state_path`.
    pub fn database_path(&self) -> String {
        format!("{}/plus_database.json", self.state_path)
    }
}
