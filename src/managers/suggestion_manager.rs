use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::error::{PlusError, Result};
use crate::models::{PlusRegion, PlusServer, Suggestion, User};
use crate::state::SharedPlusDatabase;

/// Longest accepted nomination text.
const MAX_DESCRIPTION_LEN: usize = 1000;

/// A nomination as submitted by a member.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSuggestion {
    pub discord_id: String,
    pub server: PlusServer,
    pub region: PlusRegion,
    pub description: String,
}

/// Validates and records membership nominations.
pub struct SuggestionManager {
    db: SharedPlusDatabase,
    db_path: String,
}

impl SuggestionManager {
    pub fn new(db: SharedPlusDatabase, db_path: String) -> Self {
        Self { db, db_path }
    }

    /// Record a nomination. All checks run before anything is written;
    /// the check order matches the user-facing error precedence.
    pub async fn add_suggestion(&self, caller: &User, new: NewSuggestion) -> Result<Suggestion> {
        let Some(caller_server) = caller.plus.membership_status else {
            return Err(PlusError::access_denied("Not a plus server member."));
        };

        let mut db = self.db.write().await;

        if db.suggestion_by_suggester(&caller.discord_id).is_some() {
            return Err(PlusError::invalid_input("Already suggested this month."));
        }
        if db.find_suggestion(&new.discord_id, new.server).is_some() {
            return Err(PlusError::invalid_input(
                "This user has already been suggested this month.",
            ));
        }
        let Some(nominee) = db.find_user(&new.discord_id) else {
            return Err(PlusError::invalid_input(
                "Suggested user is not a registered user.",
            ));
        };
        if nominee.plus.membership_status == Some(new.server) {
            return Err(PlusError::invalid_input(
                "Suggested user is already a member of the server.",
            ));
        }
        if new.server == PlusServer::One && caller_server != PlusServer::One {
            return Err(PlusError::invalid_input(
                "Can't suggest to +1 without being a +1 member.",
            ));
        }
        if new.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(PlusError::invalid_input(
                "Description has to be 1000 characters or less.",
            ));
        }

        let suggestion = Suggestion {
            discord_id: new.discord_id,
            suggester_discord_id: caller.discord_id.clone(),
            plus_server: new.server,
            plus_region: new.region,
            description: new.description,
            created_at: Utc::now(),
        };
        db.suggestions.push(suggestion.clone());
        db.touch();
        db.save(&self.db_path).await?;

        info!(
            "{} suggested {} for {}",
            caller.discord_id, suggestion.discord_id, suggestion.plus_server
        );
        Ok(suggestion)
    }

    /// Pending suggestions visible to the caller: +1 members see every
    /// server, everyone else only +2. Newest first.
    pub async fn list_suggestions(&self, caller: &User) -> Result<Vec<Suggestion>> {
        if caller.plus.server_access().is_none() {
            return Err(PlusError::access_denied("Not a plus server member."));
        }
        let see_all = caller.plus.membership_status == Some(PlusServer::One);

        let db = self.db.read().await;
        let mut suggestions: Vec<Suggestion> = db
            .suggestions
            .iter()
            .filter(|s| see_all || s.plus_server == PlusServer::Two)
            .cloned()
            .collect();
        suggestions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(suggestions)
    }
}

/// Shared suggestion manager type
pub type SharedSuggestionManager = Arc<SuggestionManager>;

pub fn create_shared_suggestion_manager(
    db: SharedPlusDatabase,
    db_path: String,
) -> SharedSuggestionManager {
    Arc::new(SuggestionManager::new(db, db_path))
}
