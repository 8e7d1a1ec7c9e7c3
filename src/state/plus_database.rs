use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

use crate::models::{PlusRegion, PlusServer, Suggestion, Summary, User, Vote};

/// The whole persistent state of the service: every record a voting
/// cycle reads or writes lives in this one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlusDatabase {
    /// Schema version for migrations
    pub version: u32,

    /// Last update timestamp
    pub last_updated: u64,

    /// Registered users, keyed by Discord id
    pub users: HashMap<String, User>,

    /// Pending nominations for the current cycle
    pub suggestions: Vec<Suggestion>,

    /// Votes recorded during the current cycle
    pub votes: Vec<Vote>,

    /// Archived monthly results, append-only
    pub summaries: Vec<Summary>,

    /// End of the open voting window; `None` when no window is open
    pub voting_ends: Option<DateTime<Utc>>,

    /// Issued API tokens, keyed token -> Discord id
    pub api_tokens: HashMap<String, String>,
}

impl Default for PlusDatabase {
    fn default() -> Self {
        Self {
            version: 1,
            last_updated: current_timestamp(),
            users: HashMap::new(),
            suggestions: Vec::new(),
            votes: Vec::new(),
            summaries: Vec::new(),
            voting_ends: None,
            api_tokens: HashMap::new(),
        }
    }
}

impl PlusDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file, or create new if not exists
    pub async fn load(path: &str) -> crate::error::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| crate::error::PlusError::StateParse {
                    path: path.to_string(),
                    source: e,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(crate::error::PlusError::StateLoad {
                path: path.to_string(),
                source: e,
            }),
        }
    }

    /// Save to a JSON file atomically
    pub async fn save(&self, path: &str) -> crate::error::Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = format!("{}.tmp", path);
        tokio::fs::write(&temp_path, &content).await.map_err(|e| {
            crate::error::PlusError::StateSave {
                path: path.to_string(),
                source: e,
            }
        })?;

        tokio::fs::rename(&temp_path, path).await.map_err(|e| {
            crate::error::PlusError::StateSave {
                path: path.to_string(),
                source: e,
            }
        })?;

        Ok(())
    }

    pub fn touch(&mut self) {
        self.last_updated = current_timestamp();
    }

    /// Find a user by their Discord ID
    pub fn find_user(&self, discord_id: &str) -> Option<&User> {
        self.users.get(discord_id)
    }

    /// Resolve an issued API token to its user
    pub fn find_user_by_token(&self, token: &str) -> Option<&User> {
        self.api_tokens
            .get(token)
            .and_then(|discord_id| self.users.get(discord_id))
    }

    /// Add or update a user
    pub fn upsert_user(&mut self, user: User) {
        self.users.insert(user.discord_id.clone(), user);
        self.touch();
    }

    /// Users eligible as candidates for a server: current members plus
    /// users vouched into it this cycle.
    pub fn members_and_vouched(&self, server: PlusServer) -> Vec<&User> {
        self.users
            .values()
            .filter(|u| {
                u.plus.membership_status == Some(server) || u.plus.vouch_status == Some(server)
            })
            .collect()
    }

    /// How many users hold actual membership of a server
    pub fn member_count(&self, server: PlusServer) -> usize {
        self.users
            .values()
            .filter(|u| u.plus.membership_status == Some(server))
            .count()
    }

    /// Pending suggestions for a server
    pub fn suggestions_for(&self, server: PlusServer) -> Vec<&Suggestion> {
        self.suggestions
            .iter()
            .filter(|s| s.plus_server == server)
            .collect()
    }

    /// Find the pending suggestion of a nominee for a server
    pub fn find_suggestion(&self, discord_id: &str, server: PlusServer) -> Option<&Suggestion> {
        self.suggestions
            .iter()
            .find(|s| s.discord_id == discord_id && s.plus_server == server)
    }

    /// Find the pending suggestion made by a nominator this cycle
    pub fn suggestion_by_suggester(&self, suggester_discord_id: &str) -> Option<&Suggestion> {
        self.suggestions
            .iter()
            .find(|s| s.suggester_discord_id == suggester_discord_id)
    }

    /// Region a suggested candidate was nominated under, if any
    pub fn suggestion_region(&self, discord_id: &str) -> Option<PlusRegion> {
        self.suggestions
            .iter()
            .find(|s| s.discord_id == discord_id)
            .map(|s| s.plus_region)
    }

    /// A voter's recorded ballot for a server and cycle
    pub fn ballot_for(
        &self,
        voter_discord_id: &str,
        server: PlusServer,
        month: u32,
        year: i32,
    ) -> Vec<&Vote> {
        self.votes
            .iter()
            .filter(|v| {
                v.voter_discord_id == voter_discord_id
                    && v.plus_server == server
                    && v.month == month
                    && v.year == year
            })
            .collect()
    }

    /// Distinct voters who have submitted for a server this cycle
    pub fn voter_count(&self, server: PlusServer, month: u32, year: i32) -> usize {
        self.votes
            .iter()
            .filter(|v| v.plus_server == server && v.month == month && v.year == year)
            .map(|v| v.voter_discord_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Replace a voter's ballot for a cycle: their prior votes for the
    /// month are deleted before the new ones are inserted.
    pub fn replace_ballot(
        &mut self,
        voter_discord_id: &str,
        month: u32,
        year: i32,
        votes: Vec<Vote>,
    ) {
        self.votes.retain(|v| {
            !(v.voter_discord_id == voter_discord_id && v.month == month && v.year == year)
        });
        self.votes.extend(votes);
        self.touch();
    }
}

/// Shared database type
pub type SharedPlusDatabase = Arc<tokio::sync::RwLock<PlusDatabase>>;

pub fn create_shared_plus_database(db: PlusDatabase) -> SharedPlusDatabase {
    Arc::new(tokio::sync::RwLock::new(db))
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlusStatus;

    fn member(discord_id: &str, server: PlusServer) -> User {
        User {
            discord_id: discord_id.to_string(),
            username: discord_id.to_string(),
            plus: PlusStatus {
                membership_status: Some(server),
                ..Default::default()
            },
        }
    }

    fn vote(candidate: &str, voter: &str, server: PlusServer, score: i32) -> Vote {
        Vote {
            discord_id: candidate.to_string(),
            voter_discord_id: voter.to_string(),
            plus_server: server,
            month: 6,
            year: 2020,
            score,
        }
    }

    #[test]
    fn upsert_and_find() {
        let mut db = PlusDatabase::new();
        db.upsert_user(member("123", PlusServer::One));

        assert!(db.find_user("123").is_some());
        assert!(db.find_user("456").is_none());
        assert_eq!(db.member_count(PlusServer::One), 1);
        assert_eq!(db.member_count(PlusServer::Two), 0);
    }

    #[test]
    fn token_resolution() {
        let mut db = PlusDatabase::new();
        db.upsert_user(member("123", PlusServer::Two));
        db.api_tokens
            .insert("secret-token".to_string(), "123".to_string());

        assert_eq!(
            db.find_user_by_token("secret-token").map(|u| u.discord_id.as_str()),
            Some("123")
        );
        assert!(db.find_user_by_token("wrong").is_none());
    }

    #[test]
    fn vouched_users_are_eligible_candidates() {
        let mut db = PlusDatabase::new();
        db.upsert_user(member("a", PlusServer::One));
        let mut vouched = User::new("b".to_string(), "b".to_string());
        vouched.plus.vouch_status = Some(PlusServer::One);
        db.upsert_user(vouched);

        assert_eq!(db.members_and_vouched(PlusServer::One).len(), 2);
        // vouch does not count as membership
        assert_eq!(db.member_count(PlusServer::One), 1);
    }

    #[test]
    fn replace_ballot_is_delete_then_insert() {
        let mut db = PlusDatabase::new();
        db.votes.push(vote("a", "voter", PlusServer::One, 2));
        db.votes.push(vote("b", "voter", PlusServer::One, -1));
        db.votes.push(vote("a", "other", PlusServer::One, 1));

        db.replace_ballot(
            "voter",
            6,
            2020,
            vec![vote("a", "voter", PlusServer::One, -2)],
        );

        assert_eq!(db.votes.len(), 2);
        let replaced = db.ballot_for("voter", PlusServer::One, 6, 2020);
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].score, -2);
        // other voters' ballots are untouched
        assert_eq!(db.ballot_for("other", PlusServer::One, 6, 2020).len(), 1);
    }

    #[test]
    fn voter_count_is_distinct() {
        let mut db = PlusDatabase::new();
        db.votes.push(vote("a", "voter", PlusServer::One, 1));
        db.votes.push(vote("b", "voter", PlusServer::One, 1));
        db.votes.push(vote("a", "other", PlusServer::One, 1));

        assert_eq!(db.voter_count(PlusServer::One, 6, 2020), 2);
        assert_eq!(db.voter_count(PlusServer::Two, 6, 2020), 0);
    }
}
