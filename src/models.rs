// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two invite-only servers members are voted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlusServer {
    One,
    Two,
}

impl std::fmt::Display for PlusServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlusServer::One => write!(f, "+1"),
            PlusServer::Two => write!(f, "+2"),
        }
    }
}

/// Region a member votes from. Same-region votes carry double weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlusRegion {
    Eu,
    Na,
}

/// Per-user plus server state. Only the settlement engine and admin
/// actions write to this.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlusStatus {
    pub membership_status: Option<PlusServer>,
    pub vouch_status: Option<PlusServer>,
    pub plus_region: Option<PlusRegion>,
    pub can_vouch: Option<PlusServer>,
    pub voucher_discord_id: Option<String>,
    pub can_vouch_again_after: Option<DateTime<Utc>>,
}

impl PlusStatus {
    /// Highest server this user currently belongs to, through membership
    /// or an active vouch. +1 outranks +2.
    pub fn server_access(&self) -> Option<PlusServer> {
        let statuses = [self.membership_status, self.vouch_status];
        if statuses.contains(&Some(PlusServer::One)) {
            Some(PlusServer::One)
        } else if statuses.contains(&Some(PlusServer::Two)) {
            Some(PlusServer::Two)
        } else {
            None
        }
    }

    /// Whether this user may enter the given server. +1 access grants +2.
    pub fn grants_access(&self, server: PlusServer) -> bool {
        match self.server_access() {
            Some(PlusServer::One) => true,
            Some(PlusServer::Two) => server == PlusServer::Two,
            None => false,
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub discord_id: String,
    pub username: String,
    #[serde(default)]
    pub plus: PlusStatus,
}

impl User {
    pub fn new(discord_id: String, username: String) -> Self {
        Self {
            discord_id,
            username,
            plus: PlusStatus::default(),
        }
    }
}

/// A pending nomination for membership. At most one per nominator per
/// cycle; purged when the cycle settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub discord_id: String,
    pub suggester_discord_id: String,
    pub plus_server: PlusServer,
    pub plus_region: PlusRegion,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// One recorded vote: (voter, candidate, cycle). Scores are -2, -1, 1
/// or 2; the double weights are only valid within the voter's region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub discord_id: String,
    pub voter_discord_id: String,
    pub plus_server: PlusServer,
    pub month: u32,
    pub year: i32,
    pub score: i32,
}

/// Percentage score breakdown for a settled candidate. A component is
/// `None` when the corresponding region bucket had no voters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub total: Option<f64>,
    pub eu: Option<f64>,
    pub na: Option<f64>,
}

/// Immutable archival record of one candidate's result for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub discord_id: String,
    pub plus_server: PlusServer,
    pub month: u32,
    pub year: i32,
    #[serde(default)]
    pub suggested: bool,
    #[serde(default)]
    pub vouched: bool,
    #[serde(rename = "new", default)]
    pub new_member: bool,
    pub score: Score,
}
