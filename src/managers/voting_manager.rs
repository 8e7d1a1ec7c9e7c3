use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AppConfig;
use crate::error::{PlusError, Result};
use crate::managers::settlement;
use crate::models::{PlusServer, Suggestion, Summary, User, Vote};
use crate::state::SharedPlusDatabase;

/// One entry of a submitted ballot.
#[derive(Debug, Clone, Deserialize)]
pub struct BallotEntry {
    pub discord_id: String,
    pub score: i32,
}

/// General voting-cycle information for a member.
#[derive(Debug, Clone, Serialize)]
pub struct VotingInfo {
    pub plus_one_invite_link: Option<String>,
    pub plus_two_invite_link: String,
    pub voting_ends: Option<DateTime<Utc>>,
    pub voter_count: usize,
    pub eligible_voter_count: usize,
}

/// Everything a member needs to fill in a ballot.
#[derive(Debug, Clone, Serialize)]
pub struct CandidatesForVoting {
    pub users: Vec<User>,
    pub suggestions: Vec<Suggestion>,
    pub votes: Vec<Vote>,
}

/// Validates and records ballots, controls the voting window and runs
/// settlement when the window closes.
pub struct VotingManager {
    db: SharedPlusDatabase,
    db_path: String,
    config: AppConfig,
}

impl VotingManager {
    pub fn new(db: SharedPlusDatabase, db_path: String, config: AppConfig) -> Self {
        Self {
            db,
            db_path,
            config,
        }
    }

    /// Record a member's ballot for the open cycle. A resubmission
    /// replaces the member's prior ballot; the delete and insert happen
    /// under one write guard.
    pub async fn submit_votes(&self, caller: &User, ballot: Vec<BallotEntry>) -> Result<usize> {
        let Some(server) = caller.plus.membership_status else {
            return Err(PlusError::access_denied("Not a plus server member."));
        };

        let now = Utc::now();
        let mut db = self.db.write().await;

        match db.voting_ends {
            Some(ends) if ends >= now => {}
            _ => return Err(PlusError::operation("Voting is not open right now.")),
        }

        let mut seen = HashSet::new();
        for entry in &ballot {
            if !seen.insert(entry.discord_id.as_str()) {
                return Err(PlusError::invalid_input(format!(
                    "Duplicate vote for the id {}",
                    entry.discord_id
                )));
            }
        }

        {
            let members = db.members_and_vouched(server);
            let suggested = db.suggestions_for(server);

            // A ballot covers every eligible candidate, no more, no less.
            if members.len() + suggested.len() != ballot.len() {
                return Err(PlusError::invalid_input(
                    "Invalid number of votes provided.",
                ));
            }

            let voter_region = caller.plus.plus_region;
            for entry in &ballot {
                let candidate_region =
                    match members.iter().find(|u| u.discord_id == entry.discord_id) {
                        Some(user) => user.plus.plus_region,
                        None => match suggested.iter().find(|s| s.discord_id == entry.discord_id) {
                            Some(suggestion) => Some(suggestion.plus_region),
                            None => {
                                return Err(PlusError::invalid_input(format!(
                                    "Invalid user voted on with the id {}",
                                    entry.discord_id
                                )))
                            }
                        },
                    };

                if !matches!(entry.score, -2 | -1 | 1 | 2) {
                    return Err(PlusError::invalid_input(format!(
                        "Invalid score provided: {}",
                        entry.score
                    )));
                }
                let same_region = voter_region
                    .zip(candidate_region)
                    .is_some_and(|(voter, candidate)| voter == candidate);
                if entry.score.abs() == 2 && !same_region {
                    return Err(PlusError::invalid_input(
                        "Score of -2 or 2 given across regions.",
                    ));
                }
            }
        }

        let month = now.month();
        let year = now.year();
        let votes: Vec<Vote> = ballot
            .into_iter()
            .map(|entry| Vote {
                discord_id: entry.discord_id,
                voter_discord_id: caller.discord_id.clone(),
                plus_server: server,
                month,
                year,
                score: entry.score,
            })
            .collect();
        let count = votes.len();
        db.replace_ballot(&caller.discord_id, month, year, votes);
        db.save(&self.db_path).await?;

        info!("Recorded {} votes from {}", count, caller.discord_id);
        Ok(count)
    }

    /// Open the voting window. Admin only.
    pub async fn start_voting(&self, caller: &User, ends: DateTime<Utc>) -> Result<()> {
        self.require_admin(caller)?;

        let mut db = self.db.write().await;
        db.voting_ends = Some(ends);
        db.touch();
        db.save(&self.db_path).await?;

        info!("Voting window open until {}", ends);
        Ok(())
    }

    /// Close the window and settle the cycle. Admin only. The tally,
    /// all user updates, the purge and the window clear land in one
    /// write-guard scope and one save.
    pub async fn end_voting(&self, caller: &User) -> Result<usize> {
        self.require_admin(caller)?;

        let now = Utc::now();
        let mut db = self.db.write().await;
        let settlement = settlement::settle(&db, now);
        let settled = settlement.summaries.len();
        settlement::apply(&mut db, settlement, now);
        db.save(&self.db_path).await?;

        info!("Voting ended, {} candidates settled", settled);
        Ok(settled)
    }

    /// Cycle overview for a member or vouched user.
    pub async fn voting_info(&self, caller: &User) -> Result<VotingInfo> {
        let Some(server) = caller
            .plus
            .membership_status
            .or(caller.plus.vouch_status)
        else {
            return Err(PlusError::access_denied("Not a plus server member."));
        };

        let now = Utc::now();
        let db = self.db.read().await;

        let plus_one_invite_link = if caller.plus.server_access() == Some(PlusServer::One) {
            self.config.plus_one_invite_link.clone()
        } else {
            None
        };

        Ok(VotingInfo {
            plus_one_invite_link,
            plus_two_invite_link: self.config.plus_two_invite_link.clone(),
            voting_ends: db.voting_ends,
            voter_count: db.voter_count(server, now.month(), now.year()),
            eligible_voter_count: db.member_count(server),
        })
    }

    /// The caller's ballot sheet: eligible users and suggestions for
    /// their server, in randomized order, plus any votes they already
    /// submitted this cycle.
    pub async fn candidates_for_voting(&self, caller: &User) -> Result<CandidatesForVoting> {
        let Some(server) = caller.plus.membership_status else {
            return Err(PlusError::access_denied("Not a plus server member."));
        };

        let now = Utc::now();
        let db = self.db.read().await;

        let mut users: Vec<User> = db
            .members_and_vouched(server)
            .into_iter()
            .cloned()
            .collect();
        let mut suggestions: Vec<Suggestion> =
            db.suggestions_for(server).into_iter().cloned().collect();

        let mut rng = rand::thread_rng();
        users.shuffle(&mut rng);
        suggestions.shuffle(&mut rng);

        let votes = db
            .ballot_for(&caller.discord_id, server, now.month(), now.year())
            .into_iter()
            .cloned()
            .collect();

        Ok(CandidatesForVoting {
            users,
            suggestions,
            votes,
        })
    }

    /// Archived results visible to the caller: +1 members see every
    /// server, +2 members only +2. Best totals first, then newest.
    pub async fn summaries(&self, caller: &User) -> Result<Vec<Summary>> {
        let Some(membership) = caller.plus.membership_status else {
            return Err(PlusError::access_denied("Not a plus server member."));
        };
        let see_all = membership == PlusServer::One;

        let db = self.db.read().await;
        let mut summaries: Vec<Summary> = db
            .summaries
            .iter()
            .filter(|s| see_all || s.plus_server == PlusServer::Two)
            .cloned()
            .collect();
        summaries.sort_by(|a, b| {
            b.score
                .total
                .partial_cmp(&a.score.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.year.cmp(&a.year))
                .then(b.month.cmp(&a.month))
        });
        Ok(summaries)
    }

    /// Whether a user may enter the given server, by membership or
    /// active vouch.
    pub async fn has_access(&self, discord_id: &str, server: PlusServer) -> bool {
        let db = self.db.read().await;
        db.find_user(discord_id)
            .map(|u| u.plus.grants_access(server))
            .unwrap_or(false)
    }

    fn require_admin(&self, caller: &User) -> Result<()> {
        if !self.config.is_admin(&caller.discord_id) {
            return Err(PlusError::access_denied("Not admin."));
        }
        Ok(())
    }
}

/// Shared voting manager type
pub type SharedVotingManager = Arc<VotingManager>;

pub fn create_shared_voting_manager(
    db: SharedPlusDatabase,
    db_path: String,
    config: AppConfig,
) -> SharedVotingManager {
    Arc::new(VotingManager::new(db, db_path, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlusRegion, PlusStatus};
    use crate::state::{create_shared_plus_database, PlusDatabase};
    use chrono::Duration;

    use PlusRegion::{Eu, Na};
    use PlusServer::{One, Two};

    fn member(id: &str, server: PlusServer, region: PlusRegion) -> User {
        User {
            discord_id: id.to_string(),
            username: id.to_string(),
            plus: PlusStatus {
                membership_status: Some(server),
                plus_region: Some(region),
                ..Default::default()
            },
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            admin_discord_id: "admin".to_string(),
            admin_token: None,
            plus_one_invite_link: Some("https://discord.gg/plus-one".to_string()),
            plus_two_invite_link: "https://discord.gg/plus-two".to_string(),
            bind_port: 0,
            state_path: std::env::temp_dir().to_string_lossy().into_owned(),
        }
    }

    fn manager_with(users: Vec<User>, window_open: bool) -> VotingManager {
        let mut db = PlusDatabase::new();
        for user in users {
            db.upsert_user(user);
        }
        if window_open {
            db.voting_ends = Some(Utc::now() + Duration::days(1));
        }
        let path = std::env::temp_dir()
            .join(format!("plus-voting-{}.json", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        VotingManager::new(create_shared_plus_database(db), path, test_config())
    }

    /// Two +2 members (EU voter, NA teammate) and nothing else.
    fn two_member_roster() -> Vec<User> {
        vec![member("voter", Two, Eu), member("teammate", Two, Na)]
    }

    fn ballot(entries: &[(&str, i32)]) -> Vec<BallotEntry> {
        entries
            .iter()
            .map(|(id, score)| BallotEntry {
                discord_id: id.to_string(),
                score: *score,
            })
            .collect()
    }

    #[tokio::test]
    async fn accepts_a_complete_ballot() {
        let manager = manager_with(two_member_roster(), true);
        let caller = member("voter", Two, Eu);

        let count = manager
            .submit_votes(&caller, ballot(&[("voter", 1), ("teammate", 1)]))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn rejects_when_no_window_is_open() {
        let manager = manager_with(two_member_roster(), false);
        let caller = member("voter", Two, Eu);

        let err = manager
            .submit_votes(&caller, ballot(&[("voter", 1), ("teammate", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PlusError::Operation { .. }));
    }

    #[tokio::test]
    async fn rejects_a_window_already_past() {
        let manager = manager_with(two_member_roster(), false);
        manager.db.write().await.voting_ends = Some(Utc::now() - Duration::hours(1));
        let caller = member("voter", Two, Eu);

        let err = manager
            .submit_votes(&caller, ballot(&[("voter", 1), ("teammate", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PlusError::Operation { .. }));
    }

    #[tokio::test]
    async fn rejects_non_members() {
        let manager = manager_with(two_member_roster(), true);
        let outsider = User::new("outsider".to_string(), "outsider".to_string());

        let err = manager
            .submit_votes(&outsider, ballot(&[("voter", 1), ("teammate", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PlusError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn rejects_duplicate_candidates() {
        let manager = manager_with(two_member_roster(), true);
        let caller = member("voter", Two, Eu);

        let err = manager
            .submit_votes(&caller, ballot(&[("voter", 1), ("voter", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PlusError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn rejects_an_incomplete_ballot() {
        let manager = manager_with(two_member_roster(), true);
        let caller = member("voter", Two, Eu);

        let err = manager
            .submit_votes(&caller, ballot(&[("voter", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PlusError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn rejects_scores_outside_the_valid_set() {
        let manager = manager_with(two_member_roster(), true);
        let caller = member("voter", Two, Eu);

        for bad_score in [0, 3, -3, 100] {
            let err = manager
                .submit_votes(
                    &caller,
                    ballot(&[("voter", 1), ("teammate", bad_score)]),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, PlusError::InvalidInput { .. }));
        }
    }

    #[tokio::test]
    async fn double_weight_requires_same_region() {
        let manager = manager_with(two_member_roster(), true);
        let caller = member("voter", Two, Eu);

        // +-2 on the NA teammate from an EU voter is rejected.
        let err = manager
            .submit_votes(&caller, ballot(&[("voter", 1), ("teammate", 2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PlusError::InvalidInput { .. }));

        // +-2 on themselves (same region) and +-1 across regions pass.
        manager
            .submit_votes(&caller, ballot(&[("voter", 2), ("teammate", -1)]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn double_weight_works_against_a_suggested_candidate() {
        let manager = manager_with(vec![member("voter", Two, Eu)], true);
        {
            let mut db = manager.db.write().await;
            db.upsert_user(User::new("cand".to_string(), "cand".to_string()));
            db.suggestions.push(Suggestion {
                discord_id: "cand".to_string(),
                suggester_discord_id: "voter".to_string(),
                plus_server: Two,
                plus_region: Eu,
                description: "ringer".to_string(),
                created_at: Utc::now(),
            });
        }
        let caller = member("voter", Two, Eu);

        manager
            .submit_votes(&caller, ballot(&[("voter", 1), ("cand", 2)]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resubmission_replaces_the_prior_ballot() {
        let manager = manager_with(two_member_roster(), true);
        let caller = member("voter", Two, Eu);

        manager
            .submit_votes(&caller, ballot(&[("voter", 1), ("teammate", 1)]))
            .await
            .unwrap();
        manager
            .submit_votes(&caller, ballot(&[("voter", 1), ("teammate", -1)]))
            .await
            .unwrap();

        let db = manager.db.read().await;
        assert_eq!(db.votes.len(), 2);
        let teammate_vote = db
            .votes
            .iter()
            .find(|v| v.discord_id == "teammate")
            .unwrap();
        assert_eq!(teammate_vote.score, -1);
    }

    #[tokio::test]
    async fn window_control_is_admin_only() {
        let manager = manager_with(two_member_roster(), false);
        let caller = member("voter", Two, Eu);

        let err = manager
            .start_voting(&caller, Utc::now() + Duration::days(3))
            .await
            .unwrap_err();
        assert!(matches!(err, PlusError::AccessDenied { .. }));
        let err = manager.end_voting(&caller).await.unwrap_err();
        assert!(matches!(err, PlusError::AccessDenied { .. }));

        let admin = User::new("admin".to_string(), "admin".to_string());
        manager
            .start_voting(&admin, Utc::now() + Duration::days(3))
            .await
            .unwrap();
        assert!(manager.db.read().await.voting_ends.is_some());
    }

    #[tokio::test]
    async fn ending_the_window_settles_and_purges_the_cycle() {
        let manager = manager_with(two_member_roster(), true);
        let caller = member("voter", Two, Eu);
        let teammate = member("teammate", Two, Na);

        manager
            .submit_votes(&caller, ballot(&[("voter", 1), ("teammate", 1)]))
            .await
            .unwrap();
        manager
            .submit_votes(&teammate, ballot(&[("voter", 1), ("teammate", 1)]))
            .await
            .unwrap();

        let admin = User::new("admin".to_string(), "admin".to_string());
        let settled = manager.end_voting(&admin).await.unwrap();
        assert_eq!(settled, 2);

        let db = manager.db.read().await;
        assert!(db.votes.is_empty());
        assert!(db.suggestions.is_empty());
        assert_eq!(db.voting_ends, None);
        assert_eq!(db.summaries.len(), 2);
    }

    #[tokio::test]
    async fn voting_info_reflects_the_cycle() {
        let manager = manager_with(
            vec![
                member("one-member", One, Eu),
                member("voter", Two, Eu),
                member("teammate", Two, Na),
            ],
            true,
        );
        let caller = member("voter", Two, Eu);

        manager
            .submit_votes(
                &caller,
                ballot(&[("voter", 1), ("teammate", 1)]),
            )
            .await
            .unwrap();

        let info = manager.voting_info(&caller).await.unwrap();
        assert_eq!(info.voter_count, 1);
        assert_eq!(info.eligible_voter_count, 2);
        assert!(info.voting_ends.is_some());
        // +2 members only get the +2 invite link.
        assert_eq!(info.plus_one_invite_link, None);
        assert_eq!(info.plus_two_invite_link, "https://discord.gg/plus-two");

        let one_info = manager
            .voting_info(&member("one-member", One, Eu))
            .await
            .unwrap();
        assert_eq!(
            one_info.plus_one_invite_link.as_deref(),
            Some("https://discord.gg/plus-one")
        );
    }

    #[tokio::test]
    async fn candidates_cover_members_vouched_and_suggested() {
        let manager = manager_with(two_member_roster(), true);
        {
            let mut db = manager.db.write().await;
            let mut vouched = User::new("vouched".to_string(), "vouched".to_string());
            vouched.plus.vouch_status = Some(Two);
            db.upsert_user(vouched);
            db.upsert_user(User::new("cand".to_string(), "cand".to_string()));
            db.suggestions.push(Suggestion {
                discord_id: "cand".to_string(),
                suggester_discord_id: "voter".to_string(),
                plus_server: Two,
                plus_region: Eu,
                description: "ringer".to_string(),
                created_at: Utc::now(),
            });
        }
        let caller = member("voter", Two, Eu);

        let sheet = manager.candidates_for_voting(&caller).await.unwrap();
        assert_eq!(sheet.users.len(), 3);
        assert_eq!(sheet.suggestions.len(), 1);
        assert!(sheet.votes.is_empty());
    }

    #[tokio::test]
    async fn summaries_are_filtered_and_ordered() {
        let manager = manager_with(
            vec![member("one-member", One, Eu), member("two-member", Two, Eu)],
            false,
        );
        {
            let mut db = manager.db.write().await;
            let summary = |id: &str, server, month, year, total| Summary {
                discord_id: id.to_string(),
                plus_server: server,
                month,
                year,
                suggested: false,
                vouched: false,
                new_member: false,
                score: crate::models::Score {
                    total,
                    eu: total,
                    na: total,
                },
            };
            db.summaries.push(summary("low", Two, 5, 2020, Some(40.0)));
            db.summaries.push(summary("high", Two, 5, 2020, Some(90.0)));
            db.summaries
                .push(summary("undefined", Two, 5, 2020, None));
            db.summaries.push(summary("elite", One, 5, 2020, Some(95.0)));
        }

        let all = manager
            .summaries(&member("one-member", One, Eu))
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].discord_id, "elite");
        assert_eq!(all[1].discord_id, "high");
        // Undefined totals sort last.
        assert_eq!(all[3].discord_id, "undefined");

        let two_only = manager
            .summaries(&member("two-member", Two, Eu))
            .await
            .unwrap();
        assert_eq!(two_only.len(), 3);
    }

    #[tokio::test]
    async fn access_follows_membership_and_vouch() {
        let manager = manager_with(vec![member("one-member", One, Eu)], false);
        {
            let mut db = manager.db.write().await;
            let mut vouched = User::new("vouched".to_string(), "vouched".to_string());
            vouched.plus.vouch_status = Some(Two);
            db.upsert_user(vouched);
        }

        assert!(manager.has_access("one-member", One).await);
        assert!(manager.has_access("one-member", Two).await);
        assert!(!manager.has_access("vouched", One).await);
        assert!(manager.has_access("vouched", Two).await);
        assert!(!manager.has_access("stranger", Two).await);
    }
}
