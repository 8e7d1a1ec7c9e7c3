//! Monthly settlement: turns a cycle's votes into archived summaries,
//! membership transitions and vouch bookkeeping.
//!
//! `settle` is pure: it reads a store snapshot and a clock value and
//! decides everything without writing. `apply` then executes the
//! decisions in a fixed step order under the caller's write guard, so
//! the whole cycle lands in storage in one piece.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use tracing::warn;

use crate::models::{PlusRegion, PlusServer, Score, Summary};
use crate::state::PlusDatabase;

/// Candidates at or above this are let in; members strictly below it
/// are demoted.
const PASS_SCORE: f64 = 50.0;

/// Total required to earn the right to vouch someone into +1.
const VOUCH_SCORE_ONE: f64 = 90.0;

/// Total required to earn the right to vouch someone into +2.
const VOUCH_SCORE_TWO: f64 = 80.0;

/// Months a voucher is locked out after their vouchee fails the vote.
const VOUCH_LOCKOUT_MONTHS: u32 = 5;

/// A single field change produced by the tally. Applied strictly in
/// plan order, see `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserUpdate {
    Membership {
        discord_id: String,
        membership: Option<PlusServer>,
    },
    Region {
        discord_id: String,
        region: PlusRegion,
    },
    GrantVouch {
        discord_id: String,
        server: PlusServer,
    },
}

/// Cooldown for a voucher whose vouchee fell below the pass score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherPenalty {
    pub voucher_discord_id: String,
    pub can_vouch_again_after: DateTime<Utc>,
}

/// Everything one settlement run decided, before any of it is written.
#[derive(Debug, Default)]
pub struct Settlement {
    pub summaries: Vec<Summary>,
    pub updates: Vec<UserUpdate>,
    pub penalties: Vec<VoucherPenalty>,
}

/// Per-candidate vote buckets and the profile facts the tally needs.
#[derive(Debug)]
struct CandidateTally {
    discord_id: String,
    same_region: Vec<i32>,
    other_region: Vec<i32>,
    plus_region: PlusRegion,
    membership_status: Option<PlusServer>,
    cooldown_restricted: bool,
    voucher_discord_id: Option<String>,
}

/// Tally the cycle ending at `now`. +1 is settled before +2.
pub fn settle(db: &PlusDatabase, now: DateTime<Utc>) -> Settlement {
    let month = now.month();
    let year = now.year();

    let mut one: Vec<CandidateTally> = Vec::new();
    let mut two: Vec<CandidateTally> = Vec::new();

    for vote in db
        .votes
        .iter()
        .filter(|v| v.month == month && v.year == year)
    {
        let voter_region = db
            .find_user(&vote.voter_discord_id)
            .and_then(|u| u.plus.plus_region);
        let candidate = db.find_user(&vote.discord_id);

        // A member's region comes from their profile; a suggested
        // candidate's from the nomination record.
        let Some(candidate_region) = candidate
            .and_then(|u| u.plus.plus_region)
            .or_else(|| db.suggestion_region(&vote.discord_id))
        else {
            warn!(
                "No region resolvable for candidate {}, dropping a vote",
                vote.discord_id
            );
            continue;
        };

        let tallies = match vote.plus_server {
            PlusServer::One => &mut one,
            PlusServer::Two => &mut two,
        };
        let idx = match tallies
            .iter()
            .position(|t| t.discord_id == vote.discord_id)
        {
            Some(idx) => idx,
            None => {
                tallies.push(CandidateTally {
                    discord_id: vote.discord_id.clone(),
                    same_region: Vec::new(),
                    other_region: Vec::new(),
                    plus_region: candidate_region,
                    membership_status: candidate.and_then(|u| u.plus.membership_status),
                    cooldown_restricted: candidate
                        .and_then(|u| u.plus.can_vouch_again_after)
                        .is_some_and(|after| after > now),
                    voucher_discord_id: candidate.and_then(|u| {
                        if u.plus.vouch_status == Some(vote.plus_server) {
                            u.plus.voucher_discord_id.clone()
                        } else {
                            None
                        }
                    }),
                });
                tallies.len() - 1
            }
        };

        if voter_region == Some(candidate_region) {
            tallies[idx].same_region.push(vote.score);
        } else {
            tallies[idx].other_region.push(vote.score);
        }
    }

    let mut settlement = Settlement::default();
    for (server, tallies) in [(PlusServer::One, one), (PlusServer::Two, two)] {
        for tally in tallies {
            settle_candidate(&mut settlement, server, tally, month, year, now);
        }
    }
    settlement
}

fn settle_candidate(
    out: &mut Settlement,
    server: PlusServer,
    tally: CandidateTally,
    month: u32,
    year: i32,
    now: DateTime<Utc>,
) {
    let same_mean = mean(&tally.same_region);
    let other_mean = mean(&tally.other_region);

    // Same-region scores span -2..2, cross-region -1..1; each mean is
    // normalized to a 0-100 percentage.
    let same_score = same_mean.map(|m| round2((m + 2.0) / 4.0 * 100.0));
    let other_score = other_mean.map(|m| round2((m + 1.0) / 2.0 * 100.0));
    let total_score = match (same_mean, other_mean) {
        (Some(same), Some(other)) => Some(round2((same + other + 3.0) / 6.0 * 100.0)),
        _ => {
            warn!(
                "Candidate {} for {} is missing a region bucket ({} same, {} other); total left undefined",
                tally.discord_id,
                server,
                tally.same_region.len(),
                tally.other_region.len()
            );
            None
        }
    };

    let score = match tally.plus_region {
        PlusRegion::Eu => Score {
            total: total_score,
            eu: same_score,
            na: other_score,
        },
        PlusRegion::Na => Score {
            total: total_score,
            eu: other_score,
            na: same_score,
        },
    };

    let is_member = tally.membership_status == Some(server);
    let mut summary = Summary {
        discord_id: tally.discord_id.clone(),
        plus_server: server,
        month,
        year,
        suggested: false,
        vouched: false,
        new_member: !is_member,
        score,
    };

    // Demotion is exclusive at the pass score, promotion inclusive.
    // An undefined total changes nothing.
    match total_score {
        Some(total) if total < PASS_SCORE && is_member => {
            let demoted_to = match server {
                PlusServer::One => Some(PlusServer::Two),
                PlusServer::Two => None,
            };
            out.updates.push(UserUpdate::Membership {
                discord_id: tally.discord_id.clone(),
                membership: demoted_to,
            });
        }
        Some(total) if total >= PASS_SCORE && !is_member => {
            out.updates.push(UserUpdate::Membership {
                discord_id: tally.discord_id.clone(),
                membership: Some(server),
            });
        }
        _ => {}
    }

    if let Some(voucher) = &tally.voucher_discord_id {
        summary.vouched = true;
        if total_score.is_some_and(|total| total < PASS_SCORE) {
            out.penalties.push(VoucherPenalty {
                voucher_discord_id: voucher.clone(),
                can_vouch_again_after: first_of_month_after(now, VOUCH_LOCKOUT_MONTHS),
            });
        }
    }

    if tally.voucher_discord_id.is_none() && !is_member {
        summary.suggested = true;
        out.updates.push(UserUpdate::Region {
            discord_id: tally.discord_id.clone(),
            region: tally.plus_region,
        });
    }

    if !tally.cooldown_restricted {
        let threshold = match server {
            PlusServer::One => VOUCH_SCORE_ONE,
            PlusServer::Two => VOUCH_SCORE_TWO,
        };
        if total_score.is_some_and(|total| total >= threshold) {
            out.updates.push(UserUpdate::GrantVouch {
                discord_id: tally.discord_id.clone(),
                server,
            });
        }
    }

    out.summaries.push(summary);
}

/// Write a settlement into the store. The step order is load-bearing:
///
/// 1. Global resets for every user: clear `can_vouch`, clear expired
///    cooldowns, clear `vouch_status` and `voucher_discord_id`.
/// 2. Per-candidate updates, in tally order: membership transitions,
///    region persistence for suggested candidates, fresh vouch grants.
/// 3. Voucher penalties. Runs after step 2 so a grant earned this cycle
///    is still revoked when the voucher's vouchee failed.
/// 4. Archive summaries, purge the cycle's suggestions and votes, close
///    the window.
pub fn apply(db: &mut PlusDatabase, settlement: Settlement, now: DateTime<Utc>) {
    // Step 1: global resets.
    for user in db.users.values_mut() {
        user.plus.can_vouch = None;
        if user
            .plus
            .can_vouch_again_after
            .is_some_and(|after| after <= now)
        {
            user.plus.can_vouch_again_after = None;
        }
        user.plus.vouch_status = None;
        user.plus.voucher_discord_id = None;
    }

    // Step 2: per-candidate updates.
    for update in settlement.updates {
        match update {
            UserUpdate::Membership {
                discord_id,
                membership,
            } => {
                if let Some(user) = db.users.get_mut(&discord_id) {
                    user.plus.membership_status = membership;
                }
            }
            UserUpdate::Region { discord_id, region } => {
                if let Some(user) = db.users.get_mut(&discord_id) {
                    user.plus.plus_region = Some(region);
                }
            }
            UserUpdate::GrantVouch { discord_id, server } => {
                if let Some(user) = db.users.get_mut(&discord_id) {
                    user.plus.can_vouch = Some(server);
                }
            }
        }
    }

    // Step 3: voucher penalties.
    for penalty in settlement.penalties {
        if let Some(user) = db.users.get_mut(&penalty.voucher_discord_id) {
            user.plus.can_vouch_again_after = Some(penalty.can_vouch_again_after);
            user.plus.can_vouch = None;
        }
    }

    // Step 4: archive and purge.
    db.summaries.extend(settlement.summaries);
    db.suggestions.clear();
    db.votes.clear();
    db.voting_ends = None;
    db.touch();
}

fn mean(scores: &[i32]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<i32>() as f64 / scores.len() as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// First day of the month `months` ahead of `now`.
fn first_of_month_after(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let total = now.month0() + months;
    let year = now.year() + (total / 12) as i32;
    let month = total % 12 + 1;
    // Day 1 of a month in 1..=12 is always a valid date.
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
}
