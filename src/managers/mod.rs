pub mod settlement;
pub mod suggestion_manager;
pub mod voting_manager;

pub use suggestion_manager::{
    create_shared_suggestion_manager, NewSuggestion, SharedSuggestionManager, SuggestionManager,
};
pub use voting_manager::{
    create_shared_voting_manager, BallotEntry, SharedVotingManager, VotingManager,
};
