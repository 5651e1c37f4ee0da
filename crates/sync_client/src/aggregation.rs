//! Derived values computed from the canonical snapshot.
//!
//! These are shared by the poll reconciler (to decide whether a card changed) and by the
//! rendering side (to decide what to draw), so both always agree.

use std::collections::HashSet;

use shared::domain::{Board, Card, Phase, Vote, VoteType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct VoteTally {
    pub likes: u32,
    pub dislikes: u32,
}

impl VoteTally {
    pub fn count(&self, vote_type: VoteType) -> u32 {
        match vote_type {
            VoteType::Like => self.likes,
            VoteType::Dislike => self.dislikes,
        }
    }
}

impl std::ops::Add for VoteTally {
    type Output = VoteTally;

    fn add(self, rhs: VoteTally) -> VoteTally {
        VoteTally {
            likes: self.likes + rhs.likes,
            dislikes: self.dislikes + rhs.dislikes,
        }
    }
}

/// Votes cast directly on `card`. A user counts at most once per vote type.
pub fn own_tally(card: &Card) -> VoteTally {
    let mut seen: HashSet<(&str, VoteType)> = HashSet::new();
    let mut tally = VoteTally::default();
    for vote in &card.votes {
        if !seen.insert((vote.user_name.as_str(), vote.vote_type)) {
            continue;
        }
        match vote.vote_type {
            VoteType::Like => tally.likes += 1,
            VoteType::Dislike => tally.dislikes += 1,
        }
    }
    tally
}

/// Own votes plus the votes of every card folded into `card`.
pub fn effective_tally(card: &Card) -> VoteTally {
    card.merged_cards
        .iter()
        .fold(own_tally(card), |tally, child| tally + own_tally(child))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyView {
    Counts(VoteTally),
    Hidden,
}

/// What a participant may see for `card`: counts stay hidden during a blind voting phase.
pub fn visible_tally(board: &Board, card: &Card) -> TallyView {
    if board.blind_voting && board.phase == Phase::Voting {
        TallyView::Hidden
    } else {
        TallyView::Counts(effective_tally(card))
    }
}

pub fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Input => "Input",
        Phase::Voting => "Voting",
        Phase::Discussion => "Discussion",
    }
}

/// Label shown in the board header; a finished board reads as finished whatever its phase.
pub fn effective_phase_label(board: &Board) -> &'static str {
    if board.is_finished() {
        "Finished"
    } else {
        phase_label(board.phase)
    }
}

pub fn can_control(board: &Board, identity: &str) -> bool {
    board.owner == identity
        || board.co_owner.as_deref() == Some(identity)
        || board.managers.iter().any(|manager| manager == identity)
}

pub fn find_vote<'a>(card: &'a Card, identity: &str, vote_type: VoteType) -> Option<&'a Vote> {
    card.votes
        .iter()
        .find(|vote| vote.user_name == identity && vote.vote_type == vote_type)
}

#[cfg(test)]
#[path = "tests/aggregation_tests.rs"]
mod tests;
