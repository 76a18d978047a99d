//! Audience voting over effect candidates.
//!
//! A [`VoteSelection`] holds one round of numbered options and the latest
//! vote of every voter. Votes arrive as chat-style messages; the number
//! shown to voters is 1-indexed and, on alternating rounds, offset by the
//! option count so that stale numbers from the previous round do not land
//! on the new options.

use std::collections::BTreeMap;

use chaos_types::{EffectIndex, VoteWinnerMode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rng::EffectRng;
use crate::selection::WeightedSelector;

/// One option in a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "effect", rename_all = "snake_case")]
pub enum VoteOption {
    /// A specific effect.
    Effect(EffectIndex),
    /// Whatever the selector picks when the vote resolves.
    Random,
}

/// One round of voting, keyed by voter identity `K`.
#[derive(Debug, Clone)]
pub struct VoteSelection<K> {
    options: Vec<VoteOption>,
    votes: BTreeMap<K, usize>,
    offset_numbers: bool,
    winner_mode: VoteWinnerMode,
    active: bool,
}

impl<K: Ord> VoteSelection<K> {
    /// An inactive selection resolving winners with `winner_mode`.
    pub const fn new(winner_mode: VoteWinnerMode) -> Self {
        Self {
            options: Vec::new(),
            votes: BTreeMap::new(),
            offset_numbers: false,
            winner_mode,
            active: false,
        }
    }

    /// Change how winners are chosen.
    pub const fn set_winner_mode(&mut self, winner_mode: VoteWinnerMode) {
        self.winner_mode = winner_mode;
    }

    /// Open a new round. Previous votes are discarded.
    pub fn start_vote(&mut self, options: Vec<VoteOption>, offset_numbers: bool) {
        self.options = options;
        self.votes.clear();
        self.offset_numbers = offset_numbers;
        self.active = true;
    }

    /// Close the round and discard its state.
    pub fn end_vote(&mut self) {
        self.options.clear();
        self.votes.clear();
        self.active = false;
    }

    /// Whether a round is open.
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Options of the open round, in display order.
    pub fn options(&self) -> &[VoteOption] {
        &self.options
    }

    /// Whether displayed numbers are offset this round.
    pub const fn offset_numbers(&self) -> bool {
        self.offset_numbers
    }

    /// The number shown to voters for the option at `position`.
    pub fn display_number(&self, position: usize) -> usize {
        let base = if self.offset_numbers {
            self.options.len()
        } else {
            0
        };
        base.saturating_add(position).saturating_add(1)
    }

    /// Parse a vote message and record it.
    ///
    /// Returns false, without changing anything, for malformed or
    /// out-of-range numbers and when no round is open.
    pub fn submit_vote(&mut self, voter: K, message: &str) -> bool {
        if !self.active {
            return false;
        }
        let Ok(number) = message.trim().parse::<usize>() else {
            return false;
        };
        let number = if self.offset_numbers {
            number.checked_sub(self.options.len())
        } else {
            Some(number)
        };
        let Some(position) = number.and_then(|n| n.checked_sub(1)) else {
            return false;
        };
        self.set_vote(voter, position)
    }

    /// Record `voter`'s vote for the option at `position`. A voter's last
    /// vote wins.
    pub fn set_vote(&mut self, voter: K, position: usize) -> bool {
        if !self.active || position >= self.options.len() {
            return false;
        }
        self.votes.insert(voter, position);
        true
    }

    /// Vote count per option, in display order.
    pub fn tallies(&self) -> Vec<u32> {
        let mut tallies = vec![0_u32; self.options.len()];
        for position in self.votes.values() {
            if let Some(tally) = tallies.get_mut(*position) {
                *tally = tally.saturating_add(1);
            }
        }
        tallies
    }

    /// Number of voters.
    pub fn total_votes(&self) -> usize {
        self.votes.len()
    }

    /// Share of votes for the option at `position`, in `[0, 1]`.
    pub fn vote_percentage(&self, position: usize) -> f32 {
        let total = self.total_votes();
        if total == 0 {
            return 0.0;
        }
        let count = self.tallies().get(position).copied().unwrap_or(0);
        // Vote counts stay far below f32's exact integer range.
        #[allow(clippy::cast_precision_loss)]
        let share = count as f32 / total as f32;
        share
    }

    /// Pick the winning option.
    ///
    /// With no votes, every option is equally likely. Otherwise
    /// [`VoteWinnerMode::MostVotes`] picks uniformly among the options tied
    /// for the most votes and [`VoteWinnerMode::RandomProportional`] picks
    /// with probability proportional to each option's votes.
    pub fn resolve(&self, rng: &mut EffectRng) -> Option<VoteOption> {
        if self.options.is_empty() {
            return None;
        }
        if self.votes.is_empty() {
            debug!("No votes cast, picking a random option");
            let position = rng.index(self.options.len())?;
            return self.options.get(position).copied();
        }

        let tallies = self.tallies();
        match self.winner_mode {
            VoteWinnerMode::MostVotes => {
                let most = tallies.iter().copied().max().unwrap_or(0);
                let leaders: Vec<usize> = tallies
                    .iter()
                    .enumerate()
                    .filter(|(_, count)| **count == most)
                    .map(|(position, _)| position)
                    .collect();
                let pick = rng.index(leaders.len())?;
                leaders
                    .get(pick)
                    .and_then(|position| self.options.get(*position))
                    .copied()
            }
            VoteWinnerMode::RandomProportional => {
                let mut selector = WeightedSelector::with_capacity(tallies.len());
                for (option, count) in self.options.iter().zip(&tallies) {
                    // Vote counts stay far below f32's exact integer range.
                    #[allow(clippy::cast_precision_loss)]
                    let weight = *count as f32;
                    selector.add_choice(*option, weight);
                }
                selector.evaluate(rng.next_normalized()).copied()
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    fn options() -> Vec<VoteOption> {
        vec![
            VoteOption::Effect(EffectIndex(0)),
            VoteOption::Effect(EffectIndex(1)),
            VoteOption::Random,
        ]
    }

    #[test]
    fn votes_are_one_indexed() {
        let mut vote = VoteSelection::new(VoteWinnerMode::MostVotes);
        vote.start_vote(options(), false);
        assert!(vote.submit_vote("ana", "1"));
        assert!(vote.submit_vote("ben", " 3 "));
        assert_eq!(vote.tallies(), vec![1, 0, 1]);
    }

    #[test]
    fn malformed_and_out_of_range_votes_are_ignored() {
        let mut vote = VoteSelection::new(VoteWinnerMode::MostVotes);
        assert!(!vote.submit_vote("ana", "1"));
        vote.start_vote(options(), false);
        assert!(!vote.submit_vote("ana", "0"));
        assert!(!vote.submit_vote("ana", "4"));
        assert!(!vote.submit_vote("ana", "-1"));
        assert!(!vote.submit_vote("ana", "two"));
        assert_eq!(vote.total_votes(), 0);
    }

    #[test]
    fn offset_rounds_shift_numbers() {
        let mut vote = VoteSelection::new(VoteWinnerMode::MostVotes);
        vote.start_vote(options(), true);
        assert_eq!(vote.display_number(0), 4);
        assert!(!vote.submit_vote("ana", "1"));
        assert!(vote.submit_vote("ana", "5"));
        assert_eq!(vote.tallies(), vec![0, 1, 0]);
    }

    #[test]
    fn last_vote_per_voter_wins() {
        let mut vote = VoteSelection::new(VoteWinnerMode::MostVotes);
        vote.start_vote(options(), false);
        vote.submit_vote("ana", "1");
        vote.submit_vote("ana", "2");
        assert_eq!(vote.tallies(), vec![0, 1, 0]);
        assert_eq!(vote.total_votes(), 1);
        assert_eq!(vote.vote_percentage(1), 1.0);
    }

    #[test]
    fn most_votes_wins() {
        let mut vote = VoteSelection::new(VoteWinnerMode::MostVotes);
        vote.start_vote(options(), false);
        vote.submit_vote("ana", "1");
        vote.submit_vote("ben", "2");
        vote.submit_vote("cal", "2");
        let mut rng = EffectRng::from_seed(3);
        for _ in 0..20 {
            assert_eq!(vote.resolve(&mut rng), Some(VoteOption::Effect(EffectIndex(1))));
        }
    }

    #[test]
    fn ties_are_broken_randomly() {
        let mut vote = VoteSelection::new(VoteWinnerMode::MostVotes);
        vote.start_vote(options(), false);
        vote.submit_vote("ana", "1");
        vote.submit_vote("ben", "2");
        let mut rng = EffectRng::from_seed(11);
        let mut seen = [false; 2];
        for _ in 0..200 {
            match vote.resolve(&mut rng) {
                Some(VoteOption::Effect(EffectIndex(0))) => seen[0] = true,
                Some(VoteOption::Effect(EffectIndex(1))) => seen[1] = true,
                other => assert!(other.is_none(), "unexpected winner {other:?}"),
            }
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn proportional_never_picks_unvoted() {
        let mut vote = VoteSelection::new(VoteWinnerMode::RandomProportional);
        vote.start_vote(options(), false);
        vote.submit_vote("ana", "3");
        vote.submit_vote("ben", "2");
        let mut rng = EffectRng::from_seed(5);
        for _ in 0..200 {
            assert_ne!(vote.resolve(&mut rng), Some(VoteOption::Effect(EffectIndex(0))));
        }
    }

    #[test]
    fn no_votes_is_uniform() {
        let mut vote: VoteSelection<&str> = VoteSelection::new(VoteWinnerMode::MostVotes);
        vote.start_vote(options(), false);
        let mut rng = EffectRng::from_seed(9);
        let mut counts = [0_u32; 3];
        for _ in 0..3000 {
            let position = match vote.resolve(&mut rng).unwrap() {
                VoteOption::Effect(EffectIndex(i)) => usize::try_from(i).unwrap(),
                VoteOption::Random => 2,
            };
            counts[position] += 1;
        }
        assert!(counts.iter().all(|c| (800..1200).contains(c)));
    }

    #[test]
    fn ending_clears_everything() {
        let mut vote = VoteSelection::new(VoteWinnerMode::MostVotes);
        vote.start_vote(options(), false);
        vote.submit_vote("ana", "1");
        vote.end_vote();
        assert!(!vote.is_active());
        assert!(vote.options().is_empty());
        assert_eq!(vote.resolve(&mut EffectRng::from_seed(1)), None);
    }
}
