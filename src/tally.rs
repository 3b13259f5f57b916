//! Turning a round's anonymous ballots into ranked tallies and a majority verdict.
//!
//! Everything here is pure: callers load the ballots and the roster, and
//! decide what to do with the result.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{db::Participant, mongodb::Id};

/// Name shown for a candidate who is no longer on the roster.
pub const UNKNOWN_CANDIDATE: &str = "Unknown";

/// Votes received by one option. `candidate_id == None` is an abstention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub candidate_id: Option<Id>,
    pub candidate_name: Option<String>,
    pub count: u32,
}

impl Tally {
    pub fn is_abstain(&self) -> bool {
        self.candidate_id.is_none()
    }
}

/// Count ballots per option, abstentions under `None`.
pub fn count_ballots<I>(candidates: I) -> HashMap<Option<Id>, u32>
where
    I: IntoIterator<Item = Option<Id>>,
{
    let mut counts = HashMap::new();
    for candidate in candidates {
        *counts.entry(candidate).or_insert(0) += 1;
    }
    counts
}

/// Rank counted options, most votes first.
///
/// Equal counts are broken deterministically: candidates in roster (join)
/// order, then abstention, then candidates missing from the roster by ID.
pub fn build_tallies(counts: HashMap<Option<Id>, u32>, roster: &[Participant]) -> Vec<Tally> {
    let position: HashMap<Id, usize> = roster.iter().enumerate().map(|(i, p)| (p.id, i)).collect();
    let names: HashMap<Id, &str> = roster.iter().map(|p| (p.id, p.name.as_str())).collect();

    let mut tallies: Vec<Tally> = counts
        .into_iter()
        .map(|(candidate_id, count)| Tally {
            candidate_id,
            candidate_name: candidate_id.map(|id| {
                names
                    .get(&id)
                    .copied()
                    .unwrap_or(UNKNOWN_CANDIDATE)
                    .to_string()
            }),
            count,
        })
        .collect();

    // (rank group, roster position, raw ID bytes)
    let order = |tally: &Tally| match tally.candidate_id {
        Some(id) => match position.get(&id) {
            Some(&index) => (0, index, [0; 12]),
            None => (2, 0, id.bytes()),
        },
        None => (1, 0, [0; 12]),
    };
    tallies.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| order(a).cmp(&order(b))));
    tallies
}

/// Smallest count that is a strict majority of `base`.
pub fn majority_threshold(base: u32) -> u32 {
    base / 2 + 1
}

/// Is `top_count` strictly more than half of `base`?
pub fn has_majority(top_count: u32, base: u32) -> bool {
    top_count > base / 2
}

/// The denominator majorities are measured against.
pub fn majority_base(body_size: Option<u32>, total_votes: u32) -> u32 {
    body_size.unwrap_or(total_votes)
}

/// The leading entries of a ranked tally, ties included.
pub fn top_candidates(tallies: &[Tally]) -> &[Tally] {
    match tallies.first() {
        Some(first) => {
            let len = tallies.iter().take_while(|t| t.count == first.count).count();
            &tallies[..len]
        }
        None => &[],
    }
}

/// A round's full, unfiltered outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub tallies: Vec<Tally>,
    pub total_votes: u32,
    pub body_size: Option<u32>,
    pub majority_base: u32,
    pub majority_threshold: u32,
    /// Whether a candidate (never abstention) holds a strict majority.
    pub has_majority: bool,
}

impl Verdict {
    pub fn new(tallies: Vec<Tally>, body_size: Option<u32>) -> Self {
        let total_votes = tallies.iter().map(|t| t.count).sum();
        let base = majority_base(body_size, total_votes);
        let top_candidate = tallies
            .iter()
            .filter(|t| !t.is_abstain())
            .map(|t| t.count)
            .max()
            .unwrap_or(0);
        Self {
            total_votes,
            body_size,
            majority_base: base,
            majority_threshold: majority_threshold(base),
            has_majority: top_candidate > 0 && has_majority(top_candidate, base),
            tallies,
        }
    }

    /// Tally a round from its ballots' choices and the session roster.
    pub fn from_ballots<I>(candidates: I, roster: &[Participant], body_size: Option<u32>) -> Self
    where
        I: IntoIterator<Item = Option<Id>>,
    {
        Self::new(build_tallies(count_ballots(candidates), roster), body_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::common::ParticipantRole;

    fn roster(names: &[&str]) -> Vec<Participant> {
        let session = Id::new();
        names
            .iter()
            .map(|name| Participant::new(session, name.to_string(), ParticipantRole::Voter))
            .collect()
    }

    fn votes(choices: &[(Option<Id>, u32)]) -> Vec<Option<Id>> {
        choices
            .iter()
            .flat_map(|&(c, n)| std::iter::repeat(c).take(n as usize))
            .collect()
    }

    #[test]
    fn threshold_boundaries() {
        assert_eq!(majority_threshold(9), 5);
        assert_eq!(majority_threshold(10), 6);
        assert_eq!(majority_threshold(1), 1);
        assert_eq!(majority_threshold(0), 1);
    }

    #[test]
    fn majority_is_strictly_more_than_half() {
        for base in 0..30 {
            for top in 0..=base {
                assert_eq!(has_majority(top, base), top >= majority_threshold(base));
            }
        }
        assert!(!has_majority(5, 10));
        assert!(has_majority(6, 10));
        assert!(has_majority(5, 9));
        assert!(!has_majority(4, 9));
    }

    #[test]
    fn body_size_overrides_votes_cast() {
        assert_eq!(majority_base(Some(9), 3), 9);
        assert_eq!(majority_base(None, 3), 3);
    }

    #[test]
    fn abstain_is_counted_like_any_option() {
        let a = Id::new();
        let counts = count_ballots(vec![Some(a), None, None, Some(a), None]);
        assert_eq!(counts[&Some(a)], 2);
        assert_eq!(counts[&None], 3);
    }

    #[test]
    fn tallies_rank_by_count_then_roster_order() {
        let people = roster(&["Ann", "Bob", "Cat"]);
        let (ann, bob, cat) = (people[0].id, people[1].id, people[2].id);
        let counts = count_ballots(votes(&[(Some(cat), 3), (Some(bob), 3), (None, 3), (Some(ann), 1)]));

        let tallies = build_tallies(counts, &people);
        let order: Vec<_> = tallies.iter().map(|t| (t.candidate_id, t.count)).collect();
        assert_eq!(
            order,
            vec![(Some(bob), 3), (Some(cat), 3), (None, 3), (Some(ann), 1)]
        );
        assert_eq!(tallies[0].candidate_name.as_deref(), Some("Bob"));
        assert_eq!(tallies[2].candidate_name, None);
    }

    #[test]
    fn departed_candidates_are_named_unknown_and_ranked_last_among_equals() {
        let people = roster(&["Ann"]);
        let gone = Id::new();
        let counts = count_ballots(votes(&[(Some(gone), 2), (Some(people[0].id), 2)]));

        let tallies = build_tallies(counts, &people);
        assert_eq!(tallies[0].candidate_id, Some(people[0].id));
        assert_eq!(tallies[1].candidate_id, Some(gone));
        assert_eq!(tallies[1].candidate_name.as_deref(), Some(UNKNOWN_CANDIDATE));
    }

    #[test]
    fn top_candidates_include_ties() {
        let people = roster(&["A", "B"]);
        let (a, b) = (people[0].id, people[1].id);
        let tallies = build_tallies(
            count_ballots(votes(&[(Some(a), 5), (Some(b), 5), (None, 2)])),
            &people,
        );
        let top: Vec<_> = top_candidates(&tallies).iter().map(|t| t.candidate_id).collect();
        assert_eq!(top, vec![Some(a), Some(b)]);
        assert!(top_candidates(&[]).is_empty());
    }

    #[test]
    fn abstain_can_lead_but_never_holds_a_majority() {
        let people = roster(&["A"]);
        let a = people[0].id;
        let verdict = Verdict::from_ballots(votes(&[(None, 4), (Some(a), 1)]), &people, None);
        assert!(top_candidates(&verdict.tallies)[0].is_abstain());
        assert!(!verdict.has_majority);
    }

    #[test]
    fn unanimous_body_size_majority() {
        let people = roster(&["A", "B"]);
        let a = people[0].id;
        let verdict = Verdict::from_ballots(votes(&[(Some(a), 5)]), &people, Some(9));
        assert_eq!(verdict.total_votes, 5);
        assert_eq!(verdict.majority_base, 9);
        assert_eq!(verdict.majority_threshold, 5);
        assert!(verdict.has_majority);
    }

    #[test]
    fn split_vote_has_no_majority() {
        let people = roster(&["A", "B"]);
        let (a, b) = (people[0].id, people[1].id);
        let verdict = Verdict::from_ballots(
            votes(&[(Some(a), 3), (Some(b), 3), (None, 1)]),
            &people,
            Some(9),
        );
        assert_eq!(verdict.total_votes, 7);
        assert!(!verdict.has_majority);
        let top: Vec<_> = top_candidates(&verdict.tallies)
            .iter()
            .map(|t| (t.candidate_id, t.count))
            .collect();
        assert_eq!(top, vec![(Some(a), 3), (Some(b), 3)]);
    }

    #[test]
    fn no_ballots_no_majority() {
        let verdict = Verdict::from_ballots(Vec::new(), &[], None);
        assert!(verdict.tallies.is_empty());
        assert_eq!(verdict.total_votes, 0);
        assert_eq!(verdict.majority_threshold, 1);
        assert!(!verdict.has_majority);
    }
}
