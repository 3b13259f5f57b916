//! The point-in-time view of a session, tailored to whoever asks for it.

use std::collections::HashMap;

use mongodb::{bson::doc, options::FindOptions, Database};
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    api::{
        id::ApiId,
        round::{RoundDescription, RoundResult},
        session::{ParticipantDescription, SessionDescription},
    },
    common::{DisclosureLevel, RoundStatus},
    db::{Ballot, Participant, Round, Session, VoteReceipt},
    mongodb::{Coll, Id},
};
use crate::tally::Verdict;

/// Whether one participant has voted in the active round. Tellers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterStatus {
    pub participant_id: ApiId,
    pub has_voted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundLogEntry {
    pub round: RoundDescription,
    /// `None` for cancelled rounds and rounds revealed with nothing disclosed.
    pub result: Option<RoundResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session: SessionDescription,
    pub participants: Vec<ParticipantDescription>,
    pub current_participant_id: ApiId,
    pub is_teller: bool,
    /// The round open for voting, if any.
    pub current_round: Option<RoundDescription>,
    /// The round whose voting has closed but whose result is not yet revealed.
    pub pending_round: Option<RoundDescription>,
    pub voted_count: u64,
    pub total_participants: u64,
    pub has_voted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voter_status: Option<Vec<VoterStatus>>,
    /// The latest revealed result, while no round is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RoundResult>,
    /// Finished rounds, oldest first.
    pub round_log: Vec<RoundLogEntry>,
}

/// Everything the view is computed from.
pub struct SessionSnapshot<'a> {
    pub session: &'a Session,
    pub requester: &'a Participant,
    /// In join order.
    pub participants: &'a [Participant],
    /// Newest first.
    pub rounds: &'a [Round],
    /// Receipts of the active round.
    pub receipts: &'a [VoteReceipt],
    /// Ballot choices of revealed rounds, by round ID.
    pub ballots: &'a HashMap<Id, Vec<Option<Id>>>,
}

impl SessionSnapshot<'_> {
    fn disclosed(&self, round: &Round) -> Option<RoundResult> {
        let level = round.disclosure_level?;
        let choices = self.ballots.get(&round.id).cloned().unwrap_or_default();
        let verdict = Verdict::from_ballots(choices, self.participants, self.session.body_size);
        Some(RoundResult::disclosed(round, level, &verdict))
    }
}

impl SessionState {
    /// Compute the view from already-loaded records.
    pub fn assemble(snapshot: &SessionSnapshot) -> Self {
        let requester = snapshot.requester;
        let is_teller = requester.role.is_teller();

        let active = snapshot.rounds.iter().find(|r| r.status.is_active());
        let describe = |status: RoundStatus| {
            active
                .filter(|r| r.status == status)
                .map(RoundDescription::from)
        };

        let receipts: Vec<&VoteReceipt> = match active {
            Some(round) => snapshot
                .receipts
                .iter()
                .filter(|r| r.round_id == round.id)
                .collect(),
            None => Vec::new(),
        };
        let voted = |id: Id| receipts.iter().any(|r| r.voter_id == id);

        let voter_status = (is_teller && active.is_some()).then(|| {
            snapshot
                .participants
                .iter()
                .map(|p| VoterStatus {
                    participant_id: p.id.into(),
                    has_voted: voted(p.id),
                })
                .collect()
        });

        let result = match active {
            Some(_) => None,
            None => snapshot
                .rounds
                .iter()
                .find(|r| r.status == RoundStatus::Revealed)
                .and_then(|r| snapshot.disclosed(r)),
        };

        let round_log = snapshot
            .rounds
            .iter()
            .rev()
            .filter(|r| r.status.is_terminal())
            .map(|round| RoundLogEntry {
                round: round.into(),
                result: match round.disclosure_level {
                    Some(DisclosureLevel::Hidden) | None => None,
                    Some(_) => snapshot.disclosed(round),
                },
            })
            .collect();

        Self {
            session: snapshot.session.into(),
            participants: snapshot.participants.iter().map(Into::into).collect(),
            current_participant_id: requester.id.into(),
            is_teller,
            current_round: describe(RoundStatus::Voting),
            pending_round: describe(RoundStatus::Closed),
            voted_count: receipts.len() as u64,
            total_participants: snapshot.participants.len() as u64,
            has_voted: voted(requester.id),
            voter_status,
            result,
            round_log,
        }
    }

    /// Load everything the view needs and compute it.
    pub async fn load(db: &Database, session: &Session, requester: &Participant) -> Result<Self> {
        let participants = Participant::roster(&Coll::from_db(db), session.id).await?;

        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1, "_id": -1 })
            .build();
        let rounds: Vec<Round> = Coll::<Round>::from_db(db)
            .find(doc! { "session_id": session.id }, options)
            .await?
            .try_collect()
            .await?;

        let receipts: Vec<VoteReceipt> = match rounds.iter().find(|r| r.status.is_active()) {
            Some(active) => {
                Coll::<VoteReceipt>::from_db(db)
                    .find(doc! { "round_id": active.id }, None)
                    .await?
                    .try_collect()
                    .await?
            }
            None => Vec::new(),
        };

        // Only rounds that disclose anything need their ballots counted.
        let revealed: Vec<Id> = rounds
            .iter()
            .filter(|r| {
                r.status == RoundStatus::Revealed
                    && r.disclosure_level != Some(DisclosureLevel::Hidden)
            })
            .map(|r| r.id)
            .collect();
        let mut ballots: HashMap<Id, Vec<Option<Id>>> = HashMap::new();
        if !revealed.is_empty() {
            let mut cursor = Coll::<Ballot>::from_db(db)
                .find(doc! { "round_id": { "$in": revealed } }, None)
                .await?;
            while let Some(ballot) = cursor.try_next().await? {
                ballots
                    .entry(ballot.round_id)
                    .or_default()
                    .push(ballot.candidate_id);
            }
        }

        Ok(Self::assemble(&SessionSnapshot {
            session,
            requester,
            participants: &participants,
            rounds: &rounds,
            receipts: &receipts,
            ballots: &ballots,
        }))
    }
}
